use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    device_label, select_best_device, tensor_to_image, DeviceMap, GenerationParams, Loader,
    ModelDescriptor, ModelLike, ModelSource, Optimization, TuningFlags,
};

// Diffusers directory layout, shared by local fine-tuned pipelines and the
// hub fallback repository.
const TOKENIZER_FILE: &str = "tokenizer/tokenizer.json";
const CLIP_FILE: &str = "text_encoder/model.safetensors";
const UNET_FILE: &str = "unet/diffusion_pytorch_model.safetensors";
const VAE_FILE: &str = "vae/diffusion_pytorch_model.safetensors";

/// Scaling factor between VAE latents and the diffusion latent space.
const VAE_SCALE: f64 = 0.18215;

/// Weight files one Stable Diffusion pipeline materializes from.
#[derive(Debug)]
struct SdFiles {
    tokenizer: PathBuf,
    clip_weights: PathBuf,
    unet_weights: PathBuf,
    vae_weights: PathBuf,
}

impl SdFiles {
    /// Local materialization never touches the network: every required file
    /// must already be on disk or the candidate is rejected.
    fn from_dir(dir: &Path) -> Result<Self> {
        let file = |rel: &str| -> Result<PathBuf> {
            let path = dir.join(rel);
            if path.is_file() {
                Ok(path)
            } else {
                anyhow::bail!("missing {rel} under {}", dir.display())
            }
        };
        Ok(Self {
            tokenizer: file(TOKENIZER_FILE)?,
            clip_weights: file(CLIP_FILE)?,
            unet_weights: file(UNET_FILE)?,
            vae_weights: file(VAE_FILE)?,
        })
    }

    async fn fetch(api: &Api, model_id: &str) -> Result<Self> {
        let repo = api.model(model_id.to_string());
        Ok(Self {
            tokenizer: repo
                .get(TOKENIZER_FILE)
                .await
                .context("failed to fetch tokenizer")?,
            clip_weights: repo
                .get(CLIP_FILE)
                .await
                .context("failed to fetch text encoder weights")?,
            unet_weights: repo
                .get(UNET_FILE)
                .await
                .context("failed to fetch unet weights")?,
            vae_weights: repo
                .get(VAE_FILE)
                .await
                .context("failed to fetch vae weights")?,
        })
    }
}

/// A device-placed Stable Diffusion pipeline. Sampling is delegated entirely
/// to `candle_transformers`; this type only wires prompt encoding, the
/// denoising loop and image decoding together.
pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    clip: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    attention_sliced: bool,
    flash_attention: bool,
}

impl StableDiffusionModel {
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let vocab = self.tokenizer.get_vocab(true);
        let pad_token = self.config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *vocab
            .get(pad_token)
            .with_context(|| format!("tokenizer vocabulary has no pad token {pad_token}"))?;

        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)
            .context("failed to tokenize prompt")?
            .get_ids()
            .to_vec();
        tokens.truncate(self.config.clip.max_position_embeddings);
        tokens.resize(self.config.clip.max_position_embeddings, pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.clip.forward(&tokens)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&self, params: &GenerationParams) -> Result<DynamicImage> {
        if let Some(seed) = params.seed {
            self.device.set_seed(seed)?;
        }

        // Classifier-free guidance doubles the batch: unconditional first.
        let use_guidance = params.guidance_scale > 1.0;
        let cond = self.encode_prompt(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[&uncond, &cond], 0)?
        } else {
            cond
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        let mut scheduler = self.config.build_scheduler(params.steps)?;
        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, 4, self.config.height / 8, self.config.width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for &timestep in &timesteps {
            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        let decoded = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let image = ((decoded / 2.)? + 0.5)?
            .to_device(&Device::Cpu)?
            .clamp(0f32, 1f32)?;
        let image = (image.to_dtype(DType::F32)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&image.i(0)?)
    }

    fn apply(&mut self, opt: Optimization) -> Result<()> {
        match opt {
            Optimization::AttentionSlicing if self.attention_sliced => Ok(()),
            Optimization::AttentionSlicing => {
                anyhow::bail!("attention slicing was not configured when the weights were built")
            }
            Optimization::Float16 if self.dtype == DType::F16 => Ok(()),
            Optimization::Float16 => {
                anyhow::bail!("float16 weights require a CUDA device at load time")
            }
            Optimization::MemoryEfficientAttention if self.flash_attention => Ok(()),
            Optimization::MemoryEfficientAttention => {
                anyhow::bail!("flash attention kernels are not compiled into this build")
            }
            Optimization::ModelCpuOffload | Optimization::SequentialCpuOffload => {
                anyhow::bail!("cpu offload is not supported by the candle backend")
            }
        }
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            device: device_label(&self.device),
            dtype: format!("{:?}", self.dtype).to_lowercase(),
            components: vec![
                "DDIMScheduler".to_string(),
                "ClipTextTransformer".to_string(),
                "UNet2DConditionModel".to_string(),
                "AutoEncoderKL".to_string(),
            ],
        }
    }
}

/// Materializes Stable Diffusion pipelines from local directories or the hub.
/// Device placement and precision are fixed here, once per load; the tuner
/// only confirms or rejects them afterwards.
pub struct SdLoader {
    api: Api,
    device_map: DeviceMap,
    flags: TuningFlags,
    width: usize,
    height: usize,
}

impl SdLoader {
    pub fn new(
        api: Api,
        device_map: DeviceMap,
        flags: TuningFlags,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            api,
            device_map,
            flags,
            width,
            height,
        }
    }

    fn build(&self, files: SdFiles) -> Result<StableDiffusionModel> {
        let device = select_best_device(self.device_map).context("failed to set up device")?;
        let dtype = if device.is_cuda() && self.flags.float16 {
            DType::F16
        } else {
            DType::F32
        };
        // Slice size 1 is the most memory-conservative setting.
        let sliced_attention = self.flags.attention_slicing.then_some(1);
        let config = StableDiffusionConfig::v2_1(
            sliced_attention,
            Some(self.height),
            Some(self.width),
        );

        debug!(path = %files.tokenizer.display(), "loading tokenizer");
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(anyhow::Error::msg)
            .context("failed to load tokenizer")?;

        debug!(path = %files.clip_weights.display(), "loading text encoder");
        let clip =
            stable_diffusion::build_clip_transformer(&config.clip, &files.clip_weights, &device, dtype)
                .context("failed to load text encoder")?;

        debug!(path = %files.unet_weights.display(), "loading unet");
        let flash_attention = cfg!(feature = "flash-attn");
        let unet = config
            .build_unet(&files.unet_weights, &device, 4, flash_attention, dtype)
            .context("failed to load unet")?;

        debug!(path = %files.vae_weights.display(), "loading vae");
        let vae = config
            .build_vae(&files.vae_weights, &device, dtype)
            .context("failed to load vae")?;

        info!(
            device = %device_label(&device),
            ?dtype,
            width = self.width,
            height = self.height,
            "stable diffusion pipeline materialized"
        );
        Ok(StableDiffusionModel {
            device,
            dtype,
            config,
            tokenizer,
            clip,
            unet,
            vae,
            attention_sliced: sliced_attention.is_some(),
            flash_attention,
        })
    }
}

impl Loader for SdLoader {
    async fn materialize(&self, source: &ModelSource) -> Result<Box<dyn ModelLike>> {
        let files = match source {
            ModelSource::LocalPath(dir) => SdFiles::from_dir(dir)?,
            ModelSource::RemoteId(id) => SdFiles::fetch(&self.api, id).await?,
        };
        Ok(Box::new(self.build(files)?))
    }
}

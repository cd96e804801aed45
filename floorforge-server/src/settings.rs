use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use floorforge_core::{ResolutionPlan, TuningFlags};
use tracing::warn;

pub const DEFAULT_BASE_MODEL_ID: &str = "stabilityai/stable-diffusion-2-1-base";

/// Environment-sourced runtime configuration. Read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model_base_dir: PathBuf,
    pub pipeline_path: PathBuf,
    pub base_model_id: String,
    pub eager_load_model: bool,
    pub default_num_inference_steps: usize,
    pub default_guidance_scale: f64,
    pub image_width: usize,
    pub image_height: usize,
    pub generated_images_dir: PathBuf,
    pub use_gpu: bool,
    pub use_float16: bool,
    pub use_attention_slicing: bool,
    pub use_cpu_offload: bool,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => value.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, %value, %default, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let model_base_dir = PathBuf::from(env_string("MODEL_BASE_DIR", "models"));
        let pipeline_path = env::var("PIPELINE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_base_dir.join("floor_plan_model"));
        Self {
            model_base_dir,
            pipeline_path,
            base_model_id: env_string("BASE_MODEL_ID", DEFAULT_BASE_MODEL_ID),
            eager_load_model: env_flag("EAGER_LOAD_MODEL", false),
            default_num_inference_steps: env_parse("DEFAULT_NUM_INFERENCE_STEPS", 10),
            default_guidance_scale: env_parse("DEFAULT_GUIDANCE_SCALE", 7.5),
            image_width: env_parse("DEFAULT_IMAGE_WIDTH", 512),
            image_height: env_parse("DEFAULT_IMAGE_HEIGHT", 512),
            generated_images_dir: PathBuf::from(env_string(
                "GENERATED_IMAGES_DIR",
                "static/generated",
            )),
            use_gpu: env_flag("USE_GPU", true),
            use_float16: env_flag("USE_FLOAT16", true),
            use_attention_slicing: env_flag("USE_ATTENTION_SLICING", true),
            use_cpu_offload: env_flag("USE_CPU_OFFLOAD", true),
        }
    }

    /// Creates the directories the service reads and writes.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.model_base_dir)?;
        std::fs::create_dir_all(&self.generated_images_dir)
    }

    pub fn tuning_flags(&self) -> TuningFlags {
        TuningFlags {
            attention_slicing: self.use_attention_slicing,
            cpu_offload: self.use_cpu_offload,
            float16: self.use_float16,
        }
    }

    pub fn resolution_plan(&self) -> ResolutionPlan {
        ResolutionPlan::new(self.pipeline_path.clone(), self.base_model_id.clone())
    }
}

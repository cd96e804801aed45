use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{GenerateError, GenerationParams, ModelLike};

/// UTC timestamp format shared by metadata sidecars and API responses.
/// ISO-8601, so lexicographic order is chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Sidecar metadata written beside every generated image, same base filename
/// with a `.json` extension. The listing endpoint serves these verbatim, so
/// the field names are part of the API contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub id: String,
    pub prompt: String,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
    pub generation_time: f64,
    pub output_path: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub image_path: PathBuf,
    pub elapsed_seconds: f64,
    pub metadata: GenerationMetadata,
}

/// Runs exactly one generation pass and persists the image plus its metadata
/// sidecar. A failure here is fatal for this request only; the shared
/// pipeline is untouched.
pub fn generate(
    model: &dyn ModelLike,
    params: &GenerationParams,
    output_dir: &Path,
    filename: Option<String>,
) -> Result<GenerationOutcome, GenerateError> {
    if params.prompt.trim().is_empty() {
        return Err(GenerateError::EmptyPrompt);
    }

    std::fs::create_dir_all(output_dir)?;
    let (id, filename) = match filename {
        Some(name) => {
            let id = Path::new(&name)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&name)
                .to_string();
            (id, name)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let filename = format!("{id}.png");
            (id, filename)
        }
    };
    let image_path = output_dir.join(&filename);

    info!(
        prompt = %params.prompt,
        steps = params.steps,
        guidance_scale = params.guidance_scale,
        "generating floor plan"
    );
    let started = Instant::now();
    let image = model.run(params)?;
    let elapsed = started.elapsed().as_secs_f64();

    image.save(&image_path)?;

    let metadata = GenerationMetadata {
        id,
        prompt: params.prompt.clone(),
        num_inference_steps: params.steps,
        guidance_scale: params.guidance_scale,
        seed: params.seed,
        generation_time: elapsed,
        output_path: image_path.display().to_string(),
        created_at: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
    };
    let sidecar = File::create(image_path.with_extension("json"))?;
    serde_json::to_writer_pretty(sidecar, &metadata)?;

    info!(
        path = %image_path.display(),
        elapsed_seconds = elapsed,
        "floor plan generated"
    );
    Ok(GenerationOutcome {
        image_path,
        elapsed_seconds: elapsed,
        metadata,
    })
}

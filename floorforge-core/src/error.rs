use thiserror::Error;

/// Every resolution candidate failed. Fatal for generation; the process stays
/// up but cannot serve until the deployment is fixed externally.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no usable model: every candidate failed to materialize")]
    Exhausted { attempts: Vec<String> },
}

/// A single generation request failed. Never affects the cached pipeline.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("prompt must be a non-empty string")]
    EmptyPrompt,
    #[error("image generation failed: {0:#}")]
    Backend(anyhow::Error),
    #[error("failed to encode generated image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to persist generation output: {0}")]
    Persist(#[from] std::io::Error),
    #[error("failed to encode metadata sidecar: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl From<anyhow::Error> for GenerateError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}

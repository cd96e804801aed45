pub mod device_map;
mod error;
mod generate;
mod pipeline;
mod resolver;
mod sd;
mod source;
mod tuner;
mod util;

#[cfg(test)]
pub(crate) mod test_fakes;

pub use device_map::*;
pub use error::*;
pub use generate::*;
use image::DynamicImage;
pub use pipeline::*;
pub use resolver::*;
pub use sd::SdLoader;
use serde::{Deserialize, Serialize};
pub use source::*;
pub use tuner::*;
pub use util::*;

/// Parameters for a single generation pass. Defaults have already been
/// applied; the prompt is expected to be non-empty (and is re-checked by the
/// orchestrator before any work happens).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
}

/// Device, precision and component summary of a materialized pipeline,
/// surfaced through the model-info endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelDescriptor {
    pub device: String,
    pub dtype: String,
    pub components: Vec<String>,
}

impl ModelDescriptor {
    pub fn is_gpu(&self) -> bool {
        self.device != "cpu"
    }
}

/// An opaque generation capability. The denoising loop itself belongs to the
/// backing model implementation; callers only hand over a prompt and sampling
/// parameters and get a raster image back.
pub trait ModelLike: Send + Sync {
    /// Runs exactly one generation pass. Blocking and potentially very slow;
    /// callers are expected to move this off the async runtime.
    fn run(&self, params: &GenerationParams) -> anyhow::Result<DynamicImage>;

    /// Attempts one best-effort optimization. An `Err` means the step is
    /// unavailable on this backend; the tuner logs and skips it.
    fn apply(&mut self, opt: Optimization) -> anyhow::Result<()>;

    fn descriptor(&self) -> ModelDescriptor;
}

//! Scripted stand-ins for the model backend, shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, RgbImage};

use crate::{GenerationParams, Loader, ModelDescriptor, ModelLike, ModelSource, Optimization};

pub struct FakeModel {
    device: String,
    applied: Vec<Optimization>,
    failing: Vec<Optimization>,
    runs: Arc<AtomicUsize>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            device: "cpu".to_string(),
            applied: Vec::new(),
            failing: Vec::new(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn on_device(mut self, device: &str) -> Self {
        self.device = device.to_string();
        self
    }

    pub fn failing_on(mut self, opt: Optimization) -> Self {
        self.failing.push(opt);
        self
    }

    /// Optimizations that were successfully applied, in order.
    pub fn applied(&self) -> Vec<Optimization> {
        self.applied.clone()
    }

    pub fn run_count(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

impl ModelLike for FakeModel {
    fn run(&self, _params: &GenerationParams) -> anyhow::Result<DynamicImage> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::new(2, 2)))
    }

    fn apply(&mut self, opt: Optimization) -> anyhow::Result<()> {
        if self.failing.contains(&opt) {
            anyhow::bail!("scripted failure for {opt}");
        }
        self.applied.push(opt);
        Ok(())
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            device: self.device.clone(),
            dtype: "f32".to_string(),
            components: vec!["FakePipeline".to_string()],
        }
    }
}

/// A model that always fails to generate, for exercising the per-request
/// error path.
pub struct BrokenModel;

impl ModelLike for BrokenModel {
    fn run(&self, _params: &GenerationParams) -> anyhow::Result<DynamicImage> {
        anyhow::bail!("scripted generation failure")
    }

    fn apply(&mut self, _opt: Optimization) -> anyhow::Result<()> {
        Ok(())
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            device: "cpu".to_string(),
            dtype: "f32".to_string(),
            components: vec!["BrokenPipeline".to_string()],
        }
    }
}

pub struct ScriptedLoader {
    failing: Option<Vec<ModelSource>>,
    fail_everything: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<ModelSource>>,
    materializations: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn succeeding() -> Self {
        Self {
            failing: None,
            fail_everything: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
            materializations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_for(sources: Vec<ModelSource>) -> Self {
        Self {
            failing: Some(sources),
            ..Self::succeeding()
        }
    }

    pub fn failing_for_everything() -> Self {
        Self {
            fail_everything: true,
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sources passed to `materialize`, in call order.
    pub fn calls(&self) -> Vec<ModelSource> {
        self.calls.lock().unwrap().clone()
    }

    /// Counter of successful materializations.
    pub fn materialization_count(&self) -> Arc<AtomicUsize> {
        self.materializations.clone()
    }
}

impl Loader for ScriptedLoader {
    async fn materialize(&self, source: &ModelSource) -> anyhow::Result<Box<dyn ModelLike>> {
        self.calls.lock().unwrap().push(source.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self.fail_everything
            || self
                .failing
                .as_ref()
                .is_some_and(|sources| sources.contains(source));
        if failed {
            anyhow::bail!("scripted materialization failure");
        }
        self.materializations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeModel::new()))
    }
}

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    resolve, tune, Loader, ModelDescriptor, ModelLike, Provenance, ResolutionPlan, ResolveError,
    TuningFlags,
};

/// The process-wide handle to the materialized, tuned generation capability.
/// At most one exists at a time; it lives until `unload` or process teardown.
pub struct PipelineHandle {
    pub model: Arc<dyn ModelLike>,
    pub provenance: Provenance,
    pub descriptor: ModelDescriptor,
}

/// Snapshot of the singleton for the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    NotLoaded,
    Loaded {
        device: String,
        dtype: String,
        provenance: Provenance,
        components: Vec<String>,
    },
}

/// Lazily-initialized pipeline singleton. Owned by the server's state rather
/// than a process global, so tests can construct as many cells as they like.
///
/// The slot mutex is held across materialization: concurrent first callers
/// queue behind a single load and all receive the same handle, instead of
/// racing duplicate materializations.
pub struct PipelineCell<L> {
    loader: L,
    plan: ResolutionPlan,
    flags: TuningFlags,
    slot: Mutex<Option<Arc<PipelineHandle>>>,
}

impl<L: Loader> PipelineCell<L> {
    pub fn new(loader: L, plan: ResolutionPlan, flags: TuningFlags) -> Self {
        Self {
            loader,
            plan,
            flags,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached handle, materializing and tuning one first if
    /// nothing is loaded. A cache hit is a cheap clone.
    pub async fn get_or_load(&self) -> Result<Arc<PipelineHandle>, ResolveError> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let resolved = resolve(&self.loader, &self.plan.candidates()).await?;
        let mut model = resolved.model;
        tune(model.as_mut(), &self.flags);

        let handle = Arc::new(PipelineHandle {
            descriptor: model.descriptor(),
            provenance: resolved.provenance,
            model: Arc::from(model),
        });
        info!(
            provenance = ?handle.provenance,
            device = %handle.descriptor.device,
            dtype = %handle.descriptor.dtype,
            "pipeline ready"
        );
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Drops the cached handle so the next `get_or_load` re-runs the full
    /// resolution procedure. A no-op when nothing is loaded.
    pub async fn unload(&self) {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(_) => info!("pipeline unloaded"),
            None => debug!("unload requested but no pipeline is loaded"),
        }
    }

    pub async fn info(&self) -> PipelineStatus {
        match self.slot.lock().await.as_ref() {
            Some(handle) => PipelineStatus::Loaded {
                device: handle.descriptor.device.clone(),
                dtype: handle.descriptor.dtype.clone(),
                provenance: handle.provenance,
                components: handle.descriptor.components.clone(),
            },
            None => PipelineStatus::NotLoaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::test_fakes::ScriptedLoader;

    fn cell(loader: ScriptedLoader) -> PipelineCell<ScriptedLoader> {
        let plan = ResolutionPlan::new("/definitely/not/a/real/path", "acme/base-model");
        PipelineCell::new(loader, plan, TuningFlags::default())
    }

    #[tokio::test]
    async fn concurrent_first_loads_materialize_exactly_once() {
        let loader = ScriptedLoader::succeeding().with_delay(Duration::from_millis(25));
        let count = loader.materialization_count();
        let cell = Arc::new(cell(loader));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            tasks.push(tokio::spawn(async move { cell.get_or_load().await }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(handle, &handles[0]));
        }
    }

    #[tokio::test]
    async fn get_or_load_after_unload_re_resolves() {
        let loader = ScriptedLoader::succeeding();
        let count = loader.materialization_count();
        let cell = cell(loader);

        cell.get_or_load().await.unwrap();
        cell.get_or_load().await.unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        cell.unload().await;
        cell.get_or_load().await.unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_unload_is_a_no_op() {
        let cell = cell(ScriptedLoader::succeeding());
        cell.get_or_load().await.unwrap();
        cell.unload().await;
        cell.unload().await;
        assert_eq!(cell.info().await, PipelineStatus::NotLoaded);
    }

    #[tokio::test]
    async fn info_reflects_load_state_and_provenance() {
        let cell = cell(ScriptedLoader::succeeding());
        assert_eq!(cell.info().await, PipelineStatus::NotLoaded);

        cell.get_or_load().await.unwrap();
        match cell.info().await {
            PipelineStatus::Loaded { provenance, .. } => {
                // The plan's preferred path never exists, so only the remote
                // fallback can have answered.
                assert_eq!(provenance, Provenance::BaseFallback);
            }
            other => panic!("expected loaded status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_resolution_leaves_cell_unloaded() {
        let loader = ScriptedLoader::failing_for_everything();
        let cell = cell(loader);
        assert!(cell.get_or_load().await.is_err());
        assert_eq!(cell.info().await, PipelineStatus::NotLoaded);
    }
}

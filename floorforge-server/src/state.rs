use floorforge_core::{Loader, PipelineCell};

use crate::settings::Settings;

/// Shared server state: the settings plus the lifetime-scoped pipeline
/// singleton. Generic over the loader so tests can substitute a scripted one.
pub struct AppState<L> {
    pub settings: Settings,
    pub pipeline: PipelineCell<L>,
}

impl<L: Loader> AppState<L> {
    pub fn new(settings: Settings, loader: L) -> Self {
        let pipeline = PipelineCell::new(
            loader,
            settings.resolution_plan(),
            settings.tuning_flags(),
        );
        Self { settings, pipeline }
    }
}

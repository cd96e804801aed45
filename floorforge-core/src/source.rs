use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

/// Conventional directories tried when the configured pipeline path is
/// missing or fails to materialize.
pub const ALTERNATE_MODEL_DIRS: &[&str] = &[
    "models/floor_plan_model",
    "app/models/floor_plan_model",
    "../app/models/floor_plan_model",
];

/// Whether the serving model is the intended fine-tuned pipeline or the
/// generic base model. Downstream consumers need to know which one answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Custom,
    BaseFallback,
}

/// One place a candidate model may be found. Local directories hold a
/// fine-tuned pipeline; the remote identifier names a public hub model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    LocalPath(PathBuf),
    RemoteId(String),
}

impl ModelSource {
    pub fn provenance(&self) -> Provenance {
        match self {
            ModelSource::LocalPath(_) => Provenance::Custom,
            ModelSource::RemoteId(_) => Provenance::BaseFallback,
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::LocalPath(path) => write!(f, "local directory {}", path.display()),
            ModelSource::RemoteId(id) => write!(f, "hub model {id}"),
        }
    }
}

/// Where to look for a usable model, in priority order: the preferred local
/// pipeline, then the conventional alternates, then the remote fallback.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    pub preferred_path: PathBuf,
    pub fallback_id: String,
}

impl ResolutionPlan {
    pub fn new(preferred_path: impl Into<PathBuf>, fallback_id: impl Into<String>) -> Self {
        Self {
            preferred_path: preferred_path.into(),
            fallback_id: fallback_id.into(),
        }
    }

    /// Candidate sources for one resolution pass. Existence is checked fresh
    /// every time so a model dropped onto disk after startup is picked up by
    /// the next load. The remote fallback is always last.
    pub fn candidates(&self) -> Vec<ModelSource> {
        let mut sources = Vec::new();
        if self.preferred_path.is_dir() {
            sources.push(ModelSource::LocalPath(self.preferred_path.clone()));
        } else {
            debug!(
                path = %self.preferred_path.display(),
                "preferred pipeline path not found, checking alternates"
            );
        }
        for dir in ALTERNATE_MODEL_DIRS {
            let candidate = ModelSource::LocalPath(PathBuf::from(dir));
            if PathBuf::from(dir).is_dir() && !sources.contains(&candidate) {
                sources.push(candidate);
            }
        }
        sources.push(ModelSource::RemoteId(self.fallback_id.clone()));
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_preferred_path_leaves_only_remote_fallback() {
        let plan = ResolutionPlan::new("/definitely/not/a/real/path", "acme/base-model");
        let candidates = plan.candidates();
        assert_eq!(
            candidates.last(),
            Some(&ModelSource::RemoteId("acme/base-model".to_string()))
        );
        assert!(candidates
            .iter()
            .all(|c| !matches!(c, ModelSource::LocalPath(p) if p == &plan.preferred_path)));
    }

    #[test]
    fn existing_preferred_path_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ResolutionPlan::new(dir.path(), "acme/base-model");
        let candidates = plan.candidates();
        assert_eq!(
            candidates.first(),
            Some(&ModelSource::LocalPath(dir.path().to_path_buf()))
        );
        assert_eq!(
            candidates.last(),
            Some(&ModelSource::RemoteId("acme/base-model".to_string()))
        );
    }

    #[test]
    fn local_sources_tag_custom_and_remote_tags_fallback() {
        assert_eq!(
            ModelSource::LocalPath(PathBuf::from("x")).provenance(),
            Provenance::Custom
        );
        assert_eq!(
            ModelSource::RemoteId("y".to_string()).provenance(),
            Provenance::BaseFallback
        );
    }
}

use std::fmt;
use std::future::Future;

use tracing::{info, warn};

use crate::{ModelLike, ModelSource, Provenance, ResolveError};

/// Materializes a model from a single source. This is the seam between
/// resolution order (this module) and the concrete backend (`sd`); tests
/// substitute scripted loaders here.
pub trait Loader: Send + Sync {
    fn materialize(
        &self,
        source: &ModelSource,
    ) -> impl Future<Output = anyhow::Result<Box<dyn ModelLike>>> + Send;
}

/// A freshly materialized model together with where it came from.
pub struct ResolvedPipeline {
    pub model: Box<dyn ModelLike>,
    pub provenance: Provenance,
    pub source: ModelSource,
}

impl fmt::Debug for ResolvedPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedPipeline")
            .field("provenance", &self.provenance)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Tries each candidate in order; the first that materializes wins. A failed
/// candidate is logged and skipped, never retried or repaired. Only the
/// exhaustion of every candidate propagates.
pub async fn resolve<L: Loader>(
    loader: &L,
    candidates: &[ModelSource],
) -> Result<ResolvedPipeline, ResolveError> {
    let mut attempts = Vec::new();
    for source in candidates {
        info!(%source, "attempting to materialize model");
        match loader.materialize(source).await {
            Ok(model) => {
                let provenance = source.provenance();
                match provenance {
                    Provenance::Custom => info!(%source, "loaded fine-tuned model"),
                    Provenance::BaseFallback => {
                        warn!(%source, "serving the base model, not the fine-tuned model")
                    }
                }
                return Ok(ResolvedPipeline {
                    model,
                    provenance,
                    source: source.clone(),
                });
            }
            Err(err) => {
                warn!(%source, error = %format!("{err:#}"), "candidate failed to materialize");
                attempts.push(format!("{source}: {err:#}"));
            }
        }
    }
    Err(ResolveError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_fakes::ScriptedLoader;

    fn local(path: &str) -> ModelSource {
        ModelSource::LocalPath(PathBuf::from(path))
    }

    fn remote(id: &str) -> ModelSource {
        ModelSource::RemoteId(id.to_string())
    }

    #[tokio::test]
    async fn first_working_candidate_wins_and_tags_custom() {
        let loader = ScriptedLoader::succeeding();
        let candidates = vec![local("a"), local("b"), remote("base")];
        let resolved = resolve(&loader, &candidates).await.unwrap();
        assert_eq!(resolved.provenance, Provenance::Custom);
        assert_eq!(resolved.source, local("a"));
        assert_eq!(loader.calls(), vec![local("a")]);
    }

    #[tokio::test]
    async fn broken_local_candidates_are_skipped_in_declared_order() {
        let loader = ScriptedLoader::failing_for(vec![local("a"), local("b")]);
        let candidates = vec![local("a"), local("b"), remote("base")];
        let resolved = resolve(&loader, &candidates).await.unwrap();
        assert_eq!(resolved.provenance, Provenance::BaseFallback);
        assert_eq!(loader.calls(), vec![local("a"), local("b"), remote("base")]);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let loader = ScriptedLoader::failing_for(vec![local("a"), remote("base")]);
        let candidates = vec![local("a"), remote("base")];
        let err = resolve(&loader, &candidates).await.unwrap_err();
        let ResolveError::Exhausted { attempts } = err;
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].contains("local directory a"));
        assert!(attempts[1].contains("hub model base"));
    }
}

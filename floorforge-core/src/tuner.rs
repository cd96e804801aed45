use std::fmt;

use tracing::{info, warn};

use crate::ModelLike;

/// Best-effort performance and memory adjustments. Each step is independent;
/// a failed step is logged and skipped, never fatal for loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    AttentionSlicing,
    ModelCpuOffload,
    SequentialCpuOffload,
    Float16,
    MemoryEfficientAttention,
}

impl fmt::Display for Optimization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Optimization::AttentionSlicing => "attention slicing",
            Optimization::ModelCpuOffload => "model CPU offload",
            Optimization::SequentialCpuOffload => "sequential CPU offload",
            Optimization::Float16 => "float16 weights",
            Optimization::MemoryEfficientAttention => "memory-efficient attention",
        };
        f.write_str(name)
    }
}

/// Environment-driven switches for the tuning pass.
#[derive(Debug, Clone, Copy)]
pub struct TuningFlags {
    pub attention_slicing: bool,
    pub cpu_offload: bool,
    pub float16: bool,
}

impl Default for TuningFlags {
    fn default() -> Self {
        Self {
            attention_slicing: true,
            cpu_offload: true,
            float16: true,
        }
    }
}

/// Fixed order: slicing, then the offload variants, then precision, then the
/// GPU-only memory-efficient attention step.
fn plan(flags: &TuningFlags, gpu: bool) -> Vec<Optimization> {
    let mut steps = Vec::new();
    if flags.attention_slicing {
        steps.push(Optimization::AttentionSlicing);
    }
    if flags.cpu_offload {
        steps.push(Optimization::ModelCpuOffload);
        steps.push(Optimization::SequentialCpuOffload);
    }
    if flags.float16 {
        steps.push(Optimization::Float16);
    }
    if gpu {
        steps.push(Optimization::MemoryEfficientAttention);
    }
    steps
}

/// Applies the flag-gated optimization sequence to a freshly materialized
/// model. Failures never abort loading and never reach the caller.
pub fn tune(model: &mut dyn ModelLike, flags: &TuningFlags) {
    let gpu = model.descriptor().is_gpu();
    for opt in plan(flags, gpu) {
        match model.apply(opt) {
            Ok(()) => info!(%opt, "optimization enabled"),
            Err(err) => {
                warn!(%opt, error = %format!("{err:#}"), "optimization unavailable, skipping")
            }
        }
    }
}

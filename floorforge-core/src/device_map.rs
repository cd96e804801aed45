#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl DeviceMap {
    /// Deployment-time device choice: GPU-capable by default, CPU-forced when
    /// the flag says so.
    pub fn from_use_gpu(use_gpu: bool) -> Self {
        if use_gpu {
            Self::default()
        } else {
            Self::ForceCpu
        }
    }
}

//! Execution limits.

/// Configurable resource limits for a runtime.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Local-symbol cap per function; exceeding it is a compile-time
    /// symbol-limit error.
    pub max_locals: u16,
    /// Value-stack cap; exceeding it raises a stack-overflow error.
    pub max_stack: usize,
    /// Frame-stack cap; exceeding it raises a stack-overflow error.
    pub max_frames: usize,
    /// How many reusable child VMs the pool retains.
    pub max_pooled_vms: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_locals: 256,
            max_stack: 2048,
            max_frames: 1024,
            max_pooled_vms: 8,
        }
    }
}

/// Default device cycle budget for one run.
pub const DEFAULT_WAIT_CYCLES: u32 = 10_000_000;

/// Parameters of one submit-and-wait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunConfig {
    /// Device cycles to wait for FINISH before reporting a timeout.
    pub wait_cycles: u32,
    /// Allocate the instruction and data buffers cacheable.
    pub cacheable: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wait_cycles: DEFAULT_WAIT_CYCLES,
            cacheable: true,
        }
    }
}

/// Address space and capacity of the in-process host driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HostConfig {
    /// First physical address handed out.
    pub phys_base: u64,
    /// Total bytes available for allocation.
    pub capacity: usize,
    /// Allocation granularity and alignment in bytes. [`crate::HostDriver::new`]
    /// rounds it up to a power of two.
    pub page_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            phys_base: 0x1000_0000,
            capacity: 16 << 20,
            page_size: 4096,
        }
    }
}

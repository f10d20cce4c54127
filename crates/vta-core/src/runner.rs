//! Submit-and-wait over a [`Driver`].

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::driver::{DeviceHandle, DmaBuffer, Driver, RunStatus};
use crate::error::RunError;
use crate::instruction::RawInstruction;
use crate::memory::PhysAddr;
use crate::stream::InstructionStream;

/// What happened to one submitted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Device outcome.
    pub status: RunStatus,
    /// Records submitted.
    pub instruction_count: u32,
    /// Physical address the stream was fetched from.
    pub stream_addr: PhysAddr,
    /// Cycle budget granted.
    pub wait_cycles: u32,
}

impl RunReport {
    /// Returns true when the device did not finish in time.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status == RunStatus::TimedOut
    }

    /// Converts a timeout into [`RunError::DeviceTimeout`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError::DeviceTimeout`] when the run timed out.
    pub fn into_result(self) -> Result<Self, RunError> {
        match self.status {
            RunStatus::Completed => Ok(self),
            RunStatus::TimedOut => Err(RunError::DeviceTimeout {
                wait_cycles: self.wait_cycles,
            }),
        }
    }
}

/// Copies a built stream into device memory, runs it and waits.
///
/// # Errors
///
/// See [`submit_records`].
pub fn submit<D: Driver>(
    driver: &D,
    stream: &InstructionStream,
    config: &RunConfig,
) -> Result<RunReport, RunError> {
    submit_records(driver, stream.records(), config)
}

/// Copies raw records into device memory, runs them and waits.
///
/// The instruction buffer is allocated before the device is opened, so an
/// allocation failure never touches the device. The buffer and the device
/// are released exactly once whatever the outcome. A timeout is returned as
/// a report, not an error.
///
/// # Errors
///
/// Returns [`RunError::StreamTooLong`] when the count does not fit the
/// device register and [`RunError::Driver`] for allocation, copy, open or
/// run failures.
pub fn submit_records<D: Driver>(
    driver: &D,
    records: &[RawInstruction],
    config: &RunConfig,
) -> Result<RunReport, RunError> {
    let instruction_count =
        u32::try_from(records.len()).map_err(|_| RunError::StreamTooLong(records.len()))?;
    let bytes: Vec<u8> = records.iter().flat_map(|record| record.to_bytes()).collect();

    let insn_buffer = DmaBuffer::from_bytes(driver, &bytes, config.cacheable)?;
    let stream_addr = insn_buffer.phys_addr();
    let mut device = DeviceHandle::open(driver)?;

    info!(
        instructions = instruction_count,
        addr = %stream_addr,
        wait_cycles = config.wait_cycles,
        "submitting instruction stream"
    );
    let status = device.run(stream_addr, instruction_count, config.wait_cycles)?;
    match status {
        RunStatus::Completed => info!(instructions = instruction_count, "device run completed"),
        RunStatus::TimedOut => warn!(
            wait_cycles = config.wait_cycles,
            "device timed out before finish"
        ),
    }

    Ok(RunReport {
        status,
        instruction_count,
        stream_addr,
        wait_cycles: config.wait_cycles,
    })
}

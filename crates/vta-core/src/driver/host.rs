//! In-process stand-in for the accelerator driver.
//!
//! Memory is a page-aligned bump allocator over a fake physical range.
//! `device_run` fetches and decodes the stream from that memory and runs
//! only the dependency-token protocol under the cycle budget; no data moves
//! and no arithmetic happens.

use std::cell::RefCell;
use std::collections::BTreeMap;

use tracing::debug;

use super::{Driver, RunStatus};
use crate::config::HostConfig;
use crate::decoder::decode;
use crate::deps::route_program;
use crate::encoding::INSTRUCTION_BYTES;
use crate::error::DriverError;
use crate::instruction::{Instruction, RawInstruction};
use crate::memory::PhysAddr;
use crate::queue::QueueMap;
use crate::schedule::{ScheduleOutcome, TokenScheduler};

/// Buffer handle issued by [`HostDriver`].
#[derive(Debug, PartialEq, Eq)]
pub struct HostBuffer {
    addr: u64,
    len: usize,
}

/// Device handle issued by [`HostDriver`].
#[derive(Debug, PartialEq, Eq)]
pub struct HostDevice {
    id: u32,
}

impl HostDevice {
    /// Sequence number of this open.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Default)]
struct HostState {
    next_offset: usize,
    allocations: BTreeMap<u64, Vec<u8>>,
    open: Option<u32>,
    opens: u32,
    runs: usize,
}

/// Host-memory driver with a token-protocol device model.
#[derive(Debug)]
pub struct HostDriver {
    config: HostConfig,
    queue_map: QueueMap,
    state: RefCell<HostState>,
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl HostDriver {
    /// Creates a driver over the configured address range.
    ///
    /// `page_size` is rounded up to a power of two, with a minimum of one
    /// byte.
    #[must_use]
    pub fn new(mut config: HostConfig) -> Self {
        config.page_size = config
            .page_size
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        Self {
            config,
            queue_map: QueueMap::vta(),
            state: RefCell::new(HostState::default()),
        }
    }

    /// Replaces the routing the device model fetches with.
    #[must_use]
    pub fn with_queue_map(mut self, queue_map: QueueMap) -> Self {
        self.queue_map = queue_map;
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Number of buffers allocated and not yet freed.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    /// Number of currently open devices (0 or 1).
    #[must_use]
    pub fn open_devices(&self) -> usize {
        usize::from(self.state.borrow().open.is_some())
    }

    /// Number of completed `device_run` calls.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.state.borrow().runs
    }

    fn fetch(&self, addr: PhysAddr, len: usize) -> Result<Vec<u8>, DriverError> {
        let state = self.state.borrow();
        let unmapped = DriverError::UnmappedAddress { addr, len };
        let (&base, bytes) = state
            .allocations
            .range(..=addr.val())
            .next_back()
            .ok_or_else(|| unmapped.clone())?;
        let start = usize::try_from(addr.val() - base).map_err(|_| unmapped.clone())?;
        bytes
            .get(start..)
            .and_then(|tail| tail.get(..len))
            .map(<[u8]>::to_vec)
            .ok_or(unmapped)
    }
}

impl Driver for HostDriver {
    type Buffer = HostBuffer;
    type Device = HostDevice;

    fn mem_alloc(&self, size: usize, _cacheable: bool) -> Result<HostBuffer, DriverError> {
        let mut state = self.state.borrow_mut();
        let available = self.config.capacity.saturating_sub(state.next_offset);
        let pages = size.max(1).div_ceil(self.config.page_size);
        let out_of_memory = DriverError::OutOfMemory {
            requested: size,
            available,
        };
        let reserved = pages
            .checked_mul(self.config.page_size)
            .filter(|reserved| *reserved <= available)
            .ok_or_else(|| out_of_memory.clone())?;
        let addr = u64::try_from(state.next_offset)
            .ok()
            .and_then(|offset| self.config.phys_base.checked_add(offset))
            .filter(|addr| {
                u64::try_from(reserved - 1)
                    .ok()
                    .and_then(|last| addr.checked_add(last))
                    .is_some()
            })
            .ok_or(out_of_memory)?;
        state.next_offset += reserved;
        state.allocations.insert(addr, vec![0; size]);
        debug!(addr = %PhysAddr::new(addr), size, "host buffer allocated");
        Ok(HostBuffer { addr, len: size })
    }

    fn mem_free(&self, buffer: HostBuffer) {
        self.state.borrow_mut().allocations.remove(&buffer.addr);
        debug!(addr = %PhysAddr::new(buffer.addr), size = buffer.len, "host buffer freed");
    }

    fn phys_addr(&self, buffer: &HostBuffer) -> PhysAddr {
        PhysAddr::new(buffer.addr)
    }

    fn mem_write(
        &self,
        buffer: &mut HostBuffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.state.borrow_mut();
        let bytes = state
            .allocations
            .get_mut(&buffer.addr)
            .ok_or(DriverError::UnmappedAddress {
                addr: PhysAddr::new(buffer.addr),
                len: buffer.len,
            })?;
        let size = bytes.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= size)
            .ok_or(DriverError::OutOfBounds {
                offset,
                len: data.len(),
                size,
            })?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn mem_read(
        &self,
        buffer: &HostBuffer,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let state = self.state.borrow();
        let bytes = state
            .allocations
            .get(&buffer.addr)
            .ok_or(DriverError::UnmappedAddress {
                addr: PhysAddr::new(buffer.addr),
                len: buffer.len,
            })?;
        let source = offset
            .checked_add(out.len())
            .and_then(|end| bytes.get(offset..end))
            .ok_or(DriverError::OutOfBounds {
                offset,
                len: out.len(),
                size: bytes.len(),
            })?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn device_open(&self) -> Result<HostDevice, DriverError> {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.open {
            return Err(DriverError::DeviceUnavailable(format!(
                "device already open as handle {id}"
            )));
        }
        let id = state.opens;
        state.opens += 1;
        state.open = Some(id);
        Ok(HostDevice { id })
    }

    fn device_run(
        &self,
        device: &mut HostDevice,
        insn_phys_addr: PhysAddr,
        insn_count: u32,
        wait_cycles: u32,
    ) -> Result<RunStatus, DriverError> {
        if self.state.borrow().open != Some(device.id) {
            return Err(DriverError::DeviceUnavailable(format!(
                "handle {} is not the open device",
                device.id
            )));
        }
        let count = insn_count as usize;
        let bytes = self.fetch(insn_phys_addr, count * INSTRUCTION_BYTES)?;
        let program = bytes
            .chunks_exact(INSTRUCTION_BYTES)
            .enumerate()
            .map(|(index, chunk)| {
                RawInstruction::try_from(chunk)
                    .and_then(decode)
                    .map_err(|source| DriverError::InvalidInstruction { index, source })
            })
            .collect::<Result<Vec<Instruction>, _>>()?;
        let routed =
            route_program(&program, &self.queue_map).map_err(DriverError::Unschedulable)?;

        let outcome = TokenScheduler::new(&routed).run_until_finish(u64::from(wait_cycles));
        self.state.borrow_mut().runs += 1;
        debug!(device = device.id, ?outcome, "host device run returned");
        Ok(match outcome {
            ScheduleOutcome::Completed { .. } => RunStatus::Completed,
            ScheduleOutcome::Stalled { .. } | ScheduleOutcome::BudgetExhausted { .. } => {
                RunStatus::TimedOut
            }
        })
    }

    fn device_close(&self, device: HostDevice) {
        let mut state = self.state.borrow_mut();
        if state.open == Some(device.id) {
            state.open = None;
        }
    }
}

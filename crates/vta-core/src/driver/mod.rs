//! Device driver contract and owning guards for its resources.
//!
//! A [`Driver`] hands out raw buffer and device handles. Library code never
//! holds those directly: [`DmaBuffer`] and [`DeviceHandle`] own them and
//! release them in `Drop`, so every buffer is freed and the device closed
//! exactly once on every path out of a run.

/// In-process host driver.
pub mod host;

pub use host::{HostBuffer, HostDevice, HostDriver};

use crate::error::DriverError;
use crate::memory::PhysAddr;

/// Outcome of one device run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunStatus {
    /// FINISH retired within the cycle budget.
    Completed,
    /// The cycle budget elapsed first.
    TimedOut,
}

/// Synchronous, blocking accelerator driver.
pub trait Driver {
    /// Raw handle of a physically contiguous buffer.
    type Buffer;
    /// Raw handle of an open device.
    type Device;

    /// Allocates `size` bytes of device-visible memory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfMemory`] when the request cannot be met.
    fn mem_alloc(&self, size: usize, cacheable: bool) -> Result<Self::Buffer, DriverError>;

    /// Releases a buffer.
    fn mem_free(&self, buffer: Self::Buffer);

    /// Physical address of the first byte of `buffer`.
    fn phys_addr(&self, buffer: &Self::Buffer) -> PhysAddr;

    /// Copies `data` into `buffer` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfBounds`] when the range overruns the buffer.
    fn mem_write(
        &self,
        buffer: &mut Self::Buffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DriverError>;

    /// Copies `out.len()` bytes from `buffer` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfBounds`] when the range overruns the buffer.
    fn mem_read(&self, buffer: &Self::Buffer, offset: usize, out: &mut [u8])
        -> Result<(), DriverError>;

    /// Opens the device.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::DeviceUnavailable`] when it cannot be opened.
    fn device_open(&self) -> Result<Self::Device, DriverError>;

    /// Runs `insn_count` records starting at `insn_phys_addr` and blocks
    /// until FINISH retires or `wait_cycles` elapse.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the device cannot start the run. A
    /// timeout is reported as [`RunStatus::TimedOut`], not as an error.
    fn device_run(
        &self,
        device: &mut Self::Device,
        insn_phys_addr: PhysAddr,
        insn_count: u32,
        wait_cycles: u32,
    ) -> Result<RunStatus, DriverError>;

    /// Closes the device.
    fn device_close(&self, device: Self::Device);
}

/// Owned DMA buffer, freed on drop.
pub struct DmaBuffer<'d, D: Driver> {
    driver: &'d D,
    buffer: Option<D::Buffer>,
    len: usize,
}

impl<'d, D: Driver> DmaBuffer<'d, D> {
    /// Allocates `len` bytes through `driver`.
    ///
    /// # Errors
    ///
    /// Propagates [`DriverError::OutOfMemory`].
    pub fn alloc(driver: &'d D, len: usize, cacheable: bool) -> Result<Self, DriverError> {
        let buffer = driver.mem_alloc(len, cacheable)?;
        Ok(Self {
            driver,
            buffer: Some(buffer),
            len,
        })
    }

    /// Allocates a buffer holding exactly `data`.
    ///
    /// # Errors
    ///
    /// Propagates allocation and write failures.
    pub fn from_bytes(driver: &'d D, data: &[u8], cacheable: bool) -> Result<Self, DriverError> {
        let mut buffer = Self::alloc(driver, data.len(), cacheable)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Requested size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length buffer.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical address of the first byte.
    #[must_use]
    pub fn phys_addr(&self) -> PhysAddr {
        self.driver.phys_addr(self.raw())
    }

    /// Copies `data` in at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfBounds`] when the range overruns the buffer.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), DriverError> {
        self.check_range(offset, data.len())?;
        let driver = self.driver;
        match self.buffer.as_mut() {
            Some(buffer) => driver.mem_write(buffer, offset, data),
            None => unreachable!("dma buffer accessed after release"),
        }
    }

    /// Copies `out.len()` bytes out from `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfBounds`] when the range overruns the buffer.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), DriverError> {
        self.check_range(offset, out.len())?;
        self.driver.mem_read(self.raw(), offset, out)
    }

    /// Copies the whole buffer out.
    ///
    /// # Errors
    ///
    /// Propagates driver read failures.
    pub fn to_vec(&self) -> Result<Vec<u8>, DriverError> {
        let mut out = vec![0; self.len];
        self.read(0, &mut out)?;
        Ok(out)
    }

    const fn check_range(&self, offset: usize, len: usize) -> Result<(), DriverError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(DriverError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    fn raw(&self) -> &D::Buffer {
        match self.buffer.as_ref() {
            Some(buffer) => buffer,
            None => unreachable!("dma buffer accessed after release"),
        }
    }
}

impl<D: Driver> Drop for DmaBuffer<'_, D> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.driver.mem_free(buffer);
        }
    }
}

/// Open device, closed on drop.
pub struct DeviceHandle<'d, D: Driver> {
    driver: &'d D,
    device: Option<D::Device>,
}

impl<'d, D: Driver> DeviceHandle<'d, D> {
    /// Opens the device behind `driver`.
    ///
    /// # Errors
    ///
    /// Propagates [`DriverError::DeviceUnavailable`].
    pub fn open(driver: &'d D) -> Result<Self, DriverError> {
        let device = driver.device_open()?;
        Ok(Self {
            driver,
            device: Some(device),
        })
    }

    /// Runs a stream and waits for it.
    ///
    /// # Errors
    ///
    /// Propagates driver failures. Timeouts are [`RunStatus::TimedOut`].
    pub fn run(
        &mut self,
        insn_phys_addr: PhysAddr,
        insn_count: u32,
        wait_cycles: u32,
    ) -> Result<RunStatus, DriverError> {
        let driver = self.driver;
        match self.device.as_mut() {
            Some(device) => driver.device_run(device, insn_phys_addr, insn_count, wait_cycles),
            None => unreachable!("device used after close"),
        }
    }
}

impl<D: Driver> Drop for DeviceHandle<'_, D> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            self.driver.device_close(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceHandle, DmaBuffer, HostDriver};
    use crate::{DriverError, HostConfig};

    #[test]
    fn guards_release_on_drop() {
        let driver = HostDriver::new(HostConfig::default());
        {
            let _buffer = DmaBuffer::alloc(&driver, 64, true).unwrap();
            let _device = DeviceHandle::open(&driver).unwrap();
            assert_eq!(driver.live_allocations(), 1);
            assert_eq!(driver.open_devices(), 1);
        }
        assert_eq!(driver.live_allocations(), 0);
        assert_eq!(driver.open_devices(), 0);
    }

    #[test]
    fn guard_checks_ranges_against_the_requested_size() {
        let driver = HostDriver::new(HostConfig::default());
        let mut buffer = DmaBuffer::alloc(&driver, 8, false).unwrap();
        assert_eq!(
            buffer.write(4, &[0; 8]),
            Err(DriverError::OutOfBounds {
                offset: 4,
                len: 8,
                size: 8,
            })
        );
        buffer.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut out = [0u8; 4];
        buffer.read(4, &mut out).unwrap();
        assert_eq!(out, [5, 6, 7, 8]);
    }
}

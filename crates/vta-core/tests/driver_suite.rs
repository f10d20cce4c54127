//! Driver contract suite: resource release on every run outcome, fatal
//! allocation failures and host-driver timeouts.

#![allow(clippy::pedantic, clippy::nursery)]

use std::cell::Cell;

use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;
use vta_core::{
    encode_finish, submit, submit_records, AluOpcode, DepFlags, DmaBuffer, DramOffset, Driver,
    DriverError, HostConfig, HostDriver, MemoryId, Opcode, PhysAddr, RunConfig, RunError,
    RunStatus, StreamBuilder,
};

struct MockBuffer {
    addr: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct CountingDriver {
    capacity: Option<usize>,
    status: Option<RunStatus>,
    allocs: Cell<usize>,
    frees: Cell<usize>,
    opens: Cell<usize>,
    closes: Cell<usize>,
    runs: Cell<usize>,
    last_count: Cell<u32>,
}

impl CountingDriver {
    fn returning(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn balanced(&self) -> bool {
        self.allocs.get() == self.frees.get() && self.opens.get() == self.closes.get()
    }
}

impl Driver for CountingDriver {
    type Buffer = MockBuffer;
    type Device = ();

    fn mem_alloc(&self, size: usize, _cacheable: bool) -> Result<MockBuffer, DriverError> {
        if let Some(capacity) = self.capacity {
            if size > capacity {
                return Err(DriverError::OutOfMemory {
                    requested: size,
                    available: capacity,
                });
            }
        }
        self.allocs.set(self.allocs.get() + 1);
        Ok(MockBuffer {
            addr: 0x4000_0000 + 0x1_0000 * self.allocs.get() as u64,
            data: vec![0; size],
        })
    }

    fn mem_free(&self, _buffer: MockBuffer) {
        self.frees.set(self.frees.get() + 1);
    }

    fn phys_addr(&self, buffer: &MockBuffer) -> PhysAddr {
        PhysAddr::new(buffer.addr)
    }

    fn mem_write(
        &self,
        buffer: &mut MockBuffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DriverError> {
        buffer.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn mem_read(
        &self,
        buffer: &MockBuffer,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        out.copy_from_slice(&buffer.data[offset..offset + out.len()]);
        Ok(())
    }

    fn device_open(&self) -> Result<(), DriverError> {
        self.opens.set(self.opens.get() + 1);
        Ok(())
    }

    fn device_run(
        &self,
        _device: &mut (),
        _insn_phys_addr: PhysAddr,
        insn_count: u32,
        _wait_cycles: u32,
    ) -> Result<RunStatus, DriverError> {
        self.runs.set(self.runs.get() + 1);
        self.last_count.set(insn_count);
        self.status
            .ok_or_else(|| DriverError::DeviceUnavailable("bus error".to_string()))
    }

    fn device_close(&self, _device: ()) {
        self.closes.set(self.closes.get() + 1);
    }
}

fn canonical(acc: PhysAddr, uop: PhysAddr, out: PhysAddr, vec_size: u32) -> StreamBuilder {
    let mut builder = StreamBuilder::new();
    builder
        .load_store(
            Opcode::Load,
            MemoryId::Acc,
            0,
            acc.to_dram_offset(MemoryId::Acc).unwrap(),
            vec_size,
            DepFlags::NONE,
        )
        .load_store(
            Opcode::Load,
            MemoryId::Uop,
            0,
            uop.to_dram_offset(MemoryId::Uop).unwrap(),
            1,
            DepFlags::NONE,
        )
        .alu(
            AluOpcode::Shr,
            vec_size,
            true,
            0,
            true,
            DepFlags::NONE.with_push_next(),
        )
        .load_store(
            Opcode::Store,
            MemoryId::Out,
            0,
            out.to_dram_offset(MemoryId::Out).unwrap(),
            vec_size,
            DepFlags::NONE.with_pop_prev().with_push_prev(),
        )
        .load_store(
            Opcode::Load,
            MemoryId::Inp,
            0,
            DramOffset::from_elements(MemoryId::Inp, 0),
            0,
            DepFlags::NONE.with_push_next(),
        )
        .load_store(
            Opcode::Load,
            MemoryId::Uop,
            0,
            DramOffset::from_elements(MemoryId::Uop, 0),
            0,
            DepFlags::NONE.with_pop_prev().with_pop_next(),
        )
        .finish(false, false);
    builder
}

#[rstest]
#[case::completed(RunStatus::Completed)]
#[case::timed_out(RunStatus::TimedOut)]
fn every_outcome_releases_exactly_once(#[case] status: RunStatus) {
    let driver = CountingDriver::returning(status);
    let report = {
        let acc = DmaBuffer::alloc(&driver, 16 * 64, true).unwrap();
        let uop = DmaBuffer::alloc(&driver, 16 * 4, true).unwrap();
        let out = DmaBuffer::alloc(&driver, 16 * 16, true).unwrap();
        let stream = canonical(acc.phys_addr(), uop.phys_addr(), out.phys_addr(), 16)
            .build()
            .unwrap();
        submit(&driver, &stream, &RunConfig::default()).unwrap()
    };
    assert_eq!(report.status, status);
    assert_eq!(report.instruction_count, 7);
    assert_eq!(driver.last_count.get(), 7);
    assert_eq!(driver.allocs.get(), 4);
    assert!(driver.balanced());
    assert_eq!(driver.opens.get(), 1);
}

#[test]
fn device_failure_still_releases_everything() {
    let driver = CountingDriver::default();
    let records = [encode_finish(false, false)];
    let error = submit_records(&driver, &records, &RunConfig::default()).unwrap_err();
    assert!(matches!(
        error,
        RunError::Driver(DriverError::DeviceUnavailable(_))
    ));
    assert_eq!(driver.runs.get(), 1);
    assert!(driver.balanced());
}

#[test]
fn allocation_failure_is_fatal_before_the_device_is_touched() {
    let driver = CountingDriver {
        capacity: Some(8),
        status: Some(RunStatus::Completed),
        ..CountingDriver::default()
    };
    let records = [encode_finish(false, false)];
    let error = submit_records(&driver, &records, &RunConfig::default()).unwrap_err();
    assert_eq!(
        error,
        RunError::Driver(DriverError::OutOfMemory {
            requested: 16,
            available: 8,
        })
    );
    assert_eq!(driver.opens.get(), 0);
    assert_eq!(driver.runs.get(), 0);
}

#[test]
fn host_driver_completes_the_canonical_program() {
    let driver = HostDriver::new(HostConfig::default());
    {
        let acc = DmaBuffer::alloc(&driver, 16 * 64, true).unwrap();
        let uop = DmaBuffer::alloc(&driver, 16 * 4, true).unwrap();
        let out = DmaBuffer::alloc(&driver, 16 * 16, true).unwrap();
        let stream = canonical(acc.phys_addr(), uop.phys_addr(), out.phys_addr(), 16)
            .build()
            .unwrap();
        let report = submit(&driver, &stream, &RunConfig::default()).unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(driver.live_allocations(), 3);
    }
    assert_eq!(driver.live_allocations(), 0);
    assert_eq!(driver.open_devices(), 0);
}

#[test]
fn never_terminating_program_times_out_and_frees_every_buffer() {
    let driver = HostDriver::new(HostConfig::default());
    {
        let _acc = DmaBuffer::alloc(&driver, 1024, true).unwrap();
        let records = [encode_finish(false, true)];
        let config = RunConfig {
            wait_cycles: 8,
            ..RunConfig::default()
        };
        let report = submit_records(&driver, &records, &config).unwrap();
        assert!(report.timed_out());
        assert_eq!(report.wait_cycles, 8);
        assert_eq!(
            report.into_result(),
            Err(RunError::DeviceTimeout { wait_cycles: 8 })
        );
    }
    assert_eq!(driver.live_allocations(), 0);
    assert_eq!(driver.open_devices(), 0);
}

proptest! {
    #[test]
    fn property_tiny_budgets_time_out_and_release(wait_cycles in 0u32..6) {
        let driver = HostDriver::new(HostConfig::default());
        let stream = canonical(
            PhysAddr::new(0x1000_0000),
            PhysAddr::new(0x1000_1000),
            PhysAddr::new(0x1000_2000),
            16,
        )
        .build()
        .unwrap();
        prop_assert!(stream.schedule_cycles() > u64::from(wait_cycles));
        let config = RunConfig { wait_cycles, ..RunConfig::default() };
        let report = submit(&driver, &stream, &config).unwrap();
        prop_assert_eq!(report.status, RunStatus::TimedOut);
        prop_assert_eq!(driver.live_allocations(), 0);
        prop_assert_eq!(driver.open_devices(), 0);
    }
}

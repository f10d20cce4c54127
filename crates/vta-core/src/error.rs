use thiserror::Error;

use crate::encoding::{MemoryId, Opcode};
use crate::memory::PhysAddr;
use crate::queue::{Channel, Unit};

/// Failure to pack semantic parameters into a 128-bit record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Opcode value is unassigned or not valid for the requested layout.
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
    /// Memory-type value is unassigned.
    #[error("invalid memory region {0:#x}")]
    InvalidRegion(u8),
    /// A value does not fit its wire field.
    #[error("field `{field}` value {value:#x} exceeds {width} bits")]
    FieldOverflow {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: u64,
        /// Field width in bits.
        width: u32,
    },
    /// Physical address is not a whole number of region elements.
    #[error("physical address {addr} is not aligned to the {unit}-byte {region:?} element")]
    Misaligned {
        /// Region whose element size was applied.
        region: MemoryId,
        /// Offending address.
        addr: PhysAddr,
        /// Element size in bytes.
        unit: u64,
    },
    /// DRAM offset was computed in units of a different region.
    #[error("dram offset in {offset:?} elements used for a {region:?} transfer")]
    RegionMismatch {
        /// Region of the transfer.
        region: MemoryId,
        /// Region the offset was computed for.
        offset: MemoryId,
    },
}

/// Failure to interpret a raw 128-bit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opcode field holds an unassigned value.
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
    /// Memory-type field holds an unassigned value.
    #[error("invalid memory region {0:#x}")]
    InvalidRegion(u8),
    /// Bits outside every field of the layout are set.
    #[error("reserved bits set: {0:#034x}")]
    ReservedBits(u128),
    /// FINISH record carries push flags or a loop payload.
    #[error("finish record carries push dependencies or payload")]
    MalformedFinish,
    /// Byte slice is not exactly one record long.
    #[error("record must be 16 bytes, got {0}")]
    Truncated(usize),
}

/// Failure to assemble a submittable stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// An instruction failed to encode.
    #[error("instruction {index}: {source}")]
    Encode {
        /// Program-order index.
        index: usize,
        /// Underlying encoding failure.
        source: EncodeError,
    },
    /// No functional-unit queue accepts this opcode / region pair.
    #[error("instruction {index} ({opcode:?} {region:?}) has no functional-unit queue")]
    Unroutable {
        /// Program-order index.
        index: usize,
        /// Instruction opcode.
        opcode: Opcode,
        /// Memory region for loads and stores.
        region: Option<MemoryId>,
    },
    /// A dependency flag points at a queue neighbour that does not exist.
    #[error("instruction {index} on the {unit} queue sets `{flag}` with no such neighbour")]
    DanglingDependency {
        /// Program-order index.
        index: usize,
        /// Queue the instruction was routed to.
        unit: Unit,
        /// Offending flag name.
        flag: &'static str,
    },
    /// Push and pop counts differ on a token channel.
    #[error("{channel} channel has {pushes} pushes but {pops} pops")]
    DependencyMismatch {
        /// Unbalanced channel.
        channel: Channel,
        /// Number of pushes in the stream.
        pushes: usize,
        /// Number of pops in the stream.
        pops: usize,
    },
    /// A FINISH appears before the end of the stream.
    #[error("finish at instruction {index} is followed by {trailing} more")]
    MisplacedFinish {
        /// Program-order index of the finish.
        index: usize,
        /// Instructions after it.
        trailing: usize,
    },
    /// The stream does not end with FINISH.
    #[error("stream does not end with a finish instruction")]
    MissingFinish,
    /// The queues can never drain.
    #[error("dependency deadlock: instruction {index} on the {unit} queue can never issue")]
    Deadlock {
        /// Lowest program-order index among the blocked queue heads.
        index: usize,
        /// Queue it is blocked on.
        unit: Unit,
    },
}

/// Failure reported by a device driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Allocation could not be satisfied.
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: usize,
        /// Remaining capacity in bytes.
        available: usize,
    },
    /// Host access outside a buffer.
    #[error("access of {len} bytes at offset {offset} overruns a {size}-byte buffer")]
    OutOfBounds {
        /// Start offset.
        offset: usize,
        /// Access length.
        len: usize,
        /// Buffer size.
        size: usize,
    },
    /// Physical range is not backed by a live allocation.
    #[error("no allocation backs {len} bytes at {addr}")]
    UnmappedAddress {
        /// Start address.
        addr: PhysAddr,
        /// Range length.
        len: usize,
    },
    /// Device fetched a record it cannot decode.
    #[error("device rejected instruction {index}: {source}")]
    InvalidInstruction {
        /// Index within the submitted stream.
        index: usize,
        /// Decode failure.
        source: DecodeError,
    },
    /// Device fetched a stream it cannot dispatch to its queues.
    #[error("device cannot dispatch stream: {0}")]
    Unschedulable(#[source] BuildError),
    /// Device could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Failure of a whole submit-and-wait cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Stream construction failed before submission.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Driver failure, including allocation.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Stream has more records than the device count register holds.
    #[error("stream of {0} instructions exceeds the device instruction count")]
    StreamTooLong(usize),
    /// The device did not finish within its cycle budget.
    #[error("device timed out after {wait_cycles} cycles")]
    DeviceTimeout {
        /// Cycle budget that elapsed.
        wait_cycles: u32,
    },
}

impl RunError {
    /// Returns true when the failure is an allocation failure.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::Driver(DriverError::OutOfMemory { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, DriverError, EncodeError, RunError};
    use crate::{Channel, MemoryId, PhysAddr};

    #[test]
    fn build_error_messages_name_the_offending_instruction() {
        let error = BuildError::Encode {
            index: 3,
            source: EncodeError::InvalidOpcode(7),
        };
        assert_eq!(error.to_string(), "instruction 3: invalid opcode 0x7");

        let mismatch = BuildError::DependencyMismatch {
            channel: Channel::ComputeToStore,
            pushes: 1,
            pops: 0,
        };
        assert_eq!(
            mismatch.to_string(),
            "compute->store channel has 1 pushes but 0 pops"
        );
    }

    #[test]
    fn misaligned_message_reports_address_and_unit() {
        let error = EncodeError::Misaligned {
            region: MemoryId::Acc,
            addr: PhysAddr::new(0x1004),
            unit: 64,
        };
        assert_eq!(
            error.to_string(),
            "physical address 0x00001004 is not aligned to the 64-byte Acc element"
        );
    }

    #[test]
    fn out_of_memory_is_classified_through_run_error() {
        let error = RunError::from(DriverError::OutOfMemory {
            requested: 128,
            available: 0,
        });
        assert!(error.is_out_of_memory());
        assert!(!RunError::DeviceTimeout { wait_cycles: 1 }.is_out_of_memory());
    }
}

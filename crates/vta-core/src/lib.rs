//! Core instruction-stream crate for the VTA tensor accelerator.
//!
//! Builds dependency-checked streams of 128-bit VTA instructions and hands
//! them to a device driver for execution.

/// Opcode, memory-type and ALU-opcode tables plus the 128-bit field layout.
pub mod encoding;
pub use encoding::{
    classify_opcode, AluOpcode, Field, MemoryId, Opcode, ALU_OPCODE_TABLE, INSTRUCTION_BYTES,
    MEMORY_ID_TABLE, OPCODE_TABLE,
};

/// Error taxonomy for encoding, decoding, stream building and device runs.
pub mod error;
pub use error::{BuildError, DecodeError, DriverError, EncodeError, RunError};

/// Physical addresses and on-chip buffer geometry.
pub mod memory;
pub use memory::{
    DramOffset, PhysAddr, RegionGeometry, ACC_ELEM_BYTES, INP_ELEM_BYTES, OUT_ELEM_BYTES,
    REGION_GEOMETRY, UOP_ELEM_BYTES, WGT_ELEM_BYTES,
};

/// Semantic instruction model and raw 128-bit records.
pub mod instruction;
pub use instruction::{
    AluInsn, DepFlags, GemmInsn, Instruction, LoopNest, MemInsn, RawInstruction,
};

/// Instruction encoder.
pub mod encoder;
pub use encoder::{encode, encode_alu, encode_finish, encode_load_store};

/// Instruction decoder with reserved-bit validation.
pub mod decoder;
pub use decoder::{decode, decode_stream};

/// Micro-op records consumed by GEMM and ALU instructions.
pub mod uop;
pub use uop::{Uop, UOP_BYTES};

/// Functional-unit queues, token channels and the routing table.
pub mod queue;
pub use queue::{Channel, Handshake, QueueMap, Route, Unit, DEFAULT_ROUTES};

/// Push/pop pair matching across token channels.
pub mod deps;
pub use deps::{match_dependencies, route_program, DependencyPair, RoutedInstruction};

/// Token-level scheduling of the three functional-unit queues.
pub mod schedule;
pub use schedule::{ScheduleOutcome, TokenScheduler};

/// Dependency-checked instruction stream builder.
pub mod stream;
pub use stream::{InstructionStream, StreamBuilder};

/// Run and host-driver configuration.
pub mod config;
pub use config::{HostConfig, RunConfig, DEFAULT_WAIT_CYCLES};

/// Driver contract, RAII guards and the in-process host driver.
pub mod driver;
pub use driver::{DeviceHandle, DmaBuffer, Driver, HostBuffer, HostDevice, HostDriver, RunStatus};

/// Stream submission with exactly-once resource release.
pub mod runner;
pub use runner::{submit, submit_records, RunReport};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

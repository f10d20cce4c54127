//! The load / ALU / store round trip.
//!
//! Loads an accumulator block and its micro-ops, shifts the accumulators
//! right by an immediate, stores the result to the output buffer, then runs
//! a dependent input load and micro-op reload before FINISH.

use thiserror::Error;
use tracing::{debug, info};
use vta_core::{
    submit, AluOpcode, BuildError, DepFlags, DmaBuffer, DramOffset, Driver, DriverError,
    EncodeError, InstructionStream, MemoryId, Opcode, RunConfig, RunError, RunReport,
    StreamBuilder, Uop,
};

/// Lanes per accumulator / output element.
pub const BLOCK_SIZE: u32 = 16;

/// Default number of accumulator rows processed.
pub const DEFAULT_VEC_SIZE: u32 = 16;

/// Shift amount applied by the ALU.
pub const SHIFT_IMM: i16 = 0;

/// Failure of the test program. All variants are fatal.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Row count outside what the on-chip buffers hold.
    #[error("vector size {vec_size} must be between 1 and {max}")]
    InvalidVectorSize {
        /// Requested rows.
        vec_size: u32,
        /// Largest accepted value.
        max: u32,
    },
    /// Data buffer allocation or host access failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Micro-op or address conversion failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Stream validation failed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Submission failed.
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Everything observed during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramReport {
    /// Submission outcome.
    pub run: RunReport,
    /// Accumulator buffer after the run.
    pub acc: Vec<u32>,
    /// Output buffer after the run.
    pub out: Vec<u8>,
    /// The submitted stream.
    pub stream: InstructionStream,
}

/// Run-once load / ALU / store program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleLoadStore {
    vec_size: u32,
}

impl Default for SimpleLoadStore {
    fn default() -> Self {
        Self {
            vec_size: DEFAULT_VEC_SIZE,
        }
    }
}

impl SimpleLoadStore {
    /// Largest row count: the accumulator depth.
    pub const MAX_VEC_SIZE: u32 = MemoryId::Acc.sram_depth();

    /// Program over `vec_size` rows.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::InvalidVectorSize`] for zero or more rows
    /// than the accumulator holds.
    pub fn new(vec_size: u32) -> Result<Self, ProgramError> {
        if vec_size == 0 || vec_size > Self::MAX_VEC_SIZE {
            return Err(ProgramError::InvalidVectorSize {
                vec_size,
                max: Self::MAX_VEC_SIZE,
            });
        }
        Ok(Self { vec_size })
    }

    /// Rows processed.
    #[must_use]
    pub const fn vec_size(&self) -> u32 {
        self.vec_size
    }

    const fn lanes(&self) -> u32 {
        self.vec_size * BLOCK_SIZE
    }

    /// Builds the seven-instruction stream for buffers at the given offsets.
    ///
    /// The ALU runs compressed over the single micro-op at `uop`. The input
    /// load and the micro-op reload move no data and only carry tokens.
    ///
    /// # Errors
    ///
    /// Propagates [`BuildError`] from stream validation.
    pub fn stream(
        &self,
        acc: DramOffset,
        uop: DramOffset,
        out: DramOffset,
    ) -> Result<InstructionStream, BuildError> {
        let size = self.vec_size;
        let mut builder = StreamBuilder::new();
        builder
            .load_store(Opcode::Load, MemoryId::Acc, 0, acc, size, DepFlags::NONE)
            .load_store(Opcode::Load, MemoryId::Uop, 0, uop, 1, DepFlags::NONE)
            .alu(
                AluOpcode::Shr,
                size,
                true,
                SHIFT_IMM,
                true,
                DepFlags::NONE.with_push_next(),
            )
            .load_store(
                Opcode::Store,
                MemoryId::Out,
                0,
                out,
                size,
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
        builder.build()
    }

    /// Allocates and fills the data buffers, runs the stream and reads the
    /// results back. Buffers are released after the run returns.
    ///
    /// # Errors
    ///
    /// Every [`ProgramError`] is fatal. A device timeout is not an error; it
    /// is reported through [`ProgramReport::run`].
    pub fn run<D: Driver>(
        &self,
        driver: &D,
        config: &RunConfig,
    ) -> Result<ProgramReport, ProgramError> {
        let lanes = self.lanes();
        let acc_init: Vec<u8> = (0..lanes).flat_map(u32::to_le_bytes).collect();
        let rows = u16::try_from(self.vec_size).map_err(|_| ProgramError::InvalidVectorSize {
            vec_size: self.vec_size,
            max: Self::MAX_VEC_SIZE,
        })?;
        let uops: Vec<Uop> = (0..rows).map(|row| Uop::new(row, row, 0)).collect();
        let uop_init = Uop::encode_all(&uops)?;

        let acc = DmaBuffer::from_bytes(driver, &acc_init, config.cacheable)?;
        let uop = DmaBuffer::from_bytes(driver, &uop_init, config.cacheable)?;
        let out = DmaBuffer::from_bytes(driver, &vec![0; lanes as usize], config.cacheable)?;

        let stream = self.stream(
            acc.phys_addr().to_dram_offset(MemoryId::Acc)?,
            uop.phys_addr().to_dram_offset(MemoryId::Uop)?,
            out.phys_addr().to_dram_offset(MemoryId::Out)?,
        )?;
        info!(
            vec_size = self.vec_size,
            instructions = stream.len(),
            "running load/alu/store program"
        );
        let run = submit(driver, &stream, config)?;

        let acc_bytes = acc.to_vec()?;
        let acc_values: Vec<u32> = acc_bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let out_values = out.to_vec()?;
        debug!(acc = ?acc_values, "accumulator after run");
        debug!(out = ?out_values, "output after run");

        Ok(ProgramReport {
            run,
            acc: acc_values,
            out: out_values,
            stream,
        })
    }
}

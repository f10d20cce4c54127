//! Semantic instruction model.
//!
//! These types hold unpacked values. Range checking against the wire field
//! widths happens in the encoder, so a value that does not fit is reported
//! with the field name instead of being silently truncated.

use std::fmt;

use crate::encoding::{AluOpcode, MemoryId, Opcode, INSTRUCTION_BYTES};
use crate::error::DecodeError;
use crate::memory::DramOffset;

/// The four dependency-token bits carried by every instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct DepFlags {
    /// Wait for a token from the previous queue before issuing.
    pub pop_prev: bool,
    /// Wait for a token from the next queue before issuing.
    pub pop_next: bool,
    /// Send a token to the previous queue on completion.
    pub push_prev: bool,
    /// Send a token to the next queue on completion.
    pub push_next: bool,
}

impl DepFlags {
    /// No dependencies.
    pub const NONE: Self = Self::new(false, false, false, false);

    /// Creates a flag set in wire order.
    #[must_use]
    pub const fn new(pop_prev: bool, pop_next: bool, push_prev: bool, push_next: bool) -> Self {
        Self {
            pop_prev,
            pop_next,
            push_prev,
            push_next,
        }
    }

    /// Returns a copy with `pop_prev` set.
    #[must_use]
    pub const fn with_pop_prev(mut self) -> Self {
        self.pop_prev = true;
        self
    }

    /// Returns a copy with `pop_next` set.
    #[must_use]
    pub const fn with_pop_next(mut self) -> Self {
        self.pop_next = true;
        self
    }

    /// Returns a copy with `push_prev` set.
    #[must_use]
    pub const fn with_push_prev(mut self) -> Self {
        self.push_prev = true;
        self
    }

    /// Returns a copy with `push_next` set.
    #[must_use]
    pub const fn with_push_next(mut self) -> Self {
        self.push_next = true;
        self
    }

    /// Returns true when either push bit is set.
    #[must_use]
    pub const fn any_push(self) -> bool {
        self.push_prev || self.push_next
    }
}

impl fmt::Display for DepFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.pop_prev, "pop_prev"),
            (self.pop_next, "pop_next"),
            (self.push_prev, "push_prev"),
            (self.push_next, "push_next"),
        ];
        let mut first = true;
        for (set, name) in names {
            if set {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// LOAD or STORE between DRAM and an on-chip buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemInsn {
    /// [`Opcode::Load`] or [`Opcode::Store`].
    pub opcode: Opcode,
    /// Dependency bits.
    pub deps: DepFlags,
    /// On-chip buffer.
    pub memory_type: MemoryId,
    /// SRAM base, in elements.
    pub sram_base: u32,
    /// DRAM base, in elements of `memory_type`.
    pub dram_base: DramOffset,
    /// Number of rows.
    pub y_size: u32,
    /// Elements per row.
    pub x_size: u32,
    /// DRAM row stride, in elements.
    pub x_stride: u32,
    /// Top padding rows.
    pub y_pad_0: u8,
    /// Bottom padding rows.
    pub y_pad_1: u8,
    /// Left padding columns.
    pub x_pad_0: u8,
    /// Right padding columns.
    pub x_pad_1: u8,
}

impl MemInsn {
    /// One-dimensional unpadded transfer of `size` elements.
    #[must_use]
    pub const fn linear(
        opcode: Opcode,
        memory_type: MemoryId,
        sram_base: u32,
        dram_base: DramOffset,
        size: u32,
        deps: DepFlags,
    ) -> Self {
        Self {
            opcode,
            deps,
            memory_type,
            sram_base,
            dram_base,
            y_size: 1,
            x_size: size,
            x_stride: size,
            y_pad_0: 0,
            y_pad_1: 0,
            x_pad_0: 0,
            x_pad_1: 0,
        }
    }

    /// Total elements moved, excluding padding.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn elements(&self) -> u64 {
        self.y_size as u64 * self.x_size as u64
    }
}

/// Micro-op loop nest shared by GEMM and ALU instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LoopNest {
    /// Reset the destination instead of computing.
    pub reset_reg: bool,
    /// First micro-op index.
    pub uop_bgn: u32,
    /// One past the last micro-op index.
    pub uop_end: u32,
    /// Outer loop trip count.
    pub iter_out: u32,
    /// Inner loop trip count.
    pub iter_in: u32,
    /// Destination index increment per outer iteration.
    pub dst_factor_out: u32,
    /// Destination index increment per inner iteration.
    pub dst_factor_in: u32,
    /// Source index increment per outer iteration.
    pub src_factor_out: u32,
    /// Source index increment per inner iteration.
    pub src_factor_in: u32,
}

/// Matrix multiply over a micro-op range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct GemmInsn {
    /// Dependency bits.
    pub deps: DepFlags,
    /// Micro-op loop nest.
    pub loops: LoopNest,
    /// Weight index increment per outer iteration.
    pub wgt_factor_out: u32,
    /// Weight index increment per inner iteration.
    pub wgt_factor_in: u32,
}

/// Vector ALU operation over a micro-op range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AluInsn {
    /// Dependency bits.
    pub deps: DepFlags,
    /// Micro-op loop nest.
    pub loops: LoopNest,
    /// Operation.
    pub alu_opcode: AluOpcode,
    /// Take the second operand from `imm` instead of the micro-op source.
    pub use_imm: bool,
    /// Immediate operand.
    pub imm: i16,
}

impl AluInsn {
    /// Element-wise operation over `vector_size` accumulator rows.
    ///
    /// Uncompressed form iterates a micro-op per row. Compressed form reuses
    /// micro-op 0 and advances destination and source by one per inner
    /// iteration.
    #[must_use]
    pub const fn vector(
        alu_opcode: AluOpcode,
        vector_size: u32,
        use_imm: bool,
        imm: i16,
        uop_compression: bool,
        deps: DepFlags,
    ) -> Self {
        let loops = if uop_compression {
            LoopNest {
                reset_reg: false,
                uop_bgn: 0,
                uop_end: 1,
                iter_out: 1,
                iter_in: vector_size,
                dst_factor_out: 0,
                dst_factor_in: 1,
                src_factor_out: 0,
                src_factor_in: 1,
            }
        } else {
            LoopNest {
                reset_reg: false,
                uop_bgn: 0,
                uop_end: vector_size,
                iter_out: 1,
                iter_in: 1,
                dst_factor_out: 0,
                dst_factor_in: 0,
                src_factor_out: 0,
                src_factor_in: 0,
            }
        };
        Self {
            deps,
            loops,
            alu_opcode,
            use_imm,
            imm,
        }
    }

    /// Returns true when the loop nest reuses one micro-op across rows.
    #[must_use]
    pub const fn uop_compression(&self) -> bool {
        self.loops.dst_factor_in == 1 && self.loops.src_factor_in == 1
    }

    /// Number of rows the operation covers.
    #[must_use]
    pub const fn vector_size(&self) -> u32 {
        if self.uop_compression() {
            self.loops.iter_in
        } else {
            self.loops.uop_end.saturating_sub(self.loops.uop_bgn)
        }
    }
}

/// One accelerator instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Instruction {
    /// LOAD or STORE.
    Mem(MemInsn),
    /// GEMM.
    Gemm(GemmInsn),
    /// ALU.
    Alu(AluInsn),
    /// End of program. Only pops are allowed.
    Finish {
        /// Wait for the load queue.
        pop_prev: bool,
        /// Wait for the store queue.
        pop_next: bool,
    },
}

impl Instruction {
    /// Shorthand for a FINISH instruction.
    #[must_use]
    pub const fn finish(pop_prev: bool, pop_next: bool) -> Self {
        Self::Finish { pop_prev, pop_next }
    }

    /// Opcode of the instruction.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Mem(mem) => mem.opcode,
            Self::Gemm(_) => Opcode::Gemm,
            Self::Alu(_) => Opcode::Alu,
            Self::Finish { .. } => Opcode::Finish,
        }
    }

    /// Dependency bits of the instruction.
    #[must_use]
    pub const fn deps(&self) -> DepFlags {
        match self {
            Self::Mem(MemInsn { deps, .. })
            | Self::Gemm(GemmInsn { deps, .. })
            | Self::Alu(AluInsn { deps, .. }) => *deps,
            Self::Finish { pop_prev, pop_next } => DepFlags::new(*pop_prev, *pop_next, false, false),
        }
    }

    /// Target buffer for loads and stores.
    #[must_use]
    pub const fn memory_type(&self) -> Option<MemoryId> {
        match self {
            Self::Mem(mem) => Some(mem.memory_type),
            _ => None,
        }
    }

    /// Returns true for the end-of-program marker.
    #[must_use]
    pub const fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(mem) => write!(
                f,
                "{:?} {:?} sram={} dram={} y={} x={} stride={} [{}]",
                mem.opcode,
                mem.memory_type,
                mem.sram_base,
                mem.dram_base.elements(),
                mem.y_size,
                mem.x_size,
                mem.x_stride,
                mem.deps
            ),
            Self::Gemm(gemm) => write!(
                f,
                "Gemm uop={}..{} iter={}x{} [{}]",
                gemm.loops.uop_bgn,
                gemm.loops.uop_end,
                gemm.loops.iter_out,
                gemm.loops.iter_in,
                gemm.deps
            ),
            Self::Alu(alu) => {
                write!(
                    f,
                    "Alu {:?} uop={}..{} iter={}x{}",
                    alu.alu_opcode,
                    alu.loops.uop_bgn,
                    alu.loops.uop_end,
                    alu.loops.iter_out,
                    alu.loops.iter_in
                )?;
                if alu.use_imm {
                    write!(f, " imm={}", alu.imm)?;
                }
                write!(f, " [{}]", alu.deps)
            }
            Self::Finish { .. } => write!(f, "Finish [{}]", self.deps()),
        }
    }
}

/// One encoded 128-bit record in little-endian byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawInstruction([u8; INSTRUCTION_BYTES]);

impl RawInstruction {
    /// Wraps a record given as a 128-bit integer.
    #[must_use]
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits.to_le_bytes())
    }

    /// Returns the record as a 128-bit integer.
    #[must_use]
    pub const fn bits(self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    /// Wraps a record given in wire order.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; INSTRUCTION_BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the record in wire order.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; INSTRUCTION_BYTES] {
        self.0
    }

    /// Borrows the record bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; INSTRUCTION_BYTES] {
        &self.0
    }
}

impl TryFrom<&[u8]> for RawInstruction {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; INSTRUCTION_BYTES]>::try_from(bytes)
            .map(Self)
            .map_err(|_| DecodeError::Truncated(bytes.len()))
    }
}

impl fmt::Display for RawInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.bits())
    }
}

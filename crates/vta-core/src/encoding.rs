use crate::error::EncodeError;

/// Size in bytes of one encoded instruction record.
pub const INSTRUCTION_BYTES: usize = 16;

/// Top-level instruction opcodes (bits 2..0 of every record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Opcode {
    /// DRAM to SRAM transfer.
    Load = 0,
    /// SRAM to DRAM transfer.
    Store = 1,
    /// Matrix multiply over a micro-op range.
    Gemm = 2,
    /// End-of-program marker.
    Finish = 3,
    /// Vector ALU over a micro-op range.
    Alu = 4,
}

impl Opcode {
    /// Converts a 3-bit opcode value into an assigned opcode.
    #[must_use]
    pub const fn from_u3(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Load),
            1 => Some(Self::Store),
            2 => Some(Self::Gemm),
            3 => Some(Self::Finish),
            4 => Some(Self::Alu),
            _ => None,
        }
    }

    /// Returns the wire value of this opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for opcodes that use the memory-instruction layout.
    #[must_use]
    pub const fn is_memory(self) -> bool {
        matches!(self, Self::Load | Self::Store)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EncodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u3(value).ok_or(EncodeError::InvalidOpcode(value))
    }
}

/// On-chip memory a load or store targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum MemoryId {
    /// Micro-op buffer.
    Uop = 0,
    /// Weight buffer.
    Wgt = 1,
    /// Input buffer.
    Inp = 2,
    /// Accumulator / register file.
    Acc = 3,
    /// Output buffer.
    Out = 4,
}

impl MemoryId {
    /// Converts a 3-bit memory-type value into an assigned memory id.
    #[must_use]
    pub const fn from_u3(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Uop),
            1 => Some(Self::Wgt),
            2 => Some(Self::Inp),
            3 => Some(Self::Acc),
            4 => Some(Self::Out),
            _ => None,
        }
    }

    /// Returns the wire value of this memory id.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MemoryId {
    type Error = EncodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u3(value).ok_or(EncodeError::InvalidRegion(value))
    }
}

/// ALU operations selected by the 2-bit `alu_opcode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AluOpcode {
    Min = 0,
    Max = 1,
    Add = 2,
    Shr = 3,
}

impl AluOpcode {
    /// Converts a 2-bit ALU opcode value.
    #[must_use]
    pub const fn from_u2(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Min),
            1 => Some(Self::Max),
            2 => Some(Self::Add),
            3 => Some(Self::Shr),
            _ => None,
        }
    }

    /// Returns the wire value of this ALU opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AluOpcode {
    type Error = EncodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u2(value).ok_or(EncodeError::InvalidOpcode(value))
    }
}

/// Single source-of-truth opcode table.
///
/// Any 3-bit value not present here is illegal by definition.
pub const OPCODE_TABLE: &[(u8, Opcode)] = &[
    (0, Opcode::Load),
    (1, Opcode::Store),
    (2, Opcode::Gemm),
    (3, Opcode::Finish),
    (4, Opcode::Alu),
];

/// Assigned memory-type values.
pub const MEMORY_ID_TABLE: &[(u8, MemoryId)] = &[
    (0, MemoryId::Uop),
    (1, MemoryId::Wgt),
    (2, MemoryId::Inp),
    (3, MemoryId::Acc),
    (4, MemoryId::Out),
];

/// Assigned ALU opcode values.
pub const ALU_OPCODE_TABLE: &[(u8, AluOpcode)] = &[
    (0, AluOpcode::Min),
    (1, AluOpcode::Max),
    (2, AluOpcode::Add),
    (3, AluOpcode::Shr),
];

/// Returns the opcode for a raw 128-bit record, or `None` for unassigned values.
#[must_use]
pub fn classify_opcode(raw: u128) -> Option<Opcode> {
    #[allow(clippy::cast_possible_truncation)]
    let value = layout::OPCODE.get(raw) as u8;
    OPCODE_TABLE
        .iter()
        .find_map(|(entry, opcode)| (*entry == value).then_some(*opcode))
}

/// A contiguous bit field inside a 128-bit instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    /// Field name used in diagnostics.
    pub name: &'static str,
    /// Bit offset of the least significant bit.
    pub offset: u32,
    /// Width in bits (1..=32).
    pub width: u32,
}

impl Field {
    /// Creates a field descriptor.
    #[must_use]
    pub const fn new(name: &'static str, offset: u32, width: u32) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }

    /// Largest value the field can hold.
    #[must_use]
    pub const fn max(self) -> u64 {
        (1u64 << self.width) - 1
    }

    /// Mask of the field's bits in record position.
    #[must_use]
    pub const fn mask(self) -> u128 {
        ((1u128 << self.width) - 1) << self.offset
    }

    /// Extracts the field from a raw record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn get(self, raw: u128) -> u64 {
        ((raw & self.mask()) >> self.offset) as u64
    }

    /// Extracts a single-bit field as a flag.
    #[must_use]
    pub const fn flag(self, raw: u128) -> bool {
        self.get(raw) != 0
    }

    /// Ors `value` into the field position of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FieldOverflow`] when `value` does not fit.
    pub fn put(self, raw: &mut u128, value: u64) -> Result<(), EncodeError> {
        if value > self.max() {
            return Err(EncodeError::FieldOverflow {
                field: self.name,
                value,
                width: self.width,
            });
        }
        *raw |= u128::from(value) << self.offset;
        Ok(())
    }

    /// Ors a flag into a single-bit field.
    pub fn put_flag(self, raw: &mut u128, value: bool) {
        *raw |= u128::from(value) << self.offset;
    }
}

/// Bit positions of every field, per instruction layout.
pub mod layout {
    use super::Field;

    /// Instruction opcode.
    pub const OPCODE: Field = Field::new("opcode", 0, 3);
    /// Wait for a token from the previous queue.
    pub const POP_PREV: Field = Field::new("pop_prev", 3, 1);
    /// Wait for a token from the next queue.
    pub const POP_NEXT: Field = Field::new("pop_next", 4, 1);
    /// Signal the previous queue on completion.
    pub const PUSH_PREV: Field = Field::new("push_prev", 5, 1);
    /// Signal the next queue on completion.
    pub const PUSH_NEXT: Field = Field::new("push_next", 6, 1);

    /// Target on-chip memory.
    pub const MEMORY_TYPE: Field = Field::new("memory_type", 7, 3);
    /// SRAM base, in elements.
    pub const SRAM_BASE: Field = Field::new("sram_base", 10, 16);
    /// DRAM base, in elements.
    pub const DRAM_BASE: Field = Field::new("dram_base", 26, 32);
    /// Number of rows.
    pub const Y_SIZE: Field = Field::new("y_size", 64, 16);
    /// Elements per row.
    pub const X_SIZE: Field = Field::new("x_size", 80, 16);
    /// DRAM row stride, in elements.
    pub const X_STRIDE: Field = Field::new("x_stride", 96, 16);
    /// Top padding rows.
    pub const Y_PAD_0: Field = Field::new("y_pad_0", 112, 4);
    /// Bottom padding rows.
    pub const Y_PAD_1: Field = Field::new("y_pad_1", 116, 4);
    /// Left padding columns.
    pub const X_PAD_0: Field = Field::new("x_pad_0", 120, 4);
    /// Right padding columns.
    pub const X_PAD_1: Field = Field::new("x_pad_1", 124, 4);

    /// Reset the destination accumulator instead of computing.
    pub const RESET_REG: Field = Field::new("reset_reg", 7, 1);
    /// First micro-op index.
    pub const UOP_BGN: Field = Field::new("uop_bgn", 8, 13);
    /// One past the last micro-op index.
    pub const UOP_END: Field = Field::new("uop_end", 21, 14);
    /// Outer loop trip count.
    pub const ITER_OUT: Field = Field::new("iter_out", 35, 14);
    /// Inner loop trip count.
    pub const ITER_IN: Field = Field::new("iter_in", 49, 14);
    /// Destination index increment per outer iteration.
    pub const DST_FACTOR_OUT: Field = Field::new("dst_factor_out", 64, 11);
    /// Destination index increment per inner iteration.
    pub const DST_FACTOR_IN: Field = Field::new("dst_factor_in", 75, 11);
    /// Source index increment per outer iteration.
    pub const SRC_FACTOR_OUT: Field = Field::new("src_factor_out", 86, 11);
    /// Source index increment per inner iteration.
    pub const SRC_FACTOR_IN: Field = Field::new("src_factor_in", 97, 11);
    /// Weight index increment per outer iteration.
    pub const WGT_FACTOR_OUT: Field = Field::new("wgt_factor_out", 108, 10);
    /// Weight index increment per inner iteration.
    pub const WGT_FACTOR_IN: Field = Field::new("wgt_factor_in", 118, 10);

    /// ALU operation.
    pub const ALU_OPCODE: Field = Field::new("alu_opcode", 108, 2);
    /// Use the immediate operand.
    pub const USE_IMM: Field = Field::new("use_imm", 110, 1);
    /// Signed 16-bit immediate.
    pub const IMM: Field = Field::new("imm", 111, 16);

    const HEADER: [Field; 5] = [OPCODE, POP_PREV, POP_NEXT, PUSH_PREV, PUSH_NEXT];
    const LOOP: [Field; 9] = [
        RESET_REG,
        UOP_BGN,
        UOP_END,
        ITER_OUT,
        ITER_IN,
        DST_FACTOR_OUT,
        DST_FACTOR_IN,
        SRC_FACTOR_OUT,
        SRC_FACTOR_IN,
    ];

    /// Every field of a LOAD / STORE record.
    pub const MEMORY_FIELDS: [Field; 15] = [
        OPCODE,
        POP_PREV,
        POP_NEXT,
        PUSH_PREV,
        PUSH_NEXT,
        MEMORY_TYPE,
        SRAM_BASE,
        DRAM_BASE,
        Y_SIZE,
        X_SIZE,
        X_STRIDE,
        Y_PAD_0,
        Y_PAD_1,
        X_PAD_0,
        X_PAD_1,
    ];

    /// Every field of a GEMM / FINISH record.
    pub const GEMM_FIELDS: [Field; 16] = concat_gemm();

    /// Every field of an ALU record.
    pub const ALU_FIELDS: [Field; 17] = concat_alu();

    const fn concat_gemm() -> [Field; 16] {
        let mut out = [OPCODE; 16];
        let mut i = 0;
        while i < HEADER.len() {
            out[i] = HEADER[i];
            i += 1;
        }
        let mut j = 0;
        while j < LOOP.len() {
            out[HEADER.len() + j] = LOOP[j];
            j += 1;
        }
        out[14] = WGT_FACTOR_OUT;
        out[15] = WGT_FACTOR_IN;
        out
    }

    const fn concat_alu() -> [Field; 17] {
        let mut out = [OPCODE; 17];
        let mut i = 0;
        while i < HEADER.len() {
            out[i] = HEADER[i];
            i += 1;
        }
        let mut j = 0;
        while j < LOOP.len() {
            out[HEADER.len() + j] = LOOP[j];
            j += 1;
        }
        out[14] = ALU_OPCODE;
        out[15] = USE_IMM;
        out[16] = IMM;
        out
    }

    /// Union of the masks of `fields`.
    #[must_use]
    pub const fn used_bits(fields: &[Field]) -> u128 {
        let mut mask = 0u128;
        let mut i = 0;
        while i < fields.len() {
            mask |= fields[i].mask();
            i += 1;
        }
        mask
    }

    const _: () = assert_disjoint(&MEMORY_FIELDS);
    const _: () = assert_disjoint(&GEMM_FIELDS);
    const _: () = assert_disjoint(&ALU_FIELDS);

    const fn assert_disjoint(fields: &[Field]) {
        let mut seen = 0u128;
        let mut i = 0;
        while i < fields.len() {
            let field = fields[i];
            assert!(
                field.width > 0 && field.width <= 32,
                "field width must be 1..=32 bits"
            );
            assert!(
                field.offset + field.width <= 128,
                "field must fit in a 128-bit record"
            );
            assert!(seen & field.mask() == 0, "fields must not overlap");
            seen |= field.mask();
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        classify_opcode, layout, AluOpcode, MemoryId, Opcode, ALU_OPCODE_TABLE, MEMORY_ID_TABLE,
        OPCODE_TABLE,
    };
    use crate::EncodeError;

    #[test]
    fn opcode_table_values_are_unique_and_resolve() {
        let values: HashSet<_> = OPCODE_TABLE.iter().map(|(value, _)| *value).collect();
        assert_eq!(values.len(), OPCODE_TABLE.len());
        for (value, opcode) in OPCODE_TABLE {
            assert_eq!(Opcode::from_u3(*value), Some(*opcode));
            assert_eq!(opcode.as_u8(), *value);
        }
    }

    #[test]
    fn unassigned_opcodes_are_rejected() {
        for value in 5u8..=7 {
            assert_eq!(Opcode::from_u3(value), None);
            assert_eq!(
                Opcode::try_from(value),
                Err(EncodeError::InvalidOpcode(value))
            );
        }
    }

    #[test]
    fn memory_ids_match_table_and_reject_unassigned() {
        for (value, id) in MEMORY_ID_TABLE {
            assert_eq!(MemoryId::try_from(*value), Ok(*id));
        }
        assert_eq!(MemoryId::try_from(5), Err(EncodeError::InvalidRegion(5)));
        assert_eq!(MemoryId::try_from(7), Err(EncodeError::InvalidRegion(7)));
    }

    #[test]
    fn alu_opcodes_cover_the_two_bit_field() {
        assert_eq!(ALU_OPCODE_TABLE.len(), 4);
        for (value, op) in ALU_OPCODE_TABLE {
            assert_eq!(AluOpcode::from_u2(*value), Some(*op));
        }
        assert_eq!(AluOpcode::try_from(4), Err(EncodeError::InvalidOpcode(4)));
    }

    #[test]
    fn classify_reads_low_three_bits() {
        assert_eq!(classify_opcode(0), Some(Opcode::Load));
        assert_eq!(classify_opcode(0xFFFF_FFF8 | 4), Some(Opcode::Alu));
        assert_eq!(classify_opcode(6), None);
    }

    #[test]
    fn field_put_rejects_values_wider_than_the_field() {
        let mut raw = 0u128;
        assert!(layout::SRAM_BASE.put(&mut raw, 0xFFFF).is_ok());
        assert_eq!(layout::SRAM_BASE.get(raw), 0xFFFF);

        let mut raw = 0u128;
        assert_eq!(
            layout::SRAM_BASE.put(&mut raw, 0x1_0000),
            Err(EncodeError::FieldOverflow {
                field: "sram_base",
                value: 0x1_0000,
                width: 16,
            })
        );
        assert_eq!(raw, 0);
    }

    #[test]
    fn memory_layout_leaves_only_dram_padding_unused() {
        let used = layout::used_bits(&layout::MEMORY_FIELDS);
        assert_eq!(!used, ((1u128 << 6) - 1) << 58);
    }

    #[test]
    fn alu_and_gemm_layouts_reserve_bit_63() {
        let gemm = layout::used_bits(&layout::GEMM_FIELDS);
        assert_eq!(!gemm, 1u128 << 63);

        let alu = layout::used_bits(&layout::ALU_FIELDS);
        assert_eq!(!alu, (1u128 << 63) | (1u128 << 127));
    }
}

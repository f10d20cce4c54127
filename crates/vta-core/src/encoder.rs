//! Instruction encoding.
//!
//! Packs semantic instructions into 128-bit records. Every value is range
//! checked against its field width; nothing is masked silently.

use crate::encoding::{layout, AluOpcode, MemoryId, Opcode};
use crate::error::EncodeError;
use crate::instruction::{
    AluInsn, DepFlags, GemmInsn, Instruction, LoopNest, MemInsn, RawInstruction,
};
use crate::memory::DramOffset;

/// Encodes one instruction.
///
/// # Errors
///
/// Returns [`EncodeError::InvalidOpcode`] when a memory instruction carries a
/// non-transfer opcode, [`EncodeError::RegionMismatch`] when its DRAM offset
/// was computed for another buffer, and [`EncodeError::FieldOverflow`] when a
/// value does not fit its field.
pub fn encode(insn: &Instruction) -> Result<RawInstruction, EncodeError> {
    let mut raw = 0u128;
    put_header(&mut raw, insn.opcode(), insn.deps());
    match insn {
        Instruction::Mem(mem) => put_mem(&mut raw, mem)?,
        Instruction::Gemm(gemm) => put_gemm(&mut raw, gemm)?,
        Instruction::Alu(alu) => put_alu(&mut raw, alu)?,
        Instruction::Finish { .. } => {}
    }
    Ok(RawInstruction::from_bits(raw))
}

/// Encodes a one-dimensional LOAD or STORE of `size` elements.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_load_store(
    opcode: Opcode,
    region: MemoryId,
    sram_offset: u32,
    dram_offset: DramOffset,
    size: u32,
    deps: DepFlags,
) -> Result<RawInstruction, EncodeError> {
    encode(&Instruction::Mem(MemInsn::linear(
        opcode,
        region,
        sram_offset,
        dram_offset,
        size,
        deps,
    )))
}

/// Encodes an element-wise ALU operation over `vector_size` rows.
///
/// # Errors
///
/// Returns [`EncodeError::FieldOverflow`] when `vector_size` does not fit
/// the loop fields.
pub fn encode_alu(
    alu_opcode: AluOpcode,
    vector_size: u32,
    use_imm: bool,
    imm: i16,
    uop_compression: bool,
    deps: DepFlags,
) -> Result<RawInstruction, EncodeError> {
    encode(&Instruction::Alu(AluInsn::vector(
        alu_opcode,
        vector_size,
        use_imm,
        imm,
        uop_compression,
        deps,
    )))
}

/// Encodes the end-of-program marker. Push bits are always zero.
#[must_use]
pub fn encode_finish(pop_prev: bool, pop_next: bool) -> RawInstruction {
    let mut raw = u128::from(Opcode::Finish.as_u8());
    layout::POP_PREV.put_flag(&mut raw, pop_prev);
    layout::POP_NEXT.put_flag(&mut raw, pop_next);
    RawInstruction::from_bits(raw)
}

fn put_header(raw: &mut u128, opcode: Opcode, deps: DepFlags) {
    *raw |= u128::from(opcode.as_u8());
    layout::POP_PREV.put_flag(raw, deps.pop_prev);
    layout::POP_NEXT.put_flag(raw, deps.pop_next);
    layout::PUSH_PREV.put_flag(raw, deps.push_prev);
    layout::PUSH_NEXT.put_flag(raw, deps.push_next);
}

fn put_mem(raw: &mut u128, mem: &MemInsn) -> Result<(), EncodeError> {
    if !mem.opcode.is_memory() {
        return Err(EncodeError::InvalidOpcode(mem.opcode.as_u8()));
    }
    if mem.dram_base.region() != mem.memory_type {
        return Err(EncodeError::RegionMismatch {
            region: mem.memory_type,
            offset: mem.dram_base.region(),
        });
    }
    layout::MEMORY_TYPE.put(raw, u64::from(mem.memory_type.as_u8()))?;
    layout::SRAM_BASE.put(raw, u64::from(mem.sram_base))?;
    layout::DRAM_BASE.put(raw, mem.dram_base.elements())?;
    layout::Y_SIZE.put(raw, u64::from(mem.y_size))?;
    layout::X_SIZE.put(raw, u64::from(mem.x_size))?;
    layout::X_STRIDE.put(raw, u64::from(mem.x_stride))?;
    layout::Y_PAD_0.put(raw, u64::from(mem.y_pad_0))?;
    layout::Y_PAD_1.put(raw, u64::from(mem.y_pad_1))?;
    layout::X_PAD_0.put(raw, u64::from(mem.x_pad_0))?;
    layout::X_PAD_1.put(raw, u64::from(mem.x_pad_1))
}

fn put_loops(raw: &mut u128, loops: &LoopNest) -> Result<(), EncodeError> {
    layout::RESET_REG.put_flag(raw, loops.reset_reg);
    for (field, value) in [
        (layout::UOP_BGN, loops.uop_bgn),
        (layout::UOP_END, loops.uop_end),
        (layout::ITER_OUT, loops.iter_out),
        (layout::ITER_IN, loops.iter_in),
        (layout::DST_FACTOR_OUT, loops.dst_factor_out),
        (layout::DST_FACTOR_IN, loops.dst_factor_in),
        (layout::SRC_FACTOR_OUT, loops.src_factor_out),
        (layout::SRC_FACTOR_IN, loops.src_factor_in),
    ] {
        field.put(raw, u64::from(value))?;
    }
    Ok(())
}

fn put_gemm(raw: &mut u128, gemm: &GemmInsn) -> Result<(), EncodeError> {
    put_loops(raw, &gemm.loops)?;
    layout::WGT_FACTOR_OUT.put(raw, u64::from(gemm.wgt_factor_out))?;
    layout::WGT_FACTOR_IN.put(raw, u64::from(gemm.wgt_factor_in))
}

fn put_alu(raw: &mut u128, alu: &AluInsn) -> Result<(), EncodeError> {
    put_loops(raw, &alu.loops)?;
    layout::ALU_OPCODE.put(raw, u64::from(alu.alu_opcode.as_u8()))?;
    layout::USE_IMM.put_flag(raw, alu.use_imm);
    layout::IMM.put(raw, u64::from(u16::from_le_bytes(alu.imm.to_le_bytes())))
}

#[cfg(test)]
mod tests {
    use super::{encode, encode_alu, encode_finish, encode_load_store};
    use crate::encoding::layout;
    use crate::{
        AluOpcode, DepFlags, DramOffset, EncodeError, GemmInsn, Instruction, MemoryId, Opcode,
        PhysAddr,
    };

    fn acc_offset(elements: u64) -> DramOffset {
        DramOffset::from_elements(MemoryId::Acc, elements)
    }

    #[test]
    fn load_acc_places_every_field() {
        let raw = encode_load_store(
            Opcode::Load,
            MemoryId::Acc,
            5,
            acc_offset(0x40),
            16,
            DepFlags::NONE.with_push_next(),
        )
        .unwrap()
        .bits();
        assert_eq!(layout::OPCODE.get(raw), 0);
        assert!(layout::PUSH_NEXT.flag(raw));
        assert!(!layout::PUSH_PREV.flag(raw));
        assert_eq!(layout::MEMORY_TYPE.get(raw), 3);
        assert_eq!(layout::SRAM_BASE.get(raw), 5);
        assert_eq!(layout::DRAM_BASE.get(raw), 0x40);
        assert_eq!(layout::Y_SIZE.get(raw), 1);
        assert_eq!(layout::X_SIZE.get(raw), 16);
        assert_eq!(layout::X_STRIDE.get(raw), 16);
    }

    #[test]
    fn store_dram_offset_comes_from_a_physical_address() {
        let out = PhysAddr::new(0x2000).to_dram_offset(MemoryId::Out).unwrap();
        let raw = encode_load_store(Opcode::Store, MemoryId::Out, 0, out, 16, DepFlags::NONE)
            .unwrap()
            .bits();
        assert_eq!(layout::OPCODE.get(raw), 1);
        assert_eq!(layout::DRAM_BASE.get(raw), 0x200);
    }

    #[test]
    fn non_transfer_opcodes_are_rejected_for_memory_layout() {
        assert_eq!(
            encode_load_store(
                Opcode::Alu,
                MemoryId::Acc,
                0,
                acc_offset(0),
                1,
                DepFlags::NONE
            ),
            Err(EncodeError::InvalidOpcode(4))
        );
    }

    #[test]
    fn dram_offset_for_another_region_is_rejected() {
        assert_eq!(
            encode_load_store(
                Opcode::Load,
                MemoryId::Uop,
                0,
                acc_offset(0),
                1,
                DepFlags::NONE
            ),
            Err(EncodeError::RegionMismatch {
                region: MemoryId::Uop,
                offset: MemoryId::Acc,
            })
        );
    }

    #[test]
    fn oversized_transfer_reports_the_field() {
        assert_eq!(
            encode_load_store(
                Opcode::Load,
                MemoryId::Acc,
                0,
                acc_offset(0),
                0x1_0000,
                DepFlags::NONE
            ),
            Err(EncodeError::FieldOverflow {
                field: "x_size",
                value: 0x1_0000,
                width: 16,
            })
        );
    }

    #[test]
    fn alu_shr_immediate_packs_opcode_and_sign() {
        let raw = encode_alu(
            AluOpcode::Shr,
            16,
            true,
            -1,
            false,
            DepFlags::NONE.with_push_next(),
        )
        .unwrap()
        .bits();
        assert_eq!(layout::OPCODE.get(raw), 4);
        assert_eq!(layout::ALU_OPCODE.get(raw), 3);
        assert!(layout::USE_IMM.flag(raw));
        assert_eq!(layout::IMM.get(raw), 0xFFFF);
        assert_eq!(layout::UOP_END.get(raw), 16);
        assert_eq!(layout::ITER_OUT.get(raw), 1);
        assert_eq!(raw >> 127, 0);
    }

    #[test]
    fn finish_carries_only_pop_bits() {
        let raw = encode_finish(true, true).bits();
        assert_eq!(raw, 3 | (1 << 3) | (1 << 4));
        assert_eq!(encode_finish(false, false).bits(), 3);
        assert_eq!(
            encode(&Instruction::finish(true, false)).unwrap(),
            encode_finish(true, false)
        );
    }

    #[test]
    fn gemm_weight_factors_use_the_top_twenty_bits() {
        let gemm = GemmInsn {
            wgt_factor_out: 0x3FF,
            wgt_factor_in: 0x3FF,
            ..GemmInsn::default()
        };
        let raw = encode(&Instruction::Gemm(gemm)).unwrap().bits();
        assert_eq!(raw >> 108, 0xF_FFFF);
        assert_eq!(raw & 0xFF, 2);
    }
}

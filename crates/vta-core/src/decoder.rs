//! Instruction decoding with reserved-bit validation.
//!
//! Decoding is the inverse of [`crate::encode`]: any record produced by the
//! encoder decodes to the instruction it came from.

use crate::encoding::{layout, AluOpcode, Field, MemoryId, Opcode, INSTRUCTION_BYTES};
use crate::error::DecodeError;
use crate::instruction::{
    AluInsn, DepFlags, GemmInsn, Instruction, LoopNest, MemInsn, RawInstruction,
};
use crate::memory::DramOffset;

const FINISH_BITS: u128 =
    layout::OPCODE.mask() | layout::POP_PREV.mask() | layout::POP_NEXT.mask();

/// Decodes one record.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidOpcode`] / [`DecodeError::InvalidRegion`]
/// for unassigned values, [`DecodeError::ReservedBits`] when bits outside the
/// layout are set and [`DecodeError::MalformedFinish`] for a FINISH record
/// with pushes or payload.
pub fn decode(raw: RawInstruction) -> Result<Instruction, DecodeError> {
    let bits = raw.bits();
    let opcode_value = narrow_u8(layout::OPCODE, bits);
    let opcode = Opcode::from_u3(opcode_value).ok_or(DecodeError::InvalidOpcode(opcode_value))?;

    match opcode {
        Opcode::Load | Opcode::Store => {
            check_reserved(bits, &layout::MEMORY_FIELDS)?;
            decode_mem(opcode, bits).map(Instruction::Mem)
        }
        Opcode::Gemm => {
            check_reserved(bits, &layout::GEMM_FIELDS)?;
            Ok(Instruction::Gemm(GemmInsn {
                deps: decode_deps(bits),
                loops: decode_loops(bits),
                wgt_factor_out: narrow(layout::WGT_FACTOR_OUT, bits),
                wgt_factor_in: narrow(layout::WGT_FACTOR_IN, bits),
            }))
        }
        Opcode::Alu => {
            check_reserved(bits, &layout::ALU_FIELDS)?;
            decode_alu(bits).map(Instruction::Alu)
        }
        Opcode::Finish => {
            check_reserved(bits, &layout::GEMM_FIELDS)?;
            if bits & !FINISH_BITS != 0 {
                return Err(DecodeError::MalformedFinish);
            }
            Ok(Instruction::finish(
                layout::POP_PREV.flag(bits),
                layout::POP_NEXT.flag(bits),
            ))
        }
    }
}

/// Decodes a contiguous record array, one result per 16-byte record.
///
/// A trailing partial record yields [`DecodeError::Truncated`].
pub fn decode_stream(bytes: &[u8]) -> impl Iterator<Item = Result<Instruction, DecodeError>> + '_ {
    bytes
        .chunks(INSTRUCTION_BYTES)
        .map(|chunk| RawInstruction::try_from(chunk).and_then(decode))
}

fn check_reserved(bits: u128, fields: &[Field]) -> Result<(), DecodeError> {
    let reserved = bits & !layout::used_bits(fields);
    if reserved == 0 {
        Ok(())
    } else {
        Err(DecodeError::ReservedBits(reserved))
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow(field: Field, bits: u128) -> u32 {
    field.get(bits) as u32
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow_u8(field: Field, bits: u128) -> u8 {
    field.get(bits) as u8
}

const fn decode_deps(bits: u128) -> DepFlags {
    DepFlags::new(
        layout::POP_PREV.flag(bits),
        layout::POP_NEXT.flag(bits),
        layout::PUSH_PREV.flag(bits),
        layout::PUSH_NEXT.flag(bits),
    )
}

const fn decode_loops(bits: u128) -> LoopNest {
    LoopNest {
        reset_reg: layout::RESET_REG.flag(bits),
        uop_bgn: narrow(layout::UOP_BGN, bits),
        uop_end: narrow(layout::UOP_END, bits),
        iter_out: narrow(layout::ITER_OUT, bits),
        iter_in: narrow(layout::ITER_IN, bits),
        dst_factor_out: narrow(layout::DST_FACTOR_OUT, bits),
        dst_factor_in: narrow(layout::DST_FACTOR_IN, bits),
        src_factor_out: narrow(layout::SRC_FACTOR_OUT, bits),
        src_factor_in: narrow(layout::SRC_FACTOR_IN, bits),
    }
}

fn decode_mem(opcode: Opcode, bits: u128) -> Result<MemInsn, DecodeError> {
    let region_value = narrow_u8(layout::MEMORY_TYPE, bits);
    let memory_type =
        MemoryId::from_u3(region_value).ok_or(DecodeError::InvalidRegion(region_value))?;
    Ok(MemInsn {
        opcode,
        deps: decode_deps(bits),
        memory_type,
        sram_base: narrow(layout::SRAM_BASE, bits),
        dram_base: DramOffset::from_elements(memory_type, layout::DRAM_BASE.get(bits)),
        y_size: narrow(layout::Y_SIZE, bits),
        x_size: narrow(layout::X_SIZE, bits),
        x_stride: narrow(layout::X_STRIDE, bits),
        y_pad_0: narrow_u8(layout::Y_PAD_0, bits),
        y_pad_1: narrow_u8(layout::Y_PAD_1, bits),
        x_pad_0: narrow_u8(layout::X_PAD_0, bits),
        x_pad_1: narrow_u8(layout::X_PAD_1, bits),
    })
}

fn decode_alu(bits: u128) -> Result<AluInsn, DecodeError> {
    let op_value = narrow_u8(layout::ALU_OPCODE, bits);
    let alu_opcode = AluOpcode::from_u2(op_value).ok_or(DecodeError::InvalidOpcode(op_value))?;
    #[allow(clippy::cast_possible_truncation)]
    let imm = i16::from_le_bytes((layout::IMM.get(bits) as u16).to_le_bytes());
    Ok(AluInsn {
        deps: decode_deps(bits),
        loops: decode_loops(bits),
        alu_opcode,
        use_imm: layout::USE_IMM.flag(bits),
        imm,
    })
}

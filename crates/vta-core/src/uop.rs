use crate::encoding::Field;
use crate::error::EncodeError;

/// Size in bytes of one encoded micro-op.
pub const UOP_BYTES: usize = 4;

const DST_IDX: Field = Field::new("dst_idx", 0, 11);
const SRC_IDX: Field = Field::new("src_idx", 11, 11);
const WGT_IDX: Field = Field::new("wgt_idx", 22, 10);

/// Micro-op: accumulator, input and weight indices for one loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Uop {
    /// Destination accumulator row.
    pub dst_idx: u16,
    /// Source row (accumulator for ALU, input for GEMM).
    pub src_idx: u16,
    /// Weight row (GEMM only).
    pub wgt_idx: u16,
}

impl Uop {
    /// Creates a micro-op.
    #[must_use]
    pub const fn new(dst_idx: u16, src_idx: u16, wgt_idx: u16) -> Self {
        Self {
            dst_idx,
            src_idx,
            wgt_idx,
        }
    }

    /// Packs the micro-op into its 32-bit form.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FieldOverflow`] when an index exceeds its field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(self) -> Result<u32, EncodeError> {
        let mut raw = 0u128;
        DST_IDX.put(&mut raw, u64::from(self.dst_idx))?;
        SRC_IDX.put(&mut raw, u64::from(self.src_idx))?;
        WGT_IDX.put(&mut raw, u64::from(self.wgt_idx))?;
        Ok(raw as u32)
    }

    /// Unpacks a 32-bit micro-op.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
    pub const fn decode(raw: u32) -> Self {
        let bits = raw as u128;
        Self {
            dst_idx: DST_IDX.get(bits) as u16,
            src_idx: SRC_IDX.get(bits) as u16,
            wgt_idx: WGT_IDX.get(bits) as u16,
        }
    }

    /// Packs a micro-op sequence into its little-endian byte image.
    ///
    /// # Errors
    ///
    /// Returns the first [`EncodeError::FieldOverflow`] encountered.
    pub fn encode_all(uops: &[Self]) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::with_capacity(uops.len() * UOP_BYTES);
        for uop in uops {
            bytes.extend_from_slice(&uop.encode()?.to_le_bytes());
        }
        Ok(bytes)
    }
}

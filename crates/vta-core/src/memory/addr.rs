use std::fmt;

use crate::encoding::MemoryId;
use crate::error::EncodeError;

/// Device-visible physical address of a DMA buffer byte.
///
/// Opaque on purpose: the only way into an instruction is through
/// [`PhysAddr::to_dram_offset`], which applies the region's element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Wraps a raw physical address.
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw address.
    #[must_use]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Address `bytes` past this one, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Converts to a DRAM offset in elements of `region`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Misaligned`] when the address is not a whole
    /// number of elements.
    pub const fn to_dram_offset(self, region: MemoryId) -> Result<DramOffset, EncodeError> {
        let unit = region.element_bytes();
        if self.0 % unit != 0 {
            return Err(EncodeError::Misaligned {
                region,
                addr: self,
                unit,
            });
        }
        Ok(DramOffset {
            region,
            elements: self.0 / unit,
        })
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// DRAM address in elements of one specific on-chip buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DramOffset {
    region: MemoryId,
    elements: u64,
}

impl DramOffset {
    /// Builds an offset directly from an element count.
    #[must_use]
    pub const fn from_elements(region: MemoryId, elements: u64) -> Self {
        Self { region, elements }
    }

    /// Region whose element size the offset is measured in.
    #[must_use]
    pub const fn region(self) -> MemoryId {
        self.region
    }

    /// Offset in elements.
    #[must_use]
    pub const fn elements(self) -> u64 {
        self.elements
    }

    /// Physical byte address of the offset, or `None` on overflow.
    #[must_use]
    pub const fn to_phys(self) -> Option<PhysAddr> {
        match self.elements.checked_mul(self.region.element_bytes()) {
            Some(addr) => Some(PhysAddr(addr)),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DramOffset, PhysAddr};
    use crate::{EncodeError, MemoryId};

    #[test]
    fn aligned_addresses_divide_by_element_size() {
        let addr = PhysAddr::new(0x1_0000);
        let acc = addr.to_dram_offset(MemoryId::Acc).unwrap();
        assert_eq!(acc.elements(), 0x400);
        assert_eq!(acc.region(), MemoryId::Acc);
        assert_eq!(acc.to_phys(), Some(addr));

        let uop = addr.to_dram_offset(MemoryId::Uop).unwrap();
        assert_eq!(uop.elements(), 0x4000);
    }

    #[test]
    fn misaligned_addresses_are_rejected() {
        let addr = PhysAddr::new(0x1010);
        assert!(addr.to_dram_offset(MemoryId::Out).is_ok());
        assert_eq!(
            addr.to_dram_offset(MemoryId::Acc),
            Err(EncodeError::Misaligned {
                region: MemoryId::Acc,
                addr,
                unit: 64,
            })
        );
    }

    #[test]
    fn display_is_zero_padded_hex() {
        assert_eq!(PhysAddr::new(0xABC).to_string(), "0x00000abc");
        assert_eq!(PhysAddr::new(u64::MAX).checked_add(1), None);
        assert_eq!(
            DramOffset::from_elements(MemoryId::Wgt, u64::MAX).to_phys(),
            None
        );
    }
}

//! Element sizes and SRAM depths of the on-chip buffers.
//!
//! Every DRAM address in a load or store is expressed in elements of the
//! target buffer, so these sizes define the alignment of host buffers too.

use crate::encoding::MemoryId;

/// Bytes per micro-op element.
pub const UOP_ELEM_BYTES: u64 = 4;
/// Bytes per weight element (16 x 16 int8 block).
pub const WGT_ELEM_BYTES: u64 = 256;
/// Bytes per input element (1 x 16 int8 vector).
pub const INP_ELEM_BYTES: u64 = 16;
/// Bytes per accumulator element (1 x 16 int32 vector).
pub const ACC_ELEM_BYTES: u64 = 64;
/// Bytes per output element (1 x 16 int8 vector).
pub const OUT_ELEM_BYTES: u64 = 16;

/// Element size and capacity of one on-chip buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegionGeometry {
    /// Buffer identity.
    pub region: MemoryId,
    /// Bytes per element.
    pub element_bytes: u64,
    /// Number of elements the buffer holds.
    pub sram_depth: u32,
}

/// Canonical geometry table, indexed by memory-type value.
pub const REGION_GEOMETRY: [RegionGeometry; 5] = [
    RegionGeometry {
        region: MemoryId::Uop,
        element_bytes: UOP_ELEM_BYTES,
        sram_depth: 8192,
    },
    RegionGeometry {
        region: MemoryId::Wgt,
        element_bytes: WGT_ELEM_BYTES,
        sram_depth: 1024,
    },
    RegionGeometry {
        region: MemoryId::Inp,
        element_bytes: INP_ELEM_BYTES,
        sram_depth: 2048,
    },
    RegionGeometry {
        region: MemoryId::Acc,
        element_bytes: ACC_ELEM_BYTES,
        sram_depth: 2048,
    },
    RegionGeometry {
        region: MemoryId::Out,
        element_bytes: OUT_ELEM_BYTES,
        sram_depth: 2048,
    },
];

const _: () = assert_table_order();

const fn assert_table_order() {
    let mut i = 0;
    while i < REGION_GEOMETRY.len() {
        assert!(
            REGION_GEOMETRY[i].region as usize == i,
            "geometry table must be indexed by memory-type value"
        );
        assert!(
            REGION_GEOMETRY[i].element_bytes.is_power_of_two(),
            "element sizes must be powers of two"
        );
        i += 1;
    }
}

impl MemoryId {
    /// Returns the geometry descriptor for this buffer.
    #[must_use]
    pub const fn geometry(self) -> RegionGeometry {
        REGION_GEOMETRY[self as usize]
    }

    /// Bytes per element of this buffer.
    #[must_use]
    pub const fn element_bytes(self) -> u64 {
        self.geometry().element_bytes
    }

    /// Number of elements this buffer holds.
    #[must_use]
    pub const fn sram_depth(self) -> u32 {
        self.geometry().sram_depth
    }
}

//! Physical addressing and on-chip buffer geometry.

/// Physical addresses and region-typed DRAM offsets.
pub mod addr;
/// Per-region element sizes and SRAM depths.
pub mod region;

pub use addr::{DramOffset, PhysAddr};
pub use region::{
    RegionGeometry, ACC_ELEM_BYTES, INP_ELEM_BYTES, OUT_ELEM_BYTES, REGION_GEOMETRY,
    UOP_ELEM_BYTES, WGT_ELEM_BYTES,
};

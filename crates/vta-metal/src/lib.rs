//! Run-once test program for the VTA tensor accelerator.

/// Command-line parsing for the test binary.
pub mod cli;
/// `tracing` subscriber installation.
pub mod logging;
/// The load / ALU / store program.
pub mod program;

pub use program::{ProgramError, ProgramReport, SimpleLoadStore};

#[cfg(test)]
use tempfile as _;

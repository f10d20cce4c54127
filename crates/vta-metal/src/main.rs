//! CLI entry point for the `vta-metal-test` binary.

use std::env;
use std::fs;
use std::path::Path;

#[cfg(test)]
use tempfile as _;
use thiserror as _;
use tracing::{error, info, warn};
use tracing_subscriber as _;
use vta_core::{HostDriver, InstructionStream};
use vta_metal::cli::{parse_args, CliArgs, ParseResult, USAGE_TEXT};
use vta_metal::{logging, SimpleLoadStore};

fn write_dump(path: &Path, stream: &InstructionStream) -> Result<(), i32> {
    fs::write(path, stream.to_bytes()).map_err(|e| {
        error!(path = %path.display(), "failed to write stream dump: {e}");
        1
    })?;
    info!(path = %path.display(), bytes = stream.byte_len(), "instruction stream written");
    Ok(())
}

fn run_once(args: &CliArgs) -> Result<(), i32> {
    let program = SimpleLoadStore::new(args.vec_size).map_err(|e| {
        error!("{e}");
        1
    })?;
    let driver = HostDriver::default();
    let report = program.run(&driver, &args.run).map_err(|e| {
        error!("{e}");
        1
    })?;

    if let Some(path) = &args.dump {
        write_dump(path, &report.stream)?;
    }

    if report.run.timed_out() {
        warn!(
            wait_cycles = report.run.wait_cycles,
            "vta timed out, results are incomplete"
        );
        println!("timed out after {} cycles", report.run.wait_cycles);
    } else {
        println!(
            "completed {} instructions at {}",
            report.run.instruction_count, report.run.stream_addr
        );
    }
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(args)) => {
            if let Err(e) = logging::init(args.verbose) {
                eprintln!("warning: {e}");
            }
            match run_once(&args) {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}

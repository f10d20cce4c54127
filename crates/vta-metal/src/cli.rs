//! Argument parsing for the `vta-metal-test` binary.

use std::ffi::OsString;
use std::path::PathBuf;

use vta_core::RunConfig;

use crate::program::DEFAULT_VEC_SIZE;

/// Help text printed for `-h` / `--help`.
pub const USAGE_TEXT: &str = "\
Usage: vta-metal-test [options]

Runs the load / ALU / store program once and waits for FINISH.

Options:
  --wait-cycles <n>  Device cycle budget (default: 10000000)
  --vec-size <n>     Accumulator rows to process (default: 16)
  --dump <file>      Write the raw instruction stream to <file>
  -v, --verbose      Log at debug level
  -h, --help         Show this help message

Exit status is 0 when the program ran, even if the device timed out,
and 1 on any setup, build or allocation failure.
";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Submission parameters.
    pub run: RunConfig,
    /// Accumulator rows to process.
    pub vec_size: u32,
    /// Destination for the raw stream.
    pub dump: Option<PathBuf>,
    /// Debug logging.
    pub verbose: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            vec_size: DEFAULT_VEC_SIZE,
            dump: None,
            verbose: false,
        }
    }
}

/// Outcome of parsing.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Run with these arguments.
    Run(CliArgs),
    /// Print help and exit.
    Help,
}

/// Parses arguments, excluding the program name.
///
/// # Errors
///
/// Returns a message for unknown options, missing values and values that
/// are not unsigned integers.
#[allow(clippy::while_let_on_iterator)]
pub fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "--verbose" || arg == "-v" {
            parsed.verbose = true;
            continue;
        }

        if arg == "--wait-cycles" {
            parsed.run.wait_cycles = parse_number(&mut args, "--wait-cycles")?;
            continue;
        }

        if arg == "--vec-size" {
            parsed.vec_size = parse_number(&mut args, "--vec-size")?;
            continue;
        }

        if arg == "--dump" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --dump".to_string())?;
            parsed.dump = Some(PathBuf::from(value));
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(ParseResult::Run(parsed))
}

fn parse_number(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<u32, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}"))?;
    let text = value.to_string_lossy();
    text.replace('_', "")
        .parse()
        .map_err(|_| format!("invalid value for {flag}: {text}"))
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use super::{parse_args, CliArgs, ParseResult};

    fn parse(args: &[&str]) -> Result<ParseResult, String> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn no_arguments_run_with_defaults() {
        assert_eq!(parse(&[]), Ok(ParseResult::Run(CliArgs::default())));
        let CliArgs { run, vec_size, .. } = CliArgs::default();
        assert_eq!(run.wait_cycles, 10_000_000);
        assert_eq!(vec_size, 16);
    }

    #[test]
    fn options_override_defaults() {
        let Ok(ParseResult::Run(args)) = parse(&[
            "--wait-cycles",
            "1_000",
            "--vec-size",
            "8",
            "--dump",
            "stream.bin",
            "-v",
        ]) else {
            panic!("expected run arguments");
        };
        assert_eq!(args.run.wait_cycles, 1000);
        assert_eq!(args.vec_size, 8);
        assert_eq!(args.dump, Some(PathBuf::from("stream.bin")));
        assert!(args.verbose);
    }

    #[test]
    fn help_wins_over_other_options() {
        assert_eq!(parse(&["-v", "--help"]), Ok(ParseResult::Help));
    }

    #[test]
    fn malformed_options_are_reported() {
        assert_eq!(
            parse(&["--wait-cycles"]),
            Err("missing value for --wait-cycles".to_string())
        );
        assert_eq!(
            parse(&["--vec-size", "lots"]),
            Err("invalid value for --vec-size: lots".to_string())
        );
        assert_eq!(
            parse(&["--fast"]),
            Err("unknown option: --fast".to_string())
        );
    }
}

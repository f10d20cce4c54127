//! Process-wide `tracing` subscriber setup.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Directive used when neither `-v` nor `RUST_LOG` select one.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Directive selected by `-v`.
pub const VERBOSE_DIRECTIVE: &str = "debug";

/// Failure to install the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The directive string does not parse.
    #[error("invalid log directive `{directive}`: {reason}")]
    InvalidFilter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Picks the filter directive: `-v` first, then `RUST_LOG`, then `info`.
#[must_use]
pub fn filter_directive(verbose: bool, rust_log: Option<&str>) -> String {
    if verbose {
        return VERBOSE_DIRECTIVE.to_string();
    }
    rust_log
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_string()
}

/// Installs a stderr fmt subscriber filtered per [`filter_directive`].
///
/// # Errors
///
/// Returns [`LoggingError`] when the directive is invalid or a subscriber
/// is already installed.
pub fn init(verbose: bool) -> Result<(), LoggingError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(verbose, rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive).map_err(|err| LoggingError::InvalidFilter {
        directive: directive.clone(),
        reason: err.to_string(),
    })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))
}

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::ledger::ingest::error::{IngestError, Result};

/// Installs the global subscriber. `RUST_LOG` wins when set; otherwise the
/// verbosity count picks the level (0 = warn, 1 = info, 2 = debug, 3+ = trace).
/// Output goes to stderr so that reports written to stdout stay clean.
pub fn init_tracing(verbosity: u8) -> Result<()> {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("ledger_ingest={fallback}")))
        .map_err(|error| IngestError::Logging(error.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|error| IngestError::Logging(error.to_string()))
}

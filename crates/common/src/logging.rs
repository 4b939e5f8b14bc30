//! Logging setup and configuration
//!
//! Log priorities map onto tracing levels as follows:
//!
//! | priority         | level   |
//! |------------------|---------|
//! | DEFAULT, INFO    | `info`  |
//! | VERBOSE          | `trace` |
//! | DEBUG            | `debug` |
//! | WARN             | `warn`  |
//! | ERROR            | `error` |

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

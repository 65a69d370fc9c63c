//! Subscriber setup for binaries and tests.

use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Default filter directive for a `-v` count.
pub fn verbosity_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "objferry=info,warn",
        1 => "objferry=debug,info",
        _ => "objferry=trace,debug",
    }
}

fn build_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity_directive(verbosity)))
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity`.
///
/// `log` records emitted by the storage layers are forwarded into the same
/// subscriber.
pub fn init_logging(verbosity: u8, json: bool) -> Result<(), LoggingError> {
    LogTracer::init()?;

    let filter = build_filter(verbosity);
    if json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

//! Logging setup for the provider process.
//!
//! Logs go to **stderr**: the host owns stdout of a plugin process.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full `tracing` filter (e.g. `selectel_provider=debug,reqwest=warn`)
//! - `TF_LOG`: host log level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`), used
//!   when `RUST_LOG` is not set
//!
//! ```bash
//! TF_LOG=DEBUG terraform apply
//! RUST_LOG=selectel_provider::waiter=debug terraform apply
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Host log level variable consulted when `RUST_LOG` is unset.
pub const HOST_LOG_ENV: &str = "TF_LOG";

/// Initialize the default logging subscriber at `info` level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level.
///
/// `default_level` applies when neither `RUST_LOG` nor `TF_LOG` is set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Useful in tests where several cases may race to install a subscriber.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(build_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

fn build_filter(default_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = std::env::var(HOST_LOG_ENV)
        .ok()
        .and_then(|v| host_level_to_directive(&v))
        .unwrap_or(default_level);

    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Map a host log level to a `tracing` directive.
///
/// `JSON` is the host's structured mode and implies trace output.
fn host_level_to_directive(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "JSON" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" => Some("warn"),
        "ERROR" => Some("error"),
        "OFF" => Some("off"),
        _ => None,
    }
}

//! Logging setup for pvm.
//!
//! Diagnostics go through `tracing` and are written to stderr, leaving stdout
//! for the user-facing command output. The filter comes from `PVM_LOG`
//! (standard `EnvFilter` syntax) and defaults to warnings only, or debug
//! output for this crate when `--verbose` is given. Setting `PVM_LOG_JSON`
//! switches to one JSON object per event.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "PVM_LOG";

/// Environment variable enabling JSON log output.
pub const LOG_JSON_ENV: &str = "PVM_LOG_JSON";

/// Builds the filter used when `PVM_LOG` is unset or invalid.
fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("pvm=debug")
    } else {
        EnvFilter::new("pvm=warn")
    }
}

/// Installs the global tracing subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(verbose));
    let subscriber = tracing_subscriber::registry().with(filter);

    if std::env::var_os(LOG_JSON_ENV).is_some() {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        let _ = subscriber.with(json_layer).try_init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time();

        let _ = subscriber.with(fmt_layer).try_init();
    }
}

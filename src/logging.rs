//! Structured logging setup (spec.md §6's `logging.level`, plus the
//! `--debug` override). The OTLP exporter wiring the teacher carries is
//! dropped with it: this crate only ever runs the console layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global `tracing` subscriber. `level` is the configured
/// `logging.level`; `debug` forces `debug` regardless of what the config
/// file says, matching the CLI's `--debug` flag.
pub fn init_logging(level: &str, debug: bool) {
    let directive = if debug { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

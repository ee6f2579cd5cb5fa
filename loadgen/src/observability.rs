//! Logging setup for the binary.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global tracing subscriber, logging to stderr.
///
/// The verbosity is controlled by `RUST_LOG`, see [`parse_rust_log`].
pub fn init_tracing() {
    let (level, env_filter) = parse_rust_log();
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Reads the log level and filter from `RUST_LOG`.
///
/// A plain level like `debug` is applied on top of the default filter. Anything else is used as
/// the filter verbatim. Without `RUST_LOG`, logs at `INFO` and above.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    let value = env::var(EnvFilter::DEFAULT_ENV).ok();
    parse_filter(value.as_deref())
}

fn parse_filter(value: Option<&str>) -> (Level, EnvFilter) {
    let level = match value {
        Some(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        None => Level::INFO,
    };

    // Maximum verbosity per target, further limited to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        aws_smithy_runtime=WARN,\
        aws_config=WARN,\
        loadgen=TRACE,\
        ",
    );

    (level, env_filter)
}

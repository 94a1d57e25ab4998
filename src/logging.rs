//! Logging Module
//!
//! Structured logging to the console and a daily-rolling file.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "eversense-zero.log";

/// Initialize logging with console and file output.
///
/// `log_dir` must already exist. `RUST_LOG` wins over `verbose` when set.
pub fn init(log_dir: &Path, verbose: bool) {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_appender);

    let console_layer = fmt::layer().with_target(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug,hyper=warn,reqwest=warn")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_selects_debug_and_quiets_http_stack() {
        let verbose = default_filter(true).to_string();
        assert!(verbose.contains("debug"));
        assert!(verbose.contains("reqwest=warn"));

        let quiet = default_filter(false).to_string();
        assert!(quiet.contains("info"));
        assert!(!quiet.contains("debug"));
    }
}

//! Logging setup.
//!
//! Console output always; a daily-rolling file when a log directory is
//! configured. `RUST_LOG` takes precedence over the configured filter.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{DEFAULT_LOG_FILTER, LoggingConfig};

/// Log file name prefix inside the log directory.
pub const LOG_FILE_NAME: &str = "camfleet.log";

/// Timestamps in the local timezone.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
            eprintln!("Invalid log filter {:?} ({}), using default", config.filter, e);
            EnvFilter::new(DEFAULT_LOG_FILTER)
        })
    })
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the lifetime of the program.
pub fn init_logging(config: &LoggingConfig) -> crate::Result<Option<WorkerGuard>> {
    let filter = build_filter(config);

    let (console_text, console_json) = if config.json {
        (None, Some(fmt::layer().json().with_timer(LocalTimer)))
    } else {
        (Some(fmt::layer().with_ansi(true).with_timer(LocalTimer)), None)
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("camfleet=info"));
        assert!(DEFAULT_LOG_FILTER.contains("process_utils=info"));
    }

    #[test]
    fn test_local_timer_format() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        // e.g. 2024-05-01T12:30:45.123+02:00
        assert_eq!(out.len(), 29);
        assert_eq!(&out[10..11], "T");
    }
}

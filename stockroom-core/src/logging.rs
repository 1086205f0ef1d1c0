//! Unified logging system
//!
//! Subscriber setup driven by [`LoggingConfig`], plus operation logging macros

use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Whether to include file and line information
    pub include_location: bool,
    /// Whether to include thread information
    pub include_thread: bool,
    /// Whether to log to file
    pub log_to_file: bool,
    /// Log file path (if log_to_file is true)
    pub log_file_path: Option<String>,
    /// Whether to emit span close events with timings
    pub enable_performance_monitoring: bool,
    /// Custom filter directives
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread: false,
            log_to_file: false,
            log_file_path: None,
            enable_performance_monitoring: false,
            filter_directives: vec![
                "stockroom_core=info".to_string(),
                "stockroom_session=info".to_string(),
            ],
        }
    }
}

/// Initialize the logging system
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Add custom filter directives
    for directive in &config.filter_directives {
        filter = filter.add_directive(directive.parse()?);
    }

    let writer = if config.log_to_file {
        let Some(log_path) = &config.log_file_path else {
            return Err("log_file_path must be specified when log_to_file is true".into());
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        BoxMakeWriter::new(file)
    } else {
        BoxMakeWriter::new(io::stdout)
    };

    let fmt_layer = fmt::layer()
        .with_span_events(if config.enable_performance_monitoring {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread)
        .with_writer(writer);

    let fmt_layer = match config.format {
        LogFormat::Json => fmt_layer.json().boxed(),
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Compact => fmt_layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Timing helpers for CLI-level operations
pub mod performance {
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::Instant;
    use tracing::{info_span, Instrument};

    /// Operations slower than this are reported at warn level
    pub const SLOW_OPERATION: Duration = Duration::from_secs(5);

    /// Run `future` inside a span and report how long it took
    pub async fn measure_async<F, T>(operation_name: &str, future: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let result = future
            .instrument(info_span!("timed", operation = operation_name))
            .await;

        let elapsed = start.elapsed();
        if elapsed >= SLOW_OPERATION {
            tracing::warn!(
                target: "performance",
                operation = operation_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow operation"
            );
        } else {
            tracing::debug!(
                target: "performance",
                operation = operation_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Operation timed"
            );
        }
        result
    }
}

/// `log_operation_start!("simulate", role = %role)`
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr $(, $($field:tt)+)?) => {
        $crate::tracing::info!(operation = $operation, $($($field)+,)? "Starting operation")
    };
}

#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr $(, $($field:tt)+)?) => {
        $crate::tracing::info!(operation = $operation, $($($field)+,)? "Operation finished")
    };
}

/// The error is recorded with its `Display` form
#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr $(, $($field:tt)+)?) => {
        $crate::tracing::error!(
            operation = $operation,
            error = %$error,
            $($($field)+,)?
            "Operation failed"
        )
    };
}

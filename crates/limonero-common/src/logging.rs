//! Logging configuration and initialization
//!
//! Every Limonero binary logs through `tracing`. This module installs the
//! global subscriber once at startup:
//!
//! - console, daily-rotated file, or both
//! - human-readable text or JSON lines
//! - level and per-target directives from the environment
//!
//! Use the structured macros with fields rather than formatting values into
//! the message:
//!
//! ```rust,ignore
//! info!(storage_id = storage.id, chunk = chunk_number, "Chunk stored");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use limonero_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("Gateway starting");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rotated log files (file output only)
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "limonero-server" -> "limonero-server.2025-01-18"
    pub log_file_prefix: String,
    /// Extra directives such as "sqlx=warn,tower_http=debug"
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "limonero".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`,
    /// `LOG_DIR`, `LOG_FILE_PREFIX` and `LOG_FILTER`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(level) = lookup("LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            config.output = output.parse()?;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Some(filter) = lookup("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_file_prefix = prefix.into();
        self
    }

    pub fn with_default_directives(mut self, directives: impl Into<String>) -> Self {
        if self.filter_directives.is_none() {
            self.filter_directives = Some(directives.into());
        }
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter =
            EnvFilter::from_default_env().add_directive(self.level.to_tracing_level().into());

        if let Some(ref directives) = self.filter_directives {
            for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .trim()
                        .parse()
                        .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
                );
            }
        }

        Ok(filter)
    }
}

fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Text => fmt::layer().with_writer(writer).with_ansi(ansi).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once, before any other logging happens.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let console = matches!(config.output, LogOutput::Console | LogOutput::Both)
        .then(|| format_layer(config.format, std::io::stdout, true));

    let file = if matches!(config.output, LogOutput::File | LogOutput::Both) {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender =
            tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        Some(format_layer(config.format, appender, false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = LogConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.filter_directives.is_none());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = LogConfig::from_lookup(lookup(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FORMAT", "json"),
            ("LOG_DIR", "/var/log/limonero"),
            ("LOG_FILE_PREFIX", "gateway"),
            ("LOG_FILTER", "sqlx=warn"),
        ]))
        .unwrap();

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/limonero"));
        assert_eq!(config.log_file_prefix, "gateway");
        assert_eq!(config.filter_directives.as_deref(), Some("sqlx=warn"));
    }

    #[test]
    fn test_invalid_level_is_an_error() {
        assert!(LogConfig::from_lookup(lookup(&[("LOG_LEVEL", "loud")])).is_err());
    }

    #[test]
    fn test_default_directives_do_not_override_environment() {
        let config = LogConfig::from_lookup(lookup(&[("LOG_FILTER", "axum=trace")]))
            .unwrap()
            .with_default_directives("limonero_server=debug");
        assert_eq!(config.filter_directives.as_deref(), Some("axum=trace"));
    }

    #[test]
    fn test_env_filter_rejects_bad_directive() {
        let config = LogConfig {
            filter_directives: Some("sqlx=[[".to_string()),
            ..LogConfig::default()
        };
        assert!(config.env_filter().is_err());
    }
}

//! Structured logging built on `tracing`
//!
//! ## Log Format Options
//!
//! The `LOG_FORMAT` environment variable selects the output:
//!
//! - `json` - Structured JSON for log aggregation (default)
//! - `pretty` - Multi-line, colored output for development
//! - `compact` - Single-line colored output for terminals
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (defaults to INFO)
//! - `LOG_FORMAT`: json, pretty or compact (defaults to json)
//! - `LOG_SPANS`: emit span open/close events (true/false, defaults to false)
//! - `RUST_LOG`: replaces the computed filter entirely
//!
//! ## Examples
//!
//! ```bash
//! # Follow session transitions while debugging a flaky broker
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG sleepasha -c bridge.toml run
//!
//! # Include rumqttc packet traces
//! RUST_LOG=sleepasha=debug,rumqttc=trace sleepasha -c bridge.toml publish
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; anything unknown is JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a log level name; anything unknown is INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Raw `RUST_LOG` value, used verbatim when present
    pub filter_override: Option<String>,
}

impl LogSettings {
    /// Read settings from `LOG_LEVEL`, `LOG_FORMAT`, `LOG_SPANS` and `RUST_LOG`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LogSettings::from_env`] with an injectable lookup (pure function)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            level: lookup("LOG_LEVEL")
                .map(|level| parse_level(&level))
                .unwrap_or(Level::INFO),
            format: lookup("LOG_FORMAT")
                .map(|format| LogFormat::parse(&format))
                .unwrap_or(LogFormat::Json),
            include_spans: lookup("LOG_SPANS")
                .map(|spans| spans.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            filter_override: lookup("RUST_LOG").filter(|filter| !filter.trim().is_empty()),
        }
    }

    /// Filter for these settings, quieting the MQTT client and runtime
    pub fn env_filter(&self) -> EnvFilter {
        if let Some(filter) = &self.filter_override {
            return EnvFilter::new(filter);
        }

        let mut filter = EnvFilter::new(self.level.to_string());
        for directive in ["rumqttc=warn", "rustls=warn", "tokio=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber; returns false if one was already set
pub fn init_logging(settings: &LogSettings) -> bool {
    let subscriber = tracing_subscriber::registry().with(settings.env_filter());

    let result = match settings.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(settings.span_events()))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
    };
    result.is_ok()
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> bool {
    init_logging(&LogSettings::from_env())
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Create a lifecycle event span
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, mqtt_span};

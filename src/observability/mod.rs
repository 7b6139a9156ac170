//! Observability for the alarm bridge
//!
//! Structured logging via `tracing`, configured from the environment.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};

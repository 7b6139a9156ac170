//! Top-level error type for the alarm bridge
//!
//! Each subsystem owns a focused error enum; [`BridgeError`] folds them
//! together for the binary and for callers that drive the whole bridge.

use crate::config::ConfigError;
use crate::publisher::PublisherError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Publisher error: {0}")]
    Publisher(#[from] PublisherError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Strip credentials and sensitive paths from messages before they reach logs
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_sanitization() {
        let message = "Failed to connect with password=secret123 and token: abc123";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let long_message = "x".repeat(1000);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long_message = "ä".repeat(400);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "could not read /home/user/.ssh/id_rsa";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("id_rsa"));
        assert!(sanitized.contains("***REDACTED***"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_message("PASSWORD=abc Secret:def");
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("def"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}

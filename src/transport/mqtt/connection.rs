//! Connection configuration and option mapping for the MQTT session
//!
//! This module holds the immutable [`ConnectionConfig`], the error type shared
//! by every session operation, and the pure mapping from configuration plus a
//! [`ConnectRequest`] onto rumqttc's `MqttOptions`.

use super::reconnect::ReconnectPolicy;
use super::request::{ConnectRequest, WillPublish};
use super::state::SessionState;
use crate::error::sanitize_error_message;
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors surfaced by session operations
///
/// Reasons are carried as sanitized strings so that a single failure can be
/// cloned out to every caller sharing the same connection attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MqttError {
    /// `refused` is set when the broker answered CONNECT with a failure code
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String, refused: bool },
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected - current state: {state}")]
    NotConnected { state: SessionState },
    #[error("Publish rejected: {reason}")]
    PublishRejected { reason: String },
    #[error("Transient network error: {reason}")]
    TransientNetworkError { reason: String },
    #[error("Session stopped")]
    Stopped,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl MqttError {
    pub fn connection_failed(reason: impl AsRef<str>) -> Self {
        MqttError::ConnectionFailed {
            reason: sanitize_error_message(reason.as_ref()),
            refused: false,
        }
    }

    /// The broker answered CONNECT with a failure reason code
    pub fn connection_refused(code: impl fmt::Debug) -> Self {
        MqttError::ConnectionFailed {
            reason: sanitize_error_message(&format!("broker refused connection: {code:?}")),
            refused: true,
        }
    }

    pub fn publish_rejected(reason: impl AsRef<str>) -> Self {
        MqttError::PublishRejected {
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    pub fn transient(reason: impl AsRef<str>) -> Self {
        MqttError::TransientNetworkError {
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    /// Whether retrying the same operation later could succeed
    ///
    /// A broker refusal (bad credentials, banned client, ...) needs a
    /// configuration change first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MqttError::ConnectionFailed { refused: false, .. }
                | MqttError::NotConnected { .. }
                | MqttError::TransientNetworkError { .. }
        )
    }
}

/// Username/password pair; the password never appears in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Client certificate and key, both PEM encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// TLS settings; an empty config uses the platform's root certificates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub ca_file: Option<PathBuf>,
    pub client_auth: Option<ClientAuth>,
}

/// Immutable broker connection settings, fixed for the life of a session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    identifier: Option<String>,
    host: String,
    port: u16,
    tls: Option<TlsConfig>,
    credentials: Option<Credentials>,
    will: Option<WillPublish>,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
}

/// Default wait for CONNACK after the TCP/TLS handshake starts
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

impl ConnectionConfig {
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                identifier: None,
                host: host.into(),
                port,
                tls: None,
                credentials: None,
                will: None,
                reconnect: ReconnectPolicy::default(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            },
        }
    }

    /// Start a builder from `mqtt://host[:port]` or `mqtts://host[:port]`
    pub fn from_broker_url(broker_url: &str) -> Result<ConnectionConfigBuilder, MqttError> {
        let url =
            Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let secure = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

        let mut builder = Self::builder(host, port);
        if secure {
            builder = builder.tls(TlsConfig::default());
        }
        Ok(builder)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn will(&self) -> Option<&WillPublish> {
        self.will.as_ref()
    }

    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Broker address for logs, without credentials
    pub fn broker_address(&self) -> String {
        let scheme = if self.tls.is_some() { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.config.identifier = Some(identifier.into());
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn will(mut self, will: WillPublish) -> Self {
        self.config.will = Some(will);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<ConnectionConfig, MqttError> {
        let config = &self.config;
        if config.host.trim().is_empty() {
            return Err(MqttError::InvalidConfig("host must not be empty".to_string()));
        }
        if config.port == 0 {
            return Err(MqttError::InvalidConfig("port must be greater than 0".to_string()));
        }
        if let Some(identifier) = &config.identifier {
            if identifier.is_empty() {
                return Err(MqttError::InvalidConfig(
                    "client identifier must not be empty when set".to_string(),
                ));
            }
        }
        if config.connect_timeout.is_zero() {
            return Err(MqttError::InvalidConfig(
                "connect timeout must be greater than 0".to_string(),
            ));
        }
        config.reconnect.validate()?;
        Ok(config.clone())
    }
}

/// Map configuration and a connect request onto rumqttc options
///
/// Request-level auth and will take precedence over the connection config.
/// Anything the request leaves unset keeps the rumqttc default.
pub fn configure_mqtt_options(
    config: &ConnectionConfig,
    client_id: &str,
    request: &ConnectRequest,
) -> Result<MqttOptions, MqttError> {
    let mut options = MqttOptions::new(client_id, config.host(), config.port());

    if let Some(tls) = config.tls() {
        options.set_transport(build_tls_transport(tls)?);
    }

    if let Some(auth) = request.simple_auth().or(config.credentials()) {
        options.set_credentials(auth.username(), auth.password());
    }

    if let Some(keep_alive) = request.keep_alive() {
        options.set_keep_alive(Duration::from_secs(u64::from(keep_alive)));
    }

    if let Some(clean_start) = request.clean_start() {
        options.set_clean_start(clean_start);
    }

    // Replaces the whole property block, so it goes before the per-field setters
    if let Some(expiry) = request.session_expiry_interval() {
        let mut properties = options.connect_properties().unwrap_or_default();
        properties.session_expiry_interval = Some(expiry);
        options.set_connect_properties(properties);
    }

    if let Some(will) = request.will().or(config.will()) {
        options.set_last_will(will.to_last_will());
    }

    if let Some(restrictions) = request.restrictions() {
        if let Some(receive_maximum) = restrictions.receive_maximum {
            options.set_receive_maximum(Some(receive_maximum));
        }
        if let Some(send_maximum) = restrictions.send_maximum {
            options.set_outgoing_inflight_upper_limit(send_maximum);
        }
        if let Some(maximum_packet_size) = restrictions.maximum_packet_size {
            options.set_max_packet_size(Some(maximum_packet_size));
        }
        if let Some(topic_alias_maximum) = restrictions.topic_alias_maximum {
            options.set_topic_alias_max(Some(topic_alias_maximum));
        }
        if let Some(problem_info) = restrictions.request_problem_information {
            options.set_request_problem_info(Some(u8::from(problem_info)));
        }
        if let Some(response_info) = restrictions.request_response_information {
            options.set_request_response_info(Some(u8::from(response_info)));
        }
    }

    if !request.user_properties().is_empty() {
        options.set_user_properties(request.user_properties().to_vec());
    }

    Ok(options)
}

fn build_tls_transport(tls: &TlsConfig) -> Result<RumqttcTransport, MqttError> {
    let Some(ca_file) = &tls.ca_file else {
        if tls.client_auth.is_some() {
            return Err(MqttError::InvalidConfig(
                "client certificate requires a CA file".to_string(),
            ));
        }
        return Ok(RumqttcTransport::tls_with_default_config());
    };

    let ca = read_pem(ca_file)?;
    let client_auth = match &tls.client_auth {
        Some(auth) => Some((read_pem(&auth.cert_file)?, read_pem(&auth.key_file)?)),
        None => None,
    };

    Ok(RumqttcTransport::Tls(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, MqttError> {
    std::fs::read(path).map_err(|e| {
        MqttError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
    })
}

/// Topic construction for the alarm feed
pub struct TopicBuilder;

impl TopicBuilder {
    const ROOT: &'static str = "SleepAsAndroid";

    /// Build alarms topic: `SleepAsAndroid/{topic_name}/alarms`
    pub fn build_alarms_topic(topic_name: &str) -> Result<String, MqttError> {
        Self::validate_topic_name(topic_name)?;
        Ok(format!("{}/{topic_name}/alarms", Self::ROOT))
    }

    /// Topic names become a single level, so separators and wildcards are out
    pub fn validate_topic_name(topic_name: &str) -> Result<(), MqttError> {
        if topic_name.trim().is_empty() {
            return Err(MqttError::InvalidRequest(
                "topic name must not be empty".to_string(),
            ));
        }
        if topic_name.contains(['/', '+', '#', '\0']) {
            return Err(MqttError::InvalidRequest(format!(
                "topic name must be a single topic level: {topic_name}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::request::{ConnectRestrictions, PublishRequest};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::builder("localhost", 1883).build().unwrap()
    }

    #[test]
    fn test_builder_rejects_empty_host() {
        let result = ConnectionConfig::builder("  ", 1883).build();
        assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_zero_port() {
        let result = ConnectionConfig::builder("localhost", 0).build();
        assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_empty_identifier() {
        let result = ConnectionConfig::builder("localhost", 1883)
            .identifier("")
            .build();
        assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_inverted_backoff() {
        let result = ConnectionConfig::builder("localhost", 1883)
            .reconnect(ReconnectPolicy::new(
                Duration::from_secs(20),
                Duration::from_secs(10),
            ))
            .build();
        assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_defaults() {
        let config = test_config();
        assert_eq!(config.identifier(), None);
        assert!(config.tls().is_none());
        assert!(config.credentials().is_none());
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.reconnect(), &ReconnectPolicy::default());
    }

    #[test]
    fn test_from_broker_url_plain_and_tls() {
        let plain = ConnectionConfig::from_broker_url("mqtt://broker.local")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(plain.host(), "broker.local");
        assert_eq!(plain.port(), 1883);
        assert!(plain.tls().is_none());

        let secure = ConnectionConfig::from_broker_url("mqtts://broker.local")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(secure.port(), 8883);
        assert!(secure.tls().is_some());
        assert_eq!(secure.broker_address(), "mqtts://broker.local:8883");

        let custom = ConnectionConfig::from_broker_url("mqtt://10.0.0.5:1884")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(custom.port(), 1884);
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://broker.local", "mqtt://"] {
            let result = ConnectionConfig::from_broker_url(url);
            assert!(
                matches!(result, Err(MqttError::InvalidBrokerUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("sleeper", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("sleeper"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_configure_mqtt_options_defaults() {
        let options =
            configure_mqtt_options(&test_config(), "client-1", &ConnectRequest::default()).unwrap();

        assert_eq!(options.client_id(), "client-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert!(options.credentials().is_none());
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_configure_mqtt_options_applies_request() {
        let will = PublishRequest::builder()
            .topic("SleepAsAndroid/home/status")
            .payload("offline")
            .build_will()
            .unwrap();
        let request = ConnectRequest::builder()
            .keep_alive(15)
            .clean_start(false)
            .session_expiry_interval(300)
            .simple_auth("user", "pass")
            .will(will)
            .restrictions(ConnectRestrictions {
                maximum_packet_size: Some(64 * 1024),
                ..Default::default()
            })
            .build()
            .unwrap();

        let options = configure_mqtt_options(&test_config(), "client-1", &request).unwrap();

        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(!options.clean_start());
        assert_eq!(
            options
                .connect_properties()
                .and_then(|p| p.session_expiry_interval),
            Some(300)
        );
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert!(options.last_will().is_some());
        assert_eq!(options.max_packet_size(), Some(64 * 1024));
    }

    #[test]
    fn test_request_auth_overrides_config_credentials() {
        let config = ConnectionConfig::builder("localhost", 1883)
            .credentials(Credentials::new("config-user", "config-pass"))
            .build()
            .unwrap();

        let from_config =
            configure_mqtt_options(&config, "c", &ConnectRequest::default()).unwrap();
        assert_eq!(
            from_config.credentials().map(|(u, _)| u),
            Some("config-user".to_string())
        );

        let request = ConnectRequest::builder()
            .simple_auth("request-user", "request-pass")
            .build()
            .unwrap();
        let from_request = configure_mqtt_options(&config, "c", &request).unwrap();
        assert_eq!(
            from_request.credentials().map(|(u, _)| u),
            Some("request-user".to_string())
        );
    }

    #[test]
    fn test_tls_with_missing_ca_file_fails() {
        let config = ConnectionConfig::builder("localhost", 8883)
            .tls(TlsConfig {
                ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
                client_auth: None,
            })
            .build()
            .unwrap();

        let result = configure_mqtt_options(&config, "c", &ConnectRequest::default());
        assert!(matches!(result, Err(MqttError::InvalidConfig(_))));
    }

    #[test]
    fn test_tls_with_ca_file() {
        let mut ca = NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();
        writeln!(ca, "-----END CERTIFICATE-----").unwrap();

        let config = ConnectionConfig::builder("localhost", 8883)
            .tls(TlsConfig {
                ca_file: Some(ca.path().to_path_buf()),
                client_auth: None,
            })
            .build()
            .unwrap();

        assert!(configure_mqtt_options(&config, "c", &ConnectRequest::default()).is_ok());
    }

    #[test]
    fn test_alarms_topic_construction() {
        assert_eq!(
            TopicBuilder::build_alarms_topic("bedroom").unwrap(),
            "SleepAsAndroid/bedroom/alarms"
        );
    }

    #[test]
    fn test_alarms_topic_rejects_multi_level_names() {
        for name in ["", "  ", "a/b", "+", "#"] {
            assert!(
                TopicBuilder::build_alarms_topic(name).is_err(),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::connection_failed("refused"),
            MqttError::AlreadyConnected,
            MqttError::NotConnected {
                state: SessionState::Disconnected,
            },
            MqttError::publish_rejected("quota exceeded"),
            MqttError::transient("reset by peer"),
            MqttError::Stopped,
            MqttError::InvalidBrokerUrl("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_error_reasons_are_sanitized() {
        let error = MqttError::connection_failed("auth failed password=hunter2");
        assert!(!error.to_string().contains("hunter2"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MqttError::transient("x").is_retryable());
        assert!(MqttError::connection_failed("x").is_retryable());
        assert!(!MqttError::connection_refused("BadUserNamePassword").is_retryable());
        assert!(!MqttError::AlreadyConnected.is_retryable());
        assert!(!MqttError::Stopped.is_retryable());
        assert!(!MqttError::publish_rejected("x").is_retryable());
    }
}

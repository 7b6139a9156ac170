//! Bridge configuration
//!
//! Loaded from a TOML file with an `[mqtt]` and a `[publisher]` section.
//! Secrets never live in the file: `username_env` / `password_env` name the
//! environment variables that hold them, resolved when the connection
//! configuration is built.

use crate::transport::mqtt::{
    ClientAuth, ConnectRequest, ConnectionConfig, Credentials, MqttError, ReconnectPolicy,
    TlsConfig, TopicBuilder,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub publisher: PublisherSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// `mqtt://host[:port]` or `mqtts://host[:port]`
    pub broker_url: String,
    /// Fixed client identifier; a random one is generated when unset
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// PEM CA bundle for `mqtts://`; platform roots when unset
    pub ca_file: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub keep_alive_secs: Option<u16>,
    pub clean_start: Option<bool>,
    pub session_expiry_secs: Option<u32>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_initial_delay() -> u64 {
    2000
}

fn default_reconnect_max_delay() -> u64 {
    10_000
}

/// What to publish and how often
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherSection {
    /// Middle level of `SleepAsAndroid/{topic_name}/alarms`
    pub topic_name: String,
    /// JSON alarm export to read
    pub alarms_file: PathBuf,
    /// Periodic re-publish; alarms are still re-published on every reconnect
    pub publish_interval_secs: Option<u64>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<MqttError> for ConfigError {
    fn from(error: MqttError) -> Self {
        ConfigError::InvalidConfig(error.to_string())
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without the environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        let builder = ConnectionConfig::from_broker_url(&self.mqtt.broker_url)?;
        let secure = builder.build()?.tls().is_some();

        let has_tls_files = self.mqtt.ca_file.is_some()
            || self.mqtt.client_cert_file.is_some()
            || self.mqtt.client_key_file.is_some();
        if has_tls_files && !secure {
            return Err(ConfigError::InvalidConfig(
                "TLS files require an mqtts:// broker URL".to_string(),
            ));
        }
        if self.mqtt.client_cert_file.is_some() != self.mqtt.client_key_file.is_some() {
            return Err(ConfigError::InvalidConfig(
                "client_cert_file and client_key_file must be set together".to_string(),
            ));
        }
        if self.mqtt.password_env.is_some() && self.mqtt.username_env.is_none() {
            return Err(ConfigError::InvalidConfig(
                "password_env requires username_env".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.reconnect_policy().validate()?;

        TopicBuilder::validate_topic_name(&self.publisher.topic_name)?;
        if self.publisher.publish_interval_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "publish_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Resolve credentials; a named variable that is unset is an error
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let Some(username_env) = &self.mqtt.username_env else {
            return Ok(None);
        };
        let username = self
            .get_mqtt_username()
            .ok_or_else(|| ConfigError::EnvVarNotFound(username_env.clone()))?;

        let password = match &self.mqtt.password_env {
            Some(password_env) => self
                .get_mqtt_password()
                .ok_or_else(|| ConfigError::EnvVarNotFound(password_env.clone()))?,
            None => String::new(),
        };

        Ok(Some(Credentials::new(username, password)))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.mqtt.reconnect_initial_delay_ms),
            Duration::from_millis(self.mqtt.reconnect_max_delay_ms),
        )
    }

    pub fn publish_interval(&self) -> Option<Duration> {
        self.publisher.publish_interval_secs.map(Duration::from_secs)
    }

    /// Session configuration, with credentials resolved from the environment
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut builder = ConnectionConfig::from_broker_url(&self.mqtt.broker_url)?
            .reconnect(self.reconnect_policy())
            .connect_timeout(Duration::from_secs(self.mqtt.connect_timeout_secs));

        if let Some(client_id) = &self.mqtt.client_id {
            builder = builder.identifier(client_id);
        }

        if self.mqtt.ca_file.is_some() || self.mqtt.client_cert_file.is_some() {
            let client_auth = match (&self.mqtt.client_cert_file, &self.mqtt.client_key_file) {
                (Some(cert_file), Some(key_file)) => Some(ClientAuth {
                    cert_file: cert_file.clone(),
                    key_file: key_file.clone(),
                }),
                _ => None,
            };
            builder = builder.tls(TlsConfig {
                ca_file: self.mqtt.ca_file.clone(),
                client_auth,
            });
        }

        if let Some(credentials) = self.credentials()? {
            builder = builder.credentials(credentials);
        }

        Ok(builder.build()?)
    }

    /// Connect request carrying the session options from `[mqtt]`
    pub fn connect_request(&self) -> Result<ConnectRequest, ConfigError> {
        let mut builder = ConnectRequest::builder();
        if let Some(keep_alive) = self.mqtt.keep_alive_secs {
            builder = builder.keep_alive(keep_alive);
        }
        if let Some(clean_start) = self.mqtt.clean_start {
            builder = builder.clean_start(clean_start);
        }
        if let Some(expiry) = self.mqtt.session_expiry_secs {
            builder = builder.session_expiry_interval(expiry);
        }
        Ok(builder.build()?)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[publisher]
topic_name = "bedroom"
alarms_file = "alarms.json"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

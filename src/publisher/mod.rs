//! Alarm publishing on top of the MQTT session
//!
//! An [`AlarmSource`] supplies the current alarm list and an
//! [`AlarmPublisher`] turns it into a retained QoS 1 JSON publish.

pub mod alarm;
pub mod alarm_publisher;

pub use alarm::{sort_alarms, AlarmRecord, AlarmSource, JsonFileAlarmSource};
pub use alarm_publisher::AlarmPublisher;

use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Alarm publishing errors
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Alarm source error: {0}")]
    Source(String),
    #[error("Failed to encode alarms: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),
    #[error("Invalid topic name: {0:?}")]
    InvalidTopicName(String),
}

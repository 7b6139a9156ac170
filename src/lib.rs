//! SleepAsHA - Sleep as Android alarms over MQTT
//!
//! Republishes the alarm list from Sleep as Android to an MQTT v5 broker so
//! home-automation systems such as Home Assistant can react to upcoming alarms.
//!
//! # Overview
//!
//! This crate provides:
//! - An MQTT v5 session with a strict connection state machine, coalesced
//!   connects, ordered state observers and exponential-backoff reconnection
//! - Typed publish/connect/disconnect requests with builders
//! - The alarm record model and a publisher for
//!   `SleepAsAndroid/{topic}/alarms`
//!
//! # Quick Start
//!
//! ```rust
//! use sleepasha::publisher::{AlarmPublisher, AlarmRecord};
//!
//! let alarms = vec![AlarmRecord::new(6, 30).with_days(0b0011111)];
//! let request = AlarmPublisher::build_request("SleepAsAndroid/bedroom/alarms", &alarms)?;
//!
//! assert!(request.retain());
//! assert_eq!(request.content_type(), Some("application/json"));
//! # Ok::<(), sleepasha::publisher::PublisherError>(())
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, ConfigError, MqttSection, PublisherSection};
pub use error::{BridgeError, BridgeResult};
pub use publisher::{AlarmPublisher, AlarmRecord, AlarmSource, JsonFileAlarmSource, PublisherError};
pub use transport::mqtt::{MqttError, MqttSession, SessionState, StateTransition};

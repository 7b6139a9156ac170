//! MQTT v5 session management for the alarm bridge
//!
//! This module separates pure decision logic from I/O so that the session
//! state machine can be tested without a broker.
//!
//! # Architecture
//!
//! - [`request`] - Publish/connect/disconnect value objects and their builders
//! - [`connection`] - Connection configuration, errors and rumqttc option mapping
//! - [`state`] - Session states and the pure transition table
//! - [`reconnect`] - Pure backoff policy and reconnection decisions
//! - [`observer`] - Ordered, non-retroactive state-change delivery
//! - [`session`] - The session itself: connect, publish, disconnect, reconnect
//! - [`event_router`] - Pure routing of rumqttc events
//! - [`client`] - Impure rumqttc connector and link
//!
//! # Usage
//!
//! ```rust,no_run
//! use sleepasha::transport::mqtt::{
//!     ConnectionConfig, MqttSession, PublishRequest, QoS, RumqttcConnector,
//! };
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::from_broker_url("mqtt://localhost:1883")?.build()?;
//! let session = MqttSession::new(config, RumqttcConnector::new());
//!
//! session.connect(None).await?;
//! let request = PublishRequest::builder()
//!     .topic("SleepAsAndroid/bedroom/alarms")
//!     .payload("[]")
//!     .qos(QoS::AtLeastOnce)
//!     .retain(true)
//!     .build()?;
//! session.publish(&request).await?;
//! session.disconnect(None).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;
pub mod observer;
pub mod reconnect;
pub mod request;
pub mod session;
pub mod state;

// Re-export public types for convenience
pub use client::{RumqttcConnector, RumqttcLink};
pub use connection::{
    configure_mqtt_options, ClientAuth, ConnectionConfig, ConnectionConfigBuilder, Credentials,
    MqttError, TlsConfig, TopicBuilder, DEFAULT_CONNECT_TIMEOUT,
};
pub use event_router::{EventRoute, EventRouter};
pub use observer::{ObserverHandle, ObserverRegistry, StateTransition};
pub use reconnect::{Backoff, ReconnectPolicy, ReconnectionDecision, RetrySchedule};
pub use request::{
    Acknowledgment, ConnAck, ConnectRequest, ConnectRequestBuilder, ConnectRestrictions,
    DisconnectReason, DisconnectRequest, PayloadFormat, PublishRequest, PublishRequestBuilder,
    PublishResult, QoS, WillPublish,
};
pub use session::MqttSession;
pub use state::{SessionEvent, SessionState, StateMachine};

// Short alias matching the transport-level naming
pub use connection::MqttError as Error;

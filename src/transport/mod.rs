//! Transport layer for the alarm bridge
//!
//! The session never talks to the network directly. It asks a [`Connector`]
//! for a fresh [`Link`] on every connection attempt, which keeps the session
//! state machine testable without a broker.

use crate::transport::mqtt::{
    ConnAck, ConnectRequest, ConnectionConfig, DisconnectRequest, MqttError, PublishRequest,
    PublishResult,
};
use std::sync::Arc;
use tokio::sync::oneshot;

pub mod mqtt;

/// Opens network connections on behalf of a session
///
/// Implementations must resolve only after a successful CONNACK, or fail.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform one physical connection attempt
    async fn connect(
        &self,
        config: &ConnectionConfig,
        client_id: &str,
        request: &ConnectRequest,
    ) -> Result<Established, MqttError>;
}

/// An open, acknowledged broker connection
#[async_trait::async_trait]
pub trait Link: Send + Sync + 'static {
    /// Publish and wait for the acknowledgment the QoS level calls for
    async fn publish(&self, request: &PublishRequest) -> Result<PublishResult, MqttError>;

    /// Close the connection; no loss is reported afterwards
    async fn disconnect(&self, request: &DisconnectRequest) -> Result<(), MqttError>;
}

/// Result of a successful connection attempt
pub struct Established {
    pub conn_ack: ConnAck,
    pub link: Arc<dyn Link>,
    /// Resolves with a reason if the connection drops without a local disconnect
    pub lost: oneshot::Receiver<String>,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("conn_ack", &self.conn_ack)
            .finish_non_exhaustive()
    }
}

/// Connector used by the binary
pub type MqttConnector = mqtt::RumqttcConnector;

//! Mock implementations for testing
//!
//! Provides a scripted [`MockConnector`] and the [`MockLink`]s it hands out,
//! so session behavior can be exercised without an MQTT broker. Timing uses
//! `tokio::time`, which makes the mocks work under a paused test clock.

use crate::publisher::{AlarmRecord, AlarmSource, PublisherError};
use crate::transport::mqtt::{
    Acknowledgment, ConnAck, ConnectRequest, ConnectionConfig, DisconnectRequest, MqttError,
    PublishRequest, PublishResult, QoS,
};
use crate::transport::{Connector, Established, Link};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted result of one connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Succeed with a default CONNACK
    Accept,
    /// Succeed with the given CONNACK
    AcceptWith(ConnAck),
    /// Fail with `ConnectionFailed`
    Reject(String),
    /// Never complete; only cancellation ends the attempt
    Hang,
}

#[derive(Default)]
struct ConnectorState {
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    requests: Mutex<Vec<ConnectRequest>>,
    client_ids: Mutex<Vec<String>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    latency: Mutex<Duration>,
    required_credentials: Mutex<Option<(String, String)>>,
}

/// Mock connector for testing
///
/// Pops one scripted outcome per attempt and accepts once the script is empty.
/// Clones share state, so a test can keep one clone while the session owns another.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every attempt by `latency` before resolving
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.state.latency) = latency;
        self
    }

    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        lock(&self.state.script).push_back(outcome);
    }

    pub fn reject_next(&self, reason: &str) {
        self.push_outcome(ConnectOutcome::Reject(reason.to_string()));
    }

    pub fn reject_times(&self, count: usize, reason: &str) {
        for _ in 0..count {
            self.reject_next(reason);
        }
    }

    /// Refuse attempts whose credentials don't match, like a broker with auth enabled
    pub fn require_credentials(&self, username: &str, password: &str) {
        *lock(&self.state.required_credentials) =
            Some((username.to_string(), password.to_string()));
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Clock reading at the start of each attempt
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.state.attempt_times).clone()
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        lock(&self.state.requests).clone()
    }

    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.state.client_ids).clone()
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        lock(&self.state.links).clone()
    }

    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        lock(&self.state.links).last().cloned()
    }

    fn check_credentials(
        &self,
        config: &ConnectionConfig,
        request: &ConnectRequest,
    ) -> Result<(), MqttError> {
        let Some((username, password)) = lock(&self.state.required_credentials).clone() else {
            return Ok(());
        };

        let presented = request.simple_auth().or(config.credentials());
        match presented {
            Some(auth) if auth.username() == username && auth.password() == password => Ok(()),
            _ => Err(MqttError::connection_refused(
                ConnectReturnCode::BadUserNamePassword,
            )),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        client_id: &str,
        request: &ConnectRequest,
    ) -> Result<Established, MqttError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.attempt_times).push(Instant::now());
        lock(&self.state.requests).push(request.clone());
        lock(&self.state.client_ids).push(client_id.to_string());

        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = lock(&self.state.script)
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        let conn_ack = match outcome {
            ConnectOutcome::Accept => ConnAck {
                session_present: false,
                reason: "Success".to_string(),
                assigned_client_identifier: None,
                server_keep_alive: None,
                reason_string: None,
            },
            ConnectOutcome::AcceptWith(conn_ack) => conn_ack,
            ConnectOutcome::Reject(reason) => return Err(MqttError::connection_failed(reason)),
            ConnectOutcome::Hang => std::future::pending().await,
        };
        self.check_credentials(config, request)?;

        let (link, lost) = MockLink::new();
        lock(&self.state.links).push(Arc::clone(&link));

        Ok(Established {
            conn_ack,
            link,
            lost,
        })
    }
}

/// Mock broker connection
///
/// Records everything published on it. [`MockLink::drop_connection`]
/// simulates the network going away.
pub struct MockLink {
    published: Mutex<Vec<PublishRequest>>,
    disconnects: Mutex<Vec<DisconnectRequest>>,
    lost_tx: Mutex<Option<oneshot::Sender<String>>>,
    reject_reason: Mutex<Option<String>>,
    next_pkid: AtomicU16,
    closed: AtomicBool,
}

impl MockLink {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<String>) {
        let (lost_tx, lost_rx) = oneshot::channel();
        let link = Arc::new(Self {
            published: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            lost_tx: Mutex::new(Some(lost_tx)),
            reject_reason: Mutex::new(None),
            next_pkid: AtomicU16::new(1),
            closed: AtomicBool::new(false),
        });
        (link, lost_rx)
    }

    /// Simulate an unexpected drop; returns false if already closed
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        match lock(&self.lost_tx).take() {
            Some(lost_tx) => lost_tx.send(reason.to_string()).is_ok(),
            None => false,
        }
    }

    /// Make every following publish fail as if the broker refused it
    pub fn reject_publishes(&self, reason: &str) {
        *lock(&self.reject_reason) = Some(reason.to_string());
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        lock(&self.published).clone()
    }

    pub fn disconnects(&self) -> Vec<DisconnectRequest> {
        lock(&self.disconnects).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Link for MockLink {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishResult, MqttError> {
        if self.is_closed() {
            return Err(MqttError::transient("connection closed"));
        }
        if let Some(reason) = lock(&self.reject_reason).clone() {
            return Err(MqttError::publish_rejected(reason));
        }

        lock(&self.published).push(request.clone());

        let qos = request.qos();
        let (packet_id, acknowledgment) = match qos {
            QoS::AtMostOnce => (None, None),
            QoS::AtLeastOnce => (
                Some(self.next_pkid.fetch_add(1, Ordering::SeqCst)),
                Some(Acknowledgment::PubAck {
                    reason: "Success".to_string(),
                }),
            ),
            QoS::ExactlyOnce => (
                Some(self.next_pkid.fetch_add(1, Ordering::SeqCst)),
                Some(Acknowledgment::PubComp {
                    reason: "Success".to_string(),
                }),
            ),
        };

        Ok(PublishResult {
            topic: request.topic().to_string(),
            qos,
            packet_id,
            acknowledgment,
        })
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> Result<(), MqttError> {
        lock(&self.disconnects).push(request.clone());
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender without a value means "closed on purpose"
        lock(&self.lost_tx).take();
        Ok(())
    }
}

/// Alarm source returning a fixed list, or a fixed failure
#[derive(Debug, Clone, Default)]
pub struct MockAlarmSource {
    alarms: Arc<Mutex<Vec<AlarmRecord>>>,
    failure: Arc<Mutex<Option<String>>>,
    fetches: Arc<AtomicUsize>,
}

impl MockAlarmSource {
    pub fn new(alarms: Vec<AlarmRecord>) -> Self {
        Self {
            alarms: Arc::new(Mutex::new(alarms)),
            ..Default::default()
        }
    }

    pub fn with_failure(reason: &str) -> Self {
        Self {
            failure: Arc::new(Mutex::new(Some(reason.to_string()))),
            ..Default::default()
        }
    }

    pub fn set_alarms(&self, alarms: Vec<AlarmRecord>) {
        *lock(&self.alarms) = alarms;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlarmSource for MockAlarmSource {
    async fn fetch_alarms(&self) -> Result<Vec<AlarmRecord>, PublisherError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = lock(&self.failure).clone() {
            return Err(PublisherError::Source(reason));
        }
        Ok(lock(&self.alarms).clone())
    }
}

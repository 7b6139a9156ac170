//! Impure I/O for the MQTT session, backed by rumqttc
//!
//! Every connection attempt builds a fresh `AsyncClient`/`EventLoop` pair.
//! After CONNACK the event loop is driven by a spawned pump task which
//! correlates publish acknowledgments and reports an unexpected drop exactly
//! once. The pump never re-polls after an error, so rumqttc's own implicit
//! reconnection never kicks in; reconnection belongs to the session.

use super::connection::{configure_mqtt_options, ConnectionConfig, MqttError};
use super::event_router::{EventRoute, EventRouter};
use super::request::{
    Acknowledgment, ConnAck, ConnectRequest, DisconnectReason, DisconnectRequest, PublishRequest,
    PublishResult, QoS,
};
use crate::transport::{Connector, Established, Link};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop, StateError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Request channel capacity between `AsyncClient` and `EventLoop`
const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// How long a graceful disconnect may take before the event loop is aborted
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(2);

/// Opens real broker connections with rumqttc
#[derive(Debug, Clone)]
pub struct RumqttcConnector {
    channel_capacity: usize,
}

impl Default for RumqttcConnector {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RumqttcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll until CONNACK, a refusal, or the timeout
    async fn wait_for_conn_ack(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<ConnAck, MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let event = event_loop.poll().await.map_err(connect_error)?;

                match EventRouter::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged(ack) => return Ok(ack),
                    route => trace!(?route, "Event before CONNACK"),
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::connection_failed(
                "ConnAck timeout - no connection confirmation received",
            )),
        }
    }
}

/// rumqttc reports a failure CONNACK as an error, not as an event
fn connect_error(error: ConnectionError) -> MqttError {
    match error {
        ConnectionError::ConnectionRefused(code) => MqttError::connection_refused(code),
        other => MqttError::connection_failed(other.to_string()),
    }
}

#[async_trait]
impl Connector for RumqttcConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        client_id: &str,
        request: &ConnectRequest,
    ) -> Result<Established, MqttError> {
        let mqtt_options = configure_mqtt_options(config, client_id, request)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, self.channel_capacity);

        let conn_ack = Self::wait_for_conn_ack(&mut event_loop, config.connect_timeout()).await?;
        info!(
            broker = %config.broker_address(),
            session_present = conn_ack.session_present,
            "Connected to MQTT broker"
        );

        let pending = Arc::new(StdMutex::new(PendingAcks::default()));
        let closing = Arc::new(AtomicBool::new(false));
        let (lost_tx, lost_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_events(
            event_loop,
            Arc::clone(&pending),
            Arc::clone(&closing),
            lost_tx,
        ));

        Ok(Established {
            conn_ack,
            link: Arc::new(RumqttcLink {
                client,
                pending,
                send_order: Mutex::new(()),
                closing,
                pump: StdMutex::new(Some(pump)),
            }),
            lost: lost_rx,
        })
    }
}

type Completion = oneshot::Sender<Result<PublishResult, MqttError>>;

struct Waiter {
    topic: String,
    qos: QoS,
    completion: Completion,
}

/// Publishes waiting for a packet id, then for their acknowledgment
#[derive(Default)]
struct PendingAcks {
    /// FIFO in the order publishes entered the request channel
    awaiting_id: VecDeque<Waiter>,
    in_flight: HashMap<u16, Waiter>,
    /// Packet ids of `in_flight` in the order they were sent
    sent_order: VecDeque<u16>,
    closed: Option<String>,
}

impl PendingAcks {
    fn sent(&mut self, pkid: u16) {
        let Some(waiter) = self.awaiting_id.pop_front() else {
            debug!(pkid, "Outgoing publish with no local waiter");
            return;
        };

        if waiter.qos.expects_acknowledgment() {
            self.in_flight.insert(pkid, waiter);
            self.sent_order.push_back(pkid);
        } else {
            let _ = waiter.completion.send(Ok(PublishResult {
                topic: waiter.topic,
                qos: waiter.qos,
                packet_id: None,
                acknowledgment: None,
            }));
        }
    }

    fn complete(&mut self, pkid: u16, outcome: Result<Acknowledgment, String>) {
        let Some(waiter) = self.in_flight.remove(&pkid) else {
            debug!(pkid, "Acknowledgment for unknown packet id");
            return;
        };
        self.sent_order.retain(|&sent| sent != pkid);

        let result = outcome
            .map(|ack| PublishResult {
                topic: waiter.topic,
                qos: waiter.qos,
                packet_id: Some(pkid),
                acknowledgment: Some(ack),
            })
            .map_err(MqttError::publish_rejected);
        let _ = waiter.completion.send(result);
    }

    /// Reject the oldest in-flight publish at `qos`
    ///
    /// A failure reason code surfaces as an event loop error without the
    /// packet id; brokers acknowledge in send order, so it belongs to the
    /// oldest outstanding publish.
    fn reject_oldest(&mut self, qos: QoS, reason: String) {
        let oldest = self.sent_order.iter().copied().find(|pkid| {
            self.in_flight
                .get(pkid)
                .is_some_and(|waiter| waiter.qos == qos)
        });
        match oldest {
            Some(pkid) => self.complete(pkid, Err(reason)),
            None => debug!(reason = %reason, "Rejection with no matching publish"),
        }
    }

    fn fail_all(&mut self, reason: &str) {
        self.closed = Some(reason.to_string());
        self.sent_order.clear();
        let waiters = self
            .awaiting_id
            .drain(..)
            .chain(self.in_flight.drain().map(|(_, waiter)| waiter));
        for waiter in waiters {
            let _ = waiter
                .completion
                .send(Err(MqttError::transient(format!(
                    "connection lost before acknowledgment: {reason}"
                ))));
        }
    }
}

fn lock_pending(pending: &StdMutex<PendingAcks>) -> MutexGuard<'_, PendingAcks> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drive the event loop until the connection ends
///
/// rumqttc tears the network down after a PUBACK/PUBREC failure code, so a
/// rejected publish also ends the connection once its waiter is settled.
async fn pump_events(
    mut event_loop: EventLoop,
    pending: Arc<StdMutex<PendingAcks>>,
    closing: Arc<AtomicBool>,
    lost_tx: oneshot::Sender<String>,
) {
    let lost_reason = loop {
        match event_loop.poll().await {
            Ok(event) => match EventRouter::route_mqtt_event(&event) {
                EventRoute::PublishSent { pkid } => {
                    lock_pending(&pending).sent(pkid);
                }
                EventRoute::PublishAcknowledged { pkid, outcome }
                | EventRoute::PublishCompleted { pkid, outcome } => {
                    lock_pending(&pending).complete(pkid, outcome);
                }
                EventRoute::PublishReceived {
                    pkid,
                    rejection: Some(reason),
                } => {
                    lock_pending(&pending).complete(pkid, Err(reason));
                }
                EventRoute::ClosingSent => break None,
                EventRoute::Disconnected(reason) => break Some(reason),
                route => trace!(?route, "MQTT event"),
            },
            Err(ConnectionError::MqttState(StateError::PubAckFail { reason })) => {
                let rejection = format!("PUBACK {reason:?}");
                lock_pending(&pending).reject_oldest(QoS::AtLeastOnce, rejection.clone());
                break Some(format!("broker rejected publish with {rejection}"));
            }
            Err(ConnectionError::MqttState(StateError::PubRecFail { reason })) => {
                let rejection = format!("PUBREC {reason:?}");
                lock_pending(&pending).reject_oldest(QoS::ExactlyOnce, rejection.clone());
                break Some(format!("broker rejected publish with {rejection}"));
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    let expected = closing.load(Ordering::Acquire);
    lock_pending(&pending).fail_all(lost_reason.as_deref().unwrap_or("connection closed"));

    match lost_reason {
        Some(reason) if !expected => {
            warn!(reason = %reason, "MQTT connection lost");
            let _ = lost_tx.send(reason);
        }
        _ => debug!("MQTT event loop stopped"),
    }
}

/// One acknowledged rumqttc connection
pub struct RumqttcLink {
    client: AsyncClient,
    pending: Arc<StdMutex<PendingAcks>>,
    /// Keeps waiter order aligned with request-channel order
    send_order: Mutex<()>,
    closing: Arc<AtomicBool>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl RumqttcLink {
    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl Link for RumqttcLink {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishResult, MqttError> {
        let (completion, result) = oneshot::channel();
        {
            let _order = self.send_order.lock().await;
            {
                let mut pending = lock_pending(&self.pending);
                if let Some(reason) = &pending.closed {
                    return Err(MqttError::transient(format!("connection closed: {reason}")));
                }
                pending.awaiting_id.push_back(Waiter {
                    topic: request.topic().to_string(),
                    qos: request.qos(),
                    completion,
                });
            }

            let sent = self
                .client
                .publish_with_properties(
                    request.topic(),
                    request.qos().to_wire(),
                    request.retain(),
                    request.payload().clone(),
                    request.properties(),
                )
                .await;
            if let Err(e) = sent {
                lock_pending(&self.pending).awaiting_id.pop_back();
                return Err(MqttError::transient(e.to_string()));
            }
        }

        result.await.unwrap_or_else(|_| {
            Err(MqttError::transient(
                "connection closed before acknowledgment",
            ))
        })
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> Result<(), MqttError> {
        self.closing.store(true, Ordering::Release);
        let pump = self.take_pump();

        match request.reason() {
            DisconnectReason::WithWillMessage => {
                // Closing without DISCONNECT makes the broker publish the will
                if let Some(pump) = pump {
                    pump.abort();
                }
                lock_pending(&self.pending).fail_all("connection closed with will message");
                info!("MQTT connection dropped without DISCONNECT; broker will publish the will");
                Ok(())
            }
            DisconnectReason::Normal => {
                let sent = self.client.disconnect().await;

                if let Some(pump) = pump {
                    let abort = pump.abort_handle();
                    match tokio::time::timeout(GRACEFUL_SHUTDOWN, pump).await {
                        Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                        Ok(Err(e)) if !e.is_cancelled() => {
                            warn!("Event loop task ended with error: {}", e);
                        }
                        Err(_) => {
                            warn!("Event loop task didn't shut down gracefully, forcing abort");
                            abort.abort();
                            lock_pending(&self.pending).fail_all("connection closed");
                        }
                        _ => {}
                    }
                }

                info!("MQTT client disconnected");
                sent.map_err(|e| MqttError::transient(e.to_string()))
            }
        }
    }
}

impl Drop for RumqttcLink {
    fn drop(&mut self) {
        // Can't send DISCONNECT from Drop; only make sure the pump stops
        if let Some(pump) = self.take_pump() {
            pump.abort();
        }
    }
}

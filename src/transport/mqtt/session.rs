//! MQTT session lifecycle: connect, publish, disconnect and automatic reconnection
//!
//! [`MqttSession`] is a cheap, clonable handle. All clones share one state
//! machine guarded by a single async mutex. Physical network work (connecting,
//! closing) runs in spawned tasks so that a caller abandoning its await never
//! aborts an operation other callers are waiting on.

use super::connection::{ConnectionConfig, MqttError};
use super::observer::{ObserverHandle, ObserverRegistry, StateTransition};
use super::reconnect::{interruptible_sleep, Backoff, ReconnectionDecision, RetrySchedule};
use super::request::{ConnAck, ConnectRequest, DisconnectRequest, PublishRequest, PublishResult};
use super::state::{SessionEvent, SessionState, StateMachine};
use crate::transport::{Connector, Established, Link};
use chrono::Utc;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Shared outcome of one connection attempt; `None` while in flight
type Outcome = Option<Result<ConnAck, MqttError>>;

type Delivery = Option<oneshot::Receiver<()>>;

struct PendingOutcome {
    id: u64,
    outcome: watch::Receiver<Outcome>,
    /// Only caller-initiated attempts; the reconnect cycle has its own shutdown signal
    cancel: Option<watch::Sender<bool>>,
}

struct ActiveLink {
    link: Arc<dyn Link>,
    generation: u64,
}

struct Core {
    state: SessionState,
    link: Option<ActiveLink>,
    pending: Option<PendingOutcome>,
    reconnect_shutdown: Option<watch::Sender<bool>>,
    last_request: ConnectRequest,
    last_conn_ack: Option<ConnAck>,
    generation: u64,
    next_attempt_id: u64,
}

struct Inner {
    config: ConnectionConfig,
    client_id: String,
    connector: Arc<dyn Connector>,
    observers: ObserverRegistry,
    state_tx: watch::Sender<SessionState>,
    core: Mutex<Core>,
}

/// Handle to one MQTT session
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("client_id", &self.inner.client_id)
            .field("broker", &self.inner.config.broker_address())
            .field("state", &self.current_state())
            .finish()
    }
}

impl MqttSession {
    /// Create a disconnected session; must be called inside a tokio runtime
    pub fn new<C: Connector>(config: ConnectionConfig, connector: C) -> Self {
        let client_id = config
            .identifier()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("sleepasha-{}", Uuid::new_v4().simple()));
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        debug!(
            client_id = %client_id,
            broker = %config.broker_address(),
            "Created MQTT session"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                client_id,
                connector: Arc::new(connector),
                observers: ObserverRegistry::new(),
                state_tx,
                core: Mutex::new(Core {
                    state: SessionState::Disconnected,
                    link: None,
                    pending: None,
                    reconnect_shutdown: None,
                    last_request: ConnectRequest::default(),
                    last_conn_ack: None,
                    generation: 0,
                    next_attempt_id: 0,
                }),
            }),
        }
    }

    /// Connect, or join the connection attempt already in flight
    ///
    /// Concurrent callers share a single physical attempt and all receive its
    /// outcome. A request passed while an attempt is in flight is ignored.
    pub async fn connect(&self, request: Option<ConnectRequest>) -> Result<ConnAck, MqttError> {
        let mut outcome = {
            let mut core = self.inner.core.lock().await;
            let state = core.state;
            match state {
                SessionState::Stopped => return Err(MqttError::Stopped),
                SessionState::Connected => return Err(MqttError::AlreadyConnected),
                SessionState::Disconnected => {
                    core.last_request = request.unwrap_or_default();
                    Inner::begin_attempt(&self.inner, &mut core)
                }
                state => {
                    if request.is_some() {
                        debug!(state = %state, "Joining in-flight connection attempt; new request ignored");
                    }
                    match &core.pending {
                        Some(pending) => pending.outcome.clone(),
                        None => return Err(MqttError::NotConnected { state }),
                    }
                }
            }
        };

        wait_for_outcome(&mut outcome).await
    }

    /// Disconnect; a no-op when already disconnected
    ///
    /// Cancels any in-flight or scheduled reconnection. Callers waiting in
    /// [`MqttSession::connect`] receive a cancellation error.
    pub async fn disconnect(&self, request: Option<DisconnectRequest>) -> Result<(), MqttError> {
        let request = request.unwrap_or_default();
        let mut core = self.inner.core.lock().await;
        let state = core.state;

        match state {
            SessionState::Disconnected | SessionState::Stopped => {
                debug!(state = %state, "Disconnect requested while not connected");
                Ok(())
            }
            SessionState::Connected => {
                let active = core.link.take();
                let delivery = self
                    .inner
                    .commit(&mut core, SessionEvent::DisconnectRequested, None);
                drop(core);

                let result = match active {
                    Some(active) => {
                        let close =
                            tokio::spawn(async move { active.link.disconnect(&request).await });
                        close.await.unwrap_or_else(|e| {
                            Err(MqttError::transient(format!("disconnect task failed: {e}")))
                        })
                    }
                    None => Ok(()),
                };

                deliver(delivery).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Physical disconnect did not complete cleanly");
                }
                result
            }
            _ => {
                if let Some(shutdown) = core.reconnect_shutdown.take() {
                    let _ = shutdown.send(true);
                }
                if let Some(pending) = core.pending.take() {
                    if let Some(cancel) = pending.cancel {
                        let _ = cancel.send(true);
                    }
                }
                let delivery = self
                    .inner
                    .commit(&mut core, SessionEvent::DisconnectRequested, None);
                drop(core);
                deliver(delivery).await;
                Ok(())
            }
        }
    }

    /// Publish on the current connection; fails fast unless connected
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishResult, MqttError> {
        let (link, size_cap) = {
            let core = self.inner.core.lock().await;
            match (&core.link, core.state) {
                (Some(active), state) if StateMachine::can_publish(state) => (
                    Arc::clone(&active.link),
                    core.last_request.send_maximum_packet_size(),
                ),
                (_, state) => return Err(MqttError::NotConnected { state }),
            }
        };

        if let Some(cap) = size_cap {
            let size = request.estimated_packet_size();
            if size > cap as usize {
                return Err(MqttError::publish_rejected(format!(
                    "packet of {size} bytes exceeds send maximum packet size {cap}"
                )));
            }
        }

        let span = crate::mqtt_span!(
            operation = "publish",
            topic = %request.topic(),
            qos = ?request.qos(),
            retain = request.retain()
        );
        link.publish(request).instrument(span).await
    }

    /// Re-establish the connection with the last connect request
    ///
    /// Returns the current CONNACK when already connected.
    pub async fn start(&self) -> Result<ConnAck, MqttError> {
        let request = {
            let core = self.inner.core.lock().await;
            if core.state == SessionState::Connected {
                if let Some(ack) = &core.last_conn_ack {
                    return Ok(ack.clone());
                }
            }
            core.last_request.clone()
        };

        match self.connect(Some(request)).await {
            Err(MqttError::AlreadyConnected) => self
                .last_conn_ack()
                .await
                .ok_or(MqttError::AlreadyConnected),
            other => other,
        }
    }

    /// Connect, retrying retryable failures with the reconnect backoff
    ///
    /// Returns `Ok(false)` when shutdown is signalled (or the session is
    /// stopped) before a connection is made. A broker refusal is returned at
    /// once. Once connected, the session's own reconnect cycle takes over.
    pub async fn connect_with_retry(
        &self,
        request: Option<ConnectRequest>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<bool, MqttError> {
        let mut backoff = Backoff::new(*self.config().reconnect());
        loop {
            match self.connect(request.clone()).await {
                Ok(_) | Err(MqttError::AlreadyConnected) => return Ok(true),
                Err(MqttError::Stopped) => return Ok(false),
                Err(e) if e.is_retryable() => {
                    let shutdown_requested = *shutdown_rx.borrow();
                    let ReconnectionDecision::Proceed(schedule) =
                        backoff.decide(shutdown_requested)
                    else {
                        return Ok(false);
                    };
                    warn!(
                        error = %e,
                        attempt = schedule.attempt,
                        delay_ms = schedule.delay.as_millis() as u64,
                        "Initial connection failed, retrying"
                    );
                    if !interruptible_sleep(shutdown_rx.clone(), schedule.delay).await {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Disconnect and enter the terminal `Stopped` state
    pub async fn stop(&self) -> Result<(), MqttError> {
        let span = crate::lifecycle_span!(event = "session_stop", client_id = %self.inner.client_id);
        async {
            loop {
                let result = self.disconnect(None).await;

                let mut core = self.inner.core.lock().await;
                let state = core.state;
                match state {
                    SessionState::Stopped => return Ok(()),
                    SessionState::Disconnected => {
                        let delivery =
                            self.inner
                                .commit(&mut core, SessionEvent::StopRequested, None);
                        drop(core);
                        deliver(delivery).await;
                        return result;
                    }
                    state => {
                        debug!(state = %state, "Session reconnected during stop; disconnecting again");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Current state without waiting on the session lock
    pub fn current_state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that always holds the latest state
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a callback for transitions committed after this call
    pub fn on_state_change<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.inner.observers.register(callback)
    }

    /// Channel form of [`MqttSession::on_state_change`]
    pub fn subscribe_transitions(
        &self,
    ) -> (ObserverHandle, mpsc::UnboundedReceiver<StateTransition>) {
        self.inner.observers.subscribe()
    }

    /// CONNACK of the most recent successful connection
    pub async fn last_conn_ack(&self) -> Option<ConnAck> {
        self.inner.core.lock().await.last_conn_ack.clone()
    }

    /// Broker-assigned identifier if one was returned, otherwise the configured one
    pub async fn client_identifier(&self) -> String {
        let core = self.inner.core.lock().await;
        core.last_conn_ack
            .as_ref()
            .and_then(|ack| ack.assigned_client_identifier.clone())
            .unwrap_or_else(|| self.inner.client_id.clone())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}

impl Inner {
    /// Apply `event` through the transition table and notify observers
    fn commit(
        &self,
        core: &mut Core,
        event: SessionEvent,
        retry: Option<RetrySchedule>,
    ) -> Delivery {
        let from = core.state;
        let Some(to) = StateMachine::next_state(from, &event) else {
            warn!(state = %from, event = ?event, "Ignoring invalid session transition");
            return None;
        };

        core.state = to;
        self.state_tx.send_replace(to);

        let reason = event.reason().map(str::to_owned);
        StateMachine::log_state_transition(from, to, reason.as_deref());

        Some(self.observers.notify(StateTransition {
            from,
            to,
            at: Utc::now(),
            reason,
            retry,
        }))
    }

    fn new_pending(
        core: &mut Core,
        cancel: Option<watch::Sender<bool>>,
    ) -> (u64, watch::Sender<Outcome>, watch::Receiver<Outcome>) {
        core.next_attempt_id += 1;
        let id = core.next_attempt_id;
        let (outcome_tx, outcome_rx) = watch::channel(None);
        core.pending = Some(PendingOutcome {
            id,
            outcome: outcome_rx.clone(),
            cancel,
        });
        (id, outcome_tx, outcome_rx)
    }

    /// Start a caller-initiated attempt from `Disconnected`
    fn begin_attempt(self: &Arc<Self>, core: &mut Core) -> watch::Receiver<Outcome> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (id, outcome_tx, outcome_rx) = Self::new_pending(core, Some(cancel_tx));
        // Observers still get the ordering guarantee; the caller waits on the outcome instead
        let _ = self.commit(core, SessionEvent::ConnectRequested, None);

        let request = core.last_request.clone();
        tokio::spawn(Arc::clone(self).run_attempt(id, request, cancel_rx, outcome_tx));
        outcome_rx
    }

    async fn run_attempt(
        self: Arc<Self>,
        id: u64,
        request: ConnectRequest,
        mut cancel_rx: watch::Receiver<bool>,
        outcome_tx: watch::Sender<Outcome>,
    ) {
        let span = crate::mqtt_span!(
            operation = "connect",
            broker = %self.config.broker_address(),
            client_id = %self.client_id
        );

        let result = tokio::select! {
            result = self
                .connector
                .connect(&self.config, &self.client_id, &request)
                .instrument(span) => Some(result),
            _ = signalled(&mut cancel_rx) => None,
        };

        let mut core = self.core.lock().await;
        let current = core.state == SessionState::Connecting
            && core.pending.as_ref().map(|p| p.id) == Some(id);

        let result = match result {
            Some(result) if current => result,
            other => {
                drop(core);
                discard(other).await;
                let _ = outcome_tx.send(Some(Err(cancelled())));
                return;
            }
        };

        core.pending = None;
        let (outcome, delivery) = match result {
            Ok(established) => {
                let ack = established.conn_ack.clone();
                (Ok(ack), self.install(&mut core, established))
            }
            Err(error) => {
                let delivery =
                    self.commit(&mut core, SessionEvent::ConnectFailed(error.to_string()), None);
                (Err(error), delivery)
            }
        };
        drop(core);

        deliver(delivery).await;
        let _ = outcome_tx.send(Some(outcome));
    }

    /// Adopt a fresh link and enter `Connected`
    fn install(self: &Arc<Self>, core: &mut Core, established: Established) -> Delivery {
        core.generation += 1;
        let generation = core.generation;

        if let Some(assigned) = &established.conn_ack.assigned_client_identifier {
            info!(client_id = %assigned, "Broker assigned client identifier");
        }
        core.last_conn_ack = Some(established.conn_ack);
        core.link = Some(ActiveLink {
            link: established.link,
            generation,
        });

        let delivery = self.commit(core, SessionEvent::ConnAckReceived, None);
        tokio::spawn(Self::watch_link(
            Arc::downgrade(self),
            generation,
            established.lost,
        ));
        delivery
    }

    /// Turn an unexpected drop of the current link into a reconnect cycle
    async fn watch_link(weak: Weak<Self>, generation: u64, lost: oneshot::Receiver<String>) {
        let reason = lost
            .await
            .unwrap_or_else(|_| "connection closed".to_string());

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut core = inner.core.lock().await;
        let current = core.state == SessionState::Connected
            && core.link.as_ref().map(|l| l.generation) == Some(generation);
        if !current {
            debug!(generation, "Ignoring loss of a superseded connection");
            return;
        }

        core.link = None;
        let delivery = inner.begin_reconnect(&mut core, reason);
        drop(core);
        deliver(delivery).await;
    }

    fn begin_reconnect(self: &Arc<Self>, core: &mut Core, reason: String) -> Delivery {
        let mut backoff = Backoff::new(*self.config.reconnect());
        let schedule = match backoff.decide(false) {
            ReconnectionDecision::Proceed(schedule) => schedule,
            ReconnectionDecision::AbortShutdownRequested => return None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        core.reconnect_shutdown = Some(shutdown_tx);
        let (_, outcome_tx, _) = Self::new_pending(core, None);
        let delivery = self.commit(core, SessionEvent::ConnectionLost(reason), Some(schedule));

        tokio::spawn(Self::supervise_reconnect(
            Arc::downgrade(self),
            backoff,
            schedule,
            shutdown_rx,
            outcome_tx,
        ));
        delivery
    }

    /// Retry until connected or shut down; holds only a weak reference while sleeping
    async fn supervise_reconnect(
        weak: Weak<Self>,
        mut backoff: Backoff,
        mut schedule: RetrySchedule,
        shutdown_rx: watch::Receiver<bool>,
        mut outcome_tx: watch::Sender<Outcome>,
    ) {
        loop {
            info!(
                attempt = schedule.attempt,
                delay_ms = schedule.delay.as_millis() as u64,
                "Scheduling reconnection attempt"
            );
            if !interruptible_sleep(shutdown_rx.clone(), schedule.delay).await {
                let _ = outcome_tx.send(Some(Err(cancelled())));
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let request = {
                let mut core = inner.core.lock().await;
                if *shutdown_rx.borrow() || core.state != SessionState::DisconnectedPendingReconnect
                {
                    let _ = outcome_tx.send(Some(Err(cancelled())));
                    return;
                }
                let delivery = inner.commit(&mut core, SessionEvent::BackoffElapsed, None);
                let request = core.last_request.clone();
                drop(core);
                deliver(delivery).await;
                request
            };

            let span = crate::mqtt_span!(
                operation = "reconnect",
                attempt = schedule.attempt,
                broker = %inner.config.broker_address()
            );
            let mut cancel_rx = shutdown_rx.clone();
            let result = tokio::select! {
                result = inner
                    .connector
                    .connect(&inner.config, &inner.client_id, &request)
                    .instrument(span) => Some(result),
                _ = signalled(&mut cancel_rx) => None,
            };

            let mut core = inner.core.lock().await;
            let current =
                !*shutdown_rx.borrow() && core.state == SessionState::ConnectingReconnect;
            let result = match result {
                Some(result) if current => result,
                other => {
                    drop(core);
                    discard(other).await;
                    let _ = outcome_tx.send(Some(Err(cancelled())));
                    return;
                }
            };

            match result {
                Ok(established) => {
                    info!(attempts = backoff.attempts(), "Reconnected to broker");
                    core.pending = None;
                    core.reconnect_shutdown = None;
                    let ack = established.conn_ack.clone();
                    let delivery = inner.install(&mut core, established);
                    drop(core);
                    deliver(delivery).await;
                    let _ = outcome_tx.send(Some(Ok(ack)));
                    return;
                }
                Err(error) => {
                    schedule = match backoff.decide(*shutdown_rx.borrow()) {
                        ReconnectionDecision::Proceed(schedule) => schedule,
                        ReconnectionDecision::AbortShutdownRequested => {
                            let _ = outcome_tx.send(Some(Err(error)));
                            return;
                        }
                    };
                    let (_, next_tx, _) = Self::new_pending(&mut core, None);
                    let delivery = inner.commit(
                        &mut core,
                        SessionEvent::ReconnectFailed(error.to_string()),
                        Some(schedule),
                    );
                    drop(core);
                    deliver(delivery).await;
                    let _ = std::mem::replace(&mut outcome_tx, next_tx).send(Some(Err(error)));
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(shutdown) = core.reconnect_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(cancel) = core.pending.take().and_then(|p| p.cancel) {
            let _ = cancel.send(true);
        }
    }
}

fn cancelled() -> MqttError {
    MqttError::connection_failed("connection attempt cancelled")
}

/// Resolves once the flag is set or its sender is gone
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

async fn deliver(delivery: Delivery) {
    if let Some(delivered) = delivery {
        let _ = delivered.await;
    }
}

async fn wait_for_outcome(
    outcome: &mut watch::Receiver<Outcome>,
) -> Result<ConnAck, MqttError> {
    match outcome.wait_for(Option::is_some).await {
        Ok(value) => value.clone().unwrap_or_else(|| Err(cancelled())),
        Err(_) => Err(MqttError::connection_failed(
            "connection attempt abandoned",
        )),
    }
}

/// Close a link that was established after its attempt was cancelled
async fn discard(result: Option<Result<Established, MqttError>>) {
    if let Some(Ok(established)) = result {
        debug!("Closing connection established after cancellation");
        if let Err(e) = established.link.disconnect(&DisconnectRequest::default()).await {
            debug!(error = %e, "Failed to close cancelled connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    fn test_session(connector: &MockConnector) -> MqttSession {
        let config = ConnectionConfig::builder("localhost", 1883)
            .identifier("test-client")
            .build()
            .unwrap();
        MqttSession::new(config, connector.clone())
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session = test_session(&MockConnector::new());
        assert_eq!(session.current_state(), SessionState::Disconnected);
        assert!(session.last_conn_ack().await.is_none());
        assert_eq!(session.client_identifier().await, "test-client");
    }

    #[tokio::test]
    async fn test_generated_client_id_when_unset() {
        let config = ConnectionConfig::builder("localhost", 1883).build().unwrap();
        let session = MqttSession::new(config, MockConnector::new());
        assert!(session.client_identifier().await.starts_with("sleepasha-"));
    }

    #[tokio::test]
    async fn test_connect_then_already_connected() {
        let connector = MockConnector::new();
        let session = test_session(&connector);

        session.connect(None).await.unwrap();
        assert_eq!(session.current_state(), SessionState::Connected);

        let second = session.connect(None).await;
        assert_eq!(second, Err(MqttError::AlreadyConnected));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        let connector = MockConnector::new();
        connector.reject_next("not authorized");
        let session = test_session(&connector);

        let result = session.connect(None).await;
        assert!(matches!(result, Err(MqttError::ConnectionFailed { .. })));
        assert_eq!(session.current_state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let session = test_session(&MockConnector::new());
        let request = PublishRequest::builder().topic("a/b").build().unwrap();

        let result = session.publish(&request).await;
        assert_eq!(
            result,
            Err(MqttError::NotConnected {
                state: SessionState::Disconnected
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let connector = MockConnector::new();
        let session = test_session(&connector);
        let (_handle, mut transitions) = session.subscribe_transitions();

        session.disconnect(None).await.unwrap();
        session.disconnect(None).await.unwrap();

        assert!(transitions.try_recv().is_err());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let connector = MockConnector::new();
        let session = test_session(&connector);
        session.connect(None).await.unwrap();

        session.stop().await.unwrap();
        assert_eq!(session.current_state(), SessionState::Stopped);
        assert_eq!(session.connect(None).await, Err(MqttError::Stopped));

        // Stopping twice is fine
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_replays_last_request() {
        let connector = MockConnector::new();
        let session = test_session(&connector);
        let request = ConnectRequest::builder().keep_alive(42).build().unwrap();

        session.connect(Some(request.clone())).await.unwrap();
        session.disconnect(None).await.unwrap();
        session.start().await.unwrap();

        let requests = connector.connect_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], request);
    }

    #[tokio::test]
    async fn test_start_when_connected_returns_current_ack() {
        let connector = MockConnector::new();
        let session = test_session(&connector);

        let ack = session.connect(None).await.unwrap();
        assert_eq!(session.start().await.unwrap(), ack);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_maximum_packet_size_enforced_locally() {
        use crate::transport::mqtt::request::ConnectRestrictions;

        let connector = MockConnector::new();
        let session = test_session(&connector);
        let request = ConnectRequest::builder()
            .restrictions(ConnectRestrictions {
                send_maximum_packet_size: Some(64),
                ..Default::default()
            })
            .build()
            .unwrap();
        session.connect(Some(request)).await.unwrap();

        let oversized = PublishRequest::builder()
            .topic("a/b")
            .payload(vec![0u8; 256])
            .build()
            .unwrap();
        let result = session.publish(&oversized).await;

        assert!(matches!(result, Err(MqttError::PublishRejected { .. })));
        assert!(connector.last_link().unwrap().published().is_empty());
    }
}

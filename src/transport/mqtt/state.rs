//! Session lifecycle states and the pure transition table
//!
//! All state changes in [`super::session::MqttSession`] go through
//! [`StateMachine::next_state`]; anything the table does not list is rejected.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Lifecycle state of an MQTT session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No connection and no reconnect pending
    Disconnected,
    /// Caller-initiated connection attempt in flight
    Connecting,
    /// CONNACK received; publishing allowed
    Connected,
    /// Automatic reconnection attempt in flight
    ConnectingReconnect,
    /// Waiting out the backoff delay before the next reconnection attempt
    DisconnectedPendingReconnect,
    /// Terminal; the session refuses further connections
    Stopped,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Inside the automatic reconnect cycle
    pub fn is_reconnecting(self) -> bool {
        matches!(
            self,
            SessionState::ConnectingReconnect | SessionState::DisconnectedPendingReconnect
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ConnectingReconnect => "connecting (reconnect)",
            SessionState::DisconnectedPendingReconnect => "disconnected (reconnect pending)",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Events that drive session transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    ConnAckReceived,
    ConnectFailed(String),
    ConnectionLost(String),
    BackoffElapsed,
    ReconnectFailed(String),
    DisconnectRequested,
    StopRequested,
}

impl SessionEvent {
    pub fn reason(&self) -> Option<&str> {
        match self {
            SessionEvent::ConnectFailed(reason)
            | SessionEvent::ConnectionLost(reason)
            | SessionEvent::ReconnectFailed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Pure transition logic for the session
pub struct StateMachine;

impl StateMachine {
    /// Next state for `event` in `current`, or `None` if the transition is not allowed
    pub fn next_state(current: SessionState, event: &SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (current, event) {
            (S::Disconnected, E::ConnectRequested) => Some(S::Connecting),
            (S::Connecting, E::ConnAckReceived) => Some(S::Connected),
            (S::Connecting, E::ConnectFailed(_)) => Some(S::Disconnected),
            (S::Connected, E::ConnectionLost(_)) => Some(S::DisconnectedPendingReconnect),
            (S::DisconnectedPendingReconnect, E::BackoffElapsed) => Some(S::ConnectingReconnect),
            (S::ConnectingReconnect, E::ConnAckReceived) => Some(S::Connected),
            (S::ConnectingReconnect, E::ReconnectFailed(_)) => {
                Some(S::DisconnectedPendingReconnect)
            }
            (
                S::Connecting
                | S::Connected
                | S::ConnectingReconnect
                | S::DisconnectedPendingReconnect,
                E::DisconnectRequested,
            ) => Some(S::Disconnected),
            (S::Disconnected, E::StopRequested) => Some(S::Stopped),
            _ => None,
        }
    }

    /// Check if state allows publishing (pure function)
    pub fn can_publish(state: SessionState) -> bool {
        state.is_connected()
    }

    /// Log session state transition (pure logging function)
    pub fn log_state_transition(from: SessionState, to: SessionState, reason: Option<&str>) {
        match (from, to) {
            (SessionState::Connecting, SessionState::Connected) => {
                info!("MQTT connection established successfully");
            }
            (SessionState::Connected, SessionState::DisconnectedPendingReconnect) => {
                warn!(reason = reason.unwrap_or("unknown"), "MQTT connection lost");
            }
            (SessionState::ConnectingReconnect, SessionState::Connected) => {
                info!("Reconnection successful");
            }
            (SessionState::ConnectingReconnect, SessionState::DisconnectedPendingReconnect) => {
                warn!(
                    reason = reason.unwrap_or("unknown"),
                    "Reconnection attempt failed"
                );
            }
            (SessionState::Connecting, SessionState::Disconnected) if reason.is_some() => {
                warn!(reason = reason.unwrap_or_default(), "MQTT connection failed");
            }
            (_, SessionState::Stopped) => {
                info!("MQTT session stopped");
            }
            _ => {
                info!("MQTT session state: {} -> {}", from, to);
            }
        }
    }
}

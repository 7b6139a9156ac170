//! Reconnection backoff policy and decisions
//!
//! The delay before attempt `n` (1-based) is `min(initial * 2^(n-1), max)`.
//! There is no jitter, so schedules are reproducible in tests.

use super::connection::MqttError;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Exponential backoff bounds for automatic reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Validate backoff bounds (pure function)
    pub fn validate(&self) -> Result<(), MqttError> {
        if self.initial_delay.is_zero() {
            return Err(MqttError::InvalidConfig(
                "reconnect initial delay must be greater than 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(MqttError::InvalidConfig(format!(
                "reconnect max delay ({:?}) must not be less than initial delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    /// Calculate backoff delay for the given 1-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Attempt number and delay announced with a pending reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetrySchedule {
    pub attempt: u32,
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after the delay
    Proceed(RetrySchedule),
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Attempt counter for one reconnect cycle
///
/// A fresh `Backoff` is created each time a connection is lost, which resets
/// the delay back to the initial value after any successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts scheduled so far in this cycle
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide whether to schedule another attempt (advances the counter on `Proceed`)
    pub fn decide(&mut self, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        self.attempts = self.attempts.saturating_add(1);
        ReconnectionDecision::Proceed(RetrySchedule {
            attempt: self.attempts,
            delay: self.policy.delay_for_attempt(self.attempts),
        })
    }
}

/// Sleep for `delay` unless shutdown is signalled first
///
/// Returns `false` when the sleep was interrupted and the caller should stop.
pub async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

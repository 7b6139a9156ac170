//! State-change observers for the MQTT session
//!
//! Transitions are queued in commit order and delivered by a single dispatcher
//! task, so every observer sees them in the same order. Each notification
//! carries the highest observer id registered at commit time; observers that
//! register later never receive it.

use super::reconnect::RetrySchedule;
use super::state::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One committed state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Present when entering the pending-reconnect state
    pub retry: Option<RetrySchedule>,
}

type Callback = Arc<dyn Fn(&StateTransition) + Send + Sync>;

struct Registration {
    id: u64,
    callback: Callback,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    registrations: Vec<Registration>,
    next_id: u64,
}

struct Notification {
    transition: StateTransition,
    watermark: u64,
    delivered: oneshot::Sender<()>,
}

struct Shared {
    registry: Mutex<Registry>,
    queue: mpsc::UnboundedSender<Notification>,
}

/// Registry of state-change observers with ordered asynchronous delivery
///
/// Must be created inside a tokio runtime; the dispatcher task ends when the
/// last clone is dropped.
#[derive(Clone)]
pub struct ObserverRegistry {
    shared: Arc<Shared>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            queue,
        });

        tokio::spawn(Self::dispatch(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    /// Register a callback for transitions committed from now on
    pub fn register<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.insert(Arc::new(callback), Arc::new(AtomicBool::new(true)))
    }

    fn insert(&self, callback: Callback, active: Arc<AtomicBool>) -> ObserverHandle {
        let mut registry = lock(&self.shared.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.registrations.push(Registration {
            id,
            callback,
            active: Arc::clone(&active),
        });
        debug!(observer_id = id, "State observer registered");

        ObserverHandle {
            id,
            active,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Forward transitions into a channel instead of a callback
    ///
    /// Dropping the receiver unregisters the subscription at the next delivery.
    pub fn subscribe(&self) -> (ObserverHandle, mpsc::UnboundedReceiver<StateTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let forward = move |transition: &StateTransition| {
            if tx.send(transition.clone()).is_err() {
                flag.store(false, Ordering::Release);
            }
        };
        let handle = self.insert(Arc::new(forward), active);
        (handle, rx)
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.shared.registry).registrations.len()
    }

    /// Queue a transition; the receiver resolves once every eligible observer ran
    pub fn notify(&self, transition: StateTransition) -> oneshot::Receiver<()> {
        let (delivered, done) = oneshot::channel();
        let watermark = lock(&self.shared.registry).next_id;
        let notification = Notification {
            transition,
            watermark,
            delivered,
        };
        if let Err(mpsc::error::SendError(notification)) = self.shared.queue.send(notification) {
            // Dispatcher is gone; nothing left to deliver to
            let _ = notification.delivered.send(());
        }
        done
    }

    async fn dispatch(weak: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<Notification>) {
        while let Some(notification) = rx.recv().await {
            let Some(shared) = weak.upgrade() else {
                break;
            };

            let targets: Vec<(u64, Callback, Arc<AtomicBool>)> = lock(&shared.registry)
                .registrations
                .iter()
                .filter(|r| r.id <= notification.watermark)
                .map(|r| (r.id, Arc::clone(&r.callback), Arc::clone(&r.active)))
                .collect();
            drop(shared);

            let mut stale = false;
            for (id, callback, active) in targets {
                if !active.load(Ordering::Acquire) {
                    stale = true;
                    continue;
                }
                let transition = &notification.transition;
                if catch_unwind(AssertUnwindSafe(|| callback(transition))).is_err() {
                    warn!(
                        observer_id = id,
                        from = %transition.from,
                        to = %transition.to,
                        "State observer panicked; continuing delivery"
                    );
                }
                stale |= !active.load(Ordering::Acquire);
            }

            if stale {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared.registry)
                        .registrations
                        .retain(|r| r.active.load(Ordering::Acquire));
                }
            }

            let _ = notification.delivered.send(());
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by registration
///
/// Dropping the handle leaves the observer registered; call
/// [`ObserverHandle::unregister`] to remove it. Safe to call from inside the
/// observer's own callback.
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    active: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery; takes effect before the next callback invocation
    pub fn unregister(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.registry)
                .registrations
                .retain(|r| r.id != self.id);
        }
        debug!(observer_id = self.id, "State observer unregistered");
    }
}

/// Registry lock that survives a poisoned mutex; callbacks never run under it
fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

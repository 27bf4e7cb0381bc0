//! Event dispatcher for inbound frames and connection lifecycle events.
//!
//! Handlers subscribe per event kind or to everything. For a given event the
//! kind-specific handlers run first, in registration order, then the
//! catch-all handlers. A handler that errors or panics is logged as a
//! [`HandlerFault`] and the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tavern_protocol::{Envelope, ProtocolError, ServerEvent, ServerEventKind};
use thiserror::Error;

use super::connection::ConnectionState;
use crate::infrastructure::websocket::ErrorKind;

/// Why the link went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// `connect()` switched to another session
    SessionChanged,
    /// Server closed normally (code 1000); no reconnect
    ClosedByServer(String),
    /// Server closed or the transport failed
    Unexpected(String),
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    Disconnected {
        reason: DisconnectReason,
    },
    Reconnected,
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    Error {
        kind: ErrorKind,
        message: String,
        /// No further attempt will be made without a new `connect()`
        terminal: bool,
    },
}

/// Everything the dispatcher delivers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Lifecycle(LifecycleEvent),
    Server(ServerEvent),
}

impl SessionEvent {
    pub fn key(&self) -> EventKey {
        match self {
            Self::StateChanged(_) => EventKey::State,
            Self::Lifecycle(_) => EventKey::Lifecycle,
            Self::Server(event) => EventKey::Server(event.kind()),
        }
    }
}

/// Subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    State,
    Lifecycle,
    Server(ServerEventKind),
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => f.write_str("state"),
            Self::Lifecycle => f.write_str("lifecycle"),
            Self::Server(kind) => write!(f, "{kind}"),
        }
    }
}

pub type Handler = Arc<dyn Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Returned by `subscribe*`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A handler failed while processing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub event: EventKey,
    pub subscription: SubscriptionId,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers invoked successfully
    pub delivered: usize,
    pub faults: Vec<HandlerFault>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("failed to decode '{kind}' frame: {source}")]
    Parse {
        kind: String,
        #[source]
        source: ProtocolError,
    },
}

#[derive(Default)]
struct Registry {
    by_key: HashMap<EventKey, Vec<(SubscriptionId, Handler)>>,
    catch_all: Vec<(SubscriptionId, Handler)>,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one inbound event kind
    pub fn subscribe<F>(&self, kind: ServerEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some(EventKey::Server(kind)), Arc::new(handler))
    }

    /// Handle lifecycle events and state changes
    pub fn subscribe_lifecycle<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let id = self.register(Some(EventKey::Lifecycle), Arc::clone(&handler));
        self.write()
            .by_key
            .entry(EventKey::State)
            .or_default()
            .push((id, handler));
        id
    }

    /// Handle everything
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Returns false if the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.write();
        let mut removed = false;
        for handlers in registry.by_key.values_mut() {
            let before = handlers.len();
            handlers.retain(|(sid, _)| *sid != id);
            removed |= handlers.len() != before;
        }
        let before = registry.catch_all.len();
        registry.catch_all.retain(|(sid, _)| *sid != id);
        removed | (registry.catch_all.len() != before)
    }

    /// Handlers that would receive an event with this key
    pub fn subscriber_count(&self, key: EventKey) -> usize {
        let registry = self.read();
        registry.by_key.get(&key).map_or(0, Vec::len) + registry.catch_all.len()
    }

    /// Deliver `event` to its handlers.
    ///
    /// The registry lock is released before any handler runs, so handlers may
    /// subscribe or unsubscribe.
    pub fn dispatch(&self, event: &SessionEvent) -> DispatchOutcome {
        let key = event.key();
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let registry = self.read();
            registry
                .by_key
                .get(&key)
                .into_iter()
                .flatten()
                .chain(registry.catch_all.iter())
                .cloned()
                .collect()
        };

        let mut outcome = DispatchOutcome::default();
        for (subscription, handler) in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            let message = match result {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            tracing::error!(event = %key, error = %message, "Event handler failed");
            outcome.faults.push(HandlerFault {
                event: key,
                subscription,
                message,
            });
        }
        outcome
    }

    /// Decode an inbound envelope and dispatch it.
    ///
    /// Unknown types and undecodable payloads are logged and dropped; the
    /// returned error is informational.
    pub fn dispatch_envelope(&self, envelope: &Envelope) -> Result<DispatchOutcome, DispatchError> {
        match ServerEvent::decode(envelope) {
            Ok(event) => Ok(self.dispatch(&SessionEvent::Server(event))),
            Err(ProtocolError::UnknownType(kind)) => {
                tracing::warn!(kind = %kind, "Dropping frame with unknown type");
                Err(DispatchError::UnknownType(kind))
            }
            Err(source) => {
                tracing::warn!(kind = %envelope.kind, error = %source, "Dropping malformed frame");
                Err(DispatchError::Parse {
                    kind: envelope.kind.clone(),
                    source,
                })
            }
        }
    }

    fn register(&self, key: Option<EventKey>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.write();
        match key {
            Some(key) => registry.by_key.entry(key).or_default().push((id, handler)),
            None => registry.catch_all.push((id, handler)),
        }
        id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

//! Lifecycle hooks

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use crate::context::TransmitContext;

/// The five lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Broadcast,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Broadcast => "broadcast",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(EventKind::Connect),
            "disconnect" => Ok(EventKind::Disconnect),
            "subscribe" => Ok(EventKind::Subscribe),
            "unsubscribe" => Ok(EventKind::Unsubscribe),
            "broadcast" => Ok(EventKind::Broadcast),
            other => Err(crate::Error::Config(format!("unknown event `{other}`"))),
        }
    }
}

/// Payload of a lifecycle event
#[derive(Debug, Clone)]
pub enum TransmitEvent {
    Connect {
        uid: String,
        context: Arc<TransmitContext>,
    },
    Disconnect {
        uid: String,
        context: Arc<TransmitContext>,
    },
    Subscribe {
        uid: String,
        channel: String,
        context: Arc<TransmitContext>,
    },
    Unsubscribe {
        uid: String,
        channel: String,
        context: Arc<TransmitContext>,
    },
    Broadcast {
        channel: String,
        payload: Value,
    },
}

impl TransmitEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransmitEvent::Connect { .. } => EventKind::Connect,
            TransmitEvent::Disconnect { .. } => EventKind::Disconnect,
            TransmitEvent::Subscribe { .. } => EventKind::Subscribe,
            TransmitEvent::Unsubscribe { .. } => EventKind::Unsubscribe,
            TransmitEvent::Broadcast { .. } => EventKind::Broadcast,
        }
    }
}

/// Lifecycle callback type
pub type EventHandler = Arc<dyn Fn(&TransmitEvent) + Send + Sync>;

/// Handlers keyed by event kind
#[derive(Clone, Default)]
pub(crate) struct EventHub {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<EventHandler>>>>,
}

impl EventHub {
    pub(crate) fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Run every handler for the event's kind; a panicking handler is
    /// logged and skipped.
    pub(crate) fn emit(&self, event: TransmitEvent) {
        let kind = event.kind();
        // Snapshot so handlers may register further handlers.
        let handlers = match self.handlers.read().get(&kind) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event = kind.as_str(), "Lifecycle handler panicked");
            }
        }
    }
}

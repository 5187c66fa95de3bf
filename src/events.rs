//! Typed event bus shared by the connection core and its consumers.
//!
//! Events are a closed enumeration rather than stringly-typed names; the
//! compound name scheme (`"<method>.<event>"`, e.g. `subscribeInvoices.data`)
//! is derived from the enum for consumers that key on names.

use std::fmt;

use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    manager::ConnectionState,
    rpc::StreamEventBody,
    subscriptions::SubscriptionKey,
};

/// Event name of a stream emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamEventName {
    Data,
    Status,
    End,
}

impl StreamEventName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEventName::Data => "data",
            StreamEventName::Status => "status",
            StreamEventName::End => "end",
        }
    }
}

impl fmt::Display for StreamEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the core emits: lifecycle transitions plus forwarded stream
/// events carrying the daemon's native payloads unmodified.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    StateChanged(ConnectionState),
    /// The daemon reached the locked phase and needs a wallet password.
    WalletUnlockRequired,
    /// The lightning service is active; the main application can proceed.
    LightningActive,
    Stream {
        key: SubscriptionKey,
        body: StreamEventBody,
    },
}

impl NodeEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::StateChanged(_) => EventKind::StateChanged,
            NodeEvent::WalletUnlockRequired => EventKind::WalletUnlockRequired,
            NodeEvent::LightningActive => EventKind::LightningActive,
            NodeEvent::Stream { key, body } => EventKind::Stream(*key, body.name()),
        }
    }

    /// Deterministic event name; stream events use the compound
    /// `"<method>.<event>"` scheme.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            NodeEvent::StateChanged(state) => format!("connection.{state}"),
            NodeEvent::WalletUnlockRequired => "walletUnlockRequired".to_string(),
            NodeEvent::LightningActive => "lightningActive".to_string(),
            NodeEvent::Stream { key, body } => {
                format!("{}.{}", key.method_name(), body.name())
            }
        }
    }
}

impl StreamEventBody {
    #[must_use]
    pub fn name(&self) -> StreamEventName {
        match self {
            StreamEventBody::Data(_) => StreamEventName::Data,
            StreamEventBody::Status(_) => StreamEventName::Status,
            StreamEventBody::End => StreamEventName::End,
        }
    }
}

/// Discriminant of a [`NodeEvent`], used for filtered registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    WalletUnlockRequired,
    LightningActive,
    Stream(SubscriptionKey, StreamEventName),
}

/// Broadcast bus. Cloning shares the underlying channel; receivers see every
/// event published after they subscribe.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to events of one kind only.
    #[must_use]
    pub fn on(&self, kind: EventKind) -> EventStream {
        EventStream {
            rx: self.subscribe(),
            kind,
        }
    }

    pub(crate) fn publish(&self, event: NodeEvent) {
        trace!(target: "lnd_conn::events", name = %event.name(), "publish");
        // No receivers is fine; events are fire-and-forget.
        let _ = self.tx.send(event);
    }
}

/// A receiver filtered to a single [`EventKind`].
pub struct EventStream {
    rx: broadcast::Receiver<NodeEvent>,
    kind: EventKind,
}

impl EventStream {
    /// Next matching event, or `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.kind() == self.kind => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(target: "lnd_conn::events", skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

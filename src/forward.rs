//! Relays stream events onto the shared bus, one binding per subscription.
//!
//! A binding exists while its stream's events should reach consumers.
//! Detaching stops forwarding immediately even if the underlying stream keeps
//! emitting; re-attaching a bound key is refused so no event is ever relayed
//! twice.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    events::{EventBus, NodeEvent},
    rpc::StreamEventBody,
    subscriptions::SubscriptionKey,
};

#[derive(Default)]
pub struct EventForwarder {
    attached: Mutex<HashSet<SubscriptionKey>>,
}

impl EventForwarder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding for `key`. Returns `false` when the key is already
    /// bound; the existing binding stays untouched.
    pub fn attach(&self, key: SubscriptionKey) -> bool {
        let inserted = self.attached.lock().insert(key);
        if inserted {
            trace!(target: "lnd_conn::forward", %key, "forwarding attached");
        } else {
            debug!(target: "lnd_conn::forward", %key, "already forwarding, attach ignored");
        }
        inserted
    }

    /// Remove exactly the binding for `key`. Unknown keys are a no-op.
    pub fn detach(&self, key: SubscriptionKey) {
        if self.attached.lock().remove(&key) {
            trace!(target: "lnd_conn::forward", %key, "forwarding detached");
        } else {
            debug!(target: "lnd_conn::forward", %key, "detach for unbound method ignored");
        }
    }

    #[must_use]
    pub fn is_attached(&self, key: SubscriptionKey) -> bool {
        self.attached.lock().contains(&key)
    }

    /// Publish the event onto the bus iff the key's binding is present.
    pub fn relay(&self, key: SubscriptionKey, body: StreamEventBody, bus: &EventBus) {
        if self.attached.lock().contains(&key) {
            bus.publish(NodeEvent::Stream { key, body });
        }
    }

    /// Drop every binding. Used when the connection is torn down.
    pub fn clear(&self) {
        self.attached.lock().clear();
    }
}

//! Subscription bookkeeping: one table entry per open server stream.
//!
//! A key is present in the table iff its stream is open. Entries are removed
//! exactly once, by the pump task, when the stream yields a terminal event
//! (end, or a CANCELLED status). Cancellation resolves only after that
//! terminal event is observed, never merely after the cancel request is sent.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tonic::Code;
use tracing::{debug, trace, warn};

use crate::{
    events::EventBus,
    forward::EventForwarder,
    rpc::{CancelHandle, LightningRpc, RpcError, StreamEventBody, StreamHandle},
    service::LightningService,
};

/// The fixed set of logical stream names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKey {
    Invoices,
    Transactions,
    ChannelGraph,
    Info,
}

impl SubscriptionKey {
    pub const ALL: [SubscriptionKey; 4] = [
        SubscriptionKey::Invoices,
        SubscriptionKey::Transactions,
        SubscriptionKey::ChannelGraph,
        SubscriptionKey::Info,
    ];

    /// Remote streaming-method name bound to this key, verified against the
    /// daemon's service contract.
    #[must_use]
    pub fn method_name(self) -> &'static str {
        match self {
            SubscriptionKey::Invoices => "subscribeInvoices",
            SubscriptionKey::Transactions => "subscribeTransactions",
            SubscriptionKey::ChannelGraph => "subscribeChannelGraph",
            SubscriptionKey::Info => "subscribeGetInfo",
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionKey::Invoices => "invoices",
            SubscriptionKey::Transactions => "transactions",
            SubscriptionKey::ChannelGraph => "channelgraph",
            SubscriptionKey::Info => "info",
        };
        f.write_str(name)
    }
}

struct ActiveSubscription {
    cancel: CancelHandle,
    done: watch::Receiver<bool>,
}

type SubscriptionTable = Arc<Mutex<HashMap<SubscriptionKey, ActiveSubscription>>>;

/// Starts and stops the named server streams for one live connection.
///
/// Created at activation and dropped on disconnect; all table mutation
/// happens synchronously under the table lock inside event handling, never
/// across a suspension point.
pub struct SubscriptionManager<R: LightningRpc> {
    service: Arc<LightningService<R>>,
    table: SubscriptionTable,
    forwarder: Arc<EventForwarder>,
    bus: EventBus,
    closed: AtomicBool,
}

impl<R: LightningRpc> SubscriptionManager<R> {
    pub fn new(service: Arc<LightningService<R>>, bus: EventBus) -> Self {
        Self {
            service,
            table: Arc::new(Mutex::new(HashMap::new())),
            forwarder: Arc::new(EventForwarder::new()),
            bus,
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse all further `subscribe` calls. Called when the owning session
    /// tears down, so a watcher task holding a stale handle cannot repopulate
    /// the table after the drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Keys with a currently open stream, in the fixed key order.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let table = self.table.lock();
        SubscriptionKey::ALL
            .into_iter()
            .filter(|key| table.contains_key(key))
            .collect()
    }

    #[must_use]
    pub fn is_active(&self, key: SubscriptionKey) -> bool {
        self.table.lock().contains_key(&key)
    }

    /// Open streams for the given keys; an empty slice targets the full known
    /// set. Duplicates collapse. Keys already active are logged and skipped.
    ///
    /// # Errors
    /// Returns the first stream-opening failure; keys opened before it stay
    /// subscribed, keys after it are not attempted. A closed manager returns
    /// [`RpcError::NotConnected`].
    pub async fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<(), RpcError> {
        let targets = resolve(keys, &SubscriptionKey::ALL);
        for key in targets {
            if self.is_closed() {
                return Err(RpcError::NotConnected);
            }
            if self.is_active(key) {
                warn!(target: "lnd_conn::subs", %key, "subscription already active, skipping");
                continue;
            }
            let handle = self.service.open_subscription(key).await?;
            if self.is_closed() {
                // Closed while opening: dropping the handle shuts the stream
                // driver down without installing anything.
                return Err(RpcError::NotConnected);
            }
            self.install(key, handle);
        }
        Ok(())
    }

    /// Cancel the given keys concurrently; an empty slice targets every
    /// active key. Resolves once each targeted stream has confirmed its
    /// terminal event.
    pub async fn unsubscribe(&self, keys: &[SubscriptionKey]) {
        let active = self.active_keys();
        let targets = resolve(keys, &active);
        join_all(
            targets
                .into_iter()
                .map(|key| self.cancel_subscription(key)),
        )
        .await;
    }

    /// Cancel one stream. A no-op (logged) when the key is not active.
    ///
    /// Ordering: the forwarder binding is detached first so no further events
    /// reach consumers, then the transport cancel is issued, and completion is
    /// awaited on the confirming terminal event from the stream itself.
    pub async fn cancel_subscription(&self, key: SubscriptionKey) {
        let (cancel, mut done) = {
            let table = self.table.lock();
            match table.get(&key) {
                None => {
                    warn!(target: "lnd_conn::subs", %key, "cancel requested for inactive subscription");
                    return;
                }
                Some(sub) => (sub.cancel.clone(), sub.done.clone()),
            }
        };
        self.forwarder.detach(key);
        cancel.cancel();
        trace!(target: "lnd_conn::subs", %key, "cancel requested, awaiting confirmation");
        let _ = done.wait_for(|confirmed| *confirmed).await;
        debug!(target: "lnd_conn::subs", %key, "subscription cancelled");
    }

    fn install(&self, key: SubscriptionKey, handle: StreamHandle) {
        let (events, cancel) = handle.split();
        let (done_tx, done_rx) = watch::channel(false);
        self.forwarder.attach(key);
        self.table.lock().insert(
            key,
            ActiveSubscription {
                cancel,
                done: done_rx,
            },
        );
        debug!(target: "lnd_conn::subs", %key, method = key.method_name(), "subscribed");
        tokio::spawn(pump(
            key,
            events,
            self.table.clone(),
            self.forwarder.clone(),
            self.bus.clone(),
            done_tx,
        ));
    }
}

/// Intersection of `requested` with `universe`, deduplicated, in universe
/// order. An empty request targets the whole universe.
fn resolve(requested: &[SubscriptionKey], universe: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
    if requested.is_empty() {
        return universe.to_vec();
    }
    universe
        .iter()
        .copied()
        .filter(|key| requested.contains(key))
        .collect()
}

/// Per-stream event loop: relays events through the forwarder and performs
/// the single table removal on the terminal event. Late events after removal
/// are dropped here, so a detached handle can never re-trigger removal.
async fn pump(
    key: SubscriptionKey,
    mut events: mpsc::Receiver<StreamEventBody>,
    table: SubscriptionTable,
    forwarder: Arc<EventForwarder>,
    bus: EventBus,
    done_tx: watch::Sender<bool>,
) {
    while let Some(body) = events.recv().await {
        let terminal = match &body {
            StreamEventBody::End => true,
            StreamEventBody::Status(code) => {
                if *code != Code::Cancelled {
                    debug!(target: "lnd_conn::subs", %key, ?code, "non-terminal stream status");
                }
                *code == Code::Cancelled
            }
            StreamEventBody::Data(_) => false,
        };
        forwarder.relay(key, body, &bus);
        if terminal {
            break;
        }
    }
    if table.lock().remove(&key).is_some() {
        trace!(target: "lnd_conn::subs", %key, "table entry removed");
    }
    forwarder.detach(key);
    let _ = done_tx.send(true);
}

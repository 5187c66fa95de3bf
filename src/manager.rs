//! The connection state machine and owner of everything connection-scoped.
//!
//! A [`NodeManager`] is an explicitly constructed instance; multiple managers
//! (and therefore multiple independent connections) can coexist. The manager
//! owns the transport handle, the per-connection service registry and
//! subscription table, and the event bus consumers listen on. All registries
//! live exactly as long as one connection and reset to their empty shape on
//! every disconnect, even a failed one.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::{
    config::ConnectOptions,
    events::{EventBus, NodeEvent},
    gate::SyncGate,
    rpc::{LightningRpc, RpcError, StreamEventBody, StreamPayload, WalletState},
    service::LightningService,
    subscriptions::{SubscriptionKey, SubscriptionManager},
};

/// Subscriptions started on activation. The channel-graph stream is deferred
/// behind [`SyncGate`] because the daemon refuses it before chain sync.
pub const DEFAULT_SUBSCRIPTIONS: &[SubscriptionKey] = &[
    SubscriptionKey::Invoices,
    SubscriptionKey::Transactions,
    SubscriptionKey::Info,
];

const EVENT_BUS_CAPACITY: usize = 256;

/// Lifecycle phase of the connection. Transitions are observed from the
/// daemon's readiness signals, never forced, except via explicit
/// connect/disconnect calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport is up but the wallet needs a password before the lightning
    /// service answers.
    Locked,
    Active,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Locked => "locked",
            ConnectionState::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LndError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Result alias that defaults to [`LndError`].
pub type Result<T, E = LndError> = std::result::Result<T, E>;

struct Session<R: LightningRpc> {
    service: Arc<LightningService<R>>,
    subscriptions: Arc<SubscriptionManager<R>>,
    /// The sync-gate watcher of this session, if armed. At most one per
    /// session; the task exits on its own once fired or disconnected.
    gate: Option<JoinHandle<()>>,
}

/// Connection/subscription lifecycle manager for one LND node.
pub struct NodeManager<R: LightningRpc> {
    rpc: Arc<R>,
    bus: EventBus,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session<R>>>,
}

impl<R: LightningRpc> NodeManager<R> {
    pub fn new(rpc: R) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            rpc: Arc::new(rpc),
            bus: EventBus::new(EVENT_BUS_CAPACITY),
            state_tx,
            session: Mutex::new(None),
        }
    }

    /// The shared event bus carrying lifecycle and forwarded stream events.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Suspend until the phase equals one of `targets`; returns the matching
    /// phase. Resolves immediately when already there.
    pub async fn wait_for_state(&self, targets: &[ConnectionState]) -> ConnectionState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if targets.contains(&current) {
                return current;
            }
            if rx.changed().await.is_err() {
                return current;
            }
        }
    }

    /// Establish a connection and begin the phase-transition sequence.
    ///
    /// Reaching the locked phase emits [`NodeEvent::WalletUnlockRequired`];
    /// an already-unlocked wallet activates directly (service registry built,
    /// [`NodeEvent::LightningActive`] emitted, default subscriptions started).
    ///
    /// # Errors
    /// [`LndError::AlreadyConnected`] unless currently disconnected; transport
    /// failures are surfaced as-is after the registries are reset. No retry is
    /// attempted here; callers build retry on [`wait_for_state`](Self::wait_for_state).
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(LndError::AlreadyConnected);
        }
        self.set_state(ConnectionState::Connecting);
        match self.try_connect(&options).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "lnd_conn::manager", error = %e, "connect failed, resetting");
                // Streams opened before the failure must be drained here too;
                // their pumps and forwarder bindings outlive the session
                // otherwise.
                let session = self.session.lock().take();
                if let Some(session) = session {
                    session.subscriptions.close();
                    session.subscriptions.unsubscribe(&[]).await;
                }
                let _ = self.rpc.disconnect().await;
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn try_connect(&self, options: &ConnectOptions) -> Result<()> {
        self.rpc.connect(options).await?;
        match self.rpc.wallet_state().await? {
            WalletState::Locked => {
                self.set_state(ConnectionState::Locked);
                self.bus.publish(NodeEvent::WalletUnlockRequired);
                Ok(())
            }
            WalletState::Unlocked => self.activate().await,
        }
    }

    /// Unlock the wallet and proceed to activation.
    ///
    /// # Errors
    /// [`LndError::InvalidState`] outside the locked phase; an unlock failure
    /// is surfaced and leaves the phase at locked.
    pub async fn unlock_wallet(&self, password: &[u8]) -> Result<()> {
        if self.state() != ConnectionState::Locked {
            return Err(LndError::InvalidState(
                "wallet unlock requires the locked phase",
            ));
        }
        self.rpc.unlock_wallet(password).await?;
        self.activate().await
    }

    async fn activate(&self) -> Result<()> {
        let service = Arc::new(LightningService::new(self.rpc.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(service.clone(), self.bus.clone()));
        *self.session.lock() = Some(Session {
            service,
            subscriptions,
            gate: None,
        });
        self.set_state(ConnectionState::Active);
        self.bus.publish(NodeEvent::LightningActive);
        self.subscribe_all().await
    }

    /// The default subscribe-all entry point: starts the default set and arms
    /// the sync gate that later swaps the info stream for the channel-graph
    /// stream. Explicit partial subscribes do not arm the gate. At most one
    /// gate watcher runs per session; repeated calls while one is live do not
    /// arm another.
    ///
    /// # Errors
    /// Surfaces the first stream-opening failure.
    pub async fn subscribe_all(&self) -> Result<()> {
        let subscriptions = self.subscriptions()?;
        // Register before subscribing so no info event can slip past the gate.
        let rx = self.bus.subscribe();
        subscriptions.subscribe(DEFAULT_SUBSCRIPTIONS).await?;
        let mut guard = self.session.lock();
        if let Some(session) = guard.as_mut() {
            let live = session.gate.as_ref().is_some_and(|task| !task.is_finished());
            if !live {
                session.gate = Some(tokio::spawn(run_sync_gate(rx, subscriptions)));
            }
        }
        Ok(())
    }

    /// Start streams for specific keys without arming the sync gate.
    ///
    /// # Errors
    /// [`LndError::NotConnected`] without an active session; otherwise the
    /// first stream-opening failure.
    pub async fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<()> {
        self.subscriptions()?.subscribe(keys).await?;
        Ok(())
    }

    /// Cancel streams for the given keys (all active keys when empty),
    /// returning once every targeted stream confirmed its terminal event.
    ///
    /// # Errors
    /// [`LndError::NotConnected`] without an active session.
    pub async fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Result<()> {
        self.subscriptions()?.unsubscribe(keys).await;
        Ok(())
    }

    /// Cancel a single stream; a no-op for inactive keys.
    ///
    /// # Errors
    /// [`LndError::NotConnected`] without an active session.
    pub async fn cancel_subscription(&self, key: SubscriptionKey) -> Result<()> {
        self.subscriptions()?.cancel_subscription(key).await;
        Ok(())
    }

    /// Keys with a currently open stream; empty when not active.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.subscriptions.active_keys())
            .unwrap_or_default()
    }

    /// The augmented service registry of the live connection, if any.
    #[must_use]
    pub fn service(&self) -> Option<Arc<LightningService<R>>> {
        self.session.lock().as_ref().map(|s| s.service.clone())
    }

    /// Tear down the connection. Idempotent: a no-op without a live
    /// connection.
    ///
    /// Drains every open subscription before releasing the transport. There
    /// is deliberately no timeout on the drain: an unresponsive remote stream
    /// stalls disconnect indefinitely rather than leaking a half-open stream;
    /// the preceding log line surfaces the wait to operators. Graceful
    /// transport teardown is requested only from phases that support it and
    /// is best-effort; the in-memory registries are reset regardless.
    ///
    /// # Errors
    /// Currently infallible; the `Result` reserves room for teardown
    /// reporting.
    pub async fn disconnect(&self) -> Result<()> {
        let state = self.state();
        if state == ConnectionState::Disconnected {
            debug!(target: "lnd_conn::manager", "disconnect with no live connection, nothing to do");
            return Ok(());
        }
        let session = self.session.lock().take();
        if let Some(session) = session {
            // Close first so a late gate watcher cannot repopulate the table
            // mid-drain.
            session.subscriptions.close();
            let active = session.subscriptions.active_keys();
            if !active.is_empty() {
                debug!(
                    target: "lnd_conn::manager",
                    count = active.len(),
                    "draining active subscriptions; an unresponsive stream will stall disconnect"
                );
                session.subscriptions.unsubscribe(&[]).await;
            }
        }
        if matches!(state, ConnectionState::Locked | ConnectionState::Active) {
            if let Err(e) = self.rpc.disconnect().await {
                warn!(target: "lnd_conn::manager", error = %e, "graceful transport teardown failed");
            }
        }
        self.set_state(ConnectionState::Disconnected);
        debug!(target: "lnd_conn::manager", "disconnected, registries reset");
        Ok(())
    }

    fn subscriptions(&self) -> Result<Arc<SubscriptionManager<R>>> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.subscriptions.clone())
            .ok_or(LndError::NotConnected)
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(target: "lnd_conn::manager", state = %next, "connection state changed");
            self.bus.publish(NodeEvent::StateChanged(next));
        }
    }
}

/// Watches forwarded info data until the sync gate fires, then starts the
/// channel-graph subscription and stops the info subscription. Exits on
/// disconnect or once the gate has fired.
async fn run_sync_gate<R: LightningRpc>(
    mut rx: broadcast::Receiver<NodeEvent>,
    subscriptions: Arc<SubscriptionManager<R>>,
) {
    let mut gate = SyncGate::new();
    loop {
        match rx.recv().await {
            Ok(NodeEvent::Stream {
                key: SubscriptionKey::Info,
                body: StreamEventBody::Data(StreamPayload::Info(info)),
            }) => {
                let graph_active = subscriptions.is_active(SubscriptionKey::ChannelGraph);
                if gate.observe(info.synced_to_chain, graph_active) {
                    debug!(
                        target: "lnd_conn::gate",
                        block_height = info.block_height,
                        "chain sync complete, starting channel-graph subscription"
                    );
                    if let Err(e) = subscriptions.subscribe(&[SubscriptionKey::ChannelGraph]).await
                    {
                        warn!(target: "lnd_conn::gate", error = %e, "channel-graph subscription failed");
                    }
                    subscriptions
                        .cancel_subscription(SubscriptionKey::Info)
                        .await;
                    break;
                }
            }
            Ok(NodeEvent::StateChanged(ConnectionState::Disconnected)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!(target: "lnd_conn::gate", skipped, "gate receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

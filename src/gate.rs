//! The sync-gating rule between the info and channel-graph subscriptions.
//!
//! The daemon refuses `SubscribeChannelGraph` until chain sync completes, so
//! the default subscribe-all path watches info data and defers the graph
//! subscription until `synced_to_chain` flips. The rule is a named object so
//! its one-shot trigger can be tested without any streaming I/O.

/// One-shot trigger: fires the first time the chain is synced while the
/// channel-graph subscription is absent, then never again.
#[derive(Debug, Default)]
pub struct SyncGate {
    fired: bool,
}

impl SyncGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one info observation. Returns `true` exactly when the gate fires:
    /// the caller should start the channel-graph subscription and stop the
    /// info subscription.
    pub fn observe(&mut self, synced_to_chain: bool, channel_graph_active: bool) -> bool {
        if self.fired || !synced_to_chain || channel_graph_active {
            return false;
        }
        self.fired = true;
        true
    }

    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired
    }
}

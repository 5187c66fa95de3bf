use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tonic::Code;

use lnd_conn::proto::lnrpc;
use lnd_conn::rpc::{
    LightningRpc, RpcError, StreamEventBody, StreamHandle, StreamPayload, WalletState,
};
use lnd_conn::service::LightningService;
use lnd_conn::subscriptions::SubscriptionManager;
use lnd_conn::{
    ConnectOptions, ConnectionState, ConnectionType, EventBus, EventKind, LndError, NodeEvent,
    NodeManager, StreamEventName, SubscriptionKey,
};

const PEER_PUBKEY: &str = "02feedface42";
const PEER_HOST: &str = "peer.example.org:9735";

#[derive(Default)]
struct MockInner {
    wallet: Mutex<Option<WalletState>>,
    streams: Mutex<HashMap<SubscriptionKey, mpsc::Sender<StreamEventBody>>>,
    peers: Mutex<Vec<lnrpc::Peer>>,
    fail_stream: Mutex<Option<SubscriptionKey>>,
    disconnects: Mutex<usize>,
    connect_peer_calls: Mutex<usize>,
}

#[derive(Clone)]
struct MockLightning {
    inner: Arc<MockInner>,
}

impl MockLightning {
    fn unlocked() -> Self {
        Self::with_wallet(WalletState::Unlocked)
    }

    fn locked() -> Self {
        Self::with_wallet(WalletState::Locked)
    }

    fn with_wallet(state: WalletState) -> Self {
        let inner = MockInner::default();
        *inner.wallet.lock() = Some(state);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn disconnects(&self) -> usize {
        *self.inner.disconnects.lock()
    }

    fn connect_peer_calls(&self) -> usize {
        *self.inner.connect_peer_calls.lock()
    }

    /// Make `open_stream` refuse the given key from now on.
    fn fail_stream_for(&self, key: SubscriptionKey) {
        *self.inner.fail_stream.lock() = Some(key);
    }

    fn add_peer(&self, pub_key: &str) {
        self.inner.peers.lock().push(lnrpc::Peer {
            pub_key: pub_key.to_string(),
            ..Default::default()
        });
    }

    /// Push an event into the open stream for `key`. Returns `false` when the
    /// stream was never opened or its consumer is gone.
    async fn push(&self, key: SubscriptionKey, body: StreamEventBody) -> bool {
        let sender = self.inner.streams.lock().get(&key).cloned();
        match sender {
            Some(tx) => tx.send(body).await.is_ok(),
            None => false,
        }
    }

    async fn push_invoice(&self) -> bool {
        self.push(
            SubscriptionKey::Invoices,
            StreamEventBody::Data(StreamPayload::Invoice(lnrpc::Invoice {
                value: 1_000,
                ..Default::default()
            })),
        )
        .await
    }

    async fn push_info(&self, synced_to_chain: bool) -> bool {
        self.push(
            SubscriptionKey::Info,
            StreamEventBody::Data(StreamPayload::Info(lnrpc::GetInfoResponse {
                synced_to_chain,
                block_height: 840_000,
                ..Default::default()
            })),
        )
        .await
    }
}

#[async_trait]
impl LightningRpc for MockLightning {
    async fn connect(&self, _options: &ConnectOptions) -> Result<(), RpcError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        *self.inner.disconnects.lock() += 1;
        Ok(())
    }

    async fn wallet_state(&self) -> Result<WalletState, RpcError> {
        let state = *self.inner.wallet.lock();
        state.ok_or_else(|| RpcError::connection_message("wallet state unavailable"))
    }

    async fn unlock_wallet(&self, password: &[u8]) -> Result<(), RpcError> {
        if password.is_empty() {
            return Err(RpcError::from(tonic::Status::invalid_argument(
                "empty password",
            )));
        }
        *self.inner.wallet.lock() = Some(WalletState::Unlocked);
        Ok(())
    }

    async fn get_info(&self) -> Result<lnrpc::GetInfoResponse, RpcError> {
        Ok(lnrpc::GetInfoResponse::default())
    }

    async fn wallet_balance(&self) -> Result<lnrpc::WalletBalanceResponse, RpcError> {
        Ok(lnrpc::WalletBalanceResponse {
            total_balance: 1_500,
            confirmed_balance: 1_000,
            unconfirmed_balance: 500,
        })
    }

    async fn channel_balance(&self) -> Result<lnrpc::ChannelBalanceResponse, RpcError> {
        Ok(lnrpc::ChannelBalanceResponse {
            balance: 250,
            pending_open_balance: 0,
        })
    }

    async fn list_peers(&self) -> Result<lnrpc::ListPeersResponse, RpcError> {
        Ok(lnrpc::ListPeersResponse {
            peers: self.inner.peers.lock().clone(),
        })
    }

    async fn connect_peer(
        &self,
        request: lnrpc::ConnectPeerRequest,
    ) -> Result<lnrpc::ConnectPeerResponse, RpcError> {
        *self.inner.connect_peer_calls.lock() += 1;
        if let Some(addr) = request.addr {
            self.add_peer(&addr.pubkey);
        }
        Ok(lnrpc::ConnectPeerResponse {})
    }

    async fn add_invoice(
        &self,
        invoice: lnrpc::Invoice,
    ) -> Result<lnrpc::AddInvoiceResponse, RpcError> {
        Ok(lnrpc::AddInvoiceResponse {
            r_hash: vec![0xab; 32],
            payment_request: format!("lnbc{}", invoice.value),
            add_index: 1,
        })
    }

    async fn open_stream(&self, key: SubscriptionKey) -> Result<StreamHandle, RpcError> {
        if *self.inner.fail_stream.lock() == Some(key) {
            return Err(RpcError::connection_message("stream refused"));
        }
        let (sender, handle) = StreamHandle::channel(16);
        self.inner
            .streams
            .lock()
            .insert(key, sender.events.clone());
        let events = sender.events;
        let mut cancel = sender.cancel_requested;
        // Confirm transport cancellation the way a real daemon would: with a
        // CANCELLED status on the stream itself.
        tokio::spawn(async move {
            if cancel.changed().await.is_ok() && *cancel.borrow() {
                let _ = events.send(StreamEventBody::Status(Code::Cancelled)).await;
            }
        });
        Ok(handle)
    }
}

fn options() -> ConnectOptions {
    ConnectOptions::new("default", ConnectionType::Remote, "https://localhost:10009")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn connect_activates_and_starts_default_subscriptions() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    let mut events = manager.events().subscribe();

    manager.connect(options()).await.expect("connect");

    assert_eq!(manager.state(), ConnectionState::Active);
    assert_eq!(
        manager.active_subscriptions(),
        vec![
            SubscriptionKey::Invoices,
            SubscriptionKey::Transactions,
            SubscriptionKey::Info
        ]
    );

    let mut saw_active_event = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, NodeEvent::LightningActive) {
            saw_active_event = true;
        }
    }
    assert!(saw_active_event);
}

#[tokio::test]
async fn connect_while_connected_fails() {
    let manager = NodeManager::new(MockLightning::unlocked());
    manager.connect(options()).await.expect("connect");
    let err = manager.connect(options()).await.unwrap_err();
    assert!(matches!(err, LndError::AlreadyConnected));
}

#[tokio::test]
async fn locked_wallet_requires_unlock_before_activation() {
    let mock = MockLightning::locked();
    let manager = NodeManager::new(mock.clone());
    let mut unlock_events = manager.events().on(EventKind::WalletUnlockRequired);

    manager.connect(options()).await.expect("connect");
    assert_eq!(manager.state(), ConnectionState::Locked);
    assert!(manager.active_subscriptions().is_empty());
    tokio::time::timeout(Duration::from_secs(1), unlock_events.next())
        .await
        .expect("unlock event")
        .expect("bus open");

    manager.unlock_wallet(b"passw0rd").await.expect("unlock");
    assert_eq!(manager.state(), ConnectionState::Active);
    assert!(!manager.active_subscriptions().is_empty());
}

#[tokio::test]
async fn unlock_outside_locked_phase_is_invalid() {
    let manager = NodeManager::new(MockLightning::unlocked());
    let err = manager.unlock_wallet(b"pw").await.unwrap_err();
    assert!(matches!(err, LndError::InvalidState(_)));
}

#[tokio::test]
async fn subscribe_subsets_are_exact_and_idempotent() {
    let manager = NodeManager::new(MockLightning::unlocked());
    manager.connect(options()).await.expect("connect");
    manager.unsubscribe(&[]).await.expect("clear");

    for mask in 0u32..16 {
        let subset: Vec<SubscriptionKey> = SubscriptionKey::ALL
            .into_iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, key)| key)
            .collect();
        // An empty subset means "all keys" by contract, so skip it here.
        if subset.is_empty() {
            continue;
        }

        manager.subscribe(&subset).await.expect("subscribe");
        assert_eq!(manager.active_subscriptions(), subset);

        // Repeat subscription of active keys is a logged no-op per key.
        manager.subscribe(&subset).await.expect("resubscribe");
        assert_eq!(manager.active_subscriptions(), subset);

        manager.unsubscribe(&[]).await.expect("reset");
        assert!(manager.active_subscriptions().is_empty());
    }
}

#[tokio::test]
async fn unsubscribe_with_no_keys_drains_everything() {
    let manager = NodeManager::new(MockLightning::unlocked());
    manager.connect(options()).await.expect("connect");
    assert_eq!(manager.active_subscriptions().len(), 3);

    manager.unsubscribe(&[]).await.expect("unsubscribe");
    assert!(manager.active_subscriptions().is_empty());
}

#[tokio::test]
async fn cancel_of_inactive_key_is_a_noop() {
    let manager = NodeManager::new(MockLightning::unlocked());
    manager.connect(options()).await.expect("connect");

    manager
        .cancel_subscription(SubscriptionKey::ChannelGraph)
        .await
        .expect("cancel inactive");
    assert_eq!(manager.active_subscriptions().len(), 3);
}

#[tokio::test]
async fn sync_gate_swaps_info_for_channel_graph_once() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");

    // Not yet synced: nothing changes.
    assert!(mock.push_info(false).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager
        .active_subscriptions()
        .contains(&SubscriptionKey::ChannelGraph));

    // Sync completion starts the graph stream and stops the info stream.
    assert!(mock.push_info(true).await);
    wait_until(|| {
        let active = manager.active_subscriptions();
        active.contains(&SubscriptionKey::ChannelGraph)
            && !active.contains(&SubscriptionKey::Info)
    })
    .await;

    // The info stream is gone; further pushes have no consumer.
    assert!(!mock.push_info(true).await);
}

#[tokio::test]
async fn cancelled_subscription_stops_forwarding() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");
    manager.unsubscribe(&[]).await.expect("clear");

    manager
        .subscribe(&[SubscriptionKey::Invoices])
        .await
        .expect("subscribe");
    let mut invoice_data = manager.events().on(EventKind::Stream(
        SubscriptionKey::Invoices,
        StreamEventName::Data,
    ));

    assert!(mock.push_invoice().await);
    let event = tokio::time::timeout(Duration::from_secs(1), invoice_data.next())
        .await
        .expect("forwarded event")
        .expect("bus open");
    assert!(matches!(
        event,
        NodeEvent::Stream {
            key: SubscriptionKey::Invoices,
            body: StreamEventBody::Data(StreamPayload::Invoice(_)),
        }
    ));

    manager
        .cancel_subscription(SubscriptionKey::Invoices)
        .await
        .expect("cancel");
    assert!(manager.active_subscriptions().is_empty());

    // The detached handle must never re-trigger the forwarder.
    mock.push_invoice().await;
    assert!(
        tokio::time::timeout(Duration::from_millis(100), invoice_data.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn concurrent_cancellations_all_resolve() {
    let manager = NodeManager::new(MockLightning::unlocked());
    manager.connect(options()).await.expect("connect");
    assert_eq!(manager.active_subscriptions().len(), 3);

    let (a, b, c) = tokio::join!(
        manager.cancel_subscription(SubscriptionKey::Invoices),
        manager.cancel_subscription(SubscriptionKey::Transactions),
        manager.cancel_subscription(SubscriptionKey::Info),
    );
    a.expect("invoices");
    b.expect("transactions");
    c.expect("info");
    assert!(manager.active_subscriptions().is_empty());
}

#[tokio::test]
async fn failed_activation_drains_streams_opened_before_the_failure() {
    let mock = MockLightning::unlocked();
    mock.fail_stream_for(SubscriptionKey::Transactions);
    let manager = NodeManager::new(mock.clone());
    let mut events = manager.events().subscribe();

    assert!(manager.connect(options()).await.is_err());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.active_subscriptions().is_empty());
    assert!(manager.service().is_none());

    // The invoices stream opened before the failure was detached and drained
    // with the session: nothing it emits reaches the bus.
    mock.push_invoice().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, NodeEvent::Stream { .. }));
    }
}

#[tokio::test]
async fn non_cancelled_status_is_forwarded_without_teardown() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");
    let mut status_events = manager.events().on(EventKind::Stream(
        SubscriptionKey::Invoices,
        StreamEventName::Status,
    ));

    assert!(
        mock.push(
            SubscriptionKey::Invoices,
            StreamEventBody::Status(Code::Unavailable),
        )
        .await
    );
    let event = tokio::time::timeout(Duration::from_secs(1), status_events.next())
        .await
        .expect("status event")
        .expect("bus open");
    assert!(matches!(
        event,
        NodeEvent::Stream {
            key: SubscriptionKey::Invoices,
            body: StreamEventBody::Status(Code::Unavailable),
        }
    ));

    // A transient status is not a terminal event; the stream stays up.
    assert!(manager
        .active_subscriptions()
        .contains(&SubscriptionKey::Invoices));
    assert!(mock.push_invoice().await);
}

#[tokio::test]
async fn closed_subscription_manager_refuses_new_streams() {
    let mock = MockLightning::unlocked();
    let service = Arc::new(LightningService::new(Arc::new(mock.clone())));
    let subscriptions = SubscriptionManager::new(service, EventBus::new(16));

    subscriptions
        .subscribe(&[SubscriptionKey::Invoices])
        .await
        .expect("subscribe");
    subscriptions.close();

    let err = subscriptions
        .subscribe(&[SubscriptionKey::ChannelGraph])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NotConnected));
    assert_eq!(
        subscriptions.active_keys(),
        vec![SubscriptionKey::Invoices]
    );
}

#[tokio::test]
async fn repeated_subscribe_all_arms_a_single_gate() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");
    // A second call must not arm a second gate watcher.
    manager.subscribe_all().await.expect("subscribe all again");

    assert!(mock.push_info(true).await);
    wait_until(|| {
        manager
            .active_subscriptions()
            .contains(&SubscriptionKey::ChannelGraph)
    })
    .await;

    // Rebuild the swap's precondition; the gate is one-shot per session, so
    // a further synced observation must not swap again.
    manager
        .cancel_subscription(SubscriptionKey::ChannelGraph)
        .await
        .expect("cancel graph");
    manager
        .subscribe(&[SubscriptionKey::Info])
        .await
        .expect("re-subscribe info");
    assert!(mock.push_info(true).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let active = manager.active_subscriptions();
    assert!(active.contains(&SubscriptionKey::Info));
    assert!(!active.contains(&SubscriptionKey::ChannelGraph));
}

#[tokio::test]
async fn disconnect_without_connection_is_a_noop() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());

    manager.disconnect().await.expect("disconnect");
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.active_subscriptions().is_empty());
    assert_eq!(mock.disconnects(), 0);
}

#[tokio::test]
async fn disconnect_drains_subscriptions_and_resets_registries() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");
    assert_eq!(manager.active_subscriptions().len(), 3);

    manager.disconnect().await.expect("disconnect");
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.active_subscriptions().is_empty());
    assert!(manager.service().is_none());
    assert_eq!(mock.disconnects(), 1);

    // A fresh connect works against the reset registries.
    manager.connect(options()).await.expect("reconnect");
    assert_eq!(manager.state(), ConnectionState::Active);
    assert_eq!(manager.active_subscriptions().len(), 3);
}

#[tokio::test]
async fn wait_for_state_resolves_on_transition() {
    let manager = Arc::new(NodeManager::new(MockLightning::unlocked()));
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.wait_for_state(&[ConnectionState::Active]).await })
    };

    manager.connect(options()).await.expect("connect");
    let state = waiter.await.expect("join");
    assert_eq!(state, ConnectionState::Active);

    // Already at the target: resolves immediately.
    assert_eq!(
        manager.wait_for_state(&[ConnectionState::Active]).await,
        ConnectionState::Active
    );
}

#[tokio::test]
async fn composed_helpers_validate_and_compose() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");
    let service = manager.service().expect("service");

    let balances = service.balances().await.expect("balances");
    assert_eq!(balances.wallet.total_balance, 1_500);
    assert_eq!(balances.channel.balance, 250);

    assert!(service.create_invoice(None, 0).await.is_err());
    let invoice = service
        .create_invoice(Some("coffee"), 2_500)
        .await
        .expect("invoice");
    assert_eq!(invoice.payment_request, "lnbc2500");

    assert!(service.ensure_peer("", PEER_HOST).await.is_err());

    mock.add_peer(PEER_PUBKEY);
    service
        .ensure_peer(PEER_PUBKEY, PEER_HOST)
        .await
        .expect("known peer");
    assert_eq!(mock.connect_peer_calls(), 0);

    service
        .ensure_peer("03deadbeef", PEER_HOST)
        .await
        .expect("new peer");
    assert_eq!(mock.connect_peer_calls(), 1);
}

#[tokio::test]
async fn remote_end_signal_removes_table_entry() {
    let mock = MockLightning::unlocked();
    let manager = NodeManager::new(mock.clone());
    manager.connect(options()).await.expect("connect");

    assert!(
        mock.push(SubscriptionKey::Transactions, StreamEventBody::End)
            .await
    );
    wait_until(|| {
        !manager
            .active_subscriptions()
            .contains(&SubscriptionKey::Transactions)
    })
    .await;

    // Other streams are untouched.
    assert!(manager
        .active_subscriptions()
        .contains(&SubscriptionKey::Invoices));
}

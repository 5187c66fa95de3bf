//! Decorator over the raw remote-method group.
//!
//! Holds a reference to the raw [`LightningRpc`] and exposes both the raw
//! calls and a few composed helpers through one interface. Rebuilt on every
//! connect; no state of its own beyond the wrapped handle.

use std::sync::Arc;

use tracing::debug;

use crate::{
    proto::lnrpc,
    rpc::{LightningRpc, RpcError, StreamHandle},
    subscriptions::SubscriptionKey,
};

/// Combined on-chain and channel balances.
#[derive(Clone, Debug, PartialEq)]
pub struct Balances {
    pub wallet: lnrpc::WalletBalanceResponse,
    pub channel: lnrpc::ChannelBalanceResponse,
}

pub struct LightningService<R: LightningRpc> {
    rpc: Arc<R>,
}

impl<R: LightningRpc> LightningService<R> {
    pub fn new(rpc: Arc<R>) -> Self {
        Self { rpc }
    }

    /// The raw remote-method group, for calls without a composed wrapper.
    #[must_use]
    pub fn raw(&self) -> &R {
        &self.rpc
    }

    /// Fetch wallet and channel balances together.
    ///
    /// # Errors
    /// Returns the first failing balance call.
    pub async fn balances(&self) -> Result<Balances, RpcError> {
        let (wallet, channel) =
            tokio::join!(self.rpc.wallet_balance(), self.rpc.channel_balance());
        Ok(Balances {
            wallet: wallet?,
            channel: channel?,
        })
    }

    /// Connect to a peer unless a connection to it already exists.
    ///
    /// # Errors
    /// Rejects empty pubkey/host before touching the network; otherwise
    /// surfaces the underlying RPC failure.
    pub async fn ensure_peer(&self, pubkey: &str, host: &str) -> Result<(), RpcError> {
        if pubkey.is_empty() {
            return Err(RpcError::invalid_argument("peer pubkey is required"));
        }
        if host.is_empty() {
            return Err(RpcError::invalid_argument("peer host is required"));
        }
        let peers = self.rpc.list_peers().await?;
        if peers.peers.iter().any(|peer| peer.pub_key == pubkey) {
            debug!(target: "lnd_conn::service", %pubkey, "peer already connected");
            return Ok(());
        }
        self.rpc
            .connect_peer(lnrpc::ConnectPeerRequest {
                addr: Some(lnrpc::LightningAddress {
                    pubkey: pubkey.to_string(),
                    host: host.to_string(),
                }),
                perm: false,
            })
            .await?;
        Ok(())
    }

    /// Create an invoice with argument validation and a defaulted memo.
    ///
    /// # Errors
    /// Rejects non-positive amounts; otherwise surfaces the RPC failure.
    pub async fn create_invoice(
        &self,
        memo: Option<&str>,
        value_sat: i64,
    ) -> Result<lnrpc::AddInvoiceResponse, RpcError> {
        if value_sat <= 0 {
            return Err(RpcError::invalid_argument("invoice value must be positive"));
        }
        let invoice = lnrpc::Invoice {
            memo: memo.unwrap_or_default().to_string(),
            value: value_sat,
            ..Default::default()
        };
        self.rpc.add_invoice(invoice).await
    }

    /// Open the server stream for a subscription key.
    ///
    /// # Errors
    /// Surfaces the underlying stream-opening failure.
    pub async fn open_subscription(
        &self,
        key: SubscriptionKey,
    ) -> Result<StreamHandle, RpcError> {
        debug!(target: "lnd_conn::service", %key, method = key.method_name(), "opening stream");
        self.rpc.open_stream(key).await
    }
}

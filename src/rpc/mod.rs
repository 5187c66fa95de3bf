//! The remote-method seam between the manager and a concrete LND transport.
//!
//! [`LightningRpc`] covers the unary calls and stream openings the crate
//! needs; [`grpc::GrpcLightning`] is the tonic-backed implementation and tests
//! provide mocks. Streams surface as [`StreamHandle`]s: a receiver of
//! data/status/end events plus a [`CancelHandle`] for transport-level cancel.

use std::{borrow::Cow, error::Error, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tonic::Code;

use crate::{config::ConnectOptions, proto::lnrpc, subscriptions::SubscriptionKey};

pub mod grpc;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{context}")]
    Connection {
        context: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },
    #[error(transparent)]
    Status(#[from] Box<tonic::Status>),
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    #[error("not connected")]
    NotConnected,
}

impl RpcError {
    /// Build a connection error with context and source.
    pub fn connection<S, E>(context: S, source: E) -> Self
    where
        S: Into<Cow<'static, str>>,
        E: Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build a connection error that only has context (no underlying source).
    pub fn connection_message<S>(context: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        Self::Connection {
            context: context.into(),
            source: None,
        }
    }

    pub fn invalid_argument<S>(context: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        Self::InvalidArgument(context.into())
    }
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        Self::Status(Box::new(status))
    }
}

/// Readiness of the remote wallet as observed at connect time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletState {
    /// Only the unlocker service answers; the wallet needs a password.
    Locked,
    /// The full lightning service is available.
    Unlocked,
}

/// Payload of a stream data event, tagged by the originating subscription.
#[derive(Clone, Debug)]
pub enum StreamPayload {
    Invoice(lnrpc::Invoice),
    Transaction(lnrpc::Transaction),
    GraphUpdate(lnrpc::GraphTopologyUpdate),
    Info(lnrpc::GetInfoResponse),
}

/// One event produced by an open server stream.
#[derive(Clone, Debug)]
pub enum StreamEventBody {
    Data(StreamPayload),
    Status(Code),
    End,
}

/// Requests transport-level cancellation of the stream it belongs to.
///
/// Cancelling is a request, not a confirmation: the stream is gone only once
/// its handle yields a terminal event (CANCELLED status or end).
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Producer side of a [`StreamHandle`], held by the transport driver.
pub struct StreamSender {
    pub events: mpsc::Sender<StreamEventBody>,
    pub cancel_requested: watch::Receiver<bool>,
}

/// An open server-streaming call: a sequence of data events terminated by a
/// status and/or end event, plus the cancel handle for it.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEventBody>,
    cancel: CancelHandle,
}

impl StreamHandle {
    /// Create a connected producer/consumer pair for one stream.
    #[must_use]
    pub fn channel(buffer: usize) -> (StreamSender, StreamHandle) {
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            StreamSender {
                events: events_tx,
                cancel_requested: cancel_rx,
            },
            StreamHandle {
                events: events_rx,
                cancel: CancelHandle {
                    tx: Arc::new(cancel_tx),
                },
            },
        )
    }

    /// Split into the event receiver and the cancel handle.
    #[must_use]
    pub fn split(self) -> (mpsc::Receiver<StreamEventBody>, CancelHandle) {
        (self.events, self.cancel)
    }
}

/// Remote methods of the Lightning daemon used by this crate.
///
/// Implementations use interior mutability so the trait can be shared behind
/// an `Arc` across the manager and its spawned tasks.
#[async_trait]
pub trait LightningRpc: Send + Sync + 'static {
    /// Establish the transport for the given options.
    async fn connect(&self, options: &ConnectOptions) -> Result<(), RpcError>;

    /// Tear down the transport. Best-effort; idempotent.
    async fn disconnect(&self) -> Result<(), RpcError>;

    /// Probe whether the wallet is locked or serving the lightning service.
    async fn wallet_state(&self) -> Result<WalletState, RpcError>;

    /// Unlock the wallet with the given password.
    async fn unlock_wallet(&self, password: &[u8]) -> Result<(), RpcError>;

    async fn get_info(&self) -> Result<lnrpc::GetInfoResponse, RpcError>;

    async fn wallet_balance(&self) -> Result<lnrpc::WalletBalanceResponse, RpcError>;

    async fn channel_balance(&self) -> Result<lnrpc::ChannelBalanceResponse, RpcError>;

    async fn list_peers(&self) -> Result<lnrpc::ListPeersResponse, RpcError>;

    async fn connect_peer(
        &self,
        request: lnrpc::ConnectPeerRequest,
    ) -> Result<lnrpc::ConnectPeerResponse, RpcError>;

    async fn add_invoice(
        &self,
        invoice: lnrpc::Invoice,
    ) -> Result<lnrpc::AddInvoiceResponse, RpcError>;

    /// Open the server stream bound to `key`.
    async fn open_stream(&self, key: SubscriptionKey) -> Result<StreamHandle, RpcError>;
}

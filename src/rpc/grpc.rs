//! Tonic-backed [`LightningRpc`] implementation.
//!
//! Dials the daemon over TLS gRPC, attaches the hex-encoded macaroon as
//! per-request metadata, and issues calls through `tonic::client::Grpc`
//! against hand-maintained prost types (no generated client). Server streams
//! are driven by a spawned task per stream that translates tonic messages and
//! cancel requests into [`StreamHandle`] events.

use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    metadata::MetadataValue,
    service::{interceptor::InterceptedService, Interceptor},
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
    Code, Request, Status, Streaming,
};
use tracing::{debug, trace, warn};

use super::{
    LightningRpc, RpcError, StreamEventBody, StreamHandle, StreamPayload, StreamSender, WalletState,
};
use crate::{
    config::{wait_for_file, ConnectOptions, DEFAULT_FILE_WAIT_TIMEOUT},
    proto::lnrpc,
    subscriptions::SubscriptionKey,
};

const GET_INFO_PATH: &str = "/lnrpc.Lightning/GetInfo";
const WALLET_BALANCE_PATH: &str = "/lnrpc.Lightning/WalletBalance";
const CHANNEL_BALANCE_PATH: &str = "/lnrpc.Lightning/ChannelBalance";
const LIST_PEERS_PATH: &str = "/lnrpc.Lightning/ListPeers";
const CONNECT_PEER_PATH: &str = "/lnrpc.Lightning/ConnectPeer";
const ADD_INVOICE_PATH: &str = "/lnrpc.Lightning/AddInvoice";
const SUBSCRIBE_INVOICES_PATH: &str = "/lnrpc.Lightning/SubscribeInvoices";
const SUBSCRIBE_TRANSACTIONS_PATH: &str = "/lnrpc.Lightning/SubscribeTransactions";
const SUBSCRIBE_CHANNEL_GRAPH_PATH: &str = "/lnrpc.Lightning/SubscribeChannelGraph";
const UNLOCK_WALLET_PATH: &str = "/lnrpc.WalletUnlocker/UnlockWallet";

const STREAM_BUFFER: usize = 64;
const DEFAULT_INFO_POLL_INTERVAL: Duration = Duration::from_secs(30);

type LndSvc = InterceptedService<Channel, MacaroonInterceptor>;

/// Attaches the hex-encoded macaroon to every outgoing request.
#[derive(Clone)]
pub struct MacaroonInterceptor {
    macaroon_hex: Option<String>,
}

impl Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        if let Some(hex) = &self.macaroon_hex {
            let value = MetadataValue::try_from(hex.as_str())
                .map_err(|e| Status::internal(e.to_string()))?;
            req.metadata_mut().insert("macaroon", value);
        }
        Ok(req)
    }
}

/// Direct TLS gRPC connection to an `lnd` daemon.
pub struct GrpcLightning {
    channel: Mutex<Option<Channel>>,
    macaroon_hex: Mutex<Option<String>>,
    info_poll_interval: Duration,
}

impl Default for GrpcLightning {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcLightning {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: Mutex::new(None),
            macaroon_hex: Mutex::new(None),
            info_poll_interval: DEFAULT_INFO_POLL_INTERVAL,
        }
    }

    /// Override the polling cadence of the info pseudo-stream.
    #[must_use]
    pub fn with_info_poll_interval(mut self, interval: Duration) -> Self {
        self.info_poll_interval = interval;
        self
    }

    fn intercepted(&self) -> Result<LndSvc, RpcError> {
        let channel = self.channel.lock().clone().ok_or(RpcError::NotConnected)?;
        let interceptor = MacaroonInterceptor {
            macaroon_hex: self.macaroon_hex.lock().clone(),
        };
        Ok(InterceptedService::new(channel, interceptor))
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, RpcError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = Grpc::new(self.intercepted()?);
        grpc.ready()
            .await
            .map_err(|e| RpcError::connection_message(format!("grpc service not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(RpcError::from)?;
        Ok(response.into_inner())
    }

    async fn server_stream<Req, Resp, F>(
        &self,
        key: SubscriptionKey,
        path: &'static str,
        request: Req,
        map: F,
    ) -> Result<StreamHandle, RpcError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
        F: Fn(Resp) -> StreamPayload + Send + 'static,
    {
        let mut grpc = Grpc::new(self.intercepted()?);
        grpc.ready()
            .await
            .map_err(|e| RpcError::connection_message(format!("grpc service not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let streaming = grpc
            .server_streaming(
                Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(RpcError::from)?
            .into_inner();
        let (sender, handle) = StreamHandle::channel(STREAM_BUFFER);
        tokio::spawn(drive_stream(key, streaming, sender, map));
        Ok(handle)
    }

    /// The remote service has no info stream; poll `GetInfo` behind the same
    /// stream interface so the subscription machinery treats it uniformly.
    fn open_info_stream(&self) -> Result<StreamHandle, RpcError> {
        let svc = self.intercepted()?;
        let interval = self.info_poll_interval;
        let (sender, handle) = StreamHandle::channel(STREAM_BUFFER);
        tokio::spawn(drive_info_stream(svc, interval, sender));
        Ok(handle)
    }
}

#[async_trait]
impl LightningRpc for GrpcLightning {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), RpcError> {
        let settings = options.settings();
        debug!(
            target: "lnd_conn::grpc",
            id = %options.id,
            host = %options.host,
            use_macaroon = settings.use_macaroon,
            "dialing lnd"
        );
        if let Some(proto_path) = &options.proto_path {
            trace!(target: "lnd_conn::grpc", path = %proto_path.display(), "descriptor source configured");
        }

        if settings.wait_for_cert {
            if let Some(cert) = &options.cert {
                wait_for_file(cert, DEFAULT_FILE_WAIT_TIMEOUT)
                    .await
                    .map_err(|e| RpcError::connection("tls certificate not ready", e))?;
            }
        }
        if settings.wait_for_macaroon {
            if let Some(macaroon) = &options.macaroon {
                wait_for_file(macaroon, DEFAULT_FILE_WAIT_TIMEOUT)
                    .await
                    .map_err(|e| RpcError::connection("macaroon not ready", e))?;
            }
        }

        let mut endpoint = Endpoint::from_shared(options.host.clone())
            .map_err(|e| RpcError::connection("invalid gRPC endpoint", e))?;
        if let Some(cert) = &options.cert {
            let pem = tokio::fs::read(cert)
                .await
                .map_err(|e| RpcError::connection("failed to read tls certificate", e))?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| RpcError::connection("invalid TLS client config", e))?;
        }

        let macaroon_hex = if settings.use_macaroon {
            match &options.macaroon {
                Some(macaroon) => {
                    let raw = tokio::fs::read(macaroon)
                        .await
                        .map_err(|e| RpcError::connection("failed to read macaroon", e))?;
                    Some(hex::encode(raw))
                }
                None => None,
            }
        } else {
            None
        };

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| RpcError::connection("lnd dial failed", e))?;

        *self.channel.lock() = Some(channel);
        *self.macaroon_hex.lock() = macaroon_hex;
        debug!(target: "lnd_conn::grpc", "transport established");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        // Dropping the channel closes outstanding HTTP/2 streams.
        self.channel.lock().take();
        self.macaroon_hex.lock().take();
        debug!(target: "lnd_conn::grpc", "transport released");
        Ok(())
    }

    async fn wallet_state(&self) -> Result<WalletState, RpcError> {
        wallet_state_from_probe(self.get_info().await)
    }

    async fn unlock_wallet(&self, password: &[u8]) -> Result<(), RpcError> {
        let request = lnrpc::UnlockWalletRequest {
            wallet_password: password.to_vec(),
            recovery_window: 0,
        };
        let _: lnrpc::UnlockWalletResponse = self.unary(UNLOCK_WALLET_PATH, request).await?;
        Ok(())
    }

    async fn get_info(&self) -> Result<lnrpc::GetInfoResponse, RpcError> {
        self.unary(GET_INFO_PATH, lnrpc::GetInfoRequest {}).await
    }

    async fn wallet_balance(&self) -> Result<lnrpc::WalletBalanceResponse, RpcError> {
        self.unary(WALLET_BALANCE_PATH, lnrpc::WalletBalanceRequest {})
            .await
    }

    async fn channel_balance(&self) -> Result<lnrpc::ChannelBalanceResponse, RpcError> {
        self.unary(CHANNEL_BALANCE_PATH, lnrpc::ChannelBalanceRequest {})
            .await
    }

    async fn list_peers(&self) -> Result<lnrpc::ListPeersResponse, RpcError> {
        self.unary(LIST_PEERS_PATH, lnrpc::ListPeersRequest {})
            .await
    }

    async fn connect_peer(
        &self,
        request: lnrpc::ConnectPeerRequest,
    ) -> Result<lnrpc::ConnectPeerResponse, RpcError> {
        self.unary(CONNECT_PEER_PATH, request).await
    }

    async fn add_invoice(
        &self,
        invoice: lnrpc::Invoice,
    ) -> Result<lnrpc::AddInvoiceResponse, RpcError> {
        self.unary(ADD_INVOICE_PATH, invoice).await
    }

    async fn open_stream(&self, key: SubscriptionKey) -> Result<StreamHandle, RpcError> {
        match key {
            SubscriptionKey::Invoices => {
                self.server_stream(
                    key,
                    SUBSCRIBE_INVOICES_PATH,
                    lnrpc::InvoiceSubscription::default(),
                    StreamPayload::Invoice,
                )
                .await
            }
            SubscriptionKey::Transactions => {
                self.server_stream(
                    key,
                    SUBSCRIBE_TRANSACTIONS_PATH,
                    lnrpc::GetTransactionsRequest {},
                    StreamPayload::Transaction,
                )
                .await
            }
            SubscriptionKey::ChannelGraph => {
                self.server_stream(
                    key,
                    SUBSCRIBE_CHANNEL_GRAPH_PATH,
                    lnrpc::GraphTopologySubscription {},
                    StreamPayload::GraphUpdate,
                )
                .await
            }
            SubscriptionKey::Info => self.open_info_stream(),
        }
    }
}

/// Map a `GetInfo` probe result to the wallet readiness phase.
///
/// A locked daemon serves only the unlocker service and answers lightning
/// calls with `UNIMPLEMENTED`.
fn wallet_state_from_probe(
    probe: Result<lnrpc::GetInfoResponse, RpcError>,
) -> Result<WalletState, RpcError> {
    match probe {
        Ok(_) => Ok(WalletState::Unlocked),
        Err(RpcError::Status(status)) if status.code() == Code::Unimplemented => {
            Ok(WalletState::Locked)
        }
        Err(e) => Err(e),
    }
}

async fn drive_stream<Resp, F>(
    key: SubscriptionKey,
    mut streaming: Streaming<Resp>,
    sender: StreamSender,
    map: F,
) where
    Resp: prost::Message + Default + Send + Sync + 'static,
    F: Fn(Resp) -> StreamPayload + Send + 'static,
{
    let StreamSender {
        events,
        mut cancel_requested,
    } = sender;
    trace!(target: "lnd_conn::grpc", %key, "stream driver started");
    loop {
        tokio::select! {
            changed = cancel_requested.changed() => {
                if changed.is_err() || *cancel_requested.borrow() {
                    // Dropping the tonic stream sends RST_STREAM; confirm the
                    // cancellation to the subscription table.
                    drop(streaming);
                    let _ = events.send(StreamEventBody::Status(Code::Cancelled)).await;
                    trace!(target: "lnd_conn::grpc", %key, "stream cancelled");
                    break;
                }
            }
            message = streaming.message() => match message {
                Ok(Some(item)) => {
                    if events.send(StreamEventBody::Data(map(item))).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = events.send(StreamEventBody::End).await;
                    trace!(target: "lnd_conn::grpc", %key, "stream ended");
                    break;
                }
                Err(status) => {
                    let code = status.code();
                    warn!(target: "lnd_conn::grpc", %key, %status, "stream terminated with status");
                    let _ = events.send(StreamEventBody::Status(code)).await;
                    if code != Code::Cancelled {
                        let _ = events.send(StreamEventBody::End).await;
                    }
                    break;
                }
            },
        }
    }
}

async fn drive_info_stream(svc: LndSvc, interval: Duration, sender: StreamSender) {
    let StreamSender {
        events,
        mut cancel_requested,
    } = sender;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = cancel_requested.changed() => {
                if changed.is_err() || *cancel_requested.borrow() {
                    let _ = events.send(StreamEventBody::Status(Code::Cancelled)).await;
                    break;
                }
            }
            _ = ticker.tick() => match poll_info(svc.clone()).await {
                Ok(info) => {
                    if events
                        .send(StreamEventBody::Data(StreamPayload::Info(info)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(status) => {
                    warn!(target: "lnd_conn::grpc", %status, "info poll failed");
                    let _ = events.send(StreamEventBody::Status(status.code())).await;
                    let _ = events.send(StreamEventBody::End).await;
                    break;
                }
            },
        }
    }
}

async fn poll_info(svc: LndSvc) -> Result<lnrpc::GetInfoResponse, Status> {
    let mut grpc = Grpc::new(svc);
    grpc.ready()
        .await
        .map_err(|e| Status::unknown(format!("grpc service not ready: {e}")))?;
    let codec: ProstCodec<lnrpc::GetInfoRequest, lnrpc::GetInfoResponse> = ProstCodec::default();
    let response = grpc
        .unary(
            Request::new(lnrpc::GetInfoRequest {}),
            PathAndQuery::from_static(GET_INFO_PATH),
            codec,
        )
        .await?;
    Ok(response.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_success_is_unlocked() {
        let state = wallet_state_from_probe(Ok(lnrpc::GetInfoResponse::default())).unwrap();
        assert_eq!(state, WalletState::Unlocked);
    }

    #[test]
    fn probe_unimplemented_is_locked() {
        let err = RpcError::from(Status::unimplemented("unknown service lnrpc.Lightning"));
        let state = wallet_state_from_probe(Err(err)).unwrap();
        assert_eq!(state, WalletState::Locked);
    }

    #[test]
    fn probe_other_status_propagates() {
        let err = RpcError::from(Status::unavailable("connection refused"));
        assert!(wallet_state_from_probe(Err(err)).is_err());
    }
}

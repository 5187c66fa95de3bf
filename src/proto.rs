//! Hand-maintained prost types for the slice of `lnrpc` this crate touches.
//!
//! Field numbers follow the upstream `lightning.proto` / `walletunlocker.proto`
//! definitions so the wire format matches a real daemon. Kept by hand instead
//! of a tonic-build step so no protoc is needed at build time; extend here when
//! new methods are wired through [`crate::rpc::LightningRpc`].

pub mod lnrpc {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct GetInfoRequest {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct GetInfoResponse {
        #[prost(string, tag = "1")]
        pub identity_pubkey: String,
        #[prost(string, tag = "2")]
        pub alias: String,
        #[prost(uint32, tag = "3")]
        pub num_pending_channels: u32,
        #[prost(uint32, tag = "4")]
        pub num_active_channels: u32,
        #[prost(uint32, tag = "5")]
        pub num_peers: u32,
        #[prost(uint32, tag = "6")]
        pub block_height: u32,
        #[prost(string, tag = "8")]
        pub block_hash: String,
        #[prost(bool, tag = "9")]
        pub synced_to_chain: bool,
        #[prost(bool, tag = "10")]
        pub testnet: bool,
        #[prost(int64, tag = "13")]
        pub best_header_timestamp: i64,
        #[prost(string, tag = "14")]
        pub version: String,
        #[prost(bool, tag = "18")]
        pub synced_to_graph: bool,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct WalletBalanceRequest {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct WalletBalanceResponse {
        #[prost(int64, tag = "1")]
        pub total_balance: i64,
        #[prost(int64, tag = "2")]
        pub confirmed_balance: i64,
        #[prost(int64, tag = "3")]
        pub unconfirmed_balance: i64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ChannelBalanceRequest {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ChannelBalanceResponse {
        #[prost(int64, tag = "1")]
        pub balance: i64,
        #[prost(int64, tag = "2")]
        pub pending_open_balance: i64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ListPeersRequest {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct Peer {
        #[prost(string, tag = "1")]
        pub pub_key: String,
        #[prost(string, tag = "3")]
        pub address: String,
        #[prost(uint64, tag = "4")]
        pub bytes_sent: u64,
        #[prost(uint64, tag = "5")]
        pub bytes_recv: u64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ListPeersResponse {
        #[prost(message, repeated, tag = "1")]
        pub peers: Vec<Peer>,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct LightningAddress {
        #[prost(string, tag = "1")]
        pub pubkey: String,
        #[prost(string, tag = "2")]
        pub host: String,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ConnectPeerRequest {
        #[prost(message, optional, tag = "1")]
        pub addr: Option<LightningAddress>,
        #[prost(bool, tag = "2")]
        pub perm: bool,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ConnectPeerResponse {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct Invoice {
        #[prost(string, tag = "1")]
        pub memo: String,
        #[prost(bytes = "vec", tag = "3")]
        pub r_preimage: Vec<u8>,
        #[prost(bytes = "vec", tag = "4")]
        pub r_hash: Vec<u8>,
        #[prost(int64, tag = "5")]
        pub value: i64,
        #[prost(bool, tag = "6")]
        pub settled: bool,
        #[prost(int64, tag = "7")]
        pub creation_date: i64,
        #[prost(int64, tag = "8")]
        pub settle_date: i64,
        #[prost(string, tag = "9")]
        pub payment_request: String,
        #[prost(uint64, tag = "16")]
        pub add_index: u64,
        #[prost(uint64, tag = "17")]
        pub settle_index: u64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct AddInvoiceResponse {
        #[prost(bytes = "vec", tag = "1")]
        pub r_hash: Vec<u8>,
        #[prost(string, tag = "2")]
        pub payment_request: String,
        #[prost(uint64, tag = "16")]
        pub add_index: u64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct InvoiceSubscription {
        #[prost(uint64, tag = "1")]
        pub add_index: u64,
        #[prost(uint64, tag = "2")]
        pub settle_index: u64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct GetTransactionsRequest {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct Transaction {
        #[prost(string, tag = "1")]
        pub tx_hash: String,
        #[prost(int64, tag = "2")]
        pub amount: i64,
        #[prost(int32, tag = "3")]
        pub num_confirmations: i32,
        #[prost(string, tag = "4")]
        pub block_hash: String,
        #[prost(int32, tag = "5")]
        pub block_height: i32,
        #[prost(int64, tag = "6")]
        pub time_stamp: i64,
        #[prost(int64, tag = "7")]
        pub total_fees: i64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct GraphTopologySubscription {}

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct NodeUpdate {
        #[prost(string, tag = "2")]
        pub identity_key: String,
        #[prost(string, tag = "4")]
        pub alias: String,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ChannelEdgeUpdate {
        #[prost(uint64, tag = "2")]
        pub chan_id: u64,
        #[prost(int64, tag = "4")]
        pub capacity: i64,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct ClosedChannelUpdate {
        #[prost(uint64, tag = "1")]
        pub chan_id: u64,
        #[prost(int64, tag = "2")]
        pub capacity: i64,
        #[prost(uint32, tag = "3")]
        pub closed_height: u32,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct GraphTopologyUpdate {
        #[prost(message, repeated, tag = "1")]
        pub node_updates: Vec<NodeUpdate>,
        #[prost(message, repeated, tag = "2")]
        pub channel_updates: Vec<ChannelEdgeUpdate>,
        #[prost(message, repeated, tag = "3")]
        pub closed_chans: Vec<ClosedChannelUpdate>,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct UnlockWalletRequest {
        #[prost(bytes = "vec", tag = "1")]
        pub wallet_password: Vec<u8>,
        #[prost(int32, tag = "2")]
        pub recovery_window: i32,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    pub struct UnlockWalletResponse {}
}

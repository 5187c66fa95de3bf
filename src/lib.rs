#![deny(unsafe_code)]

//! Connection and subscription lifecycle manager for LND.
//!
//! Sits between an application and a remote `lnd` daemon: establishes the gRPC
//! connection, drives it through the daemon's readiness phases (wallet locked,
//! unlocked, services active), manages a fixed set of server-streaming
//! subscriptions, and fans every stream event out on a typed event bus.
//!
//! The entry point is [`manager::NodeManager`], an explicitly owned instance
//! (no process-wide singleton) generic over the [`rpc::LightningRpc`] seam.
//! The tonic-backed implementation is [`rpc::grpc::GrpcLightning`]; tests
//! substitute a mock.
//!
//! Example
//! ```no_run
//! use lnd_conn::{ConnectOptions, ConnectionType, NodeManager};
//! use lnd_conn::rpc::grpc::GrpcLightning;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ConnectOptions::new(
//!     "default",
//!     ConnectionType::Local,
//!     "https://127.0.0.1:10009",
//! );
//! let manager = NodeManager::new(GrpcLightning::new());
//! let mut events = manager.events().subscribe();
//! manager.connect(options).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! manager.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod forward;
pub mod gate;
pub mod manager;
pub mod proto;
pub mod rpc;
pub mod service;
pub mod subscriptions;

pub use config::{ConnectOptions, ConnectionSettings, ConnectionType};
pub use events::{EventBus, EventKind, NodeEvent, StreamEventName};
pub use gate::SyncGate;
pub use manager::{ConnectionState, LndError, NodeManager, Result};
pub use rpc::{LightningRpc, RpcError, StreamEventBody, StreamHandle, StreamPayload, WalletState};
pub use service::LightningService;
pub use subscriptions::SubscriptionKey;

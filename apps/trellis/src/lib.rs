//! Server-driven UI state synchronization.
//!
//! The server keeps a tree of connectors, each with a shared state object and
//! a set of RPC interfaces. Every client round-trip applies the client's RPC
//! batch, then encodes only what changed since the last round and flushes the
//! queued server-to-client calls. The client half ([`client::ClientProjection`])
//! rebuilds the tree from those deltas using a bundle-loaded metadata table
//! instead of runtime reflection.

pub mod client;
pub mod config;
pub mod data;
pub mod demo;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod tracker;

pub use identity::ConnectorId;
pub use session::{Session, UiSession};
pub use state::{StateObject, StateValue};

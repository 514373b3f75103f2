//!
//! Chain node access.
//!
//! `ChainConnector` is the read-only boundary the engine syncs through; `RpcChainClient` implements
//! it over the node's JSON-RPC interface.

pub mod client;
pub mod types;

pub use client::RpcChainClient;
pub use types::*;

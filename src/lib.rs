//! Incremental sync engine for a decentralized exchange.
//!
//! Scans the chain for exchange and token-registry events and projects them into a queryable local
//! store: markets, order book, trades, deposits and withdrawals, OHLCV candles, market statistics
//! and wallet balances.

pub mod chain;
pub mod config;
pub mod decoder;
pub mod publisher;
pub mod queries;
pub mod store;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

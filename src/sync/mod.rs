//!
//! Synchronization engine for the exchange's on-chain state.
//!
//! This module scans the chain block batch by block batch and projects exchange events into the
//! local store. It is organized into:
//!
//! - `orchestrator`: the sync cycle and run loop
//! - `events`: projector trait and the dispatcher that fetches and decodes logs per event family
//! - `projectors`: per-family projection of listings, orders, fund redeems and trades
//! - `charts`: multi-timeframe OHLCV candles
//! - `market_stats`: 24h market statistics
//! - `reconciler`: moves client-submitted PENDING records to a terminal status
//! - `balances`: wallet and exchange balance snapshot per wallet address
//! - `progress_tracker`: per-cycle progress and sync percentage

pub mod balances;
pub mod charts;
pub mod events;
pub mod market_stats;
pub mod orchestrator;
pub mod progress_tracker;
pub mod projectors;
pub mod reconciler;
pub mod types;

pub use balances::{AddressBalance, BalanceAggregator};
pub use charts::ChartAggregator;
pub use events::{EventProjector, ProjectorDispatcher};
pub use market_stats::MarketStatsAggregator;
pub use orchestrator::{StatusHandle, SyncOrchestrator};
pub use progress_tracker::{SyncProgressTracker, SyncStats, SyncStatusSnapshot};
pub use projectors::ProjectionContext;
pub use reconciler::PendingStateReconciler;
pub use types::SyncError;

//! Sync orchestrator and integration point for all sync services.
//!
//! This module defines the `SyncOrchestrator`, which coordinates every component involved in
//! keeping the local store in step with the chain. Each cycle it reads the chain height, scans the
//! blocks after the last checkpoint in fixed-size batches and, per batch:
//!
//! - reconciles client-submitted PENDING records
//! - projects the batch's exchange events (listings, fund redeems, orders, closes, trades)
//! - recomputes market statistics
//! - records every scanned block, which advances the checkpoint
//!
//! After the last batch it publishes the sync status (with the balance snapshot), fills idle
//! candles up to now and persists the store. A failure before a batch's blocks are written leaves
//! the checkpoint where it was, so the next cycle rescans that batch.

use crate::chain::ChainConnector;
use crate::config::EngineConfig;
use crate::decoder::EventDecoder;
use crate::publisher::{Notification, Publisher};
use crate::store::{BlockRow, LocalStore, MemoryStore, StatePersistenceService};
use crate::sync::progress_tracker::{calculate_sync_percent, peer_highest_synced_header};
use crate::sync::projectors::{
    FundRedeemProjector, ListingProjector, NewOrderProjector, OrderClosedProjector, TradeProjector,
};
use crate::sync::{
    BalanceAggregator, ChartAggregator, MarketStatsAggregator, PendingStateReconciler,
    ProjectionContext, ProjectorDispatcher, SyncError, SyncProgressTracker, SyncStats,
    SyncStatusSnapshot,
};
use crate::utils::unix_now;

use futures::{StreamExt, stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

/// Latest published sync status, shared with query callers.
pub type StatusHandle = Arc<RwLock<Option<SyncStatusSnapshot>>>;

/// Main orchestrator that runs sync cycles.
pub struct SyncOrchestrator {
    chain: Arc<dyn ChainConnector>,
    store: Arc<dyn LocalStore>,
    publisher: Arc<dyn Publisher>,
    config: Arc<EngineConfig>,

    // Services
    dispatcher: ProjectorDispatcher,
    reconciler: PendingStateReconciler,
    market_stats: MarketStatsAggregator,
    charts: Arc<ChartAggregator>,
    balances: BalanceAggregator,

    // Persistence of the in-memory store, when enabled
    persistence: Option<(Arc<StatePersistenceService>, Arc<MemoryStore>)>,

    status: StatusHandle,
}

impl SyncOrchestrator {
    /// Create an orchestrator with every projector registered in family order.
    pub fn new(
        chain: Arc<dyn ChainConnector>,
        store: Arc<dyn LocalStore>,
        publisher: Arc<dyn Publisher>,
        decoder: Arc<dyn EventDecoder>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let ctx = ProjectionContext::new(store.clone(), publisher.clone(), config.clone());
        let charts = Arc::new(ChartAggregator::new(store.clone(), publisher.clone()));

        let mut dispatcher =
            ProjectorDispatcher::new(chain.clone(), decoder, config.metadata.clone());
        dispatcher.register_projector(Box::new(ListingProjector::new(ctx.clone())));
        dispatcher.register_projector(Box::new(FundRedeemProjector::new(ctx.clone())));
        dispatcher.register_projector(Box::new(NewOrderProjector::new(ctx.clone())));
        dispatcher.register_projector(Box::new(OrderClosedProjector::cancelled(ctx.clone())));
        dispatcher.register_projector(Box::new(OrderClosedProjector::fulfilled(ctx.clone())));
        dispatcher.register_projector(Box::new(TradeProjector::new(ctx, charts.clone())));

        Self {
            reconciler: PendingStateReconciler::new(chain.clone(), store.clone(), config.clone()),
            market_stats: MarketStatsAggregator::new(store.clone()),
            balances: BalanceAggregator::new(chain.clone(), store.clone(), config.clone()),
            chain,
            store,
            publisher,
            config,
            dispatcher,
            charts,
            persistence: None,
            status: Arc::new(RwLock::new(None)),
        }
    }

    /// Save `memory` through `service` at the end of every cycle.
    pub fn with_persistence(
        mut self,
        service: Arc<StatePersistenceService>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        self.persistence = Some((service, memory));
        self
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Run cycles until `shutdown` becomes true.
    ///
    /// Shutdown is only observed between cycles; a running cycle always completes its batches.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting sync loop");
        let delay = Duration::from_secs(self.config.cycle_delay_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(stats) => info!("{}", stats.summary()),
                Err(e) => error!("Sync cycle failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync loop stopped");
    }

    /// Scan every block after the checkpoint up to the current chain height.
    pub async fn run_cycle(&self) -> Result<SyncStats, SyncError> {
        let current_height = self.chain.get_block_count().await?;
        let current_block_time = self.chain.block_time_at(current_height).await?;

        let checkpoint = self.store.checkpoint().await?;
        if let Some(checkpoint) = checkpoint {
            if checkpoint > current_height {
                return Err(SyncError::CheckpointError(format!(
                    "checkpoint {} is ahead of chain height {}",
                    checkpoint, current_height
                )));
            }
        }
        let start_block = checkpoint
            .map_or(0, |checkpoint| checkpoint + 1)
            .max(self.config.metadata.contract_deployed_block);

        let mut progress_tracker = SyncProgressTracker::new(start_block, current_height);
        let batches = block_batches(start_block, current_height, self.config.block_batch_size);
        if !batches.is_empty() {
            info!(
                "Syncing blocks {} to {} in {} batches",
                start_block,
                current_height,
                batches.len()
            );
        }

        for (from_block, to_block) in &batches {
            let (from_block, to_block) = (*from_block, *to_block);

            self.reconciler.reconcile(current_height).await?;
            let events = self.dispatcher.dispatch_batch(from_block, to_block).await?;
            self.market_stats.recompute(unix_now()).await?;

            let rows = self.block_rows(from_block, to_block).await;
            self.store.insert_blocks(rows).await?;

            progress_tracker.record_batch(from_block, to_block, events);
            progress_tracker.log_progress(false);
        }

        if !progress_tracker.is_complete() {
            warn!("Cycle ended below chain height {}", current_height);
        }

        if !batches.is_empty() {
            progress_tracker.log_progress(true);
            let status = self.sync_status(current_height, current_block_time).await;
            self.publisher
                .publish(Notification::SyncStatus(status.clone()));
            *self.status.write().await = Some(status);
        }

        let tokens: Vec<String> = self
            .store
            .list_markets()
            .await?
            .into_iter()
            .filter(|market| market.registered)
            .map(|market| market.address)
            .collect();
        self.charts.update_idle_candles(&tokens, unix_now()).await?;

        if let Some((service, memory)) = &self.persistence {
            match service.save_store(memory).await {
                Ok(height) => info!("Persisted store at height {}", height),
                Err(e) => error!("Failed to persist store: {}", e),
            }
        }

        Ok(progress_tracker.get_stats())
    }

    /// One row per block; blocks whose time cannot be read are recorded without it.
    async fn block_rows(&self, from_block: u64, to_block: u64) -> Vec<BlockRow> {
        let chain = &self.chain;
        stream::iter(from_block..=to_block)
            .map(|block_num| async move {
                let block_time = match chain.block_time_at(block_num).await {
                    Ok(time) => Some(time),
                    Err(e) => {
                        error!("Failed to read block {}: {}", block_num, e);
                        None
                    }
                };
                BlockRow {
                    block_num,
                    block_time,
                }
            })
            .buffered(self.config.address_batch_size.max(1))
            .collect()
            .await
    }

    async fn sync_status(&self, height: u64, block_time: u64) -> SyncStatusSnapshot {
        let peers = self.chain.get_peer_info().await.unwrap_or_else(|e| {
            warn!("Failed to read peer info: {}", e);
            Vec::new()
        });
        let peer_node_count = self.chain.get_connection_count().await.unwrap_or_else(|e| {
            warn!("Failed to read connection count: {}", e);
            0
        });

        let sync_percent = calculate_sync_percent(
            height,
            block_time,
            peer_highest_synced_header(&peers),
            unix_now(),
            self.config.genesis_timestamp,
            self.config.sync_threshold_secs,
        );

        SyncStatusSnapshot {
            sync_block_num: height,
            sync_block_time: block_time,
            sync_percent,
            peer_node_count,
            address_balances: self.balances.snapshot().await,
        }
    }
}

/// Inclusive `[from, to]` ranges of at most `size` blocks covering `[start, end]`.
pub fn block_batches(start: u64, end: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut batches = Vec::new();
    let mut from = start;

    while from <= end {
        let to = from.saturating_add(size - 1).min(end);
        batches.push((from, to));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{EventFamily, ExchangeEvent};
    use crate::store::{OrderFilter, Timeframe, TradeFilter, TxStatus};
    use crate::chain::TransactionReceipt;
    use crate::testing::{
        BASE, FakeChain, TOKEN, TestEngine, listing_event, new_order_event, order_fixture,
        trade_event,
    };
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn orchestrator(engine: &TestEngine) -> SyncOrchestrator {
        engine.orchestrator()
    }

    /// Listing, order 7 (sell 1000 TKN at 1/2) and a 400 TKN fill, all within the last hour.
    fn script_order_and_trade(engine: &TestEngine) -> u64 {
        let now = unix_now();
        let chain = &engine.chain;
        chain.push_event(
            1,
            "tx-list",
            EventFamily::ListingCreated,
            ExchangeEvent::ListingCreated(listing_event("TKN", 8, now - 3_000)),
        );
        chain.push_event(
            2,
            "tx-order",
            EventFamily::NewOrder,
            ExchangeEvent::NewOrder(new_order_event("7", TOKEN, BASE, 1000, 1, 2, now - 2_000)),
        );
        chain.push_event(
            3,
            "tx-trade",
            EventFamily::Trade,
            ExchangeEvent::Trade(trade_event("7", 400, 200, now - 1_000)),
        );
        chain.set_height(10);
        now
    }

    #[test]
    fn batches_cover_the_range_exactly() {
        assert_eq!(block_batches(5, 4, 200), vec![]);
        assert_eq!(block_batches(0, 0, 200), vec![(0, 0)]);
        assert_eq!(
            block_batches(1, 450, 200),
            vec![(1, 200), (201, 400), (401, 450)]
        );
        assert_eq!(block_batches(3, 5, 0), vec![(3, 3), (4, 4), (5, 5)]);
    }

    #[tokio::test]
    async fn order_then_trade_scenario() {
        let engine = TestEngine::new();
        script_order_and_trade(&engine);

        let stats = orchestrator(&engine).run_cycle().await.unwrap();
        assert_eq!(stats.events_projected, 3);
        assert_eq!(stats.highest_processed_block, Some(10));

        let order = engine.store.find_order("7").await.unwrap().unwrap();
        assert_eq!(order.amount, 600);
        assert_eq!(order.status, TxStatus::Active);
        assert_eq!(order.token, "TKN");
        assert_eq!(order.price.to_decimal().unwrap(), Decimal::from_str("0.5").unwrap());

        let trades = engine.store.list_trades(&TradeFilter::default()).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].amount, 400);

        let day = engine
            .store
            .latest_candle(TOKEN, Timeframe::Day, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(day.close, Decimal::from_str("0.5").unwrap());
        assert_eq!(day.volume, 400);

        let market = engine.store.find_market(TOKEN).await.unwrap().unwrap();
        assert_eq!(market.price, Decimal::from_str("0.5").unwrap());
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn cancelled_order_leaves_the_book() {
        let engine = TestEngine::new();
        let now = unix_now();
        engine.chain.push_event(
            1,
            "tx-list",
            EventFamily::ListingCreated,
            ExchangeEvent::ListingCreated(listing_event("TKN", 8, now - 3_000)),
        );
        engine.chain.push_event(
            2,
            "tx-order",
            EventFamily::NewOrder,
            ExchangeEvent::NewOrder(new_order_event("7", TOKEN, BASE, 1000, 1, 2, now - 2_000)),
        );
        engine.chain.push_event(
            4,
            "tx-cancel",
            EventFamily::OrderCancelled,
            ExchangeEvent::OrderCancelled {
                order_id: "7".to_string(),
                time: now - 1_000,
            },
        );
        engine.chain.set_height(5);

        orchestrator(&engine).run_cycle().await.unwrap();

        let order = engine.store.find_order("7").await.unwrap().unwrap();
        assert_eq!(order.status, TxStatus::Canceled);
        assert_eq!(order.tx_canceled.as_deref(), Some("tx-cancel"));
        assert_eq!(order.amount, 1000);
        let market = engine.store.find_market(TOKEN).await.unwrap().unwrap();
        assert_eq!(market.price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn client_order_confirmed_by_receipt_joins_the_book() {
        let engine = TestEngine::new();
        let now = unix_now();
        engine.chain.push_event(
            1,
            "tx-list",
            EventFamily::ListingCreated,
            ExchangeEvent::ListingCreated(listing_event("TKN", 8, now - 3_000)),
        );
        engine.chain.push_event(
            2,
            "tx-order",
            EventFamily::NewOrder,
            ExchangeEvent::NewOrder(new_order_event("7", TOKEN, BASE, 1000, 1, 2, now - 2_000)),
        );
        engine.chain.set_height(5);

        let mut submitted = order_fixture("ignored", "tx-order");
        submitted.order_id = None;
        submitted.status = TxStatus::Pending;
        submitted.block_num = None;
        engine.store.upsert_order(submitted).await.unwrap();
        engine.chain.set_receipt(
            "tx-order",
            TransactionReceipt {
                block_hash: "hash-2".to_string(),
                block_number: 2,
                gas_used: 21_000,
                log: vec![FakeChain::raw_log(TOKEN, "topic", "00")],
            },
        );

        orchestrator(&engine).run_cycle().await.unwrap();

        let order = engine.store.find_order("7").await.unwrap().unwrap();
        assert_eq!(order.status, TxStatus::Active);
        assert_eq!(order.txid, "tx-order");
        assert_eq!(order.amount, 1000);
        assert_eq!(order.time, now - 2_000);

        let book = engine
            .store
            .list_orders(&OrderFilter {
                token_address: Some(TOKEN.to_string()),
                status: Some(TxStatus::Active),
                ..OrderFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(book.len(), 1);
        let market = engine.store.find_market(TOKEN).await.unwrap().unwrap();
        assert_eq!(market.price, Decimal::from_str("0.5").unwrap());
    }

    #[tokio::test]
    async fn rescanning_processed_blocks_creates_no_duplicates() {
        let engine = TestEngine::new();
        script_order_and_trade(&engine);
        orchestrator(&engine).run_cycle().await.unwrap();
        let candles_before = engine.store.list_candles(TOKEN, Timeframe::Hour1).await.unwrap();

        // Forget the checkpoint but keep every projected record
        let mut snapshot = engine.store.snapshot().await;
        snapshot.blocks.clear();
        let rescanned = TestEngine::with_store(engine.chain.clone(), MemoryStore::from_snapshot(snapshot));
        orchestrator(&rescanned).run_cycle().await.unwrap();

        let store = &rescanned.store;
        assert_eq!(store.find_order("7").await.unwrap().unwrap().amount, 600);
        assert_eq!(store.list_orders(&OrderFilter::default()).await.unwrap().len(), 1);
        assert_eq!(store.list_trades(&TradeFilter::default()).await.unwrap().len(), 1);
        assert_eq!(store.list_markets().await.unwrap().len(), 1);
        let candles_after = store.list_candles(TOKEN, Timeframe::Hour1).await.unwrap();
        assert_eq!(candles_after.len(), candles_before.len());
        assert_eq!(candles_after.last().unwrap().volume, candles_before.last().unwrap().volume);
    }

    #[tokio::test]
    async fn checkpoint_only_moves_forward() {
        let engine = TestEngine::new();
        let orchestrator = orchestrator(&engine);

        engine.chain.set_height(10);
        orchestrator.run_cycle().await.unwrap();
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(10));

        engine.chain.set_height(15);
        let stats = orchestrator.run_cycle().await.unwrap();
        assert_eq!(stats.start_block, 11);
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(15));

        // Nothing new: no batch runs
        let stats = orchestrator.run_cycle().await.unwrap();
        assert_eq!(stats.batches_processed, 0);

        engine.chain.set_height(12);
        let result = orchestrator.run_cycle().await;
        assert!(matches!(result, Err(SyncError::CheckpointError(_))));
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn height_failure_aborts_the_cycle() {
        let engine = TestEngine::new();
        engine.chain.set_height(10);
        engine.chain.fail_block_count(true);

        let result = orchestrator(&engine).run_cycle().await;
        assert!(matches!(result, Err(SyncError::ChainError(_))));
        assert_eq!(engine.store.checkpoint().await.unwrap(), None);

        engine.chain.fail_block_count(false);
        orchestrator(&engine).run_cycle().await.unwrap();
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn undecodable_logs_are_dropped() {
        let engine = TestEngine::new();
        let now = unix_now();
        engine.chain.push_raw(2, "tx-garbage", EventFamily::NewOrder, "not an event");
        engine.chain.push_event(
            3,
            "tx-order",
            EventFamily::NewOrder,
            ExchangeEvent::NewOrder(new_order_event("8", BASE, TOKEN, 50, 3, 1, now - 100)),
        );
        engine.chain.set_height(3);

        let stats = orchestrator(&engine).run_cycle().await.unwrap();
        assert_eq!(stats.events_projected, 1);
        assert!(engine.store.find_order("8").await.unwrap().is_some());
        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn failed_block_lookups_still_advance_the_checkpoint() {
        let engine = TestEngine::new();
        engine.chain.set_height(4);
        engine.chain.fail_block_at(2);

        orchestrator(&engine).run_cycle().await.unwrap();

        let snapshot = engine.store.snapshot().await;
        assert_eq!(snapshot.blocks.len(), 5);
        assert_eq!(snapshot.blocks[&2].block_time, None);
        assert!(snapshot.blocks[&3].block_time.is_some());
    }

    #[tokio::test]
    async fn publishes_and_caches_sync_status() {
        let engine = TestEngine::new();
        engine.chain.set_height(10);
        engine.chain.set_peer_headers(&[Some(-1), Some(20)]);
        let mut notifications = engine.publisher.subscribe();
        let orchestrator = orchestrator(&engine);

        orchestrator.run_cycle().await.unwrap();

        let status = orchestrator.status_handle().read().await.clone().unwrap();
        assert_eq!(status.sync_block_num, 10);
        assert_eq!(status.sync_percent, 50);
        assert_eq!(status.peer_node_count, 2);
        assert_eq!(status.address_balances.len(), 1);

        let mut saw_status = false;
        while let Ok(notification) = notifications.try_recv() {
            if let Notification::SyncStatus(published) = notification {
                assert_eq!(published, status);
                saw_status = true;
            }
        }
        assert!(saw_status);
    }

    #[tokio::test]
    async fn persists_the_store_after_each_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TestEngine::new();
        engine.chain.set_height(7);
        let service = Arc::new(StatePersistenceService::new(dir.path().to_path_buf()));

        engine
            .orchestrator()
            .with_persistence(service.clone(), engine.store.clone())
            .run_cycle()
            .await
            .unwrap();

        let (restored, height) = service.restore_store().await.unwrap().unwrap();
        assert_eq!(height, 7);
        assert_eq!(restored.checkpoint().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let engine = TestEngine::new();
        engine.chain.set_height(3);
        let orchestrator = orchestrator(&engine);
        let (sender, receiver) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.send(true).unwrap();
        };
        tokio::join!(orchestrator.run(receiver), stop);

        assert_eq!(engine.store.checkpoint().await.unwrap(), Some(3));
    }
}

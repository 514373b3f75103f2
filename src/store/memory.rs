//! In-memory `LocalStore` backed by ordered maps.

use super::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Serializable contents of a `MemoryStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
	pub blocks: BTreeMap<u64, BlockRow>,
	pub markets: BTreeMap<String, Market>,
	/// Orders keyed by txid
	pub orders: BTreeMap<String, Order>,
	pub trades: BTreeMap<String, Trade>,
	pub fund_redeems: BTreeMap<String, FundRedeem>,
	pub transactions: BTreeMap<String, Transaction>,
	/// token address -> timeframe -> bucket start -> candle
	pub candles: BTreeMap<String, BTreeMap<Timeframe, BTreeMap<u64, Candle>>>,
	/// order id -> txid
	#[serde(skip)]
	order_ids: BTreeMap<String, String>,
}

impl StoreSnapshot {
	fn rebuild_order_index(&mut self) {
		self.order_ids = self
			.orders
			.values()
			.filter_map(|order| {
				order
					.order_id
					.as_ref()
					.map(|id| (id.clone(), order.txid.clone()))
			})
			.collect();
	}
}

/// Store holding every collection in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
	state: RwLock<StoreSnapshot>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_snapshot(mut snapshot: StoreSnapshot) -> Self {
		snapshot.rebuild_order_index();
		Self {
			state: RwLock::new(snapshot),
		}
	}

	/// Copy of the current contents.
	pub async fn snapshot(&self) -> StoreSnapshot {
		self.state.read().await.clone()
	}
}

fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> UpsertOutcome {
	match map.insert(key, value) {
		Some(_) => UpsertOutcome::Updated,
		None => UpsertOutcome::Inserted,
	}
}

/// Records the reconciler can move out of PENDING.
trait Resolvable {
	fn status(&self) -> TxStatus;
	fn apply_resolution(&mut self, resolution: &Resolution);
}

macro_rules! impl_resolvable {
	($($record:ty),*) => {
		$(impl Resolvable for $record {
			fn status(&self) -> TxStatus {
				self.status
			}

			fn apply_resolution(&mut self, resolution: &Resolution) {
				self.status = resolution.status;
				self.gas_used = resolution.gas_used;
				self.block_num = Some(resolution.block_num);
				self.block_time = resolution.block_time;
			}
		})*
	};
}

impl_resolvable!(Transaction, Order, FundRedeem, Trade);

fn resolve<T: Resolvable>(record: Option<&mut T>, resolution: &Resolution) -> bool {
	match record {
		Some(record) if record.status() == TxStatus::Pending => {
			record.apply_resolution(resolution);
			true
		}
		_ => false,
	}
}

#[async_trait::async_trait]
impl LocalStore for MemoryStore {
	async fn checkpoint(&self) -> Result<Option<u64>, StoreError> {
		Ok(self.state.read().await.blocks.keys().next_back().copied())
	}

	async fn insert_blocks(&self, blocks: Vec<BlockRow>) -> Result<(), StoreError> {
		let mut state = self.state.write().await;
		for block in blocks {
			state.blocks.insert(block.block_num, block);
		}
		Ok(())
	}

	async fn list_markets(&self) -> Result<Vec<Market>, StoreError> {
		Ok(self.state.read().await.markets.values().cloned().collect())
	}

	async fn find_market(&self, address: &str) -> Result<Option<Market>, StoreError> {
		Ok(self.state.read().await.markets.get(address).cloned())
	}

	async fn upsert_market(&self, market: Market) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		Ok(upsert(&mut state.markets, market.address.clone(), market))
	}

	async fn update_market_stats(
		&self,
		address: &str,
		stats: MarketStats,
	) -> Result<(), StoreError> {
		let mut state = self.state.write().await;
		let market = state
			.markets
			.get_mut(address)
			.ok_or_else(|| StoreError::NotFound(format!("market {}", address)))?;
		market.price = stats.price;
		market.change = stats.change;
		market.volume = stats.volume;
		Ok(())
	}

	async fn propagate_token_identity(
		&self,
		address: &str,
		identity: &TokenIdentity,
	) -> Result<usize, StoreError> {
		let mut state = self.state.write().await;
		let mut touched = 0;

		for order in state
			.orders
			.values_mut()
			.filter(|order| order.sell_token == address || order.buy_token == address)
		{
			order.apply_identity(identity);
			touched += 1;
		}
		for trade in state
			.trades
			.values_mut()
			.filter(|trade| trade.token_address == address)
		{
			trade.apply_identity(identity);
			touched += 1;
		}
		for fund_redeem in state
			.fund_redeems
			.values_mut()
			.filter(|fund_redeem| fund_redeem.token_address == address)
		{
			fund_redeem.apply_identity(identity);
			touched += 1;
		}

		Ok(touched)
	}

	async fn find_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
		let state = self.state.read().await;
		Ok(state
			.order_ids
			.get(order_id)
			.and_then(|txid| state.orders.get(txid))
			.cloned())
	}

	async fn find_order_by_txid(&self, txid: &str) -> Result<Option<Order>, StoreError> {
		Ok(self.state.read().await.orders.get(txid).cloned())
	}

	async fn upsert_order(&self, order: Order) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		if let Some(order_id) = &order.order_id {
			state
				.order_ids
				.insert(order_id.clone(), order.txid.clone());
		}
		Ok(upsert(&mut state.orders, order.txid.clone(), order))
	}

	async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
		Ok(self
			.state
			.read()
			.await
			.orders
			.values()
			.filter(|order| filter.matches(order))
			.cloned()
			.collect())
	}

	async fn find_trade(&self, txid: &str) -> Result<Option<Trade>, StoreError> {
		Ok(self.state.read().await.trades.get(txid).cloned())
	}

	async fn upsert_trade(&self, trade: Trade) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		Ok(upsert(&mut state.trades, trade.txid.clone(), trade))
	}

	async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, StoreError> {
		Ok(self
			.state
			.read()
			.await
			.trades
			.values()
			.filter(|trade| filter.matches(trade))
			.cloned()
			.collect())
	}

	async fn find_fund_redeem(&self, txid: &str) -> Result<Option<FundRedeem>, StoreError> {
		Ok(self.state.read().await.fund_redeems.get(txid).cloned())
	}

	async fn upsert_fund_redeem(
		&self,
		fund_redeem: FundRedeem,
	) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		Ok(upsert(
			&mut state.fund_redeems,
			fund_redeem.txid.clone(),
			fund_redeem,
		))
	}

	async fn list_fund_redeems(&self, owner: Option<&str>) -> Result<Vec<FundRedeem>, StoreError> {
		Ok(self
			.state
			.read()
			.await
			.fund_redeems
			.values()
			.filter(|fund_redeem| owner.is_none_or(|owner| fund_redeem.owner == owner))
			.cloned()
			.collect())
	}

	async fn find_transaction(&self, txid: &str) -> Result<Option<Transaction>, StoreError> {
		Ok(self.state.read().await.transactions.get(txid).cloned())
	}

	async fn upsert_transaction(
		&self,
		transaction: Transaction,
	) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		Ok(upsert(
			&mut state.transactions,
			transaction.txid.clone(),
			transaction,
		))
	}

	async fn latest_candle(
		&self,
		token_address: &str,
		timeframe: Timeframe,
		at_or_before: Option<u64>,
	) -> Result<Option<Candle>, StoreError> {
		let state = self.state.read().await;
		let Some(series) = state
			.candles
			.get(token_address)
			.and_then(|series| series.get(&timeframe))
		else {
			return Ok(None);
		};

		let latest = match at_or_before {
			Some(time) => series.range(..=time).next_back(),
			None => series.iter().next_back(),
		};
		Ok(latest.map(|(_, candle)| candle.clone()))
	}

	async fn upsert_candle(&self, candle: Candle) -> Result<UpsertOutcome, StoreError> {
		let mut state = self.state.write().await;
		let series = state
			.candles
			.entry(candle.token_address.clone())
			.or_default()
			.entry(candle.timeframe)
			.or_default();
		Ok(upsert(series, candle.time, candle))
	}

	async fn list_candles(
		&self,
		token_address: &str,
		timeframe: Timeframe,
	) -> Result<Vec<Candle>, StoreError> {
		Ok(self
			.state
			.read()
			.await
			.candles
			.get(token_address)
			.and_then(|series| series.get(&timeframe))
			.map(|series| series.values().cloned().collect())
			.unwrap_or_default())
	}

	async fn pending_records(&self, kind: RecordKind) -> Result<Vec<PendingRecord>, StoreError> {
		let state = self.state.read().await;
		let pending = |status: TxStatus| status == TxStatus::Pending;

		let records = match kind {
			RecordKind::Transaction => state
				.transactions
				.values()
				.filter(|tx| pending(tx.status))
				.map(|tx| PendingRecord {
					kind,
					txid: tx.txid.clone(),
					token: tx.token.clone(),
					tx_type: Some(tx.tx_type.clone()),
					block_num: tx.block_num,
				})
				.collect(),
			RecordKind::Order => state
				.orders
				.values()
				.filter(|order| pending(order.status))
				.map(|order| PendingRecord {
					kind,
					txid: order.txid.clone(),
					token: order.token.clone(),
					tx_type: None,
					block_num: order.block_num,
				})
				.collect(),
			RecordKind::FundRedeem => state
				.fund_redeems
				.values()
				.filter(|fund_redeem| pending(fund_redeem.status))
				.map(|fund_redeem| PendingRecord {
					kind,
					txid: fund_redeem.txid.clone(),
					token: fund_redeem.token.clone(),
					tx_type: None,
					block_num: fund_redeem.block_num,
				})
				.collect(),
			RecordKind::Trade => state
				.trades
				.values()
				.filter(|trade| pending(trade.status))
				.map(|trade| PendingRecord {
					kind,
					txid: trade.txid.clone(),
					token: trade.token.clone(),
					tx_type: None,
					block_num: trade.block_num,
				})
				.collect(),
		};

		Ok(records)
	}

	async fn resolve_pending(
		&self,
		kind: RecordKind,
		txid: &str,
		resolution: &Resolution,
	) -> Result<bool, StoreError> {
		let mut state = self.state.write().await;

		let written = match kind {
			RecordKind::Transaction => resolve(state.transactions.get_mut(txid), resolution),
			RecordKind::Order => resolve(state.orders.get_mut(txid), resolution),
			RecordKind::FundRedeem => resolve(state.fund_redeems.get_mut(txid), resolution),
			RecordKind::Trade => resolve(state.trades.get_mut(txid), resolution),
		};

		Ok(written)
	}
}

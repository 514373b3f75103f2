//!
//! Local store: the queryable projection of on-chain exchange state.
//!
//! The engine only talks to the `LocalStore` trait. `MemoryStore` implements it in memory and can be
//! snapshotted to disk through `StatePersistenceService`.

pub mod memory;
pub mod models;
pub mod persistence;
pub mod repositories;

pub use memory::{MemoryStore, StoreSnapshot};
pub use models::*;
pub use persistence::StatePersistenceService;
pub use repositories::{FileSnapshotRepository, SnapshotRepository};

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Record not found: {0}")]
	NotFound(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Whether an upsert created a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
	Inserted,
	Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
	pub token_address: Option<String>,
	pub owner: Option<String>,
	pub status: Option<TxStatus>,
	pub order_type: Option<OrderType>,
}

impl OrderFilter {
	pub fn matches(&self, order: &Order) -> bool {
		self.token_address
			.as_ref()
			.is_none_or(|token| &order.token_address == token)
			&& self.owner.as_ref().is_none_or(|owner| &order.owner == owner)
			&& self.status.is_none_or(|status| order.status == status)
			&& self
				.order_type
				.is_none_or(|order_type| order.order_type == order_type)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeFilter {
	pub token_address: Option<String>,
	/// Matches either side of the trade
	pub party: Option<String>,
	/// Only trades strictly newer than this time
	pub since: Option<u64>,
}

impl TradeFilter {
	pub fn matches(&self, trade: &Trade) -> bool {
		self.token_address
			.as_ref()
			.is_none_or(|token| &trade.token_address == token)
			&& self
				.party
				.as_ref()
				.is_none_or(|party| &trade.from == party || &trade.to == party)
			&& self.since.is_none_or(|since| trade.time > since)
	}
}

/// Storage boundary for every projected collection.
///
/// Upserts are keyed by txid (orders, trades, fund redeems, transactions), market address, or
/// `(token, timeframe, time)` for candles, so replaying a block range never duplicates records.
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
	/// Highest recorded block number.
	async fn checkpoint(&self) -> Result<Option<u64>, StoreError>;

	async fn insert_blocks(&self, blocks: Vec<BlockRow>) -> Result<(), StoreError>;

	async fn list_markets(&self) -> Result<Vec<Market>, StoreError>;

	async fn find_market(&self, address: &str) -> Result<Option<Market>, StoreError>;

	async fn upsert_market(&self, market: Market) -> Result<UpsertOutcome, StoreError>;

	async fn update_market_stats(&self, address: &str, stats: MarketStats)
	-> Result<(), StoreError>;

	/// Rewrites symbol/name/decimals on every order, trade and fund redeem that references
	/// `address`. Returns the number of records touched.
	async fn propagate_token_identity(
		&self,
		address: &str,
		identity: &TokenIdentity,
	) -> Result<usize, StoreError>;

	async fn find_order(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

	async fn find_order_by_txid(&self, txid: &str) -> Result<Option<Order>, StoreError>;

	async fn upsert_order(&self, order: Order) -> Result<UpsertOutcome, StoreError>;

	async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

	async fn find_trade(&self, txid: &str) -> Result<Option<Trade>, StoreError>;

	async fn upsert_trade(&self, trade: Trade) -> Result<UpsertOutcome, StoreError>;

	async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, StoreError>;

	async fn find_fund_redeem(&self, txid: &str) -> Result<Option<FundRedeem>, StoreError>;

	async fn upsert_fund_redeem(&self, fund_redeem: FundRedeem)
	-> Result<UpsertOutcome, StoreError>;

	async fn list_fund_redeems(&self, owner: Option<&str>) -> Result<Vec<FundRedeem>, StoreError>;

	async fn find_transaction(&self, txid: &str) -> Result<Option<Transaction>, StoreError>;

	async fn upsert_transaction(&self, transaction: Transaction)
	-> Result<UpsertOutcome, StoreError>;

	/// Latest candle of a series starting at or before `at_or_before` (any time when `None`).
	async fn latest_candle(
		&self,
		token_address: &str,
		timeframe: Timeframe,
		at_or_before: Option<u64>,
	) -> Result<Option<Candle>, StoreError>;

	async fn upsert_candle(&self, candle: Candle) -> Result<UpsertOutcome, StoreError>;

	/// A series in ascending time order.
	async fn list_candles(
		&self,
		token_address: &str,
		timeframe: Timeframe,
	) -> Result<Vec<Candle>, StoreError>;

	/// Records of `kind` whose status is exactly PENDING.
	async fn pending_records(&self, kind: RecordKind) -> Result<Vec<PendingRecord>, StoreError>;

	/// Applies a resolution if the record is still PENDING. Returns whether it was written.
	async fn resolve_pending(
		&self,
		kind: RecordKind,
		txid: &str,
		resolution: &Resolution,
	) -> Result<bool, StoreError>;
}

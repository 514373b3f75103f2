//!
//! Read-side queries over the synced state.
//!
//! Transports (HTTP, GraphQL) sit outside this crate; they call into `QueryService` for derived
//! state: markets with stats, the order book, trade and fund history, candles, balances and sync
//! progress.

use crate::chain::ChainConnector;
use crate::config::EngineConfig;
use crate::store::{
	Candle, FundRedeem, LocalStore, Market, Order, OrderFilter, StoreError, Timeframe, Trade,
	TradeFilter, TxStatus,
};
use crate::sync::{AddressBalance, StatusHandle, SyncError};
use crate::utils::{BASE_CURRENCY_DECIMALS, base_units_to_display, normalize_hex};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// Where the engine stands relative to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
	/// Highest block recorded in the store
	pub checkpoint: Option<u64>,
	/// Chain height at the last published status
	pub sync_block_num: Option<u64>,
	pub sync_block_time: Option<u64>,
	pub sync_percent: u32,
}

pub struct QueryService {
	store: Arc<dyn LocalStore>,
	chain: Arc<dyn ChainConnector>,
	config: Arc<EngineConfig>,
	status: StatusHandle,
}

impl QueryService {
	pub fn new(
		store: Arc<dyn LocalStore>,
		chain: Arc<dyn ChainConnector>,
		config: Arc<EngineConfig>,
		status: StatusHandle,
	) -> Self {
		Self {
			store,
			chain,
			config,
			status,
		}
	}

	/// Registered markets with their latest stats.
	pub async fn markets(&self) -> Result<Vec<Market>, StoreError> {
		let mut markets = self.store.list_markets().await?;
		markets.retain(|market| market.registered);
		Ok(markets)
	}

	/// Orders of `token_address` in `status` (ACTIVE by default), best price first.
	pub async fn order_book(
		&self,
		token_address: &str,
		status: Option<TxStatus>,
	) -> Result<Vec<Order>, StoreError> {
		let mut orders = self
			.store
			.list_orders(&OrderFilter {
				token_address: Some(normalize_hex(token_address)),
				status: Some(status.unwrap_or(TxStatus::Active)),
				..OrderFilter::default()
			})
			.await?;
		orders.sort_by(|a, b| a.price.cmp(&b.price).then(a.time.cmp(&b.time)));
		Ok(orders)
	}

	/// Trades of one token, newest first.
	pub async fn token_trades(&self, token_address: &str) -> Result<Vec<Trade>, StoreError> {
		self.trades(TradeFilter {
			token_address: Some(normalize_hex(token_address)),
			..TradeFilter::default()
		})
		.await
	}

	/// Trades where `address` is either counter-party, newest first.
	pub async fn party_trades(&self, address: &str) -> Result<Vec<Trade>, StoreError> {
		self.trades(TradeFilter {
			party: Some(normalize_hex(address)),
			..TradeFilter::default()
		})
		.await
	}

	async fn trades(&self, filter: TradeFilter) -> Result<Vec<Trade>, StoreError> {
		let mut trades = self.store.list_trades(&filter).await?;
		trades.sort_by(|a, b| b.time.cmp(&a.time));
		Ok(trades)
	}

	/// Deposits and withdrawals of `owner`, newest first.
	pub async fn fund_history(&self, owner: &str) -> Result<Vec<FundRedeem>, StoreError> {
		let mut history = self
			.store
			.list_fund_redeems(Some(&normalize_hex(owner)))
			.await?;
		history.sort_by(|a, b| b.time.cmp(&a.time));
		Ok(history)
	}

	pub async fn candles(
		&self,
		token_address: &str,
		timeframe: Timeframe,
	) -> Result<Vec<Candle>, StoreError> {
		self.store
			.list_candles(&normalize_hex(token_address), timeframe)
			.await
	}

	/// Balance snapshot from the last published sync status.
	pub async fn balances(&self) -> Vec<AddressBalance> {
		self.status
			.read()
			.await
			.as_ref()
			.map(|status| status.address_balances.clone())
			.unwrap_or_default()
	}

	pub async fn sync_progress(&self) -> Result<SyncProgress, StoreError> {
		let checkpoint = self.store.checkpoint().await?;
		let status = self.status.read().await;

		Ok(SyncProgress {
			checkpoint,
			sync_block_num: status.as_ref().map(|status| status.sync_block_num),
			sync_block_time: status.as_ref().map(|status| status.sync_block_time),
			sync_percent: status.as_ref().map_or(0, |status| status.sync_percent),
		})
	}

	/// Amount of `token_address` the exchange may move on behalf of `owner_hex`.
	pub async fn exchange_allowance(
		&self,
		owner_hex: &str,
		token_address: &str,
	) -> Result<Decimal, SyncError> {
		let token_address = normalize_hex(token_address);
		let owner_hex = normalize_hex(owner_hex);
		let exchange = normalize_hex(&self.config.metadata.exchange.address);

		let decimals = if token_address == self.config.metadata.base_address() {
			BASE_CURRENCY_DECIMALS
		} else {
			self.store
				.find_market(&token_address)
				.await?
				.ok_or_else(|| StoreError::NotFound(format!("market {}", token_address)))?
				.decimals
		};

		let allowance = self
			.chain
			.token_allowance(&token_address, &owner_hex, &exchange, &owner_hex)
			.await?;
		base_units_to_display(allowance, decimals).ok_or_else(|| {
			SyncError::InvalidEvent(format!("allowance {} is out of range", allowance))
		})
	}
}

use crate::store::{
	LocalStore, Market, MarketStats, OrderFilter, OrderType, StoreError, TradeFilter, TxStatus,
};
use crate::utils::{BASE_CURRENCY_DECIMALS, base_units_to_display};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error};

const STATS_WINDOW_SECS: u64 = 86_400;

/// Recomputes price, 24h change and 24h volume of every registered market.
pub struct MarketStatsAggregator {
	store: Arc<dyn LocalStore>,
}

impl MarketStatsAggregator {
	pub fn new(store: Arc<dyn LocalStore>) -> Self {
		Self { store }
	}

	/// Returns the number of markets whose stats were written.
	pub async fn recompute(&self, now: u64) -> Result<usize, StoreError> {
		let markets = self.store.list_markets().await?;
		let mut updated = 0;

		for market in markets.iter().filter(|market| market.registered) {
			match self.stats_for(market, now).await {
				Ok(stats) => {
					self.store.update_market_stats(&market.address, stats).await?;
					updated += 1;
				}
				Err(e) => error!("Failed to compute stats for market {}: {}", market.symbol, e),
			}
		}

		debug!("Recomputed stats of {} markets", updated);
		Ok(updated)
	}

	async fn stats_for(&self, market: &Market, now: u64) -> Result<MarketStats, StoreError> {
		let mut trades = self
			.store
			.list_trades(&TradeFilter {
				token_address: Some(market.address.clone()),
				since: Some(now.saturating_sub(STATS_WINDOW_SECS)),
				..TradeFilter::default()
			})
			.await?;
		trades.retain(|trade| trade.status != TxStatus::Fail);
		trades.sort_by_key(|trade| trade.time);

		let change = match (trades.first(), trades.last()) {
			(Some(oldest), Some(newest)) if trades.len() >= 2 => {
				percent_change(oldest.price.to_decimal(), newest.price.to_decimal())
			}
			_ => Decimal::ZERO,
		};

		let base_volume: u128 = trades
			.iter()
			.map(|trade| match trade.order_type {
				OrderType::Sell => trade.bought_tokens,
				OrderType::Buy => trade.sold_tokens,
			})
			.fold(0u128, u128::saturating_add);
		let volume = base_units_to_display(base_volume, BASE_CURRENCY_DECIMALS).unwrap_or_default();

		let asks = self
			.store
			.list_orders(&OrderFilter {
				token_address: Some(market.address.clone()),
				status: Some(TxStatus::Active),
				order_type: Some(OrderType::Sell),
				..OrderFilter::default()
			})
			.await?;
		let price = asks
			.iter()
			.map(|order| order.price)
			.min()
			.and_then(|price| price.to_decimal())
			.unwrap_or_default();

		Ok(MarketStats {
			price,
			change,
			volume,
		})
	}
}

/// `(oldest - newest) / oldest * 100`, two decimal places; zero when undefined.
fn percent_change(oldest: Option<Decimal>, newest: Option<Decimal>) -> Decimal {
	let (Some(oldest), Some(newest)) = (oldest, newest) else {
		return Decimal::ZERO;
	};
	(oldest - newest)
		.checked_div(oldest)
		.and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
		.map(|percent| percent.round_dp(2))
		.unwrap_or_default()
}

//! Multi-timeframe OHLCV candles.
//!
//! Each `(token, timeframe)` series is a gap-free run of buckets `[time, time + width)`. A trade
//! first carries the series forward to the bucket containing it, then folds into that bucket.

use crate::publisher::{Notification, Publisher};
use crate::store::{Candle, LocalStore, StoreError, Timeframe, Trade};
use crate::sync::SyncError;
use crate::utils::unix_now;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trades stamped further ahead than this are decoder artifacts.
const MAX_FUTURE_DRIFT_SECS: u64 = 86_400;

/// Maintains candle series per token and timeframe.
pub struct ChartAggregator {
	store: Arc<dyn LocalStore>,
	publisher: Arc<dyn Publisher>,
}

impl ChartAggregator {
	pub fn new(store: Arc<dyn LocalStore>, publisher: Arc<dyn Publisher>) -> Self {
		Self { store, publisher }
	}

	/// Folds a trade into every timeframe of its token.
	pub async fn apply_trade(&self, trade: &Trade) -> Result<(), SyncError> {
		let Some(price) = trade.price.to_decimal() else {
			warn!(
				"Trade {} price {} cannot be charted",
				trade.txid, trade.price
			);
			return Ok(());
		};

		if trade.time > unix_now().saturating_add(MAX_FUTURE_DRIFT_SECS) {
			warn!(
				"Trade {} time {} is too far in the future to chart",
				trade.txid, trade.time
			);
			return Ok(());
		}

		for timeframe in Timeframe::ALL {
			self.apply_to_series(&trade.token_address, timeframe, trade.time, price, trade.amount)
				.await?;
		}
		Ok(())
	}

	async fn apply_to_series(
		&self,
		token_address: &str,
		timeframe: Timeframe,
		time: u64,
		price: Decimal,
		volume: u128,
	) -> Result<(), StoreError> {
		let mut bucket = match self
			.store
			.latest_candle(token_address, timeframe, Some(time))
			.await?
		{
			Some(candle) => candle,
			None => {
				if self
					.store
					.latest_candle(token_address, timeframe, None)
					.await?
					.is_some()
				{
					warn!(
						"Trade at {} predates the {} series of {}; not charted",
						time, timeframe, token_address
					);
					return Ok(());
				}
				Candle::seed(token_address, timeframe, time)
			}
		};

		while bucket.ends_by(time) {
			let Some(next) = bucket.carry_forward() else {
				break;
			};
			bucket = next;
			self.write(bucket.clone()).await?;
		}

		bucket.apply_trade(price, volume);
		self.write(bucket).await
	}

	/// Extends every series of `tokens` with carry-forward candles up to the bucket containing `now`.
	pub async fn update_idle_candles(&self, tokens: &[String], now: u64) -> Result<usize, SyncError> {
		let mut inserted = 0;

		for token_address in tokens {
			for timeframe in Timeframe::ALL {
				let Some(mut latest) = self
					.store
					.latest_candle(token_address, timeframe, None)
					.await?
				else {
					continue;
				};

				while latest.ends_by(now) {
					let Some(next) = latest.carry_forward() else {
						break;
					};
					latest = next;
					self.write(latest.clone()).await?;
					inserted += 1;
				}
			}
		}

		if inserted > 0 {
			debug!("Inserted {} idle candles", inserted);
		}
		Ok(inserted)
	}

	async fn write(&self, candle: Candle) -> Result<(), StoreError> {
		self.store.upsert_candle(candle.clone()).await?;
		self.publisher.publish(Notification::CandleUpdated(candle));
		Ok(())
	}
}

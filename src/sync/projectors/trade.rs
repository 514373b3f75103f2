use super::ProjectionContext;
use crate::decoder::{DecodedEvent, EventFamily, ExchangeEvent};
use crate::publisher::Notification;
use crate::store::{OrderType, Trade, TxStatus};
use crate::sync::{ChartAggregator, EventProjector, SyncError};
use crate::utils::{format_token_amount, normalize_hex};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Records fills, deducts them from their orders and feeds the charts.
///
/// Trades are projected strictly in log order: fills of one order share its remaining amount, and
/// fills of one token share its candle series.
pub struct TradeProjector {
	ctx: ProjectionContext,
	charts: Arc<ChartAggregator>,
}

impl TradeProjector {
	pub fn new(ctx: ProjectionContext, charts: Arc<ChartAggregator>) -> Self {
		Self { ctx, charts }
	}

	async fn apply(&self, event: DecodedEvent) -> Result<(), SyncError> {
		let fill = match event.event {
			ExchangeEvent::Trade(fill) => fill,
			other => {
				warn!("{} received unexpected {} event", self.name(), other.family());
				return Ok(());
			}
		};
		if fill.time == 0 {
			warn!("Dropping Trade {} with zero timestamp", event.txid);
			return Ok(());
		}

		let store = &self.ctx.store;
		let Some(mut order) = store.find_order(&fill.order_id).await? else {
			error!(
				"Trade in tx {} references unknown order {}; not recorded",
				event.txid, fill.order_id
			);
			return Ok(());
		};

		let existing = store.find_trade(&event.txid).await?;
		let first_application = existing.as_ref().is_none_or(|trade| !trade.order_applied);

		let trade = Trade {
			txid: event.txid,
			order_id: fill.order_id,
			from: normalize_hex(&fill.from),
			to: normalize_hex(&fill.to),
			sold_tokens: fill.sold_tokens,
			bought_tokens: fill.bought_tokens,
			amount: match order.order_type {
				OrderType::Sell => fill.sold_tokens,
				OrderType::Buy => fill.bought_tokens,
			},
			price: order.price,
			order_type: order.order_type,
			token_address: order.token_address.clone(),
			token: order.token.clone(),
			token_name: order.token_name.clone(),
			decimals: order.decimals,
			status: TxStatus::Confirmed,
			time: fill.time,
			block_num: Some(event.block_number),
			gas_used: existing.as_ref().and_then(|trade| trade.gas_used),
			block_time: existing.as_ref().and_then(|trade| trade.block_time),
			order_applied: true,
		};

		store.upsert_trade(trade.clone()).await?;
		self.ctx
			.publisher
			.publish(Notification::TradeExecuted(trade.clone()));

		if !first_application {
			debug!("Trade {} already applied to order {}", trade.txid, trade.order_id);
			return Ok(());
		}

		order.amount = order.amount.saturating_sub(trade.sold_tokens);
		debug!(
			"Trade {} on order {}: {} {} left",
			trade.txid,
			trade.order_id,
			format_token_amount(order.amount, order.decimals),
			order.token
		);
		store.upsert_order(order.clone()).await?;
		self.ctx.publisher.publish(Notification::OrderUpdated(order));

		self.charts.apply_trade(&trade).await
	}
}

#[async_trait::async_trait]
impl EventProjector for TradeProjector {
	fn families(&self) -> &'static [EventFamily] {
		&[EventFamily::Trade]
	}

	async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError> {
		for event in events {
			let txid = event.txid.clone();
			match self.apply(event).await {
				Ok(()) => {}
				Err(SyncError::StoreError(e)) => return Err(SyncError::StoreError(e)),
				Err(e) => error!("Failed to project Trade event in tx {}: {}", txid, e),
			}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"TradeProjector"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::{LocalStore, Timeframe, TradeFilter};
	use crate::testing::{TestEngine, decoded, order_fixture, trade_event};
	use rust_decimal::Decimal;
	use std::str::FromStr;

	async fn engine_with_order(amount: u128) -> TestEngine {
		let engine = TestEngine::new();
		let mut order = order_fixture("7", "tx-order");
		order.amount = amount;
		order.start_amount = amount;
		engine.store.upsert_order(order).await.unwrap();
		engine
	}

	fn projector(engine: &TestEngine) -> TradeProjector {
		TradeProjector::new(engine.context(), engine.charts())
	}

	#[tokio::test]
	async fn trade_deducts_order_once() {
		let engine = engine_with_order(1000).await;
		let event = decoded(20, "tx-trade", ExchangeEvent::Trade(trade_event("7", 400, 200, 7_200)));

		projector(&engine).project(vec![event.clone()]).await.unwrap();
		projector(&engine).project(vec![event]).await.unwrap();

		let order = engine.store.find_order("7").await.unwrap().unwrap();
		assert_eq!(order.amount, 600);
		let trades = engine.store.list_trades(&TradeFilter::default()).await.unwrap();
		assert_eq!(trades.len(), 1);
		assert_eq!(trades[0].amount, 400);
		assert_eq!(trades[0].token, order.token);

		let candle = engine
			.store
			.latest_candle(&order.token_address, Timeframe::Day, None)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(candle.close, Decimal::from_str("0.5").unwrap());
		assert_eq!(candle.volume, 400);
	}

	#[tokio::test]
	async fn oversized_fill_saturates_at_zero() {
		let engine = engine_with_order(100).await;

		projector(&engine)
			.project(vec![decoded(
				20,
				"tx-trade",
				ExchangeEvent::Trade(trade_event("7", 400, 200, 7_200)),
			)])
			.await
			.unwrap();

		let order = engine.store.find_order("7").await.unwrap().unwrap();
		assert_eq!(order.amount, 0);
	}

	#[tokio::test]
	async fn unknown_order_and_zero_time_are_not_recorded() {
		let engine = engine_with_order(1000).await;

		projector(&engine)
			.project(vec![
				decoded(20, "tx-unknown", ExchangeEvent::Trade(trade_event("99", 1, 1, 7_200))),
				decoded(20, "tx-zero", ExchangeEvent::Trade(trade_event("7", 1, 1, 0))),
			])
			.await
			.unwrap();

		assert!(
			engine
				.store
				.list_trades(&TradeFilter::default())
				.await
				.unwrap()
				.is_empty()
		);
		let order = engine.store.find_order("7").await.unwrap().unwrap();
		assert_eq!(order.amount, 1000);
	}

	#[tokio::test]
	async fn pending_client_trade_is_confirmed_and_applied() {
		let engine = engine_with_order(1000).await;
		let mut pending = crate::testing::trade_fixture("tx-trade", "7");
		pending.status = TxStatus::Pending;
		pending.order_applied = false;
		pending.gas_used = Some(30_000);
		engine.store.upsert_trade(pending).await.unwrap();

		projector(&engine)
			.project(vec![decoded(
				20,
				"tx-trade",
				ExchangeEvent::Trade(trade_event("7", 250, 125, 7_200)),
			)])
			.await
			.unwrap();

		let trade = engine.store.find_trade("tx-trade").await.unwrap().unwrap();
		assert_eq!(trade.status, TxStatus::Confirmed);
		assert_eq!(trade.gas_used, Some(30_000));
		let order = engine.store.find_order("7").await.unwrap().unwrap();
		assert_eq!(order.amount, 750);
	}

	#[tokio::test]
	async fn buy_order_fill_amount_is_bought_tokens() {
		let engine = TestEngine::new();
		let mut order = order_fixture("8", "tx-buy");
		order.order_type = OrderType::Buy;
		engine.store.upsert_order(order).await.unwrap();

		projector(&engine)
			.project(vec![decoded(
				20,
				"tx-trade",
				ExchangeEvent::Trade(trade_event("8", 30, 60, 7_200)),
			)])
			.await
			.unwrap();

		let trade = engine.store.find_trade("tx-trade").await.unwrap().unwrap();
		assert_eq!(trade.amount, 60);
		assert_eq!(trade.order_type, OrderType::Buy);
	}
}

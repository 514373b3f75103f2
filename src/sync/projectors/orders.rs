use super::{ProjectionContext, project_grouped, resolve_identity};
use crate::decoder::{DecodedEvent, EventFamily, ExchangeEvent, NewOrderEvent};
use crate::publisher::Notification;
use crate::store::{Market, Order, OrderType, PriceFraction, TxStatus};
use crate::sync::{EventProjector, SyncError};
use crate::utils::normalize_hex;
use tracing::{debug, error, warn};

/// Fulfilled events at or below this timestamp are placeholder artifacts.
const MIN_FULFILLED_TIME: u64 = 10_000_000;

/// Projects NewOrder events into the order book.
pub struct NewOrderProjector {
	ctx: ProjectionContext,
}

impl NewOrderProjector {
	pub fn new(ctx: ProjectionContext) -> Self {
		Self { ctx }
	}

	async fn apply(&self, event: DecodedEvent, markets: &[Market]) -> Result<(), SyncError> {
		let new_order = match event.event {
			ExchangeEvent::NewOrder(new_order) => new_order,
			other => {
				warn!("{} received unexpected {} event", self.name(), other.family());
				return Ok(());
			}
		};
		if new_order.time == 0 {
			warn!("Dropping NewOrder {} with zero timestamp", event.txid);
			return Ok(());
		}

		let projected = build_order(
			&new_order,
			&event.txid,
			event.block_number,
			markets,
			&self.ctx.base_address(),
		)?;
		let existing = self.ctx.store.find_order_by_txid(&event.txid).await?;
		let order = match existing {
			Some(existing) => merge_reprojected(existing, projected),
			None => projected,
		};

		debug!(
			"Order {} {:?} {} at {}",
			new_order.order_id, order.order_type, order.token, order.price
		);
		self.ctx.store.upsert_order(order.clone()).await?;
		self.ctx.publisher.publish(Notification::OrderUpdated(order));
		Ok(())
	}
}

/// Builds an ACTIVE order from its NewOrder event.
fn build_order(
	event: &NewOrderEvent,
	txid: &str,
	block_number: u64,
	markets: &[Market],
	base_address: &str,
) -> Result<Order, SyncError> {
	let sell_token = normalize_hex(&event.sell_token);
	let buy_token = normalize_hex(&event.buy_token);
	let price = PriceFraction::new(event.price_mul, event.price_div).ok_or_else(|| {
		SyncError::InvalidEvent(format!("order {} has a zero price divisor", event.order_id))
	})?;

	// Selling the base currency means buying the listed token
	let (order_type, token_address) = if sell_token == base_address {
		(OrderType::Buy, buy_token.clone())
	} else {
		(OrderType::Sell, sell_token.clone())
	};
	let identity = resolve_identity(markets, &[sell_token.as_str(), buy_token.as_str()]);

	Ok(Order {
		order_id: Some(event.order_id.clone()),
		txid: txid.to_string(),
		owner: normalize_hex(&event.owner),
		sell_token,
		buy_token,
		token_address,
		token: identity.symbol,
		token_name: identity.name,
		decimals: identity.decimals,
		order_type,
		price,
		amount: event.amount,
		start_amount: event.amount,
		status: TxStatus::Active,
		time: event.time,
		block_num: Some(block_number),
		tx_canceled: None,
		time_canceled: None,
		tx_fulfilled: None,
		time_fulfilled: None,
		gas_used: None,
		block_time: None,
	})
}

/// Combines a re-projected NewOrder with the stored record.
///
/// A client-submitted order (PENDING, or CONFIRMED by its receipt) is replaced outright and goes
/// ACTIVE. Anything already projected keeps its remaining amount, lifecycle fields and receipt
/// data, since trades and closes may have been applied since.
fn merge_reprojected(existing: Order, projected: Order) -> Order {
	if matches!(existing.status, TxStatus::Pending | TxStatus::Confirmed) {
		return Order {
			gas_used: existing.gas_used,
			block_time: existing.block_time,
			..projected
		};
	}

	Order {
		amount: existing.amount,
		status: existing.status,
		tx_canceled: existing.tx_canceled,
		time_canceled: existing.time_canceled,
		tx_fulfilled: existing.tx_fulfilled,
		time_fulfilled: existing.time_fulfilled,
		gas_used: existing.gas_used,
		block_time: existing.block_time,
		..projected
	}
}

#[async_trait::async_trait]
impl EventProjector for NewOrderProjector {
	fn families(&self) -> &'static [EventFamily] {
		&[EventFamily::NewOrder]
	}

	async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError> {
		if events.is_empty() {
			return Ok(());
		}
		let markets = self.ctx.store.list_markets().await?;

		project_grouped(
			events,
			self.ctx.config.projection_concurrency,
			|event| match &event.event {
				ExchangeEvent::NewOrder(new_order) => new_order.order_id.clone(),
				_ => event.txid.clone(),
			},
			|event| self.apply(event, &markets),
		)
		.await
	}

	fn name(&self) -> &'static str {
		"NewOrderProjector"
	}
}

/// Moves orders to CANCELED or FULFILLED.
pub struct OrderClosedProjector {
	ctx: ProjectionContext,
	family: EventFamily,
}

impl OrderClosedProjector {
	pub fn cancelled(ctx: ProjectionContext) -> Self {
		Self {
			ctx,
			family: EventFamily::OrderCancelled,
		}
	}

	pub fn fulfilled(ctx: ProjectionContext) -> Self {
		Self {
			ctx,
			family: EventFamily::OrderFulfilled,
		}
	}

	async fn apply(&self, event: DecodedEvent) -> Result<(), SyncError> {
		let (order_id, time, status) = match event.event {
			ExchangeEvent::OrderCancelled { order_id, time } => (order_id, time, TxStatus::Canceled),
			ExchangeEvent::OrderFulfilled { order_id, time } => {
				if time <= MIN_FULFILLED_TIME {
					warn!(
						"Dropping OrderFulfilled for order {} with timestamp {}",
						order_id, time
					);
					return Ok(());
				}
				(order_id, time, TxStatus::Fulfilled)
			}
			other => {
				warn!("{} received unexpected {} event", self.name(), other.family());
				return Ok(());
			}
		};

		let Some(mut order) = self.ctx.store.find_order(&order_id).await? else {
			error!(
				"{} in tx {} references unknown order {}",
				self.family, event.txid, order_id
			);
			return Ok(());
		};
		if order.status.is_terminal() {
			debug!("Order {} already {}, skipping {}", order_id, order.status, self.family);
			return Ok(());
		}

		order.status = status;
		let notification = if status == TxStatus::Canceled {
			order.tx_canceled = Some(event.txid);
			order.time_canceled = Some(time);
			Notification::OrderCanceled(order.clone())
		} else {
			order.tx_fulfilled = Some(event.txid);
			order.time_fulfilled = Some(time);
			Notification::OrderFulfilled(order.clone())
		};

		self.ctx.store.upsert_order(order).await?;
		self.ctx.publisher.publish(notification);
		Ok(())
	}
}

#[async_trait::async_trait]
impl EventProjector for OrderClosedProjector {
	fn families(&self) -> &'static [EventFamily] {
		match self.family {
			EventFamily::OrderFulfilled => &[EventFamily::OrderFulfilled],
			_ => &[EventFamily::OrderCancelled],
		}
	}

	async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError> {
		project_grouped(
			events,
			self.ctx.config.projection_concurrency,
			|event| match &event.event {
				ExchangeEvent::OrderCancelled { order_id, .. }
				| ExchangeEvent::OrderFulfilled { order_id, .. } => order_id.clone(),
				_ => event.txid.clone(),
			},
			|event| self.apply(event),
		)
		.await
	}

	fn name(&self) -> &'static str {
		match self.family {
			EventFamily::OrderFulfilled => "OrderFulfilledProjector",
			_ => "OrderCancelledProjector",
		}
	}
}

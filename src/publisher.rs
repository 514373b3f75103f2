//!
//! Change notifications for downstream subscribers.
//!
//! Projectors publish every record they write; delivery is fire-and-forget, so a slow or absent
//! subscriber never blocks projection.

use crate::store::{Candle, FundRedeem, Order, Trade};
use crate::sync::SyncStatusSnapshot;
use tokio::sync::broadcast;
use tracing::trace;

/// A state change worth telling subscribers about
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
	OrderUpdated(Order),
	OrderCanceled(Order),
	OrderFulfilled(Order),
	TradeExecuted(Trade),
	FundRedeemed(FundRedeem),
	CandleUpdated(Candle),
	SyncStatus(SyncStatusSnapshot),
}

impl Notification {
	/// Topic name used by subscribers to route the notification.
	pub fn topic(&self) -> &'static str {
		match self {
			Notification::OrderUpdated(_) => "onOrderInfo",
			Notification::OrderCanceled(_) => "onCancelOrderInfo",
			Notification::OrderFulfilled(_) => "onFulfilledOrderInfo",
			Notification::TradeExecuted(_) => "onTradeInfo",
			Notification::FundRedeemed(_) => "onFundRedeemInfo",
			Notification::CandleUpdated(_) => "onChartInfo",
			Notification::SyncStatus(_) => "onSyncInfo",
		}
	}
}

/// Sink for notifications.
pub trait Publisher: Send + Sync {
	fn publish(&self, notification: Notification);
}

/// Fans notifications out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
	sender: broadcast::Sender<Notification>,
}

impl BroadcastPublisher {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
		self.sender.subscribe()
	}
}

impl Publisher for BroadcastPublisher {
	fn publish(&self, notification: Notification) {
		let topic = notification.topic();
		if self.sender.send(notification).is_err() {
			trace!("No subscribers for {}", topic);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::Timeframe;
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn delivers_to_subscribers_and_tolerates_none() {
		let publisher = BroadcastPublisher::new(8);
		let candle = Candle::flat("aa", Timeframe::Day, 0, Decimal::ONE);

		// Nobody listening yet
		publisher.publish(Notification::CandleUpdated(candle.clone()));

		let mut receiver = publisher.subscribe();
		publisher.publish(Notification::CandleUpdated(candle.clone()));

		let received = receiver.recv().await.unwrap();
		assert_eq!(received.topic(), "onChartInfo");
		assert_eq!(received, Notification::CandleUpdated(candle));
	}
}

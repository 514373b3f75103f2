//!
//! Exchange event decoding.
//!
//! Raw contract logs are turned into the closed `ExchangeEvent` enum at this boundary, so the
//! projectors only ever match typed events.

pub mod abi;

pub use abi::AbiEventDecoder;

use crate::chain::RawLog;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event family the engine subscribes to, in projection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFamily {
	ListingCreated,
	ListingUpdated,
	ListingDeleted,
	Deposit,
	Withdrawal,
	NewOrder,
	OrderCancelled,
	OrderFulfilled,
	Trade,
}

impl EventFamily {
	pub fn name(&self) -> &'static str {
		match self {
			EventFamily::ListingCreated => "ListingCreated",
			EventFamily::ListingUpdated => "ListingUpdated",
			EventFamily::ListingDeleted => "ListingDeleted",
			EventFamily::Deposit => "Deposit",
			EventFamily::Withdrawal => "Withdrawal",
			EventFamily::NewOrder => "NewOrder",
			EventFamily::OrderCancelled => "OrderCancelled",
			EventFamily::OrderFulfilled => "OrderFulfilled",
			EventFamily::Trade => "Trade",
		}
	}
}

impl fmt::Display for EventFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Token listing payload shared by ListingCreated and ListingUpdated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEvent {
	pub token_address: String,
	pub symbol: String,
	pub name: String,
	pub version: String,
	pub image: String,
	pub decimals: u32,
	pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderEvent {
	pub owner: String,
	pub order_id: String,
	pub sell_token: String,
	pub buy_token: String,
	pub amount: u128,
	pub price_mul: u128,
	pub price_div: u128,
	pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
	pub order_id: String,
	pub from: String,
	pub to: String,
	pub sold_tokens: u128,
	pub bought_tokens: u128,
	pub time: u64,
}

/// Deposit or withdrawal of a token into/out of the exchange contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundEvent {
	pub token_address: String,
	pub owner: String,
	pub amount: u128,
	pub time: u64,
}

/// Decoded exchange or registry event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeEvent {
	ListingCreated(ListingEvent),
	ListingUpdated(ListingEvent),
	ListingDeleted { token_address: String, time: u64 },
	NewOrder(NewOrderEvent),
	OrderCancelled { order_id: String, time: u64 },
	OrderFulfilled { order_id: String, time: u64 },
	Trade(TradeEvent),
	Deposit(FundEvent),
	Withdrawal(FundEvent),
}

impl ExchangeEvent {
	pub fn family(&self) -> EventFamily {
		match self {
			ExchangeEvent::ListingCreated(_) => EventFamily::ListingCreated,
			ExchangeEvent::ListingUpdated(_) => EventFamily::ListingUpdated,
			ExchangeEvent::ListingDeleted { .. } => EventFamily::ListingDeleted,
			ExchangeEvent::NewOrder(_) => EventFamily::NewOrder,
			ExchangeEvent::OrderCancelled { .. } => EventFamily::OrderCancelled,
			ExchangeEvent::OrderFulfilled { .. } => EventFamily::OrderFulfilled,
			ExchangeEvent::Trade(_) => EventFamily::Trade,
			ExchangeEvent::Deposit(_) => EventFamily::Deposit,
			ExchangeEvent::Withdrawal(_) => EventFamily::Withdrawal,
		}
	}
}

/// An event together with where it was found on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
	pub block_number: u64,
	pub txid: String,
	/// Position of the log within its transaction
	pub log_index: usize,
	pub event: ExchangeEvent,
}

/// Error types for event decoding
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
	#[error("Invalid hex: {0}")]
	Hex(#[from] hex::FromHexError),

	#[error("Log has {actual} topics, expected {expected}")]
	TopicCount { expected: usize, actual: usize },

	#[error("Log data truncated at offset {0}")]
	Truncated(usize),

	#[error("Integer does not fit in 128 bits")]
	Overflow,

	#[error("Invalid UTF-8 string parameter")]
	InvalidUtf8(#[from] std::string::FromUtf8Error),

	#[error("Expected {expected} event, decoded {actual}")]
	FamilyMismatch {
		expected: EventFamily,
		actual: EventFamily,
	},

	#[error("Malformed log: {0}")]
	Malformed(String),
}

/// Turns a raw log of a known family into a typed event.
pub trait EventDecoder: Send + Sync {
	fn decode(&self, family: EventFamily, log: &RawLog) -> Result<ExchangeEvent, DecodeError>;
}

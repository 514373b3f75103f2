//! ABI log decoder with a static parameter schema per event family.

use super::*;
use crate::utils::normalize_hex;

const WORD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
	Address,
	Uint,
	Text,
}

#[derive(Debug, Clone, Copy)]
struct Param {
	kind: Kind,
	indexed: bool,
}

const fn data(kind: Kind) -> Param {
	Param {
		kind,
		indexed: false,
	}
}

const fn topic(kind: Kind) -> Param {
	Param {
		kind,
		indexed: true,
	}
}

use Kind::{Address, Text, Uint};

// (address token, string symbol, string name, string version, string logo, uint8 decimals, uint256 time)
const LISTING: &[Param] = &[
	data(Address),
	data(Text),
	data(Text),
	data(Text),
	data(Text),
	data(Uint),
	data(Uint),
];
const LISTING_DELETED: &[Param] = &[data(Address), data(Uint)];
// (address owner, uint256 id, address sellToken, address buyToken, uint256 amount,
//  uint256 priceMul, uint256 priceDiv, uint256 time)
const NEW_ORDER: &[Param] = &[
	data(Address),
	data(Uint),
	data(Address),
	data(Address),
	data(Uint),
	data(Uint),
	data(Uint),
	data(Uint),
];
const ORDER_CLOSED: &[Param] = &[data(Uint), data(Uint)];
// (uint256 indexed orderId, address indexed from, address indexed to, uint256 sold,
//  uint256 bought, uint256 time)
const TRADE: &[Param] = &[
	topic(Uint),
	topic(Address),
	topic(Address),
	data(Uint),
	data(Uint),
	data(Uint),
];
const FUND: &[Param] = &[data(Address), data(Address), data(Uint), data(Uint)];

fn schema(family: EventFamily) -> &'static [Param] {
	match family {
		EventFamily::ListingCreated | EventFamily::ListingUpdated => LISTING,
		EventFamily::ListingDeleted => LISTING_DELETED,
		EventFamily::NewOrder => NEW_ORDER,
		EventFamily::OrderCancelled | EventFamily::OrderFulfilled => ORDER_CLOSED,
		EventFamily::Trade => TRADE,
		EventFamily::Deposit | EventFamily::Withdrawal => FUND,
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
	Address(String),
	Uint(u128),
	Text(String),
}

/// Sequential reader over decoded parameter values.
struct Values(std::vec::IntoIter<Value>);

impl Values {
	fn next(&mut self) -> Result<Value, DecodeError> {
		self.0
			.next()
			.ok_or_else(|| DecodeError::Malformed("missing parameter".to_string()))
	}

	fn address(&mut self) -> Result<String, DecodeError> {
		match self.next()? {
			Value::Address(address) => Ok(address),
			other => Err(DecodeError::Malformed(format!(
				"expected address, got {:?}",
				other
			))),
		}
	}

	fn uint(&mut self) -> Result<u128, DecodeError> {
		match self.next()? {
			Value::Uint(value) => Ok(value),
			other => Err(DecodeError::Malformed(format!(
				"expected uint, got {:?}",
				other
			))),
		}
	}

	fn text(&mut self) -> Result<String, DecodeError> {
		match self.next()? {
			Value::Text(text) => Ok(text),
			other => Err(DecodeError::Malformed(format!(
				"expected string, got {:?}",
				other
			))),
		}
	}

	fn time(&mut self) -> Result<u64, DecodeError> {
		u64::try_from(self.uint()?).map_err(|_| DecodeError::Overflow)
	}

	fn small(&mut self) -> Result<u32, DecodeError> {
		u32::try_from(self.uint()?).map_err(|_| DecodeError::Overflow)
	}
}

/// Decodes exchange and registry logs following the contracts' ABI layout.
#[derive(Debug, Default, Clone)]
pub struct AbiEventDecoder;

impl AbiEventDecoder {
	pub fn new() -> Self {
		Self
	}
}

impl EventDecoder for AbiEventDecoder {
	fn decode(&self, family: EventFamily, log: &RawLog) -> Result<ExchangeEvent, DecodeError> {
		let mut values = Values(decode_params(schema(family), log)?.into_iter());

		let event = match family {
			EventFamily::ListingCreated | EventFamily::ListingUpdated => {
				let listing = ListingEvent {
					token_address: values.address()?,
					symbol: values.text()?,
					name: values.text()?,
					version: values.text()?,
					image: values.text()?,
					decimals: values.small()?,
					time: values.time()?,
				};
				if family == EventFamily::ListingCreated {
					ExchangeEvent::ListingCreated(listing)
				} else {
					ExchangeEvent::ListingUpdated(listing)
				}
			}
			EventFamily::ListingDeleted => ExchangeEvent::ListingDeleted {
				token_address: values.address()?,
				time: values.time()?,
			},
			EventFamily::NewOrder => ExchangeEvent::NewOrder(NewOrderEvent {
				owner: values.address()?,
				order_id: values.uint()?.to_string(),
				sell_token: values.address()?,
				buy_token: values.address()?,
				amount: values.uint()?,
				price_mul: values.uint()?,
				price_div: values.uint()?,
				time: values.time()?,
			}),
			EventFamily::OrderCancelled => ExchangeEvent::OrderCancelled {
				order_id: values.uint()?.to_string(),
				time: values.time()?,
			},
			EventFamily::OrderFulfilled => ExchangeEvent::OrderFulfilled {
				order_id: values.uint()?.to_string(),
				time: values.time()?,
			},
			EventFamily::Trade => ExchangeEvent::Trade(TradeEvent {
				order_id: values.uint()?.to_string(),
				from: values.address()?,
				to: values.address()?,
				sold_tokens: values.uint()?,
				bought_tokens: values.uint()?,
				time: values.time()?,
			}),
			EventFamily::Deposit | EventFamily::Withdrawal => {
				let fund = FundEvent {
					token_address: values.address()?,
					owner: values.address()?,
					amount: values.uint()?,
					time: values.time()?,
				};
				if family == EventFamily::Deposit {
					ExchangeEvent::Deposit(fund)
				} else {
					ExchangeEvent::Withdrawal(fund)
				}
			}
		};

		Ok(event)
	}
}

/// Decodes parameters in declaration order, pulling indexed ones from topics 1.. and the rest
/// from the data section.
fn decode_params(params: &[Param], log: &RawLog) -> Result<Vec<Value>, DecodeError> {
	let indexed = params.iter().filter(|p| p.indexed).count();
	if log.topics.len() != indexed + 1 {
		return Err(DecodeError::TopicCount {
			expected: indexed + 1,
			actual: log.topics.len(),
		});
	}

	let data = hex::decode(normalize_hex(&log.data))?;
	let mut topics = log.topics.iter().skip(1);
	let mut head = 0usize;
	let mut values = Vec::with_capacity(params.len());

	for param in params {
		let value = if param.indexed {
			let topic = topics.next().ok_or(DecodeError::TopicCount {
				expected: indexed + 1,
				actual: log.topics.len(),
			})?;
			let word = hex::decode(normalize_hex(topic))?;
			if word.len() != WORD {
				return Err(DecodeError::Malformed(format!(
					"topic is {} bytes",
					word.len()
				)));
			}
			match param.kind {
				Address => Value::Address(word_to_address(&word)),
				Uint => Value::Uint(word_to_uint(&word)?),
				Text => {
					return Err(DecodeError::Malformed(
						"indexed string parameters are hashed".to_string(),
					));
				}
			}
		} else {
			let word = read_word(&data, head)?;
			head += WORD;
			match param.kind {
				Address => Value::Address(word_to_address(word)),
				Uint => Value::Uint(word_to_uint(word)?),
				Text => Value::Text(read_string(&data, word_to_offset(word)?)?),
			}
		};
		values.push(value);
	}

	Ok(values)
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], DecodeError> {
	offset
		.checked_add(WORD)
		.and_then(|end| data.get(offset..end))
		.ok_or(DecodeError::Truncated(offset))
}

fn word_to_address(word: &[u8]) -> String {
	hex::encode(&word[WORD - 20..])
}

fn word_to_uint(word: &[u8]) -> Result<u128, DecodeError> {
	let (high, low) = word.split_at(WORD - 16);
	if high.iter().any(|b| *b != 0) {
		return Err(DecodeError::Overflow);
	}
	let mut bytes = [0u8; 16];
	bytes.copy_from_slice(low);
	Ok(u128::from_be_bytes(bytes))
}

fn word_to_offset(word: &[u8]) -> Result<usize, DecodeError> {
	usize::try_from(word_to_uint(word)?).map_err(|_| DecodeError::Overflow)
}

fn read_string(data: &[u8], offset: usize) -> Result<String, DecodeError> {
	let length = word_to_offset(read_word(data, offset)?)?;
	let start = offset + WORD;
	let bytes = start
		.checked_add(length)
		.and_then(|end| data.get(start..end))
		.ok_or(DecodeError::Truncated(start))?;
	Ok(String::from_utf8(bytes.to_vec())?)
}

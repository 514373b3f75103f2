//! Scripted chain, pass-through decoder and fixtures shared by unit tests.

use crate::chain::{
	AddressBalanceEntry, BlockHeader, ChainConnector, ChainError, LogEntry, PeerInfo, RawLog,
	TransactionReceipt, WalletTransaction,
};
use crate::config::{
	ContractMetadata, EngineConfig, ExchangeContract, ExchangeTopics, RegistryContract,
	RegistryTopics, TokenInfo,
};
use crate::decoder::{
	DecodeError, DecodedEvent, EventDecoder, EventFamily, ExchangeEvent, ListingEvent,
	NewOrderEvent, TradeEvent,
};
use crate::publisher::BroadcastPublisher;
use crate::store::{Market, MemoryStore, Order, OrderType, PriceFraction, Trade, TxStatus};
use crate::sync::{ChartAggregator, ProjectionContext, SyncOrchestrator};
use crate::utils::normalize_hex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "7e5b6c0f3c2a4b9d8e1f0a2b3c4d5e6f7a8b9c0d";
pub const BASE: &str = "0000000000000000000000000000000000000000";
pub const OWNER: &str = "4d3c2b1a0f9e8d7c6b5a49382716f5e4d3c2b1a0";
pub const COUNTERPARTY: &str = "9f8e7d6c5b4a39281706f5e4d3c2b1a09f8e7d6c";
pub const EXCHANGE: &str = "e1e2e3e4e5e6e7e8e9e0e1e2e3e4e5e6e7e8e9e0";
pub const REGISTRY: &str = "a1a2a3a4a5a6a7a8a9a0a1a2a3a4a5a6a7a8a9a0";

/// Block time of heights without an explicit block.
const FAKE_BLOCK_TIME_BASE: u64 = 1_600_000_000;

fn topic(tag: u8) -> String {
	format!("{:02x}", tag).repeat(32)
}

pub fn test_metadata() -> ContractMetadata {
	ContractMetadata {
		exchange: ExchangeContract {
			address: EXCHANGE.to_string(),
			topics: ExchangeTopics {
				new_order: topic(0x11),
				order_cancelled: topic(0x12),
				order_fulfilled: topic(0x13),
				trade: topic(0x14),
				deposit: topic(0x15),
				withdrawal: topic(0x16),
			},
		},
		registry: RegistryContract {
			address: REGISTRY.to_string(),
			topics: RegistryTopics {
				listing_created: topic(0x21),
				listing_updated: topic(0x22),
				listing_deleted: topic(0x23),
			},
		},
		base_currency: TokenInfo {
			pair: "RUNES".to_string(),
			name: "Runebase".to_string(),
			address: BASE.to_string(),
			decimals: 8,
		},
		tokens: vec![TokenInfo {
			pair: "TKN".to_string(),
			name: "Token".to_string(),
			address: TOKEN.to_string(),
			decimals: 8,
		}],
		contract_deployed_block: 0,
	}
}

pub fn test_config() -> EngineConfig {
	EngineConfig {
		enable_persistence: false,
		cycle_delay_secs: 1,
		metadata: test_metadata(),
		..EngineConfig::default()
	}
}

#[derive(Default)]
struct FakeState {
	height: u64,
	fail_block_count: bool,
	/// height -> (hash, time)
	blocks: HashMap<u64, (String, u64)>,
	failing_blocks: HashSet<u64>,
	logs: Vec<LogEntry>,
	receipts: HashMap<String, Vec<TransactionReceipt>>,
	fail_receipts: bool,
	wallet_transactions: HashMap<String, WalletTransaction>,
	peers: Vec<PeerInfo>,
	groupings: Vec<AddressBalanceEntry>,
	hex_addresses: HashMap<String, String>,
	labels: HashMap<String, Vec<String>>,
	/// (token, holder hex) -> amount
	exchange_balances: HashMap<(String, String), u128>,
	token_balances: HashMap<(String, String), u128>,
	allowances: HashMap<(String, String), u128>,
	fail_contract_calls: bool,
}

/// In-memory chain whose answers are scripted by the test.
pub struct FakeChain {
	metadata: ContractMetadata,
	state: Mutex<FakeState>,
}

fn rpc_error(message: &str) -> ChainError {
	ChainError::RpcError {
		code: -5,
		message: message.to_string(),
	}
}

impl FakeChain {
	pub fn new() -> Self {
		Self {
			metadata: test_metadata(),
			state: Mutex::new(FakeState::default()),
		}
	}

	pub fn raw_log(address: &str, topic: &str, data: &str) -> RawLog {
		RawLog {
			address: address.to_string(),
			topics: vec![topic.to_string()],
			data: data.to_string(),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
		self.state.lock().unwrap()
	}

	pub fn set_height(&self, height: u64) {
		self.state().height = height;
	}

	pub fn fail_block_count(&self, fail: bool) {
		self.state().fail_block_count = fail;
	}

	pub fn set_block(&self, height: u64, hash: &str, time: u64) {
		self.state().blocks.insert(height, (hash.to_string(), time));
	}

	pub fn fail_block_at(&self, height: u64) {
		self.state().failing_blocks.insert(height);
	}

	/// Emits `event` as a log of `family` in transaction `txid` at `block`.
	pub fn push_event(&self, block: u64, txid: &str, family: EventFamily, event: ExchangeEvent) {
		let data = serde_json::to_string(&event).unwrap();
		self.push_raw(block, txid, family, &data);
	}

	/// Emits a log of `family` whose data is `data` verbatim.
	pub fn push_raw(&self, block: u64, txid: &str, family: EventFamily, data: &str) {
		let filter = self.metadata.log_filter(family);
		self.state().logs.push(LogEntry {
			block_number: block,
			transaction_hash: txid.to_string(),
			log: vec![Self::raw_log(&filter.address, &filter.topic, data)],
		});
	}

	pub fn set_receipt(&self, txid: &str, receipt: TransactionReceipt) {
		self.state()
			.receipts
			.insert(txid.to_string(), vec![receipt]);
	}

	pub fn fail_receipts(&self, fail: bool) {
		self.state().fail_receipts = fail;
	}

	pub fn set_wallet_transaction(&self, txid: &str, confirmations: i64, fee: Option<Decimal>) {
		self.state()
			.wallet_transactions
			.insert(txid.to_string(), WalletTransaction { confirmations, fee });
	}

	pub fn set_peer_headers(&self, headers: &[Option<i64>]) {
		self.state().peers = headers
			.iter()
			.map(|synced_headers| PeerInfo {
				synced_headers: *synced_headers,
			})
			.collect();
	}

	/// Adds a wallet address holding `amount` of the base currency, known by `hex` on chain.
	pub fn add_grouping(&self, address: &str, amount: Decimal, hex: &str) {
		let mut state = self.state();
		state.groupings.push(AddressBalanceEntry {
			address: address.to_string(),
			amount,
		});
		state
			.hex_addresses
			.insert(address.to_string(), hex.to_string());
	}

	pub fn set_exchange_balance(&self, token: &str, holder_hex: &str, amount: u128) {
		self.state()
			.exchange_balances
			.insert((token.to_string(), holder_hex.to_string()), amount);
	}

	pub fn set_token_balance(&self, token: &str, holder_hex: &str, amount: u128) {
		self.state()
			.token_balances
			.insert((token.to_string(), holder_hex.to_string()), amount);
	}

	pub fn set_allowance(&self, token: &str, owner_hex: &str, amount: u128) {
		self.state()
			.allowances
			.insert((token.to_string(), owner_hex.to_string()), amount);
	}

	pub fn fail_contract_calls(&self, fail: bool) {
		self.state().fail_contract_calls = fail;
	}

	fn contract_read(
		&self,
		table: impl Fn(&FakeState) -> &HashMap<(String, String), u128>,
		token: &str,
		holder: &str,
	) -> Result<u128, ChainError> {
		let state = self.state();
		if state.fail_contract_calls {
			return Err(rpc_error("callcontract failed"));
		}
		Ok(table(&*state)
			.get(&(token.to_string(), holder.to_string()))
			.copied()
			.unwrap_or_default())
	}
}

#[async_trait::async_trait]
impl ChainConnector for FakeChain {
	async fn get_block_count(&self) -> Result<u64, ChainError> {
		let state = self.state();
		if state.fail_block_count {
			return Err(rpc_error("node unavailable"));
		}
		Ok(state.height)
	}

	async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
		let state = self.state();
		if state.failing_blocks.contains(&height) {
			return Err(rpc_error("Block height out of range"));
		}
		Ok(state
			.blocks
			.get(&height)
			.map(|(hash, _)| hash.clone())
			.unwrap_or_else(|| format!("hash-{}", height)))
	}

	async fn get_block(&self, hash: &str) -> Result<BlockHeader, ChainError> {
		let state = self.state();
		if let Some((height, (_, time))) = state.blocks.iter().find(|(_, (known, _))| known == hash) {
			return Ok(BlockHeader {
				hash: hash.to_string(),
				height: *height,
				time: *time,
			});
		}
		let height: u64 = hash
			.strip_prefix("hash-")
			.and_then(|height| height.parse().ok())
			.ok_or(ChainError::NoData)?;
		Ok(BlockHeader {
			hash: hash.to_string(),
			height,
			time: FAKE_BLOCK_TIME_BASE + height,
		})
	}

	async fn search_logs(
		&self,
		from_block: u64,
		to_block: u64,
		contract_address: &str,
		topics: &[String],
	) -> Result<Vec<LogEntry>, ChainError> {
		let mut entries: Vec<LogEntry> = self
			.state()
			.logs
			.iter()
			.filter(|entry| (from_block..=to_block).contains(&entry.block_number))
			.filter(|entry| {
				entry.log.iter().any(|log| {
					normalize_hex(&log.address) == normalize_hex(contract_address)
						&& log.topics.first().is_some_and(|first| topics.contains(first))
				})
			})
			.cloned()
			.collect();
		entries.sort_by_key(|entry| entry.block_number);
		Ok(entries)
	}

	async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, ChainError> {
		Ok(self.state().peers.clone())
	}

	async fn get_connection_count(&self) -> Result<u64, ChainError> {
		Ok(self.state().peers.len() as u64)
	}

	async fn get_hex_address(&self, address: &str) -> Result<String, ChainError> {
		self.state()
			.hex_addresses
			.get(address)
			.cloned()
			.ok_or_else(|| rpc_error("Invalid address"))
	}

	async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction, ChainError> {
		self.state()
			.wallet_transactions
			.get(txid)
			.cloned()
			.ok_or_else(|| rpc_error("Invalid or non-wallet transaction id"))
	}

	async fn get_transaction_receipt(
		&self,
		txid: &str,
	) -> Result<Vec<TransactionReceipt>, ChainError> {
		let state = self.state();
		if state.fail_receipts {
			return Err(rpc_error("receipt index unavailable"));
		}
		Ok(state.receipts.get(txid).cloned().unwrap_or_default())
	}

	async fn exchange_balance_of(
		&self,
		_exchange: &str,
		token: &str,
		user_hex: &str,
		_sender: &str,
	) -> Result<u128, ChainError> {
		self.contract_read(|state| &state.exchange_balances, token, user_hex)
	}

	async fn token_balance_of(
		&self,
		token: &str,
		owner_hex: &str,
		_sender: &str,
	) -> Result<u128, ChainError> {
		self.contract_read(|state| &state.token_balances, token, owner_hex)
	}

	async fn token_allowance(
		&self,
		token: &str,
		owner_hex: &str,
		_spender_hex: &str,
		_sender: &str,
	) -> Result<u128, ChainError> {
		self.contract_read(|state| &state.allowances, token, owner_hex)
	}

	async fn list_address_groupings(&self) -> Result<Vec<AddressBalanceEntry>, ChainError> {
		Ok(self.state().groupings.clone())
	}

	async fn get_addresses_by_label(&self, label: &str) -> Result<Vec<String>, ChainError> {
		Ok(self.state().labels.get(label).cloned().unwrap_or_default())
	}

	async fn get_new_address(&self, label: &str) -> Result<String, ChainError> {
		let address = format!("{}-address", label);
		self.state()
			.labels
			.entry(label.to_string())
			.or_default()
			.push(address.clone());
		Ok(address)
	}
}

/// Decodes logs whose data is a JSON `ExchangeEvent`.
pub struct FakeDecoder;

impl EventDecoder for FakeDecoder {
	fn decode(&self, family: EventFamily, log: &RawLog) -> Result<ExchangeEvent, DecodeError> {
		let event: ExchangeEvent = serde_json::from_str(&log.data)
			.map_err(|e| DecodeError::Malformed(e.to_string()))?;
		if event.family() != family {
			return Err(DecodeError::FamilyMismatch {
				expected: family,
				actual: event.family(),
			});
		}
		Ok(event)
	}
}

/// Store, publisher, chain and config wired together the way the engine wires them.
pub struct TestEngine {
	pub store: Arc<MemoryStore>,
	pub publisher: Arc<BroadcastPublisher>,
	pub chain: Arc<FakeChain>,
	pub config: Arc<EngineConfig>,
}

impl TestEngine {
	pub fn new() -> Self {
		Self::with_store(Arc::new(FakeChain::new()), MemoryStore::new())
	}

	pub fn with_store(chain: Arc<FakeChain>, store: MemoryStore) -> Self {
		Self {
			store: Arc::new(store),
			publisher: Arc::new(BroadcastPublisher::new(1024)),
			chain,
			config: Arc::new(test_config()),
		}
	}

	pub fn context(&self) -> ProjectionContext {
		ProjectionContext::new(
			self.store.clone(),
			self.publisher.clone(),
			self.config.clone(),
		)
	}

	pub fn charts(&self) -> Arc<ChartAggregator> {
		Arc::new(ChartAggregator::new(
			self.store.clone(),
			self.publisher.clone(),
		))
	}

	pub fn orchestrator(&self) -> SyncOrchestrator {
		SyncOrchestrator::new(
			self.chain.clone(),
			self.store.clone(),
			self.publisher.clone(),
			Arc::new(FakeDecoder),
			self.config.clone(),
		)
	}
}

pub fn decoded(block: u64, txid: &str, event: ExchangeEvent) -> DecodedEvent {
	DecodedEvent {
		block_number: block,
		txid: txid.to_string(),
		log_index: 0,
		event,
	}
}

pub fn listing_event(symbol: &str, decimals: u32, time: u64) -> ListingEvent {
	ListingEvent {
		token_address: TOKEN.to_string(),
		symbol: symbol.to_string(),
		name: "Token".to_string(),
		version: "1".to_string(),
		image: String::new(),
		decimals,
		time,
	}
}

pub fn market_fixture(symbol: &str, decimals: u32) -> Market {
	Market {
		address: TOKEN.to_string(),
		symbol: symbol.to_string(),
		name: "Token".to_string(),
		version: "1".to_string(),
		image: String::new(),
		decimals,
		start_time: 1_000,
		registered: true,
		price: Decimal::ZERO,
		change: Decimal::ZERO,
		volume: Decimal::ZERO,
	}
}

pub fn new_order_event(
	order_id: &str,
	sell_token: &str,
	buy_token: &str,
	amount: u128,
	price_mul: u128,
	price_div: u128,
	time: u64,
) -> NewOrderEvent {
	NewOrderEvent {
		owner: OWNER.to_string(),
		order_id: order_id.to_string(),
		sell_token: sell_token.to_string(),
		buy_token: buy_token.to_string(),
		amount,
		price_mul,
		price_div,
		time,
	}
}

pub fn trade_event(order_id: &str, sold_tokens: u128, bought_tokens: u128, time: u64) -> TradeEvent {
	TradeEvent {
		order_id: order_id.to_string(),
		from: COUNTERPARTY.to_string(),
		to: OWNER.to_string(),
		sold_tokens,
		bought_tokens,
		time,
	}
}

/// ACTIVE sell order of 1000 TKN at 1/2.
pub fn order_fixture(order_id: &str, txid: &str) -> Order {
	Order {
		order_id: Some(order_id.to_string()),
		txid: txid.to_string(),
		owner: OWNER.to_string(),
		sell_token: TOKEN.to_string(),
		buy_token: BASE.to_string(),
		token_address: TOKEN.to_string(),
		token: "TKN".to_string(),
		token_name: "Token".to_string(),
		decimals: 8,
		order_type: OrderType::Sell,
		price: PriceFraction::new(1, 2).unwrap(),
		amount: 1000,
		start_amount: 1000,
		status: TxStatus::Active,
		time: 5_000,
		block_num: Some(1),
		tx_canceled: None,
		time_canceled: None,
		tx_fulfilled: None,
		time_fulfilled: None,
		gas_used: None,
		block_time: None,
	}
}

/// CONFIRMED, already applied fill of 400 TKN against `order_id`.
pub fn trade_fixture(txid: &str, order_id: &str) -> Trade {
	Trade {
		txid: txid.to_string(),
		order_id: order_id.to_string(),
		from: OWNER.to_string(),
		to: COUNTERPARTY.to_string(),
		sold_tokens: 400,
		bought_tokens: 200,
		amount: 400,
		price: PriceFraction::new(1, 2).unwrap(),
		order_type: OrderType::Sell,
		token_address: TOKEN.to_string(),
		token: "TKN".to_string(),
		token_name: "Token".to_string(),
		decimals: 8,
		status: TxStatus::Confirmed,
		time: 7_200,
		block_num: Some(2),
		gas_used: None,
		block_time: None,
		order_applied: true,
	}
}

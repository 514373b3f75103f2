//!
//! Engine configuration.
//!
//! `EngineConfig` is resolved once at startup (defaults overridden by environment variables) and
//! shared by `Arc` with every component. Contract addresses, event topics and the token table live
//! in `ContractMetadata`, loaded from a JSON file.

use crate::decoder::EventFamily;
use crate::utils::{BASE_CURRENCY_DECIMALS, normalize_hex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of blocks scanned per batch.
pub const DEFAULT_BLOCK_BATCH_SIZE: u64 = 200;
/// Default number of wallet addresses (or pending records) read concurrently.
pub const DEFAULT_ADDRESS_BATCH_SIZE: usize = 5;
/// Default per-family projection fan-out.
pub const DEFAULT_PROJECTION_CONCURRENCY: usize = 8;
/// Default pause between sync cycles.
pub const DEFAULT_CYCLE_DELAY_SECS: u64 = 5;
/// Block times older than this relative to now mean the node is still catching up.
pub const DEFAULT_SYNC_THRESHOLD_SECS: u64 = 1200;
/// Timestamp of the chain's first block, used to estimate sync progress.
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_504_695_029;

/// Errors raised while resolving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid value for {name}: {value}")]
	InvalidValue { name: &'static str, value: String },

	#[error("Failed to read contract metadata {path}: {source}")]
	MetadataIo {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse contract metadata: {0}")]
	MetadataParse(#[from] serde_json::Error),
}

/// Event topics emitted by the exchange contract
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeTopics {
	pub new_order: String,
	pub order_cancelled: String,
	pub order_fulfilled: String,
	pub trade: String,
	pub deposit: String,
	pub withdrawal: String,
}

/// Event topics emitted by the token registry contract
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryTopics {
	pub listing_created: String,
	pub listing_updated: String,
	pub listing_deleted: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeContract {
	pub address: String,
	pub topics: ExchangeTopics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryContract {
	pub address: String,
	pub topics: RegistryTopics,
}

/// A token known to the deployment (the base currency or a configured listing)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
	/// Trading symbol, e.g. `RUNES`
	pub pair: String,
	pub name: String,
	/// Hex contract address; the base currency uses the zero address
	pub address: String,
	pub decimals: u32,
}

impl Default for TokenInfo {
	fn default() -> Self {
		Self {
			pair: "RUNES".to_string(),
			name: "Runebase".to_string(),
			address: "0".repeat(40),
			decimals: BASE_CURRENCY_DECIMALS,
		}
	}
}

/// Deployment metadata: contract addresses, event topics and token table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetadata {
	pub exchange: ExchangeContract,
	pub registry: RegistryContract,
	pub base_currency: TokenInfo,
	#[serde(default)]
	pub tokens: Vec<TokenInfo>,
	#[serde(default)]
	pub contract_deployed_block: u64,
}

/// Contract address and topic that select one event family in `searchlogs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
	pub address: String,
	pub topic: String,
}

impl ContractMetadata {
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(raw)?)
	}

	/// Reads metadata from a JSON file on disk.
	pub fn load(path: &str) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::MetadataIo {
			path: path.to_string(),
			source,
		})?;
		Self::from_json(&raw)
	}

	/// Returns the contract address and topic hash for an event family.
	pub fn log_filter(&self, family: EventFamily) -> LogFilter {
		let exchange = |topic: &str| LogFilter {
			address: normalize_hex(&self.exchange.address),
			topic: normalize_hex(topic),
		};
		let registry = |topic: &str| LogFilter {
			address: normalize_hex(&self.registry.address),
			topic: normalize_hex(topic),
		};
		let exchange_topics = &self.exchange.topics;
		let registry_topics = &self.registry.topics;

		match family {
			EventFamily::ListingCreated => registry(&registry_topics.listing_created),
			EventFamily::ListingUpdated => registry(&registry_topics.listing_updated),
			EventFamily::ListingDeleted => registry(&registry_topics.listing_deleted),
			EventFamily::NewOrder => exchange(&exchange_topics.new_order),
			EventFamily::OrderCancelled => exchange(&exchange_topics.order_cancelled),
			EventFamily::OrderFulfilled => exchange(&exchange_topics.order_fulfilled),
			EventFamily::Trade => exchange(&exchange_topics.trade),
			EventFamily::Deposit => exchange(&exchange_topics.deposit),
			EventFamily::Withdrawal => exchange(&exchange_topics.withdrawal),
		}
	}

	/// Normalised hex address of the base currency.
	pub fn base_address(&self) -> String {
		normalize_hex(&self.base_currency.address)
	}
}

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// JSON-RPC endpoint of the chain node
	pub rpc_url: String,
	pub rpc_user: String,
	pub rpc_password: String,
	pub request_timeout_secs: u64,
	/// Directory for store snapshots
	pub data_dir: PathBuf,
	pub enable_persistence: bool,
	pub block_batch_size: u64,
	pub address_batch_size: usize,
	pub projection_concurrency: usize,
	pub cycle_delay_secs: u64,
	pub sync_threshold_secs: u64,
	pub genesis_timestamp: u64,
	/// Gas price used to back-compute gas from a wallet transaction fee
	pub default_gas_price: Decimal,
	pub metadata: ContractMetadata,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			rpc_url: "http://127.0.0.1:9432".to_string(),
			rpc_user: "user".to_string(),
			rpc_password: "password".to_string(),
			request_timeout_secs: 30,
			data_dir: PathBuf::from("./data"),
			enable_persistence: true,
			block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
			address_batch_size: DEFAULT_ADDRESS_BATCH_SIZE,
			projection_concurrency: DEFAULT_PROJECTION_CONCURRENCY,
			cycle_delay_secs: DEFAULT_CYCLE_DELAY_SECS,
			sync_threshold_secs: DEFAULT_SYNC_THRESHOLD_SECS,
			genesis_timestamp: DEFAULT_GENESIS_TIMESTAMP,
			default_gas_price: Decimal::new(4, 7),
			metadata: ContractMetadata::default(),
		}
	}
}

impl EngineConfig {
	/// Builds the configuration from defaults overridden by environment variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Same as [`EngineConfig::from_env`] with a custom variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(url) = lookup("RPC_URL") {
			config.rpc_url = url;
		}
		if let Some(user) = lookup("RPC_USER") {
			config.rpc_user = user;
		}
		if let Some(password) = lookup("RPC_PASSWORD") {
			config.rpc_password = password;
		}
		if let Some(dir) = lookup("DATA_DIR") {
			config.data_dir = PathBuf::from(dir);
		}
		if let Some(value) = parse_var(&lookup, "RPC_TIMEOUT_SECS")? {
			config.request_timeout_secs = value;
		}
		if let Some(value) = parse_var(&lookup, "ENABLE_PERSISTENCE")? {
			config.enable_persistence = value;
		}
		if let Some(value) = parse_var(&lookup, "BLOCK_BATCH_SIZE")? {
			config.block_batch_size = value;
		}
		if let Some(value) = parse_var(&lookup, "ADDRESS_BATCH_SIZE")? {
			config.address_batch_size = value;
		}
		if let Some(value) = parse_var(&lookup, "PROJECTION_CONCURRENCY")? {
			config.projection_concurrency = value;
		}
		if let Some(value) = parse_var(&lookup, "CYCLE_DELAY_SECS")? {
			config.cycle_delay_secs = value;
		}
		if let Some(path) = lookup("CONTRACT_METADATA_PATH") {
			config.metadata = ContractMetadata::load(&path)?;
		}

		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.block_batch_size == 0 {
			return Err(ConfigError::InvalidValue {
				name: "BLOCK_BATCH_SIZE",
				value: "0".to_string(),
			});
		}
		if self.address_batch_size == 0 {
			return Err(ConfigError::InvalidValue {
				name: "ADDRESS_BATCH_SIZE",
				value: "0".to_string(),
			});
		}
		if self.projection_concurrency == 0 {
			return Err(ConfigError::InvalidValue {
				name: "PROJECTION_CONCURRENCY",
				value: "0".to_string(),
			});
		}
		Ok(())
	}
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
	F: Fn(&str) -> Option<String>,
	T: FromStr,
{
	match lookup(name) {
		Some(raw) => raw
			.trim()
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::InvalidValue { name, value: raw }),
		None => Ok(None),
	}
}

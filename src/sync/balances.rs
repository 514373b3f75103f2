use crate::chain::{AddressBalanceEntry, ChainConnector, ChainError};
use crate::config::EngineConfig;
use crate::store::{LocalStore, Market};
use crate::utils::base_units_to_display;
use futures::future::join_all;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

const DEFAULT_LABEL: &str = "default";

/// Wallet and exchange balances of one wallet address, keyed by token symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressBalance {
	pub address: String,
	pub wallet: BTreeMap<String, Decimal>,
	pub exchange: BTreeMap<String, Decimal>,
}

/// Builds the per-address balance snapshot published with the sync status.
pub struct BalanceAggregator {
	chain: Arc<dyn ChainConnector>,
	store: Arc<dyn LocalStore>,
	config: Arc<EngineConfig>,
}

impl BalanceAggregator {
	pub fn new(
		chain: Arc<dyn ChainConnector>,
		store: Arc<dyn LocalStore>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			chain,
			store,
			config,
		}
	}

	/// Balances of every wallet address; read failures are logged and the value omitted.
	pub async fn snapshot(&self) -> Vec<AddressBalance> {
		let groupings = match self.chain.list_address_groupings().await {
			Ok(groupings) => groupings,
			Err(e) => {
				error!("Failed to list wallet addresses: {}", e);
				return Vec::new();
			}
		};
		let entries: Vec<AddressBalanceEntry> = groupings
			.into_iter()
			.unique_by(|entry| entry.address.clone())
			.collect();

		if entries.is_empty() {
			return match self.placeholder().await {
				Ok(balance) => vec![balance],
				Err(e) => {
					error!("Failed to resolve default wallet address: {}", e);
					Vec::new()
				}
			};
		}

		let markets: Vec<Market> = match self.store.list_markets().await {
			Ok(markets) => markets.into_iter().filter(|market| market.registered).collect(),
			Err(e) => {
				error!("Failed to list markets for balances: {}", e);
				Vec::new()
			}
		};

		let mut balances = Vec::with_capacity(entries.len());
		for chunk in entries.chunks(self.config.address_batch_size.max(1)) {
			let batch = join_all(chunk.iter().map(|entry| self.address_balance(entry, &markets))).await;
			balances.extend(batch);
		}

		debug!("Collected balances of {} addresses", balances.len());
		balances
	}

	async fn address_balance(&self, entry: &AddressBalanceEntry, markets: &[Market]) -> AddressBalance {
		let metadata = &self.config.metadata;
		let base = &metadata.base_currency;
		let mut balance = AddressBalance {
			address: entry.address.clone(),
			wallet: BTreeMap::from([(base.pair.clone(), entry.amount)]),
			exchange: BTreeMap::new(),
		};

		let hex_address = match self.chain.get_hex_address(&entry.address).await {
			Ok(hex_address) => hex_address,
			Err(e) => {
				warn!("Failed to resolve hex address of {}: {}", entry.address, e);
				return balance;
			}
		};

		let exchange_address = metadata.exchange.address.as_str();
		let base_address = metadata.base_address();
		let hex_address = hex_address.as_str();
		let entry_address = entry.address.as_str();
		let chain = &self.chain;

		let (exchange_base, exchange_tokens, wallet_tokens) = tokio::join!(
			chain.exchange_balance_of(exchange_address, &base_address, hex_address, entry_address),
			join_all(markets.iter().map(|market| async move {
				let amount = chain
					.exchange_balance_of(exchange_address, &market.address, hex_address, entry_address)
					.await;
				(market, amount)
			})),
			join_all(markets.iter().map(|market| async move {
				let amount = chain
					.token_balance_of(&market.address, hex_address, entry_address)
					.await;
				(market, amount)
			})),
		);

		if let Some(amount) = display_amount(exchange_base, base.decimals, &base.pair, &entry.address) {
			balance.exchange.insert(base.pair.clone(), amount);
		}
		for (market, amount) in exchange_tokens {
			if let Some(amount) = display_amount(amount, market.decimals, &market.symbol, &entry.address) {
				balance.exchange.insert(market.symbol.clone(), amount);
			}
		}
		for (market, amount) in wallet_tokens {
			if let Some(amount) = display_amount(amount, market.decimals, &market.symbol, &entry.address) {
				balance.wallet.insert(market.symbol.clone(), amount);
			}
		}

		balance
	}

	/// Zero balances for the default wallet address when the wallet has none with funds.
	async fn placeholder(&self) -> Result<AddressBalance, ChainError> {
		let address = match self
			.chain
			.get_addresses_by_label(DEFAULT_LABEL)
			.await?
			.into_iter()
			.next()
		{
			Some(address) => address,
			None => self.chain.get_new_address(DEFAULT_LABEL).await?,
		};

		let metadata = &self.config.metadata;
		let zeros: BTreeMap<String, Decimal> = metadata
			.tokens
			.iter()
			.map(|token| token.pair.clone())
			.chain(std::iter::once(metadata.base_currency.pair.clone()))
			.map(|pair| (pair, Decimal::ZERO))
			.collect();

		Ok(AddressBalance {
			address,
			wallet: zeros.clone(),
			exchange: zeros,
		})
	}
}

fn display_amount(
	amount: Result<u128, ChainError>,
	decimals: u32,
	symbol: &str,
	address: &str,
) -> Option<Decimal> {
	match amount {
		Ok(amount) => base_units_to_display(amount, decimals),
		Err(e) => {
			error!("Failed to read {} balance of {}: {}", symbol, address, e);
			None
		}
	}
}

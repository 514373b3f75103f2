//!
//! JSON-RPC client for the chain node.
//!
//! Speaks the bitcoind-style JSON-RPC 1.0 dialect (HTTP POST with basic auth) exposed by
//! Qtum-derived nodes, including the contract extensions `searchlogs`, `callcontract` and
//! `gettransactionreceipt`. Transient transport failures are retried with exponential backoff.

use super::types::*;
use crate::utils::normalize_hex;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// `balanceOf(address)`
const ERC20_BALANCE_OF: &str = "70a08231";
/// `allowance(address,address)`
const ERC20_ALLOWANCE: &str = "dd62ed3e";
/// Exchange `balanceOf(address token, address user)`
const EXCHANGE_BALANCE_OF: &str = "f7888aec";

/// Chain node JSON-RPC client
#[derive(Clone)]
pub struct RpcChainClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The node's RPC endpoint.
	rpc_url: String,
	rpc_user: String,
	rpc_password: String,
	/// Upper bound on time spent retrying a single call.
	max_retry_elapsed: Duration,
}

impl RpcChainClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The node's JSON-RPC endpoint.
	/// * `rpc_user` / `rpc_password` - Basic auth credentials.
	/// * `timeout` - Per-request timeout.
	pub fn new(
		rpc_url: String,
		rpc_user: String,
		rpc_password: String,
		timeout: Duration,
	) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			rpc_user,
			rpc_password,
			max_retry_elapsed: timeout,
		})
	}

	/// Execute a JSON-RPC call and deserialize its `result`.
	pub async fn call<T: DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, ChainError> {
		let request_body = json!({
			"jsonrpc": "1.0",
			"id": "dex-sync",
			"method": method,
			"params": params,
		});

		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.max_retry_elapsed),
			..ExponentialBackoff::default()
		};

		let response_json: Value = retry(policy, || {
			let request = self
				.http_client
				.post(&self.rpc_url)
				.basic_auth(&self.rpc_user, Some(&self.rpc_password))
				.json(&request_body);

			async move {
				let response = request.send().await.map_err(|e| {
					debug!("RPC {} request failed, retrying: {}", method, e);
					backoff::Error::transient(ChainError::from(e))
				})?;

				let status = response.status();
				if status.is_server_error() || status.is_success() {
					// The node reports RPC errors with a 500 status and an error body.
					let body: Value = response
						.json()
						.await
						.map_err(|e| backoff::Error::permanent(ChainError::from(e)))?;
					if status.is_server_error() && body.get("error").is_none_or(Value::is_null) {
						return Err(backoff::Error::transient(ChainError::UnexpectedResponse(
							format!("HTTP error: {}", status),
						)));
					}
					Ok(body)
				} else {
					Err(backoff::Error::permanent(ChainError::UnexpectedResponse(
						format!("HTTP error: {}", status),
					)))
				}
			}
		})
		.await?;

		if let Some(error) = response_json.get("error").filter(|e| !e.is_null()) {
			return Err(ChainError::RpcError {
				code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
				message: error
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("unknown error")
					.to_string(),
			});
		}

		let result = response_json
			.get("result")
			.cloned()
			.ok_or(ChainError::NoData)?;
		Ok(serde_json::from_value(result)?)
	}

	/// Runs a read-only contract call and decodes the first returned word.
	async fn call_contract_uint(
		&self,
		contract: &str,
		data: String,
		sender: &str,
	) -> Result<u128, ChainError> {
		let response: Value = self
			.call(
				"callcontract",
				json!([normalize_hex(contract), data, sender]),
			)
			.await?;

		let output = response
			.get("executionResult")
			.and_then(|result| result.get("output"))
			.and_then(Value::as_str)
			.ok_or(ChainError::NoData)?;
		decode_uint_word(output)
	}
}

#[async_trait::async_trait]
impl ChainConnector for RpcChainClient {
	async fn get_block_count(&self) -> Result<u64, ChainError> {
		self.call("getblockcount", json!([])).await
	}

	async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
		self.call("getblockhash", json!([height])).await
	}

	async fn get_block(&self, hash: &str) -> Result<BlockHeader, ChainError> {
		self.call("getblock", json!([hash])).await
	}

	async fn search_logs(
		&self,
		from_block: u64,
		to_block: u64,
		contract_address: &str,
		topics: &[String],
	) -> Result<Vec<LogEntry>, ChainError> {
		self.call(
			"searchlogs",
			json!([
				from_block,
				to_block,
				{ "addresses": [normalize_hex(contract_address)] },
				{ "topics": topics },
			]),
		)
		.await
	}

	async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, ChainError> {
		self.call("getpeerinfo", json!([])).await
	}

	async fn get_connection_count(&self) -> Result<u64, ChainError> {
		self.call("getconnectioncount", json!([])).await
	}

	async fn get_hex_address(&self, address: &str) -> Result<String, ChainError> {
		self.call("gethexaddress", json!([address])).await
	}

	async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction, ChainError> {
		self.call("gettransaction", json!([txid])).await
	}

	async fn get_transaction_receipt(
		&self,
		txid: &str,
	) -> Result<Vec<TransactionReceipt>, ChainError> {
		self.call("gettransactionreceipt", json!([txid])).await
	}

	async fn exchange_balance_of(
		&self,
		exchange: &str,
		token: &str,
		user_hex: &str,
		sender: &str,
	) -> Result<u128, ChainError> {
		let data = format!(
			"{}{}{}",
			EXCHANGE_BALANCE_OF,
			encode_address_word(token)?,
			encode_address_word(user_hex)?
		);
		self.call_contract_uint(exchange, data, sender).await
	}

	async fn token_balance_of(
		&self,
		token: &str,
		owner_hex: &str,
		sender: &str,
	) -> Result<u128, ChainError> {
		let data = format!("{}{}", ERC20_BALANCE_OF, encode_address_word(owner_hex)?);
		self.call_contract_uint(token, data, sender).await
	}

	async fn token_allowance(
		&self,
		token: &str,
		owner_hex: &str,
		spender_hex: &str,
		sender: &str,
	) -> Result<u128, ChainError> {
		let data = format!(
			"{}{}{}",
			ERC20_ALLOWANCE,
			encode_address_word(owner_hex)?,
			encode_address_word(spender_hex)?
		);
		self.call_contract_uint(token, data, sender).await
	}

	async fn list_address_groupings(&self) -> Result<Vec<AddressBalanceEntry>, ChainError> {
		let groupings: Vec<Vec<Vec<Value>>> = self.call("listaddressgroupings", json!([])).await?;
		parse_address_groupings(groupings)
	}

	async fn get_addresses_by_label(&self, label: &str) -> Result<Vec<String>, ChainError> {
		let addresses: serde_json::Map<String, Value> =
			self.call("getaddressesbylabel", json!([label])).await?;
		Ok(addresses.keys().cloned().collect())
	}

	async fn get_new_address(&self, label: &str) -> Result<String, ChainError> {
		self.call("getnewaddress", json!([label])).await
	}
}

/// Left-pads a 20-byte hex address into a 32-byte ABI word.
fn encode_address_word(address: &str) -> Result<String, ChainError> {
	let address = normalize_hex(address);
	if address.len() != 40 || hex::decode(&address).is_err() {
		return Err(ChainError::UnexpectedResponse(format!(
			"invalid hex address: {}",
			address
		)));
	}
	Ok(format!("{:0>64}", address))
}

/// Decodes the first 32-byte word of a call output as an unsigned integer.
fn decode_uint_word(output: &str) -> Result<u128, ChainError> {
	let output = normalize_hex(output);
	let word = output.get(..64).ok_or_else(|| {
		ChainError::UnexpectedResponse(format!("call output too short: {}", output))
	})?;
	let (high, low) = word.split_at(32);
	if high.chars().any(|c| c != '0') {
		return Err(ChainError::Overflow(word.to_string()));
	}
	u128::from_str_radix(low, 16)
		.map_err(|_| ChainError::UnexpectedResponse(format!("invalid call output: {}", word)))
}

fn parse_address_groupings(
	groupings: Vec<Vec<Vec<Value>>>,
) -> Result<Vec<AddressBalanceEntry>, ChainError> {
	let mut entries = Vec::new();
	for entry in groupings.into_iter().flatten() {
		let address = entry
			.first()
			.and_then(Value::as_str)
			.ok_or_else(|| ChainError::UnexpectedResponse("grouping without address".to_string()))?;
		let amount = match entry.get(1) {
			Some(Value::Number(number)) => Decimal::from_str(&number.to_string())
				.or_else(|_| Decimal::from_scientific(&number.to_string()))
				.map_err(|_| ChainError::UnexpectedResponse(format!("invalid amount {}", number)))?,
			other => {
				warn!("Address {} has no balance in grouping: {:?}", address, other);
				Decimal::ZERO
			}
		};
		entries.push(AddressBalanceEntry {
			address: address.to_string(),
			amount,
		});
	}
	Ok(entries)
}

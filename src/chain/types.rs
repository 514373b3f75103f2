//! Types for chain node integration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Header fields of a block returned by `getblock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u64,
    /// Block timestamp in unix seconds
    pub time: u64,
}

/// A single contract log emitted within a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract address (hex)
    #[serde(default)]
    pub address: String,
    /// Topic hashes; topic 0 identifies the event
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed parameters (hex)
    pub data: String,
}

/// One transaction's logs as returned by `searchlogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(default)]
    pub log: Vec<RawLog>,
}

/// Peer entry from `getpeerinfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Highest header the peer has synced, `-1` when unknown
    #[serde(default)]
    pub synced_headers: Option<i64>,
}

/// Wallet view of a transaction from `gettransaction`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub confirmations: i64,
    /// Fee paid in base currency, negative for outgoing transactions
    #[serde(default)]
    pub fee: Option<Decimal>,
}

/// Execution receipt from `gettransactionreceipt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    #[serde(rename = "gasUsed", default)]
    pub gas_used: u64,
    #[serde(default)]
    pub log: Vec<RawLog>,
}

/// A wallet address and its base-currency balance from `listaddressgroupings`
#[derive(Debug, Clone, PartialEq)]
pub struct AddressBalanceEntry {
    pub address: String,
    pub amount: Decimal,
}

/// Error types for chain node operations
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Value does not fit in 128 bits: {0}")]
    Overflow(String),

    #[error("No data returned")]
    NoData,
}

/// Read-only view of the chain node the engine syncs from.
///
/// The engine never signs or submits transactions; every method is a query.
#[async_trait::async_trait]
pub trait ChainConnector: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, ChainError>;

    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError>;

    async fn get_block(&self, hash: &str) -> Result<BlockHeader, ChainError>;

    /// Logs of `contract_address` matching `topics` within `[from_block, to_block]`.
    async fn search_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: &str,
        topics: &[String],
    ) -> Result<Vec<LogEntry>, ChainError>;

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, ChainError>;

    async fn get_connection_count(&self) -> Result<u64, ChainError>;

    /// Converts a wallet (base58) address into its hex form.
    async fn get_hex_address(&self, address: &str) -> Result<String, ChainError>;

    async fn get_transaction(&self, txid: &str) -> Result<WalletTransaction, ChainError>;

    /// Receipts of a transaction; empty while it is unmined.
    async fn get_transaction_receipt(
        &self,
        txid: &str,
    ) -> Result<Vec<TransactionReceipt>, ChainError>;

    /// Exchange-held balance of `token` for `user_hex`.
    async fn exchange_balance_of(
        &self,
        exchange: &str,
        token: &str,
        user_hex: &str,
        sender: &str,
    ) -> Result<u128, ChainError>;

    /// Token contract `balanceOf(owner_hex)`.
    async fn token_balance_of(
        &self,
        token: &str,
        owner_hex: &str,
        sender: &str,
    ) -> Result<u128, ChainError>;

    /// Token contract `allowance(owner_hex, spender_hex)`.
    async fn token_allowance(
        &self,
        token: &str,
        owner_hex: &str,
        spender_hex: &str,
        sender: &str,
    ) -> Result<u128, ChainError>;

    async fn list_address_groupings(&self) -> Result<Vec<AddressBalanceEntry>, ChainError>;

    async fn get_addresses_by_label(&self, label: &str) -> Result<Vec<String>, ChainError>;

    async fn get_new_address(&self, label: &str) -> Result<String, ChainError>;

    /// Timestamp of the block at `height`.
    async fn block_time_at(&self, height: u64) -> Result<u64, ChainError> {
        let hash = self.get_block_hash(height).await?;
        Ok(self.get_block(&hash).await?.time)
    }
}

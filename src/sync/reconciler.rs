//!
//! Pending-state reconciliation.
//!
//! Clients insert records with status PENDING as soon as they broadcast a transaction. Each batch,
//! the reconciler asks the chain what became of them and writes the terminal status, gas and block
//! data in a single update per record. Records that are still unmined stay PENDING.

use crate::chain::ChainConnector;
use crate::config::EngineConfig;
use crate::store::{LocalStore, PendingRecord, RecordKind, Resolution, TxStatus};
use crate::sync::SyncError;
use futures::{StreamExt, stream};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, error, info};

const WALLET_TRANSFER: &str = "TRANSFER";

pub struct PendingStateReconciler {
	chain: Arc<dyn ChainConnector>,
	store: Arc<dyn LocalStore>,
	config: Arc<EngineConfig>,
}

impl PendingStateReconciler {
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

	/// Resolves every PENDING record it can; returns how many were written.
	pub async fn reconcile(&self, current_height: u64) -> Result<usize, SyncError> {
		let mut resolved = 0;

		for kind in RecordKind::ALL {
			let pending = self.store.pending_records(kind).await?;
			if pending.is_empty() {
				continue;
			}
			debug!("Reconciling {} pending {} records", pending.len(), kind);

			let outcomes: Vec<(PendingRecord, Option<Resolution>)> = stream::iter(pending)
				.map(|record| async move {
					let resolution = match self.resolve(&record, current_height).await {
						Ok(resolution) => resolution,
						Err(e) => {
							error!("Failed to reconcile {} {}: {}", record.kind, record.txid, e);
							None
						}
					};
					(record, resolution)
				})
				.buffer_unordered(self.config.address_batch_size.max(1))
				.collect()
				.await;

			for (record, resolution) in outcomes {
				let Some(resolution) = resolution else {
					continue;
				};
				if self
					.store
					.resolve_pending(record.kind, &record.txid, &resolution)
					.await?
				{
					info!(
						"{} {} is {} in block {}",
						record.kind, record.txid, resolution.status, resolution.block_num
					);
					resolved += 1;
				}
			}
		}

		Ok(resolved)
	}

	/// Terminal state of `record`, or `None` while its transaction is unmined.
	pub async fn resolve(
		&self,
		record: &PendingRecord,
		current_height: u64,
	) -> Result<Option<Resolution>, SyncError> {
		if self.is_wallet_record(record) {
			return self.resolve_from_wallet(record, current_height).await;
		}

		let receipts = self.chain.get_transaction_receipt(&record.txid).await?;
		let Some(receipt) = receipts.first() else {
			return Ok(None);
		};

		let status = if receipt.log.is_empty() {
			TxStatus::Fail
		} else {
			record.kind.success_status()
		};
		let block_time = match self.chain.get_block(&receipt.block_hash).await {
			Ok(block) => Some(block.time),
			Err(e) => {
				error!("Failed to read block {}: {}", receipt.block_hash, e);
				None
			}
		};

		Ok(Some(Resolution {
			status,
			gas_used: Some(receipt.gas_used),
			block_num: receipt.block_number,
			block_time,
		}))
	}

	/// Base-currency transfers not yet tied to a block are tracked through the wallet.
	fn is_wallet_record(&self, record: &PendingRecord) -> bool {
		record.token == self.config.metadata.base_currency.pair
			&& record.block_num.is_none()
			&& (record.kind != RecordKind::Transaction
				|| record.tx_type.as_deref() == Some(WALLET_TRANSFER))
	}

	async fn resolve_from_wallet(
		&self,
		record: &PendingRecord,
		current_height: u64,
	) -> Result<Option<Resolution>, SyncError> {
		let transaction = self.chain.get_transaction(&record.txid).await?;
		if transaction.confirmations <= 0 {
			return Ok(None);
		}

		let confirmations = transaction.confirmations.unsigned_abs();
		let block_num = (current_height + 1).saturating_sub(confirmations);
		let block_time = match self.chain.block_time_at(block_num).await {
			Ok(time) => Some(time),
			Err(e) => {
				error!("Failed to read block time at {}: {}", block_num, e);
				None
			}
		};
		let gas_used = transaction.fee.and_then(|fee| {
			fee.abs()
				.checked_div(self.config.default_gas_price)
				.and_then(|gas| gas.floor().to_u64())
		});

		Ok(Some(Resolution {
			status: record.kind.success_status(),
			gas_used,
			block_num,
			block_time,
		}))
	}
}

//! Event plumbing for block-batch synchronization.
//!
//! This module defines the `EventProjector` trait and the `ProjectorDispatcher` that feeds
//! projectors. For each projector the dispatcher searches the batch's logs for every event family
//! the projector handles, decodes them into typed events, and hands them over in log order.
//! Projectors run one after another in registration order, which fixes the cross-family ordering
//! (listings before orders before trades).

use crate::chain::{ChainConnector, ChainError, LogEntry};
use crate::config::ContractMetadata;
use crate::decoder::{DecodedEvent, EventDecoder, EventFamily};
use crate::sync::SyncError;
use crate::utils::normalize_hex;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Trait for projecting decoded events into the local store.
#[async_trait::async_trait]
pub trait EventProjector: Send + Sync {
    /// Event families this projector consumes, searched in this order.
    fn families(&self) -> &'static [EventFamily];

    /// Project one batch worth of events, given in log order.
    ///
    /// Per-event failures are logged by the projector; only store failures are returned.
    async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError>;

    /// Get the name of this projector for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Dispatcher that fetches, decodes and routes events to registered projectors.
pub struct ProjectorDispatcher {
    chain: Arc<dyn ChainConnector>,
    decoder: Arc<dyn EventDecoder>,
    metadata: ContractMetadata,
    projectors: Vec<Box<dyn EventProjector>>,
}

impl ProjectorDispatcher {
    /// Create a new dispatcher with no projectors.
    pub fn new(
        chain: Arc<dyn ChainConnector>,
        decoder: Arc<dyn EventDecoder>,
        metadata: ContractMetadata,
    ) -> Self {
        Self {
            chain,
            decoder,
            metadata,
            projectors: Vec::new(),
        }
    }

    /// Register a projector.
    ///
    /// Projectors are run in the order they are registered.
    pub fn register_projector(&mut self, projector: Box<dyn EventProjector>) {
        self.projectors.push(projector);
    }

    /// Run every projector over `[from_block, to_block]`, returning the number of events projected.
    ///
    /// A failed log search skips that family for this batch; other families still run. A store
    /// failure stops the batch so that its blocks are not checkpointed.
    pub async fn dispatch_batch(&self, from_block: u64, to_block: u64) -> Result<usize, SyncError> {
        let mut total = 0;

        for projector in &self.projectors {
            let mut events = Vec::new();
            for family in projector.families() {
                match self.fetch_family(*family, from_block, to_block).await {
                    Ok(mut decoded) => {
                        debug!(
                            "{} - {}: Retrieved {} {} events",
                            from_block,
                            to_block,
                            decoded.len(),
                            family
                        );
                        events.append(&mut decoded);
                    }
                    Err(e) => {
                        error!(
                            "searchlogs for {} over blocks {}-{} failed: {}",
                            family, from_block, to_block, e
                        );
                    }
                }
            }

            // Stable sort keeps log order within a block
            events.sort_by_key(|event| event.block_number);
            total += events.len();
            projector.project(events).await.inspect_err(|e| {
                error!("{} projector failed: {}", projector.name(), e);
            })?;
            debug!("{} - {}: {} projector done", from_block, to_block, projector.name());
        }

        Ok(total)
    }

    async fn fetch_family(
        &self,
        family: EventFamily,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedEvent>, ChainError> {
        let filter = self.metadata.log_filter(family);
        let entries = self
            .chain
            .search_logs(
                from_block,
                to_block,
                &filter.address,
                std::slice::from_ref(&filter.topic),
            )
            .await?;

        Ok(decode_entries(
            self.decoder.as_ref(),
            family,
            &filter.address,
            &filter.topic,
            entries,
        ))
    }
}

/// Decode every log of `family` found in `entries`.
///
/// Logs from other contracts or with another topic 0 are skipped; logs that fail to decode are
/// logged and dropped.
pub fn decode_entries(
    decoder: &dyn EventDecoder,
    family: EventFamily,
    address: &str,
    topic: &str,
    entries: Vec<LogEntry>,
) -> Vec<DecodedEvent> {
    let mut events = Vec::new();

    for entry in entries {
        for (log_index, log) in entry.log.iter().enumerate() {
            let same_contract = log.address.is_empty() || normalize_hex(&log.address) == address;
            let same_topic = log
                .topics
                .first()
                .is_some_and(|first| normalize_hex(first) == topic);
            if !same_contract || !same_topic {
                continue;
            }

            match decoder.decode(family, log) {
                Ok(event) => events.push(DecodedEvent {
                    block_number: entry.block_number,
                    txid: entry.transaction_hash.clone(),
                    log_index,
                    event,
                }),
                Err(e) => warn!(
                    "Dropping undecodable {} log {} in tx {}: {}",
                    family, log_index, entry.transaction_hash, e
                ),
            }
        }
    }

    events
}

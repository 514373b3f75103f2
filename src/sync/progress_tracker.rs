//! Progress tracking for block-range synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records the block batches a sync cycle has
//! scanned and the number of events projected from them, plus the sync-percentage estimate reported
//! to subscribers after each cycle.

use crate::chain::PeerInfo;
use crate::sync::balances::AddressBalance;
use tracing::{info, warn};

/// Service for tracking synchronization progress within one cycle
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// First block this cycle scans
    start_block: u64,
    /// Chain height the cycle is catching up to
    target_height: u64,
    /// The highest block of a completed batch
    highest_processed_block: Option<u64>,
    /// Completed batches as inclusive ranges
    processed_batches: Vec<(u64, u64)>,
    /// Decoded events handed to projectors
    events_projected: usize,
    /// Last block at which we logged progress
    last_logged_block: u64,
}

impl SyncProgressTracker {
    /// Create a new progress tracker for the range `[start_block, target_height]`.
    pub fn new(start_block: u64, target_height: u64) -> Self {
        Self {
            start_block,
            target_height,
            highest_processed_block: None,
            processed_batches: Vec::new(),
            events_projected: 0,
            last_logged_block: start_block,
        }
    }

    /// Record a completed batch and the events projected from it.
    pub fn record_batch(&mut self, from_block: u64, to_block: u64, events: usize) {
        self.highest_processed_block = Some(
            self.highest_processed_block
                .map_or(to_block, |highest| highest.max(to_block)),
        );
        self.processed_batches.push((from_block, to_block));
        self.events_projected += events;
    }

    /// True once every block up to the target height has been processed.
    pub fn is_complete(&self) -> bool {
        self.start_block > self.target_height
            || self
                .highest_processed_block
                .is_some_and(|highest| highest >= self.target_height)
    }

    /// Ranges between consecutive batches that were never processed.
    pub fn check_for_gaps(&self) -> Vec<(u64, u64)> {
        let mut batches = self.processed_batches.clone();
        batches.sort_unstable();

        batches
            .windows(2)
            .filter(|window| window[1].0 > window[0].1 + 1)
            .map(|window| (window[0].1 + 1, window[1].0 - 1))
            .collect()
    }

    /// Log progress every 1000 blocks or when forced
    pub fn log_progress(&mut self, force: bool) {
        let Some(highest) = self.highest_processed_block else {
            return;
        };
        let blocks_since_last_log = highest.saturating_sub(self.last_logged_block);

        if force || blocks_since_last_log >= 1000 {
            info!(
                "Sync progress: {} events projected up to block {} of {}",
                self.events_projected, highest, self.target_height
            );
            self.last_logged_block = highest;
        }

        if force {
            for (start, end) in self.check_for_gaps() {
                warn!("Gap detected: blocks {} to {} were not processed", start, end);
            }
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_block: self.start_block,
            target_height: self.target_height,
            highest_processed_block: self.highest_processed_block,
            batches_processed: self.processed_batches.len(),
            events_projected: self.events_projected,
            gaps: self.check_for_gaps(),
        }
    }
}

/// Statistics about one sync cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_block: u64,
    pub target_height: u64,
    pub highest_processed_block: Option<u64>,
    pub batches_processed: usize,
    pub events_projected: usize,
    pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        match self.highest_processed_block {
            Some(highest) => format!(
                "Sync from {} to {}: {} batches, {} events{}",
                self.start_block,
                highest,
                self.batches_processed,
                self.events_projected,
                if self.gaps.is_empty() {
                    String::new()
                } else {
                    format!(" ({} gaps)", self.gaps.len())
                }
            ),
            None => format!("Up to date at block {}", self.target_height),
        }
    }
}

/// Sync status published after each cycle and served to queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatusSnapshot {
    pub sync_block_num: u64,
    pub sync_block_time: u64,
    pub sync_percent: u32,
    pub peer_node_count: u64,
    pub address_balances: Vec<AddressBalance>,
}

/// Highest `synced_headers` reported by any peer, ignoring unknown (`-1`) values.
pub fn peer_highest_synced_header(peers: &[PeerInfo]) -> Option<u64> {
    peers
        .iter()
        .filter_map(|peer| peer.synced_headers)
        .filter(|headers| *headers >= 0)
        .map(|headers| headers as u64)
        .max()
}

/// Estimated sync percentage in `[0, 100]`.
///
/// Prefers the peers' header height; otherwise estimates from the block time when the block is older
/// than `threshold_secs`, measuring progress between the genesis timestamp and now.
pub fn calculate_sync_percent(
    height: u64,
    block_time: u64,
    peer_header: Option<u64>,
    now: u64,
    genesis_timestamp: u64,
    threshold_secs: u64,
) -> u32 {
    let percent = match peer_header {
        Some(peer_height) if peer_height > 0 => u128::from(height) * 100 / u128::from(peer_height),
        _ if block_time < now.saturating_sub(threshold_secs) => {
            let elapsed = block_time.saturating_sub(genesis_timestamp);
            let total = now.saturating_sub(genesis_timestamp);
            if total == 0 {
                100
            } else {
                u128::from(elapsed) * 100 / u128::from(total)
            }
        }
        _ => 100,
    };
    percent.min(100) as u32
}

//! State persistence service for the local store.
//!
//! `StatePersistenceService` saves the `MemoryStore` contents after each sync cycle and restores them
//! on startup, so a restarted engine resumes from its last checkpoint instead of rescanning the chain.
//! The file layout is hidden behind the `SnapshotRepository` trait.

use crate::store::repositories::{FileSnapshotRepository, SnapshotRepository};
use crate::store::{LocalStore, MemoryStore, StoreError};

use std::path::PathBuf;
use tracing::info;

/// Service for saving and restoring store snapshots.
pub struct StatePersistenceService {
    snapshot_repo: Box<dyn SnapshotRepository + Send + Sync>,
}

impl StatePersistenceService {
    /// Create a new state persistence service for the given data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            snapshot_repo: Box::new(FileSnapshotRepository::new(data_dir)),
        }
    }

    /// Persist the store at its current checkpoint.
    pub async fn save_store(&self, store: &MemoryStore) -> Result<u64, StoreError> {
        let height = store.checkpoint().await?.unwrap_or_default();
        let snapshot = store.snapshot().await;
        self.snapshot_repo.save(&snapshot, height).await?;
        Ok(height)
    }

    /// Restore a store from the last snapshot, returning it with its checkpoint height.
    pub async fn restore_store(&self) -> Result<Option<(MemoryStore, u64)>, StoreError> {
        match self.snapshot_repo.load().await? {
            Some((snapshot, height)) => {
                info!(
                    "Restored store with {} markets and {} orders from height {}",
                    snapshot.markets.len(),
                    snapshot.orders.len(),
                    height
                );
                Ok(Some((MemoryStore::from_snapshot(snapshot), height)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlockRow, OrderFilter};
    use crate::testing::order_fixture;

    #[tokio::test]
    async fn restores_what_was_saved() {
        let dir = tempfile::tempdir().unwrap();
        let service = StatePersistenceService::new(dir.path().to_path_buf());
        assert!(service.restore_store().await.unwrap().is_none());

        let store = MemoryStore::new();
        store
            .insert_blocks(vec![BlockRow {
                block_num: 321,
                block_time: Some(1_000),
            }])
            .await
            .unwrap();
        let mut order = order_fixture("7", "tx-order");
        order.amount = u128::from(u64::MAX) * 4;
        store.upsert_order(order.clone()).await.unwrap();

        assert_eq!(service.save_store(&store).await.unwrap(), 321);

        let (restored, height) = service.restore_store().await.unwrap().unwrap();
        assert_eq!(height, 321);
        assert_eq!(restored.checkpoint().await.unwrap(), Some(321));
        assert_eq!(restored.find_order("7").await.unwrap(), Some(order));
        assert_eq!(
            restored
                .list_orders(&OrderFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}

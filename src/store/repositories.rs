use super::{StoreError, StoreSnapshot};
use std::path::PathBuf;
use tracing::{info, warn};

const SNAPSHOT_FILE: &str = "store_snapshot.json";
const METADATA_FILE: &str = "store_snapshot.meta.json";

/// Repository for store snapshot persistence
#[async_trait::async_trait]
pub trait SnapshotRepository {
	async fn save(&self, snapshot: &StoreSnapshot, height: u64) -> Result<(), StoreError>;
	async fn load(&self) -> Result<Option<(StoreSnapshot, u64)>, StoreError>;
}

/// File-based implementation of SnapshotRepository
pub struct FileSnapshotRepository {
	data_dir: PathBuf,
}

impl FileSnapshotRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn snapshot_filename(&self) -> PathBuf {
		self.data_dir.join(SNAPSHOT_FILE)
	}

	fn metadata_filename(&self) -> PathBuf {
		self.data_dir.join(METADATA_FILE)
	}
}

#[async_trait::async_trait]
impl SnapshotRepository for FileSnapshotRepository {
	async fn save(&self, snapshot: &StoreSnapshot, height: u64) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		// Write the snapshot next to its final name, then swap it in
		let filename = self.snapshot_filename();
		let staging = filename.with_extension("json.tmp");
		tokio::fs::write(&staging, serde_json::to_vec(snapshot)?).await?;
		tokio::fs::rename(&staging, &filename).await?;

		let metadata = serde_json::json!({
			"sync_height": height,
			"timestamp": chrono::Utc::now().to_rfc3339(),
			"orders": snapshot.orders.len(),
			"trades": snapshot.trades.len(),
		});
		tokio::fs::write(
			self.metadata_filename(),
			serde_json::to_string_pretty(&metadata)?,
		)
		.await?;

		info!("Saved store snapshot to {:?} at height {}", filename, height);
		Ok(())
	}

	async fn load(&self) -> Result<Option<(StoreSnapshot, u64)>, StoreError> {
		let filename = self.snapshot_filename();
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		let snapshot: StoreSnapshot = serde_json::from_slice(&tokio::fs::read(&filename).await?)?;

		// The snapshot's own blocks are authoritative; the metadata is informational.
		let height = snapshot.blocks.keys().next_back().copied().unwrap_or_default();
		match tokio::fs::read_to_string(self.metadata_filename()).await {
			Ok(raw) => {
				let recorded = serde_json::from_str::<serde_json::Value>(&raw)
					.ok()
					.and_then(|metadata| metadata.get("sync_height").and_then(|h| h.as_u64()));
				if recorded.is_some_and(|recorded| recorded != height) {
					warn!(
						"Snapshot metadata height {:?} differs from snapshot checkpoint {}",
						recorded, height
					);
				}
			}
			Err(e) => warn!("Failed to read snapshot metadata: {}", e),
		}

		info!(
			"Loaded store snapshot from {:?} at height {}",
			filename, height
		);
		Ok(Some((snapshot, height)))
	}
}

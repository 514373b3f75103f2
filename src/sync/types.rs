use crate::chain::ChainError;
use crate::decoder::DecodeError;
use crate::store::StoreError;

/// Error types for sync operations
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Chain error: {0}")]
	ChainError(#[from] ChainError),

	#[error("Store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("Decode error: {0}")]
	DecodeError(#[from] DecodeError),

	#[error("Invalid event: {0}")]
	InvalidEvent(String),

	#[error("Checkpoint error: {0}")]
	CheckpointError(String),
}

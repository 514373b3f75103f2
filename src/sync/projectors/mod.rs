//!
//! Event projectors, one per event family group.
//!
//! Each projector turns decoded events into idempotent store writes plus notifications. Events are
//! grouped by the key they mutate (market address, order id, txid); groups are projected
//! concurrently and events within a group sequentially in log order.

mod fund_redeem;
mod listing;
mod orders;
mod trade;

pub use fund_redeem::FundRedeemProjector;
pub use listing::ListingProjector;
pub use orders::{NewOrderProjector, OrderClosedProjector};
pub use trade::TradeProjector;

use crate::config::EngineConfig;
use crate::decoder::DecodedEvent;
use crate::publisher::Publisher;
use crate::store::{LocalStore, Market, TokenIdentity};
use crate::sync::SyncError;
use futures::{StreamExt, stream};
use itertools::Itertools;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::error;

/// Shared handles every projector writes through.
#[derive(Clone)]
pub struct ProjectionContext {
	pub store: Arc<dyn LocalStore>,
	pub publisher: Arc<dyn Publisher>,
	pub config: Arc<EngineConfig>,
}

impl ProjectionContext {
	pub fn new(
		store: Arc<dyn LocalStore>,
		publisher: Arc<dyn Publisher>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			store,
			publisher,
			config,
		}
	}

	/// Normalised base-currency address.
	pub fn base_address(&self) -> String {
		self.config.metadata.base_address()
	}
}

/// Symbol, name and decimals of the first registered market matching one of `addresses`.
pub(crate) fn resolve_identity(markets: &[Market], addresses: &[&str]) -> TokenIdentity {
	markets
		.iter()
		.filter(|market| market.registered)
		.find(|market| addresses.contains(&market.address.as_str()))
		.map(Market::identity)
		.unwrap_or_else(TokenIdentity::unregistered)
}

/// Projects `events` grouped by `key_of`, running up to `concurrency` groups at once.
///
/// Store failures abort the batch and are returned; any other per-event failure is logged and the
/// group moves on to its next event.
pub(crate) async fn project_grouped<K, KeyFn, ApplyFn, Fut>(
	events: Vec<DecodedEvent>,
	concurrency: usize,
	key_of: KeyFn,
	apply: ApplyFn,
) -> Result<(), SyncError>
where
	K: Eq + Hash + Send,
	KeyFn: Fn(&DecodedEvent) -> K,
	ApplyFn: Fn(DecodedEvent) -> Fut + Sync,
	Fut: Future<Output = Result<(), SyncError>> + Send,
{
	let groups = events.into_iter().into_group_map_by(|event| key_of(event));

	let results: Vec<Result<(), SyncError>> = stream::iter(groups.into_values())
		.map(|group| {
			let apply = &apply;
			async move {
				for event in group {
					let family = event.event.family();
					let txid = event.txid.clone();
					match apply(event).await {
						Ok(()) => {}
						Err(SyncError::StoreError(e)) => return Err(SyncError::StoreError(e)),
						Err(e) => error!("Failed to project {} event in tx {}: {}", family, txid, e),
					}
				}
				Ok(())
			}
		})
		.buffer_unordered(concurrency.max(1))
		.collect()
		.await;

	results.into_iter().collect()
}

use super::{ProjectionContext, project_grouped};
use crate::decoder::{DecodedEvent, EventFamily, ExchangeEvent, ListingEvent};
use crate::store::{
	Candle, Market, TokenIdentity, Timeframe, UNREGISTERED_NAME, UNREGISTERED_SYMBOL,
};
use crate::sync::{EventProjector, SyncError};
use crate::utils::normalize_hex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// Maintains the market registry from token listing events.
pub struct ListingProjector {
	ctx: ProjectionContext,
}

impl ListingProjector {
	pub fn new(ctx: ProjectionContext) -> Self {
		Self { ctx }
	}

	async fn apply(&self, event: DecodedEvent) -> Result<(), SyncError> {
		match event.event {
			ExchangeEvent::ListingCreated(listing) | ExchangeEvent::ListingUpdated(listing) => {
				self.upsert_listing(listing).await
			}
			ExchangeEvent::ListingDeleted {
				token_address,
				time,
			} => self.unregister(&normalize_hex(&token_address), time).await,
			other => {
				warn!("{} received unexpected {} event", self.name(), other.family());
				Ok(())
			}
		}
	}

	/// Creates the market (seeding one blank candle per timeframe) or updates it in place.
	async fn upsert_listing(&self, listing: ListingEvent) -> Result<(), SyncError> {
		let address = normalize_hex(&listing.token_address);
		let store = &self.ctx.store;

		match store.find_market(&address).await? {
			Some(mut market) => {
				market.symbol = listing.symbol;
				market.name = listing.name;
				market.version = listing.version;
				market.image = listing.image;
				market.decimals = listing.decimals;
				market.registered = true;
				let identity = market.identity();
				store.upsert_market(market).await?;

				let touched = store.propagate_token_identity(&address, &identity).await?;
				debug!(
					"Updated market {} ({}), {} records relabelled",
					identity.symbol, address, touched
				);
			}
			None => {
				let market = Market {
					address: address.clone(),
					symbol: listing.symbol,
					name: listing.name,
					version: listing.version,
					image: listing.image,
					decimals: listing.decimals,
					start_time: listing.time,
					registered: true,
					price: Decimal::ZERO,
					change: Decimal::ZERO,
					volume: Decimal::ZERO,
				};
				info!("Listed market {} ({})", market.symbol, address);
				store.upsert_market(market).await?;

				for timeframe in Timeframe::ALL {
					if store.latest_candle(&address, timeframe, None).await?.is_none() {
						store
							.upsert_candle(Candle::seed(&address, timeframe, listing.time))
							.await?;
					}
				}
			}
		}

		Ok(())
	}

	async fn unregister(&self, address: &str, time: u64) -> Result<(), SyncError> {
		let store = &self.ctx.store;
		let Some(mut market) = store.find_market(address).await? else {
			error!("ListingDeleted for unknown market {} at {}", address, time);
			return Ok(());
		};

		market.symbol = UNREGISTERED_SYMBOL.to_string();
		market.name = UNREGISTERED_NAME.to_string();
		market.registered = false;
		let identity = TokenIdentity {
			decimals: market.decimals,
			..TokenIdentity::unregistered()
		};
		store.upsert_market(market).await?;

		let touched = store.propagate_token_identity(address, &identity).await?;
		info!("Unregistered market {}, {} records relabelled", address, touched);
		Ok(())
	}
}

#[async_trait::async_trait]
impl EventProjector for ListingProjector {
	fn families(&self) -> &'static [EventFamily] {
		&[
			EventFamily::ListingCreated,
			EventFamily::ListingUpdated,
			EventFamily::ListingDeleted,
		]
	}

	async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError> {
		project_grouped(
			events,
			self.ctx.config.projection_concurrency,
			|event| match &event.event {
				ExchangeEvent::ListingCreated(listing) | ExchangeEvent::ListingUpdated(listing) => {
					normalize_hex(&listing.token_address)
				}
				ExchangeEvent::ListingDeleted { token_address, .. } => normalize_hex(token_address),
				_ => event.txid.clone(),
			},
			|event| self.apply(event),
		)
		.await
	}

	fn name(&self) -> &'static str {
		"ListingProjector"
	}
}

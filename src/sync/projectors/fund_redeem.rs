use super::{ProjectionContext, project_grouped};
use crate::decoder::{DecodedEvent, EventFamily, ExchangeEvent};
use crate::publisher::Notification;
use crate::store::{FundRedeem, FundRedeemKind, Market, TokenIdentity, TxStatus};
use crate::sync::{EventProjector, SyncError};
use crate::utils::{BASE_CURRENCY_DECIMALS, base_units_to_display, normalize_hex};
use tracing::{debug, warn};

/// Records deposits into and withdrawals from the exchange.
pub struct FundRedeemProjector {
	ctx: ProjectionContext,
}

impl FundRedeemProjector {
	pub fn new(ctx: ProjectionContext) -> Self {
		Self { ctx }
	}

	/// Identity for a funded token: the base currency, a registered market, or unregistered.
	fn token_identity(&self, token_address: &str, markets: &[Market]) -> TokenIdentity {
		let base = &self.ctx.config.metadata.base_currency;
		if token_address == self.ctx.base_address() {
			return TokenIdentity {
				symbol: base.pair.clone(),
				name: base.name.clone(),
				decimals: base.decimals,
			};
		}

		match markets
			.iter()
			.find(|market| market.registered && market.address == token_address)
		{
			Some(market) => market.identity(),
			None => TokenIdentity {
				decimals: BASE_CURRENCY_DECIMALS,
				..TokenIdentity::unregistered()
			},
		}
	}

	async fn apply(&self, event: DecodedEvent, markets: &[Market]) -> Result<(), SyncError> {
		let (kind, fund) = match event.event {
			ExchangeEvent::Deposit(fund) => (FundRedeemKind::Deposit, fund),
			ExchangeEvent::Withdrawal(fund) => (FundRedeemKind::Withdraw, fund),
			other => {
				warn!("{} received unexpected {} event", self.name(), other.family());
				return Ok(());
			}
		};

		let token_address = normalize_hex(&fund.token_address);
		let identity = self.token_identity(&token_address, markets);
		let amount = base_units_to_display(fund.amount, identity.decimals).ok_or_else(|| {
			SyncError::InvalidEvent(format!(
				"{:?} amount {} in tx {} is out of range",
				kind, fund.amount, event.txid
			))
		})?;

		let existing = self.ctx.store.find_fund_redeem(&event.txid).await?;
		let fund_redeem = FundRedeem {
			txid: event.txid,
			kind,
			token_address,
			token: identity.symbol,
			token_name: identity.name,
			owner: normalize_hex(&fund.owner),
			amount,
			status: TxStatus::Confirmed,
			time: fund.time,
			block_num: Some(event.block_number),
			gas_used: existing.as_ref().and_then(|existing| existing.gas_used),
			block_time: existing.as_ref().and_then(|existing| existing.block_time),
		};

		debug!(
			"{:?} of {} {} by {}",
			fund_redeem.kind, fund_redeem.amount, fund_redeem.token, fund_redeem.owner
		);
		self.ctx.store.upsert_fund_redeem(fund_redeem.clone()).await?;
		self.ctx
			.publisher
			.publish(Notification::FundRedeemed(fund_redeem));
		Ok(())
	}
}

#[async_trait::async_trait]
impl EventProjector for FundRedeemProjector {
	fn families(&self) -> &'static [EventFamily] {
		&[EventFamily::Deposit, EventFamily::Withdrawal]
	}

	async fn project(&self, events: Vec<DecodedEvent>) -> Result<(), SyncError> {
		if events.is_empty() {
			return Ok(());
		}
		let markets = self.ctx.store.list_markets().await?;

		project_grouped(
			events,
			self.ctx.config.projection_concurrency,
			|event| event.txid.clone(),
			|event| self.apply(event, &markets),
		)
		.await
	}

	fn name(&self) -> &'static str {
		"FundRedeemProjector"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::decoder::FundEvent;
	use crate::store::LocalStore;
	use crate::testing::{BASE, OWNER, TOKEN, TestEngine, decoded, market_fixture};
	use rust_decimal::Decimal;
	use std::str::FromStr;

	fn fund(token: &str, amount: u128) -> FundEvent {
		FundEvent {
			token_address: token.to_string(),
			owner: OWNER.to_string(),
			amount,
			time: 5_000,
		}
	}

	#[tokio::test]
	async fn converts_amounts_with_token_decimals() {
		let engine = TestEngine::new();
		engine
			.store
			.upsert_market(market_fixture("TKN", 2))
			.await
			.unwrap();
		let projector = FundRedeemProjector::new(engine.context());

		projector
			.project(vec![
				decoded(5, "tx-base", ExchangeEvent::Deposit(fund(BASE, 150_000_000))),
				decoded(6, "tx-token", ExchangeEvent::Withdrawal(fund(TOKEN, 1234))),
			])
			.await
			.unwrap();

		let base = engine.store.find_fund_redeem("tx-base").await.unwrap().unwrap();
		assert_eq!(base.kind, FundRedeemKind::Deposit);
		assert_eq!(base.token, "RUNES");
		assert_eq!(base.amount, Decimal::from_str("1.5").unwrap());
		assert_eq!(base.status, TxStatus::Confirmed);

		let token = engine.store.find_fund_redeem("tx-token").await.unwrap().unwrap();
		assert_eq!(token.kind, FundRedeemKind::Withdraw);
		assert_eq!(token.token, "TKN");
		assert_eq!(token.amount, Decimal::from_str("12.34").unwrap());
	}

	#[tokio::test]
	async fn confirms_client_submitted_record_once() {
		let engine = TestEngine::new();
		let projector = FundRedeemProjector::new(engine.context());
		let event = decoded(5, "tx-base", ExchangeEvent::Deposit(fund(BASE, 100_000_000)));

		projector.project(vec![event.clone()]).await.unwrap();
		projector.project(vec![event]).await.unwrap();

		let all = engine.store.list_fund_redeems(Some(OWNER)).await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].amount, Decimal::ONE);
	}
}

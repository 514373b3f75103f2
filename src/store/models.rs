//! Records held in the local store.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Symbol given to tokens with no registered market.
pub const UNREGISTERED_SYMBOL: &str = "Unregistered";
pub const UNREGISTERED_NAME: &str = "Unregistered Token";

/// Lifecycle status shared by every record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    PendingCancel,
    Active,
    Confirmed,
    Success,
    Fail,
    Canceled,
    Fulfilled,
}

impl TxStatus {
    /// Statuses an order can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Canceled | TxStatus::Fulfilled | TxStatus::Fail
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxStatus::Pending => "PENDING",
            TxStatus::PendingCancel => "PENDINGCANCEL",
            TxStatus::Active => "ACTIVE",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Success => "SUCCESS",
            TxStatus::Fail => "FAIL",
            TxStatus::Canceled => "CANCELED",
            TxStatus::Fulfilled => "FULFILLED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "BUYORDER")]
    Buy,
    #[serde(rename = "SELLORDER")]
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundRedeemKind {
    Deposit,
    Withdraw,
}

/// Candle widths maintained per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "3h")]
    Hour3,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "d")]
    Day,
    #[serde(rename = "w")]
    Week,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Hour1,
        Timeframe::Hour3,
        Timeframe::Hour6,
        Timeframe::Hour12,
        Timeframe::Day,
        Timeframe::Week,
    ];

    pub fn width_secs(&self) -> u64 {
        match self {
            Timeframe::Hour1 => 3_600,
            Timeframe::Hour3 => 10_800,
            Timeframe::Hour6 => 21_600,
            Timeframe::Hour12 => 43_200,
            Timeframe::Day => 86_400,
            Timeframe::Week => 604_800,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Hour1 => "1h",
            Timeframe::Hour3 => "3h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day => "d",
            Timeframe::Week => "w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Exact order price as `numerator / denominator` (priceMul / priceDiv).
///
/// Ordering compares the exact rational value, so `1/2 == 2/4`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceFraction {
    pub numerator: u128,
    pub denominator: u128,
}

impl PriceFraction {
    /// Returns `None` for a zero denominator.
    pub fn new(numerator: u128, denominator: u128) -> Option<Self> {
        (denominator != 0).then_some(Self {
            numerator,
            denominator,
        })
    }

    pub fn zero() -> Self {
        Self {
            numerator: 0,
            denominator: 1,
        }
    }

    /// Decimal approximation for display and charting.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let numerator = Decimal::from_u128(self.numerator)?;
        let denominator = Decimal::from_u128(self.denominator)?;
        numerator
            .checked_div(denominator)
            .map(|value| value.normalize())
    }
}

impl PartialEq for PriceFraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriceFraction {}

impl PartialOrd for PriceFraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriceFraction {
    /// Compares via continued-fraction expansion, which never overflows.
    fn cmp(&self, other: &Self) -> Ordering {
        let (mut a_num, mut a_den) = (self.numerator, self.denominator.max(1));
        let (mut b_num, mut b_den) = (other.numerator, other.denominator.max(1));
        let mut flipped = false;

        loop {
            let (a_int, a_rem) = (a_num / a_den, a_num % a_den);
            let (b_int, b_rem) = (b_num / b_den, b_num % b_den);

            let ordering = match a_int.cmp(&b_int) {
                Ordering::Equal => match (a_rem == 0, b_rem == 0) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => {
                        // a_rem/a_den vs b_rem/b_den is the reverse of a_den/a_rem vs b_den/b_rem
                        (a_num, a_den) = (a_den, a_rem);
                        (b_num, b_den) = (b_den, b_rem);
                        flipped = !flipped;
                        continue;
                    }
                },
                unequal => unequal,
            };

            return if flipped {
                ordering.reverse()
            } else {
                ordering
            };
        }
    }
}

impl fmt::Display for PriceFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Symbol, name and decimals denormalised onto records that reference a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
}

impl TokenIdentity {
    pub fn unregistered() -> Self {
        Self {
            symbol: UNREGISTERED_SYMBOL.to_string(),
            name: UNREGISTERED_NAME.to_string(),
            decimals: 0,
        }
    }
}

/// A listed token and its rolling statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub address: String,
    pub symbol: String,
    pub name: String,
    /// ABI version tag
    pub version: String,
    pub image: String,
    pub decimals: u32,
    pub start_time: u64,
    pub registered: bool,
    /// Lowest active sell price
    pub price: Decimal,
    /// 24h percentage change
    pub change: Decimal,
    /// 24h volume in base currency
    pub volume: Decimal,
}

impl Market {
    pub fn identity(&self) -> TokenIdentity {
        TokenIdentity {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            decimals: self.decimals,
        }
    }
}

/// Recomputed per-market statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketStats {
    pub price: Decimal,
    pub change: Decimal,
    pub volume: Decimal,
}

/// A limit order placed on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// On-chain order id; absent while a client-submitted order is unmined
    pub order_id: Option<String>,
    pub txid: String,
    pub owner: String,
    pub sell_token: String,
    pub buy_token: String,
    /// The non-base side of the pair
    pub token_address: String,
    pub token: String,
    pub token_name: String,
    pub decimals: u32,
    pub order_type: OrderType,
    pub price: PriceFraction,
    /// Remaining amount in sell-token base units
    pub amount: u128,
    pub start_amount: u128,
    pub status: TxStatus,
    pub time: u64,
    pub block_num: Option<u64>,
    pub tx_canceled: Option<String>,
    pub time_canceled: Option<u64>,
    pub tx_fulfilled: Option<String>,
    pub time_fulfilled: Option<u64>,
    pub gas_used: Option<u64>,
    pub block_time: Option<u64>,
}

impl Order {
    pub fn apply_identity(&mut self, identity: &TokenIdentity) {
        self.token = identity.symbol.clone();
        self.token_name = identity.name.clone();
        self.decimals = identity.decimals;
    }
}

/// A fill against an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub txid: String,
    pub order_id: String,
    pub from: String,
    pub to: String,
    pub sold_tokens: u128,
    pub bought_tokens: u128,
    /// Traded amount of the order's token
    pub amount: u128,
    pub price: PriceFraction,
    pub order_type: OrderType,
    pub token_address: String,
    pub token: String,
    pub token_name: String,
    pub decimals: u32,
    pub status: TxStatus,
    pub time: u64,
    pub block_num: Option<u64>,
    pub gas_used: Option<u64>,
    pub block_time: Option<u64>,
    /// Set once the fill has been deducted from its order
    #[serde(default)]
    pub order_applied: bool,
}

impl Trade {
    pub fn apply_identity(&mut self, identity: &TokenIdentity) {
        self.token = identity.symbol.clone();
        self.token_name = identity.name.clone();
        self.decimals = identity.decimals;
    }
}

/// A deposit into or withdrawal from the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRedeem {
    pub txid: String,
    pub kind: FundRedeemKind,
    pub token_address: String,
    pub token: String,
    pub token_name: String,
    pub owner: String,
    /// Display units
    pub amount: Decimal,
    pub status: TxStatus,
    pub time: u64,
    pub block_num: Option<u64>,
    pub gas_used: Option<u64>,
    pub block_time: Option<u64>,
}

impl FundRedeem {
    pub fn apply_identity(&mut self, identity: &TokenIdentity) {
        self.token = identity.symbol.clone();
        self.token_name = identity.name.clone();
    }
}

/// OHLCV bucket `[time, time + width)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub token_address: String,
    pub timeframe: Timeframe,
    pub time: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Traded token amount in base units
    pub volume: u128,
}

impl Candle {
    /// All-zero candle seeded when a token is listed.
    pub fn seed(token_address: &str, timeframe: Timeframe, time: u64) -> Self {
        Self::flat(token_address, timeframe, time, Decimal::ZERO)
    }

    /// Candle whose OHLC all equal `price` and with no volume.
    pub fn flat(token_address: &str, timeframe: Timeframe, time: u64, price: Decimal) -> Self {
        Self {
            token_address: token_address.to_string(),
            timeframe,
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
        }
    }

    /// Next bucket with no trades, carrying this candle's close.
    ///
    /// `None` when this is the last bucket representable in `u64` seconds.
    pub fn carry_forward(&self) -> Option<Self> {
        let time = self.end_time()?;
        Some(Self::flat(&self.token_address, self.timeframe, time, self.close))
    }

    pub fn end_time(&self) -> Option<u64> {
        self.time.checked_add(self.timeframe.width_secs())
    }

    /// True if `time` lies past the end of this bucket.
    pub fn ends_by(&self, time: u64) -> bool {
        self.end_time().is_some_and(|end| end <= time)
    }

    fn is_blank(&self) -> bool {
        self.volume == 0
            && self.open.is_zero()
            && self.high.is_zero()
            && self.low.is_zero()
            && self.close.is_zero()
    }

    /// Folds a trade into this bucket.
    pub fn apply_trade(&mut self, price: Decimal, volume: u128) {
        if self.is_blank() {
            self.open = price;
            self.high = price;
            self.low = price;
        }
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume = self.volume.saturating_add(volume);
    }
}

/// Generic wallet transaction (transfer, approve, ...) submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub tx_type: String,
    pub token: String,
    pub status: TxStatus,
    pub sender: String,
    pub gas_used: Option<u64>,
    pub gas_limit: u64,
    pub gas_price: Decimal,
    pub created_time: u64,
    pub block_num: Option<u64>,
    pub block_time: Option<u64>,
}

/// One scanned block; the highest `block_num` is the sync checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub block_num: u64,
    pub block_time: Option<u64>,
}

/// Record kinds visited by the pending-state reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Transaction,
    Order,
    FundRedeem,
    Trade,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Transaction,
        RecordKind::Order,
        RecordKind::FundRedeem,
        RecordKind::Trade,
    ];

    /// Terminal status written when the transaction confirms.
    pub fn success_status(&self) -> TxStatus {
        match self {
            RecordKind::Transaction => TxStatus::Success,
            RecordKind::Order | RecordKind::FundRedeem | RecordKind::Trade => TxStatus::Confirmed,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordKind::Transaction => "Transaction",
            RecordKind::Order => "Order",
            RecordKind::FundRedeem => "FundRedeem",
            RecordKind::Trade => "Trade",
        };
        f.write_str(label)
    }
}

/// What the reconciler needs to know about a PENDING record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub kind: RecordKind,
    pub txid: String,
    pub token: String,
    pub tx_type: Option<String>,
    pub block_num: Option<u64>,
}

/// Terminal state determined for a pending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: TxStatus,
    pub gas_used: Option<u64>,
    pub block_num: u64,
    pub block_time: Option<u64>,
}

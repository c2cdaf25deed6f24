//! Core types - Strong typing for the desk's records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::Error;
use crate::escrow::EscrowSession;

/// Tradeable asset. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Ltc,
    Sol,
    Usdt,
}

impl Asset {
    pub const ALL: [Asset; 5] = [Asset::Btc, Asset::Eth, Asset::Ltc, Asset::Sol, Asset::Usdt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Ltc => "LTC",
            Asset::Sol => "SOL",
            Asset::Usdt => "USDT",
        }
    }

    /// CoinGecko coin id
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Asset::Btc => "bitcoin",
            Asset::Eth => "ethereum",
            Asset::Ltc => "litecoin",
            Asset::Sol => "solana",
            Asset::Usdt => "tether",
        }
    }

    /// Static USD price used whenever the oracle has nothing for us.
    pub fn fallback_usd(&self) -> Decimal {
        match self {
            Asset::Btc => Decimal::from(90_000),
            Asset::Eth => Decimal::from(3_000),
            Asset::Ltc => Decimal::from(80),
            Asset::Sol => Decimal::from(140),
            Asset::Usdt => Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Asset::ALL
            .into_iter()
            .find(|a| a.as_str() == upper)
            .ok_or_else(|| Error::Validation(format!("unknown asset: {}", s)))
    }
}

/// Trade side, from the requester's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Buy, Side::Sell];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(Error::Validation(format!("unknown side: {}", other))),
        }
    }
}

/// Payment method a vendor accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "All Methods")]
    Any,
    #[default]
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
    #[serde(rename = "PayPal")]
    PayPal,
    #[serde(rename = "Wise")]
    Wise,
    #[serde(rename = "Revolut")]
    Revolut,
}

impl PaymentMethod {
    pub fn is_any(&self) -> bool {
        matches!(self, PaymentMethod::Any)
    }
}

/// Caller identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(format!("u_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade request id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(format!("tx_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One oracle observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: Asset,
    pub usd_price: Decimal,
    pub change_24h_pct: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Where a price table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Oracle,
    Fallback,
}

/// Quotes for every asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub quotes: BTreeMap<Asset, PriceQuote>,
    pub source: PriceSource,
}

impl PriceTable {
    /// Static table: fixed USD values, zero change.
    pub fn fallback() -> Self {
        let now = Utc::now();
        let quotes = Asset::ALL
            .into_iter()
            .map(|asset| {
                (asset, PriceQuote {
                    asset,
                    usd_price: asset.fallback_usd(),
                    change_24h_pct: Decimal::ZERO,
                    observed_at: now,
                })
            })
            .collect();
        Self { quotes, source: PriceSource::Fallback }
    }

    pub fn from_quotes(quotes: impl IntoIterator<Item = PriceQuote>) -> Self {
        Self {
            quotes: quotes.into_iter().map(|q| (q.asset, q)).collect(),
            source: PriceSource::Oracle,
        }
    }

    pub fn get(&self, asset: Asset) -> Option<&PriceQuote> {
        self.quotes.get(&asset)
    }

    /// USD price, falling back to the static value for a missing asset.
    pub fn usd(&self, asset: Asset) -> Decimal {
        self.quotes
            .get(&asset)
            .map(|q| q.usd_price)
            .unwrap_or_else(|| asset.fallback_usd())
    }
}

/// Synthetic counterparty quote. Valid only for the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub side: Side,
    pub asset: Asset,
    pub vendor: String,
    /// USD per unit
    pub rate: Decimal,
    pub available: Decimal,
    pub min_usd: Decimal,
    pub max_usd: Decimal,
    pub methods: Vec<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    pub cycle: u64,
}

impl Offer {
    pub fn accepts(&self, method: PaymentMethod) -> bool {
        self.methods.contains(&method)
    }
}

/// Review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Denied,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Accepted => write!(f, "accepted"),
            RequestStatus::Denied => write!(f, "denied"),
        }
    }
}

/// Buy: the user pays USD and receives the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyTerms {
    pub amount_usd: Decimal,
    pub gross_asset: Decimal,
    pub fee_asset: Decimal,
    pub net_asset: Decimal,
    pub proof_attached: bool,
    pub wallet_address: Option<String>,
}

/// Sell: the user gives the asset and receives USD once escrow is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellTerms {
    pub amount_asset: Decimal,
    pub gross_usd: Decimal,
    pub fee_usd: Decimal,
    pub net_usd: Decimal,
    pub payout_address: String,
    pub escrow: EscrowSession,
}

/// Side-specific part of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "lowercase")]
pub enum TradeTerms {
    Buy(BuyTerms),
    Sell(SellTerms),
}

/// Durable record of a user's trade intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub id: RequestId,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub asset: Asset,
    pub vendor: String,
    pub payment_method: PaymentMethod,
    pub rate: Decimal,
    pub status: RequestStatus,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub terms: TradeTerms,
}

impl TradeRequest {
    pub fn side(&self) -> Side {
        match self.terms {
            TradeTerms::Buy(_) => Side::Buy,
            TradeTerms::Sell(_) => Side::Sell,
        }
    }

    /// Asset quantity the request moves through the ledger:
    /// net received on a buy, quantity given up on a sell.
    pub fn ledger_quantity(&self) -> Decimal {
        match &self.terms {
            TradeTerms::Buy(b) => b.net_asset,
            TradeTerms::Sell(s) => s.amount_asset,
        }
    }

    pub fn escrow(&self) -> Option<&EscrowSession> {
        match &self.terms {
            TradeTerms::Sell(s) => Some(&s.escrow),
            TradeTerms::Buy(_) => None,
        }
    }

    pub fn escrow_mut(&mut self) -> Option<&mut EscrowSession> {
        match &mut self.terms {
            TradeTerms::Sell(s) => Some(&mut s.escrow),
            TradeTerms::Buy(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

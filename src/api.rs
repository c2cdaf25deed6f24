//! Server-side handlers: offer listing, the transaction log and the price board.
//!
//! Transport-free: handlers take decoded query strings or form pairs and
//! return serde types, so any HTTP front end can mount them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::calculator::{round_asset, round_usd, TradeBreakdown, TradeCalculator};
use crate::core::{Asset, Error, Offer, PriceTable, RequestId, Result, Side};
use crate::offers::{OfferBook, OfferFilter};

/// Reason reported when a concrete payment method filters every offer out
pub const PAYMENT_FILTER_REASON: &str = "payment_filter_blocks_offers";
const ALL_METHODS: &str = "ALL";

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

fn parse_side(raw: &str) -> Side {
    if raw.trim().eq_ignore_ascii_case("sell") { Side::Sell } else { Side::Buy }
}

fn parse_asset(raw: &str) -> Asset {
    Asset::from_str(raw.trim()).unwrap_or(Asset::Usdt)
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

/// `GET /offers` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferQuery {
    pub side: Side,
    pub coin: Asset,
    pub amount: Decimal,
    /// Upper-cased payment filter, `ALL` when absent
    pub payment: String,
}

impl Default for OfferQuery {
    fn default() -> Self {
        Self {
            side: Side::Buy,
            coin: Asset::Usdt,
            amount: Decimal::ZERO,
            payment: ALL_METHODS.to_string(),
        }
    }
}

impl OfferQuery {
    /// Lenient: unknown keys are ignored and bad values fall back to defaults.
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode(value);
            match decode(key).as_str() {
                "side" => parsed.side = parse_side(&value),
                "coin" => parsed.coin = parse_asset(&value),
                "amount" => parsed.amount = parse_decimal(&value).unwrap_or(Decimal::ZERO),
                "payment" if !value.trim().is_empty() => parsed.payment = value.trim().to_uppercase(),
                _ => {}
            }
        }
        parsed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferListing {
    pub offers: Vec<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A positive `amount` keeps only offers whose USD limits cover it.
pub fn query_offers(book: &OfferBook, query: &OfferQuery) -> OfferListing {
    if query.payment != ALL_METHODS {
        debug!("Payment filter {} blocks every offer", query.payment);
        return OfferListing {
            offers: Vec::new(),
            reason: Some(PAYMENT_FILTER_REASON.to_string()),
            updated_at: None,
        };
    }
    let offers = book
        .filter(&OfferFilter::new(query.side, query.coin))
        .into_iter()
        .filter(|o| query.amount <= Decimal::ZERO || (o.min_usd..=o.max_usd).contains(&query.amount))
        .collect();
    OfferListing {
        offers,
        reason: None,
        updated_at: book.updated_at(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    AwaitingRelease,
}

/// `POST /transactions` form body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionForm {
    pub side: Side,
    pub coin: Asset,
    pub vendor: String,
    pub rate: Decimal,
    pub amount_usd: Decimal,
    /// Size in bytes of the uploaded proof file, 0 when none
    pub proof_size: u64,
}

impl Default for TransactionForm {
    fn default() -> Self {
        Self {
            side: Side::Buy,
            coin: Asset::Usdt,
            vendor: "Unknown".to_string(),
            rate: Decimal::ONE,
            amount_usd: Decimal::ZERO,
            proof_size: 0,
        }
    }
}

impl TransactionForm {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut form = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "side" => form.side = parse_side(value),
                "coin" => form.coin = parse_asset(value),
                "vendor" if !value.trim().is_empty() => form.vendor = value.trim().to_string(),
                "rate" => form.rate = parse_decimal(value).unwrap_or(Decimal::ONE),
                "amountUsd" => form.amount_usd = parse_decimal(value).unwrap_or(Decimal::ZERO),
                "proof" => form.proof_size = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
        form
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: RequestId,
    pub created_at: DateTime<Utc>,
    pub side: Side,
    pub coin: Asset,
    pub amount_usd: Decimal,
    pub rate: Decimal,
    pub fee_pct: Decimal,
    pub gross_coin: Decimal,
    pub fee_coin: Decimal,
    pub receive_coin: Decimal,
    pub status: TransactionStatus,
    pub vendor: String,
    pub proof_provided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionList {
    pub txs: Vec<Transaction>,
    pub count: usize,
}

/// Process-wide transaction log; entries are never reviewed here.
#[derive(Clone, Default)]
pub struct TransactionLog {
    /// Newest first
    txs: Arc<Mutex<Vec<Transaction>>>,
    calculator: TradeCalculator,
}

impl TransactionLog {
    pub fn new(calculator: TradeCalculator) -> Self {
        Self { txs: Arc::default(), calculator }
    }

    /// The coin breakdown is `amount_usd / rate` on either side.
    pub fn submit(&self, form: TransactionForm) -> Result<Transaction> {
        let TradeBreakdown::Buy { gross_asset, fee_asset, net_asset } =
            self.calculator.buy(form.amount_usd, form.rate)?
        else {
            return Err(Error::InvalidState("buy quote produced a sell breakdown".into()));
        };
        let tx = Transaction {
            id: RequestId::generate(),
            created_at: Utc::now(),
            side: form.side,
            coin: form.coin,
            amount_usd: round_usd(form.amount_usd),
            rate: round_asset(form.rate),
            fee_pct: self.calculator.fee_rate(),
            gross_coin: round_asset(gross_asset),
            fee_coin: round_asset(fee_asset),
            receive_coin: round_asset(net_asset),
            status: TransactionStatus::AwaitingRelease,
            vendor: form.vendor,
            proof_provided: form.proof_size > 0,
        };
        info!("Transaction {} logged: {} {} {}", tx.id, tx.side, tx.receive_coin, tx.coin);
        self.txs.lock().insert(0, tx.clone());
        Ok(tx)
    }

    pub fn list(&self) -> TransactionList {
        let txs = self.txs.lock().clone();
        TransactionList { count: txs.len(), txs }
    }
}

/// `{ "BTC": { "usd": .., "change24h": .. }, .. }`
pub fn price_board(prices: &PriceTable) -> Value {
    let board: Map<String, Value> = Asset::ALL
        .into_iter()
        .map(|asset| {
            let (usd, change) = match prices.get(asset) {
                Some(q) => (q.usd_price, q.change_24h_pct),
                None => (asset.fallback_usd(), Decimal::ZERO),
            };
            (
                asset.as_str().to_string(),
                json!({ "usd": usd.to_f64(), "change24h": change.to_f64() }),
            )
        })
        .collect();
    Value::Object(board)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OfferProfile;
    use crate::offers::generator::{GenerationParams, OfferGenerator};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    #[test]
    fn test_query_defaults() {
        assert_eq!(OfferQuery::parse(""), OfferQuery::default());
        let q = OfferQuery::parse("?side=sell&coin=eth&amount=250.5&payment=bank%20transfer");
        assert_eq!(q.side, Side::Sell);
        assert_eq!(q.coin, Asset::Eth);
        assert_eq!(q.amount, dec!(250.5));
        assert_eq!(q.payment, "BANK TRANSFER");

        let q = OfferQuery::parse("coin=DOGE&amount=lots&payment=all");
        assert_eq!(q.coin, Asset::Usdt);
        assert_eq!(q.amount, Decimal::ZERO);
        assert_eq!(q.payment, "ALL");
    }

    #[test]
    fn test_query_offers() {
        let generator = OfferGenerator::new(
            GenerationParams::for_profile(OfferProfile::Standard, 4, 6),
            dec!(10),
        );
        let book = OfferBook::new(generator, 20);
        book.regenerate_with(&PriceTable::fallback(), &mut StdRng::seed_from_u64(3));

        let listing = query_offers(&book, &OfferQuery::parse("side=sell&coin=BTC"));
        assert!(listing.reason.is_none());
        assert!(listing.updated_at.is_some());
        assert!(listing.offers.len() >= 4);
        assert!(listing.offers.iter().all(|o| o.side == Side::Sell && o.asset == Asset::Btc));

        let blocked = query_offers(&book, &OfferQuery::parse("payment=wise"));
        assert!(blocked.offers.is_empty());
        assert_eq!(blocked.reason.as_deref(), Some(PAYMENT_FILTER_REASON));
        let body = serde_json::to_value(&blocked).unwrap();
        assert_eq!(body["reason"], PAYMENT_FILTER_REASON);

        let huge = query_offers(&book, &OfferQuery::parse("coin=BTC&amount=1000000"));
        assert!(huge.offers.is_empty());
    }

    #[test]
    fn test_transaction_log() {
        let log = TransactionLog::default();
        let form = TransactionForm::from_pairs([
            ("side", "buy"),
            ("coin", "SOL"),
            ("vendor", "Hana Chen"),
            ("rate", "50"),
            ("amountUsd", "100"),
            ("proof", "2048"),
        ]);
        let first = log.submit(form).unwrap();
        assert_eq!(first.gross_coin, dec!(2));
        assert_eq!(first.fee_coin, dec!(0.04));
        assert_eq!(first.receive_coin, dec!(1.96));
        assert!(first.proof_provided);
        assert_eq!(first.status, TransactionStatus::AwaitingRelease);

        let second = log
            .submit(TransactionForm::from_pairs([("coin", "XRP"), ("amountUsd", "10")]))
            .unwrap();
        assert_eq!(second.coin, Asset::Usdt);
        assert_eq!(second.vendor, "Unknown");
        assert!(!second.proof_provided);

        let listed = log.list();
        assert_eq!(listed.count, 2);
        assert_eq!(listed.txs[0].id, second.id);

        let body = serde_json::to_value(&listed.txs[1]).unwrap();
        assert_eq!(body["status"], "awaiting_release");
        assert_eq!(body["proofProvided"], true);

        assert!(log.submit(TransactionForm::from_pairs([("rate", "0")])).is_err());
        let overflowing = TransactionForm::from_pairs([
            ("rate", "0.0001"),
            ("amountUsd", "79228162514264337593543950335"),
        ]);
        assert!(matches!(log.submit(overflowing), Err(Error::Validation(_))));
        assert_eq!(log.list().count, 2);
    }

    #[test]
    fn test_price_board() {
        let board = price_board(&PriceTable::fallback());
        assert_eq!(board["BTC"]["usd"], 90000.0);
        assert_eq!(board["USDT"]["change24h"], 0.0);
        assert_eq!(board.as_object().unwrap().len(), Asset::ALL.len());
    }
}

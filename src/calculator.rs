//! Trade calculator - pure fee/rate arithmetic.
//!
//! Everything stays at full `Decimal` precision; `rounded()` is applied only
//! where a figure is persisted or shown.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Offer, Result, Side};

/// Fee charged by the desk on every trade
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.02);

/// Fee on withdrawals
pub const WITHDRAWAL_FEE_RATE: Decimal = dec!(0.01);

/// Decimal places for asset quantities
pub const ASSET_DP: u32 = 6;

/// Decimal places for USD amounts
pub const USD_DP: u32 = 2;

const MIN_ADDRESS_LEN: usize = 10;

pub fn round_asset(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(ASSET_DP, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_usd(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(USD_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Gross/fee/net split of one trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TradeBreakdown {
    /// USD in, asset out
    Buy { gross_asset: Decimal, fee_asset: Decimal, net_asset: Decimal },
    /// Asset in, USD out
    Sell { gross_usd: Decimal, fee_usd: Decimal, net_usd: Decimal },
}

impl TradeBreakdown {
    pub fn side(&self) -> Side {
        match self {
            TradeBreakdown::Buy { .. } => Side::Buy,
            TradeBreakdown::Sell { .. } => Side::Sell,
        }
    }

    pub fn rounded(&self) -> Self {
        match *self {
            TradeBreakdown::Buy { gross_asset, fee_asset, net_asset } => TradeBreakdown::Buy {
                gross_asset: round_asset(gross_asset),
                fee_asset: round_asset(fee_asset),
                net_asset: round_asset(net_asset),
            },
            TradeBreakdown::Sell { gross_usd, fee_usd, net_usd } => TradeBreakdown::Sell {
                gross_usd: round_usd(gross_usd),
                fee_usd: round_usd(fee_usd),
                net_usd: round_usd(net_usd),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeCalculator {
    fee_rate: Decimal,
}

impl Default for TradeCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_RATE)
    }
}

impl TradeCalculator {
    pub fn new(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    pub fn buy(&self, amount_usd: Decimal, rate: Decimal) -> Result<TradeBreakdown> {
        check_rate(rate)?;
        let gross_asset = amount_usd.checked_div(rate).ok_or_else(out_of_range)?;
        let fee_asset = gross_asset.checked_mul(self.fee_rate).ok_or_else(out_of_range)?;
        Ok(TradeBreakdown::Buy {
            gross_asset,
            fee_asset,
            net_asset: gross_asset.checked_sub(fee_asset).ok_or_else(out_of_range)?,
        })
    }

    pub fn sell(&self, amount_asset: Decimal, rate: Decimal) -> Result<TradeBreakdown> {
        check_rate(rate)?;
        let gross_usd = amount_asset.checked_mul(rate).ok_or_else(out_of_range)?;
        let fee_usd = gross_usd.checked_mul(self.fee_rate).ok_or_else(out_of_range)?;
        Ok(TradeBreakdown::Sell {
            gross_usd,
            fee_usd,
            net_usd: gross_usd.checked_sub(fee_usd).ok_or_else(out_of_range)?,
        })
    }

    /// `amount` is USD on a buy and asset quantity on a sell.
    pub fn quote(&self, side: Side, amount: Decimal, rate: Decimal) -> Result<TradeBreakdown> {
        match side {
            Side::Buy => self.buy(amount, rate),
            Side::Sell => self.sell(amount, rate),
        }
    }

    /// Quote against an offer's side and rate.
    pub fn for_offer(&self, offer: &Offer, amount: Decimal) -> Result<TradeBreakdown> {
        self.quote(offer.side, amount, offer.rate)
    }
}

/// Overflow on caller-supplied figures is a rejected input, never a panic.
fn out_of_range() -> Error {
    Error::Validation("amount out of range".into())
}

fn check_rate(rate: Decimal) -> Result<()> {
    if rate <= Decimal::ZERO {
        return Err(Error::Validation(format!("rate must be positive: {}", rate)));
    }
    Ok(())
}

/// Fee split for sending an asset off the desk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalQuote {
    pub amount: Decimal,
    pub fee: Decimal,
    pub receive: Decimal,
}

pub fn withdrawal_quote(amount: Decimal, address: &str) -> Result<WithdrawalQuote> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation("withdrawal amount must be positive".into()));
    }
    if address.trim().len() < MIN_ADDRESS_LEN {
        return Err(Error::Validation(format!(
            "destination address must be at least {} characters",
            MIN_ADDRESS_LEN
        )));
    }
    let fee = amount.checked_mul(WITHDRAWAL_FEE_RATE).ok_or_else(out_of_range)?;
    let receive = amount.checked_sub(fee).ok_or_else(out_of_range)?;
    Ok(WithdrawalQuote {
        amount,
        fee,
        receive: receive.max(Decimal::ZERO),
    })
}

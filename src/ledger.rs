//! Wallet ledger - per-user, per-asset balances that never go negative.
//!
//! The ledger itself is not synchronised; `TradeDesk` owns it behind the same
//! lock as the request queue so check-then-debit is a single critical section.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::core::{Asset, Error, PriceTable, Result, UserId};

type Book = HashMap<UserId, BTreeMap<Asset, Decimal>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletLedger {
    /// Spendable balances
    balances: Book,
    /// Quantities set aside for pending sell requests
    #[serde(default)]
    held: Book,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, user: &UserId, asset: Asset) -> Decimal {
        read(&self.balances, user, asset)
    }

    pub fn held(&self, user: &UserId, asset: Asset) -> Decimal {
        read(&self.held, user, asset)
    }

    /// Every asset, zero-filled
    pub fn balances(&self, user: &UserId) -> BTreeMap<Asset, Decimal> {
        Asset::ALL
            .into_iter()
            .map(|a| (a, self.balance(user, a)))
            .collect()
    }

    pub fn credit(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<Decimal> {
        check_qty(qty)?;
        let entry = slot(&mut self.balances, user, asset);
        *entry = entry
            .checked_add(qty)
            .ok_or_else(|| Error::Validation(format!("{} balance out of range", asset)))?;
        debug!("credit {} {} {} -> {}", user, qty, asset, *entry);
        Ok(*entry)
    }

    /// Fails with `InsufficientBalance` and leaves the balance untouched
    /// when `qty` exceeds what the user holds.
    pub fn debit(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<Decimal> {
        check_qty(qty)?;
        let available = self.balance(user, asset);
        if qty > available {
            return Err(Error::InsufficientBalance { asset, available, required: qty });
        }
        let entry = slot(&mut self.balances, user, asset);
        *entry -= qty;
        debug!("debit {} {} {} -> {}", user, qty, asset, *entry);
        Ok(*entry)
    }

    /// Move spendable balance into the held bucket.
    pub fn hold(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<()> {
        let held = self.held(user, asset);
        let total = held
            .checked_add(qty)
            .ok_or_else(|| Error::Validation(format!("{} hold out of range", asset)))?;
        self.debit(user, asset, qty)?;
        *slot(&mut self.held, user, asset) = total;
        Ok(())
    }

    /// Return held quantity to the spendable balance.
    pub fn release_hold(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<Decimal> {
        self.take_held(user, asset, qty)?;
        self.credit(user, asset, qty)
    }

    /// Held quantity leaves the wallet for good.
    pub fn settle_hold(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<()> {
        self.take_held(user, asset, qty)
    }

    fn take_held(&mut self, user: &UserId, asset: Asset, qty: Decimal) -> Result<()> {
        check_qty(qty)?;
        let held = self.held(user, asset);
        if qty > held {
            return Err(Error::InvalidState(format!(
                "{} holds {} {}, cannot take {}",
                user, held, asset, qty
            )));
        }
        *slot(&mut self.held, user, asset) -= qty;
        Ok(())
    }

    /// Spendable holdings valued at the given prices, saturating at `Decimal::MAX`
    pub fn portfolio_usd(&self, user: &UserId, prices: &PriceTable) -> Decimal {
        self.balances(user)
            .into_iter()
            .fold(Decimal::ZERO, |total, (asset, qty)| {
                total.saturating_add(qty.saturating_mul(prices.usd(asset)))
            })
    }
}

fn read(book: &Book, user: &UserId, asset: Asset) -> Decimal {
    book.get(user)
        .and_then(|w| w.get(&asset))
        .copied()
        .unwrap_or(Decimal::ZERO)
}

fn slot<'a>(book: &'a mut Book, user: &UserId, asset: Asset) -> &'a mut Decimal {
    book.entry(user.clone())
        .or_default()
        .entry(asset)
        .or_insert(Decimal::ZERO)
}

fn check_qty(qty: Decimal) -> Result<()> {
    if qty < Decimal::ZERO {
        return Err(Error::Validation(format!("quantity must not be negative: {}", qty)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn alice() -> UserId {
        UserId::new("u_alice")
    }

    #[test]
    fn test_credit_then_debit() {
        let mut ledger = WalletLedger::new();
        assert_eq!(ledger.balance(&alice(), Asset::Btc), Decimal::ZERO);
        assert_eq!(ledger.credit(&alice(), Asset::Btc, dec!(1.5)).unwrap(), dec!(1.5));
        assert_eq!(ledger.debit(&alice(), Asset::Btc, dec!(0.5)).unwrap(), dec!(1.0));
        assert_eq!(ledger.debit(&alice(), Asset::Btc, dec!(1.0)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_overdraw_leaves_balance_unchanged() {
        let mut ledger = WalletLedger::new();
        ledger.credit(&alice(), Asset::Eth, dec!(3)).unwrap();

        for _ in 0..2 {
            let err = ledger.debit(&alice(), Asset::Eth, dec!(5)).unwrap_err();
            assert!(matches!(
                err,
                Error::InsufficientBalance { asset: Asset::Eth, available, required }
                    if available == dec!(3) && required == dec!(5)
            ));
            assert_eq!(ledger.balance(&alice(), Asset::Eth), dec!(3));
        }
    }

    #[test]
    fn test_rejects_negative_quantities() {
        let mut ledger = WalletLedger::new();
        assert!(matches!(ledger.credit(&alice(), Asset::Sol, dec!(-1)), Err(Error::Validation(_))));
        assert!(matches!(ledger.debit(&alice(), Asset::Sol, dec!(-1)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_credit_overflow_leaves_balance_unchanged() {
        let mut ledger = WalletLedger::new();
        ledger.credit(&alice(), Asset::Usdt, Decimal::MAX).unwrap();
        assert!(matches!(ledger.credit(&alice(), Asset::Usdt, dec!(1)), Err(Error::Validation(_))));
        assert_eq!(ledger.balance(&alice(), Asset::Usdt), Decimal::MAX);
        assert_eq!(ledger.portfolio_usd(&alice(), &PriceTable::fallback()), Decimal::MAX);
    }

    #[test]
    fn test_hold_lifecycle() {
        let mut ledger = WalletLedger::new();
        ledger.credit(&alice(), Asset::Ltc, dec!(10)).unwrap();

        ledger.hold(&alice(), Asset::Ltc, dec!(4)).unwrap();
        assert_eq!(ledger.balance(&alice(), Asset::Ltc), dec!(6));
        assert_eq!(ledger.held(&alice(), Asset::Ltc), dec!(4));

        ledger.release_hold(&alice(), Asset::Ltc, dec!(1)).unwrap();
        ledger.settle_hold(&alice(), Asset::Ltc, dec!(3)).unwrap();
        assert_eq!(ledger.balance(&alice(), Asset::Ltc), dec!(7));
        assert_eq!(ledger.held(&alice(), Asset::Ltc), Decimal::ZERO);

        assert!(ledger.settle_hold(&alice(), Asset::Ltc, dec!(1)).is_err());
        assert!(ledger.hold(&alice(), Asset::Ltc, dec!(8)).is_err());
        assert_eq!(ledger.balance(&alice(), Asset::Ltc), dec!(7));
    }

    #[test]
    fn test_portfolio_value() {
        let mut ledger = WalletLedger::new();
        ledger.credit(&alice(), Asset::Btc, dec!(0.1)).unwrap();
        ledger.credit(&alice(), Asset::Usdt, dec!(50)).unwrap();

        let prices = PriceTable::fallback();
        assert_eq!(ledger.portfolio_usd(&alice(), &prices), dec!(9050));
        assert_eq!(ledger.balances(&alice()).len(), Asset::ALL.len());
    }
}

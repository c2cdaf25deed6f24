//! Review workflow - admin accept/deny of pending requests.
//!
//! Under `SettlementPolicy::Submission` the request already moved the wallet
//! when it was submitted, so review only reports the delta it would imply.
//! Under `SettlementPolicy::Review` acceptance is where the wallet moves.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{DeskEvent, TradeDesk};
use crate::core::config::SettlementPolicy;
use crate::core::{Asset, Error, RequestId, RequestStatus, Result, TradeTerms, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Deny,
}

impl Decision {
    fn status(&self) -> RequestStatus {
        match self {
            Decision::Accept => RequestStatus::Accepted,
            Decision::Deny => RequestStatus::Denied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub asset: Asset,
    pub status: RequestStatus,
    /// Signed wallet delta the request stands for: +net on buy, -quantity on sell
    pub delta: Decimal,
    /// Whether this review moved the spendable balance
    pub applied: bool,
    /// Spendable balance after the review
    pub balance: Decimal,
}

impl TradeDesk {
    pub fn accept(&self, id: &RequestId) -> Result<ReviewOutcome> {
        self.review(id, Decision::Accept)
    }

    pub fn deny(&self, id: &RequestId) -> Result<ReviewOutcome> {
        self.review(id, Decision::Deny)
    }

    pub fn set_status(&self, id: &RequestId, status: RequestStatus) -> Result<ReviewOutcome> {
        match status {
            RequestStatus::Accepted => self.accept(id),
            RequestStatus::Denied => self.deny(id),
            RequestStatus::Pending => {
                Err(Error::InvalidState("requests cannot be moved back to pending".into()))
            }
        }
    }

    /// Accept and deny are terminal; reviewing twice is an `InvalidState`
    /// error and never re-applies a wallet effect.
    pub fn review(&self, id: &RequestId, decision: Decision) -> Result<ReviewOutcome> {
        let settlement = self.settings.settlement;
        let outcome = {
            let mut state = self.state.lock();
            let request = state.find_mut(id)?;
            if request.status.is_terminal() {
                return Err(Error::InvalidState(format!("request {} is already {}", id, request.status)));
            }
            let user = request.user_id.clone();
            let asset = request.asset;
            let qty = request.ledger_quantity();
            let (delta, is_sell) = match &request.terms {
                TradeTerms::Buy(b) => (b.net_asset, false),
                TradeTerms::Sell(s) => (-s.amount_asset, true),
            };

            // ledger first so a failure leaves the request pending
            let ledger = &mut state.ledger;
            let applied = match (settlement, decision, is_sell) {
                (SettlementPolicy::Submission, _, _) => false,
                (SettlementPolicy::Review, Decision::Accept, false) => {
                    ledger.credit(&user, asset, qty)?;
                    true
                }
                (SettlementPolicy::Review, Decision::Accept, true) => {
                    ledger.settle_hold(&user, asset, qty)?;
                    false
                }
                (SettlementPolicy::Review, Decision::Deny, true) => {
                    ledger.release_hold(&user, asset, qty)?;
                    true
                }
                (SettlementPolicy::Review, Decision::Deny, false) => false,
            };
            let balance = ledger.balance(&user, asset);

            let request = state.find_mut(id)?;
            request.status = decision.status();
            request.reviewed_at = Some(Utc::now());

            ReviewOutcome {
                request_id: id.clone(),
                user_id: user,
                asset,
                status: decision.status(),
                delta,
                applied,
                balance,
            }
        };

        info!(
            "Request {} {}: {} {} = {} (delta {}, applied {})",
            id, outcome.status, outcome.user_id, outcome.asset, outcome.balance, outcome.delta, outcome.applied
        );
        self.events.publish(DeskEvent::RequestReviewed { id: id.clone(), status: outcome.status });
        if outcome.applied {
            self.events.publish(DeskEvent::WalletChanged {
                user: outcome.user_id.clone(),
                asset: outcome.asset,
                balance: outcome.balance,
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;
    use crate::desk::tests::{buy, offer, sell, user};
    use crate::desk::DeskSettings;
    use rust_decimal_macros::dec;

    fn review_settings() -> DeskSettings {
        DeskSettings { settlement: SettlementPolicy::Review, ..DeskSettings::default() }
    }

    #[test]
    fn test_accept_twice_does_not_double_credit() {
        let desk = TradeDesk::new(DeskSettings::default());
        let id = desk.submit(&user(), &offer(Side::Buy, Asset::Btc, dec!(50)), buy(dec!(100))).unwrap();
        assert_eq!(desk.balance(&user(), Asset::Btc), dec!(1.96));

        let outcome = desk.accept(&id).unwrap();
        assert_eq!(outcome.status, RequestStatus::Accepted);
        assert_eq!(outcome.delta, dec!(1.96));
        assert!(!outcome.applied);
        assert_eq!(outcome.balance, dec!(1.96));

        assert!(matches!(desk.accept(&id), Err(Error::InvalidState(_))));
        assert_eq!(desk.balance(&user(), Asset::Btc), dec!(1.96));
        assert_eq!(desk.get(&id).unwrap().status, RequestStatus::Accepted);
    }

    #[test]
    fn test_deny_leaves_post_submission_balances() {
        let desk = TradeDesk::new(DeskSettings::default());
        desk.credit(&user(), Asset::Eth, dec!(4)).unwrap();
        let buy_id = desk.submit(&user(), &offer(Side::Buy, Asset::Eth, dec!(50)), buy(dec!(100))).unwrap();
        let sell_id = desk.submit(&user(), &offer(Side::Sell, Asset::Eth, dec!(60)), sell(dec!(1))).unwrap();
        let after_submit = desk.balances(&user());

        assert_eq!(desk.deny(&buy_id).unwrap().status, RequestStatus::Denied);
        assert_eq!(desk.deny(&sell_id).unwrap().status, RequestStatus::Denied);
        assert_eq!(desk.balances(&user()), after_submit);
        assert!(desk.deny(&buy_id).is_err());
        assert_eq!(desk.pending_count(), 0);
    }

    #[test]
    fn test_review_of_unknown_request() {
        let desk = TradeDesk::new(DeskSettings::default());
        let missing = RequestId::new("tx_gone");
        assert!(matches!(desk.accept(&missing), Err(Error::NotFound(_))));
        assert!(matches!(
            desk.set_status(&missing, RequestStatus::Pending),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_released_sell_can_be_accepted() {
        let desk = TradeDesk::new(DeskSettings::default());
        desk.credit(&user(), Asset::Sol, dec!(2)).unwrap();
        let id = desk.submit(&user(), &offer(Side::Sell, Asset::Sol, dec!(160)), sell(dec!(2))).unwrap();
        desk.release_escrow(&id).unwrap();

        let outcome = desk.set_status(&id, RequestStatus::Accepted).unwrap();
        assert_eq!(outcome.delta, dec!(-2));
        assert_eq!(outcome.balance, Decimal::ZERO);
    }

    #[test]
    fn test_review_settlement_buy() {
        let desk = TradeDesk::new(review_settings());
        let id = desk.submit(&user(), &offer(Side::Buy, Asset::Usdt, dec!(1)), buy(dec!(100))).unwrap();
        assert_eq!(desk.balance(&user(), Asset::Usdt), Decimal::ZERO);

        let outcome = desk.accept(&id).unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.balance, dec!(98));
        assert!(desk.accept(&id).is_err());
        assert_eq!(desk.balance(&user(), Asset::Usdt), dec!(98));
    }

    #[test]
    fn test_review_settlement_sell_hold() {
        let desk = TradeDesk::new(review_settings());
        desk.credit(&user(), Asset::Ltc, dec!(10)).unwrap();
        let o = offer(Side::Sell, Asset::Ltc, dec!(90));

        let accepted = desk.submit(&user(), &o, sell(dec!(3))).unwrap();
        let denied = desk.submit(&user(), &o, sell(dec!(2))).unwrap();
        assert_eq!(desk.balance(&user(), Asset::Ltc), dec!(5));
        assert_eq!(desk.held(&user(), Asset::Ltc), dec!(5));

        desk.accept(&accepted).unwrap();
        assert_eq!(desk.held(&user(), Asset::Ltc), dec!(2));

        let outcome = desk.deny(&denied).unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.balance, dec!(7));
        assert_eq!(desk.held(&user(), Asset::Ltc), Decimal::ZERO);
    }
}

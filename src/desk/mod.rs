//! Request queue - system of record for trade requests.
//!
//! `TradeDesk` is a cheap-to-clone handle over one shared store. Every
//! mutation of requests and wallets goes through a single lock, so a balance
//! check and the debit it guards cannot interleave with another view's write.

pub mod events;
pub mod review;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calculator::{TradeBreakdown, TradeCalculator};
use crate::core::config::{Config, ExpiryPolicy, SettlementPolicy};
use crate::core::{
    Asset, BuyTerms, Error, Offer, PaymentMethod, PriceTable, RequestId, RequestStatus, Result,
    SellTerms, Side, TradeRequest, TradeTerms, UserId,
};
use crate::escrow::{EscrowSession, TickOutcome};
use crate::ledger::WalletLedger;
use crate::offers::OfferBook;

pub use events::{DeskEvent, EventBus};
pub use review::{Decision, ReviewOutcome};

/// Knobs the desk needs from `Config`
#[derive(Debug, Clone)]
pub struct DeskSettings {
    pub fee_rate: Decimal,
    pub min_trade_usd: Decimal,
    pub settlement: SettlementPolicy,
    pub escrow_window_secs: u64,
    pub expiry: ExpiryPolicy,
}

impl From<&Config> for DeskSettings {
    fn from(config: &Config) -> Self {
        Self {
            fee_rate: config.trading.fee_rate,
            min_trade_usd: config.trading.min_trade_usd,
            settlement: config.trading.settlement,
            escrow_window_secs: config.escrow.window_secs,
            expiry: config.escrow.expiry,
        }
    }
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What the requester filled in
#[derive(Debug, Clone)]
pub enum TradeInput {
    Buy {
        amount_usd: Decimal,
        payment_method: PaymentMethod,
        proof_attached: bool,
        wallet_address: Option<String>,
    },
    Sell {
        amount_asset: Decimal,
        payment_method: PaymentMethod,
        payout_address: String,
    },
}

impl TradeInput {
    pub fn side(&self) -> Side {
        match self {
            TradeInput::Buy { .. } => Side::Buy,
            TradeInput::Sell { .. } => Side::Sell,
        }
    }

    fn payment_method(&self) -> PaymentMethod {
        match self {
            TradeInput::Buy { payment_method, .. } | TradeInput::Sell { payment_method, .. } => {
                *payment_method
            }
        }
    }
}

/// Whole-store image for persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeskSnapshot {
    /// Oldest first
    pub requests: Vec<TradeRequest>,
    pub ledger: WalletLedger,
}

#[derive(Default)]
struct DeskState {
    /// Append-only, oldest first
    requests: Vec<TradeRequest>,
    ledger: WalletLedger,
}

impl DeskState {
    fn find_mut(&mut self, id: &RequestId) -> Result<&mut TradeRequest> {
        self.requests
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::NotFound(format!("request {}", id)))
    }
}

#[derive(Clone)]
pub struct TradeDesk {
    state: Arc<Mutex<DeskState>>,
    events: EventBus,
    settings: Arc<DeskSettings>,
    calculator: TradeCalculator,
    /// Live offers; when set, submissions must name an offer of the current cycle
    offers: Option<OfferBook>,
}

impl TradeDesk {
    pub fn new(settings: DeskSettings) -> Self {
        Self::restore(settings, DeskSnapshot::default())
    }

    pub fn restore(settings: DeskSettings, snapshot: DeskSnapshot) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeskState {
                requests: snapshot.requests,
                ledger: snapshot.ledger,
            })),
            events: EventBus::default(),
            calculator: TradeCalculator::new(settings.fee_rate),
            settings: Arc::new(settings),
            offers: None,
        }
    }

    /// Check every submission against the book's current cycle.
    pub fn with_offers(mut self, book: OfferBook) -> Self {
        self.offers = Some(book);
        self
    }

    pub fn settings(&self) -> &DeskSettings {
        &self.settings
    }

    pub fn calculator(&self) -> TradeCalculator {
        self.calculator
    }

    pub fn subscribe(&self) -> flume::Receiver<DeskEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        let state = self.state.lock();
        DeskSnapshot {
            requests: state.requests.clone(),
            ledger: state.ledger.clone(),
        }
    }

    /// Validate, apply the submission-time ledger effect and append the
    /// request as pending. Sell requests get a running escrow session.
    ///
    /// With an offer book attached, an offer from an earlier cycle is
    /// `NotFound` and the book's own copy is what gets traded against.
    pub fn submit(&self, user: &UserId, offer: &Offer, input: TradeInput) -> Result<RequestId> {
        let current = match &self.offers {
            Some(book) => {
                let live = book.lookup(&offer.id)?;
                if live.cycle != offer.cycle {
                    return Err(Error::NotFound(format!(
                        "offer {} (cycle {} replaced by {})",
                        offer.id, offer.cycle, live.cycle
                    )));
                }
                Some(live)
            }
            None => None,
        };
        let offer = current.as_ref().unwrap_or(offer);

        if offer.side != input.side() {
            return Err(Error::Validation(format!(
                "offer {} is a {} offer, request is {}",
                offer.id,
                offer.side,
                input.side()
            )));
        }
        if input.payment_method().is_any() {
            return Err(Error::Validation("choose a payment method".into()));
        }

        let (terms, breakdown) = self.build_terms(offer, &input)?;
        let asset = offer.asset;

        let request = TradeRequest {
            id: RequestId::generate(),
            created_at: Utc::now(),
            user_id: user.clone(),
            asset,
            vendor: offer.vendor.clone(),
            payment_method: input.payment_method(),
            rate: offer.rate,
            status: RequestStatus::Pending,
            reviewed_at: None,
            terms,
        };
        let id = request.id.clone();

        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let ledger = &mut state.ledger;

            // balance is re-read here even if the view checked it earlier
            let changed = match (&request.terms, self.settings.settlement) {
                (TradeTerms::Sell(s), SettlementPolicy::Submission) => {
                    ledger.debit(user, asset, s.amount_asset)?;
                    true
                }
                (TradeTerms::Sell(s), SettlementPolicy::Review) => {
                    ledger.hold(user, asset, s.amount_asset)?;
                    true
                }
                (TradeTerms::Buy(b), SettlementPolicy::Submission) => {
                    ledger.credit(user, asset, b.net_asset)?;
                    true
                }
                (TradeTerms::Buy(_), SettlementPolicy::Review) => false,
            };
            if changed {
                events.push(DeskEvent::WalletChanged {
                    user: user.clone(),
                    asset,
                    balance: ledger.balance(user, asset),
                });
            }
            state.requests.push(request);
        }

        info!(
            "Request {} submitted: {} {} via {} ({:?})",
            id,
            offer.side,
            asset,
            offer.vendor,
            breakdown.rounded()
        );
        events.insert(0, DeskEvent::RequestSubmitted {
            id: id.clone(),
            user: user.clone(),
            side: offer.side,
        });
        self.events.publish_all(events);
        Ok(id)
    }

    fn build_terms(&self, offer: &Offer, input: &TradeInput) -> Result<(TradeTerms, TradeBreakdown)> {
        let min = self.settings.min_trade_usd;
        match input {
            TradeInput::Buy { amount_usd, proof_attached, wallet_address, .. } => {
                if *amount_usd < min {
                    return Err(Error::Validation(format!("minimum trade is ${}", min)));
                }
                check_usd_limits(offer, *amount_usd)?;
                let breakdown = self.calculator.buy(*amount_usd, offer.rate)?;
                let TradeBreakdown::Buy { gross_asset, fee_asset, net_asset } = breakdown.rounded() else {
                    return Err(Error::InvalidState("buy quote produced a sell breakdown".into()));
                };
                check_available(offer, gross_asset)?;
                let wallet_address = wallet_address
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string);
                let terms = TradeTerms::Buy(BuyTerms {
                    amount_usd: crate::calculator::round_usd(*amount_usd),
                    gross_asset,
                    fee_asset,
                    net_asset,
                    proof_attached: *proof_attached,
                    wallet_address,
                });
                Ok((terms, breakdown))
            }
            TradeInput::Sell { amount_asset, payout_address, .. } => {
                let payout_address = payout_address.trim();
                if payout_address.is_empty() {
                    return Err(Error::Validation("payout address is required".into()));
                }
                if *amount_asset <= Decimal::ZERO {
                    return Err(Error::Validation("sell amount must be positive".into()));
                }
                let breakdown = self.calculator.sell(*amount_asset, offer.rate)?;
                let TradeBreakdown::Sell { gross_usd, fee_usd, net_usd } = breakdown.rounded() else {
                    return Err(Error::InvalidState("sell quote produced a buy breakdown".into()));
                };
                if gross_usd < min {
                    return Err(Error::Validation(format!("minimum trade is ${}", min)));
                }
                check_usd_limits(offer, gross_usd)?;
                check_available(offer, *amount_asset)?;
                let mut escrow = EscrowSession::new(self.settings.escrow_window_secs);
                escrow.start()?;
                let terms = TradeTerms::Sell(SellTerms {
                    amount_asset: crate::calculator::round_asset(*amount_asset),
                    gross_usd,
                    fee_usd,
                    net_usd,
                    payout_address: payout_address.to_string(),
                    escrow,
                });
                Ok((terms, breakdown))
            }
        }
    }

    /// All requests, most recent first
    pub fn list(&self) -> Vec<TradeRequest> {
        self.state.lock().requests.iter().rev().cloned().collect()
    }

    /// A user's most recent requests
    pub fn list_for_user(&self, user: &UserId, limit: usize) -> Vec<TradeRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .rev()
            .filter(|r| &r.user_id == user)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &RequestId) -> Option<TradeRequest> {
        self.state.lock().requests.iter().find(|r| &r.id == id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().requests.iter().filter(|r| r.is_pending()).count()
    }

    /// User-confirmed release. Status stays pending for review; the ledger
    /// is not touched.
    pub fn release_escrow(&self, id: &RequestId) -> Result<()> {
        {
            let mut state = self.state.lock();
            let request = state.find_mut(id)?;
            let escrow = request
                .escrow_mut()
                .ok_or_else(|| Error::InvalidState(format!("{} is not a sell request", id)))?;
            escrow.release()?;
        }
        info!("Escrow released for {}, awaiting review", id);
        self.events.publish(DeskEvent::EscrowReleased { id: id.clone() });
        Ok(())
    }

    /// Advance the escrow countdown by one second.
    pub fn tick_escrow(&self, id: &RequestId) -> Result<TickOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            let request = state.find_mut(id)?;
            match request.escrow_mut() {
                Some(escrow) => escrow.tick(self.settings.expiry),
                None => TickOutcome::Idle,
            }
        };
        if outcome == TickOutcome::Expired {
            warn!("Escrow window for {} ran out without release", id);
            self.events.publish(DeskEvent::EscrowClosed {
                id: id.clone(),
                reason: crate::escrow::AbandonReason::Expired,
            });
        }
        Ok(outcome)
    }

    /// The owning view went away without releasing.
    pub fn detach_escrow(&self, id: &RequestId) -> Result<bool> {
        let changed = {
            let mut state = self.state.lock();
            let request = state.find_mut(id)?;
            request.escrow_mut().map(|e| e.detach()).unwrap_or(false)
        };
        if changed {
            debug!("Escrow for {} abandoned by its view", id);
            self.events.publish(DeskEvent::EscrowClosed {
                id: id.clone(),
                reason: crate::escrow::AbandonReason::Detached,
            });
        }
        Ok(changed)
    }

    pub fn balance(&self, user: &UserId, asset: Asset) -> Decimal {
        self.state.lock().ledger.balance(user, asset)
    }

    pub fn held(&self, user: &UserId, asset: Asset) -> Decimal {
        self.state.lock().ledger.held(user, asset)
    }

    pub fn balances(&self, user: &UserId) -> BTreeMap<Asset, Decimal> {
        self.state.lock().ledger.balances(user)
    }

    pub fn portfolio_usd(&self, user: &UserId, prices: &PriceTable) -> Decimal {
        self.state.lock().ledger.portfolio_usd(user, prices)
    }

    /// Direct deposit, outside any request
    pub fn credit(&self, user: &UserId, asset: Asset, qty: Decimal) -> Result<Decimal> {
        let balance = self.state.lock().ledger.credit(user, asset, qty)?;
        self.events.publish(DeskEvent::WalletChanged { user: user.clone(), asset, balance });
        Ok(balance)
    }

    /// Direct withdrawal, outside any request
    pub fn debit(&self, user: &UserId, asset: Asset, qty: Decimal) -> Result<Decimal> {
        let balance = self.state.lock().ledger.debit(user, asset, qty)?;
        self.events.publish(DeskEvent::WalletChanged { user: user.clone(), asset, balance });
        Ok(balance)
    }
}

/// The offer's own USD window
fn check_usd_limits(offer: &Offer, usd: Decimal) -> Result<()> {
    if usd < offer.min_usd || usd > offer.max_usd {
        return Err(Error::Validation(format!(
            "offer {} takes ${} to ${}, got ${}",
            offer.id, offer.min_usd, offer.max_usd, usd
        )));
    }
    Ok(())
}

fn check_available(offer: &Offer, qty: Decimal) -> Result<()> {
    if qty > offer.available {
        return Err(Error::Validation(format!(
            "offer {} has {} {} available, requested {}",
            offer.id, offer.available, offer.asset, qty
        )));
    }
    Ok(())
}

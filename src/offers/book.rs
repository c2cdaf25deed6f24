//! Current offer set. Regeneration replaces it wholesale.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

use super::generator::OfferGenerator;
use crate::core::{Asset, Error, Offer, PaymentMethod, PriceTable, Result, Side};

/// What a view asks to see
#[derive(Debug, Clone)]
pub struct OfferFilter {
    pub side: Side,
    pub asset: Asset,
    pub method: PaymentMethod,
    pub vendor_query: Option<String>,
}

impl OfferFilter {
    pub fn new(side: Side, asset: Asset) -> Self {
        Self {
            side,
            asset,
            method: PaymentMethod::Any,
            vendor_query: None,
        }
    }

    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn vendor(mut self, query: impl Into<String>) -> Self {
        self.vendor_query = Some(query.into());
        self
    }
}

#[derive(Default)]
struct BookState {
    offers: Vec<Offer>,
    cycle: u64,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct OfferBook {
    state: Arc<RwLock<BookState>>,
    generator: Arc<OfferGenerator>,
    max_listed: usize,
}

impl OfferBook {
    pub fn new(generator: OfferGenerator, max_listed: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(BookState::default())),
            generator: Arc::new(generator),
            max_listed,
        }
    }

    /// Replace every offer. Returns the new cycle number.
    pub fn regenerate(&self, prices: &PriceTable) -> u64 {
        self.regenerate_with(prices, &mut rand::thread_rng())
    }

    /// Offers are generated outside the lock and stamped with their cycle
    /// inside it, so concurrent regenerations never share a cycle number.
    pub fn regenerate_with<R: Rng + ?Sized>(&self, prices: &PriceTable, rng: &mut R) -> u64 {
        let mut offers = self.generator.generate(prices, 0, rng);
        let mut state = self.state.write();
        let cycle = state.cycle + 1;
        for offer in &mut offers {
            offer.cycle = cycle;
        }
        state.offers = offers;
        state.cycle = cycle;
        state.updated_at = Some(Utc::now());
        debug!("offer book at cycle {} ({} offers)", cycle, state.offers.len());
        cycle
    }

    pub fn cycle(&self) -> u64 {
        self.state.read().cycle
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().updated_at
    }

    pub fn offers(&self) -> Vec<Offer> {
        self.state.read().offers.clone()
    }

    /// Resolve an offer id against the current cycle only.
    pub fn lookup(&self, id: &str) -> Result<Offer> {
        self.state
            .read()
            .offers
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("offer {} (offers were regenerated)", id)))
    }

    /// Filtered view, capped at `max_listed`. Any method other than the
    /// unrestricted one matches nothing: the vendor pool only takes `Any`.
    pub fn filter(&self, filter: &OfferFilter) -> Vec<Offer> {
        if !filter.method.is_any() {
            return Vec::new();
        }
        let query = filter
            .vendor_query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        self.state
            .read()
            .offers
            .iter()
            .filter(|o| o.side == filter.side && o.asset == filter.asset)
            .filter(|o| o.accepts(filter.method))
            .filter(|o| match &query {
                Some(q) => o.vendor.to_lowercase().contains(q.as_str()),
                None => true,
            })
            .take(self.max_listed)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OfferProfile;
    use crate::offers::generator::GenerationParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn book(max_listed: usize) -> OfferBook {
        let params = GenerationParams::for_profile(OfferProfile::Standard, 4, 6);
        OfferBook::new(OfferGenerator::new(params, dec!(10)), max_listed)
    }

    #[test]
    fn test_regeneration_replaces_everything() {
        let book = book(20);
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(book.regenerate_with(&PriceTable::fallback(), &mut rng), 1);
        let first = book.offers();
        let stale_id = first[0].id.clone();
        assert!(book.lookup(&stale_id).is_ok());

        assert_eq!(book.regenerate_with(&PriceTable::fallback(), &mut rng), 2);
        assert!(book.offers().iter().all(|o| o.cycle == 2));
        assert!(matches!(book.lookup(&stale_id), Err(Error::NotFound(_))));
        assert!(book.updated_at().is_some());
    }

    #[test]
    fn test_filter_by_side_asset_and_vendor() {
        let book = book(20);
        book.regenerate_with(&PriceTable::fallback(), &mut StdRng::seed_from_u64(9));

        let sells = book.filter(&OfferFilter::new(Side::Sell, Asset::Eth));
        assert!((4..=6).contains(&sells.len()));
        assert!(sells.iter().all(|o| o.side == Side::Sell && o.asset == Asset::Eth));

        let vendor = sells[0].vendor.clone();
        let first_name = vendor.split_whitespace().next().unwrap().to_uppercase();
        let by_vendor = book.filter(&OfferFilter::new(Side::Sell, Asset::Eth).vendor(first_name));
        assert!(by_vendor.iter().any(|o| o.vendor == vendor));

        let nobody = book.filter(&OfferFilter::new(Side::Sell, Asset::Eth).vendor("zzz-no-such"));
        assert!(nobody.is_empty());
    }

    #[test]
    fn test_restricted_method_yields_nothing() {
        let book = book(20);
        book.regenerate_with(&PriceTable::fallback(), &mut StdRng::seed_from_u64(2));
        for method in [PaymentMethod::BankTransfer, PaymentMethod::PayPal, PaymentMethod::Wise, PaymentMethod::Revolut] {
            assert!(book.filter(&OfferFilter::new(Side::Buy, Asset::Btc).method(method)).is_empty());
        }
        assert!(!book.filter(&OfferFilter::new(Side::Buy, Asset::Btc)).is_empty());
    }

    #[test]
    fn test_concurrent_regenerations_get_distinct_cycles() {
        let book = book(20);
        let mut cycles: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|seed| {
                    let book = &book;
                    scope.spawn(move || {
                        book.regenerate_with(&PriceTable::fallback(), &mut StdRng::seed_from_u64(seed))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        cycles.sort_unstable();
        assert_eq!(cycles, (1..=8).collect::<Vec<_>>());
        assert_eq!(book.cycle(), 8);
        assert!(book.offers().iter().all(|o| o.cycle == 8));
    }

    #[test]
    fn test_listing_cap() {
        let book = book(3);
        book.regenerate_with(&PriceTable::fallback(), &mut StdRng::seed_from_u64(4));
        assert_eq!(book.filter(&OfferFilter::new(Side::Buy, Asset::Usdt)).len(), 3);
    }
}

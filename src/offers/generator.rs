//! Offer synthesis from oracle prices.
//!
//! Buy-side rates sit at or below the oracle price, sell-side rates above
//! it. The gap between the two is the venue margin.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::core::config::{OfferConfig, OfferProfile};
use crate::core::{Asset, Offer, PaymentMethod, PriceTable, Side};

const FIRST_NAMES: [&str; 10] = [
    "Marie", "Moussa", "Viktor", "Amina", "Sofia", "Yanis", "Hugo", "Lina", "Samir", "Nora",
];
const LAST_NAMES: [&str; 10] = [
    "Dubois", "Keita", "Petrov", "Benali", "Martin", "Diallo", "Rossi", "Haddad", "Costa", "Nguyen",
];

/// Bounded integer percentages and counts for one profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    pub discount_pct: (i64, i64),
    pub markup_pct: (i64, i64),
    pub per_side: (usize, usize),
}

impl GenerationParams {
    pub fn for_profile(profile: OfferProfile, min_per_side: usize, max_per_side: usize) -> Self {
        match profile {
            OfferProfile::Standard => Self {
                discount_pct: (0, 2),
                markup_pct: (15, 20),
                per_side: (min_per_side, max_per_side),
            },
            OfferProfile::Alternate => Self {
                discount_pct: (0, 2),
                markup_pct: (12, 20),
                per_side: (6, 12),
            },
        }
    }
}

/// Available quantity range as integer mantissas at a fixed scale,
/// e.g. BTC 1..=30 at scale 2 is 0.01..=0.30.
fn quantity_range(asset: Asset) -> (i64, i64, u32) {
    match asset {
        Asset::Btc => (1, 30, 2),
        Asset::Eth => (5, 120, 1),
        Asset::Ltc => (50, 5000, 1),
        Asset::Sol => (50, 2000, 1),
        Asset::Usdt => (500, 8000, 0),
    }
}

/// Cents for anything priced at a dollar or more, micro-units below.
fn rate_dp(price: Decimal) -> u32 {
    if price >= Decimal::ONE { 2 } else { 6 }
}

#[derive(Debug, Clone)]
pub struct OfferGenerator {
    params: GenerationParams,
    min_trade_usd: Decimal,
}

impl OfferGenerator {
    pub fn new(params: GenerationParams, min_trade_usd: Decimal) -> Self {
        Self { params, min_trade_usd }
    }

    pub fn from_config(config: &OfferConfig, min_trade_usd: Decimal) -> Self {
        Self::new(
            GenerationParams::for_profile(config.profile, config.min_per_side, config.max_per_side),
            min_trade_usd,
        )
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Buy rate: `price * (1 - discount)`, rounded down.
    pub fn buy_rate(price: Decimal, discount_pct: i64) -> Decimal {
        let raw = price * (Decimal::ONE - Decimal::new(discount_pct, 2));
        raw.round_dp_with_strategy(rate_dp(price), RoundingStrategy::ToZero)
    }

    /// Sell rate: `price * (1 + markup)`, rounded up.
    pub fn sell_rate(price: Decimal, markup_pct: i64) -> Decimal {
        let raw = price * (Decimal::ONE + Decimal::new(markup_pct, 2));
        raw.round_dp_with_strategy(rate_dp(price), RoundingStrategy::AwayFromZero)
    }

    fn vendor_name<R: Rng + ?Sized>(rng: &mut R) -> String {
        let first = FIRST_NAMES.choose(&mut *rng).copied().unwrap_or("Marie");
        let last = LAST_NAMES.choose(&mut *rng).copied().unwrap_or("Dubois");
        format!("{} {} {}", first, last, rng.gen_range(10..=99))
    }

    /// Offers for one asset/side. Empty when the price is unusable.
    pub fn generate_side<R: Rng + ?Sized>(
        &self,
        asset: Asset,
        side: Side,
        price: Decimal,
        cycle: u64,
        rng: &mut R,
    ) -> Vec<Offer> {
        if price <= Decimal::ZERO {
            return Vec::new();
        }
        let now = Utc::now();
        let (lo, hi) = self.params.per_side;
        let count = rng.gen_range(lo..=hi);
        let (q_lo, q_hi, q_scale) = quantity_range(asset);

        (0..count)
            .filter_map(|i| {
                let rate = match side {
                    Side::Buy => {
                        let (d_lo, d_hi) = self.params.discount_pct;
                        Self::buy_rate(price, rng.gen_range(d_lo..=d_hi))
                    }
                    Side::Sell => {
                        let (m_lo, m_hi) = self.params.markup_pct;
                        Self::sell_rate(price, rng.gen_range(m_lo..=m_hi))
                    }
                };
                if rate <= Decimal::ZERO {
                    return None;
                }
                Some(Offer {
                    id: format!(
                        "{}-{}-{}-{}-{}",
                        side.as_str(),
                        asset,
                        now.timestamp_millis(),
                        i,
                        rng.gen_range(1000..=9999)
                    ),
                    side,
                    asset,
                    vendor: Self::vendor_name(&mut *rng),
                    rate,
                    available: Decimal::new(rng.gen_range(q_lo..=q_hi), q_scale),
                    min_usd: self.min_trade_usd,
                    max_usd: Decimal::from(rng.gen_range(500..=4000)),
                    methods: vec![PaymentMethod::Any],
                    created_at: now,
                    cycle,
                })
            })
            .collect()
    }

    /// Full set for every asset x side, shuffled.
    pub fn generate<R: Rng + ?Sized>(&self, prices: &PriceTable, cycle: u64, rng: &mut R) -> Vec<Offer> {
        let mut offers = Vec::new();
        for asset in Asset::ALL {
            let price = prices.usd(asset);
            for side in Side::ALL {
                offers.extend(self.generate_side(asset, side, price, cycle, &mut *rng));
            }
        }
        offers.shuffle(rng);
        debug!("cycle {} generated {} offers", cycle, offers.len());
        offers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn generator() -> OfferGenerator {
        OfferGenerator::new(GenerationParams::for_profile(OfferProfile::Standard, 2, 6), dec!(10))
    }

    #[test]
    fn test_rates_straddle_oracle_price() {
        let prices = PriceTable::fallback();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let offers = generator().generate(&prices, 1, &mut rng);
            assert!(!offers.is_empty());
            for o in &offers {
                let oracle = prices.usd(o.asset);
                assert!(o.rate > Decimal::ZERO);
                match o.side {
                    Side::Buy => {
                        assert!(o.rate <= oracle, "{} buy {} > {}", o.asset, o.rate, oracle);
                        assert!(o.rate >= oracle * dec!(0.98));
                    }
                    Side::Sell => {
                        assert!(o.rate >= oracle * dec!(1.15), "{} sell {}", o.asset, o.rate);
                        assert!(o.rate <= oracle * dec!(1.20));
                    }
                }
            }
        }
    }

    #[test]
    fn test_rounding_keeps_invariant() {
        // rounding to cents must never push a buy rate above the oracle
        let price = dec!(0.99996);
        assert!(OfferGenerator::buy_rate(price, 0) <= price);
        let price = dec!(95123.456);
        assert_eq!(OfferGenerator::buy_rate(price, 0), dec!(95123.45));
        assert_eq!(OfferGenerator::sell_rate(price, 15), dec!(109391.98));
        assert!(OfferGenerator::sell_rate(price, 15) >= price);
    }

    #[test]
    fn test_counts_and_quantities_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let g = generator();
        for asset in Asset::ALL {
            for side in Side::ALL {
                let offers = g.generate_side(asset, side, asset.fallback_usd(), 3, &mut rng);
                assert!((2..=6).contains(&offers.len()));
                let (lo, hi, scale) = quantity_range(asset);
                for o in offers {
                    assert!(o.available >= Decimal::new(lo, scale));
                    assert!(o.available <= Decimal::new(hi, scale));
                    assert_eq!(o.cycle, 3);
                    assert_eq!(o.methods, vec![PaymentMethod::Any]);
                    assert!(o.id.starts_with(side.as_str()));
                }
            }
        }
    }

    #[test]
    fn test_alternate_profile() {
        let params = GenerationParams::for_profile(OfferProfile::Alternate, 1, 1);
        assert_eq!(params.per_side, (6, 12));
        assert_eq!(params.markup_pct, (12, 20));

        let g = OfferGenerator::new(params, dec!(10));
        let mut rng = StdRng::seed_from_u64(11);
        let offers = g.generate_side(Asset::Eth, Side::Sell, dec!(3000), 1, &mut rng);
        assert!((6..=12).contains(&offers.len()));
        assert!(offers.iter().all(|o| o.rate >= dec!(3360) && o.rate <= dec!(3600)));
    }

    #[test]
    fn test_unusable_price_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(generator().generate_side(Asset::Btc, Side::Buy, Decimal::ZERO, 1, &mut rng).is_empty());
    }
}

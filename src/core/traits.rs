//! Core traits - seams for external collaborators

use async_trait::async_trait;
use crate::core::{Result, types::PriceTable};

/// Price oracle - returns per-asset USD price and 24h change.
/// May fail or return stale data; callers fall back to static prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch quotes for the whole asset set
    async fn fetch_prices(&self) -> Result<PriceTable>;

    /// Oracle name for logs
    fn name(&self) -> &str;
}

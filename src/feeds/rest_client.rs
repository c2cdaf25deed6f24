//! REST client for the CoinGecko simple-price endpoint

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::core::{Asset, Error, PriceOracle, PriceQuote, PriceTable, Result};

/// Raw per-coin entry
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

/// CoinGecko price oracle
pub struct CoinGeckoOracle {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl CoinGeckoOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: "coingecko".to_string(),
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self) -> String {
        let ids: Vec<&str> = Asset::ALL.iter().map(|a| a.coingecko_id()).collect();
        format!(
            "{}?ids={}&vs_currencies=usd&include_24hr_change=true",
            self.base_url,
            ids.join(",")
        )
    }
}

/// Map a `{id: {usd, usd_24h_change}}` payload onto the asset set.
/// Any asset missing from the payload fails the whole fetch.
pub fn parse_simple_price(body: &str) -> Result<PriceTable> {
    let raw: HashMap<String, SimplePrice> = serde_json::from_str(body)?;
    let now = Utc::now();

    let mut quotes = Vec::with_capacity(Asset::ALL.len());
    for asset in Asset::ALL {
        let entry = raw
            .get(asset.coingecko_id())
            .ok_or_else(|| Error::OracleUnavailable(format!("no quote for {}", asset)))?;
        let usd_price = Decimal::try_from(entry.usd)
            .map_err(|e| Error::OracleUnavailable(format!("bad {} price: {}", asset, e)))?;
        if usd_price <= Decimal::ZERO {
            return Err(Error::OracleUnavailable(format!("non-positive {} price", asset)));
        }
        let change_24h_pct = entry
            .usd_24h_change
            .and_then(|c| Decimal::try_from(c).ok())
            .unwrap_or(Decimal::ZERO);
        quotes.push(PriceQuote { asset, usd_price, change_24h_pct, observed_at: now });
    }
    Ok(PriceTable::from_quotes(quotes))
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn fetch_prices(&self) -> Result<PriceTable> {
        let url = self.url();
        debug!("GET {}", url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::OracleUnavailable(format!("HTTP {}", status)));
        }
        let body = resp.text().await?;
        parse_simple_price(&body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Configuration - Type-safe, validated config

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Price oracle
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Offer synthesis
    #[serde(default)]
    pub offers: OfferConfig,

    /// Trade economics and settlement
    #[serde(default)]
    pub trading: TradingConfig,

    /// Sell-side escrow window
    #[serde(default)]
    pub escrow: EscrowConfig,

    /// Viewer sessions
    #[serde(default)]
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log level
    pub log_level: String,

    /// Data directory; persistence is off when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Simple-price endpoint
    pub url: String,

    /// Seconds between refreshes
    pub refresh_secs: u64,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OracleConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            refresh_secs: 20,
            timeout_secs: 10,
        }
    }
}

/// Markup/count profile for the vendor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferProfile {
    /// Sell markup 15-20%
    Standard,
    /// Sell markup 12-20%, 6-12 offers per side
    Alternate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    pub profile: OfferProfile,

    /// Seconds between regenerations
    pub refresh_secs: u64,

    /// Offers per asset/side, inclusive range
    pub min_per_side: usize,
    pub max_per_side: usize,

    /// Cap on a filtered listing
    pub max_listed: usize,
}

impl OfferConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            profile: OfferProfile::Standard,
            refresh_secs: 20,
            min_per_side: 2,
            max_per_side: 6,
            max_listed: 20,
        }
    }
}

/// When a request's ledger effect is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPolicy {
    /// Effect at submission; review never touches the ledger
    Submission,
    /// Effect at acceptance; sells are held until reviewed
    Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Fee charged on the gross amount (0.02 = 2%)
    pub fee_rate: Decimal,

    /// Minimum trade notional in USD
    pub min_trade_usd: Decimal,

    pub settlement: SettlementPolicy,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.02),
            min_trade_usd: Decimal::from(10),
            settlement: SettlementPolicy::Submission,
        }
    }
}

/// What happens when the escrow countdown hits zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Session closes as abandoned; the request stays reviewable
    Abandon,
    /// Session keeps running at zero until released or detached
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Verification window
    pub window_secs: u64,

    /// Tick period
    pub tick_millis: u64,

    pub expiry: ExpiryPolicy,
}

impl EscrowConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            window_secs: 30 * 60,
            tick_millis: 1000,
            expiry: ExpiryPolicy::Abandon,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Fallback re-read period when no change event arrives
    pub poll_secs: u64,
}

impl ViewerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { poll_secs: 5 }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `P2P_DESK_CONFIG`, then `config.toml`, else defaults.
    pub fn load_default() -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(p) = std::env::var("P2P_DESK_CONFIG") {
            candidates.push(PathBuf::from(p));
        }
        candidates.push(PathBuf::from("config.toml"));
        candidates.push(PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")));

        for path in &candidates {
            if !path.exists() {
                tracing::debug!("Skipping {}: not found", path.display());
                continue;
            }
            match Self::load(path) {
                Ok(cfg) => {
                    tracing::info!("Loaded config from {}", path.display());
                    return cfg;
                }
                Err(e) => tracing::warn!("Ignoring {}: {}", path.display(), e),
            }
        }

        tracing::warn!("No usable config file, using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if t.fee_rate < Decimal::ZERO || t.fee_rate >= Decimal::ONE {
            return Err(Error::Config(format!("fee_rate must be in [0, 1): {}", t.fee_rate)));
        }
        if t.min_trade_usd < Decimal::ZERO {
            return Err(Error::Config("min_trade_usd must not be negative".into()));
        }
        let o = &self.offers;
        if o.min_per_side > o.max_per_side {
            return Err(Error::Config(format!(
                "min_per_side {} exceeds max_per_side {}",
                o.min_per_side, o.max_per_side
            )));
        }
        if self.escrow.window_secs == 0 {
            return Err(Error::Config("escrow window must be positive".into()));
        }
        if self.escrow.tick_millis == 0
            || o.refresh_secs == 0
            || self.oracle.refresh_secs == 0
            || self.viewer.poll_secs == 0
        {
            return Err(Error::Config("intervals must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.fee_rate, dec!(0.02));
        assert_eq!(config.escrow.window_secs, 1800);
        assert_eq!(config.oracle.refresh_secs, 20);
        assert_eq!(config.trading.settlement, SettlementPolicy::Submission);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [escrow]
            window_secs = 600
            expiry = "hold"

            [trading]
            fee_rate = "0.01"
            min_trade_usd = "25"
            settlement = "review"
            "#,
        )
        .unwrap();

        assert_eq!(config.escrow.window_secs, 600);
        assert_eq!(config.escrow.tick_millis, 1000);
        assert_eq!(config.escrow.expiry, ExpiryPolicy::Hold);
        assert_eq!(config.trading.fee_rate, dec!(0.01));
        assert_eq!(config.trading.settlement, SettlementPolicy::Review);
        assert_eq!(config.offers.profile, OfferProfile::Standard);
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let config = Config::from_toml(
            r#"
            [offers]
            max_listed = 5

            [trading]
            settlement = "review"

            [oracle]
            refresh_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.offers.max_listed, 5);
        assert_eq!(config.offers.profile, OfferProfile::Standard);
        assert_eq!(config.offers.min_per_side, 2);
        assert_eq!(config.offers.max_per_side, 6);
        assert_eq!(config.trading.settlement, SettlementPolicy::Review);
        assert_eq!(config.trading.fee_rate, dec!(0.02));
        assert_eq!(config.trading.min_trade_usd, dec!(10));
        assert_eq!(config.oracle.refresh_secs, 60);
        assert!(config.oracle.url.starts_with("https://"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = Config::from_toml(
            r#"
            [offers]
            profile = "standard"
            min_per_side = 9
            max_per_side = 3
            "#,
        );
        assert!(matches!(err, Err(Error::Config(_))));

        let mut config = Config::default();
        config.trading.fee_rate = Decimal::ONE;
        assert!(config.validate().is_err());
    }
}

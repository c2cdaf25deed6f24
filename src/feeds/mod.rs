//! Price feeds - REST oracle, cache with static fallback

pub mod rest_client;
pub mod cache;
pub mod fixed;

pub use rest_client::CoinGeckoOracle;
pub use cache::{PriceFeed, RefreshTask};
pub use fixed::FixedOracle;

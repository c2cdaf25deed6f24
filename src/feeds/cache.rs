//! Cached quotes with static fallback and periodic refresh

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{PriceOracle, PriceTable, Result};

#[derive(Clone)]
pub struct PriceFeed {
    oracle: Arc<dyn PriceOracle>,
    cache: Arc<RwLock<Option<(PriceTable, DateTime<Utc>)>>>,
}

impl PriceFeed {
    pub fn new(oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            oracle,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetch once. A failure leaves the previous quotes in place.
    pub async fn refresh(&self) -> Result<()> {
        match self.oracle.fetch_prices().await {
            Ok(table) => {
                debug!("{} refreshed {} quotes", self.oracle.name(), table.quotes.len());
                *self.cache.write() = Some((table, Utc::now()));
                Ok(())
            }
            Err(e) => {
                warn!("{} refresh failed, keeping cached quotes: {}", self.oracle.name(), e);
                Err(e)
            }
        }
    }

    /// Cached quotes, or the static fallback table when nothing was fetched yet
    pub fn quotes(&self) -> PriceTable {
        self.cache
            .read()
            .as_ref()
            .map(|(table, _)| table.clone())
            .unwrap_or_else(PriceTable::fallback)
    }

    /// When the cache was last filled
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.cache.read().as_ref().map(|(_, at)| *at)
    }

    /// Refresh every `interval`, starting now. No backoff: a failed cycle
    /// just waits for the next one.
    pub fn spawn_refresh(&self, interval: Duration) -> RefreshTask {
        let feed = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let _ = feed.refresh().await;
            }
        });
        RefreshTask { task }
    }
}

/// Owned periodic task; aborted on drop
pub struct RefreshTask {
    task: JoinHandle<()>,
}

impl RefreshTask {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

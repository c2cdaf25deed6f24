//! In-process oracle for offline runs and tests

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{Error, PriceOracle, PriceTable, Result};

/// Serves a settable table; `None` behaves like an outage.
pub struct FixedOracle {
    table: Mutex<Option<PriceTable>>,
}

impl FixedOracle {
    pub fn new(table: PriceTable) -> Self {
        Self { table: Mutex::new(Some(table)) }
    }

    pub fn unavailable() -> Self {
        Self { table: Mutex::new(None) }
    }

    pub fn set(&self, table: Option<PriceTable>) {
        *self.table.lock() = table;
    }
}

#[async_trait]
impl PriceOracle for FixedOracle {
    async fn fetch_prices(&self) -> Result<PriceTable> {
        self.table
            .lock()
            .clone()
            .ok_or_else(|| Error::OracleUnavailable("fixed oracle has no prices".into()))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

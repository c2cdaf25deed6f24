//! Offers - synthetic vendor quotes, regenerated on an interval

pub mod book;
pub mod generator;

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::feeds::PriceFeed;

pub use book::{OfferBook, OfferFilter};
pub use generator::{GenerationParams, OfferGenerator};

/// Regenerates the book from the latest cached quotes; aborted on drop.
pub struct OfferRefresher {
    task: JoinHandle<()>,
}

impl OfferRefresher {
    pub fn spawn(book: OfferBook, feed: PriceFeed, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let prices = feed.quotes();
                let cycle = book.regenerate(&prices);
                info!("Offers regenerated (cycle {}, {:?} prices)", cycle, prices.source);
            }
        });
        Self { task }
    }
}

impl Drop for OfferRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

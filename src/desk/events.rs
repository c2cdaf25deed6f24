//! Change notification for views sharing one desk

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::trace;

use crate::core::{Asset, RequestId, RequestStatus, Side, UserId};
use crate::escrow::AbandonReason;

/// Per-subscriber queue depth. A full queue drops events; viewers re-read
/// on their poll interval anyway.
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DeskEvent {
    RequestSubmitted { id: RequestId, user: UserId, side: Side },
    EscrowReleased { id: RequestId },
    EscrowClosed { id: RequestId, reason: AbandonReason },
    RequestReviewed { id: RequestId, status: RequestStatus },
    WalletChanged { user: UserId, asset: Asset, balance: Decimal },
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<flume::Sender<DeskEvent>>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> flume::Receiver<DeskEvent> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: DeskEvent) {
        trace!("publish {:?}", event);
        self.subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(flume::TrySendError::Full(_)) => true,
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = DeskEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_and_prune() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = DeskEvent::EscrowReleased { id: RequestId::new("tx_1") };
        bus.publish(event.clone());
        assert_eq!(a.try_recv().unwrap(), event);
        assert_eq!(b.try_recv().unwrap(), event);

        drop(b);
        bus.publish(event);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(a.try_recv().is_ok());
    }

    #[test]
    fn test_full_subscriber_is_kept() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        for i in 0..(SUBSCRIBER_CAPACITY + 10) {
            bus.publish(DeskEvent::EscrowReleased { id: RequestId::new(format!("tx_{}", i)) });
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(rx.len(), SUBSCRIBER_CAPACITY);
    }
}

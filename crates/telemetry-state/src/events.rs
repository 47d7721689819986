//! Per-entity change-event fan-out.
//!
//! Every entity owns an [`EventBus`]; update methods emit into it only when
//! a value actually changed. Subscribers get a bounded mpsc receiver;
//! emission is `try_send` fire-and-forget, so a slow consumer loses events
//! rather than stalling packet ingestion. There is no replay: a receiver
//! subscribed after an emission never observes it.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Bounded capacity of each subscriber channel.
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// Multi-subscriber observer over clonable typed events.
#[derive(Debug)]
pub struct EventBus<T> {
    senders: Vec<mpsc::Sender<T>>,
}

// Manual impl: a bus is constructible empty whether or not `T` is.
impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    /// Register a new subscriber. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&mut self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.senders.push(tx);
        rx
    }

    /// Fan `event` out to all live subscribers without blocking.
    ///
    /// A full subscriber drops this event; a closed subscriber is pruned.
    /// Delivery order per subscriber matches emission order.
    pub fn emit(&mut self, event: &T) {
        self.senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("event subscriber lagging; dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_events_in_emission_order() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(&1u32);
        bus.emit(&2u32);
        bus.emit(&3u32);

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Ok(3));
        assert!(rx.try_recv().is_err(), "no further events expected");
    }

    #[test]
    fn late_subscriber_sees_no_replay() {
        let mut bus = EventBus::new();
        bus.emit(&42u32);

        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_gets_each_event() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(&7u32);

        assert_eq!(first.try_recv(), Ok(7));
        assert_eq!(second.try_recv(), Ok(7));
    }

    #[test]
    fn closed_subscriber_is_pruned_without_affecting_others() {
        let mut bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.emit(&9u32);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(9));
    }

    #[test]
    fn full_subscriber_drops_overflow_but_stays_registered() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe();

        for i in 0..(SUBSCRIBER_CAPACITY as u32 + 8) {
            bus.emit(&i);
        }

        assert_eq!(bus.subscriber_count(), 1);
        // The first CAPACITY events survive; the overflow was dropped.
        for i in 0..SUBSCRIBER_CAPACITY as u32 {
            assert_eq!(rx.try_recv(), Ok(i));
        }
        assert!(rx.try_recv().is_err());
    }
}

//! Pool notifications for listeners

use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender};

use super::tile::TileKey;

/// State transitions published by a [`TilePool`](super::TilePool)
#[derive(Clone, Debug, PartialEq)]
pub enum PoolEvent {
    /// A tile was produced and stored
    TileReady(TileKey),
    /// A tile's producer failed; it will be retried on the next request
    TileFailed { key: TileKey, reason: String },
    /// A tile's pixels were dropped to stay within the cache budget
    TileEvicted(TileKey),
    /// Cached tiles became stale; carries the pool generation afterwards
    Invalidated { generation: u64 },
    /// Grids were rebuilt; carries the new layout epoch
    Reinitialized { epoch: u64 },
    /// Viewport origin or scale level changed
    ViewportChanged { x: f64, y: f64, scale_index: usize },
}

/// Fan-out of events to any number of channel subscribers
#[derive(Default)]
pub struct Listeners {
    senders: Mutex<Vec<Sender<PoolEvent>>>,
}

impl Listeners {
    /// New unbounded subscription
    pub fn subscribe(&self) -> Receiver<PoolEvent> {
        let (tx, rx) = flume::unbounded();
        self.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping disconnected ones
    pub fn emit(&self, event: PoolEvent) {
        let mut senders = self.lock();
        if senders.is_empty() {
            return;
        }
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<PoolEvent>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_events() {
        let listeners = Listeners::default();
        let a = listeners.subscribe();
        let b = listeners.subscribe();

        listeners.emit(PoolEvent::Reinitialized { epoch: 2 });

        assert_eq!(a.try_recv().unwrap(), PoolEvent::Reinitialized { epoch: 2 });
        assert_eq!(b.try_recv().unwrap(), PoolEvent::Reinitialized { epoch: 2 });
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let listeners = Listeners::default();
        let keep = listeners.subscribe();
        drop(listeners.subscribe());
        assert_eq!(listeners.len(), 2);

        listeners.emit(PoolEvent::TileReady(TileKey::new(0, 0, 0)));
        assert_eq!(listeners.len(), 1);
        assert!(keep.try_recv().is_ok());
    }
}

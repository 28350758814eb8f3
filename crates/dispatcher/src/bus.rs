//! DetectionBus - explicit observer registry for one device's detections

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use contracts::{DetectionEvent, DetectionObserver, SubscriptionId};
use tokio::sync::mpsc;
use tracing::trace;

/// Multi-subscriber broadcast of detection events
///
/// Every observer registered at publish time sees every event, in publish
/// order. Observers run synchronously on the publishing task; the registry
/// lock is not held while they run, so an observer may subscribe or
/// unsubscribe from inside its callback.
#[derive(Default)]
pub struct DetectionBus {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, DetectionObserver)>>,
}

impl fmt::Debug for DetectionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionBus")
            .field("observers", &self.len())
            .finish()
    }
}

impl DetectionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Remove an observer; `false` if the id is unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Subscribe through an unbounded channel.
    ///
    /// Handy for async consumers; events are never dropped while the receiver
    /// is alive.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DetectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(move |event: &DetectionEvent| {
            let _ = tx.send(event.clone());
        }));
        (id, rx)
    }

    /// Deliver an event to every observer, returning how many saw it
    pub fn publish(&self, event: &DetectionEvent) -> usize {
        let observers: Vec<DetectionObserver> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in &observers {
            observer(event);
        }

        trace!(
            device = %event.device,
            frequency = event.frequency,
            observers = observers.len(),
            "detection published"
        );
        observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::DeviceId;
    use std::sync::Mutex;

    fn event(frequency: u32) -> DetectionEvent {
        DetectionEvent {
            device: DeviceId::new("gate"),
            frequency,
            time: Utc::now(),
            peak: 10,
        }
    }

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let bus = DetectionBus::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        for seen in [&seen_a, &seen_b] {
            let seen = Arc::clone(seen);
            bus.subscribe(Arc::new(move |event: &DetectionEvent| {
                seen.lock().unwrap().push(event.frequency);
            }));
        }

        assert_eq!(bus.publish(&event(5658)), 2);
        assert_eq!(bus.publish(&event(5695)), 2);

        assert_eq!(*seen_a.lock().unwrap(), vec![5658, 5695]);
        assert_eq!(*seen_b.lock().unwrap(), vec![5658, 5695]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = DetectionBus::new();
        let id = bus.subscribe(Arc::new(|_: &DetectionEvent| {}));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(&event(5658)), 0);
    }

    #[test]
    fn test_observer_may_unsubscribe_itself() {
        let bus = Arc::new(DetectionBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner_bus = Arc::clone(&bus);
        let inner_slot = Arc::clone(&slot);
        let id = bus.subscribe(Arc::new(move |_: &DetectionEvent| {
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_bus.unsubscribe(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        assert_eq!(bus.publish(&event(5658)), 1);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let bus = DetectionBus::new();
        let (_id, mut rx) = bus.channel();

        bus.publish(&event(5732));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.frequency, 5732);
    }
}

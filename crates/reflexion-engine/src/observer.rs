//! Observer protocol: typed, synchronous, in-process event delivery.
//!
//! The engine owns an [`ObserverRegistry`] and publishes each mutation's
//! events in emission order once the mutation's own bookkeeping is complete.
//! Subscribers are notified in subscription order. Nothing is buffered,
//! retried or dropped.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::event::ChangeEvent;

/// A consumer of engine change events.
///
/// Implemented for any `FnMut(&ChangeEvent) + Send` closure.
pub trait ReflexionObserver: Send {
    fn notify(&mut self, event: &ChangeEvent);
}

impl<F> ReflexionObserver for F
where
    F: FnMut(&ChangeEvent) + Send,
{
    fn notify(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ObserverRegistry {
    subscribers: Vec<(SubscriptionId, Box<dyn ReflexionObserver>)>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn ReflexionObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, observer));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub(crate) fn publish(&mut self, events: &[ChangeEvent]) {
        for event in events {
            for (_, observer) in &mut self.subscribers {
                observer.notify(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("subscribers", &self.subscribers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Recording observer. Clones share one buffer, so a test or collaborator
/// keeps a clone and subscribes the other.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drains the buffer.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReflexionObserver for EventLog {
    fn notify(&mut self, event: &ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EdgeAction, EdgeRef};
    use reflexion_core::{EdgeId, NodeId, Subgraph};

    fn event(id: u32) -> ChangeEvent {
        ChangeEvent::EdgeEvent {
            edge: EdgeRef {
                id: EdgeId(id),
                source: NodeId(0),
                target: NodeId(1),
                kind: "Call".into(),
            },
            subgraph: Subgraph::Mapping,
            action: EdgeAction::Added,
        }
    }

    #[test]
    fn events_delivered_in_order_to_every_subscriber() {
        let mut registry = ObserverRegistry::new();
        let first = EventLog::new();
        let second = EventLog::new();
        registry.subscribe(Box::new(first.clone()));
        registry.subscribe(Box::new(second.clone()));

        registry.publish(&[event(1), event(2)]);

        assert_eq!(first.events(), vec![event(1), event(2)]);
        assert_eq!(second.events(), vec![event(1), event(2)]);
    }

    #[test]
    fn unsubscribed_observer_stops_receiving() {
        let mut registry = ObserverRegistry::new();
        let log = EventLog::new();
        let id = registry.subscribe(Box::new(log.clone()));

        registry.publish(&[event(1)]);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.publish(&[event(2)]);

        assert_eq!(log.events(), vec![event(1)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn closures_are_observers() {
        let mut registry = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        registry.subscribe(Box::new(move |_: &ChangeEvent| {
            *counter.lock().unwrap() += 1;
        }));

        registry.publish(&[event(1), event(2), event(3)]);
        assert_eq!(*seen.lock().unwrap(), 3);
    }

    #[test]
    fn take_drains_the_log() {
        let mut log = EventLog::new();
        log.notify(&event(5));
        assert_eq!(log.take(), vec![event(5)]);
        assert!(log.is_empty());
    }
}

//! Ordered, non-replaying publish/subscribe channel for one event type.
//!
//! Each `StreamingConnection` owns one feed per inbound event kind. Publishing
//! invokes every listener inline, in subscription order, before returning;
//! nothing is buffered and late subscribers never see earlier events.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

type Listener<T> = Box<dyn FnMut(&T) + Send + 'static>;

/// Handle returned by [`EventFeed::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct FeedState<T> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
    closed: bool,
}

/// Cloneable handle to a shared feed.
///
/// Listeners run while the feed is locked, so they must not subscribe to,
/// publish on, or close the same feed from inside the callback.
pub struct EventFeed<T> {
    state: Arc<Mutex<FeedState<T>>>,
}

impl<T> EventFeed<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FeedState {
                next_id: 0,
                listeners: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Registers a listener for events published from now on.
    ///
    /// Subscribing to a closed feed registers nothing.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&T) + Send + 'static,
    {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        if !state.closed {
            state.listeners.push((id, Box::new(listener)));
        }
        id
    }

    /// Removes a listener. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    /// Delivers `event` to every current listener and returns how many ran.
    pub fn publish(&self, event: &T) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        for (_, listener) in state.listeners.iter_mut() {
            listener(event);
        }
        state.listeners.len()
    }

    /// Drops all listeners; later publishes are no-ops.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState<T>> {
        // Poisoned only by a panicking listener; the list itself stays intact.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Clone for EventFeed<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for EventFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventFeed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventFeed")
            .field("subscribers", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::EventFeed;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(&u32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &u32| sink.lock().expect("lock").push(*value))
    }

    #[test]
    fn subscribers_observe_publication_order() {
        let feed = EventFeed::new();
        let (first, listener_a) = recorder();
        let (second, listener_b) = recorder();
        feed.subscribe(listener_a);
        feed.subscribe(listener_b);

        for value in [3, 1, 4, 1, 5, 9, 2, 6] {
            assert_eq!(feed.publish(&value), 2);
        }

        let expected = vec![3, 1, 4, 1, 5, 9, 2, 6];
        assert_eq!(*first.lock().expect("lock"), expected);
        assert_eq!(*second.lock().expect("lock"), expected);
    }

    #[test]
    fn late_subscriber_never_sees_earlier_events() {
        let feed = EventFeed::new();
        let (early, listener) = recorder();
        feed.subscribe(listener);
        feed.publish(&1);
        feed.publish(&2);

        let (late, listener) = recorder();
        feed.subscribe(listener);
        feed.publish(&3);

        assert_eq!(*early.lock().expect("lock"), vec![1, 2, 3]);
        assert_eq!(*late.lock().expect("lock"), vec![3]);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let feed = EventFeed::new();
        assert_eq!(feed.publish(&7), 0);

        let (seen, listener) = recorder();
        feed.subscribe(listener);
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery_to_that_listener_only() {
        let feed = EventFeed::new();
        let (kept, listener) = recorder();
        feed.subscribe(listener);
        let (removed, listener) = recorder();
        let id = feed.subscribe(listener);

        feed.publish(&1);
        assert!(feed.unsubscribe(id));
        assert!(!feed.unsubscribe(id));
        feed.publish(&2);

        assert_eq!(*kept.lock().expect("lock"), vec![1, 2]);
        assert_eq!(*removed.lock().expect("lock"), vec![1]);
    }

    #[test]
    fn closed_feed_delivers_nothing_and_accepts_no_listeners() {
        let feed = EventFeed::new();
        let (seen, listener) = recorder();
        feed.subscribe(listener);
        feed.publish(&1);

        let clone = feed.clone();
        clone.close();
        assert!(feed.is_closed());
        assert_eq!(feed.publish(&2), 0);

        let (late, listener) = recorder();
        feed.subscribe(listener);
        assert_eq!(feed.subscriber_count(), 0);
        feed.publish(&3);

        assert_eq!(*seen.lock().expect("lock"), vec![1]);
        assert!(late.lock().expect("lock").is_empty());
    }
}

use std::fmt;

/// Handle returned by [`EventBus::subscribe`]. Each subscriber owns its own
/// handle and passes it back to [`EventBus::unsubscribe`] to detach.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription(u64);

/// Minimal typed publish/subscribe fan-out used for all observability events
/// in the crate. Emission is synchronous and fire-and-forget: there is no
/// acknowledgment channel and a subscriber cannot fail a publish.
pub struct EventBus<T> {
    subscribers: Vec<(u64, Box<dyn Fn(&T) + Send>)>,
    next_id: u64,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    /// Registers a callback and returns the handle that detaches it.
    pub fn subscribe(&mut self, callback: impl Fn(&T) + Send + 'static) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        Subscription(id)
    }

    /// Removes the subscriber behind the handle. Consuming the handle makes a
    /// double unsubscribe unrepresentable.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.retain(|(id, _)| *id != subscription.0);
    }

    /// Delivers the event to every current subscriber, in subscription order.
    pub fn emit(&self, event: &T) {
        for (_, callback) in &self.subscribers {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn delivers_events_to_all_subscribers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(move |value: &u32| {
                seen.lock().unwrap().push((tag, *value));
            });
        }

        bus.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let seen = Arc::new(Mutex::new(0u32));
        let mut bus = EventBus::new();

        let handle = {
            let seen = seen.clone();
            bus.subscribe(move |value: &u32| {
                *seen.lock().unwrap() += value;
            })
        };

        bus.emit(&1);
        bus.unsubscribe(handle);
        bus.emit(&1);

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}

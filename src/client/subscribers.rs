//! Subscriber callbacks shared by the live and polling paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::event::Event;

type Callback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

impl Inner {
    fn callbacks(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registered callbacks, in subscription order.
///
/// Dispatch works on a copy of the list, so a callback may subscribe or
/// unsubscribe (itself included) while an event is being delivered.
#[derive(Clone, Default)]
pub struct SubscriberSet {
    inner: Arc<Inner>,
}

/// Handle returned by [`SubscriberSet::subscribe`]
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    set: Weak<Inner>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks().push((id, Arc::new(callback)));
        tracing::debug!(subscriber_id = id, "Subscriber added");

        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every subscriber. A failing callback is logged and
    /// does not stop delivery to the rest. Returns the number that succeeded.
    pub fn dispatch(&self, event: &Event) -> usize {
        let callbacks: Vec<(u64, Callback)> = self.inner.callbacks().clone();

        let mut succeeded = 0;
        for (id, callback) in callbacks {
            match callback(event) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = id,
                        event_id = %event.id(),
                        error = %e,
                        "Subscriber callback failed"
                    );
                }
            }
        }
        succeeded
    }

    pub fn len(&self) -> usize {
        self.inner.callbacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.callbacks().clear();
    }
}

impl Subscription {
    /// Remove the callback. Calling it again, or after the set is gone, does nothing.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.set.upgrade() {
            inner.callbacks().retain(|(id, _)| *id != self.id);
            tracing::debug!(subscriber_id = self.id, "Subscriber removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::event::{DeletedLink, EventBody};

    fn deleted() -> Event {
        Event::from_parts(EventBody::Deleted(DeletedLink::new("L1", "x")), 1, "m1")
    }

    #[test]
    fn test_failing_callback_is_isolated() {
        let set = SubscriberSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        set.subscribe(|_| anyhow::bail!("view exploded"));
        let counter = calls.clone();
        set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(set.dispatch(&deleted()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let set = SubscriberSet::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let own: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let counter = calls.clone();
        let slot = own.clone();
        let subscription = set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *own.lock().unwrap() = Some(subscription);

        set.dispatch(&deleted());
        set.dispatch(&deleted());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_subscribe_during_dispatch_waits_for_next_event() {
        let set = SubscriberSet::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let handle = set.clone();
        let counter = late_calls.clone();
        set.subscribe(move |_| {
            let counter = counter.clone();
            handle.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        set.dispatch(&deleted());
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        set.dispatch(&deleted());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = SubscriberSet::new();
        let subscription = set.subscribe(|_| Ok(()));
        drop(set);

        subscription.unsubscribe();
    }
}

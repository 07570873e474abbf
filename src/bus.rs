//! In-process change notifications: a write in one place tells every
//! interested view that its cached data is stale.
//!
//! Each [`ChangeBus`] is an isolated instance; create one at startup and
//! hand clones to whoever needs to publish or subscribe.

use crate::model::{ChangeEvent, ChangeKind};
use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

type Callback = Arc<dyn Fn(&ChangeEvent) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

pub fn create_change_bus() -> ChangeBus {
    ChangeBus::new()
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered until the returned
    /// [`Subscription`] is unsubscribed or the bus is cleared.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Call every subscriber registered at the time of the call, in
    /// registration order. A subscriber that errors or panics is logged and
    /// skipped. Returns how many subscribers completed without failure.
    pub fn notify_change(&self, kind: ChangeKind) -> usize {
        let snapshot: Vec<(u64, Callback)> = self.inner.subscribers().clone();
        let event = ChangeEvent { kind };
        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(subscriber = id, %kind, ?err, "change subscriber failed"),
                Err(_) => warn!(subscriber = id, %kind, "change subscriber panicked"),
            }
        }
        debug!(%kind, delivered, "change notified");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Drop every subscriber (shutdown / test teardown).
    pub fn clear(&self) {
        self.inner.subscribers().clear();
    }
}

/// Handle returned by [`ChangeBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Remove exactly this subscriber. Safe to call more than once; returns
    /// whether anything was removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut subscribers = inner.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Fn(&ChangeEvent) -> Result<()> {
        let log = Arc::clone(log);
        move |event| {
            log.lock().unwrap().push(format!("{}:{}", name, event.kind));
            Ok(())
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = create_change_bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = bus.subscribe(recorder(&log, "a"));
        let _b = bus.subscribe(recorder(&log, "b"));

        assert_eq!(bus.notify_change(ChangeKind::Walk), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:walk", "b:walk"]);
    }

    #[test]
    fn failing_subscribers_do_not_block_others() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _err = bus.subscribe(|_| Err(anyhow!("view gone")));
        let _panic = bus.subscribe(|_| panic!("boom"));
        let _ok = bus.subscribe(recorder(&log, "ok"));

        assert_eq!(bus.notify_change(ChangeKind::Activity), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:activity"]);
    }

    #[test]
    fn unsubscribe_is_exact_and_idempotent() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = bus.subscribe(recorder(&log, "a"));
        let _b = bus.subscribe(recorder(&log, "b"));

        assert!(a.unsubscribe());
        assert!(!a.unsubscribe());
        assert_eq!(bus.subscriber_count(), 1);

        bus.notify_change(ChangeKind::Feeding);
        assert_eq!(*log.lock().unwrap(), vec!["b:feeding"]);
    }

    #[test]
    fn late_subscribers_miss_current_notification() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_bus = bus.clone();
        let inner_log = Arc::clone(&log);
        let _first = bus.subscribe(move |_| {
            let _late = inner_bus.subscribe(recorder(&inner_log, "late"));
            Ok(())
        });

        assert_eq!(bus.notify_change(ChangeKind::Walk), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(), 2);
        bus.clear();
    }

    #[test]
    fn buses_are_isolated() {
        let one = ChangeBus::new();
        let two = ChangeBus::new();
        let _s = one.subscribe(|_| Ok(()));
        assert_eq!(one.subscriber_count(), 1);
        assert_eq!(two.notify_change(ChangeKind::Walk), 0);
    }

    #[test]
    fn unsubscribe_after_bus_dropped() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe(|_| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
    }
}

//! Publish/subscribe delivery of [`DeviceEvent`]s.
//!
//! Handlers run synchronously on the publishing task, in subscription order. A handler that
//! returns an error or panics is logged and skipped; the publisher never sees the failure.
//! Deliveries from independent publishers are serialized, so every subscriber observes the
//! same event order.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use log::{error, warn};

use crate::device::types::{DeviceEvent, EventKind};
use crate::error::{readable_panic_error, HandlerError};

pub type Handler = Arc<dyn Fn(&DeviceEvent) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    kind: Option<EventKind>, // None: every kind
    active: Arc<AtomicBool>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    entries: Vec<Entry>,
}

thread_local! {
    // buses this thread is currently delivering for; lets a handler publish without deadlocking
    static DELIVERING: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    delivery: Arc<Mutex<()>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&DeviceEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DeviceEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    fn add(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        let active = Arc::new(AtomicBool::new(true));

        inner.entries.push(Entry { id, kind, active: active.clone(), handler });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active,
        }
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove_entry(&self.inner, id)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Deliver `event` to every matching subscriber. Returns how many handlers succeeded.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        let bus_key = Arc::as_ptr(&self.delivery) as usize;
        let nested = DELIVERING.with(|delivering| delivering.borrow().contains(&bus_key));

        if nested {
            return self.deliver(&event);
        }

        let _delivery = lock(&self.delivery);
        DELIVERING.with(|delivering| delivering.borrow_mut().push(bus_key));
        let delivered = self.deliver(&event);
        DELIVERING.with(|delivering| {
            let mut delivering = delivering.borrow_mut();
            if let Some(pos) = delivering.iter().rposition(|key| *key == bus_key) {
                delivering.remove(pos);
            }
        });

        delivered
    }

    fn deliver(&self, event: &DeviceEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Arc<AtomicBool>, Handler)> = {
            let inner = lock(&self.inner);
            inner.entries
                .iter()
                .filter(|entry| entry.kind.map_or(true, |k| k == kind))
                .map(|entry| (entry.id, entry.active.clone(), entry.handler.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, active, handler) in targets {
            // unsubscribed while an earlier handler was running
            if !active.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!("Subscriber {:?} failed handling {:?}: {}", id, kind, err);
                },
                Err(panic) => {
                    error!("Subscriber {:?} failed handling {:?}: {}", id, kind, readable_panic_error(&panic));
                },
            }
        }

        delivered
    }
}

fn remove_entry(inner: &Mutex<BusInner>, id: SubscriptionId) -> bool {
    let mut inner = lock(inner);
    match inner.entries.iter().position(|entry| entry.id == id) {
        Some(pos) => {
            let entry = inner.entries.remove(pos);
            entry.active.store(false, Ordering::Release);
            true
        },
        None => false,
    }
}

/// Handle for one subscriber. Dropping it stops delivery to that subscriber.
///
/// A publish that is already running on another thread may still be inside, or about to
/// enter, this subscriber's handler when `drop` returns; at most that one call is in flight.
/// Drops on the delivering thread itself (for instance from an earlier handler of the same
/// event) take effect immediately.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<Mutex<BusInner>>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(inner) = self.bus.upgrade() {
            remove_entry(&inner, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::SessionState;

    fn recorder(bus: &EventBus, kind: EventKind, log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Subscription {
        let log = log.clone();
        bus.subscribe(kind, move |event| {
            log.lock().unwrap().push(format!("{}:{:?}", name, event));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&bus, EventKind::Scan, &log, "a");
        let _b = recorder(&bus, EventKind::Scan, &log, "b");

        assert_eq!(bus.publish(DeviceEvent::ScanStarted), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:ScanStarted", "b:ScanStarted"]);
    }

    #[test]
    fn filters_by_kind() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _scan = recorder(&bus, EventKind::Scan, &log, "scan");

        assert_eq!(bus.publish(DeviceEvent::StateChange(SessionState::Connecting)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_handlers_do_not_stop_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _err = bus.subscribe_all(|_| Err(HandlerError::Failed("disk full".to_string())));
        let _panic = bus.subscribe_all(|_| panic!("handler exploded"));
        let _ok = recorder(&bus, EventKind::Scan, &log, "ok");

        assert_eq!(bus.publish(DeviceEvent::ScanStopped), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:ScanStopped"]);

        // the bus is still usable after a panicking handler
        assert_eq!(bus.publish(DeviceEvent::ScanStopped), 1);
    }

    #[test]
    fn dropping_subscription_stops_delivery_to_that_subscriber_only() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&bus, EventKind::Scan, &log, "a");
        let _b = recorder(&bus, EventKind::Scan, &log, "b");

        drop(a);
        bus.publish(DeviceEvent::ScanStarted);

        assert_eq!(*log.lock().unwrap(), vec!["b:ScanStarted"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn subscription_dropped_by_earlier_handler_is_skipped() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        let _dropper = bus.subscribe(EventKind::Scan, move |_| {
            slot.lock().unwrap().take();
            Ok(())
        });
        *victim.lock().unwrap() = Some(recorder(&bus, EventKind::Scan, &log, "victim"));
        let _after = recorder(&bus, EventKind::Scan, &log, "after");

        assert_eq!(bus.publish(DeviceEvent::ScanStarted), 2);
        assert_eq!(*log.lock().unwrap(), vec!["after:ScanStarted"]);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribe_by_id() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&bus, EventKind::Scan, &log, "a");

        assert!(bus.unsubscribe(a.id()));
        assert!(!a.is_active());
        assert!(!bus.unsubscribe(a.id()));

        bus.publish(DeviceEvent::ScanStarted);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_may_publish_on_the_same_bus() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_bus = bus.clone();
        let _relay = bus.subscribe(EventKind::Scan, move |event| {
            if *event == DeviceEvent::ScanStopped {
                inner_bus.publish(DeviceEvent::StateChange(SessionState::Idle));
            }
            Ok(())
        });
        let _state = recorder(&bus, EventKind::State, &log, "state");

        bus.publish(DeviceEvent::ScanStopped);
        assert_eq!(*log.lock().unwrap(), vec!["state:StateChange(Idle)"]);
    }

    #[test]
    fn concurrent_publishers() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0_u32));
        let counter = count.clone();
        let _sub = bus.subscribe_all(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        bus.publish(DeviceEvent::Listening(true));
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(*count.lock().unwrap(), 400);
    }
}

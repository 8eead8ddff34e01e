//! # Event Bus
//!
//! An in-process, topic-based publish/subscribe hub. The runtime uses it to
//! announce lifecycle transitions (see [`topics`]) and components use it to talk
//! to each other without holding references to one another.
//!
//! ## Delivery
//!
//! - **Exact topics.** A subscriber to `"service.started"` receives events published
//!   to exactly that string. There is no wildcard or hierarchical matching.
//! - **Fan-out, no ordering.** Every subscriber of the topic receives the event; the
//!   order in which subscribers are called is unspecified.
//! - **Isolation.** A handler that returns `Err` or panics is logged and skipped;
//!   the remaining subscribers still receive the event.
//! - **Outside the lock.** Handlers run after the subscriber table lock has been
//!   released, so a handler may publish, subscribe or cancel without deadlocking.
//!
//! ## Sync vs async
//!
//! | | Runs on | Tracked by `wait_async` |
//! |---|---|---|
//! | [`subscribe`](EventBus::subscribe) + [`publish`](EventBus::publish) | caller's thread | no |
//! | [`subscribe_async`](EventBus::subscribe_async) | tokio blocking pool, one job per invocation | yes |
//! | [`publish_async`](EventBus::publish_async) | tokio blocking pool, one job per subscriber | yes |
//!
//! Handlers are plain closures, so spawned invocations go to
//! [`spawn_blocking`](tokio::runtime::Handle::spawn_blocking) and run in parallel
//! without occupying async workers. Without a runtime each one gets an OS thread.
//!
//! [`wait_async`](EventBus::wait_async) resolves once every tracked invocation has
//! finished, which gives tests and shutdown code a deterministic drain point.
//! Called from inside a spawned handler (for example through
//! `Handle::block_on`), it does not wait for the invocations on its own thread's
//! call stack, since those cannot finish first.
//!
//!
//! ```rust
//! use component_runtime::{Event, EventBus};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new();
//!     let hits = Arc::new(AtomicUsize::new(0));
//!
//!     let counter = hits.clone();
//!     let sub = bus.subscribe_async("job.done", move |_event| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     });
//!
//!     bus.publish(Event::new("job.done", "worker-1"));
//!     bus.wait_async().await;
//!     assert_eq!(hits.load(Ordering::SeqCst), 1);
//!
//!     sub.cancel();
//!     assert_eq!(bus.subscriber_count("job.done"), 0);
//! }
//! ```

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::BoxError;

/// Standard lifecycle topics published by the [`Runtime`](crate::Runtime).
pub mod topics {
    pub const SYSTEM_INITIALIZED: &str = "system.initialized";
    pub const SYSTEM_STARTED: &str = "system.started";
    pub const SYSTEM_STOPPED: &str = "system.stopped";
    /// A service failed while the whole system was starting.
    pub const SYSTEM_SERVICE_FAILED: &str = "system.service.failed";
    pub const OPERATION_EXECUTED: &str = "operation.executed";
    pub const OPERATION_FAILED: &str = "operation.failed";
    pub const SERVICE_STARTED: &str = "service.started";
    pub const SERVICE_STOPPED: &str = "service.stopped";
    pub const SERVICE_FAILED: &str = "service.failed";
}

/// String-keyed event payload.
pub type Payload = HashMap<String, Value>;

/// An immutable notification. Subscribers receive it by reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub topic: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub payload: Payload,
}

impl Event {
    /// A new event stamped with the current time and an empty payload.
    pub fn new(topic: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            source: source.into(),
            time: Utc::now(),
            payload: Payload::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

pub type HandlerResult = Result<(), BoxError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Inline,
    Spawned,
}

#[derive(Clone)]
struct Subscriber {
    id: Uuid,
    handler: Handler,
    delivery: Delivery,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    in_flight: InFlight,
}

impl BusInner {
    fn remove(&self, topic: &str, id: Uuid) {
        let mut subscribers = self.subscribers.write();
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

/// Decrements the in-flight counter when the tracked invocation ends, however
/// it ends (completion, panic, or the task being dropped unrun).
struct InFlightGuard {
    inner: Arc<BusInner>,
}

impl InFlightGuard {
    fn new(inner: Arc<BusInner>) -> Self {
        inner.in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.count.fetch_sub(1, Ordering::SeqCst);
        // Waiters inside a handler wait for a non-zero floor, so wake on every exit.
        self.inner.in_flight.idle.notify_waiters();
    }
}

thread_local! {
    /// Spawned handler invocations currently on this thread's call stack.
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DispatchScope;

impl DispatchScope {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|d| d.set(d.get() + 1));
        DispatchScope
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Handle to an active subscription.
///
/// Dropping the handle does **not** unsubscribe; call [`Subscription::cancel`].
pub struct Subscription {
    id: Uuid,
    topic: String,
    cancelled: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Remove the subscription. Idempotent. Once this returns the handler is not
    /// invoked again, including async invocations queued but not yet started.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.topic, self.id);
        }
        debug!(topic = %self.topic, subscription = %self.id, "Subscription cancelled");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// In-process publish/subscribe hub. Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of its topic. Inline subscribers run
    /// on this thread before the call returns; async subscribers are spawned.
    ///
    /// Returns the number of subscribers the event was dispatched to.
    pub fn publish(&self, event: Event) -> usize {
        self.dispatch(Arc::new(event), false)
    }

    /// Deliver `event` to every subscriber of its topic, each as its own
    /// blocking-pool job.
    /// Returns immediately; use [`EventBus::wait_async`] to wait for delivery.
    pub fn publish_async(&self, event: Event) -> usize {
        self.dispatch(Arc::new(event), true)
    }

    /// Register a handler invoked on the publisher's thread.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(topic.into(), Arc::new(handler), Delivery::Inline)
    }

    /// Register a handler whose every invocation runs as its own blocking-pool job.
    pub fn subscribe_async<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(topic.into(), Arc::new(handler), Delivery::Spawned)
    }

    /// Resolves when no spawned handler invocation is running or queued.
    ///
    /// From inside a spawned handler, the invocations enclosing the call are
    /// not waited for.
    pub async fn wait_async(&self) {
        let own = DISPATCH_DEPTH.with(Cell::get);
        loop {
            let notified = self.inner.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.count.load(Ordering::SeqCst) <= own {
                return;
            }
            notified.await;
        }
    }

    /// Number of spawned handler invocations still running or queued.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Topics that currently have at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.inner.subscribers.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn add(&self, topic: String, handler: Handler, delivery: Delivery) -> Subscription {
        let id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));
        let subscriber = Subscriber {
            id,
            handler,
            delivery,
            cancelled: cancelled.clone(),
        };
        self.inner
            .subscribers
            .write()
            .entry(topic.clone())
            .or_default()
            .push(subscriber);
        debug!(%topic, subscription = %id, ?delivery, "Subscribed");

        Subscription {
            id,
            topic,
            cancelled,
            bus: Arc::downgrade(&self.inner),
        }
    }

    fn dispatch(&self, event: Arc<Event>, force_spawn: bool) -> usize {
        // Snapshot under the read lock, invoke after releasing it.
        let subscribers = self
            .inner
            .subscribers
            .read()
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();

        for subscriber in &subscribers {
            if force_spawn || subscriber.delivery == Delivery::Spawned {
                self.spawn_tracked(subscriber.clone(), event.clone());
            } else {
                invoke(subscriber, &event);
            }
        }
        debug!(topic = %event.topic, source = %event.source, subscribers = subscribers.len(), "Published");
        subscribers.len()
    }

    fn spawn_tracked(&self, subscriber: Subscriber, event: Arc<Event>) {
        let guard = InFlightGuard::new(self.inner.clone());
        let job = move || {
            let _guard = guard;
            let _scope = DispatchScope::enter();
            invoke(&subscriber, &event);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                // No runtime on this thread: fall back to a plain OS thread.
                if let Err(e) = std::thread::Builder::new()
                    .name("event-dispatch".into())
                    .spawn(job)
                {
                    error!(error = %e, "Failed to spawn event dispatch thread");
                }
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn invoke(subscriber: &Subscriber, event: &Event) {
    if subscriber.cancelled.load(Ordering::Acquire) {
        return;
    }
    match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(topic = %event.topic, subscription = %subscriber.id, error = %e, "Event handler failed");
        }
        Err(panic) => {
            error!(
                topic = %event.topic,
                subscription = %subscriber.id,
                panic = %panic_message(panic.as_ref()),
                "Event handler panicked"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) -> HandlerResult + Send + Sync) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn publish_invokes_once_per_publish_until_cancelled() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let sub = bus.subscribe("t", handler);

        assert_eq!(bus.publish(Event::new("t", "test")), 1);
        bus.publish(Event::new("t", "test"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        sub.cancel();
        assert_eq!(bus.publish(Event::new("t", "test")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exact_topic_only() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let _sub = bus.subscribe("service.started", handler);

        bus.publish(Event::new("service", "test"));
        bus.publish(Event::new("service.started.extra", "test"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_drops_empty_topic() {
        let bus = EventBus::new();
        let (_, h1) = counter();
        let (hits2, h2) = counter();
        let a = bus.subscribe("t", h1);
        let b = bus.subscribe("t", h2);

        a.cancel();
        a.cancel();
        assert!(a.is_cancelled());
        assert_eq!(bus.subscriber_count("t"), 1);

        bus.publish(Event::new("t", "test"));
        assert_eq!(hits2.load(Ordering::SeqCst), 1);

        b.cancel();
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn same_handler_twice_gives_independent_entries() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = {
            let hits = hits.clone();
            Arc::new(move |_: &Event| -> HandlerResult {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let h1 = handler.clone();
        let h2 = handler.clone();
        let first = bus.subscribe("t", move |e| h1(e));
        let second = bus.subscribe("t", move |e| h2(e));
        assert_ne!(first.id(), second.id());

        bus.publish(Event::new("t", "test"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        first.cancel();
        bus.publish(Event::new("t", "test"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_stop_delivery() {
        let bus = EventBus::new();
        let _err = bus.subscribe("t", |_| Err("handler error".into()));
        let _panic = bus.subscribe("t", |_| panic!("handler panic"));
        let (hits, handler) = counter();
        let _ok = bus.subscribe("t", handler);

        assert_eq!(bus.publish(Event::new("t", "test")), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_publish_and_subscribe_reentrantly() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let _downstream = bus.subscribe("b", handler);

        let inner_bus = bus.clone();
        let _upstream = bus.subscribe("a", move |event| {
            inner_bus.publish(Event::new("b", event.source.clone()));
            let late = inner_bus.subscribe("c", |_| Ok(()));
            late.cancel();
            Ok(())
        });

        bus.publish(Event::new("a", "test"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("c"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_async_drains_every_spawned_invocation() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut subs = Vec::new();
        for _ in 0..4 {
            let hits = hits.clone();
            subs.push(bus.subscribe("slow", move |_| {
                std::thread::sleep(Duration::from_millis(20));
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        for _ in 0..3 {
            bus.publish_async(Event::new("slow", "test"));
        }
        bus.wait_async().await;

        assert_eq!(hits.load(Ordering::SeqCst), 12);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn async_subscriber_is_spawned_by_plain_publish() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = bus.subscribe_async("t", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(Event::new("t", "test")), 1);
        bus.wait_async().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn slow_async_handlers_run_in_parallel() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut subs = Vec::new();
        for _ in 0..4 {
            let hits = hits.clone();
            subs.push(bus.subscribe_async("slow", move |_| {
                std::thread::sleep(Duration::from_millis(100));
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let started = std::time::Instant::now();
        bus.publish_async(Event::new("slow", "test"));
        bus.wait_async().await;

        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert!(
            started.elapsed() < Duration::from_millis(300),
            "drain took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn async_handler_does_not_block_other_tasks() {
        let bus = EventBus::new();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let rx = parking_lot::Mutex::new(rx);
        let _sub = bus.subscribe_async("wait", move |_| {
            rx.lock()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| BoxError::from(e.to_string()))
        });

        bus.publish(Event::new("wait", "test"));
        // Runs on this current-thread runtime while the handler is blocked.
        tokio::spawn(async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), bus.wait_async())
            .await
            .expect("handler should have been released");
    }

    #[tokio::test]
    async fn cancel_skips_invocations_already_dispatched() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let target: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();

        // Runs inline before the async subscriber below is handed to the pool.
        let to_cancel = target.clone();
        let _canceller = bus.subscribe("t", move |_| {
            if let Some(sub) = to_cancel.lock().as_ref() {
                sub.cancel();
            }
            Ok(())
        });
        *target.lock() = Some(bus.subscribe_async("t", handler));

        assert_eq!(bus.publish(Event::new("t", "test")), 2);
        bus.wait_async().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_async_inside_a_handler_ignores_its_own_invocation() {
        let bus = EventBus::new();
        let inner = bus.clone();
        let handle = tokio::runtime::Handle::current();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let _sub = bus.subscribe_async("drain", move |_| {
            let waited = handle.block_on(tokio::time::timeout(
                Duration::from_secs(2),
                inner.wait_async(),
            ));
            done.store(waited.is_ok(), Ordering::SeqCst);
            Ok(())
        });

        bus.publish(Event::new("drain", "test"));
        bus.wait_async().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_async_returns_immediately_when_idle() {
        let bus = EventBus::new();
        tokio::time::timeout(Duration::from_secs(1), bus.wait_async())
            .await
            .expect("idle bus should not block");
    }

    #[test]
    fn publish_async_without_runtime_uses_threads() {
        let bus = EventBus::new();
        let (hits, handler) = counter();
        let _sub = bus.subscribe("t", handler);

        bus.publish_async(Event::new("t", "test"));
        for _ in 0..200 {
            if bus.in_flight() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_payload_accessors() {
        let event = Event::new("t", "src").with("service_id", "db").with("attempt", 2);
        assert_eq!(event.get_str("service_id"), Some("db"));
        assert_eq!(event.get("attempt"), Some(&Value::from(2)));
        assert_eq!(event.get_str("attempt"), None);
    }
}

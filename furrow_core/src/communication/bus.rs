use crate::communication::queue::{MessageQueue, QueuedDelivery};
use crate::time::{TimestampGenerator, TimestampMetadata};
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type ErasedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// One registered subscriber: handler, priority, delivery mode, and the
/// flags that make disposal safe against in-flight publishes.
pub(crate) struct SubscriberRecord {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    priority: i32,
    order: u64,
    active: AtomicBool,
    // Held around every handler invocation; dispose() acquires it to
    // wait out an in-flight call before returning.
    call_guard: Mutex<()>,
    handler: ErasedHandler,
    queue: Option<Arc<MessageQueue>>,
}

pub(crate) enum DeliveryOutcome {
    Delivered,
    Skipped,
    Faulted,
}

impl SubscriberRecord {
    /// Invoke the handler with fault containment. Never panics.
    pub(crate) fn deliver(&self, message: &dyn Any) -> DeliveryOutcome {
        if !self.active.load(Ordering::Acquire) {
            return DeliveryOutcome::Skipped;
        }
        let _guard = self.call_guard.lock();
        // Re-check under the guard: dispose() may have won the race.
        if !self.active.load(Ordering::Acquire) {
            return DeliveryOutcome::Skipped;
        }
        match catch_unwind(AssertUnwindSafe(|| (self.handler)(message))) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(payload) => {
                log::error!(
                    "subscriber '{}' panicked handling {}: {}",
                    self.name,
                    self.type_name,
                    panic_message(&payload)
                );
                DeliveryOutcome::Faulted
            }
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Per-type registry entry: subscriber list plus the last-value cache.
struct TopicEntry {
    type_name: &'static str,
    // Sorted by (priority desc, registration order asc); dispatch
    // clones the Vec of Arcs as its snapshot, so registry mutation
    // never blocks an in-flight publish.
    subscribers: RwLock<Vec<Arc<SubscriberRecord>>>,
    last_value: RwLock<Option<(Arc<dyn Any + Send + Sync>, TimestampMetadata)>>,
}

impl TopicEntry {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            subscribers: RwLock::new(Vec::new()),
            last_value: RwLock::new(None),
        }
    }

    fn insert_sorted(&self, record: Arc<SubscriberRecord>) {
        let mut subs = self.subscribers.write();
        let at = subs
            .iter()
            .position(|s| s.priority < record.priority)
            .unwrap_or(subs.len());
        subs.insert(at, record);
    }

    fn remove(&self, order: u64) {
        self.subscribers.write().retain(|s| s.order != order);
    }
}

/// Lock-free atomic metrics for bus monitoring with cache optimization
#[derive(Debug, Default)]
#[repr(align(64))] // Cache-line aligned to prevent false sharing
struct AtomicBusMetrics {
    publishes: AtomicU64,
    deliveries: AtomicU64,
    queued_deliveries: AtomicU64,
    handler_faults: AtomicU64,
}

/// Snapshot of bus metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetrics {
    pub publishes: u64,
    pub deliveries: u64,
    pub queued_deliveries: u64,
    pub handler_faults: u64,
}

struct BusInner {
    topics: RwLock<HashMap<TypeId, Arc<TopicEntry>>>,
    stamps: TimestampGenerator,
    next_order: AtomicU64,
    metrics: AtomicBusMetrics,
}

impl BusInner {
    fn topic_entry(&self, type_id: TypeId, type_name: &'static str) -> Arc<TopicEntry> {
        if let Some(entry) = self.topics.read().get(&type_id) {
            return entry.clone();
        }
        self.topics
            .write()
            .entry(type_id)
            .or_insert_with(|| Arc::new(TopicEntry::new(type_name)))
            .clone()
    }

    fn publish_now<T: Clone + Send + Sync + 'static>(&self, message: T) {
        let stamp = self.stamps.stamp::<T>();
        let entry = self.topic_entry(TypeId::of::<T>(), std::any::type_name::<T>());

        *entry.last_value.write() = Some((Arc::new(message.clone()), stamp));
        self.metrics.publishes.fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<Arc<SubscriberRecord>> = entry.subscribers.read().clone();
        for subscriber in snapshot {
            match &subscriber.queue {
                Some(queue) => {
                    if subscriber.is_active() {
                        queue.enqueue(QueuedDelivery::new(
                            subscriber.clone(),
                            Box::new(message.clone()),
                        ));
                        self.metrics.queued_deliveries.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => match subscriber.deliver(&message) {
                    DeliveryOutcome::Delivered => {
                        self.metrics.deliveries.fetch_add(1, Ordering::Relaxed);
                    }
                    DeliveryOutcome::Faulted => {
                        self.metrics.handler_faults.fetch_add(1, Ordering::Relaxed);
                    }
                    DeliveryOutcome::Skipped => {}
                },
            }
        }
    }
}

/// Typed in-process publish/subscribe bus.
///
/// Cheap to clone; clones share the same registry, last-value cache,
/// and timestamp generator.
///
/// # Example
/// ```rust,ignore
/// let bus = MessageBus::new(TimestampGenerator::new(SimClock::system()));
/// let _sub = bus.subscribe::<PositionFix>("guidance", 0, |fix| {
///     // runs synchronously on the publisher's context
/// });
/// bus.publish(PositionFix::default());
/// ```
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
    async_tx: crossbeam::channel::Sender<Box<dyn FnOnce() + Send>>,
}

impl MessageBus {
    pub fn new(stamps: TimestampGenerator) -> Self {
        let inner = Arc::new(BusInner {
            topics: RwLock::new(HashMap::new()),
            stamps,
            next_order: AtomicU64::new(0),
            metrics: AtomicBusMetrics::default(),
        });

        // Dedicated dispatch worker for publish_async: exits when the
        // last bus clone (and its sender) drops.
        let (async_tx, async_rx) = crossbeam::channel::unbounded::<Box<dyn FnOnce() + Send>>();
        std::thread::Builder::new()
            .name("bus-async-dispatch".into())
            .spawn(move || {
                for job in async_rx.iter() {
                    job();
                }
            })
            .expect("failed to spawn bus dispatch thread");

        Self { inner, async_tx }
    }

    /// The timestamp generator stamping every publish.
    pub fn stamps(&self) -> &TimestampGenerator {
        &self.inner.stamps
    }

    /// Register an immediate subscriber for messages of type `T`.
    ///
    /// The handler runs synchronously on the publishing context, in
    /// descending priority order (ties broken by registration order).
    /// `name` identifies the subscriber in fault logs.
    ///
    /// Dropping (or [`Subscription::dispose`]-ing) the returned handle
    /// guarantees the handler is never invoked again, even if a publish
    /// is in flight at that moment.
    pub fn subscribe<T, F>(&self, name: &str, priority: i32, handler: F) -> Subscription
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |any: &dyn Any| {
            if let Some(message) = any.downcast_ref::<T>() {
                handler(message);
            }
        });
        self.register::<T>(name, priority, erased, None)
    }

    /// Register a queued subscriber: `publish` appends `(handler, message)`
    /// to `queue` instead of invoking inline; the owning module drains it
    /// with [`MessageQueue::process_queue`].
    pub fn subscribe_queued<T, F>(
        &self,
        name: &str,
        queue: &Arc<MessageQueue>,
        handler: F,
    ) -> Subscription
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |any: &dyn Any| {
            if let Some(message) = any.downcast_ref::<T>() {
                handler(message);
            }
        });
        self.register::<T>(name, 0, erased, Some(queue.clone()))
    }

    fn register<T: 'static>(
        &self,
        name: &str,
        priority: i32,
        handler: ErasedHandler,
        queue: Option<Arc<MessageQueue>>,
    ) -> Subscription {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        let record = Arc::new(SubscriberRecord {
            name: name.to_string(),
            type_name,
            priority,
            order: self.inner.next_order.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            call_guard: Mutex::new(()),
            handler,
            queue,
        });

        self.inner
            .topic_entry(type_id, type_name)
            .insert_sorted(record.clone());

        Subscription {
            bus: Arc::downgrade(&self.inner),
            type_id,
            record,
            disposed: AtomicBool::new(false),
        }
    }

    /// Publish a message synchronously.
    ///
    /// Delivers to all immediate subscribers of `T` in priority order,
    /// enqueues one owned copy per queued subscriber, and updates the
    /// last-value cache. A subscriber fault is contained and logged;
    /// this call always returns normally.
    pub fn publish<T: Clone + Send + Sync + 'static>(&self, message: T) {
        self.inner.publish_now(message);
    }

    /// Publish without blocking the caller on handler completion.
    ///
    /// Delivery happens on the bus's dispatch thread. Ordering across
    /// `publish_async` calls is preserved in send order.
    pub fn publish_async<T: Clone + Send + Sync + 'static>(&self, message: T) {
        let inner = self.inner.clone();
        // Send fails only if the dispatch thread is gone, i.e. the
        // process is tearing down; the message is dropped then.
        let _ = self
            .async_tx
            .send(Box::new(move || inner.publish_now(message)));
    }

    /// Last published value of type `T` and its timestamp, if any.
    pub fn try_get_last<T: Clone + Send + Sync + 'static>(
        &self,
    ) -> Option<(T, TimestampMetadata)> {
        let entry = self.inner.topics.read().get(&TypeId::of::<T>())?.clone();
        let last = entry.last_value.read();
        last.as_ref().and_then(|(any, stamp)| {
            any.downcast_ref::<T>()
                .map(|message| (message.clone(), stamp.clone()))
        })
    }

    /// Current metrics snapshot (lock-free).
    pub fn metrics(&self) -> BusMetrics {
        let m = &self.inner.metrics;
        BusMetrics {
            publishes: m.publishes.load(Ordering::Relaxed),
            deliveries: m.deliveries.load(Ordering::Relaxed),
            queued_deliveries: m.queued_deliveries.load(Ordering::Relaxed),
            handler_faults: m.handler_faults.load(Ordering::Relaxed),
        }
    }

    /// Number of active subscribers for type `T`.
    pub fn subscriber_count<T: 'static>(&self) -> usize {
        self.inner
            .topics
            .read()
            .get(&TypeId::of::<T>())
            .map(|entry| entry.subscribers.read().iter().filter(|s| s.is_active()).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<&'static str> = self
            .inner
            .topics
            .read()
            .values()
            .map(|entry| entry.type_name)
            .collect();
        f.debug_struct("MessageBus")
            .field("topics", &topics)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// Handle to one bus subscription. Disposing it (explicitly or on drop)
/// removes the subscriber and waits out any in-flight invocation, so no
/// handler call can begin after disposal returns.
pub struct Subscription {
    bus: Weak<BusInner>,
    type_id: TypeId,
    record: Arc<SubscriberRecord>,
    disposed: AtomicBool,
}

impl Subscription {
    /// Deactivate and remove this subscription, blocking until any
    /// in-flight invocation of its handler has returned.
    ///
    /// Must not be called from inside the subscription's own handler.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.record.active.store(false, Ordering::Release);
        // Wait for an in-flight call to finish.
        drop(self.record.call_guard.lock());
        self.remove_from_registry();
    }

    /// Non-blocking variant for force-unload of a hung module: the
    /// handler will never be invoked again, but an already-running call
    /// is not waited for.
    pub(crate) fn revoke(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.record.active.store(false, Ordering::Release);
        self.remove_from_registry();
    }

    fn remove_from_registry(&self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Some(entry) = bus.topics.read().get(&self.type_id) {
                entry.remove(self.record.order);
            }
        }
    }

    /// Whether the subscription is still live.
    pub fn is_active(&self) -> bool {
        self.record.is_active()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.record.name)
            .field("type", &self.record.type_name)
            .field("active", &self.is_active())
            .finish()
    }
}

use crate::communication::bus::{DeliveryOutcome, SubscriberRecord};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One pending deferred delivery: the subscriber to invoke and an owned
/// copy of the message.
pub(crate) struct QueuedDelivery {
    subscriber: Arc<SubscriberRecord>,
    message: Box<dyn Any + Send + Sync>,
}

impl QueuedDelivery {
    pub(crate) fn new(
        subscriber: Arc<SubscriberRecord>,
        message: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self { subscriber, message }
    }
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub processed: u64,
    pub handler_faults: u64,
}

/// Deferred-delivery buffer bound to one module.
///
/// Any publishing context may enqueue concurrently; only the owning
/// module drains, by calling [`MessageQueue::process_queue`] from its
/// own tick. Draining works on a snapshot taken at call time: entries
/// enqueued while a drain is running are processed on the *next* call,
/// never recursively.
pub struct MessageQueue {
    owner: String,
    entries: Mutex<VecDeque<QueuedDelivery>>,
    enqueued: AtomicU64,
    processed: AtomicU64,
    handler_faults: AtomicU64,
}

impl MessageQueue {
    /// Create a queue owned by `owner` (used in fault logs).
    pub fn new(owner: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            entries: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
        })
    }

    /// The owning module's name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn enqueue(&self, delivery: QueuedDelivery) {
        self.entries.lock().push_back(delivery);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain all entries queued before this call and invoke each
    /// handler in enqueue order. A handler fault is contained and
    /// logged per entry; draining continues. Returns the number of
    /// handlers invoked.
    pub fn process_queue(&self) -> usize {
        // Snapshot swap: concurrent enqueues land in the fresh deque.
        let batch = std::mem::take(&mut *self.entries.lock());
        let mut invoked = 0;

        for entry in batch {
            match entry.subscriber.deliver(entry.message.as_ref()) {
                DeliveryOutcome::Delivered => {
                    invoked += 1;
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::Faulted => {
                    self.handler_faults.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "queue '{}': handler fault contained, continuing drain",
                        self.owner
                    );
                }
                DeliveryOutcome::Skipped => {}
            }
        }
        invoked
    }

    /// Discard all pending entries without invoking any handler.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries pending at call time.
    pub fn queued_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("owner", &self.owner)
            .field("queued", &self.queued_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::communication::{MessageBus, MessageQueue};
    use crate::time::{SimClock, TimestampGenerator};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct Sample(i32);

    fn test_bus() -> MessageBus {
        MessageBus::new(TimestampGenerator::new(SimClock::manual()))
    }

    #[test]
    fn queued_delivery_waits_for_drain() {
        let bus = test_bus();
        let queue = MessageQueue::new("steer");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = bus.subscribe_queued::<Sample, _>("steer", &queue, move |s| {
            seen2.lock().push(s.0);
        });

        bus.publish(Sample(1));
        bus.publish(Sample(2));
        assert!(seen.lock().is_empty());
        assert_eq!(queue.queued_count(), 2);

        assert_eq!(queue.process_queue(), 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(queue.queued_count(), 0);
    }

    #[test]
    fn entries_enqueued_during_drain_wait_for_next_call() {
        let bus = test_bus();
        let queue = MessageQueue::new("reentrant");
        let bus2 = bus.clone();
        let fired = Arc::new(Mutex::new(0));
        let fired2 = fired.clone();
        let _sub = bus.subscribe_queued::<Sample, _>("reentrant", &queue, move |s| {
            *fired2.lock() += 1;
            if s.0 == 0 {
                // Publishing from inside a drain must not recurse.
                bus2.publish(Sample(1));
            }
        });

        bus.publish(Sample(0));
        assert_eq!(queue.process_queue(), 1);
        assert_eq!(*fired.lock(), 1);
        assert_eq!(queue.queued_count(), 1);

        assert_eq!(queue.process_queue(), 1);
        assert_eq!(*fired.lock(), 2);
    }

    #[test]
    fn faulting_entry_does_not_stop_drain() {
        let bus = test_bus();
        let queue = MessageQueue::new("mixed");
        let ok = Arc::new(Mutex::new(0));

        let _bad = bus.subscribe_queued::<Sample, _>("bad", &queue, |s| {
            if s.0 < 0 {
                panic!("bad sample");
            }
        });
        let ok2 = ok.clone();
        let _good = bus.subscribe_queued::<Sample, _>("good", &queue, move |_| {
            *ok2.lock() += 1;
        });

        bus.publish(Sample(-1));
        queue.process_queue();
        assert_eq!(*ok.lock(), 1);
        assert_eq!(queue.metrics().handler_faults, 1);
    }

    #[test]
    fn clear_discards_without_invoking() {
        let bus = test_bus();
        let queue = MessageQueue::new("cleared");
        let fired = Arc::new(Mutex::new(0));
        let fired2 = fired.clone();
        let _sub = bus.subscribe_queued::<Sample, _>("cleared", &queue, move |_| {
            *fired2.lock() += 1;
        });

        bus.publish(Sample(7));
        queue.clear();
        assert_eq!(queue.process_queue(), 0);
        assert_eq!(*fired.lock(), 0);
    }
}

use crate::communication::{MessageBus, MessageQueue, Subscription};
use crate::core::ShutdownToken;
use crate::scheduling::RateScheduler;
use crate::time::SimClock;
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything a module is handed at initialization: the bus, a factory
/// for private queues, the scheduler (if enabled), the authoritative
/// clock, and the process-wide shutdown signal.
///
/// Subscriptions and queues created through the context are owned by
/// it. When the module is unloaded the context is torn down, which
/// disposes every subscription, so nothing published after unload can
/// reach the old instance.
pub struct ModuleContext {
    module_name: String,
    instance_id: String,
    bus: MessageBus,
    scheduler: Option<RateScheduler>,
    clock: SimClock,
    shutdown: ShutdownToken,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    queues: Arc<Mutex<Vec<Arc<MessageQueue>>>>,
}

impl ModuleContext {
    pub(crate) fn new(
        module_name: &str,
        instance_id: &str,
        bus: MessageBus,
        scheduler: Option<RateScheduler>,
        clock: SimClock,
        shutdown: ShutdownToken,
        subscriptions: Arc<Mutex<Vec<Subscription>>>,
        queues: Arc<Mutex<Vec<Arc<MessageQueue>>>>,
    ) -> Self {
        Self {
            module_name: module_name.to_string(),
            instance_id: instance_id.to_string(),
            bus,
            scheduler,
            clock,
            shutdown,
            subscriptions,
            queues,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Fresh uuid per load; changes across hot reloads.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Direct bus access. Subscriptions made here are the caller's to
    /// manage; prefer [`ModuleContext::subscribe`] so teardown is
    /// automatic.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// The scheduler, or `None` when disabled by configuration. Methods
    /// registered directly here run inline on the driver thread and
    /// must never block; the module's own `tick` entry point is the
    /// supervised path.
    pub fn scheduler(&self) -> Option<&RateScheduler> {
        self.scheduler.as_ref()
    }

    /// Monotonic time for durations and timeouts. Wall-clock accessors
    /// on the clock are display-only.
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Cooperative shutdown signal; poll it inside any long-running
    /// work, and use its `wait_timeout` instead of sleeping.
    pub fn shutdown(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// Subscribe an immediate handler; disposed automatically on unload.
    pub fn subscribe<T, F>(&self, priority: i32, handler: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let sub = self.bus.subscribe::<T, F>(&self.module_name, priority, handler);
        self.subscriptions.lock().push(sub);
    }

    /// Subscribe a queued handler bound to one of this module's queues;
    /// disposed automatically on unload.
    pub fn subscribe_queued<T, F>(&self, queue: &Arc<MessageQueue>, handler: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let sub = self
            .bus
            .subscribe_queued::<T, F>(&self.module_name, queue, handler);
        self.subscriptions.lock().push(sub);
    }

    /// Publish shortcut.
    pub fn publish<T: Clone + Send + Sync + 'static>(&self, message: T) {
        self.bus.publish(message);
    }

    /// Create a private deferred-delivery queue owned by this module.
    /// Drain it from the module's own `tick`.
    pub fn create_queue(&self) -> Arc<MessageQueue> {
        let queue = MessageQueue::new(&self.module_name);
        self.queues.lock().push(queue.clone());
        queue
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module_name)
            .field("instance_id", &self.instance_id)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

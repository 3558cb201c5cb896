//! Typed in-process publish/subscribe
//!
//! The [`MessageBus`] is the only way modules talk to each other. It is
//! keyed by the message's static type: `publish` resolves the registry
//! entry for `TypeId::of::<T>()` and walks its subscriber list, handing
//! each immediate handler a borrow of the message, with no per-publish
//! boxing, no serialization. Queued subscribers get an owned copy
//! appended to their module's [`MessageQueue`], drained only on that
//! module's own tick.
//!
//! A panicking handler never poisons a publish: the fault is caught at
//! the subscriber boundary, logged with the subscriber's identity, and
//! delivery continues with the remaining subscribers.

mod bus;
mod queue;

pub use bus::{BusMetrics, MessageBus, Subscription};
pub use queue::{MessageQueue, QueueMetrics};

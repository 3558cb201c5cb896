//! Time bases and timestamping
//!
//! Two kinds of time cross the runtime:
//!
//! - **SimClock**: the authoritative monotonic time base. Every
//!   ordering, duration, and replay comparison uses it. In `system`
//!   mode it advances with a process-wide monotonic epoch; in `manual`
//!   mode it is stepped externally (replay harnesses, tests).
//! - **Wall clock**: advisory, display-only. May jump; never used for
//!   ordering.
//!
//! [`TimestampGenerator`] composes both, plus optional GPS time and
//! per-message-type sequence numbers, into one immutable
//! [`TimestampMetadata`] record attached to every published message.

mod clock;
mod stamp;

pub use clock::SimClock;
pub use stamp::{TimestampGenerator, TimestampMetadata};

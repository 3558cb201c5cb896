//! # FURROW Standard Library
//!
//! Standard message payloads crossing the FURROW bus boundary.
//!
//! ## Structure
//!
//! ```text
//! furrow_library/
//! ── messages/       # Bus payload value types
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use furrow_library::{PositionFix, SteerCommand, SectionCommand, RawFrame, TransportChannel};
//!
//! // Every payload carries the structured TimestampMetadata:
//! let fix = PositionFix::new(52.1234, 5.5678, bus.stamps().stamp::<PositionFix>());
//! bus.publish(fix);
//! ```
//!
//! Payloads are plain value types: the bus borrows them into immediate
//! handlers and clones them once per queued subscriber. Wire
//! encoding/decoding (NMEA, PGN) is the transport collaborator's
//! responsibility, never part of these shapes.

pub mod messages;

// Re-export message types at the crate root for convenience
pub use messages::*;

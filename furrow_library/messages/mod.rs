//! Message types for the FURROW guidance stack
//!
//! This module contains the standardized payloads exchanged between
//! FURROW modules over the message bus.
//!
//! # Message Organization
//!
//! Messages are organized by domain:
//! - Nav: position and orientation fixes (PositionFix, OrientationSample)
//! - Control: actuation commands (SteerCommand, SectionCommand, RelayCommand)
//! - Io: raw transport frames tagged with their channel (RawFrame)
//! - Events: settings-change notifications (SettingsChanged)
//!
//! Every message carries a `stamp: TimestampMetadata`; the structured
//! timestamp is the only form in the system. All message types are
//! re-exported at the crate root for convenience.

pub mod control;
pub mod events;
pub mod io;
pub mod nav;

// Nav
pub use nav::{FixQuality, OrientationSample, PositionFix};

// Control
pub use control::{RelayCommand, SectionCommand, SteerCommand};

// Io
pub use io::{FrameDirection, RawFrame, TransportChannel};

// Events
pub use events::SettingsChanged;

//! # FURROW Core
//!
//! The core runtime for the FURROW agricultural guidance stack.
//!
//! FURROW is a microkernel for real-time field guidance and control:
//! independent modules exchange typed messages over an in-process bus
//! and are driven by a deterministic rate scheduler instead of
//! free-running loops, so control-loop timing, replay, and failure
//! isolation stay reproducible. This crate provides the substrate:
//!
//! - **Communication**: typed publish/subscribe with priority and
//!   deferred delivery, plus a last-value cache
//! - **Scheduling**: divisor-based, drift-free rate scheduling over one
//!   global tick clock
//! - **Core**: the module contract, per-module worker isolation,
//!   deadline-supervised lifecycle, watchdog, and hot reload
//! - **Time**: the authoritative SimClock and sequence-stamped
//!   timestamps on every message
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use furrow_core::{Module, ModuleCategory, ModuleContext, Runtime, RuntimeConfig};
//!
//! struct GpsReceiver;
//!
//! impl Module for GpsReceiver {
//!     fn name(&self) -> &str { "gps_receiver" }
//!     fn category(&self) -> ModuleCategory { ModuleCategory::Io }
//!     fn init(&mut self, ctx: &mut ModuleContext) -> furrow_core::FurrowResult<()> {
//!         Ok(())
//!     }
//!     fn tick_rate_hz(&self) -> Option<f64> { Some(10.0) }
//!     fn tick(&mut self, _tick: u64, _now_ms: f64) {
//!         // read hardware, ctx-held publishers fire here
//!     }
//! }
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! runtime.register(|| Box::new(GpsReceiver))?;
//! runtime.start()?;
//! ```

pub mod communication;
pub mod config;
pub mod core;
pub mod error;
pub mod runtime;
pub mod scheduling;
pub mod time;

// Re-export commonly used types for easy access
pub use communication::{BusMetrics, MessageBus, MessageQueue, Subscription};
pub use config::{LifecycleSettings, RuntimeConfig, SchedulerSettings};
pub use core::{
    LifecycleEventKind, LoadReport, Module, ModuleCategory, ModuleContext, ModuleHealth,
    ModuleLifecycleEvent, ModuleState, ModuleStatus, ModuleSupervisor, ShutdownToken,
};
pub use error::{FurrowError, FurrowResult};
pub use runtime::Runtime;
pub use scheduling::{RateScheduler, ScheduleHandle, SchedulerStatistics, TickInfo};
pub use time::{SimClock, TimestampGenerator, TimestampMetadata};

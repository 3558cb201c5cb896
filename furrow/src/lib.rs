//! # FURROW - Field Unit Runtime for Real-time Operations Workloads
//!
//! FURROW is a microkernel runtime for agricultural guidance and
//! control stacks: independent modules exchange typed messages over an
//! in-process bus and run under a deterministic rate scheduler, with
//! per-module fault isolation and hot reload.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use furrow::prelude::*;
//! use furrow::library::messages::nav::PositionFix;
//!
//! struct Guidance;
//!
//! impl Module for Guidance {
//!     fn name(&self) -> &str { "guidance" }
//!     fn category(&self) -> ModuleCategory { ModuleCategory::Control }
//!     fn dependencies(&self) -> Vec<String> { vec!["gps_receiver".into()] }
//!
//!     fn init(&mut self, ctx: &mut ModuleContext) -> Result<()> {
//!         ctx.subscribe::<PositionFix, _>(0, |fix| {
//!             // compute cross-track error from the fix
//!         });
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Typed zero-copy messaging** with priority and deferred delivery
//! - **Drift-free divisor scheduling** on one global tick clock
//! - **Per-module worker isolation** with deadlines, watchdog, and hot reload
//! - **Deterministic timestamps** correlated across sim, wall, and GPS time

// Re-export core components (avoiding conflicts)
pub use furrow_core::{self, *};

// Re-export standard library with alias
pub use furrow_library as library;

/// The FURROW prelude - everything you need to get started
pub mod prelude {
    // Module contract
    pub use furrow_core::core::{
        Module, ModuleCategory, ModuleContext, ModuleHealth, ModuleState,
    };

    // Communication types
    pub use furrow_core::communication::{MessageBus, MessageQueue, Subscription};

    // Scheduling
    pub use furrow_core::scheduling::{RateScheduler, TickInfo};

    // Runtime assembly
    pub use furrow_core::config::RuntimeConfig;
    pub use furrow_core::runtime::Runtime;
    pub use furrow_core::time::{SimClock, TimestampGenerator, TimestampMetadata};

    // Error types
    pub use furrow_core::error::{FurrowError, FurrowResult};
    pub type Result<T> = FurrowResult<T>;

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};

    // Common traits
    pub use serde::{Deserialize, Serialize};

    // Re-export anyhow for error handling
    pub use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};

    // Re-export all message types from furrow_library for convenience
    pub use furrow_library::messages::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get FURROW version
pub fn version() -> &'static str {
    VERSION
}

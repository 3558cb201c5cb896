//! Tick-driven rate scheduling
//!
//! One global tick counter advances at the base rate; every registered
//! method runs at an integer divisor of it. Requested rates are rounded
//! to the nearest achievable divisor, which trades rate precision for
//! phase determinism: method firing is a pure function of the tick
//! number, so there is no cumulative drift no matter how many methods
//! are registered, and pause/resume never shifts phase.

mod scheduler;

pub use scheduler::{
    MethodStatistics, ModuleRollup, RateScheduler, ScheduleHandle, SchedulerStatistics,
    TickExecutor, TickInfo, TickJob,
};

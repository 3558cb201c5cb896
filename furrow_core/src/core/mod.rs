//! Module contract, per-module isolation, and supervision
//!
//! Every processing unit implements [`Module`] and is registered with
//! the [`ModuleSupervisor`] through a factory. Each loaded instance
//! lives on its own worker thread; the supervisor talks to it only over
//! channels, enforces deadlines on every lifecycle transition, and a
//! watchdog samples liveness so a hung module is contained instead of
//! stalling the stack.

mod context;
mod module;
mod shutdown;
mod supervisor;
mod watchdog;
mod worker;

pub use context::ModuleContext;
pub use module::{
    LifecycleEventKind, Module, ModuleCategory, ModuleHealth, ModuleLifecycleEvent, ModuleState,
};
pub use shutdown::ShutdownToken;
pub use supervisor::{LoadReport, ModuleStatus, ModuleSupervisor};

use crate::core::ModuleContext;
use crate::error::FurrowResult;
use crate::time::TimestampMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states for supervision and monitoring.
///
/// Normal flow: `Unloaded → Initializing → Initialized → Starting →
/// Running → Stopping → Stopped → Unloaded`. `Faulted` is terminal and
/// reachable from any state on timeout, crash, or hang.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModuleState {
    Unloaded,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted(String),
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Unloaded => write!(f, "Unloaded"),
            ModuleState::Initializing => write!(f, "Initializing"),
            ModuleState::Initialized => write!(f, "Initialized"),
            ModuleState::Starting => write!(f, "Starting"),
            ModuleState::Running => write!(f, "Running"),
            ModuleState::Stopping => write!(f, "Stopping"),
            ModuleState::Stopped => write!(f, "Stopped"),
            ModuleState::Faulted(msg) => write!(f, "Faulted: {}", msg),
        }
    }
}

/// Module health as reported by the module and observed by the
/// supervisor. Queryable at any time; reflects the worst unresolved
/// fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl ModuleHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Degraded => "Degraded",
            Self::Unhealthy => "Unhealthy",
            Self::Unknown => "Unknown",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Degraded => 2,
            Self::Unhealthy => 3,
        }
    }

    /// The worse of two health readings.
    pub fn worst(self, other: ModuleHealth) -> ModuleHealth {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ModuleHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Load-order tier for a module. I/O modules load first, then data
/// processing, control, and finally the observer tiers; unload runs in
/// reverse. Within a tier, declared dependencies refine the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleCategory {
    Io,
    DataProcessing,
    Control,
    Visualization,
    Logging,
    Monitoring,
}

impl ModuleCategory {
    /// The default tier sequence, earliest-loading first.
    pub fn default_order() -> [ModuleCategory; 6] {
        [
            ModuleCategory::Io,
            ModuleCategory::DataProcessing,
            ModuleCategory::Control,
            ModuleCategory::Visualization,
            ModuleCategory::Logging,
            ModuleCategory::Monitoring,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::DataProcessing => "data-processing",
            Self::Control => "control",
            Self::Visualization => "visualization",
            Self::Logging => "logging",
            Self::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The contract every processing unit implements.
///
/// Modules never see each other directly: everything they need arrives
/// through the [`ModuleContext`] at `init`, and everything they produce
/// leaves through the bus. Lifecycle entry points run on the module's
/// own worker thread under a supervision deadline; a panic anywhere in
/// them is contained at the module boundary.
pub trait Module: Send {
    /// Unique module name; also used as the dependency key.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Load-order tier.
    fn category(&self) -> ModuleCategory;

    /// Names of modules that must be loaded before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Wire bus subscriptions, create queues, and claim resources.
    fn init(&mut self, ctx: &mut ModuleContext) -> FurrowResult<()>;

    /// Begin producing. Called after every module initialized.
    fn start(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
        Ok(())
    }

    /// Stop producing, keep resources.
    fn stop(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
        Ok(())
    }

    /// Release everything. Last call before the instance is dropped.
    fn shutdown(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
        Ok(())
    }

    /// Self-reported health. The supervisor combines this with its own
    /// observations (timeouts, panics, hangs).
    fn health(&self) -> ModuleHealth {
        ModuleHealth::Healthy
    }

    /// Desired scheduled tick rate. `None` means the module is purely
    /// event-driven.
    fn tick_rate_hz(&self) -> Option<f64> {
        None
    }

    /// Scheduled entry point, invoked on this module's worker at the
    /// nearest achievable divisor of the scheduler base rate. Most
    /// modules drain their queues here.
    fn tick(&mut self, _tick: u64, _now_ms: f64) {}
}

/// What happened to a module, announced on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    Loaded,
    Unloaded,
    Reloaded,
}

/// Published by the supervisor after each completed load, unload, or
/// reload, so observer modules can react without polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleLifecycleEvent {
    pub kind: LifecycleEventKind,
    /// Instance id (fresh uuid per load).
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub stamp: TimestampMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_worst_picks_higher_severity() {
        use ModuleHealth::*;
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Unhealthy.worst(Degraded), Unhealthy);
        assert_eq!(Healthy.worst(Unknown), Unknown);
        assert_eq!(Degraded.worst(Unknown), Degraded);
    }

    #[test]
    fn default_order_puts_io_first_and_observers_last() {
        let order = ModuleCategory::default_order();
        assert_eq!(order[0], ModuleCategory::Io);
        assert_eq!(order[2], ModuleCategory::Control);
        assert_eq!(order[5], ModuleCategory::Monitoring);
    }
}

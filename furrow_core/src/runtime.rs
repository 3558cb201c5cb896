use crate::communication::MessageBus;
use crate::config::RuntimeConfig;
use crate::core::{LoadReport, ModuleHealth, ModuleSupervisor, ShutdownToken};
use crate::error::FurrowResult;
use crate::scheduling::{RateScheduler, SchedulerStatistics};
use crate::time::{SimClock, TimestampGenerator};
use std::time::Duration;

/// The assembled microkernel: clock, bus, scheduler, and supervisor
/// wired together from one validated [`RuntimeConfig`].
///
/// # Example
/// ```rust,ignore
/// let runtime = Runtime::new(RuntimeConfig::default())?;
/// runtime.register(|| Box::new(GpsReceiver::new()))?;
/// runtime.register(|| Box::new(SteerController::new()))?;
/// let report = runtime.start()?;
/// assert!(report.all_succeeded());
/// runtime.run_until_shutdown()?;
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    clock: SimClock,
    bus: MessageBus,
    scheduler: Option<RateScheduler>,
    supervisor: ModuleSupervisor,
    shutdown: ShutdownToken,
}

impl Runtime {
    /// Build a runtime on the system monotonic clock.
    pub fn new(config: RuntimeConfig) -> FurrowResult<Self> {
        Self::with_clock(config, SimClock::system())
    }

    /// Build a runtime on an explicit clock. Pass a manual clock for
    /// replay or deterministic testing.
    pub fn with_clock(config: RuntimeConfig, clock: SimClock) -> FurrowResult<Self> {
        config.validate()?;

        let bus = MessageBus::new(TimestampGenerator::new(clock.clone()));
        let scheduler = config
            .scheduler
            .enabled
            .then(|| RateScheduler::new(config.scheduler.base_rate_hz, clock.clone()));
        let shutdown = ShutdownToken::new();
        let supervisor = ModuleSupervisor::new(
            &config,
            bus.clone(),
            scheduler.clone(),
            clock.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            config,
            clock,
            bus,
            scheduler,
            supervisor,
            shutdown,
        })
    }

    /// Register a module factory with the supervisor.
    pub fn register<F>(&self, factory: F) -> FurrowResult<()>
    where
        F: Fn() -> Box<dyn crate::core::Module> + Send + Sync + 'static,
    {
        self.supervisor.register(factory)
    }

    /// Load and start every registered module in dependency order, then
    /// begin the tick driver and watchdog. Per-module failures come
    /// back in the report; the rest of the system runs.
    pub fn start(&self) -> FurrowResult<LoadReport> {
        let mut report = self.supervisor.load_all();
        let started = self.supervisor.start_all();
        report.failed.extend(started.failed);
        report.succeeded.retain(|name| started.succeeded.contains(name));

        if let Some(scheduler) = &self.scheduler {
            scheduler.spawn_driver(self.shutdown.clone())?;
        }
        self.supervisor.start_watchdog();
        Ok(report)
    }

    /// Block until the shutdown signal fires (installing a Ctrl-C
    /// handler), then tear everything down in order.
    pub fn run_until_shutdown(&self) -> FurrowResult<()> {
        self.shutdown.install_ctrlc_handler()?;
        while !self.shutdown.wait_timeout(Duration::from_millis(100)) {}
        self.stop();
        Ok(())
    }

    /// Trigger shutdown and tear down: stop modules in reverse order,
    /// unload them, join the driver and watchdog.
    pub fn stop(&self) {
        self.shutdown.trigger();
        self.supervisor.stop_all();
        self.supervisor.unload_all();
        if let Some(scheduler) = &self.scheduler {
            scheduler.join_driver();
        }
        self.supervisor.stop_watchdog();
        log::info!("runtime stopped");
    }

    /// Scheduler statistics, `None` when the scheduler is disabled.
    pub fn statistics(&self) -> Option<SchedulerStatistics> {
        self.scheduler.as_ref().map(|s| s.statistics())
    }

    /// Worst health across all registered modules.
    pub fn health_rollup(&self) -> ModuleHealth {
        self.supervisor
            .statuses()
            .iter()
            .fold(ModuleHealth::Healthy, |acc, status| acc.worst(status.health))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn scheduler(&self) -> Option<&RateScheduler> {
        self.scheduler.as_ref()
    }

    pub fn supervisor(&self) -> &ModuleSupervisor {
        &self.supervisor
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler_enabled", &self.scheduler.is_some())
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}

use crate::communication::{MessageBus, MessageQueue, Subscription};
use crate::config::{LifecycleSettings, RuntimeConfig};
use crate::core::module::{
    LifecycleEventKind, Module, ModuleCategory, ModuleHealth, ModuleLifecycleEvent, ModuleState,
};
use crate::core::worker::{spawn_worker, LifecyclePhase, WorkerHandle};
use crate::core::{ModuleContext, ShutdownToken};
use crate::error::{FurrowError, FurrowResult};
use crate::scheduling::{RateScheduler, ScheduleHandle, TickExecutor};
use crate::time::SimClock;
use colored::Colorize;
use crossbeam::channel::RecvTimeoutError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Live resources of one loaded module instance.
struct LoadedModule {
    worker: Arc<WorkerHandle>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    queues: Arc<Mutex<Vec<Arc<MessageQueue>>>>,
    schedule: Option<ScheduleHandle>,
    instance_id: String,
}

/// One registered module: static metadata plus current instance.
pub(crate) struct ModuleSlot {
    name: String,
    version: String,
    category: ModuleCategory,
    dependencies: Vec<String>,
    tick_rate_hz: Option<f64>,
    factory: ModuleFactory,
    // Instance constructed at registration, consumed by the first load.
    pending: Mutex<Option<Box<dyn Module>>>,
    state: Mutex<ModuleState>,
    loaded: Mutex<Option<LoadedModule>>,
}

impl ModuleSlot {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> ModuleState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.lock() = state;
    }

    pub(crate) fn loaded_instance_id(&self) -> Option<String> {
        self.loaded.lock().as_ref().map(|l| l.instance_id.clone())
    }

    pub(crate) fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("module '{}' faulted: {}", self.name, reason);
        self.set_state(ModuleState::Faulted(reason));
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    pub(crate) fn worker(&self) -> Option<Arc<WorkerHandle>> {
        self.loaded.lock().as_ref().map(|l| l.worker.clone())
    }
}

/// Status line for one module, as reported by [`ModuleSupervisor::statuses`].
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub version: String,
    pub category: ModuleCategory,
    pub state: ModuleState,
    pub health: ModuleHealth,
    /// Completed scheduled ticks of the current instance.
    pub ticks: u64,
}

/// Outcome of a bulk load/start pass: per-module errors never abort the
/// remaining modules.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, FurrowError)>,
}

impl LoadReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) struct SupervisorShared {
    slots: RwLock<Vec<Arc<ModuleSlot>>>,
    bus: MessageBus,
    scheduler: Option<RateScheduler>,
    clock: SimClock,
    shutdown: ShutdownToken,
    pub(crate) settings: LifecycleSettings,
    config: RuntimeConfig,
}

impl SupervisorShared {
    pub(crate) fn slots_snapshot(&self) -> Vec<Arc<ModuleSlot>> {
        self.slots.read().clone()
    }

    pub(crate) fn shutdown(&self) -> &ShutdownToken {
        &self.shutdown
    }

    pub(crate) fn publish_lifecycle(
        &self,
        kind: LifecycleEventKind,
        slot: &ModuleSlot,
        instance_id: &str,
    ) {
        let event = ModuleLifecycleEvent {
            kind,
            module_id: instance_id.to_string(),
            name: slot.name.clone(),
            version: slot.version.clone(),
            stamp: self.bus.stamps().stamp::<ModuleLifecycleEvent>(),
        };
        self.bus.publish(event);
    }

    /// Release a loaded module's resources. `forced` skips the blocking
    /// in-flight-call wait on subscriptions (used for hung modules).
    pub(crate) fn teardown(&self, slot: &ModuleSlot, forced: bool) {
        let Some(loaded) = slot.loaded.lock().take() else {
            return;
        };
        // Unschedule first so no further ticks are dispatched.
        drop(loaded.schedule);

        {
            let subscriptions = loaded.subscriptions.lock();
            for subscription in subscriptions.iter() {
                if forced {
                    subscription.revoke();
                } else {
                    subscription.dispose();
                }
            }
        }
        for queue in loaded.queues.lock().iter() {
            queue.clear();
        }

        loaded.worker.request_exit();
        if !forced {
            loaded
                .worker
                .join(self.settings.lifecycle_timeout(), Duration::from_millis(10));
        }
    }
}

/// The module lifecycle & isolation layer.
///
/// Resolves dependency order, drives every module through its state
/// machine under deadlines, contains panics and hangs per module, and
/// supports hot reload, all without one faulty module stalling the
/// rest.
pub struct ModuleSupervisor {
    shared: Arc<SupervisorShared>,
    watchdog: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ModuleSupervisor {
    pub fn new(
        config: &RuntimeConfig,
        bus: MessageBus,
        scheduler: Option<RateScheduler>,
        clock: SimClock,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                slots: RwLock::new(Vec::new()),
                bus,
                scheduler,
                clock,
                shutdown,
                settings: config.lifecycle.clone(),
                config: config.clone(),
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Register a module factory. The factory is invoked once now (the
    /// instance is kept for the first load) and once per hot reload.
    pub fn register<F>(&self, factory: F) -> FurrowResult<()>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let probe = factory();
        let name = probe.name().to_string();
        if name.is_empty() {
            return Err(FurrowError::invalid_input("module name must not be empty"));
        }
        {
            let slots = self.shared.slots.read();
            if slots.iter().any(|s| s.name == name) {
                return Err(FurrowError::AlreadyExists(format!("module '{name}'")));
            }
        }

        let slot = Arc::new(ModuleSlot {
            name: name.clone(),
            version: probe.version().to_string(),
            category: probe.category(),
            dependencies: probe.dependencies(),
            tick_rate_hz: probe.tick_rate_hz(),
            factory: Box::new(factory),
            pending: Mutex::new(Some(probe)),
            state: Mutex::new(ModuleState::Unloaded),
            loaded: Mutex::new(None),
        });
        self.shared.slots.write().push(slot);
        log::debug!("registered module '{name}'");
        Ok(())
    }

    /// Resolve the load order: modules sorted by category tier, refined
    /// by dependency edges. Modules with missing or cyclic dependencies
    /// come back in the failure list, never as a loader crash.
    fn resolve_order(&self) -> (Vec<Arc<ModuleSlot>>, Vec<(String, FurrowError)>) {
        let slots = self.shared.slots_snapshot();
        let index: HashMap<&str, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut failures = Vec::new();
        let mut excluded = vec![false; slots.len()];
        let mut indegree = vec![0usize; slots.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];

        for (i, slot) in slots.iter().enumerate() {
            for dep in &slot.dependencies {
                match index.get(dep.as_str()) {
                    Some(&d) => {
                        indegree[i] += 1;
                        dependents[d].push(i);
                    }
                    None => {
                        failures.push((
                            slot.name.clone(),
                            FurrowError::MissingDependency {
                                module: slot.name.clone(),
                                dependency: dep.clone(),
                            },
                        ));
                        excluded[i] = true;
                    }
                }
            }
        }

        // Kahn's algorithm; ready set ordered by (tier, registration).
        let mut ordered = Vec::new();
        let mut placed = vec![false; slots.len()];
        loop {
            let next = (0..slots.len())
                .filter(|&i| !placed[i] && !excluded[i] && indegree[i] == 0)
                .min_by_key(|&i| (self.shared.config.tier_of(slots[i].category), i));
            let Some(i) = next else { break };
            placed[i] = true;
            ordered.push(slots[i].clone());
            for &d in &dependents[i] {
                indegree[d] = indegree[d].saturating_sub(1);
            }
        }

        // Anything left depends (transitively) on an excluded module or
        // sits in a cycle.
        let leftovers: Vec<usize> = (0..slots.len())
            .filter(|&i| !placed[i] && !excluded[i])
            .collect();
        if !leftovers.is_empty() {
            let names: Vec<String> = leftovers.iter().map(|&i| slots[i].name.clone()).collect();
            for &i in &leftovers {
                let blocked_by_excluded = slots[i]
                    .dependencies
                    .iter()
                    .any(|d| index.get(d.as_str()).is_some_and(|&j| excluded[j]));
                let error = if blocked_by_excluded {
                    FurrowError::module(
                        slots[i].name.clone(),
                        "a transitive dependency failed to resolve",
                    )
                } else {
                    FurrowError::DependencyCycle(names.clone())
                };
                failures.push((slots[i].name.clone(), error));
            }
        }

        (ordered, failures)
    }

    /// Load every registered module in dependency order. Per-module
    /// failures are reported and do not stop the rest.
    pub fn load_all(&self) -> LoadReport {
        let (ordered, failures) = self.resolve_order();
        let mut report = LoadReport::default();
        for (name, error) in failures {
            if let Some(slot) = self.find(&name) {
                slot.fault(error.to_string());
            }
            report.failed.push((name, error));
        }

        for slot in ordered {
            // A dependency that failed above takes its dependents down
            // with a load error, not a hang.
            let unmet: Vec<&String> = slot
                .dependencies
                .iter()
                .filter(|d| self.find(d).map(|s| !s.is_loaded()).unwrap_or(true))
                .collect();
            if !unmet.is_empty() {
                let error = FurrowError::module(
                    slot.name.clone(),
                    format!("dependencies failed to load: {unmet:?}"),
                );
                slot.fault(error.to_string());
                report.failed.push((slot.name.clone(), error));
                continue;
            }

            match self.load_slot(&slot, true) {
                Ok(()) => report.succeeded.push(slot.name.clone()),
                Err(error) => report.failed.push((slot.name.clone(), error)),
            }
        }
        report
    }

    fn load_slot(&self, slot: &Arc<ModuleSlot>, announce: bool) -> FurrowResult<()> {
        if slot.is_loaded() {
            return Err(FurrowError::AlreadyExists(format!(
                "module '{}' is already loaded",
                slot.name
            )));
        }

        let instance = slot
            .pending
            .lock()
            .take()
            .unwrap_or_else(|| (slot.factory)());
        let instance_id = uuid::Uuid::new_v4().to_string();
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let queues = Arc::new(Mutex::new(Vec::new()));
        let scheduler = self
            .shared
            .scheduler
            .as_ref()
            .filter(|_| self.shared.config.scheduler.enabled)
            .cloned();
        let context = ModuleContext::new(
            &slot.name,
            &instance_id,
            self.shared.bus.clone(),
            scheduler,
            self.shared.clock.clone(),
            self.shared.shutdown.clone(),
            subscriptions.clone(),
            queues.clone(),
        );

        slot.set_state(ModuleState::Initializing);
        let worker = spawn_worker(instance, context)?;

        let deadline = self.shared.settings.lifecycle_timeout();
        match worker.request_lifecycle(LifecyclePhase::Init).recv_timeout(deadline) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                slot.fault(format!("init failed: {error}"));
                for subscription in subscriptions.lock().iter() {
                    subscription.revoke();
                }
                worker.request_exit();
                worker.join(Duration::from_millis(250), Duration::from_millis(10));
                return Err(error);
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                slot.fault(format!("init exceeded {deadline:?} deadline"));
                // The worker may be hung inside init: revoke what it
                // wired so far and abandon the thread.
                for subscription in subscriptions.lock().iter() {
                    subscription.revoke();
                }
                worker.request_exit();
                return Err(FurrowError::timeout(format!(
                    "module '{}' init exceeded {deadline:?}",
                    slot.name
                )));
            }
        }
        slot.set_state(ModuleState::Initialized);

        let schedule = match (&self.shared.scheduler, slot.tick_rate_hz) {
            (Some(scheduler), Some(rate)) if self.shared.config.scheduler.enabled => {
                let executor: Arc<dyn TickExecutor> = worker.clone();
                match scheduler.register_on(&format!("{}.tick", slot.name), &slot.name, rate, executor)
                {
                    Ok(handle) => Some(handle),
                    Err(error) => {
                        slot.fault(format!("tick registration failed: {error}"));
                        for subscription in subscriptions.lock().iter() {
                            subscription.revoke();
                        }
                        worker.request_exit();
                        worker.join(Duration::from_millis(250), Duration::from_millis(10));
                        return Err(error);
                    }
                }
            }
            _ => None,
        };

        *slot.loaded.lock() = Some(LoadedModule {
            worker,
            subscriptions,
            queues,
            schedule,
            instance_id: instance_id.clone(),
        });

        println!(
            "{} module '{}' v{} ({})",
            "Loaded".green(),
            slot.name,
            slot.version,
            slot.category
        );
        if announce {
            self.shared
                .publish_lifecycle(LifecycleEventKind::Loaded, slot, &instance_id);
        }
        Ok(())
    }

    /// Run one lifecycle phase under the configured deadline.
    fn run_phase(
        &self,
        slot: &Arc<ModuleSlot>,
        phase: LifecyclePhase,
        entering: ModuleState,
        success: ModuleState,
    ) -> FurrowResult<()> {
        let Some(worker) = slot.worker() else {
            return Err(FurrowError::NotFound(format!(
                "module '{}' is not loaded",
                slot.name
            )));
        };

        slot.set_state(entering);
        let deadline = self.shared.settings.lifecycle_timeout();
        match worker.request_lifecycle(phase).recv_timeout(deadline) {
            Ok(Ok(())) => {
                slot.set_state(success);
                Ok(())
            }
            Ok(Err(error)) => {
                slot.fault(format!("{} failed: {error}", phase.as_str()));
                Err(error)
            }
            Err(_) => {
                slot.fault(format!("{} exceeded {deadline:?} deadline", phase.as_str()));
                Err(FurrowError::timeout(format!(
                    "module '{}' {} exceeded {deadline:?}",
                    slot.name,
                    phase.as_str()
                )))
            }
        }
    }

    /// Start every initialized module, in load order.
    pub fn start_all(&self) -> LoadReport {
        let (ordered, _) = self.resolve_order();
        let mut report = LoadReport::default();
        for slot in ordered {
            if slot.state() != ModuleState::Initialized {
                continue;
            }
            match self.run_phase(&slot, LifecyclePhase::Start, ModuleState::Starting, ModuleState::Running) {
                Ok(()) => report.succeeded.push(slot.name.clone()),
                Err(error) => report.failed.push((slot.name.clone(), error)),
            }
        }
        report
    }

    /// Stop every running module, in reverse load order.
    pub fn stop_all(&self) {
        let (ordered, _) = self.resolve_order();
        for slot in ordered.iter().rev() {
            if slot.state() == ModuleState::Running {
                let _ = self.run_phase(
                    slot,
                    LifecyclePhase::Stop,
                    ModuleState::Stopping,
                    ModuleState::Stopped,
                );
            }
        }
    }

    /// Unload one module. Refused while any loaded module still
    /// declares a dependency on it.
    pub fn unload(&self, name: &str) -> FurrowResult<()> {
        let slot = self
            .find(name)
            .ok_or_else(|| FurrowError::NotFound(format!("module '{name}'")))?;
        if !slot.is_loaded() {
            return Err(FurrowError::NotFound(format!(
                "module '{name}' is not loaded"
            )));
        }

        let dependents: Vec<String> = self
            .shared
            .slots_snapshot()
            .iter()
            .filter(|s| s.is_loaded() && s.dependencies.iter().any(|d| d == name))
            .map(|s| s.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(FurrowError::DependentsLoaded {
                module: name.to_string(),
                dependents,
            });
        }

        let faulted = matches!(slot.state(), ModuleState::Faulted(_));
        if !faulted {
            if slot.state() == ModuleState::Running {
                let _ = self.run_phase(
                    &slot,
                    LifecyclePhase::Stop,
                    ModuleState::Stopping,
                    ModuleState::Stopped,
                );
            }
            let _ = self.run_phase(
                &slot,
                LifecyclePhase::Shutdown,
                ModuleState::Stopping,
                ModuleState::Stopped,
            );
        }

        let instance_id = slot
            .loaded
            .lock()
            .as_ref()
            .map(|l| l.instance_id.clone())
            .unwrap_or_default();
        // A faulted module may be hung mid-call: don't wait on it.
        self.shared.teardown(&slot, faulted || matches!(slot.state(), ModuleState::Faulted(_)));
        slot.set_state(ModuleState::Unloaded);

        println!("{} module '{}'", "Unloaded".yellow(), slot.name);
        self.shared
            .publish_lifecycle(LifecycleEventKind::Unloaded, &slot, &instance_id);
        Ok(())
    }

    /// Unload every loaded module in reverse load order, so dependents
    /// go before their dependencies. Per-module failures are logged and
    /// do not stop the sweep.
    pub fn unload_all(&self) {
        let (ordered, _) = self.resolve_order();
        for slot in ordered.iter().rev() {
            if slot.is_loaded() {
                if let Err(error) = self.unload(&slot.name) {
                    log::warn!("unload of '{}' failed: {error}", slot.name);
                }
            }
        }
    }

    /// Hot reload: unload (dependency-refusal rule applies), construct
    /// a fresh instance from the factory, re-run init (and start, if
    /// the module was running). Other modules keep operating throughout.
    pub fn reload(&self, name: &str) -> FurrowResult<()> {
        let slot = self
            .find(name)
            .ok_or_else(|| FurrowError::NotFound(format!("module '{name}'")))?;
        let was_running = slot.state() == ModuleState::Running;

        self.unload(name)?;
        self.load_slot(&slot, false)?;
        if was_running {
            self.run_phase(
                &slot,
                LifecyclePhase::Start,
                ModuleState::Starting,
                ModuleState::Running,
            )?;
        }

        let instance_id = slot
            .loaded
            .lock()
            .as_ref()
            .map(|l| l.instance_id.clone())
            .unwrap_or_default();
        println!("{} module '{}'", "Reloaded".green(), slot.name);
        self.shared
            .publish_lifecycle(LifecycleEventKind::Reloaded, &slot, &instance_id);
        Ok(())
    }

    /// Effective health: the module's self-report combined with what
    /// the supervisor has observed (faults, panics, hangs).
    pub fn health(&self, name: &str) -> FurrowResult<ModuleHealth> {
        let slot = self
            .find(name)
            .ok_or_else(|| FurrowError::NotFound(format!("module '{name}'")))?;

        let observed = match slot.state() {
            ModuleState::Faulted(_) => ModuleHealth::Unhealthy,
            ModuleState::Unloaded => ModuleHealth::Unknown,
            _ => ModuleHealth::Healthy,
        };
        let Some(worker) = slot.worker() else {
            return Ok(observed);
        };
        let mut health = observed.worst(worker.query_health(Duration::from_millis(200)));
        if worker.progress().panic_count() > 0 {
            health = health.worst(ModuleHealth::Degraded);
        }
        Ok(health)
    }

    /// Status snapshot of every registered module.
    pub fn statuses(&self) -> Vec<ModuleStatus> {
        self.shared
            .slots_snapshot()
            .iter()
            .map(|slot| ModuleStatus {
                name: slot.name.clone(),
                version: slot.version.clone(),
                category: slot.category,
                state: slot.state(),
                health: self.health(&slot.name).unwrap_or(ModuleHealth::Unknown),
                ticks: slot
                    .worker()
                    .map(|w| w.progress().tick_count())
                    .unwrap_or(0),
            })
            .collect()
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.find(name).map(|slot| slot.state())
    }

    /// Begin watchdog liveness sampling (no-op when disabled).
    pub fn start_watchdog(&self) {
        if !self.shared.settings.watchdog_enabled {
            return;
        }
        let mut guard = self.watchdog.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(crate::core::watchdog::spawn_watchdog(self.shared.clone()));
    }

    /// Join the watchdog after shutdown has been triggered.
    pub fn stop_watchdog(&self) {
        if let Some(handle) = self.watchdog.lock().take() {
            let _ = handle.join();
        }
    }

    fn find(&self, name: &str) -> Option<Arc<ModuleSlot>> {
        self.shared.slots.read().iter().find(|s| s.name == name).cloned()
    }
}

impl std::fmt::Debug for ModuleSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSupervisor")
            .field("modules", &self.shared.slots.read().len())
            .finish()
    }
}

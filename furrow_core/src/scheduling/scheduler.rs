use crate::core::ShutdownToken;
use crate::error::{FurrowError, FurrowResult};
use crate::time::SimClock;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What a scheduled method receives on every invocation.
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Global tick number at which the method fired.
    pub tick: u64,
    /// Simulated-clock milliseconds at dispatch.
    pub sim_time_ms: f64,
}

/// Execution context seam for worker-dispatched methods.
///
/// The per-module worker implements this; the driver thread calls
/// `submit` and never waits; a rejected submission (worker still busy)
/// is counted as a skipped dispatch against the method.
pub trait TickExecutor: Send + Sync {
    fn submit(&self, job: TickJob) -> bool;
}

/// A due invocation handed to a [`TickExecutor`]. The executor calls
/// [`TickJob::execute`] with the actual work; timing, statistics, and
/// panic containment are handled here so every execution path reports
/// identically.
pub struct TickJob {
    info: TickInfo,
    record: Arc<MethodRecord>,
}

impl TickJob {
    pub fn info(&self) -> TickInfo {
        self.info
    }

    /// The registered method name, for worker-side logging.
    pub fn method_name(&self) -> &str {
        &self.record.name
    }

    /// Run the work, record its execution time, and contain a panic.
    /// Returns `false` if the work panicked.
    pub fn execute<F: FnOnce(TickInfo)>(self, work: F) -> bool {
        if !self.record.active.load(Ordering::Acquire) {
            return true;
        }
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| work(self.info)));
        self.record.record_execution(start.elapsed());
        match result {
            Ok(()) => true,
            Err(_) => {
                log::error!(
                    "scheduled method '{}' panicked at tick {}",
                    self.record.name,
                    self.info.tick
                );
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct MethodStats {
    calls: u64,
    total_us: u64,
    max_us: u64,
    last_us: u64,
}

enum Target {
    Inline(Mutex<Box<dyn FnMut(TickInfo) + Send>>),
    Executor(Arc<dyn TickExecutor>),
}

struct MethodRecord {
    name: String,
    owner: Option<String>,
    requested_hz: f64,
    divisor: u64,
    actual_hz: f64,
    paused: AtomicBool,
    active: AtomicBool,
    stats: Mutex<MethodStats>,
    skipped_dispatches: AtomicU64,
    target: Target,
    // Shared with the scheduler: execution time accumulated against the
    // current tick's budget, whichever thread the work ran on.
    tick_busy_us: Arc<AtomicU64>,
}

impl MethodRecord {
    fn record_execution(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.tick_busy_us.fetch_add(us, Ordering::Relaxed);
        let mut stats = self.stats.lock();
        stats.calls += 1;
        stats.total_us += us;
        stats.last_us = us;
        if us > stats.max_us {
            stats.max_us = us;
        }
    }
}

/// Per-method statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MethodStatistics {
    pub name: String,
    pub owner: Option<String>,
    pub requested_hz: f64,
    pub actual_hz: f64,
    pub divisor: u64,
    pub paused: bool,
    pub calls: u64,
    pub avg_us: f64,
    pub max_us: u64,
    pub last_us: u64,
    pub skipped_dispatches: u64,
}

/// Per-module aggregate across its scheduled methods
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRollup {
    pub module: String,
    pub methods: usize,
    pub calls: u64,
    pub total_us: u64,
    pub skipped_dispatches: u64,
}

/// Full scheduler snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatistics {
    pub tick: u64,
    pub base_rate_hz: f64,
    pub overruns: u64,
    pub methods: Vec<MethodStatistics>,
    pub modules: Vec<ModuleRollup>,
}

struct SchedulerInner {
    base_rate_hz: f64,
    clock: SimClock,
    tick: AtomicU64,
    methods: RwLock<Vec<Arc<MethodRecord>>>,
    overruns: AtomicU64,
    tick_busy_us: Arc<AtomicU64>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Divisor-based rate scheduler over one global tick counter.
///
/// Cheap to clone; clones share the tick counter and registry.
///
/// # Example
/// ```rust,ignore
/// let scheduler = RateScheduler::new(100.0, SimClock::system());
/// let handle = scheduler.register("guidance_loop", 15.0, |info| {
///     // fires at ticks 0, 7, 14, ... => 14.29 Hz actual
/// })?;
/// assert!((handle.actual_rate_hz() - 100.0 / 7.0).abs() < 1e-9);
/// ```
#[derive(Clone)]
pub struct RateScheduler {
    inner: Arc<SchedulerInner>,
}

impl RateScheduler {
    /// Create a scheduler with the given base tick rate.
    pub fn new(base_rate_hz: f64, clock: SimClock) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                base_rate_hz,
                clock,
                tick: AtomicU64::new(0),
                methods: RwLock::new(Vec::new()),
                overruns: AtomicU64::new(0),
                tick_busy_us: Arc::new(AtomicU64::new(0)),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn base_rate_hz(&self) -> f64 {
        self.inner.base_rate_hz
    }

    /// Current global tick number (ticks completed so far).
    pub fn current_tick(&self) -> u64 {
        self.inner.tick.load(Ordering::SeqCst)
    }

    /// Register a method to run inline on the driver thread at the
    /// nearest achievable divisor of the base rate.
    pub fn register<F>(&self, name: &str, rate_hz: f64, method: F) -> FurrowResult<ScheduleHandle>
    where
        F: FnMut(TickInfo) + Send + 'static,
    {
        self.add_record(name, None, rate_hz, Target::Inline(Mutex::new(Box::new(method))))
    }

    /// Register a method whose due ticks are dispatched to `executor`
    /// (typically a module's worker) instead of running inline.
    /// `owner` names the module for statistics rollups.
    pub fn register_on(
        &self,
        name: &str,
        owner: &str,
        rate_hz: f64,
        executor: Arc<dyn TickExecutor>,
    ) -> FurrowResult<ScheduleHandle> {
        self.add_record(name, Some(owner.to_string()), rate_hz, Target::Executor(executor))
    }

    fn add_record(
        &self,
        name: &str,
        owner: Option<String>,
        rate_hz: f64,
        target: Target,
    ) -> FurrowResult<ScheduleHandle> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(FurrowError::scheduling(format!(
                "invalid rate {rate_hz} Hz for method '{name}'"
            )));
        }

        let base = self.inner.base_rate_hz;
        let divisor = (base / rate_hz).round().max(1.0) as u64;
        let actual_hz = base / divisor as f64;
        if (actual_hz - rate_hz).abs() > f64::EPSILON {
            log::debug!(
                "method '{name}': requested {rate_hz:.2} Hz, scheduled at {actual_hz:.2} Hz (divisor {divisor})"
            );
        }

        let record = Arc::new(MethodRecord {
            name: name.to_string(),
            owner,
            requested_hz: rate_hz,
            divisor,
            actual_hz,
            paused: AtomicBool::new(false),
            active: AtomicBool::new(true),
            stats: Mutex::new(MethodStats::default()),
            skipped_dispatches: AtomicU64::new(0),
            target,
            tick_busy_us: self.inner.tick_busy_us.clone(),
        });

        self.inner.methods.write().push(record.clone());
        Ok(ScheduleHandle {
            scheduler: Arc::downgrade(&self.inner),
            record,
        })
    }

    /// Advance the global tick by one and dispatch every due method.
    ///
    /// The driver thread calls this at the base rate; replay harnesses
    /// and tests call it directly to step deterministically. Returns
    /// the tick number that was just executed.
    pub fn advance_tick(&self) -> u64 {
        let inner = &self.inner;
        let tick = inner.tick.fetch_add(1, Ordering::SeqCst);
        let sim_time_ms = inner.clock.now_ms();

        // Budget check covers the previous tick's executions, including
        // worker-side completions reported since then.
        let budget_us = (1_000_000.0 / inner.base_rate_hz) as u64;
        let busy_us = inner.tick_busy_us.swap(0, Ordering::Relaxed);
        if tick > 0 && busy_us > budget_us {
            inner.overruns.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "tick {}: execution time {busy_us}us exceeded tick budget {budget_us}us",
                tick - 1
            );
        }

        let snapshot: Vec<Arc<MethodRecord>> = inner.methods.read().clone();
        for record in snapshot {
            if !record.active.load(Ordering::Acquire) {
                continue;
            }
            if tick % record.divisor != 0 {
                continue;
            }
            // Pause skips only the call; the divisor boundary above is
            // computed from the global tick, so phase survives.
            if record.paused.load(Ordering::Acquire) {
                continue;
            }

            let info = TickInfo { tick, sim_time_ms };
            match &record.target {
                Target::Inline(method) => {
                    let start = Instant::now();
                    let result = {
                        let mut method = method.lock();
                        catch_unwind(AssertUnwindSafe(|| (*method)(info)))
                    };
                    record.record_execution(start.elapsed());
                    if result.is_err() {
                        log::error!(
                            "scheduled method '{}' panicked at tick {tick}",
                            record.name
                        );
                    }
                }
                Target::Executor(executor) => {
                    let job = TickJob {
                        info,
                        record: record.clone(),
                    };
                    if !executor.submit(job) {
                        record.skipped_dispatches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        tick
    }

    /// Spawn the driver thread: a drift-free loop advancing the tick at
    /// the base rate until `shutdown` fires. An overrunning tick eats
    /// into the following idle window instead of shifting phase; only a
    /// stall longer than one second re-anchors the deadline.
    pub fn spawn_driver(&self, shutdown: ShutdownToken) -> FurrowResult<()> {
        let mut driver = self.inner.driver.lock();
        if driver.is_some() {
            return Err(FurrowError::scheduling("driver thread already running"));
        }

        let scheduler = self.clone();
        let period = Duration::from_secs_f64(1.0 / self.inner.base_rate_hz);
        let handle = std::thread::Builder::new()
            .name("rate-scheduler".into())
            .spawn(move || {
                let mut next = Instant::now();
                while !shutdown.is_triggered() {
                    scheduler.advance_tick();
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        if shutdown.wait_timeout(next - now) {
                            break;
                        }
                    } else if now - next > Duration::from_secs(1) {
                        log::warn!(
                            "scheduler fell {:?} behind; re-anchoring tick deadline",
                            now - next
                        );
                        next = now;
                    }
                }
                log::info!(
                    "rate scheduler stopped at tick {}",
                    scheduler.current_tick()
                );
            })
            .map_err(|e| FurrowError::scheduling(format!("failed to spawn driver: {e}")))?;

        *driver = Some(handle);
        Ok(())
    }

    /// Join the driver thread after shutdown has been triggered.
    pub fn join_driver(&self) {
        if let Some(handle) = self.inner.driver.lock().take() {
            let _ = handle.join();
        }
    }

    /// Aggregate statistics snapshot.
    pub fn statistics(&self) -> SchedulerStatistics {
        let methods: Vec<MethodStatistics> = self
            .inner
            .methods
            .read()
            .iter()
            .filter(|r| r.active.load(Ordering::Acquire))
            .map(|r| {
                let stats = r.stats.lock();
                MethodStatistics {
                    name: r.name.clone(),
                    owner: r.owner.clone(),
                    requested_hz: r.requested_hz,
                    actual_hz: r.actual_hz,
                    divisor: r.divisor,
                    paused: r.paused.load(Ordering::Acquire),
                    calls: stats.calls,
                    avg_us: if stats.calls > 0 {
                        stats.total_us as f64 / stats.calls as f64
                    } else {
                        0.0
                    },
                    max_us: stats.max_us,
                    last_us: stats.last_us,
                    skipped_dispatches: r.skipped_dispatches.load(Ordering::Relaxed),
                }
            })
            .collect();

        let mut modules: Vec<ModuleRollup> = Vec::new();
        for m in &methods {
            let Some(owner) = &m.owner else { continue };
            match modules.iter_mut().find(|r| &r.module == owner) {
                Some(rollup) => {
                    rollup.methods += 1;
                    rollup.calls += m.calls;
                    rollup.total_us += (m.avg_us * m.calls as f64) as u64;
                    rollup.skipped_dispatches += m.skipped_dispatches;
                }
                None => modules.push(ModuleRollup {
                    module: owner.clone(),
                    methods: 1,
                    calls: m.calls,
                    total_us: (m.avg_us * m.calls as f64) as u64,
                    skipped_dispatches: m.skipped_dispatches,
                }),
            }
        }

        SchedulerStatistics {
            tick: self.current_tick(),
            base_rate_hz: self.inner.base_rate_hz,
            overruns: self.inner.overruns.load(Ordering::Relaxed),
            methods,
            modules,
        }
    }
}

impl std::fmt::Debug for RateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateScheduler")
            .field("base_rate_hz", &self.inner.base_rate_hz)
            .field("tick", &self.current_tick())
            .field("methods", &self.inner.methods.read().len())
            .finish()
    }
}

/// Handle to one scheduled method. Unschedules on drop.
pub struct ScheduleHandle {
    scheduler: Weak<SchedulerInner>,
    record: Arc<MethodRecord>,
}

impl ScheduleHandle {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The achievable rate actually scheduled: `base / divisor`.
    pub fn actual_rate_hz(&self) -> f64 {
        self.record.actual_hz
    }

    pub fn divisor(&self) -> u64 {
        self.record.divisor
    }

    /// Skip invocations until resumed. Tick counting is unaffected, so
    /// the divisor phase is preserved across pause/resume.
    pub fn pause(&self) {
        self.record.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.record.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.record.paused.load(Ordering::Acquire)
    }

    /// Remove the method from the scheduler. Also happens on drop.
    pub fn unschedule(&self) {
        if !self.record.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.scheduler.upgrade() {
            inner
                .methods
                .write()
                .retain(|r| !Arc::ptr_eq(r, &self.record));
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.unschedule();
    }
}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("name", &self.record.name)
            .field("divisor", &self.record.divisor)
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_scheduler(base: f64) -> RateScheduler {
        RateScheduler::new(base, SimClock::manual())
    }

    #[test]
    fn divisor_rounds_to_nearest_achievable_rate() {
        let scheduler = test_scheduler(100.0);
        let handle = scheduler.register("fifteen", 15.0, |_| {}).unwrap();
        assert_eq!(handle.divisor(), 7);
        assert_relative_eq!(handle.actual_rate_hz(), 100.0 / 7.0);

        let fast = scheduler.register("too_fast", 1000.0, |_| {}).unwrap();
        assert_eq!(fast.divisor(), 1);
        assert_relative_eq!(fast.actual_rate_hz(), 100.0);
    }

    #[test]
    fn method_fires_exactly_on_divisor_boundaries() {
        let scheduler = test_scheduler(100.0);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = fired.clone();
        let _handle = scheduler
            .register("fifteen", 15.0, move |info| fired2.lock().push(info.tick))
            .unwrap();

        for _ in 0..22 {
            scheduler.advance_tick();
        }
        assert_eq!(*fired.lock(), vec![0, 7, 14, 21]);
    }

    #[test]
    fn pause_preserves_phase() {
        let scheduler = test_scheduler(100.0);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = fired.clone();
        let handle = scheduler
            .register("paused", 15.0, move |info| fired2.lock().push(info.tick))
            .unwrap();

        // Fire through tick 70, pause across the 77 and 84 boundaries,
        // resume at 85: next firing must be 91, not 85.
        for _ in 0..=70 {
            scheduler.advance_tick();
        }
        handle.pause();
        while scheduler.current_tick() < 85 {
            scheduler.advance_tick();
        }
        handle.resume();
        while scheduler.current_tick() <= 91 {
            scheduler.advance_tick();
        }

        let fired = fired.lock();
        assert!(fired.contains(&70));
        assert!(!fired.contains(&77));
        assert!(!fired.contains(&84));
        assert!(!fired.contains(&85));
        assert_eq!(*fired.last().unwrap(), 91);
    }

    #[test]
    fn panicking_method_does_not_stop_the_tick_loop() {
        let scheduler = test_scheduler(100.0);
        let healthy_calls = Arc::new(AtomicU64::new(0));
        let healthy2 = healthy_calls.clone();
        let _bad = scheduler
            .register("bad", 100.0, |_| panic!("tick exploded"))
            .unwrap();
        let _good = scheduler
            .register("good", 100.0, move |_| {
                healthy2.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        for _ in 0..5 {
            scheduler.advance_tick();
        }
        assert_eq!(healthy_calls.load(Ordering::Relaxed), 5);
        assert_eq!(scheduler.current_tick(), 5);
    }

    #[test]
    fn statistics_track_calls_and_rates() {
        let scheduler = test_scheduler(100.0);
        let _a = scheduler.register("every_tick", 100.0, |_| {}).unwrap();
        let _b = scheduler.register("halved", 50.0, |_| {}).unwrap();

        for _ in 0..10 {
            scheduler.advance_tick();
        }
        let stats = scheduler.statistics();
        assert_eq!(stats.tick, 10);
        let a = stats.methods.iter().find(|m| m.name == "every_tick").unwrap();
        let b = stats.methods.iter().find(|m| m.name == "halved").unwrap();
        assert_eq!(a.calls, 10);
        assert_eq!(b.calls, 5);
    }

    #[test]
    fn unschedule_stops_firing() {
        let scheduler = test_scheduler(100.0);
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        let handle = scheduler
            .register("short_lived", 100.0, move |_| {
                calls2.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        scheduler.advance_tick();
        handle.unschedule();
        scheduler.advance_tick();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(scheduler.statistics().methods.is_empty());
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let scheduler = test_scheduler(100.0);
        assert!(scheduler.register("zero", 0.0, |_| {}).is_err());
        assert!(scheduler.register("negative", -1.0, |_| {}).is_err());
    }
}

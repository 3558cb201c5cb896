use crate::core::{Module, ModuleContext, ModuleHealth};
use crate::error::{FurrowError, FurrowResult};
use crate::scheduling::{TickExecutor, TickJob};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    Init,
    Start,
    Stop,
    Shutdown,
}

impl LifecyclePhase {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Shutdown => "shutdown",
        }
    }
}

pub(crate) enum Command {
    Lifecycle {
        phase: LifecyclePhase,
        reply: Sender<FurrowResult<()>>,
    },
    QueryHealth {
        reply: Sender<ModuleHealth>,
    },
    Exit,
}

/// Liveness markers the watchdog samples. Written only by the module's
/// worker thread; read from anywhere.
pub(crate) struct ModuleProgress {
    busy_since: Mutex<Option<(Instant, &'static str)>>,
    ticks: AtomicU64,
    panics: AtomicU64,
}

impl ModuleProgress {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            busy_since: Mutex::new(None),
            ticks: AtomicU64::new(0),
            panics: AtomicU64::new(0),
        })
    }

    fn begin(&self, label: &'static str) {
        *self.busy_since.lock() = Some((Instant::now(), label));
    }

    fn end(&self) {
        *self.busy_since.lock() = None;
    }

    /// How long the worker has been inside its current call, if any.
    pub(crate) fn busy_elapsed(&self) -> Option<(Duration, &'static str)> {
        (*self.busy_since.lock()).map(|(since, label)| (since.elapsed(), label))
    }

    pub(crate) fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub(crate) fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

/// Channel-facing handle to one module's worker thread.
///
/// The worker owns the boxed module instance and its context; nothing
/// outside the worker ever touches module state directly, so a fault in
/// one module cannot corrupt another's memory.
pub(crate) struct WorkerHandle {
    module_name: String,
    control_tx: Sender<Command>,
    tick_tx: Sender<TickJob>,
    thread: Mutex<Option<JoinHandle<()>>>,
    progress: Arc<ModuleProgress>,
}

impl WorkerHandle {
    /// Ask the worker to run a lifecycle phase; the caller waits on the
    /// returned receiver with its own deadline.
    pub(crate) fn request_lifecycle(&self, phase: LifecyclePhase) -> Receiver<FurrowResult<()>> {
        let (reply, rx) = bounded(1);
        let _ = self.control_tx.send(Command::Lifecycle { phase, reply });
        rx
    }

    /// Module's self-reported health, or `Unknown` if the worker does
    /// not answer within `timeout`.
    pub(crate) fn query_health(&self, timeout: Duration) -> ModuleHealth {
        let (reply, rx) = bounded(1);
        if self.control_tx.send(Command::QueryHealth { reply }).is_err() {
            return ModuleHealth::Unknown;
        }
        rx.recv_timeout(timeout).unwrap_or(ModuleHealth::Unknown)
    }

    pub(crate) fn request_exit(&self) {
        let _ = self.control_tx.send(Command::Exit);
    }

    /// Wait up to `timeout` for the thread to finish, then join it.
    /// Returns `false` if the worker is still running (hung); the
    /// thread is detached in that case.
    pub(crate) fn join(&self, timeout: Duration, shutdown_poll: Duration) -> bool {
        let Some(handle) = self.thread.lock().take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(shutdown_poll);
        }
        if handle.is_finished() {
            let _ = handle.join();
            true
        } else {
            log::warn!(
                "module '{}' worker did not exit within {:?}; detaching",
                self.module_name,
                timeout
            );
            false
        }
    }

    pub(crate) fn progress(&self) -> &Arc<ModuleProgress> {
        &self.progress
    }
}

impl TickExecutor for WorkerHandle {
    fn submit(&self, job: TickJob) -> bool {
        self.tick_tx.try_send(job).is_ok()
    }
}

/// Spawn the worker thread for one freshly constructed module instance.
pub(crate) fn spawn_worker(
    mut module: Box<dyn Module>,
    mut context: ModuleContext,
) -> FurrowResult<Arc<WorkerHandle>> {
    let module_name = module.name().to_string();
    let progress = ModuleProgress::new();
    let (control_tx, control_rx) = unbounded::<Command>();
    // Small tick lane: a module still busy with its last tick rejects
    // the next dispatch, which the scheduler counts as skipped.
    let (tick_tx, tick_rx) = bounded::<TickJob>(1);

    let thread_progress = progress.clone();
    let thread_name = module_name.clone();
    let thread = std::thread::Builder::new()
        .name(format!("module-{module_name}"))
        .spawn(move || {
            run_worker(
                &thread_name,
                &mut module,
                &mut context,
                control_rx,
                tick_rx,
                &thread_progress,
            );
            // Dropping the context here disposes every subscription the
            // module created through it.
        })
        .map_err(|e| {
            FurrowError::module(module_name.clone(), format!("failed to spawn worker: {e}"))
        })?;

    Ok(Arc::new(WorkerHandle {
        module_name,
        control_tx,
        tick_tx,
        thread: Mutex::new(Some(thread)),
        progress,
    }))
}

fn run_worker(
    name: &str,
    module: &mut Box<dyn Module>,
    context: &mut ModuleContext,
    control_rx: Receiver<Command>,
    tick_rx: Receiver<TickJob>,
    progress: &Arc<ModuleProgress>,
) {
    loop {
        crossbeam::select! {
            recv(control_rx) -> msg => match msg {
                Ok(Command::Lifecycle { phase, reply }) => {
                    progress.begin(phase.as_str());
                    let result = run_phase(name, module.as_mut(), context, phase, progress);
                    progress.end();
                    let _ = reply.send(result);
                }
                Ok(Command::QueryHealth { reply }) => {
                    let health = catch_unwind(AssertUnwindSafe(|| module.health()))
                        .unwrap_or(ModuleHealth::Unknown);
                    let _ = reply.send(health);
                }
                Ok(Command::Exit) | Err(_) => break,
            },
            recv(tick_rx) -> msg => match msg {
                Ok(job) => {
                    progress.begin("tick");
                    let ok = job.execute(|info| module.tick(info.tick, info.sim_time_ms));
                    progress.end();
                    if ok {
                        progress.ticks.fetch_add(1, Ordering::Relaxed);
                    } else {
                        progress.panics.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // Both lanes share the WorkerHandle's lifetime: a closed
                // tick lane means the handle is gone, same as Exit.
                Err(_) => break,
            },
        }
    }
    log::debug!("module '{name}' worker exited");
}

fn run_phase(
    name: &str,
    module: &mut dyn Module,
    context: &mut ModuleContext,
    phase: LifecyclePhase,
    progress: &Arc<ModuleProgress>,
) -> FurrowResult<()> {
    let outcome = catch_unwind(AssertUnwindSafe(|| match phase {
        LifecyclePhase::Init => module.init(context),
        LifecyclePhase::Start => module.start(context),
        LifecyclePhase::Stop => module.stop(context),
        LifecyclePhase::Shutdown => module.shutdown(context),
    }));
    match outcome {
        Ok(result) => result,
        Err(_) => {
            progress.panics.fetch_add(1, Ordering::Relaxed);
            Err(FurrowError::module(
                name,
                format!("panicked during {}", phase.as_str()),
            ))
        }
    }
}

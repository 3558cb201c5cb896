// Supervision behavior: dependency ordering, deadlines, containment,
// hot reload. Uses a manual clock so nothing here depends on wall time
// except the deliberately-hung workers.
use furrow_core::{
    FurrowError, FurrowResult, LifecycleEventKind, MessageBus, Module, ModuleCategory,
    ModuleContext, ModuleHealth, ModuleLifecycleEvent, ModuleState, ModuleSupervisor,
    RateScheduler, RuntimeConfig, ShutdownToken, SimClock, TimestampGenerator,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Sample(u64);

#[derive(Default)]
struct Behavior {
    hang_in_init: bool,
    panic_in_init: bool,
    subscribe_samples: bool,
}

/// Configurable module for exercising the supervisor.
struct TestModule {
    name: String,
    category: ModuleCategory,
    deps: Vec<String>,
    behavior: Behavior,
    instance: u64,
    log: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<(u64, u64)>>>, // (instance, payload)
}

impl Module for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> ModuleCategory {
        self.category
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> FurrowResult<()> {
        self.log.lock().push(format!("init:{}", self.name));
        if self.behavior.panic_in_init {
            panic!("init blew up");
        }
        if self.behavior.hang_in_init {
            std::thread::sleep(Duration::from_secs(60));
        }
        if self.behavior.subscribe_samples {
            let received = self.received.clone();
            let instance = self.instance;
            ctx.subscribe::<Sample, _>(0, move |sample| {
                received.lock().push((instance, sample.0));
            });
        }
        Ok(())
    }

    fn start(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
        self.log.lock().push(format!("stop:{}", self.name));
        Ok(())
    }
}

struct Harness {
    supervisor: ModuleSupervisor,
    bus: MessageBus,
    log: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Harness {
    fn new(lifecycle_timeout_ms: u64) -> Self {
        let mut config = RuntimeConfig::default();
        config.lifecycle.lifecycle_timeout_ms = lifecycle_timeout_ms;
        config.lifecycle.watchdog_enabled = false;

        let clock = SimClock::manual();
        let bus = MessageBus::new(TimestampGenerator::new(clock.clone()));
        let scheduler = RateScheduler::new(100.0, clock.clone());
        let supervisor = ModuleSupervisor::new(
            &config,
            bus.clone(),
            Some(scheduler),
            clock,
            ShutdownToken::new(),
        );

        Self {
            supervisor,
            bus,
            log: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn add(&self, name: &str, category: ModuleCategory, deps: &[&str], behavior: fn() -> Behavior) {
        let log = self.log.clone();
        let received = self.received.clone();
        let name = name.to_string();
        let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
        let instances = Arc::new(AtomicU64::new(0));
        self.supervisor
            .register(move || {
                Box::new(TestModule {
                    name: name.clone(),
                    category,
                    deps: deps.clone(),
                    behavior: behavior(),
                    instance: instances.fetch_add(1, Ordering::SeqCst) + 1,
                    log: log.clone(),
                    received: received.clone(),
                }) as Box<dyn Module>
            })
            .unwrap();
    }
}

fn plain() -> Behavior {
    Behavior::default()
}

#[test]
fn load_order_respects_categories_and_dependencies() {
    let h = Harness::new(2_000);
    // Registered out of order on purpose.
    h.add("guidance", ModuleCategory::Control, &["gps", "imu"], plain);
    h.add("monitor", ModuleCategory::Monitoring, &[], plain);
    h.add("imu", ModuleCategory::Io, &["gps"], plain);
    h.add("gps", ModuleCategory::Io, &[], plain);

    let report = h.supervisor.load_all();
    assert!(report.all_succeeded(), "failures: {:?}", report.failed);

    let log = h.log.lock();
    let pos = |entry: &str| log.iter().position(|l| l == entry).unwrap();
    assert!(pos("init:gps") < pos("init:imu"));
    assert!(pos("init:imu") < pos("init:guidance"));
    assert!(pos("init:guidance") < pos("init:monitor"));
}

#[test]
fn unload_is_refused_while_dependents_are_loaded() {
    let h = Harness::new(2_000);
    h.add("gps", ModuleCategory::Io, &[], plain);
    h.add("guidance", ModuleCategory::Control, &["gps"], plain);
    assert!(h.supervisor.load_all().all_succeeded());

    match h.supervisor.unload("gps") {
        Err(FurrowError::DependentsLoaded { dependents, .. }) => {
            assert_eq!(dependents, vec!["guidance".to_string()]);
        }
        other => panic!("expected DependentsLoaded, got {other:?}"),
    }
    assert_eq!(
        h.supervisor.module_state("gps"),
        Some(ModuleState::Initialized)
    );

    // Reverse order works.
    h.supervisor.unload("guidance").unwrap();
    h.supervisor.unload("gps").unwrap();
    assert_eq!(h.supervisor.module_state("gps"), Some(ModuleState::Unloaded));
}

#[test]
fn missing_dependency_is_reported_per_module() {
    let h = Harness::new(2_000);
    h.add("gps", ModuleCategory::Io, &[], plain);
    h.add("guidance", ModuleCategory::Control, &["ghost"], plain);

    let report = h.supervisor.load_all();
    assert_eq!(report.succeeded, vec!["gps".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        report.failed[0].1,
        FurrowError::MissingDependency { .. }
    ));
    assert!(matches!(
        h.supervisor.module_state("guidance"),
        Some(ModuleState::Faulted(_))
    ));
}

#[test]
fn dependency_cycle_faults_the_members_not_the_loader() {
    let h = Harness::new(2_000);
    h.add("a", ModuleCategory::Io, &["b"], plain);
    h.add("b", ModuleCategory::Io, &["a"], plain);
    h.add("bystander", ModuleCategory::Io, &[], plain);

    let report = h.supervisor.load_all();
    assert_eq!(report.succeeded, vec!["bystander".to_string()]);
    assert_eq!(report.failed.len(), 2);
    for (_, error) in &report.failed {
        assert!(matches!(error, FurrowError::DependencyCycle(_)));
    }
}

#[test]
fn hung_init_faults_only_that_module() {
    let h = Harness::new(150);
    h.add("gps", ModuleCategory::Io, &[], || Behavior {
        subscribe_samples: true,
        ..Default::default()
    });
    h.add("stuck", ModuleCategory::Control, &[], || Behavior {
        hang_in_init: true,
        ..Default::default()
    });

    let report = h.supervisor.load_all();
    assert_eq!(report.succeeded, vec!["gps".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, FurrowError::Timeout(_)));
    assert!(matches!(
        h.supervisor.module_state("stuck"),
        Some(ModuleState::Faulted(_))
    ));

    // The healthy module keeps receiving while the other is stuck.
    h.bus.publish(Sample(7));
    assert_eq!(h.received.lock().as_slice(), &[(1, 7)]);
    assert_eq!(h.supervisor.health("stuck").unwrap(), ModuleHealth::Unhealthy);
}

#[test]
fn panic_in_init_is_contained_and_reported() {
    let h = Harness::new(2_000);
    h.add("volatile", ModuleCategory::Io, &[], || Behavior {
        panic_in_init: true,
        ..Default::default()
    });
    h.add("steady", ModuleCategory::Io, &[], plain);

    let report = h.supervisor.load_all();
    assert_eq!(report.succeeded, vec!["steady".to_string()]);
    assert!(matches!(
        h.supervisor.module_state("volatile"),
        Some(ModuleState::Faulted(_))
    ));
}

#[test]
fn reload_builds_a_fresh_instance_and_drops_old_subscriptions() {
    let h = Harness::new(2_000);
    h.add("gps", ModuleCategory::Io, &[], || Behavior {
        subscribe_samples: true,
        ..Default::default()
    });
    assert!(h.supervisor.load_all().all_succeeded());
    assert!(h.supervisor.start_all().all_succeeded());

    h.bus.publish(Sample(1));
    h.supervisor.reload("gps").unwrap();
    h.bus.publish(Sample(2));

    let received = h.received.lock();
    // First publish hit instance 1; after reload only instance 2 hears.
    assert_eq!(received.as_slice(), &[(1, 1), (2, 2)]);
    assert_eq!(h.supervisor.module_state("gps"), Some(ModuleState::Running));
}

#[test]
fn lifecycle_events_land_in_the_last_value_cache() {
    let h = Harness::new(2_000);
    h.add("gps", ModuleCategory::Io, &[], plain);
    assert!(h.supervisor.load_all().all_succeeded());

    let (event, _) = h.bus.try_get_last::<ModuleLifecycleEvent>().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::Loaded);
    assert_eq!(event.name, "gps");

    h.supervisor.unload("gps").unwrap();
    let (event, _) = h.bus.try_get_last::<ModuleLifecycleEvent>().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::Unloaded);

    h.supervisor.reload("gps").unwrap();
    let (event, _) = h.bus.try_get_last::<ModuleLifecycleEvent>().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::Reloaded);
}

#[test]
fn statuses_report_every_registered_module() {
    let h = Harness::new(2_000);
    h.add("gps", ModuleCategory::Io, &[], plain);
    h.add("guidance", ModuleCategory::Control, &["gps"], plain);
    h.supervisor.load_all();

    let statuses = h.supervisor.statuses();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.state == ModuleState::Initialized));
    assert!(statuses.iter().all(|s| s.health == ModuleHealth::Healthy));
}

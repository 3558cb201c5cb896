// End-to-end: a producer and a consumer module under the real tick
// driver, plus watchdog hang detection. Wall-clock margins are kept
// generous so slow CI machines pass.
use furrow_core::{
    FurrowResult, MessageQueue, Module, ModuleCategory, ModuleContext, ModuleHealth, ModuleState,
    Runtime, RuntimeConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct WheelSpeed(u64);

/// Publishes one WheelSpeed per tick.
struct SpeedSensor {
    published: Arc<AtomicU64>,
    bus: Option<furrow_core::MessageBus>,
}

impl Module for SpeedSensor {
    fn name(&self) -> &str {
        "speed_sensor"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Io
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> FurrowResult<()> {
        self.bus = Some(ctx.bus().clone());
        Ok(())
    }

    fn tick_rate_hz(&self) -> Option<f64> {
        Some(50.0)
    }

    fn tick(&mut self, tick: u64, _now_ms: f64) {
        if let Some(bus) = &self.bus {
            bus.publish(WheelSpeed(tick));
            self.published.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Drains its queue on its own (slower) tick.
struct SpeedLogger {
    received: Arc<AtomicU64>,
    queue: Option<Arc<MessageQueue>>,
}

impl Module for SpeedLogger {
    fn name(&self) -> &str {
        "speed_logger"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Logging
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["speed_sensor".to_string()]
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> FurrowResult<()> {
        let queue = ctx.create_queue();
        let received = self.received.clone();
        ctx.subscribe_queued::<WheelSpeed, _>(&queue, move |_| {
            received.fetch_add(1, Ordering::Relaxed);
        });
        self.queue = Some(queue);
        Ok(())
    }

    fn tick_rate_hz(&self) -> Option<f64> {
        Some(20.0)
    }

    fn tick(&mut self, _tick: u64, _now_ms: f64) {
        if let Some(queue) = &self.queue {
            queue.process_queue();
        }
    }
}

/// Healthy until ticked, then blocks its worker forever.
struct StickyValve {
    subscribed_hits: Arc<AtomicU64>,
}

impl Module for StickyValve {
    fn name(&self) -> &str {
        "sticky_valve"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Control
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> FurrowResult<()> {
        let hits = self.subscribed_hits.clone();
        ctx.subscribe::<WheelSpeed, _>(0, move |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        Ok(())
    }

    fn tick_rate_hz(&self) -> Option<f64> {
        Some(50.0)
    }

    fn tick(&mut self, _tick: u64, _now_ms: f64) {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn producer_and_consumer_run_under_the_driver() {
    let published = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    {
        let published = published.clone();
        runtime
            .register(move || {
                Box::new(SpeedSensor {
                    published: published.clone(),
                    bus: None,
                }) as Box<dyn Module>
            })
            .unwrap();
    }
    {
        let received = received.clone();
        runtime
            .register(move || {
                Box::new(SpeedLogger {
                    received: received.clone(),
                    queue: None,
                }) as Box<dyn Module>
            })
            .unwrap();
    }

    let report = runtime.start().unwrap();
    assert!(report.all_succeeded(), "failures: {:?}", report.failed);

    assert!(
        wait_until(Duration::from_secs(5), || received
            .load(Ordering::Relaxed)
            > 3),
        "consumer never drained its queue"
    );
    assert!(published.load(Ordering::Relaxed) > 3);
    assert_eq!(runtime.health_rollup(), ModuleHealth::Healthy);

    let stats = runtime.statistics().unwrap();
    let sensor = stats
        .methods
        .iter()
        .find(|m| m.name == "speed_sensor.tick")
        .unwrap();
    assert_eq!(sensor.divisor, 2); // 100 Hz base / 50 Hz
    assert!(sensor.calls > 0);
    // Statistics snapshots serialize for external monitoring.
    assert!(serde_json::to_string(&stats).is_ok());

    runtime.stop();
    assert_eq!(
        runtime.supervisor().module_state("speed_sensor"),
        Some(ModuleState::Unloaded)
    );
    assert_eq!(
        runtime.supervisor().module_state("speed_logger"),
        Some(ModuleState::Unloaded)
    );
}

#[test]
fn watchdog_faults_a_hung_module_and_the_rest_keeps_running() {
    let mut config = RuntimeConfig::default();
    config.lifecycle.watchdog_interval_ms = 25;
    config.lifecycle.hang_timeout_ms = 100;
    config.lifecycle.force_unload_on_hang = true;

    let published = Arc::new(AtomicU64::new(0));
    let hits = Arc::new(AtomicU64::new(0));

    let runtime = Runtime::new(config).unwrap();
    {
        let published = published.clone();
        runtime
            .register(move || {
                Box::new(SpeedSensor {
                    published: published.clone(),
                    bus: None,
                }) as Box<dyn Module>
            })
            .unwrap();
    }
    {
        let hits = hits.clone();
        runtime
            .register(move || {
                Box::new(StickyValve {
                    subscribed_hits: hits.clone(),
                }) as Box<dyn Module>
            })
            .unwrap();
    }

    let report = runtime.start().unwrap();
    assert!(report.all_succeeded(), "failures: {:?}", report.failed);

    // First tick wedges the valve's worker; the watchdog must fault it.
    assert!(
        wait_until(Duration::from_secs(5), || matches!(
            runtime.supervisor().module_state("sticky_valve"),
            Some(ModuleState::Faulted(_))
        )),
        "watchdog never faulted the hung module"
    );
    assert_eq!(
        runtime.supervisor().health("sticky_valve").unwrap(),
        ModuleHealth::Unhealthy
    );

    // Force-unload revoked the valve's subscriptions: publishes after
    // this point must not reach it.
    std::thread::sleep(Duration::from_millis(100));
    let hits_at_fault = hits.load(Ordering::Relaxed);
    let published_at_fault = published.load(Ordering::Relaxed);
    assert!(
        wait_until(Duration::from_secs(5), || published
            .load(Ordering::Relaxed)
            > published_at_fault + 3),
        "healthy producer stopped after the fault"
    );
    assert_eq!(hits.load(Ordering::Relaxed), hits_at_fault);

    runtime.stop();
}

#[test]
fn a_slow_module_accumulates_skipped_dispatches() {
    struct SlowPlanner;
    impl Module for SlowPlanner {
        fn name(&self) -> &str {
            "slow_planner"
        }
        fn category(&self) -> ModuleCategory {
            ModuleCategory::Control
        }
        fn init(&mut self, _ctx: &mut ModuleContext) -> FurrowResult<()> {
            Ok(())
        }
        fn tick_rate_hz(&self) -> Option<f64> {
            Some(100.0)
        }
        fn tick(&mut self, _tick: u64, _now_ms: f64) {
            std::thread::sleep(Duration::from_millis(40));
        }
    }

    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.register(|| Box::new(SlowPlanner) as Box<dyn Module>).unwrap();
    let report = runtime.start().unwrap();
    assert!(report.all_succeeded());

    assert!(
        wait_until(Duration::from_secs(5), || {
            runtime
                .statistics()
                .unwrap()
                .methods
                .iter()
                .find(|m| m.name == "slow_planner.tick")
                .map(|m| m.skipped_dispatches > 0)
                .unwrap_or(false)
        }),
        "a 40ms tick at 100 Hz never skipped a dispatch"
    );

    runtime.stop();
}

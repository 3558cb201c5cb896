use crate::core::module::{LifecycleEventKind, ModuleState};
use crate::core::supervisor::SupervisorShared;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Liveness sampler: a module worker busy inside a single call for
/// longer than the configured hang timeout is reported `Faulted` and,
/// when `force_unload_on_hang` is set, has its resources released
/// (subscriptions revoked, queues cleared, tick dispatch removed)
/// without ever blocking on the hung thread. The rest of the system
/// keeps running.
pub(crate) fn spawn_watchdog(shared: Arc<SupervisorShared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("module-watchdog".into())
        .spawn(move || {
            let interval = shared.settings.watchdog_interval();
            let hang_timeout = shared.settings.hang_timeout();
            loop {
                if shared.shutdown().wait_timeout(interval) {
                    break;
                }
                for slot in shared.slots_snapshot() {
                    if matches!(slot.state(), ModuleState::Faulted(_)) {
                        continue;
                    }
                    let Some(worker) = slot.worker() else { continue };
                    let Some((elapsed, label)) = worker.progress().busy_elapsed() else {
                        continue;
                    };
                    if elapsed <= hang_timeout {
                        continue;
                    }

                    slot.fault(format!("hung in {label} for {elapsed:?}"));
                    if shared.settings.force_unload_on_hang {
                        let instance_id = slot.loaded_instance_id().unwrap_or_default();
                        shared.teardown(&slot, true);
                        log::warn!("watchdog force-unloaded hung module '{}'", slot.name());
                        shared.publish_lifecycle(LifecycleEventKind::Unloaded, &slot, &instance_id);
                    }
                }
            }
            log::debug!("module watchdog stopped");
        })
        .expect("failed to spawn watchdog thread")
}

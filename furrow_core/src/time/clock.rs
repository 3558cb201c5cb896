use crate::error::{FurrowError, FurrowResult};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

// All system-mode clocks share one epoch so their readings agree.
static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

enum ClockMode {
    /// Milliseconds since the process-wide monotonic epoch.
    System,
    /// Externally stepped time, stored as microseconds.
    Manual(AtomicU64),
}

/// The authoritative simulated/monotonic clock.
///
/// `now_ms()` is monotonic within a session and is the only time base
/// used for ordering and duration comparisons. Wall-clock accessors are
/// provided for display only.
///
/// Cheap to clone; clones share the same underlying time.
#[derive(Clone)]
pub struct SimClock {
    mode: Arc<ClockMode>,
}

impl SimClock {
    /// Clock that follows the process monotonic time.
    pub fn system() -> Self {
        // Force the epoch so the first reading starts near zero.
        Lazy::force(&PROCESS_EPOCH);
        Self {
            mode: Arc::new(ClockMode::System),
        }
    }

    /// Manually stepped clock for replay and tests. Starts at 0 ms and
    /// only advances through [`SimClock::advance_ms`] / [`SimClock::set_ms`].
    pub fn manual() -> Self {
        Self {
            mode: Arc::new(ClockMode::Manual(AtomicU64::new(0))),
        }
    }

    /// Current simulated time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        match &*self.mode {
            ClockMode::System => PROCESS_EPOCH.elapsed().as_secs_f64() * 1000.0,
            ClockMode::Manual(us) => us.load(Ordering::Acquire) as f64 / 1000.0,
        }
    }

    /// Advance a manual clock by `ms`. Fails on a system clock.
    pub fn advance_ms(&self, ms: f64) -> FurrowResult<()> {
        match &*self.mode {
            ClockMode::Manual(us) => {
                let delta = (ms * 1000.0).max(0.0) as u64;
                us.fetch_add(delta, Ordering::AcqRel);
                Ok(())
            }
            ClockMode::System => Err(FurrowError::invalid_input(
                "advance_ms is only valid on a manual SimClock",
            )),
        }
    }

    /// Set a manual clock to an absolute time. Refused if it would move
    /// backwards (simulated time is monotonic within a session).
    pub fn set_ms(&self, ms: f64) -> FurrowResult<()> {
        match &*self.mode {
            ClockMode::Manual(us) => {
                let target = (ms * 1000.0).max(0.0) as u64;
                let current = us.load(Ordering::Acquire);
                if target < current {
                    return Err(FurrowError::invalid_input(format!(
                        "set_ms({ms}) would move the clock backwards (now {:.3} ms)",
                        current as f64 / 1000.0
                    )));
                }
                us.store(target, Ordering::Release);
                Ok(())
            }
            ClockMode::System => Err(FurrowError::invalid_input(
                "set_ms is only valid on a manual SimClock",
            )),
        }
    }

    /// Wall-clock milliseconds since the Unix epoch. Display only.
    pub fn wall_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Human-readable wall-clock string. Display only.
    pub fn wall_iso(&self) -> String {
        chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.3f%z")
            .to_string()
    }
}

impl std::fmt::Debug for SimClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &*self.mode {
            ClockMode::System => "system",
            ClockMode::Manual(_) => "manual",
        };
        f.debug_struct("SimClock")
            .field("mode", &mode)
            .field("now_ms", &self.now_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_steps() {
        let clock = SimClock::manual();
        assert_eq!(clock.now_ms(), 0.0);
        clock.advance_ms(10.0).unwrap();
        assert_eq!(clock.now_ms(), 10.0);
        clock.set_ms(250.5).unwrap();
        assert_eq!(clock.now_ms(), 250.5);
    }

    #[test]
    fn manual_clock_refuses_backwards() {
        let clock = SimClock::manual();
        clock.set_ms(100.0).unwrap();
        assert!(clock.set_ms(50.0).is_err());
        assert_eq!(clock.now_ms(), 100.0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SimClock::system();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(clock.advance_ms(1.0).is_err());
    }

    #[test]
    fn clones_share_time() {
        let clock = SimClock::manual();
        let other = clock.clone();
        clock.advance_ms(42.0).unwrap();
        assert_eq!(other.now_ms(), 42.0);
    }
}

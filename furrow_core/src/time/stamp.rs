use super::SimClock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Comprehensive timestamp attached to every message and tick.
///
/// `sim_time_ms` is the authoritative field: ordering and duration
/// comparisons use it exclusively. Wall-clock fields are advisory and
/// may not be monotonic. GPS fields are present only when a GPS time
/// source supplied them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    /// Simulated-clock milliseconds. Monotonic within a session.
    pub sim_time_ms: f64,
    /// Wall-clock milliseconds since the Unix epoch. Display only.
    pub wall_time_ms: u64,
    /// Human-readable wall-clock string. Display only.
    pub wall_time_iso: String,
    /// GPS week number, when known.
    pub gps_week: Option<u16>,
    /// GPS seconds of week, when known.
    pub gps_seconds: Option<f64>,
    /// Sequence number within this message type. Strictly increasing.
    pub type_sequence: u64,
    /// Sequence number across all message types.
    pub global_sequence: u64,
}

impl TimestampMetadata {
    /// Milliseconds elapsed since `earlier`, on the simulated clock.
    /// Negative if `earlier` is actually later.
    pub fn sim_elapsed_since(&self, earlier: &TimestampMetadata) -> f64 {
        self.sim_time_ms - earlier.sim_time_ms
    }

    /// Whether this stamp is after `other` on the simulated clock.
    pub fn is_after(&self, other: &TimestampMetadata) -> bool {
        self.sim_time_ms > other.sim_time_ms
    }
}

/// Generates [`TimestampMetadata`] records with monotonic per-type and
/// global sequence numbers.
///
/// Sequence counters are keyed by the message's static type
/// (`TypeId`), so every message kind gets its own strictly increasing
/// series regardless of how many threads stamp concurrently.
///
/// Cheap to clone; clones share counters and clock.
#[derive(Clone)]
pub struct TimestampGenerator {
    inner: Arc<GeneratorInner>,
}

struct GeneratorInner {
    clock: SimClock,
    type_sequences: Mutex<HashMap<TypeId, Arc<AtomicU64>>>,
    global_sequence: AtomicU64,
}

impl TimestampGenerator {
    pub fn new(clock: SimClock) -> Self {
        Self {
            inner: Arc::new(GeneratorInner {
                clock,
                type_sequences: Mutex::new(HashMap::new()),
                global_sequence: AtomicU64::new(0),
            }),
        }
    }

    /// The clock this generator stamps from.
    pub fn clock(&self) -> &SimClock {
        &self.inner.clock
    }

    /// Full timestamp for a message of type `T`: simulated clock,
    /// wall clock, and sequence numbers.
    pub fn stamp<T: 'static>(&self) -> TimestampMetadata {
        self.compose::<T>(true, None, None)
    }

    /// Full timestamp plus GPS week / seconds-of-week.
    pub fn stamp_with_gps<T: 'static>(&self, gps_week: u16, gps_seconds: f64) -> TimestampMetadata {
        self.compose::<T>(true, Some(gps_week), Some(gps_seconds))
    }

    /// Timestamp carrying only the simulated clock and sequence
    /// numbers; wall fields are left zeroed. For hot paths that never
    /// display the stamp.
    pub fn stamp_sim_only<T: 'static>(&self) -> TimestampMetadata {
        self.compose::<T>(false, None, None)
    }

    /// Reset all sequence counters to zero.
    ///
    /// For tests and session restart only. Never call while the
    /// runtime is delivering messages, or per-type monotonicity breaks.
    pub fn reset_sequences(&self) {
        self.inner.type_sequences.lock().clear();
        self.inner.global_sequence.store(0, Ordering::SeqCst);
    }

    fn compose<T: 'static>(
        &self,
        with_wall: bool,
        gps_week: Option<u16>,
        gps_seconds: Option<f64>,
    ) -> TimestampMetadata {
        let type_sequence = self.next_type_sequence(TypeId::of::<T>());
        let global_sequence = self.inner.global_sequence.fetch_add(1, Ordering::SeqCst);
        let (wall_time_ms, wall_time_iso) = if with_wall {
            (self.inner.clock.wall_ms(), self.inner.clock.wall_iso())
        } else {
            (0, String::new())
        };

        TimestampMetadata {
            sim_time_ms: self.inner.clock.now_ms(),
            wall_time_ms,
            wall_time_iso,
            gps_week,
            gps_seconds,
            type_sequence,
            global_sequence,
        }
    }

    fn next_type_sequence(&self, type_id: TypeId) -> u64 {
        let counter = {
            let mut map = self.inner.type_sequences.lock();
            map.entry(type_id)
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone()
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TimestampGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampGenerator")
            .field("clock", &self.inner.clock)
            .field(
                "global_sequence",
                &self.inner.global_sequence.load(Ordering::Relaxed),
            )
            .finish()
    }
}

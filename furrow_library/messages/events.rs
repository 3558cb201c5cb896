//! Notification messages
//!
//! Module lifecycle events (`Loaded`/`Unloaded`/`Reloaded`) are
//! published by the core itself and live in `furrow_core`; this module
//! holds the remaining notification payloads.

use furrow_core::TimestampMetadata;
use serde::{Deserialize, Serialize};

/// Announces that a persisted setting changed, so consumers can re-read
/// the value they depend on instead of polling the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsChanged {
    pub stamp: TimestampMetadata,
    /// Dotted path of the changed setting, e.g. `"vehicle.wheelbase_m"`.
    pub key: String,
    /// Monotonic revision of the settings store after the change.
    pub revision: u64,
}

impl SettingsChanged {
    pub fn new(key: &str, revision: u64, stamp: TimestampMetadata) -> Self {
        Self {
            stamp,
            key: key.to_string(),
            revision,
        }
    }

    /// Whether the change falls under `prefix` (a section of the
    /// settings tree).
    pub fn affects(&self, prefix: &str) -> bool {
        self.key == prefix
            || (self.key.starts_with(prefix)
                && self.key.as_bytes().get(prefix.len()) == Some(&b'.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furrow_core::{SimClock, TimestampGenerator};

    fn stamp() -> TimestampMetadata {
        TimestampGenerator::new(SimClock::manual()).stamp::<SettingsChanged>()
    }

    #[test]
    fn affects_matches_exact_and_subkeys() {
        let event = SettingsChanged::new("vehicle.wheelbase_m", 3, stamp());
        assert!(event.affects("vehicle.wheelbase_m"));
        assert!(event.affects("vehicle"));
        assert!(!event.affects("vehicle.wheel"));
        assert!(!event.affects("implement"));
    }

    #[test]
    fn revision_carries_through() {
        let event = SettingsChanged::new("sections.count", 42, stamp());
        assert_eq!(event.revision, 42);
    }
}

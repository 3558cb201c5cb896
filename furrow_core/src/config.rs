//! Validated runtime configuration
//!
//! The core does not parse configuration files. An external
//! configuration collaborator loads whatever format the deployment
//! uses and hands the core an already-deserialized [`RuntimeConfig`];
//! [`RuntimeConfig::validate`] is the gate: a failed validation
//! rejects the update and the previous settings stay in effect.

use crate::core::ModuleCategory;
use crate::error::{FurrowError, FurrowResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler enablement and base tick rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub base_rate_hz: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_rate_hz: 100.0,
        }
    }
}

/// Supervision deadlines and watchdog knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Deadline for each init/start/stop/shutdown call.
    pub lifecycle_timeout_ms: u64,
    pub watchdog_enabled: bool,
    /// Liveness sampling interval.
    pub watchdog_interval_ms: u64,
    /// A worker busy in one call longer than this is considered hung.
    pub hang_timeout_ms: u64,
    /// Release a hung module's resources instead of only reporting it.
    pub force_unload_on_hang: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            lifecycle_timeout_ms: 5_000,
            watchdog_enabled: true,
            watchdog_interval_ms: 250,
            hang_timeout_ms: 2_000,
            force_unload_on_hang: false,
        }
    }
}

impl LifecycleSettings {
    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_millis(self.hang_timeout_ms)
    }
}

/// Complete validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerSettings,
    pub lifecycle: LifecycleSettings,
    /// Category load-order table, earliest-loading first. Categories
    /// absent from the table load after the listed ones, in their
    /// default sequence.
    pub category_order: Vec<ModuleCategory>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            lifecycle: LifecycleSettings::default(),
            category_order: ModuleCategory::default_order().to_vec(),
        }
    }
}

impl RuntimeConfig {
    /// Check the configuration for internally inconsistent or
    /// out-of-range values. Callers keep their previous configuration
    /// when this fails.
    pub fn validate(&self) -> FurrowResult<()> {
        let rate = self.scheduler.base_rate_hz;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FurrowError::config(format!(
                "base_rate_hz must be positive, got {rate}"
            )));
        }
        if rate > 10_000.0 {
            return Err(FurrowError::config(format!(
                "base_rate_hz {rate} exceeds the 10 kHz tick ceiling"
            )));
        }
        if self.lifecycle.lifecycle_timeout_ms == 0 {
            return Err(FurrowError::config("lifecycle_timeout_ms must be non-zero"));
        }
        if self.lifecycle.watchdog_interval_ms == 0 || self.lifecycle.hang_timeout_ms == 0 {
            return Err(FurrowError::config(
                "watchdog_interval_ms and hang_timeout_ms must be non-zero",
            ));
        }
        if self.category_order.is_empty() {
            return Err(FurrowError::config("category_order must not be empty"));
        }
        for (i, category) in self.category_order.iter().enumerate() {
            if self.category_order[..i].contains(category) {
                return Err(FurrowError::config(format!(
                    "category '{category}' appears twice in category_order"
                )));
            }
        }
        Ok(())
    }

    /// Load-order tier index for a category: its position in the
    /// configured table, or after all listed ones (default sequence)
    /// when absent.
    pub fn tier_of(&self, category: ModuleCategory) -> usize {
        if let Some(at) = self.category_order.iter().position(|c| *c == category) {
            return at;
        }
        let fallback = ModuleCategory::default_order()
            .iter()
            .position(|c| *c == category)
            .unwrap_or(0);
        self.category_order.len() + fallback
    }
}

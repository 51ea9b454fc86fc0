//! Orchestration tuning knobs
//!
//! One struct carries every constant the key pool and batch scheduler need:
//! cooldown, active floor, batch size, attempt bounds and remote polling
//! limits. It is deserialized from the `[tuning]` config table and then
//! overlaid with environment variables.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variables recognised by [`Tuning::overlay_env`].
const ENV_COOLDOWN_MINUTES: &str = "COOLDOWN_MINUTES";
const ENV_MIN_ACTIVE_FLOOR: &str = "MIN_ACTIVE_FLOOR";
const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
const ENV_MAX_ATTEMPTS_PER_ITEM: &str = "MAX_ATTEMPTS_PER_ITEM";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Minutes a failed key must sit out before it is probed or reused.
    pub cooldown_minutes: u64,
    /// Active keys at or above this count skip recovery probing.
    pub min_active_floor: usize,
    /// Work items per batch; one key is assigned per batch.
    pub batch_size: usize,
    /// Default per-item attempt bound.
    pub max_attempts_per_item: u32,
    /// Per work type attempt bound, e.g. `comments = 4`.
    pub max_attempts_by_work_type: HashMap<String, u32>,
    /// Delay between remote run status polls.
    pub poll_interval_secs: u64,
    /// Total wait before a remote run is abandoned.
    pub max_poll_wait_secs: u64,
    /// Pause between a run finishing and fetching its dataset.
    pub result_settle_secs: u64,
    /// When set, sweep non-active keys before assignment if fewer than this
    /// many keys are active.
    pub prewarm_min_active: Option<usize>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            cooldown_minutes: 1,
            min_active_floor: 2,
            batch_size: 10,
            max_attempts_per_item: 2,
            max_attempts_by_work_type: HashMap::new(),
            poll_interval_secs: 5,
            max_poll_wait_secs: 300,
            result_settle_secs: 10,
            prewarm_min_active: None,
        }
    }
}

impl Tuning {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_wait(&self) -> Duration {
        Duration::from_secs(self.max_poll_wait_secs)
    }

    pub fn result_settle(&self) -> Duration {
        Duration::from_secs(self.result_settle_secs)
    }

    /// Attempt bound for a work type, falling back to `max_attempts_per_item`.
    pub fn max_attempts_for(&self, work_type: Option<&str>) -> u32 {
        work_type
            .and_then(|w| self.max_attempts_by_work_type.get(w).copied())
            .unwrap_or(self.max_attempts_per_item)
    }

    /// Overlay values from environment variables.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    pub fn overlay_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_COOLDOWN_MINUTES) {
            self.cooldown_minutes = parse_env(ENV_COOLDOWN_MINUTES, &v)?;
        }
        if let Some(v) = lookup(ENV_MIN_ACTIVE_FLOOR) {
            self.min_active_floor = parse_env(ENV_MIN_ACTIVE_FLOOR, &v)?;
        }
        if let Some(v) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_env(ENV_BATCH_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_ATTEMPTS_PER_ITEM) {
            self.max_attempts_per_item = parse_env(ENV_MAX_ATTEMPTS_PER_ITEM, &v)?;
        }
        Ok(())
    }

    /// Reject values that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".into()));
        }
        if self.max_attempts_per_item == 0 {
            return Err(Error::Config(
                "max_attempts_per_item must be greater than 0".into(),
            ));
        }
        if let Some((work_type, _)) = self
            .max_attempts_by_work_type
            .iter()
            .find(|(_, attempts)| **attempts == 0)
        {
            return Err(Error::Config(format!(
                "max_attempts_by_work_type.{work_type} must be greater than 0"
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.max_poll_wait_secs < self.poll_interval_secs {
            return Err(Error::Config(
                "max_poll_wait_secs must be at least poll_interval_secs".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got: {value}")))
}

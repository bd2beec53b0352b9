use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Artificial pause between a claim's read and its write.
///
/// Widens the race so weak isolation levels show their anomalies reliably instead of
/// serialising by accident. Zero by default, which makes every call deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RaceWindow {
    pub min: Duration,
    pub max: Duration,
}

impl RaceWindow {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Uniform jitter in `[min, max]`. The bounds are swapped if given in the wrong order.
    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let lo = self.min.as_micros() as u64;
        let hi = self.max.as_micros() as u64;
        Duration::from_micros(rand::rng().random_range(lo..=hi))
    }

    /// Sleeps for a sampled delay; returns immediately for a zero window.
    pub fn wait(&self) {
        if !self.is_zero() {
            std::thread::sleep(self.sample());
        }
    }
}

/// Settings shared by [`crate::ClaimCoordinator`] and [`crate::GroupPopulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub race_window: RaceWindow,
}

impl CoordinatorConfig {
    pub fn with_race_window(mut self, race_window: RaceWindow) -> Self {
        self.race_window = race_window;
        self
    }
}

/// Settings of a [`crate::store::memory::MemStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a commit waits for the commit lock before failing with a timeout.
    pub commit_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(5),
        }
    }
}

/// Shape of the concurrent races the conformance harness runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Concurrent callers per race. At least two.
    pub callers: usize,
    /// Upper bound of races per verification. "Exactly one winner" must hold in every
    /// race; "several winners" must be observed in at least one.
    pub max_runs: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            callers: 10,
            max_runs: 5,
        }
    }
}

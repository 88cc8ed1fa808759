use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::haversine_m;
use crate::models::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshGateParams {
    #[serde(with = "crate::config::duration_secs")]
    pub min_interval: Duration,
    pub min_distance_m: f64,
    /// Refresh regardless of movement once the last result is this old.
    #[serde(with = "crate::config::duration_secs")]
    pub max_staleness: Duration,
}

impl Default for RefreshGateParams {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(60),
            min_distance_m: 200.0,
            max_staleness: Duration::from_secs(600),
        }
    }
}

/// Shared "minimum elapsed time AND minimum moved distance" predicate.
///
/// Both the periodic timer and location updates consult the same gate, so a
/// refresh happens at most once per interval and only after real movement,
/// unless the last result has gone stale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefreshGate {
    params: RefreshGateParams,
    last: Option<(DateTime<Utc>, Coordinate)>,
}

impl RefreshGate {
    pub fn new(params: RefreshGateParams) -> Self {
        Self { params, last: None }
    }

    pub fn should_refresh(&self, now: DateTime<Utc>, at: Coordinate) -> bool {
        let Some((last_at, last_coord)) = self.last else {
            return true;
        };
        let elapsed = elapsed_since(now, last_at);
        if elapsed >= self.params.max_staleness {
            return true;
        }
        elapsed >= self.params.min_interval && haversine_m(last_coord, at) >= self.params.min_distance_m
    }

    pub fn mark(&mut self, now: DateTime<Utc>, at: Coordinate) {
        self.last = Some((now, at));
    }

    /// Checks the gate and records the refresh when it passes.
    pub fn try_pass(&mut self, now: DateTime<Utc>, at: Coordinate) -> bool {
        let pass = self.should_refresh(now, at);
        if pass {
            self.mark(now, at);
        }
        pass
    }
}

/// Time elapsed from `then` to `now`, zero if `then` is in the future.
pub fn elapsed_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// True when no previous trigger exists or `cooldown` has fully elapsed.
pub fn cooldown_elapsed(now: DateTime<Utc>, last: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    last.map_or(true, |then| elapsed_since(now, then) >= cooldown)
}

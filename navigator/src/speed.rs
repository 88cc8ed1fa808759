//! Speed and heading estimation from raw location samples.
//!
//! GPS-reported speed is preferred while fresh; otherwise a distance over time
//! estimate between consecutive samples is used. Both are snapped to zero
//! below a stop threshold and exponentially smoothed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{bearing_deg, haversine_m};
use crate::models::LocationSample;

const MPS_TO_KMH: f64 = 3.6;
/// Bounds on the gap between two samples for the fallback estimate.
const MIN_FALLBACK_GAP_S: f64 = 0.5;
const MAX_FALLBACK_GAP_S: f64 = 15.0;
/// Minimum movement before a bearing between samples is trusted as heading.
const MIN_HEADING_MOVE_M: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedParams {
    #[serde(with = "crate::config::duration_secs")]
    pub fresh_window: Duration,
    pub stop_threshold_kmh: f64,
    pub smoothing_alpha: f64,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            fresh_window: Duration::from_secs(5),
            stop_threshold_kmh: 0.8,
            smoothing_alpha: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedEstimate {
    pub speed_kmh: f64,
    /// Set only when GPS speed was rejected and distance/time substituted.
    pub fallback_kmh_used: Option<f64>,
}

/// Whether `sample` was captured within `window` of `now`.
pub fn is_fresh(sample: &LocationSample, now: DateTime<Utc>, window: Duration) -> bool {
    let age = (now - sample.timestamp).num_milliseconds().unsigned_abs();
    age <= window.as_millis() as u64
}

/// Compute the next smoothed speed from the current value and a new sample.
pub fn estimate(
    current_kmh: f64,
    sample: &LocationSample,
    previous: Option<&LocationSample>,
    now: DateTime<Utc>,
    params: &SpeedParams,
) -> SpeedEstimate {
    let mut fallback_kmh_used = None;

    let raw_kmh = if sample.has_valid_speed() && is_fresh(sample, now, params.fresh_window) {
        sample.speed_mps * MPS_TO_KMH
    } else if let Some(fallback) = previous.and_then(|prev| fallback_kmh(prev, sample)) {
        fallback_kmh_used = Some(fallback);
        fallback
    } else {
        0.0
    };

    let raw_kmh = snap_to_stop(raw_kmh, params.stop_threshold_kmh);
    let current_kmh = current_kmh.max(0.0);
    let alpha = params.smoothing_alpha.clamp(0.0, 1.0);
    let smoothed = alpha * raw_kmh + (1.0 - alpha) * current_kmh;

    SpeedEstimate {
        speed_kmh: snap_to_stop(smoothed, params.stop_threshold_kmh),
        fallback_kmh_used,
    }
}

fn fallback_kmh(previous: &LocationSample, current: &LocationSample) -> Option<f64> {
    let elapsed_s = (current.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
    if elapsed_s <= MIN_FALLBACK_GAP_S || elapsed_s >= MAX_FALLBACK_GAP_S {
        return None;
    }
    let distance_m = haversine_m(previous.coordinate, current.coordinate);
    Some(distance_m / elapsed_s * MPS_TO_KMH)
}

fn snap_to_stop(kmh: f64, stop_threshold_kmh: f64) -> f64 {
    if !kmh.is_finite() || kmh < stop_threshold_kmh {
        0.0
    } else {
        kmh
    }
}

/// Stateful wrapper that remembers the last sample, speed and heading.
#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    params: SpeedParams,
    current: SpeedEstimate,
    heading_deg: Option<f64>,
    last_sample: Option<LocationSample>,
}

impl SpeedEstimator {
    pub fn new(params: SpeedParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn update(&mut self, sample: &LocationSample, now: DateTime<Utc>) -> SpeedEstimate {
        self.current = estimate(
            self.current.speed_kmh,
            sample,
            self.last_sample.as_ref(),
            now,
            &self.params,
        );
        self.heading_deg = self.next_heading(sample);
        self.last_sample = Some(*sample);
        self.current
    }

    pub fn current(&self) -> SpeedEstimate {
        self.current
    }

    pub fn heading_deg(&self) -> Option<f64> {
        self.heading_deg
    }

    pub fn last_sample(&self) -> Option<&LocationSample> {
        self.last_sample.as_ref()
    }

    fn next_heading(&self, sample: &LocationSample) -> Option<f64> {
        let observed = if sample.has_valid_course() {
            Some(sample.course_deg.rem_euclid(360.0))
        } else {
            self.last_sample
                .filter(|prev| haversine_m(prev.coordinate, sample.coordinate) >= MIN_HEADING_MOVE_M)
                .map(|prev| bearing_deg(prev.coordinate, sample.coordinate))
        };

        match (self.heading_deg, observed) {
            (Some(current), Some(observed)) => {
                Some(smooth_angle(current, observed, self.params.smoothing_alpha))
            }
            (None, observed) => observed,
            (current, None) => current,
        }
    }
}

/// Exponential smoothing on the circle, taking the short way round.
fn smooth_angle(current: f64, observed: f64, alpha: f64) -> f64 {
    let delta = (observed - current + 540.0).rem_euclid(360.0) - 180.0;
    (current + alpha.clamp(0.0, 1.0) * delta).rem_euclid(360.0)
}

/// Heading rendered the way the dashboard shows it, e.g. "045°".
pub fn format_heading(heading_deg: f64) -> String {
    format!("{:03}°", heading_deg.round() as u32 % 360)
}

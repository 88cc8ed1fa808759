use chrono::{DateTime, Utc};

use crate::geometry::haversine_m;
use crate::models::{Coordinate, RainAvoidanceAlert};

/// Samples closer than this are considered the same place.
const SAME_SAMPLE_M: f64 = 1.0;

/// Where to ask for precipitation: the rider's position, then roughly a
/// quarter, half and the end of the route ahead, without near-duplicates.
pub fn sample_points(current: Coordinate, route: &[Coordinate]) -> Vec<Coordinate> {
    let mut samples = vec![current];
    if route.is_empty() {
        return samples;
    }

    let last = route.len() - 1;
    let mut indices = vec![last / 4, last / 2, last];
    indices.dedup();

    for idx in indices {
        let point = route[idx];
        if samples.iter().all(|s| haversine_m(*s, point) > SAME_SAMPLE_M) {
            samples.push(point);
        }
    }
    samples
}

/// Earliest predicted rain start that falls inside `[min_minutes, max_minutes]`.
pub fn earliest_in_window(predictions: &[Option<u32>], min_minutes: u32, max_minutes: u32) -> Option<u32> {
    predictions
        .iter()
        .flatten()
        .copied()
        .filter(|m| (min_minutes..=max_minutes).contains(m))
        .min()
}

pub fn alert_from_predictions(
    predictions: &[Option<u32>],
    min_minutes: u32,
    max_minutes: u32,
    now: DateTime<Utc>,
) -> Option<RainAvoidanceAlert> {
    earliest_in_window(predictions, min_minutes, max_minutes).map(|minutes_until_rain| RainAvoidanceAlert {
        minutes_until_rain,
        created_at: now,
    })
}

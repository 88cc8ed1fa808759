use crate::geometry::{haversine_m, nearest_index, path_length_m};
use crate::models::{Coordinate, RemainingRoute, RouteSummary};

/// Tracks the not-yet-ridden suffix of the active route.
///
/// The remaining route only ever shrinks: passed vertices are dropped and
/// never re-added, even if the rider turns back.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteProgressTracker {
    remaining_route: Vec<Coordinate>,
    remaining_distance_km: f64,
}

impl RouteProgressTracker {
    pub fn new(route: &RouteSummary) -> Self {
        Self {
            remaining_route: route.path.clone(),
            remaining_distance_km: (route.distance_m / 1000.0).max(0.0),
        }
    }

    pub fn update(&mut self, current: Coordinate) {
        if let Some(idx) = nearest_index(current, &self.remaining_route) {
            if idx > 0 {
                self.remaining_route.drain(..idx);
            }
        }
        self.remaining_distance_km = remaining_distance_km(current, &self.remaining_route);
    }

    pub fn remaining_route(&self) -> &[Coordinate] {
        &self.remaining_route
    }

    pub fn remaining_distance_km(&self) -> f64 {
        self.remaining_distance_km
    }

    pub fn snapshot(&self) -> RemainingRoute {
        RemainingRoute {
            path: self.remaining_route.clone(),
            distance_km: self.remaining_distance_km,
        }
    }
}

/// One-shot progress computation against a full route.
pub fn remaining_progress(current: Coordinate, route: &[Coordinate]) -> RemainingRoute {
    let start = nearest_index(current, route).unwrap_or(0);
    let path = route[start..].to_vec();
    let distance_km = remaining_distance_km(current, &path);
    RemainingRoute { path, distance_km }
}

fn remaining_distance_km(current: Coordinate, remaining: &[Coordinate]) -> f64 {
    let Some(first) = remaining.first() else {
        return 0.0;
    };
    let meters = path_length_m(remaining) + haversine_m(current, *first);
    (meters / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate { lat, lon }
    }

    fn route(path: Vec<Coordinate>) -> RouteSummary {
        RouteSummary {
            distance_m: path_length_m(&path),
            path,
            eta_minutes: 1,
            primary_instruction: String::new(),
            secondary_instruction: String::new(),
            next_distance_m: 0.0,
            transport: None,
            note: None,
        }
    }

    #[test]
    fn drops_passed_coordinates() {
        let path = vec![c(35.0, 139.0), c(35.0, 139.001), c(35.0, 139.002)];
        let total_km = path_length_m(&path) / 1000.0;

        let update = remaining_progress(c(35.0, 139.0012), &path);

        assert_eq!(update.path.len(), 2);
        assert!((update.path[0].lon - 139.001).abs() < 1e-6);
        assert!(update.distance_km > 0.0);
        assert!(update.distance_km < total_km);
    }

    #[test]
    fn tracker_never_regrows() {
        let mut tracker =
            RouteProgressTracker::new(&route(vec![c(35.0, 139.0), c(35.0, 139.001), c(35.0, 139.002)]));
        tracker.update(c(35.0, 139.0012));
        assert_eq!(tracker.remaining_route().len(), 2);

        // Riding back toward the start does not restore passed points.
        tracker.update(c(35.0, 138.9999));
        assert_eq!(tracker.remaining_route().len(), 2);
        assert_eq!(tracker.remaining_route()[0], c(35.0, 139.001));
    }

    #[test]
    fn remaining_length_is_non_increasing_riding_forward() {
        let path: Vec<_> = (0..=10).map(|i| c(35.0, 139.0 + i as f64 * 0.001)).collect();
        let mut tracker = RouteProgressTracker::new(&route(path));
        let mut previous_len = tracker.remaining_route().len();
        for step in 0..=40 {
            tracker.update(c(35.00002, 139.0 + step as f64 * 0.00025));
            let len = tracker.remaining_route().len();
            assert!(len <= previous_len);
            previous_len = len;
        }
        assert_eq!(previous_len, 1);
    }

    #[test]
    fn empty_route_has_zero_distance() {
        let update = remaining_progress(c(35.0, 139.0), &[]);
        assert!(update.path.is_empty());
        assert_eq!(update.distance_km, 0.0);
    }
}

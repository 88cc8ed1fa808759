//! Route candidate planner.
//!
//! Turns an unreliable directions provider into a dependable one by snapping
//! the destination, fanning out over transport types and small coordinate
//! offsets, discarding unsafe candidates and smoothing the winner.

pub mod candidates;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::geometry::{haversine_m, moving_average, path_length_m, thin};
use crate::models::{Coordinate, RouteMode, RouteSummary, TransportType};
use crate::providers::{AddressLookup, DirectionsProvider, ProviderRoute};

use candidates::{build_attempts, first_success, Attempt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerParams {
    /// Radii tried in order when snapping the destination.
    pub snap_radii_m: Vec<f64>,
    pub snap_keywords: Vec<String>,
    pub offset_distances_m: Vec<f64>,
    pub offset_bearings_deg: Vec<f64>,
    pub thin_separation_m: f64,
    pub smoothing_radius: usize,
    /// Case-insensitive substrings that mark a maneuver as stairs.
    pub stair_keywords: Vec<String>,
    /// Added to the distance of non-road candidates in flat mode.
    pub non_road_penalty_m: f64,
    pub cruising_speed_kmh: f64,
    /// Start and destination closer than this are treated as the same place.
    pub min_trip_m: f64,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            snap_radii_m: vec![120.0, 220.0],
            snap_keywords: Vec::new(),
            offset_distances_m: vec![20.0, 40.0, 80.0],
            offset_bearings_deg: vec![0.0, 90.0, 180.0, 270.0],
            thin_separation_m: 8.0,
            smoothing_radius: 1,
            stair_keywords: ["stairs", "stair", "steps", "staircase", "階段"]
                .into_iter()
                .map(String::from)
                .collect(),
            non_road_penalty_m: 5_000.0,
            cruising_speed_kmh: 15.0,
            min_trip_m: 5.0,
        }
    }
}

/// Outcome of a single [`RoutePlanner::plan`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteComputation {
    pub route: Option<RouteSummary>,
    pub failure_reason: Option<String>,
    pub used_snapped_destination: bool,
}

impl RouteComputation {
    fn failed(reason: impl Into<String>, used_snapped_destination: bool) -> Self {
        Self {
            route: None,
            failure_reason: Some(reason.into()),
            used_snapped_destination,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("no safe route found")]
    NoSafeRoute,
}

#[derive(Clone)]
pub struct RoutePlanner {
    directions: Arc<dyn DirectionsProvider>,
    lookup: Arc<dyn AddressLookup>,
    params: PlannerParams,
}

impl RoutePlanner {
    pub fn new(
        directions: Arc<dyn DirectionsProvider>,
        lookup: Arc<dyn AddressLookup>,
        params: PlannerParams,
    ) -> Self {
        Self {
            directions,
            lookup,
            params,
        }
    }

    pub async fn plan(
        &self,
        start: Coordinate,
        destination: Coordinate,
        label: &str,
        mode: RouteMode,
    ) -> RouteComputation {
        if haversine_m(start, destination) < self.params.min_trip_m {
            return RouteComputation::failed("start and destination are the same place", false);
        }

        let (target, used_snapped_destination) = match self.snap_destination(destination).await {
            Some(snapped) => (snapped, true),
            None => (destination, false),
        };

        let attempts = build_attempts(start, target, mode, &self.params);
        let total = attempts.len();
        debug!("planning towards {label:?} with {total} candidate attempts");

        let outcome = first_success(attempts, |attempt| self.evaluate(attempt, mode)).await;
        match outcome {
            Ok((attempt, route)) => {
                info!(
                    "route found via {:?} ({:?}): {:.0}m",
                    attempt.transport, attempt.kind, route.distance_m
                );
                RouteComputation {
                    route: Some(self.summarise(route, label)),
                    failure_reason: None,
                    used_snapped_destination,
                }
            }
            Err(last) => {
                let reason = last
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| AttemptError::NoSafeRoute.to_string());
                warn!("routing failed after {total} attempts: {reason}");
                RouteComputation::failed(reason, used_snapped_destination)
            }
        }
    }

    async fn snap_destination(&self, destination: Coordinate) -> Option<Coordinate> {
        for &radius in &self.params.snap_radii_m {
            match self
                .lookup
                .nearest_routable_point(destination, radius, &self.params.snap_keywords)
                .await
            {
                Ok(Some(snapped)) if haversine_m(destination, snapped) <= radius => {
                    debug!("destination snapped within {radius}m");
                    return Some(snapped);
                }
                Ok(_) => {}
                Err(err) => debug!("snapping within {radius}m failed: {err}"),
            }
        }
        None
    }

    async fn evaluate(&self, attempt: Attempt, mode: RouteMode) -> Result<(Attempt, ProviderRoute), AttemptError> {
        debug!("trying {:?} {:?}", attempt.transport, attempt.kind);
        let routes = self
            .directions
            .route(attempt.start, attempt.destination, attempt.transport, true)
            .await?;

        let safe: Vec<ProviderRoute> = routes.into_iter().filter(|r| self.is_safe(r)).collect();
        select_best(safe, mode, &self.params)
            .map(|route| (attempt, route))
            .ok_or(AttemptError::NoSafeRoute)
    }

    fn is_safe(&self, route: &ProviderRoute) -> bool {
        if route.path.len() < 2 || path_length_m(&route.path) <= 0.0 {
            return false;
        }
        !route
            .steps
            .iter()
            .any(|step| contains_keyword(&step.instruction, &self.params.stair_keywords))
    }

    fn summarise(&self, route: ProviderRoute, label: &str) -> RouteSummary {
        let path = post_process(&route.path, &self.params);
        let distance_m = if route.distance_m > 0.0 {
            route.distance_m
        } else {
            path_length_m(&path)
        };

        let steps = &route.steps;
        let primary = steps.get(1).or_else(|| steps.first());
        let primary_instruction = primary
            .map(|s| s.instruction.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Follow the route to {label}"));
        let secondary_instruction = steps
            .get(2)
            .map(|s| s.instruction.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Destination: {label}"));
        let next_distance_m = steps.first().map_or(distance_m, |s| s.distance_m);

        RouteSummary {
            path,
            distance_m,
            eta_minutes: eta_minutes(distance_m, self.params.cruising_speed_kmh),
            primary_instruction,
            secondary_instruction,
            next_distance_m,
            transport: Some(route.transport),
            note: None,
        }
    }
}

fn contains_keyword(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords.iter().any(|k| text.contains(&k.to_lowercase()))
}

/// Pick the best alternate for the ride mode.
fn select_best(routes: Vec<ProviderRoute>, mode: RouteMode, params: &PlannerParams) -> Option<ProviderRoute> {
    match mode {
        RouteMode::Flat => routes.into_iter().min_by(|a, b| {
            flat_score(a, params).total_cmp(&flat_score(b, params))
        }),
        // Walking first, then the longest: more distance stands in for more climbing.
        RouteMode::HillClimb => routes.into_iter().max_by(|a, b| {
            let a_key = (a.transport == TransportType::Walking, a.distance_m);
            let b_key = (b.transport == TransportType::Walking, b.distance_m);
            a_key.0.cmp(&b_key.0).then(a_key.1.total_cmp(&b_key.1))
        }),
    }
}

fn flat_score(route: &ProviderRoute, params: &PlannerParams) -> f64 {
    let penalty = if route.transport.is_road_like() {
        0.0
    } else {
        params.non_road_penalty_m
    };
    route.distance_m + penalty
}

/// Thin, smooth, then pin both ends back to the thinned endpoints.
pub fn post_process(path: &[Coordinate], params: &PlannerParams) -> Vec<Coordinate> {
    let thinned = thin(path, params.thin_separation_m);
    let mut smoothed = moving_average(&thinned, params.smoothing_radius);
    if let (Some(first), Some(last)) = (thinned.first(), thinned.last()) {
        if let Some(head) = smoothed.first_mut() {
            *head = *first;
        }
        if let Some(tail) = smoothed.last_mut() {
            *tail = *last;
        }
    }
    smoothed
}

pub fn eta_minutes(distance_m: f64, speed_kmh: f64) -> u32 {
    if speed_kmh <= 0.0 {
        return 0;
    }
    let minutes = (distance_m / 1000.0) / speed_kmh * 60.0;
    minutes.ceil().max(1.0) as u32
}

/// Two-point route used when planning fails and the destination is close.
/// Returns `None` when the straight line would be longer than `max_m`.
pub fn straight_line_fallback(
    start: Coordinate,
    destination: Coordinate,
    label: &str,
    max_m: f64,
    cruising_speed_kmh: f64,
) -> Option<RouteSummary> {
    let distance_m = haversine_m(start, destination);
    if distance_m <= 0.0 || distance_m >= max_m {
        return None;
    }
    Some(RouteSummary {
        path: vec![start, destination],
        distance_m,
        eta_minutes: eta_minutes(distance_m, cruising_speed_kmh),
        primary_instruction: format!("Head straight to {label}"),
        secondary_instruction: format!("Destination: {label}"),
        next_distance_m: distance_m,
        transport: None,
        note: Some(format!(
            "No road route found; showing a direct line for the last {distance_m:.0}m"
        )),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::future::BoxFuture;

    use super::*;
    use crate::providers::{ProviderResult, RouteStep};

    type Script = Box<dyn Fn(Coordinate, Coordinate, TransportType) -> ProviderResult<Vec<ProviderRoute>> + Send + Sync>;

    struct ScriptedDirections {
        script: Script,
        calls: Mutex<Vec<(Coordinate, Coordinate, TransportType)>>,
    }

    impl ScriptedDirections {
        fn new(
            script: impl Fn(Coordinate, Coordinate, TransportType) -> ProviderResult<Vec<ProviderRoute>>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().map(|c| c.len()).unwrap_or_default()
        }
    }

    impl DirectionsProvider for ScriptedDirections {
        fn route(
            &self,
            start: Coordinate,
            destination: Coordinate,
            transport: TransportType,
            _alternates: bool,
        ) -> BoxFuture<'_, ProviderResult<Vec<ProviderRoute>>> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((start, destination, transport));
            }
            let result = (self.script)(start, destination, transport);
            Box::pin(async move { result })
        }
    }

    struct FixedLookup(Option<Coordinate>);

    impl AddressLookup for FixedLookup {
        fn nearest_routable_point<'a>(
            &'a self,
            _coordinate: Coordinate,
            _radius_m: f64,
            _keywords: &'a [String],
        ) -> BoxFuture<'a, ProviderResult<Option<Coordinate>>> {
            let point = self.0;
            Box::pin(async move { Ok(point) })
        }
    }

    fn route_between(start: Coordinate, end: Coordinate, transport: TransportType, steps: &[&str]) -> ProviderRoute {
        let path: Vec<Coordinate> = (0..=20).map(|i| start.interpolate(end, i as f64 / 20.0)).collect();
        ProviderRoute {
            distance_m: path_length_m(&path),
            path,
            expected_travel_time_s: 600.0,
            steps: steps
                .iter()
                .map(|s| RouteStep {
                    instruction: s.to_string(),
                    distance_m: 150.0,
                })
                .collect(),
            transport,
        }
    }

    fn planner(directions: Arc<ScriptedDirections>, snapped: Option<Coordinate>) -> RoutePlanner {
        RoutePlanner::new(directions, Arc::new(FixedLookup(snapped)), PlannerParams::default())
    }

    const START: Coordinate = Coordinate::new(35.0, 139.0);
    const DEST: Coordinate = Coordinate::new(35.01, 139.01);

    #[tokio::test]
    async fn first_candidate_success_is_used() {
        let directions = ScriptedDirections::new(|s, d, t| Ok(vec![route_between(s, d, t, &["Depart", "Turn left onto Bay St"])]));
        let result = planner(directions.clone(), None).plan(START, DEST, "Pier", RouteMode::Flat).await;

        let route = result.route.expect("route");
        assert_eq!(directions.call_count(), 1);
        assert_eq!(route.transport, Some(TransportType::Automobile));
        assert_eq!(route.primary_instruction, "Turn left onto Bay St");
        assert_eq!(route.secondary_instruction, "Destination: Pier");
        assert!(!result.used_snapped_destination);
        assert_eq!(route.path.first(), Some(&START));
        assert_eq!(route.path.last(), Some(&DEST));
    }

    #[tokio::test]
    async fn stair_routes_are_never_returned() {
        let directions = ScriptedDirections::new(|s, d, t| {
            if t == TransportType::Automobile {
                Ok(vec![route_between(s, d, t, &["Depart", "Take the STAIRS down"])])
            } else {
                Ok(vec![
                    route_between(s, d, t, &["Depart", "Climb the steps"]),
                    route_between(s, d, t, &["Depart", "Continue on the path"]),
                ])
            }
        });
        let result = planner(directions, None).plan(START, DEST, "Pier", RouteMode::Flat).await;

        let route = result.route.expect("route");
        assert_eq!(route.transport, Some(TransportType::Walking));
        assert_eq!(route.primary_instruction, "Continue on the path");
    }

    #[tokio::test]
    async fn falls_through_to_start_offsets() {
        let directions = ScriptedDirections::new(|s, d, t| {
            if s == START {
                Err(ProviderError::NoDirections)
            } else {
                Ok(vec![route_between(s, d, t, &[])])
            }
        });
        let result = planner(directions.clone(), None).plan(START, DEST, "Pier", RouteMode::Flat).await;

        assert!(result.route.is_some());
        // 2 transports x 13 destination-side attempts, then the first start offset.
        assert_eq!(directions.call_count(), 27);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_reason_and_snapping() {
        let snapped = Coordinate::new(35.0101, 139.0101);
        let directions = ScriptedDirections::new(|_, _, _| Err(ProviderError::Timeout));
        let result = planner(directions.clone(), Some(snapped)).plan(START, DEST, "Pier", RouteMode::Flat).await;

        assert!(result.route.is_none());
        assert_eq!(result.failure_reason.as_deref(), Some("request timed out"));
        assert!(result.used_snapped_destination);
        let calls = directions.calls.lock().expect("calls");
        assert_eq!(calls[0].1, snapped);
    }

    #[tokio::test]
    async fn snapped_point_outside_radius_is_ignored() {
        let far = Coordinate::new(35.1, 139.1);
        let directions = ScriptedDirections::new(|s, d, t| Ok(vec![route_between(s, d, t, &[])]));
        let result = planner(directions, Some(far)).plan(START, DEST, "Pier", RouteMode::Flat).await;
        assert!(!result.used_snapped_destination);
    }

    #[tokio::test]
    async fn coincident_start_and_destination_short_circuits() {
        let directions = ScriptedDirections::new(|s, d, t| Ok(vec![route_between(s, d, t, &[])]));
        let result = planner(directions.clone(), None).plan(START, START, "Here", RouteMode::Flat).await;
        assert!(result.route.is_none());
        assert!(result.failure_reason.is_some());
        assert_eq!(directions.call_count(), 0);
    }

    #[tokio::test]
    async fn zero_length_routes_are_discarded() {
        let directions = ScriptedDirections::new(|s, _, t| {
            Ok(vec![ProviderRoute {
                path: vec![s, s],
                distance_m: 0.0,
                expected_travel_time_s: 0.0,
                steps: Vec::new(),
                transport: t,
            }])
        });
        let result = planner(directions, None).plan(START, DEST, "Pier", RouteMode::Flat).await;
        assert_eq!(result.failure_reason.as_deref(), Some("no safe route found"));
    }

    #[test]
    fn flat_mode_penalises_non_road_routes() {
        let params = PlannerParams::default();
        let mut walking = route_between(START, DEST, TransportType::Walking, &[]);
        walking.distance_m = 1_000.0;
        let mut driving = route_between(START, DEST, TransportType::Automobile, &[]);
        driving.distance_m = 3_000.0;

        let best = select_best(vec![walking, driving], RouteMode::Flat, &params).expect("best");
        assert_eq!(best.transport, TransportType::Automobile);
    }

    #[test]
    fn hill_climb_prefers_walking_then_longer() {
        let params = PlannerParams::default();
        let mut short_walk = route_between(START, DEST, TransportType::Walking, &[]);
        short_walk.distance_m = 1_000.0;
        let mut long_walk = short_walk.clone();
        long_walk.distance_m = 1_400.0;
        let mut long_drive = route_between(START, DEST, TransportType::Automobile, &[]);
        long_drive.distance_m = 9_000.0;

        let best = select_best(vec![short_walk, long_drive, long_walk], RouteMode::HillClimb, &params).expect("best");
        assert_eq!(best.transport, TransportType::Walking);
        assert_eq!(best.distance_m, 1_400.0);
    }

    #[test]
    fn straight_line_only_for_short_gaps() {
        let near = Coordinate::new(35.001, 139.0);
        let fallback = straight_line_fallback(START, near, "Cafe", 300.0, 15.0).expect("fallback");
        assert_eq!(fallback.path, vec![START, near]);
        assert!(fallback.note.is_some());
        assert_eq!(fallback.eta_minutes, 1);

        assert!(straight_line_fallback(START, DEST, "Pier", 300.0, 15.0).is_none());
    }

    #[test]
    fn eta_uses_cruising_speed() {
        assert_eq!(eta_minutes(15_000.0, 15.0), 60);
        assert_eq!(eta_minutes(10.0, 15.0), 1);
    }
}

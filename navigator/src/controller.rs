//! Event-driven navigation state machine.
//!
//! [`SessionController`] performs no I/O. Commands, location samples, timer
//! ticks and finished background work are fed in with an explicit `now`, and
//! the work to launch in response comes back as a list of [`Effect`]s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::NavigationPolicy;
use crate::error::{NavigatorError, ProviderError};
use crate::geometry::{distance_from_route, haversine_m};
use crate::models::{
    Coordinate, Destination, LocationSample, NavigationPhase, NavigationSnapshot, RouteMode,
    Spot, WarningLevel, WeatherSnapshot,
};
use crate::planner::{straight_line_fallback, RouteComputation};
use crate::providers::spots::CuratedSpotProvider;
use crate::rain::{alert_from_predictions, sample_points};
use crate::refresh::cooldown_elapsed;
use crate::ride_log::RideLog;
use crate::session::{NavigationSession, TaskKind};
use crate::speed::is_fresh;

/// Road risk at or above which riders are told the surface may be slippery.
const SLIPPERY_ROAD_RISK: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPurpose {
    /// First plan for a newly chosen destination.
    Initial,
    /// The rider wandered off before confirming the pending route.
    PreviewReplan,
    /// The rider drifted off the active route.
    Reroute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub generation: u64,
    pub purpose: PlanPurpose,
    pub start: Coordinate,
    pub destination: Coordinate,
    pub label: String,
    pub mode: RouteMode,
}

/// Background work requested by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Plan(PlanRequest),
    FetchWeather {
        generation: u64,
        coordinate: Coordinate,
    },
    RefreshRain {
        generation: u64,
        samples: Vec<Coordinate>,
    },
    SearchSpots {
        generation: u64,
        origin: Coordinate,
        query: Option<String>,
        debounce: Duration,
    },
    /// Stop any running task of this kind.
    Abort(TaskKind),
    RideStarted {
        at: DateTime<Utc>,
    },
}

/// Completed background work, routed back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Planned {
        request: PlanRequest,
        computation: RouteComputation,
    },
    Weather {
        generation: u64,
        result: Result<WeatherSnapshot, ProviderError>,
    },
    /// One prediction per sample that answered; failed samples are left out.
    Rain {
        generation: u64,
        predictions: Vec<Option<u32>>,
    },
    Spots {
        generation: u64,
        origin: Coordinate,
        query: Option<String>,
        result: Result<Vec<Spot>, ProviderError>,
    },
}

/// Periodic schedules driven by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Weather,
    Spots,
}

/// Result of ending a ride.
#[derive(Debug, Clone, PartialEq)]
pub struct EndedRide {
    pub log: Option<RideLog>,
    pub effects: Vec<Effect>,
}

pub struct SessionController {
    policy: NavigationPolicy,
    session: NavigationSession,
}

impl SessionController {
    pub fn new(policy: NavigationPolicy) -> Self {
        let session = NavigationSession::new(&policy);
        Self { policy, session }
    }

    pub fn policy(&self) -> &NavigationPolicy {
        &self.policy
    }

    pub fn session(&self) -> &NavigationSession {
        &self.session
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        self.session.snapshot()
    }

    fn require_location(&self) -> Result<Coordinate, NavigatorError> {
        self.session
            .current_coordinate()
            .ok_or(NavigatorError::LocationUnavailable)
    }

    fn invalid(&self, action: &'static str) -> NavigatorError {
        NavigatorError::InvalidTransition {
            action,
            phase: self.session.phase(),
        }
    }

    /// Choose a destination and start planning towards it.
    pub fn select_destination(
        &mut self,
        destination: Destination,
        mode: RouteMode,
    ) -> Result<Vec<Effect>, NavigatorError> {
        if self.session.phase() == NavigationPhase::Active {
            return Err(self.invalid("select a destination"));
        }
        let start = self.require_location()?;

        let generation = self.session.begin_planning(destination.clone(), mode);
        info!("planning to {:?} ({mode:?}), generation {generation}", destination.label);
        Ok(vec![
            Effect::Abort(TaskKind::Plan),
            Effect::Abort(TaskKind::Rain),
            Effect::Plan(PlanRequest {
                generation,
                purpose: PlanPurpose::Initial,
                start,
                destination: destination.coordinate,
                label: destination.label,
                mode,
            }),
        ])
    }

    /// Plan again towards the destination kept after a failed plan.
    pub fn retry(&mut self) -> Result<Vec<Effect>, NavigatorError> {
        if self.session.phase() != NavigationPhase::Idle {
            return Err(self.invalid("retry"));
        }
        let destination = self
            .session
            .destination()
            .cloned()
            .ok_or(NavigatorError::NoDestination)?;
        self.select_destination(destination, self.session.mode())
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>, NavigatorError> {
        if self.session.phase() != NavigationPhase::Previewing {
            return Err(self.invalid("confirm"));
        }
        if !self.session.activate(now) {
            return Err(self.invalid("confirm"));
        }
        info!("navigation started");

        let mut effects = vec![Effect::Abort(TaskKind::Plan), Effect::RideStarted { at: now }];
        effects.extend(self.rain_refresh(now, true));
        Ok(effects)
    }

    pub fn cancel(&mut self) -> Result<Vec<Effect>, NavigatorError> {
        let phase = self.session.phase();
        let cancellable = matches!(phase, NavigationPhase::Planning | NavigationPhase::Previewing)
            || (phase == NavigationPhase::Idle && self.session.destination().is_some());
        if !cancellable {
            return Err(self.invalid("cancel"));
        }

        self.session.cancel();
        info!("route preview cancelled");
        Ok(vec![Effect::Abort(TaskKind::Plan), Effect::Abort(TaskKind::Rain)])
    }

    pub fn end(&mut self, now: DateTime<Utc>) -> Result<EndedRide, NavigatorError> {
        if self.session.phase() != NavigationPhase::Active {
            return Err(self.invalid("end navigation"));
        }

        let weather_summary = self
            .session
            .weather()
            .map(|w| format!("{} / {} {:.0}m/s", w.condition, w.wind_compass(), w.wind_speed))
            .unwrap_or_default();
        let log = self
            .session
            .end()
            .map(|recorder| recorder.finish(now, weather_summary));
        info!("navigation ended");

        Ok(EndedRide {
            log,
            effects: vec![
                Effect::Abort(TaskKind::Plan),
                Effect::Abort(TaskKind::Rain),
                Effect::Abort(TaskKind::Spots),
            ],
        })
    }

    /// Search nearby spots, superseding any search still in flight.
    pub fn search_spots(&mut self, query: Option<String>) -> Result<Vec<Effect>, NavigatorError> {
        let origin = self.require_location()?;
        let query = query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty());
        let generation = self.session.begin_spot_search();
        Ok(vec![Effect::SearchSpots {
            generation,
            origin,
            query,
            debounce: self.policy.search_debounce,
        }])
    }

    /// Handle one location sample, in arrival order.
    pub fn on_location(&mut self, sample: LocationSample, now: DateTime<Utc>) -> Vec<Effect> {
        let coordinate = sample.coordinate;
        self.session.speed.update(&sample, now);

        let mut effects = Vec::new();
        if is_fresh(&sample, now, self.policy.speed.fresh_window) {
            self.session.track(coordinate);
            effects.extend(self.check_drift(coordinate, now));
        }
        effects.extend(self.check_preview_origin(coordinate, now));
        effects.extend(self.weather_refresh(coordinate, now));
        effects.extend(self.rain_refresh(now, false));
        effects.extend(self.spot_refresh(coordinate, now));
        effects
    }

    pub fn on_timer(&mut self, timer: Timer, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(coordinate) = self.session.current_coordinate() else {
            return Vec::new();
        };
        match timer {
            Timer::Weather => {
                let mut effects: Vec<Effect> = self.weather_refresh(coordinate, now).into_iter().collect();
                effects.extend(self.rain_refresh(now, false));
                effects
            }
            Timer::Spots => self.spot_refresh(coordinate, now).into_iter().collect(),
        }
    }

    fn check_drift(&mut self, coordinate: Coordinate, now: DateTime<Utc>) -> Option<Effect> {
        if self.session.phase() != NavigationPhase::Active || self.session.is_planning() {
            return None;
        }
        let route = self.session.active_route()?;
        let drift = distance_from_route(coordinate, &route.path)?;
        if drift <= self.policy.off_route_threshold_m {
            return None;
        }
        if !cooldown_elapsed(now, self.session.last_reroute_at(), self.policy.reroute_cooldown) {
            debug!("off route by {drift:.0}m, reroute still cooling down");
            return None;
        }

        let destination = self.session.destination()?.clone();
        let mode = self.session.mode();
        let generation = self.session.begin_reroute(now);
        info!("off route by {drift:.0}m, rerouting (generation {generation})");
        Some(Effect::Plan(PlanRequest {
            generation,
            purpose: PlanPurpose::Reroute,
            start: coordinate,
            destination: destination.coordinate,
            label: destination.label,
            mode,
        }))
    }

    fn check_preview_origin(&mut self, coordinate: Coordinate, now: DateTime<Utc>) -> Option<Effect> {
        if self.session.phase() != NavigationPhase::Previewing || self.session.is_planning() {
            return None;
        }
        let origin = self.session.pending_origin()?;
        let moved = haversine_m(origin, coordinate);
        if moved <= self.policy.preview_replan_distance_m {
            return None;
        }
        if !cooldown_elapsed(now, self.session.last_reroute_at(), self.policy.reroute_cooldown) {
            debug!("moved {moved:.0}m from the preview origin, replan still cooling down");
            return None;
        }

        let destination = self.session.destination()?.clone();
        let mode = self.session.mode();
        let generation = self.session.begin_reroute(now);
        info!("moved {moved:.0}m since the preview was planned, replanning");
        Some(Effect::Plan(PlanRequest {
            generation,
            purpose: PlanPurpose::PreviewReplan,
            start: coordinate,
            destination: destination.coordinate,
            label: destination.label,
            mode,
        }))
    }

    fn weather_refresh(&mut self, coordinate: Coordinate, now: DateTime<Utc>) -> Option<Effect> {
        if !self.session.weather_gate.try_pass(now, coordinate) {
            return None;
        }
        let generation = self.session.begin_weather_fetch();
        Some(Effect::FetchWeather {
            generation,
            coordinate,
        })
    }

    fn rain_refresh(&mut self, now: DateTime<Utc>, force: bool) -> Option<Effect> {
        let current = self.session.current_coordinate()?;
        let route = self.session.route_ahead()?;
        if !force && !cooldown_elapsed(now, self.session.last_rain_refresh_at(), self.policy.rain_cooldown) {
            return None;
        }
        let samples = sample_points(current, route);
        let generation = self.session.begin_rain_refresh(now);
        Some(Effect::RefreshRain { generation, samples })
    }

    fn spot_refresh(&mut self, coordinate: Coordinate, now: DateTime<Utc>) -> Option<Effect> {
        if !self.session.spot_gate.try_pass(now, coordinate) {
            return None;
        }
        let generation = self.session.begin_spot_search();
        Some(Effect::SearchSpots {
            generation,
            origin: coordinate,
            query: None,
            debounce: Duration::ZERO,
        })
    }

    /// Apply finished background work. Stale results are dropped here and
    /// nowhere else.
    pub fn apply(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> Vec<Effect> {
        match outcome {
            TaskOutcome::Planned { request, computation } => self.apply_plan(request, computation, now),
            TaskOutcome::Weather { generation, result } => {
                self.apply_weather(generation, result);
                Vec::new()
            }
            TaskOutcome::Rain {
                generation,
                predictions,
            } => {
                self.apply_rain(generation, &predictions, now);
                Vec::new()
            }
            TaskOutcome::Spots {
                generation,
                origin,
                query,
                result,
            } => {
                self.apply_spots(generation, origin, query.as_deref(), result);
                Vec::new()
            }
        }
    }

    fn apply_plan(&mut self, request: PlanRequest, computation: RouteComputation, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.session.generations().is_current(TaskKind::Plan, request.generation) {
            debug!("discarding superseded plan (generation {})", request.generation);
            return Vec::new();
        }
        self.session.finish_planning();

        let reason = computation
            .failure_reason
            .unwrap_or_else(|| ProviderError::NoDirections.to_string());

        match request.purpose {
            PlanPurpose::Initial => {
                let route = computation.route.or_else(|| {
                    straight_line_fallback(
                        request.start,
                        request.destination,
                        &request.label,
                        self.policy.straight_line_max_m,
                        self.policy.planner.cruising_speed_kmh,
                    )
                });
                match route {
                    Some(route) => {
                        info!("route ready: {:.0}m, eta {}", route.distance_m, route.eta_string());
                        self.session.set_pending(route, request.start);
                        self.rain_refresh(now, true).into_iter().collect()
                    }
                    None => {
                        warn!("routing failed: {reason}");
                        self.session.fail_planning(format!("routing failed: {reason}"));
                        Vec::new()
                    }
                }
            }
            PlanPurpose::PreviewReplan => {
                if self.session.phase() != NavigationPhase::Previewing {
                    return Vec::new();
                }
                match computation.route {
                    Some(route) => {
                        self.session.set_pending(route, request.start);
                        self.rain_refresh(now, true).into_iter().collect()
                    }
                    None => {
                        warn!("preview replan failed: {reason}");
                        self.session.set_warning(Some(format!("route update failed: {reason}")));
                        Vec::new()
                    }
                }
            }
            PlanPurpose::Reroute => {
                if self.session.phase() != NavigationPhase::Active {
                    return Vec::new();
                }
                match computation.route {
                    Some(route) => {
                        info!("rerouted: {:.0}m remaining", route.distance_m);
                        self.session.replace_active(route);
                        self.rain_refresh(now, true).into_iter().collect()
                    }
                    None => {
                        warn!("reroute failed: {reason}");
                        self.session.set_warning(Some(format!("reroute failed: {reason}")));
                        Vec::new()
                    }
                }
            }
        }
    }

    fn apply_weather(&mut self, generation: u64, result: Result<WeatherSnapshot, ProviderError>) {
        if !self.session.generations().is_current(TaskKind::Weather, generation) {
            return;
        }
        match result {
            Ok(snapshot) => {
                let warning = weather_warning(&snapshot);
                debug!("weather: {} wind {:.1}m/s", snapshot.condition, snapshot.wind_speed);
                self.session.set_weather(snapshot, warning);
            }
            Err(err) => warn!("weather refresh failed: {err}"),
        }
    }

    fn apply_rain(&mut self, generation: u64, predictions: &[Option<u32>], now: DateTime<Utc>) {
        if !self.session.generations().is_current(TaskKind::Rain, generation) {
            return;
        }
        if predictions.is_empty() {
            warn!("rain refresh failed at every sample, keeping previous alert");
            return;
        }
        let alert = alert_from_predictions(
            predictions,
            self.policy.rain_window_min_minutes,
            self.policy.rain_window_max_minutes,
            now,
        );
        if let Some(alert) = &alert {
            info!("rain expected in {} minutes", alert.minutes_until_rain);
        }
        self.session.set_rain_alert(alert);
    }

    fn apply_spots(
        &mut self,
        generation: u64,
        origin: Coordinate,
        query: Option<&str>,
        result: Result<Vec<Spot>, ProviderError>,
    ) {
        if !self.session.generations().is_current(TaskKind::Spots, generation) {
            debug!("discarding superseded spot search (generation {generation})");
            return;
        }
        let curated = || CuratedSpotProvider::nearby(origin, self.policy.spot_radius_km, query);
        let spots = match result {
            Ok(spots) if !spots.is_empty() => spots,
            Ok(_) => curated(),
            Err(err) => {
                warn!("spot search failed: {err}");
                if !self.session.spots().is_empty() {
                    return;
                }
                curated()
            }
        };
        self.session.set_spots(spots);
    }
}

/// Passive warning text for the rider, or `None` when conditions are calm.
pub fn weather_warning(snapshot: &WeatherSnapshot) -> Option<String> {
    match snapshot.warning {
        WarningLevel::Warning => Some(format!(
            "Strong wind warning: {:.0}m/s from {}",
            snapshot.wind_speed,
            snapshot.wind_compass()
        )),
        WarningLevel::Advisory => Some(format!(
            "Wind advisory: {:.0}m/s from {}",
            snapshot.wind_speed,
            snapshot.wind_compass()
        )),
        WarningLevel::None if snapshot.road_risk >= SLIPPERY_ROAD_RISK => {
            Some("Roads may be slippery, ride carefully".to_string())
        }
        WarningLevel::None => None,
    }
}

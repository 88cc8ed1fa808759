//! Navigation session state and its transitions.
//!
//! [`NavigationSession`] is the only mutable navigation state. Every change
//! goes through one of its transition methods, and observers only ever see
//! the immutable [`NavigationSnapshot`] it produces.

use chrono::{DateTime, Utc};

use crate::config::NavigationPolicy;
use crate::models::{
    Coordinate, Destination, NavigationPhase, NavigationSnapshot, RainAvoidanceAlert, RouteMode,
    RouteSummary, Spot, WeatherSnapshot,
};
use crate::progress::RouteProgressTracker;
use crate::refresh::RefreshGate;
use crate::ride_log::RideRecorder;
use crate::speed::{format_heading, SpeedEstimator};

/// Kinds of background work, each with its own generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Plan,
    Weather,
    Rain,
    Spots,
}

/// Monotonic sequence numbers, one per [`TaskKind`]. A task result is only
/// applied while its generation is still the latest for its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generations {
    plan: u64,
    weather: u64,
    rain: u64,
    spots: u64,
}

impl Generations {
    fn slot(&mut self, kind: TaskKind) -> &mut u64 {
        match kind {
            TaskKind::Plan => &mut self.plan,
            TaskKind::Weather => &mut self.weather,
            TaskKind::Rain => &mut self.rain,
            TaskKind::Spots => &mut self.spots,
        }
    }

    pub fn current(&self, kind: TaskKind) -> u64 {
        match kind {
            TaskKind::Plan => self.plan,
            TaskKind::Weather => self.weather,
            TaskKind::Rain => self.rain,
            TaskKind::Spots => self.spots,
        }
    }

    pub fn bump(&mut self, kind: TaskKind) -> u64 {
        let slot = self.slot(kind);
        *slot += 1;
        *slot
    }

    pub fn is_current(&self, kind: TaskKind, generation: u64) -> bool {
        self.current(kind) == generation
    }
}

#[derive(Debug, Clone)]
pub struct NavigationSession {
    phase: NavigationPhase,
    destination: Option<Destination>,
    mode: RouteMode,
    pending_route: Option<RouteSummary>,
    /// Where the rider was when the pending route was computed.
    pending_origin: Option<Coordinate>,
    active_route: Option<RouteSummary>,
    progress: Option<RouteProgressTracker>,
    rain_alert: Option<RainAvoidanceAlert>,
    weather: Option<WeatherSnapshot>,
    warning_message: Option<String>,
    spots: Vec<Spot>,
    failure_reason: Option<String>,
    planning_in_flight: bool,
    generations: Generations,
    last_reroute_at: Option<DateTime<Utc>>,
    last_rain_refresh_at: Option<DateTime<Utc>>,
    pub(crate) speed: SpeedEstimator,
    pub(crate) weather_gate: RefreshGate,
    pub(crate) spot_gate: RefreshGate,
    recorder: Option<RideRecorder>,
}

impl NavigationSession {
    pub fn new(policy: &NavigationPolicy) -> Self {
        Self {
            phase: NavigationPhase::Idle,
            destination: None,
            mode: RouteMode::default(),
            pending_route: None,
            pending_origin: None,
            active_route: None,
            progress: None,
            rain_alert: None,
            weather: None,
            warning_message: None,
            spots: Vec::new(),
            failure_reason: None,
            planning_in_flight: false,
            generations: Generations::default(),
            last_reroute_at: None,
            last_rain_refresh_at: None,
            speed: SpeedEstimator::new(policy.speed),
            weather_gate: RefreshGate::new(policy.weather_gate),
            spot_gate: RefreshGate::new(policy.spot_gate),
            recorder: None,
        }
    }

    pub fn phase(&self) -> NavigationPhase {
        self.phase
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn mode(&self) -> RouteMode {
        self.mode
    }

    pub fn pending_route(&self) -> Option<&RouteSummary> {
        self.pending_route.as_ref()
    }

    pub fn pending_origin(&self) -> Option<Coordinate> {
        self.pending_origin
    }

    pub fn active_route(&self) -> Option<&RouteSummary> {
        self.active_route.as_ref()
    }

    pub fn progress(&self) -> Option<&RouteProgressTracker> {
        self.progress.as_ref()
    }

    pub fn rain_alert(&self) -> Option<&RainAvoidanceAlert> {
        self.rain_alert.as_ref()
    }

    pub fn weather(&self) -> Option<&WeatherSnapshot> {
        self.weather.as_ref()
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_planning(&self) -> bool {
        self.planning_in_flight
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    pub fn last_reroute_at(&self) -> Option<DateTime<Utc>> {
        self.last_reroute_at
    }

    pub fn last_rain_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.last_rain_refresh_at
    }

    pub fn current_coordinate(&self) -> Option<Coordinate> {
        self.speed.last_sample().map(|s| s.coordinate)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// The path rain sampling should follow: what is left of the active
    /// route, otherwise the pending one.
    pub fn route_ahead(&self) -> Option<&[Coordinate]> {
        match (&self.progress, &self.pending_route) {
            (Some(progress), _) => Some(progress.remaining_route()),
            (None, Some(pending)) => Some(&pending.path),
            (None, None) => None,
        }
    }

    /// Enter `Planning` for a new destination. Supersedes any plan in flight
    /// and any rain alert or rain refresh tied to the previous route.
    pub fn begin_planning(&mut self, destination: Destination, mode: RouteMode) -> u64 {
        self.phase = NavigationPhase::Planning;
        self.destination = Some(destination);
        self.mode = mode;
        self.pending_route = None;
        self.pending_origin = None;
        self.failure_reason = None;
        self.rain_alert = None;
        self.last_rain_refresh_at = None;
        self.last_reroute_at = None;
        self.planning_in_flight = true;
        self.generations.bump(TaskKind::Rain);
        self.generations.bump(TaskKind::Plan)
    }

    /// Launch a replan for the current destination without changing phase.
    /// Preview replans and reroutes share one cooldown clock.
    pub fn begin_reroute(&mut self, now: DateTime<Utc>) -> u64 {
        self.last_reroute_at = Some(now);
        self.planning_in_flight = true;
        self.generations.bump(TaskKind::Plan)
    }

    pub fn finish_planning(&mut self) {
        self.planning_in_flight = false;
    }

    pub fn set_pending(&mut self, route: RouteSummary, origin: Coordinate) {
        self.pending_route = Some(route);
        self.pending_origin = Some(origin);
        self.active_route = None;
        self.progress = None;
        self.failure_reason = None;
        self.phase = NavigationPhase::Previewing;
    }

    /// Initial planning failed with no usable fallback: back to idle, but the
    /// destination is kept so the rider can retry.
    pub fn fail_planning(&mut self, reason: String) {
        self.phase = NavigationPhase::Idle;
        self.pending_route = None;
        self.pending_origin = None;
        self.failure_reason = Some(reason);
        self.planning_in_flight = false;
    }

    /// Promote the pending route to active and start recording the ride.
    /// Returns `false` when there is nothing to promote.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        let Some(route) = self.pending_route.take() else {
            return false;
        };
        self.pending_origin = None;
        self.progress = Some(RouteProgressTracker::new(&route));
        self.active_route = Some(route);
        self.phase = NavigationPhase::Active;
        self.last_reroute_at = None;
        // A preview replan still in flight can never land now.
        self.planning_in_flight = false;
        self.generations.bump(TaskKind::Plan);

        let mut recorder = RideRecorder::start(now);
        if let Some(current) = self.current_coordinate() {
            recorder.record(current);
        }
        self.recorder = Some(recorder);
        true
    }

    /// Swap the active route for a reroute result.
    pub fn replace_active(&mut self, route: RouteSummary) {
        let mut progress = RouteProgressTracker::new(&route);
        if let Some(current) = self.current_coordinate() {
            progress.update(current);
        }
        self.progress = Some(progress);
        self.active_route = Some(route);
    }

    pub fn cancel(&mut self) {
        self.phase = NavigationPhase::Idle;
        self.destination = None;
        self.pending_route = None;
        self.pending_origin = None;
        self.failure_reason = None;
        self.planning_in_flight = false;
        self.rain_alert = None;
        self.generations.bump(TaskKind::Plan);
        self.generations.bump(TaskKind::Rain);
    }

    /// Leave active navigation. Invalidates all route-bound background work
    /// and hands back the ride recorder, if one was running.
    pub fn end(&mut self) -> Option<RideRecorder> {
        self.phase = NavigationPhase::Idle;
        self.destination = None;
        self.pending_route = None;
        self.pending_origin = None;
        self.active_route = None;
        self.progress = None;
        self.rain_alert = None;
        self.failure_reason = None;
        self.planning_in_flight = false;
        self.last_reroute_at = None;
        self.last_rain_refresh_at = None;
        self.generations.bump(TaskKind::Plan);
        self.generations.bump(TaskKind::Rain);
        self.generations.bump(TaskKind::Spots);
        self.recorder.take()
    }

    pub fn track(&mut self, current: Coordinate) {
        if let Some(progress) = self.progress.as_mut() {
            progress.update(current);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(current);
        }
    }

    pub fn begin_weather_fetch(&mut self) -> u64 {
        self.generations.bump(TaskKind::Weather)
    }

    pub fn begin_rain_refresh(&mut self, now: DateTime<Utc>) -> u64 {
        self.last_rain_refresh_at = Some(now);
        self.generations.bump(TaskKind::Rain)
    }

    pub fn begin_spot_search(&mut self) -> u64 {
        self.generations.bump(TaskKind::Spots)
    }

    pub fn set_weather(&mut self, weather: WeatherSnapshot, warning: Option<String>) {
        self.weather = Some(weather);
        self.warning_message = warning;
    }

    pub fn set_warning(&mut self, warning: Option<String>) {
        self.warning_message = warning;
    }

    pub fn set_rain_alert(&mut self, alert: Option<RainAvoidanceAlert>) {
        self.rain_alert = alert;
    }

    pub fn set_spots(&mut self, spots: Vec<Spot>) {
        self.spots = spots;
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        let speed = self.speed.current();
        NavigationSnapshot {
            phase: self.phase,
            destination: self.destination.clone(),
            mode: self.mode,
            pending_route: self.pending_route.clone(),
            active_route: self.active_route.clone(),
            remaining: self.progress.as_ref().map(RouteProgressTracker::snapshot),
            speed_kmh: speed.speed_kmh,
            fallback_speed_kmh: speed.fallback_kmh_used,
            heading: self.speed.heading_deg().map(format_heading),
            rain_alert: self.rain_alert,
            weather: self.weather.clone(),
            warning_message: self.warning_message.clone(),
            spots: self.spots.clone(),
            failure_reason: self.failure_reason.clone(),
            planning_in_flight: self.planning_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationSample;

    fn route(points: &[(f64, f64)]) -> RouteSummary {
        RouteSummary {
            path: points.iter().map(|&(lat, lon)| Coordinate::new(lat, lon)).collect(),
            distance_m: 200.0,
            eta_minutes: 1,
            primary_instruction: "Go".into(),
            secondary_instruction: "Arrive".into(),
            next_distance_m: 100.0,
            transport: None,
            note: None,
        }
    }

    fn destination() -> Destination {
        Destination {
            coordinate: Coordinate::new(35.0, 139.002),
            label: "Pier".into(),
        }
    }

    #[test]
    fn pending_and_active_are_exclusive() {
        let mut session = NavigationSession::new(&NavigationPolicy::default());
        let generation = session.begin_planning(destination(), RouteMode::Flat);
        assert_eq!(generation, 1);
        assert_eq!(session.phase(), NavigationPhase::Planning);

        session.finish_planning();
        session.set_pending(route(&[(35.0, 139.0), (35.0, 139.002)]), Coordinate::new(35.0, 139.0));
        assert!(session.pending_route().is_some());
        assert!(session.active_route().is_none());

        assert!(session.activate(Utc::now()));
        assert!(session.pending_route().is_none());
        assert!(session.active_route().is_some());
        assert!(session.progress().is_some());
        assert!(session.is_recording());
        assert_eq!(session.phase(), NavigationPhase::Active);
        assert!(!session.activate(Utc::now()));
    }

    #[test]
    fn end_invalidates_route_bound_work() {
        let mut session = NavigationSession::new(&NavigationPolicy::default());
        session.begin_planning(destination(), RouteMode::Flat);
        session.set_pending(route(&[(35.0, 139.0), (35.0, 139.002)]), Coordinate::new(35.0, 139.0));
        session.activate(Utc::now());
        let rain = session.begin_rain_refresh(Utc::now());
        let spots = session.begin_spot_search();

        let recorder = session.end();
        assert!(recorder.is_some());
        assert_eq!(session.phase(), NavigationPhase::Idle);
        assert!(session.destination().is_none());
        assert!(!session.generations().is_current(TaskKind::Rain, rain));
        assert!(!session.generations().is_current(TaskKind::Spots, spots));
        assert!(session.snapshot().remaining.is_none());
    }

    #[test]
    fn failed_planning_keeps_destination() {
        let mut session = NavigationSession::new(&NavigationPolicy::default());
        session.begin_planning(destination(), RouteMode::HillClimb);
        session.fail_planning("routing failed: network offline".into());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, NavigationPhase::Idle);
        assert_eq!(snapshot.destination, Some(destination()));
        assert_eq!(snapshot.mode, RouteMode::HillClimb);
        assert_eq!(snapshot.failure_reason.as_deref(), Some("routing failed: network offline"));
        assert!(!snapshot.planning_in_flight);
    }

    #[test]
    fn replacing_the_active_route_resets_progress() {
        let mut session = NavigationSession::new(&NavigationPolicy::default());
        let now = Utc::now();
        session
            .speed
            .update(&LocationSample::new(Coordinate::new(35.0, 139.0012), -1.0, -1.0, now), now);
        session.begin_planning(destination(), RouteMode::Flat);
        session.set_pending(
            route(&[(35.0, 139.0), (35.0, 139.001), (35.0, 139.002)]),
            Coordinate::new(35.0, 139.0),
        );
        session.activate(now);
        session.track(Coordinate::new(35.0, 139.0012));
        assert_eq!(session.progress().map(|p| p.remaining_route().len()), Some(2));

        session.replace_active(route(&[(35.001, 139.0012), (35.001, 139.002), (35.0, 139.003)]));
        let remaining = session.progress().map(|p| p.remaining_route().to_vec()).unwrap_or_default();
        assert_eq!(remaining.len(), 3);
        assert_eq!(session.route_ahead().map(<[Coordinate]>::len), Some(3));
    }

    #[test]
    fn generations_are_per_kind() {
        let mut generations = Generations::default();
        let plan = generations.bump(TaskKind::Plan);
        generations.bump(TaskKind::Weather);
        assert!(generations.is_current(TaskKind::Plan, plan));
        generations.bump(TaskKind::Plan);
        assert!(!generations.is_current(TaskKind::Plan, plan));
        assert_eq!(generations.current(TaskKind::Weather), 1);
    }
}

//! Tokio actor that owns the [`SessionController`].
//!
//! Commands, location samples, timer ticks and finished background tasks all
//! arrive on channels and are handled one at a time by a single task, so the
//! controller never sees interleaved mutations. Effects become spawned tasks
//! whose results come back through the outcome queue; every transition is
//! published as a [`NavigationSnapshot`] on a watch channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::NavigationPolicy;
use crate::controller::{Effect, PlanRequest, SessionController, TaskOutcome, Timer};
use crate::error::NavigatorError;
use crate::models::{Destination, LocationSample, NavigationSnapshot, RideSummary, RouteMode};
use crate::planner::RoutePlanner;
use crate::providers::{LocationProvider, Providers};
use crate::ride_log::{RideLog, RideLogSyncResult};
use crate::session::TaskKind;

const COMMAND_QUEUE: usize = 32;
const LOCATION_QUEUE: usize = 256;
const MIN_TIMER_PERIOD: Duration = Duration::from_secs(1);

type Reply<T> = oneshot::Sender<Result<T, NavigatorError>>;

enum Command {
    SelectDestination {
        destination: Destination,
        mode: RouteMode,
        reply: Reply<NavigationSnapshot>,
    },
    Confirm {
        reply: Reply<NavigationSnapshot>,
    },
    Cancel {
        reply: Reply<NavigationSnapshot>,
    },
    Retry {
        reply: Reply<NavigationSnapshot>,
    },
    End {
        reply: Reply<Option<RideSummary>>,
    },
    SearchSpots {
        query: Option<String>,
        reply: Reply<NavigationSnapshot>,
    },
}

/// Cloneable front door to a running navigation session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    locations: mpsc::Sender<LocationSample>,
    snapshots: watch::Receiver<NavigationSnapshot>,
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, NavigatorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| NavigatorError::RuntimeClosed)?;
        response.await.map_err(|_| NavigatorError::RuntimeClosed)?
    }

    pub async fn select_destination(
        &self,
        destination: Destination,
        mode: RouteMode,
    ) -> Result<NavigationSnapshot, NavigatorError> {
        self.request(|reply| Command::SelectDestination {
            destination,
            mode,
            reply,
        })
        .await
    }

    pub async fn confirm(&self) -> Result<NavigationSnapshot, NavigatorError> {
        self.request(|reply| Command::Confirm { reply }).await
    }

    pub async fn cancel(&self) -> Result<NavigationSnapshot, NavigatorError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    pub async fn retry(&self) -> Result<NavigationSnapshot, NavigatorError> {
        self.request(|reply| Command::Retry { reply }).await
    }

    /// Ends navigation and returns the ride summary when a ride was recorded.
    pub async fn end(&self) -> Result<Option<RideSummary>, NavigatorError> {
        self.request(|reply| Command::End { reply }).await
    }

    pub async fn search_spots(&self, query: Option<String>) -> Result<NavigationSnapshot, NavigatorError> {
        self.request(|reply| Command::SearchSpots { query, reply }).await
    }

    pub async fn push_location(&self, sample: LocationSample) -> Result<(), NavigatorError> {
        self.locations
            .send(sample)
            .await
            .map_err(|_| NavigatorError::RuntimeClosed)
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationSnapshot> {
        self.snapshots.clone()
    }
}

struct NavigationRuntime {
    controller: SessionController,
    providers: Providers,
    planner: RoutePlanner,
    location: Option<Arc<dyn LocationProvider>>,
    tasks: HashMap<TaskKind, AbortHandle>,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
    snapshots: watch::Sender<NavigationSnapshot>,
}

/// Start a navigation session on the current tokio runtime.
///
/// When a location provider is given and authorizes, its samples feed the
/// session alongside anything pushed through [`SessionHandle::push_location`].
pub fn spawn(
    policy: NavigationPolicy,
    providers: Providers,
    location: Option<Arc<dyn LocationProvider>>,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (location_tx, location_rx) = mpsc::channel(LOCATION_QUEUE);
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let controller = SessionController::new(policy);
    let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());
    let planner = RoutePlanner::new(
        providers.directions.clone(),
        providers.lookup.clone(),
        controller.policy().planner.clone(),
    );

    if let Some(provider) = &location {
        if provider.authorize() {
            provider.start(location_tx.clone());
        } else {
            warn!("location provider not authorized, waiting for pushed samples");
        }
    }

    let runtime = NavigationRuntime {
        controller,
        providers,
        planner,
        location,
        tasks: HashMap::new(),
        outcomes: outcome_tx,
        snapshots: snapshot_tx,
    };
    tokio::spawn(runtime.run(command_rx, location_rx, outcome_rx));

    SessionHandle {
        commands: command_tx,
        locations: location_tx,
        snapshots: snapshot_rx,
    }
}

impl NavigationRuntime {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut locations: mpsc::Receiver<LocationSample>,
        mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>,
    ) {
        let policy = self.controller.policy();
        let mut weather_timer = tokio::time::interval(policy.weather_timer_period.max(MIN_TIMER_PERIOD));
        let mut spot_timer = tokio::time::interval(policy.spot_timer_period.max(MIN_TIMER_PERIOD));
        weather_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        spot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("navigation session started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(sample) = locations.recv() => {
                    let effects = self.controller.on_location(sample, Utc::now());
                    self.dispatch(effects);
                    self.publish();
                }
                Some(outcome) = outcomes.recv() => {
                    let effects = self.controller.apply(outcome, Utc::now());
                    self.dispatch(effects);
                    self.publish();
                }
                _ = weather_timer.tick() => {
                    let effects = self.controller.on_timer(Timer::Weather, Utc::now());
                    self.dispatch(effects);
                }
                _ = spot_timer.tick() => {
                    let effects = self.controller.on_timer(Timer::Spots, Utc::now());
                    self.dispatch(effects);
                }
            }
        }

        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        if let Some(provider) = &self.location {
            provider.stop();
        }
        info!("navigation session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectDestination {
                destination,
                mode,
                reply,
            } => {
                let result = self.controller.select_destination(destination, mode);
                self.respond(result, reply);
            }
            Command::Confirm { reply } => {
                let result = self.controller.confirm(Utc::now());
                self.respond(result, reply);
            }
            Command::Cancel { reply } => {
                let result = self.controller.cancel();
                self.respond(result, reply);
            }
            Command::Retry { reply } => {
                let result = self.controller.retry();
                self.respond(result, reply);
            }
            Command::SearchSpots { query, reply } => {
                let result = self.controller.search_spots(query);
                self.respond(result, reply);
            }
            Command::End { reply } => {
                let result = self.controller.end(Utc::now()).map(|ended| {
                    self.dispatch(ended.effects);
                    ended.log.and_then(|log| self.finish_ride(log))
                });
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    /// Launch the effects of a command, publish, and answer with the new snapshot.
    fn respond(&mut self, result: Result<Vec<Effect>, NavigatorError>, reply: Reply<NavigationSnapshot>) {
        let result = result.map(|effects| {
            self.dispatch(effects);
            self.publish()
        });
        if let Err(err) = &result {
            debug!("command rejected: {err}");
        }
        let _ = reply.send(result);
    }

    fn publish(&self) -> NavigationSnapshot {
        let next = self.controller.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        next
    }

    fn finish_ride(&self, log: RideLog) -> Option<RideSummary> {
        let summary = match log.summary() {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!("could not summarise ride: {err}");
                None
            }
        };

        let sink = self.providers.ride_log.clone();
        tokio::spawn(async move {
            match sink.on_ride_end(log).await {
                RideLogSyncResult::Synced => info!("ride log synced"),
                RideLogSyncResult::Skipped(reason) => debug!("ride log sync skipped: {reason}"),
                RideLogSyncResult::Failed(reason) => warn!("ride log sync failed: {reason}"),
            }
        });
        summary
    }

    /// Run `task` as the only live task of its kind.
    fn spawn_task(&mut self, kind: TaskKind, task: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        if let Some(previous) = self.tasks.insert(kind, handle.abort_handle()) {
            previous.abort();
        }
    }

    fn dispatch(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Plan(request) => self.spawn_plan(request),
                Effect::FetchWeather {
                    generation,
                    coordinate,
                } => {
                    let weather = self.providers.weather.clone();
                    let outcomes = self.outcomes.clone();
                    self.spawn_task(TaskKind::Weather, async move {
                        let result = weather.forecast(coordinate).await;
                        let _ = outcomes.send(TaskOutcome::Weather { generation, result });
                    });
                }
                Effect::RefreshRain { generation, samples } => {
                    let weather = self.providers.weather.clone();
                    let outcomes = self.outcomes.clone();
                    self.spawn_task(TaskKind::Rain, async move {
                        let forecasts = join_all(samples.iter().map(|s| weather.forecast(*s))).await;
                        let predictions = forecasts
                            .into_iter()
                            .filter_map(|forecast| match forecast {
                                Ok(snapshot) => Some(snapshot.precipitation_start_minutes),
                                Err(err) => {
                                    debug!("rain sample failed: {err}");
                                    None
                                }
                            })
                            .collect();
                        let _ = outcomes.send(TaskOutcome::Rain {
                            generation,
                            predictions,
                        });
                    });
                }
                Effect::SearchSpots {
                    generation,
                    origin,
                    query,
                    debounce,
                } => {
                    let spots = self.providers.spots.clone();
                    let outcomes = self.outcomes.clone();
                    let radius_km = self.controller.policy().spot_radius_km;
                    self.spawn_task(TaskKind::Spots, async move {
                        if !debounce.is_zero() {
                            tokio::time::sleep(debounce).await;
                        }
                        let result = spots.search(origin, radius_km, query.as_deref()).await;
                        let _ = outcomes.send(TaskOutcome::Spots {
                            generation,
                            origin,
                            query,
                            result,
                        });
                    });
                }
                Effect::Abort(kind) => {
                    if let Some(task) = self.tasks.remove(&kind) {
                        task.abort();
                    }
                }
                Effect::RideStarted { at } => self.providers.ride_log.on_ride_start(at),
            }
        }
    }

    fn spawn_plan(&mut self, request: PlanRequest) {
        let planner = self.planner.clone();
        let outcomes = self.outcomes.clone();
        self.spawn_task(TaskKind::Plan, async move {
            let computation = planner
                .plan(request.start, request.destination, &request.label, request.mode)
                .await;
            let _ = outcomes.send(TaskOutcome::Planned { request, computation });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::DateTime;
    use futures::future::BoxFuture;

    use super::*;
    use crate::error::ProviderError;
    use crate::models::{Coordinate, NavigationPhase, Spot, TransportType, WarningLevel, WeatherSnapshot};
    use crate::providers::{
        AddressLookup, DirectionsProvider, ProviderResult, ProviderRoute, RideLogSink, RouteStep, SpotProvider,
        WeatherProvider,
    };

    struct LineDirections {
        reachable: bool,
    }

    impl DirectionsProvider for LineDirections {
        fn route(
            &self,
            start: Coordinate,
            destination: Coordinate,
            transport: TransportType,
            _alternates: bool,
        ) -> BoxFuture<'_, ProviderResult<Vec<ProviderRoute>>> {
            let reachable = self.reachable;
            Box::pin(async move {
                if !reachable {
                    return Err(ProviderError::Offline);
                }
                let path: Vec<Coordinate> = (0..=10).map(|i| start.interpolate(destination, i as f64 / 10.0)).collect();
                Ok(vec![ProviderRoute {
                    distance_m: crate::geometry::path_length_m(&path),
                    path,
                    expected_travel_time_s: 300.0,
                    steps: vec![RouteStep {
                        instruction: "Head east".into(),
                        distance_m: 100.0,
                    }],
                    transport,
                }])
            })
        }
    }

    struct NoLookup;

    impl AddressLookup for NoLookup {
        fn nearest_routable_point<'a>(
            &'a self,
            _coordinate: Coordinate,
            _radius_m: f64,
            _keywords: &'a [String],
        ) -> BoxFuture<'a, ProviderResult<Option<Coordinate>>> {
            Box::pin(async { Ok(None) })
        }
    }

    struct RainyWeather;

    impl WeatherProvider for RainyWeather {
        fn forecast(&self, _coordinate: Coordinate) -> BoxFuture<'_, ProviderResult<WeatherSnapshot>> {
            Box::pin(async {
                Ok(WeatherSnapshot {
                    timestamp: Utc::now(),
                    condition: "light rain".into(),
                    wind_speed: 3.0,
                    wind_direction: 90.0,
                    road_risk: 0.3,
                    precipitation_start_minutes: Some(40),
                    warning: WarningLevel::None,
                })
            })
        }
    }

    struct EmptySpots;

    impl SpotProvider for EmptySpots {
        fn search<'a>(
            &'a self,
            _origin: Coordinate,
            _radius_km: f64,
            _query: Option<&'a str>,
        ) -> BoxFuture<'a, ProviderResult<Vec<Spot>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[derive(Default)]
    struct CountingSink {
        started: AtomicUsize,
        ended: Mutex<Vec<RideLog>>,
    }

    impl RideLogSink for CountingSink {
        fn on_ride_start(&self, _started_at: DateTime<Utc>) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_ride_end(&self, log: RideLog) -> BoxFuture<'_, RideLogSyncResult> {
            Box::pin(async move {
                if let Ok(mut ended) = self.ended.lock() {
                    ended.push(log);
                }
                RideLogSyncResult::Synced
            })
        }
    }

    fn providers(reachable: bool, sink: Arc<CountingSink>) -> Providers {
        Providers {
            directions: Arc::new(LineDirections { reachable }),
            lookup: Arc::new(NoLookup),
            weather: Arc::new(RainyWeather),
            spots: Arc::new(EmptySpots),
            ride_log: sink,
        }
    }

    fn sample(lat: f64, lon: f64) -> LocationSample {
        LocationSample::new(Coordinate::new(lat, lon), 4.0, 90.0, Utc::now())
    }

    async fn wait_for(
        handle: &SessionHandle,
        predicate: impl FnMut(&NavigationSnapshot) -> bool,
    ) -> NavigationSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("runtime stopped");
        snapshot.clone()
    }

    fn pier() -> Destination {
        Destination {
            coordinate: Coordinate::new(35.63, 139.79),
            label: "Odaiba".into(),
        }
    }

    #[tokio::test]
    async fn plan_confirm_and_end_a_ride() {
        let sink = Arc::new(CountingSink::default());
        let handle = spawn(NavigationPolicy::default(), providers(true, sink.clone()), None);

        handle.push_location(sample(35.62, 139.78)).await.expect("push");
        wait_for(&handle, |s| s.speed_kmh > 0.0).await;

        let snapshot = handle.select_destination(pier(), RouteMode::Flat).await.expect("select");
        assert_eq!(snapshot.phase, NavigationPhase::Planning);

        let previewing = wait_for(&handle, |s| s.phase == NavigationPhase::Previewing).await;
        assert!(previewing.pending_route.is_some());

        let active = handle.confirm().await.expect("confirm");
        assert_eq!(active.phase, NavigationPhase::Active);
        assert_eq!(sink.started.load(Ordering::SeqCst), 1);

        let alerted = wait_for(&handle, |s| s.rain_alert.is_some()).await;
        assert_eq!(alerted.rain_alert.map(|a| a.minutes_until_rain), Some(40));

        handle.push_location(sample(35.625, 139.785)).await.expect("push");
        wait_for(&handle, |s| s.remaining.as_ref().is_some_and(|r| r.path.len() < 11)).await;

        let summary = handle.end().await.expect("end").expect("ride summary");
        assert_eq!(summary.path.len(), 2);
        assert!(!summary.gpx_base64.is_empty());
        assert_eq!(handle.snapshot().phase, NavigationPhase::Idle);

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.ended.lock().map(|e| e.is_empty()).unwrap_or(true) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("ride log delivered");
    }

    #[tokio::test]
    async fn unreachable_far_destination_fails_and_can_retry() {
        let handle = spawn(
            NavigationPolicy::default(),
            providers(false, Arc::new(CountingSink::default())),
            None,
        );
        handle.push_location(sample(35.62, 139.78)).await.expect("push");
        wait_for(&handle, |s| s.speed_kmh > 0.0).await;

        handle.select_destination(pier(), RouteMode::Flat).await.expect("select");
        let failed = wait_for(&handle, |s| s.failure_reason.is_some()).await;
        assert_eq!(failed.phase, NavigationPhase::Idle);
        assert_eq!(failed.failure_reason.as_deref(), Some("routing failed: network offline"));
        assert_eq!(failed.destination, Some(pier()));

        let retrying = handle.retry().await.expect("retry");
        assert_eq!(retrying.phase, NavigationPhase::Planning);
        assert!(retrying.failure_reason.is_none());
    }

    #[tokio::test]
    async fn commands_are_validated() {
        let handle = spawn(
            NavigationPolicy::default(),
            providers(true, Arc::new(CountingSink::default())),
            None,
        );
        assert!(matches!(
            handle.select_destination(pier(), RouteMode::Flat).await,
            Err(NavigatorError::LocationUnavailable)
        ));
        assert!(matches!(
            handle.confirm().await,
            Err(NavigatorError::InvalidTransition { .. })
        ));
        assert!(matches!(handle.retry().await, Err(NavigatorError::NoDestination)));
    }

    #[tokio::test]
    async fn empty_spot_search_falls_back_to_curated_list() {
        let handle = spawn(
            NavigationPolicy::default(),
            providers(true, Arc::new(CountingSink::default())),
            None,
        );
        handle.push_location(sample(35.63, 139.78)).await.expect("push");
        let with_spots = wait_for(&handle, |s| !s.spots.is_empty()).await;
        assert_eq!(with_spots.spots[0].name, "Odaiba Seaside Park");

        handle.search_spots(Some("cycling".into())).await.expect("search");
        let cycling = wait_for(&handle, |s| s.spots.iter().all(|spot| spot.tags.iter().any(|t| t == "cycling"))).await;
        assert!(!cycling.spots.is_empty());
    }
}

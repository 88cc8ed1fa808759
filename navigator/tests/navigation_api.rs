use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::Request,
};
use futures::future::BoxFuture;
use hyper::StatusCode;
use navigator::{
    config::NavigationPolicy,
    create_router,
    error::ProviderError,
    models::{Coordinate, NavigationPhase, NavigationSnapshot, RideSummary, Spot, TransportType, WeatherSnapshot},
    providers::{
        openweather::DisabledWeather, spots::CuratedSpotProvider, AddressLookup, DirectionsProvider,
        ProviderResult, ProviderRoute, Providers, RouteStep,
    },
    ride_log::TracingRideLogSink,
    runtime::{self, SessionHandle},
    AppState,
};
use serde_json::json;
use tower::ServiceExt;

struct StraightDirections;

impl DirectionsProvider for StraightDirections {
    fn route(
        &self,
        start: Coordinate,
        destination: Coordinate,
        transport: TransportType,
        _alternates: bool,
    ) -> BoxFuture<'_, ProviderResult<Vec<ProviderRoute>>> {
        Box::pin(async move {
            if transport != TransportType::Automobile {
                return Err(ProviderError::NoDirections);
            }
            let path: Vec<Coordinate> = (0..=8).map(|i| start.interpolate(destination, i as f64 / 8.0)).collect();
            Ok(vec![ProviderRoute {
                distance_m: navigator::geometry::path_length_m(&path),
                path,
                expected_travel_time_s: 600.0,
                steps: vec![
                    RouteStep {
                        instruction: "Head north".into(),
                        distance_m: 200.0,
                    },
                    RouteStep {
                        instruction: "Turn right onto Harbor Rd".into(),
                        distance_m: 600.0,
                    },
                ],
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

fn test_session() -> SessionHandle {
    let providers = Providers {
        directions: Arc::new(StraightDirections),
        lookup: Arc::new(NoLookup),
        weather: Arc::new(DisabledWeather),
        spots: Arc::new(CuratedSpotProvider),
        ride_log: Arc::new(TracingRideLogSink),
    };
    runtime::spawn(NavigationPolicy::default(), providers, None)
}

fn test_app(session: SessionHandle) -> axum::Router {
    create_router(AppState { session })
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(lat: f64, lon: f64) -> serde_json::Value {
    json!({
        "coordinate": {"lat": lat, "lon": lon},
        "speed_mps": 5.0,
        "course_deg": 0.0,
        "timestamp": chrono::Utc::now(),
    })
}

async fn wait_for(session: &SessionHandle, predicate: impl FnMut(&NavigationSnapshot) -> bool) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out")
        .expect("runtime stopped");
}

#[tokio::test]
async fn snapshot_starts_idle() {
    let app = test_app(test_session());
    let request = Request::builder().uri("/api/navigation").body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot: NavigationSnapshot = read_json(response).await;
    assert_eq!(snapshot.phase, NavigationPhase::Idle);
    assert!(snapshot.active_route.is_none());
}

#[tokio::test]
async fn destination_without_location_is_a_conflict() {
    let app = test_app(test_session());
    let response = app
        .oneshot(post(
            "/api/navigation/destination",
            json!({"coordinate": {"lat": 35.64, "lon": 139.78}, "label": "Pier"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_coordinates_are_rejected() {
    let app = test_app(test_session());
    let response = app
        .oneshot(post("/api/navigation/location", location(135.0, 139.0)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn navigate_from_preview_to_ride_summary() {
    let session = test_session();
    let app = test_app(session.clone());

    let response = app
        .clone()
        .oneshot(post("/api/navigation/location", location(35.62, 139.78)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_for(&session, |s| s.speed_kmh > 0.0).await;

    let response = app
        .clone()
        .oneshot(post(
            "/api/navigation/destination",
            json!({"coordinate": {"lat": 35.64, "lon": 139.78}, "label": "Pier", "mode": "flat"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let planning: NavigationSnapshot = read_json(response).await;
    assert_eq!(planning.phase, NavigationPhase::Planning);

    wait_for(&session, |s| s.phase == NavigationPhase::Previewing).await;
    let preview = session.snapshot().pending_route.expect("pending route");
    assert_eq!(preview.primary_instruction, "Turn right onto Harbor Rd");
    assert_eq!(preview.transport, Some(TransportType::Automobile));

    let response = app
        .clone()
        .oneshot(post("/api/navigation/confirm", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let active: NavigationSnapshot = read_json(response).await;
    assert_eq!(active.phase, NavigationPhase::Active);
    assert!(active.pending_route.is_none());

    app.clone()
        .oneshot(post("/api/navigation/location", location(35.63, 139.78)))
        .await
        .unwrap();
    wait_for(&session, |s| s.remaining.as_ref().is_some_and(|r| r.path.len() < 9)).await;

    let response = app
        .clone()
        .oneshot(post("/api/navigation/end", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: Option<RideSummary> = read_json(response).await;
    let summary = summary.expect("ride summary");
    assert_eq!(summary.path.len(), 2);
    assert!(summary.distance_km > 1.0);

    let response = app
        .oneshot(post("/api/navigation/end", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn spot_search_uses_curated_catalogue() {
    let session = test_session();
    let app = test_app(session.clone());
    app.clone()
        .oneshot(post("/api/navigation/location", location(35.63, 139.78)))
        .await
        .unwrap();
    wait_for(&session, |s| s.speed_kmh > 0.0).await;

    let response = app
        .oneshot(post("/api/spots/search", json!({"query": "wakasu"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    wait_for(&session, |s| s.spots.len() == 1).await;
    let spots: Vec<Spot> = session.snapshot().spots;
    assert_eq!(spots[0].name, "Wakasu Seaside Park");
}

#[test]
fn weather_snapshot_roundtrips_through_json() {
    let body = json!({
        "timestamp": "2024-05-01T09:00:00Z",
        "condition": "clear sky",
        "wind_speed": 4.2,
        "wind_direction": 45.0,
        "road_risk": 0.1
    });
    let snapshot: WeatherSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(snapshot.precipitation_start_minutes, None);
    assert_eq!(snapshot.wind_compass(), "NE");
}

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::error::NavigatorError;
use crate::models::{
    ApiError, Coordinate, Destination, DestinationRequest, LocationSample, NavigationSnapshot,
    RideSummary, SpotSearchRequest,
};
use crate::runtime::SessionHandle;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/navigation", get(snapshot_handler))
        .route("/api/navigation/destination", post(destination_handler))
        .route("/api/navigation/confirm", post(confirm_handler))
        .route("/api/navigation/cancel", post(cancel_handler))
        .route("/api/navigation/retry", post(retry_handler))
        .route("/api/navigation/end", post(end_handler))
        .route("/api/navigation/location", post(location_handler))
        .route("/api/spots/search", post(spot_search_handler))
        .layer(cors)
        .with_state(state)
}

async fn snapshot_handler(State(state): State<AppState>) -> Json<NavigationSnapshot> {
    Json(state.session.snapshot())
}

async fn destination_handler(
    State(state): State<AppState>,
    Json(req): Json<DestinationRequest>,
) -> ApiResult<NavigationSnapshot> {
    validate_coordinate(req.coordinate)?;
    tracing::info!("destination request: {:?} ({:?})", req.label, req.mode);

    let label = if req.label.trim().is_empty() {
        format!("{:.5}, {:.5}", req.coordinate.lat, req.coordinate.lon)
    } else {
        req.label
    };
    let destination = Destination {
        coordinate: req.coordinate,
        label,
    };
    let snapshot = state
        .session
        .select_destination(destination, req.mode)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot))
}

async fn confirm_handler(State(state): State<AppState>) -> ApiResult<NavigationSnapshot> {
    state.session.confirm().await.map(Json).map_err(error_response)
}

async fn cancel_handler(State(state): State<AppState>) -> ApiResult<NavigationSnapshot> {
    state.session.cancel().await.map(Json).map_err(error_response)
}

async fn retry_handler(State(state): State<AppState>) -> ApiResult<NavigationSnapshot> {
    state.session.retry().await.map(Json).map_err(error_response)
}

async fn end_handler(State(state): State<AppState>) -> ApiResult<Option<RideSummary>> {
    state.session.end().await.map(Json).map_err(error_response)
}

async fn location_handler(
    State(state): State<AppState>,
    Json(sample): Json<LocationSample>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    validate_coordinate(sample.coordinate)?;
    state
        .session
        .push_location(sample)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn spot_search_handler(
    State(state): State<AppState>,
    Json(req): Json<SpotSearchRequest>,
) -> ApiResult<NavigationSnapshot> {
    state
        .session
        .search_spots(req.query)
        .await
        .map(Json)
        .map_err(error_response)
}

fn validate_coordinate(coordinate: Coordinate) -> Result<(), (StatusCode, Json<ApiError>)> {
    let valid = coordinate.lat.is_finite()
        && coordinate.lon.is_finite()
        && (-90.0..=90.0).contains(&coordinate.lat)
        && (-180.0..=180.0).contains(&coordinate.lon);
    if valid {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                message: format!("invalid coordinate {}, {}", coordinate.lat, coordinate.lon),
            }),
        ))
    }
}

fn error_response(err: NavigatorError) -> (StatusCode, Json<ApiError>) {
    let status = match err {
        NavigatorError::LocationUnavailable
        | NavigatorError::InvalidTransition { .. }
        | NavigatorError::NoDestination => StatusCode::CONFLICT,
        NavigatorError::RuntimeClosed => StatusCode::SERVICE_UNAVAILABLE,
        NavigatorError::Gpx(_) | NavigatorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}

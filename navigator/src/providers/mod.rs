//! External capabilities the engine consumes.
//!
//! Each capability is a trait so the session runtime can be driven by real
//! HTTP-backed adapters in production and by scripted fakes in tests. Async
//! methods return boxed futures so providers can be shared as `Arc<dyn …>`
//! across spawned tasks.

pub mod openweather;
pub mod osrm;
pub mod playback;
pub mod spots;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::models::{Coordinate, LocationSample, Spot, TransportType, WeatherSnapshot};
use crate::ride_log::{RideLog, RideLogSyncResult};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A maneuver step as returned by the directions provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
}

/// A raw route candidate before safety filtering and smoothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub path: Vec<Coordinate>,
    pub distance_m: f64,
    pub expected_travel_time_s: f64,
    pub steps: Vec<RouteStep>,
    pub transport: TransportType,
}

pub trait DirectionsProvider: Send + Sync {
    fn route(
        &self,
        start: Coordinate,
        destination: Coordinate,
        transport: TransportType,
        alternates: bool,
    ) -> BoxFuture<'_, ProviderResult<Vec<ProviderRoute>>>;
}

pub trait AddressLookup: Send + Sync {
    /// Nearest routable, address-like point within `radius_m`, if any.
    fn nearest_routable_point<'a>(
        &'a self,
        coordinate: Coordinate,
        radius_m: f64,
        keywords: &'a [String],
    ) -> BoxFuture<'a, ProviderResult<Option<Coordinate>>>;
}

pub trait WeatherProvider: Send + Sync {
    fn forecast(&self, coordinate: Coordinate) -> BoxFuture<'_, ProviderResult<WeatherSnapshot>>;
}

pub trait SpotProvider: Send + Sync {
    fn search<'a>(
        &'a self,
        origin: Coordinate,
        radius_km: f64,
        query: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<Vec<Spot>>>;
}

/// Source of location samples: live GPS or a scripted playback.
pub trait LocationProvider: Send + Sync {
    /// Returns whether the provider may emit samples.
    fn authorize(&self) -> bool;
    /// Starts emitting samples into `sink` until [`LocationProvider::stop`].
    fn start(&self, sink: mpsc::Sender<LocationSample>);
    fn stop(&self);
}

/// Receives ride start/end notifications; syncing is out of scope here.
pub trait RideLogSink: Send + Sync {
    fn on_ride_start(&self, started_at: DateTime<Utc>);
    fn on_ride_end(&self, log: RideLog) -> BoxFuture<'_, RideLogSyncResult>;
}

/// The set of collaborators a navigation runtime is wired to.
#[derive(Clone)]
pub struct Providers {
    pub directions: Arc<dyn DirectionsProvider>,
    pub lookup: Arc<dyn AddressLookup>,
    pub weather: Arc<dyn WeatherProvider>,
    pub spots: Arc<dyn SpotProvider>,
    pub ride_log: Arc<dyn RideLogSink>,
}

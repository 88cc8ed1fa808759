use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

/// A single fix from the location provider. Never mutated once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coordinate: Coordinate,
    /// Metres per second; negative when the receiver has no valid speed.
    pub speed_mps: f64,
    /// Degrees clockwise from north; negative when unknown.
    pub course_deg: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(coordinate: Coordinate, speed_mps: f64, course_deg: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            speed_mps,
            course_deg,
            timestamp,
        }
    }

    pub fn has_valid_speed(&self) -> bool {
        self.speed_mps >= 0.0 && self.speed_mps.is_finite()
    }

    pub fn has_valid_course(&self) -> bool {
        self.course_deg >= 0.0 && self.course_deg.is_finite()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    #[default]
    Flat,
    HillClimb,
}

/// Transport profile requested from the directions provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Road-like routing: follows the street network cars use.
    Automobile,
    /// Pedestrian-like routing: accepts paths, parks and steeper shortcuts.
    Walking,
}

impl TransportType {
    pub fn is_road_like(self) -> bool {
        matches!(self, TransportType::Automobile)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl RouteBounds {
    pub fn center(&self) -> Coordinate {
        Coordinate {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lon: (self.min_lon + self.max_lon) / 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub path: Vec<Coordinate>,
    pub distance_m: f64,
    pub eta_minutes: u32,
    pub primary_instruction: String,
    pub secondary_instruction: String,
    pub next_distance_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportType>,
    /// Explanation shown alongside routes that are not real road routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RouteSummary {
    /// A route needs at least two points to be navigated.
    pub fn is_navigable(&self) -> bool {
        self.path.len() >= 2
    }

    pub fn eta_string(&self) -> String {
        let hours = self.eta_minutes / 60;
        let minutes = self.eta_minutes % 60;
        if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m")
        }
    }

    /// Bounding box padded by 30% with a minimum span of 0.05° on each axis.
    pub fn bounds(&self) -> Option<RouteBounds> {
        let first = self.path.first()?;
        let (mut min_lat, mut max_lat, mut min_lon, mut max_lon) =
            (first.lat, first.lat, first.lon, first.lon);
        for c in &self.path {
            min_lat = min_lat.min(c.lat);
            max_lat = max_lat.max(c.lat);
            min_lon = min_lon.min(c.lon);
            max_lon = max_lon.max(c.lon);
        }
        let half_lat = ((max_lat - min_lat) * 1.3).max(0.05) / 2.0;
        let half_lon = ((max_lon - min_lon) * 1.3).max(0.05) / 2.0;
        let center_lat = (min_lat + max_lat) / 2.0;
        let center_lon = (min_lon + max_lon) / 2.0;
        Some(RouteBounds {
            min_lat: center_lat - half_lat,
            max_lat: center_lat + half_lat,
            min_lon: center_lon - half_lon,
            max_lon: center_lon + half_lon,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainingRoute {
    pub path: Vec<Coordinate>,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainAvoidanceAlert {
    pub minutes_until_rain: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    #[default]
    None,
    Advisory,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub timestamp: DateTime<Utc>,
    pub condition: String,
    /// Metres per second.
    pub wind_speed: f64,
    /// Degrees the wind blows from.
    pub wind_direction: f64,
    /// 0.0 (dry) to 1.0 (treacherous).
    pub road_risk: f64,
    #[serde(default)]
    pub precipitation_start_minutes: Option<u32>,
    #[serde(default)]
    pub warning: WarningLevel,
}

impl WeatherSnapshot {
    pub fn wind_compass(&self) -> &'static str {
        const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
        let normalized = self.wind_direction.rem_euclid(360.0);
        let index = ((normalized + 22.5) / 45.0) as usize & 7;
        DIRECTIONS[index]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub name: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Distance from the search origin.
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub coordinate: Coordinate,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationRequest {
    pub coordinate: Coordinate,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub mode: RouteMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotSearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationPhase {
    #[default]
    Idle,
    Planning,
    Previewing,
    Active,
}

/// Read-only view of the navigation session, published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub phase: NavigationPhase,
    pub destination: Option<Destination>,
    pub mode: RouteMode,
    pub pending_route: Option<RouteSummary>,
    pub active_route: Option<RouteSummary>,
    pub remaining: Option<RemainingRoute>,
    pub speed_kmh: f64,
    pub fallback_speed_kmh: Option<f64>,
    pub heading: Option<String>,
    pub rain_alert: Option<RainAvoidanceAlert>,
    pub weather: Option<WeatherSnapshot>,
    pub warning_message: Option<String>,
    pub spots: Vec<Spot>,
    pub failure_reason: Option<String>,
    pub planning_in_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideSummary {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub path: Vec<Coordinate>,
    pub distance_km: f64,
    pub duration_s: f64,
    pub average_speed_kmh: f64,
    pub gpx_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

use std::time::Duration;

use futures::future::BoxFuture;
use geo_types::LineString;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{AddressLookup, DirectionsProvider, ProviderResult, ProviderRoute, RouteStep};
use crate::error::ProviderError;
use crate::geometry::haversine_m;
use crate::models::{Coordinate, TransportType};

pub const OSRM_ROUTE_API_PATH: &str = "/route/v1";
pub const OSRM_NEAREST_API_PATH: &str = "/nearest/v1";
const NEAREST_CANDIDATES: &str = "5";

/// Directions and snapping backed by an OSRM HTTP server.
pub struct OsrmClient {
    base_url: String,
    client: Client,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Provider(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn profile(transport: TransportType) -> &'static str {
        match transport {
            TransportType::Automobile => "driving",
            TransportType::Walking => "foot",
        }
    }

    async fn fetch_routes(
        &self,
        start: Coordinate,
        destination: Coordinate,
        transport: TransportType,
        alternates: bool,
    ) -> ProviderResult<Vec<ProviderRoute>> {
        let url = format!(
            "{}{}/{}/{},{};{},{}",
            self.base_url,
            OSRM_ROUTE_API_PATH,
            Self::profile(transport),
            start.lon,
            start.lat,
            destination.lon,
            destination.lat
        );

        let response: RouteResponse = self
            .client
            .get(&url)
            .query(&[
                ("alternatives", if alternates { "true" } else { "false" }),
                ("steps", "true"),
                ("geometries", "geojson"),
                ("overview", "full"),
            ])
            .send()
            .await?
            .json()
            .await?;

        match response.code.as_str() {
            "Ok" => {}
            "NoRoute" | "NoSegment" => return Err(ProviderError::NoDirections),
            other => {
                return Err(ProviderError::Provider(
                    response.message.unwrap_or_else(|| other.to_string()),
                ))
            }
        }

        let routes: Vec<ProviderRoute> = response
            .routes
            .into_iter()
            .map(|route| route.into_provider_route(transport))
            .collect();
        debug!("OSRM {} returned {} route(s)", Self::profile(transport), routes.len());

        if routes.is_empty() {
            return Err(ProviderError::NoDirections);
        }
        Ok(routes)
    }

    async fn fetch_nearest(
        &self,
        coordinate: Coordinate,
        radius_m: f64,
        keywords: &[String],
    ) -> ProviderResult<Option<Coordinate>> {
        let url = format!(
            "{}{}/{}/{},{}",
            self.base_url,
            OSRM_NEAREST_API_PATH,
            Self::profile(TransportType::Automobile),
            coordinate.lon,
            coordinate.lat
        );

        let response: NearestResponse = self
            .client
            .get(&url)
            .query(&[("number", NEAREST_CANDIDATES)])
            .send()
            .await?
            .json()
            .await?;

        if response.code != "Ok" {
            return Ok(None);
        }

        let candidates: Vec<(Coordinate, &str)> = response
            .waypoints
            .iter()
            .map(|w| (Coordinate::new(w.location[1], w.location[0]), w.name.as_str()))
            .filter(|(c, _)| haversine_m(coordinate, *c) <= radius_m)
            .collect();

        let preferred = candidates.iter().find(|(_, name)| {
            keywords
                .iter()
                .any(|k| !k.is_empty() && name.to_lowercase().contains(&k.to_lowercase()))
        });

        Ok(preferred.or(candidates.first()).map(|(c, _)| *c))
    }
}

impl DirectionsProvider for OsrmClient {
    fn route(
        &self,
        start: Coordinate,
        destination: Coordinate,
        transport: TransportType,
        alternates: bool,
    ) -> BoxFuture<'_, ProviderResult<Vec<ProviderRoute>>> {
        Box::pin(self.fetch_routes(start, destination, transport, alternates))
    }
}

impl AddressLookup for OsrmClient {
    fn nearest_routable_point<'a>(
        &'a self,
        coordinate: Coordinate,
        radius_m: f64,
        keywords: &'a [String],
    ) -> BoxFuture<'a, ProviderResult<Option<Coordinate>>> {
        Box::pin(self.fetch_nearest(coordinate, radius_m, keywords))
    }
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    code: String,
    #[serde(default)]
    waypoints: Vec<NearestWaypoint>,
}

#[derive(Debug, Deserialize)]
struct NearestWaypoint {
    location: [f64; 2],
    #[serde(default)]
    name: String,
}

impl OsrmRoute {
    fn into_provider_route(self, transport: TransportType) -> ProviderRoute {
        // GeoJSON positions are [lon, lat].
        let line = LineString::from(self.geometry.coordinates);
        let path = line.coords().map(|c| Coordinate::new(c.y, c.x)).collect();
        let steps = self
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|step| RouteStep {
                instruction: describe_step(&step),
                distance_m: step.distance,
            })
            .collect();

        ProviderRoute {
            path,
            distance_m: self.distance,
            expected_travel_time_s: self.duration,
            steps,
            transport,
        }
    }
}

fn describe_step(step: &OsrmStep) -> String {
    let action = match (step.maneuver.kind.as_str(), step.maneuver.modifier.as_deref()) {
        ("arrive", _) => return "Arrive at destination".to_string(),
        ("depart", _) => "Head out",
        ("roundabout" | "rotary", _) => "Enter the roundabout",
        (_, Some("left")) => "Turn left",
        (_, Some("right")) => "Turn right",
        (_, Some("slight left")) => "Keep slightly left",
        (_, Some("slight right")) => "Keep slightly right",
        (_, Some("sharp left")) => "Turn sharp left",
        (_, Some("sharp right")) => "Turn sharp right",
        (_, Some("uturn")) => "Make a U-turn",
        _ => "Continue straight",
    };

    if step.name.is_empty() {
        action.to_string()
    } else {
        format!("{action} onto {}", step.name)
    }
}

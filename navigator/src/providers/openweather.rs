use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use super::{ProviderResult, WeatherProvider};
use crate::error::ProviderError;
use crate::models::{Coordinate, WarningLevel, WeatherSnapshot};

/// Wind speeds (m/s) at which riders are warned.
const WARNING_WIND_MPS: f64 = 20.0;
const ADVISORY_WIND_MPS: f64 = 12.0;
/// Minutely precipitation (mm/h) that counts as rain starting.
const MIN_PRECIPITATION_MM: f64 = 0.1;
/// Hourly probability of precipitation that counts as rain starting.
const MIN_POP: f64 = 0.5;

/// Weather snapshots from a one-call style forecast endpoint.
pub struct OpenWeatherClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenWeatherClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Provider(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    async fn fetch_snapshot(&self, coordinate: Coordinate) -> ProviderResult<WeatherSnapshot> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lat", coordinate.lat.to_string()),
                ("lon", coordinate.lon.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
                ("exclude", "daily,alerts".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Provider(format!("HTTP {}", status.as_u16())));
        }

        let payload: OneCallResponse = response.json().await?;
        snapshot_from_response(payload)
    }
}

impl WeatherProvider for OpenWeatherClient {
    fn forecast(&self, coordinate: Coordinate) -> BoxFuture<'_, ProviderResult<WeatherSnapshot>> {
        Box::pin(self.fetch_snapshot(coordinate))
    }
}

/// Stand-in used when no weather endpoint is configured.
pub struct DisabledWeather;

impl WeatherProvider for DisabledWeather {
    fn forecast(&self, _coordinate: Coordinate) -> BoxFuture<'_, ProviderResult<WeatherSnapshot>> {
        Box::pin(async { Err(ProviderError::Provider("weather provider not configured".into())) })
    }
}

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: CurrentEntry,
    #[serde(default)]
    minutely: Vec<MinutelyEntry>,
    #[serde(default)]
    hourly: Vec<HourlyEntry>,
}

#[derive(Debug, Deserialize)]
struct CurrentEntry {
    dt: i64,
    wind_speed: f64,
    wind_deg: f64,
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    rain: Option<RainVolume>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RainVolume {
    #[serde(rename = "1h", default)]
    one_hour: f64,
}

#[derive(Debug, Deserialize)]
struct MinutelyEntry {
    dt: i64,
    precipitation: f64,
}

#[derive(Debug, Deserialize)]
struct HourlyEntry {
    dt: i64,
    #[serde(default)]
    pop: f64,
    #[serde(default)]
    rain: Option<RainVolume>,
}

fn snapshot_from_response(payload: OneCallResponse) -> ProviderResult<WeatherSnapshot> {
    let current = &payload.current;
    let timestamp = DateTime::<Utc>::from_timestamp(current.dt, 0)
        .ok_or_else(|| ProviderError::Decoding(format!("invalid timestamp {}", current.dt)))?;

    let condition = current
        .weather
        .first()
        .map(|c| {
            if c.description.is_empty() {
                c.main.clone()
            } else {
                c.description.clone()
            }
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let rain_now_mm = current.rain.as_ref().map_or(0.0, |r| r.one_hour);
    let next_hour_pop = payload
        .hourly
        .iter()
        .find(|h| h.dt > current.dt)
        .map_or(0.0, |h| h.pop);
    let road_risk = (rain_now_mm / 4.0).min(1.0).max(next_hour_pop * 0.6);

    Ok(WeatherSnapshot {
        timestamp,
        condition,
        wind_speed: current.wind_speed,
        wind_direction: current.wind_deg,
        road_risk,
        precipitation_start_minutes: precipitation_start_minutes(&payload, rain_now_mm),
        warning: warning_level(current.wind_speed),
    })
}

fn precipitation_start_minutes(payload: &OneCallResponse, rain_now_mm: f64) -> Option<u32> {
    let now = payload.current.dt;
    if rain_now_mm >= MIN_PRECIPITATION_MM {
        return Some(0);
    }
    let minutes_from_now = |dt: i64| ((dt - now).max(0) / 60) as u32;

    payload
        .minutely
        .iter()
        .find(|m| m.precipitation >= MIN_PRECIPITATION_MM)
        .map(|m| minutes_from_now(m.dt))
        .or_else(|| {
            payload
                .hourly
                .iter()
                .filter(|h| h.dt >= now)
                .find(|h| h.pop >= MIN_POP || h.rain.as_ref().is_some_and(|r| r.one_hour >= MIN_PRECIPITATION_MM))
                .map(|h| minutes_from_now(h.dt))
        })
}

pub fn warning_level(wind_speed_mps: f64) -> WarningLevel {
    if wind_speed_mps >= WARNING_WIND_MPS {
        WarningLevel::Warning
    } else if wind_speed_mps >= ADVISORY_WIND_MPS {
        WarningLevel::Advisory
    } else {
        WarningLevel::None
    }
}

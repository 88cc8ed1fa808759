//! Navigation policy parameters and service settings.
//!
//! Every threshold the session controller acts on lives in
//! [`NavigationPolicy`]; the defaults are tuned for urban and suburban cycling
//! at moderate GPS accuracy and can be overridden from a JSON file.

use std::{fs::File, io::Read, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::planner::PlannerParams;
use crate::refresh::RefreshGateParams;
use crate::speed::SpeedParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationPolicy {
    pub speed: SpeedParams,
    pub planner: PlannerParams,
    /// Drift beyond this distance from the active route triggers a reroute.
    pub off_route_threshold_m: f64,
    #[serde(with = "duration_secs")]
    pub reroute_cooldown: Duration,
    /// Moving this far from where the pending route was computed replans it.
    pub preview_replan_distance_m: f64,
    /// Straight lines shorter than this may stand in for a failed plan.
    pub straight_line_max_m: f64,
    pub weather_gate: RefreshGateParams,
    #[serde(with = "duration_secs")]
    pub weather_timer_period: Duration,
    #[serde(with = "duration_secs")]
    pub rain_cooldown: Duration,
    pub rain_window_min_minutes: u32,
    pub rain_window_max_minutes: u32,
    pub spot_gate: RefreshGateParams,
    #[serde(with = "duration_secs")]
    pub spot_timer_period: Duration,
    pub spot_radius_km: f64,
    #[serde(with = "duration_secs")]
    pub search_debounce: Duration,
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        Self {
            speed: SpeedParams::default(),
            planner: PlannerParams::default(),
            off_route_threshold_m: 35.0,
            reroute_cooldown: Duration::from_secs(8),
            preview_replan_distance_m: 200.0,
            straight_line_max_m: 300.0,
            weather_gate: RefreshGateParams {
                min_interval: Duration::from_secs(120),
                min_distance_m: 300.0,
                max_staleness: Duration::from_secs(600),
            },
            weather_timer_period: Duration::from_secs(60),
            rain_cooldown: Duration::from_secs(300),
            rain_window_min_minutes: 30,
            rain_window_max_minutes: 60,
            spot_gate: RefreshGateParams {
                min_interval: Duration::from_secs(300),
                min_distance_m: 500.0,
                max_staleness: Duration::from_secs(1800),
            },
            spot_timer_period: Duration::from_secs(120),
            spot_radius_km: 10.0,
            search_debounce: Duration::from_millis(300),
        }
    }
}

impl NavigationPolicy {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Command-line and environment settings for the `navigator` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "navigator", about = "Cycling navigation engine")]
pub struct ServiceSettings {
    /// Address the HTTP control surface listens on.
    #[arg(long, env = "NAVIGATOR_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Base URL of an OSRM server used for directions and snapping.
    #[arg(long, env = "OSRM_URL", default_value = "https://router.project-osrm.org")]
    pub osrm_url: String,

    /// One-call weather endpoint.
    #[arg(
        long,
        env = "OPENWEATHER_URL",
        default_value = "https://api.openweathermap.org/data/3.0/onecall"
    )]
    pub openweather_url: String,

    /// API key for the weather endpoint; weather refresh is disabled without it.
    #[arg(long, env = "OPENWEATHER_API_KEY")]
    pub openweather_api_key: Option<String>,

    /// JSON file overriding navigation policy parameters.
    #[arg(long, env = "NAVIGATOR_POLICY")]
    pub policy: Option<PathBuf>,

    /// Replay a scripted ride instead of waiting for pushed locations.
    #[arg(long)]
    pub playback: bool,

    /// Provider request timeout in seconds.
    #[arg(long, env = "NAVIGATOR_PROVIDER_TIMEOUT", default_value_t = 10)]
    pub provider_timeout_s: u64,
}

impl ServiceSettings {
    pub fn load_policy(&self) -> Result<NavigationPolicy, ConfigError> {
        match &self.policy {
            Some(path) => NavigationPolicy::from_file(path),
            None => Ok(NavigationPolicy::default()),
        }
    }
}

/// Serde adapter storing a [`Duration`] as fractional seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_policy_file_keeps_defaults() {
        let json = r#"{ "off_route_threshold_m": 50.0, "reroute_cooldown": 12.5 }"#;
        let policy = NavigationPolicy::from_reader(json.as_bytes()).expect("policy");
        assert_eq!(policy.off_route_threshold_m, 50.0);
        assert_eq!(policy.reroute_cooldown, Duration::from_millis(12_500));
        assert_eq!(policy.rain_window_min_minutes, 30);
        assert_eq!(policy.speed, SpeedParams::default());
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{ "rain_cooldown": -1.0 }"#;
        assert!(NavigationPolicy::from_reader(json.as_bytes()).is_err());
    }

    #[test]
    fn settings_parse_from_args() {
        let settings = ServiceSettings::try_parse_from([
            "navigator",
            "--addr",
            "127.0.0.1:9000",
            "--playback",
        ])
        .expect("settings");
        assert!(settings.playback);
        assert_eq!(settings.addr.port(), 9000);
        assert!(settings.load_policy().is_ok());
    }
}

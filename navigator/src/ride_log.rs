use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use tracing::info;

use crate::error::NavigatorError;
use crate::geometry::{haversine_m, path_length_m};
use crate::models::{Coordinate, RideSummary};
use crate::providers::RideLogSink;

/// Points closer than this to the last recorded one are not appended.
const MIN_RECORD_SPACING_M: f64 = 2.0;
const GPX_CREATOR: &str = "ridelane-navigator";

/// A finished ride, handed to the ride-log sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RideLog {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub route_points: Vec<Coordinate>,
    pub distance_km: f64,
    pub average_speed_kmh: f64,
    pub weather_summary: String,
}

impl RideLog {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    pub fn summary(&self) -> Result<RideSummary, NavigatorError> {
        Ok(RideSummary {
            started_at: self.started_at,
            ended_at: self.ended_at,
            path: self.route_points.clone(),
            distance_km: self.distance_km,
            duration_s: self.duration().num_milliseconds().max(0) as f64 / 1000.0,
            average_speed_kmh: self.average_speed_kmh,
            gpx_base64: encode_ride_as_gpx(self)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RideLogSyncResult {
    Synced,
    Skipped(String),
    Failed(String),
}

/// Accumulates the ridden track while a route is active.
#[derive(Debug, Clone, PartialEq)]
pub struct RideRecorder {
    started_at: DateTime<Utc>,
    points: Vec<Coordinate>,
}

impl RideRecorder {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            points: Vec::new(),
        }
    }

    pub fn record(&mut self, point: Coordinate) {
        let far_enough = self
            .points
            .last()
            .map_or(true, |last| haversine_m(*last, point) >= MIN_RECORD_SPACING_M);
        if far_enough {
            self.points.push(point);
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn finish(self, ended_at: DateTime<Utc>, weather_summary: String) -> RideLog {
        let distance_km = path_length_m(&self.points) / 1000.0;
        let hours = (ended_at - self.started_at).num_milliseconds() as f64 / 3_600_000.0;
        let average_speed_kmh = if hours > 0.0 { distance_km / hours } else { 0.0 };

        RideLog {
            started_at: self.started_at,
            ended_at,
            route_points: self.points,
            distance_km,
            average_speed_kmh,
            weather_summary,
        }
    }
}

pub fn encode_ride_as_gpx(log: &RideLog) -> Result<String, NavigatorError> {
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(GPX_CREATOR.into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(format!("Ride {}", log.started_at.format("%Y-%m-%d %H:%M"))),
        description: (!log.weather_summary.is_empty()).then(|| log.weather_summary.clone()),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    segment
        .points
        .extend(log.route_points.iter().map(|c| Waypoint::new(Point::new(c.lon, c.lat))));
    track.segments.push(segment);
    gpx.tracks.push(track);

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(BASE64.encode(buffer))
}

/// Ride-log sink that only records ride boundaries in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRideLogSink;

impl RideLogSink for TracingRideLogSink {
    fn on_ride_start(&self, started_at: DateTime<Utc>) {
        info!("ride started at {started_at}");
    }

    fn on_ride_end(&self, log: RideLog) -> BoxFuture<'_, RideLogSyncResult> {
        Box::pin(async move {
            info!(
                "ride finished: {:.2}km in {}s, avg {:.1}km/h, {} points",
                log.distance_km,
                log.duration().num_seconds(),
                log.average_speed_kmh,
                log.route_points.len()
            );
            RideLogSyncResult::Skipped("no sync target configured".into())
        })
    }
}

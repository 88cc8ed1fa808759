use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::LocationProvider;
use crate::geometry::{bearing_deg, haversine_m};
use crate::models::{Coordinate, LocationSample};

/// A short loop along the Tokyo Bay waterfront.
pub const TOKYO_BAY_RIDE: [Coordinate; 5] = [
    Coordinate::new(35.6225, 139.7900),
    Coordinate::new(35.6150, 139.8000),
    Coordinate::new(35.6070, 139.8200),
    Coordinate::new(35.6001, 139.8450),
    Coordinate::new(35.5930, 139.8700),
];

/// Replays a scripted list of coordinates, one sample per interval, looping
/// forever. Used when no live GPS is available.
pub struct PlaybackLocationProvider {
    points: Vec<Coordinate>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackLocationProvider {
    pub fn new(points: Vec<Coordinate>, interval: Duration) -> Self {
        Self {
            points,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn tokyo_bay() -> Self {
        Self::new(TOKYO_BAY_RIDE.to_vec(), Duration::from_secs(1))
    }
}

impl LocationProvider for PlaybackLocationProvider {
    fn authorize(&self) -> bool {
        !self.points.is_empty()
    }

    fn start(&self, sink: mpsc::Sender<LocationSample>) {
        if self.points.is_empty() {
            return;
        }
        self.stop();

        let points = self.points.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut index = 0usize;
            loop {
                ticker.tick().await;
                let current = points[index % points.len()];
                let next = points[(index + 1) % points.len()];
                let speed_mps = haversine_m(current, next) / interval.as_secs_f64().max(f64::EPSILON);
                let sample = LocationSample::new(current, speed_mps, bearing_deg(current, next), Utc::now());
                index += 1;

                if sink.send(sample).await.is_err() {
                    debug!("playback receiver dropped, stopping");
                    break;
                }
            }
        });

        info!("location playback started with {} points", self.points.len());
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                info!("location playback stopped");
            }
        }
    }
}

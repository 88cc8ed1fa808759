//! The ordered candidate fan-out tried by the planner.
//!
//! Each attempt is a plain descriptor; the planner evaluates them in order
//! with [`first_success`] until one yields a usable route.

use std::future::Future;

use crate::geometry::destination_point;
use crate::models::{Coordinate, RouteMode, TransportType};

use super::PlannerParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttemptKind {
    Direct,
    DestinationOffset { distance_m: f64, bearing_deg: f64 },
    StartOffset { distance_m: f64, bearing_deg: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub transport: TransportType,
    pub start: Coordinate,
    pub destination: Coordinate,
    pub kind: AttemptKind,
}

/// Flat rides want the road network first; hill climbs start with the
/// pedestrian profile because it is less averse to steep paths.
pub fn transport_order(mode: RouteMode) -> [TransportType; 2] {
    match mode {
        RouteMode::Flat => [TransportType::Automobile, TransportType::Walking],
        RouteMode::HillClimb => [TransportType::Walking, TransportType::Automobile],
    }
}

/// All attempts in priority order: every destination-side candidate for each
/// transport type, then every start-side candidate for each transport type.
pub fn build_attempts(
    start: Coordinate,
    destination: Coordinate,
    mode: RouteMode,
    params: &PlannerParams,
) -> Vec<Attempt> {
    let transports = transport_order(mode);
    let offsets: Vec<(f64, f64)> = params
        .offset_distances_m
        .iter()
        .flat_map(|&d| params.offset_bearings_deg.iter().map(move |&b| (d, b)))
        .collect();

    let mut attempts = Vec::with_capacity(transports.len() * (1 + offsets.len() * 2));

    for transport in transports {
        attempts.push(Attempt {
            transport,
            start,
            destination,
            kind: AttemptKind::Direct,
        });
        attempts.extend(offsets.iter().map(|&(distance_m, bearing_deg)| Attempt {
            transport,
            start,
            destination: destination_point(destination, distance_m, bearing_deg),
            kind: AttemptKind::DestinationOffset {
                distance_m,
                bearing_deg,
            },
        }));
    }

    for transport in transports {
        attempts.extend(offsets.iter().map(|&(distance_m, bearing_deg)| Attempt {
            transport,
            start: destination_point(start, distance_m, bearing_deg),
            destination,
            kind: AttemptKind::StartOffset {
                distance_m,
                bearing_deg,
            },
        }));
    }

    attempts
}

/// Evaluate `attempts` in order and return the first success.
///
/// On exhaustion returns the last error, or `None` when there was nothing to
/// try.
pub async fn first_success<A, T, E, F, Fut>(attempts: Vec<A>, mut eval: F) -> Result<T, Option<E>>
where
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;
    for attempt in attempts {
        match eval(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error)
}

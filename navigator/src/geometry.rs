use crate::models::Coordinate;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const EARTH_RADIUS_M: f64 = EARTH_RADIUS_KM * 1000.0;

pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// Sum of consecutive great-circle segment lengths, in metres.
pub fn path_length_m(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Shortest distance in metres from `point` to any segment of `route`.
///
/// Each segment is projected in a locally-flat frame centred on `point`, with
/// the projection parameter clamped to the segment. A single-point route
/// degrades to the straight-line distance; an empty route has no distance.
pub fn distance_from_route(point: Coordinate, route: &[Coordinate]) -> Option<f64> {
    match route {
        [] => None,
        [only] => Some(haversine_m(point, *only)),
        _ => {
            let to_local = local_projection(point);
            route
                .windows(2)
                .map(|w| distance_to_segment(to_local(w[0]), to_local(w[1])))
                .min_by(f64::total_cmp)
        }
    }
}

/// Index of the route vertex closest to `point`.
///
/// Coarser than [`distance_from_route`]; used to decide how much of the route
/// has been passed, not for precise distances.
pub fn nearest_index(point: Coordinate, route: &[Coordinate]) -> Option<usize> {
    route
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx, haversine_m(point, *c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(idx, _)| idx)
}

/// Drop interior points closer than `min_separation_m` to the last kept point.
/// Both endpoints are always kept.
pub fn thin(route: &[Coordinate], min_separation_m: f64) -> Vec<Coordinate> {
    let [first, interior @ .., last] = route else {
        return route.to_vec();
    };

    let mut result = Vec::with_capacity(route.len());
    result.push(*first);
    for point in interior {
        let kept = result[result.len() - 1];
        if haversine_m(kept, *point) >= min_separation_m {
            result.push(*point);
        }
    }
    result.push(*last);
    result
}

/// Symmetric moving average over `window_radius` neighbours on each side.
///
/// Endpoints are restored to their original values afterwards so smoothing
/// never relocates the start or the end of a route.
pub fn moving_average(route: &[Coordinate], window_radius: usize) -> Vec<Coordinate> {
    if route.len() < 3 || window_radius == 0 {
        return route.to_vec();
    }

    let last_idx = route.len() - 1;
    let mut smoothed: Vec<Coordinate> = (0..route.len())
        .map(|idx| {
            let lo = idx.saturating_sub(window_radius);
            let hi = (idx + window_radius).min(last_idx);
            let window = &route[lo..=hi];
            let n = window.len() as f64;
            Coordinate {
                lat: window.iter().map(|c| c.lat).sum::<f64>() / n,
                lon: window.iter().map(|c| c.lon).sum::<f64>() / n,
            }
        })
        .collect();

    smoothed[0] = route[0];
    smoothed[last_idx] = route[last_idx];
    smoothed
}

/// Initial bearing from `a` to `b` in degrees [0, 360).
pub fn bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Point reached by travelling `distance_m` from `start` along `bearing_deg`.
pub fn destination_point(start: Coordinate, distance_m: f64, bearing_deg: f64) -> Coordinate {
    let angular_distance = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_deg.to_radians();
    let lat1 = start.lat.to_radians();
    let lon1 = start.lon.to_radians();

    let lat2 = f64::asin(
        lat1.sin() * angular_distance.cos() + lat1.cos() * angular_distance.sin() * bearing.cos(),
    );
    let lon2 = lon1
        + f64::atan2(
            bearing.sin() * angular_distance.sin() * lat1.cos(),
            angular_distance.cos() - lat1.sin() * lat2.sin(),
        );

    Coordinate {
        lat: lat2.to_degrees(),
        lon: (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

/// Equirectangular projection into metres around `origin`.
fn local_projection(origin: Coordinate) -> impl Fn(Coordinate) -> (f64, f64) {
    let cos_lat = origin.lat.to_radians().cos();
    move |c: Coordinate| {
        let x = (c.lon - origin.lon).to_radians() * EARTH_RADIUS_M * cos_lat;
        let y = (c.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }
}

/// Distance from the local origin to the segment `a`–`b`.
fn distance_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f64::EPSILON {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    };
    let px = a.0 + t * dx;
    let py = a.1 + t * dy;
    (px * px + py * py).sqrt()
}

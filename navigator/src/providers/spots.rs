use futures::future::BoxFuture;
use once_cell::sync::Lazy;

use super::{ProviderResult, SpotProvider};
use crate::geometry::haversine_km;
use crate::models::{Coordinate, Spot};

struct CuratedSpot {
    name: &'static str,
    coordinate: Coordinate,
    tags: &'static [&'static str],
}

static CURATED_SPOTS: Lazy<Vec<CuratedSpot>> = Lazy::new(|| {
    vec![
        CuratedSpot {
            name: "Yokohama Bayside Marina",
            coordinate: Coordinate::new(35.3738, 139.6420),
            tags: &["waterfront", "cafe", "water"],
        },
        CuratedSpot {
            name: "Yamashita Park",
            coordinate: Coordinate::new(35.4462, 139.6503),
            tags: &["park", "waterfront"],
        },
        CuratedSpot {
            name: "Odaiba Seaside Park",
            coordinate: Coordinate::new(35.6292, 139.7745),
            tags: &["park", "beach", "waterfront"],
        },
        CuratedSpot {
            name: "Kasai Rinkai Park",
            coordinate: Coordinate::new(35.6415, 139.8614),
            tags: &["park", "cycling", "water"],
        },
        CuratedSpot {
            name: "Tamagawa Cycling Road Start",
            coordinate: Coordinate::new(35.5440, 139.7030),
            tags: &["cycling", "river"],
        },
        CuratedSpot {
            name: "Wakasu Seaside Park",
            coordinate: Coordinate::new(35.6262, 139.8370),
            tags: &["park", "camping", "water"],
        },
        CuratedSpot {
            name: "Kobe Marine Pia",
            coordinate: Coordinate::new(34.6420, 135.2200),
            tags: &["waterfront", "shopping"],
        },
        CuratedSpot {
            name: "Meriken Park",
            coordinate: Coordinate::new(34.6825, 135.1889),
            tags: &["park", "waterfront"],
        },
    ]
});

/// Static, hand-picked spots; also the fallback when a live provider is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuratedSpotProvider;

impl CuratedSpotProvider {
    /// Curated spots within `radius_km` of `origin`, nearest first.
    pub fn nearby(origin: Coordinate, radius_km: f64, query: Option<&str>) -> Vec<Spot> {
        let query = query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_lowercase);

        let mut spots: Vec<Spot> = CURATED_SPOTS
            .iter()
            .filter(|spot| match &query {
                Some(q) => {
                    spot.name.to_lowercase().contains(q.as_str())
                        || spot.tags.iter().any(|t| t.contains(q.as_str()))
                }
                None => true,
            })
            .map(|spot| Spot {
                name: spot.name.to_string(),
                coordinate: spot.coordinate,
                tags: spot.tags.iter().map(|t| t.to_string()).collect(),
                distance_km: haversine_km(origin, spot.coordinate),
            })
            .filter(|spot| spot.distance_km <= radius_km)
            .collect();

        spots.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        spots
    }
}

impl SpotProvider for CuratedSpotProvider {
    fn search<'a>(
        &'a self,
        origin: Coordinate,
        radius_km: f64,
        query: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<Vec<Spot>>> {
        Box::pin(async move { Ok(Self::nearby(origin, radius_km, query)) })
    }
}

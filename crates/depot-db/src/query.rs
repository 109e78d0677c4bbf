use serde::{Deserialize, Serialize};

const KM_PER_DEGREE_LAT: f64 = 111.32;

/// Approximate lat/lon rectangle used to pre-filter proximity searches.
///
/// The box may contain points farther than the radius; callers filter exactly
/// afterwards. Longitudes are clamped rather than wrapped across the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        let radius_km = radius_km.max(0.0);
        let dlat = radius_km / KM_PER_DEGREE_LAT;
        let cos_lat = latitude.to_radians().cos().abs();
        let dlon = if cos_lat < 1e-9 {
            180.0
        } else {
            (radius_km / (KM_PER_DEGREE_LAT * cos_lat)).min(180.0)
        };

        Self {
            min_lat: (latitude - dlat).max(-90.0),
            max_lat: (latitude + dlat).min(90.0),
            min_lon: (longitude - dlon).max(-180.0),
            max_lon: (longitude + dlon).min(180.0),
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }
}

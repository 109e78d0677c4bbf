//! Enrichment metadata attached to a file record.
//!
//! The recognized subset is strongly typed; everything else goes into one of two
//! open maps: `ExifData::extra` for EXIF tags without a dedicated field, and
//! `Metadata::custom` for caller-defined keys.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Caller-defined key/value pairs.
pub type CustomMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    pub altitude: Option<f64>,
    #[validate(range(min = 0.0))]
    pub accuracy: Option<f64>,
    #[validate(length(max = 512))]
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            address: None,
        }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let d_lat = (latitude - self.latitude).to_radians();
        let d_lon = (longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// EXIF orientation (1-8).
    pub orientation: Option<u16>,
    pub format: Option<String>,
    #[serde(default)]
    pub exif: ExifData,
}

/// Recognized EXIF fields plus an open map for anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifData {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub exposure_time: Option<String>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
    pub focal_length: Option<f64>,
    pub taken_at: Option<NaiveDateTime>,
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        *self == ExifData::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[validate(length(max = 128))]
    pub platform: Option<String>,
    #[validate(length(max = 128))]
    pub model: Option<String>,
    #[validate(length(max = 64))]
    pub os_version: Option<String>,
    #[validate(length(max = 64))]
    pub app_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_validation() {
        assert!(Location::new(48.85, 2.35).validate().is_ok());
        assert!(Location::new(91.0, 2.35).validate().is_err());
        assert!(Location::new(0.0, -181.0).validate().is_err());

        let mut loc = Location::new(0.0, 0.0);
        loc.accuracy = Some(-1.0);
        assert!(loc.validate().is_err());
    }

    #[test]
    fn test_distance_km() {
        let paris = Location::new(48.8566, 2.3522);
        let london = (51.5074, -0.1278);
        let d = paris.distance_km(london.0, london.1);
        assert!((d - 343.5).abs() < 5.0, "distance was {}", d);
        assert!(paris.distance_km(48.8566, 2.3522) < 1e-9);
    }

    #[test]
    fn test_empty_metadata_serializes_compactly() {
        let json = serde_json::to_value(Metadata::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}

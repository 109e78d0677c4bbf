use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use depot_core::access::ensure_can_modify;
use depot_core::models::{CustomMetadata, DeviceInfo, EntityType, Location, Requester};
use depot_core::validation::{parse_tags, validate_custom_metadata};
use depot_core::{AppError, AppResult, FileView};
use depot_db::BoundingBox;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::service::FileService;

/// Owner-editable fields. `None` leaves a field unchanged; for the nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    pub is_public: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub entity_type: Option<EntityType>,
    #[serde(default, deserialize_with = "double_option")]
    pub entity_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<Location>>,
    #[serde(default, deserialize_with = "double_option")]
    pub device: Option<Option<DeviceInfo>>,
    /// Merged into the existing custom map.
    #[serde(default)]
    pub custom: CustomMetadata,
    #[serde(default)]
    pub remove_custom: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyFile {
    #[serde(flatten)]
    pub file: FileView,
    pub distance_km: f64,
}

/// Distinguishes an explicit `null` (clear) from an absent field (keep).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    tags.into_iter().flat_map(|t| parse_tags(t)).collect()
}

impl FileService {
    #[tracing::instrument(skip(self, requester, update), fields(file_id = %id, requester_id = %requester.id))]
    pub async fn update_metadata(
        &self,
        id: Uuid,
        requester: &Requester,
        update: MetadataUpdate,
    ) -> AppResult<FileView> {
        let mut record = self.fetch(id).await?;
        ensure_can_modify(&record, requester)?;

        if let Some(is_public) = update.is_public {
            record.is_public = is_public;
        }
        if let Some(tags) = &update.tags {
            record.tags = normalize_tags(tags);
        }
        if let Some(expires_at) = update.expires_at {
            if let Some(at) = expires_at {
                if at <= Utc::now() {
                    return Err(AppError::validation("expiresAt must be in the future"));
                }
            }
            record.expires_at = expires_at;
        }
        if let Some(entity_type) = update.entity_type {
            record.entity_type = entity_type;
        }
        if let Some(entity_id) = update.entity_id {
            record.entity_id = entity_id
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty());
        }
        if let Some(location) = update.location {
            if let Some(location) = &location {
                location.validate()?;
            }
            record.metadata.location = location;
        }
        if let Some(device) = update.device {
            if let Some(device) = &device {
                device.validate()?;
            }
            record.metadata.device = device;
        }

        for key in &update.remove_custom {
            record.metadata.custom.remove(key);
        }
        record.metadata.custom.extend(update.custom);
        validate_custom_metadata(&record.metadata.custom)?;

        let record = self.repository.update(&record).await?;
        tracing::info!(file_id = %id, "File metadata updated");
        Ok(self.view(record, requester))
    }

    pub async fn add_tags(
        &self,
        id: Uuid,
        requester: &Requester,
        tags: &[String],
    ) -> AppResult<FileView> {
        let mut record = self.fetch(id).await?;
        ensure_can_modify(&record, requester)?;

        record.tags.extend(normalize_tags(tags));
        let record = self.repository.update(&record).await?;
        Ok(self.view(record, requester))
    }

    pub async fn remove_tags(
        &self,
        id: Uuid,
        requester: &Requester,
        tags: &[String],
    ) -> AppResult<FileView> {
        let mut record = self.fetch(id).await?;
        ensure_can_modify(&record, requester)?;

        let remove = normalize_tags(tags);
        record.tags.retain(|t| !remove.contains(t));
        let record = self.repository.update(&record).await?;
        Ok(self.view(record, requester))
    }

    /// Files carrying any of `tags`.
    pub async fn find_by_tags(
        &self,
        tags: &[String],
        requester: &Requester,
    ) -> AppResult<Vec<FileView>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(AppError::validation("At least one tag is required"));
        }
        let records = self.repository.list_by_tags(&tags).await?;
        Ok(self.views(records, requester))
    }

    /// Files located within `radius_km` of a point, nearest first.
    ///
    /// The store is queried by bounding box; the exact great-circle distance is
    /// applied afterwards.
    #[tracing::instrument(skip(self, requester))]
    pub async fn search_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        requester: &Requester,
    ) -> AppResult<Vec<NearbyFile>> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::validation("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::validation("longitude must be between -180 and 180"));
        }
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(AppError::validation("radius must be a positive number"));
        }

        let candidates = self
            .repository
            .list_in_bounding_box(BoundingBox::around(latitude, longitude, radius_km))
            .await?;

        let mut nearby: Vec<NearbyFile> = candidates
            .into_iter()
            .filter_map(|record| {
                let distance_km = record
                    .metadata
                    .location
                    .as_ref()?
                    .distance_km(latitude, longitude);
                (distance_km <= radius_km).then(|| NearbyFile {
                    file: self.view(record, requester),
                    distance_km,
                })
            })
            .collect();
        nearby.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
        });

        tracing::debug!(results = nearby.len(), "Proximity search complete");
        Ok(nearby)
    }
}

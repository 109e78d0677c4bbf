mod helpers;

use chrono::{Duration, Utc};
use depot_core::models::{EntityType, Location};
use depot_core::AppError;
use depot_services::MetadataUpdate;
use helpers::*;
use serde_json::json;

#[tokio::test]
async fn test_owner_updates_metadata() {
    let t = setup().await;
    let record = seed_file(&t, "u1", "doc.txt", b"doc", None, None).await;

    let mut update = MetadataUpdate {
        is_public: Some(true),
        entity_type: Some(EntityType::Department),
        entity_id: Some(Some("dept-7".to_string())),
        location: Some(Some(Location::new(48.8566, 2.3522))),
        ..MetadataUpdate::default()
    };
    update.custom.insert("project".to_string(), json!("apollo"));
    update.custom.insert("revision".to_string(), json!(3));

    let view = t
        .depot
        .files
        .update_metadata(record.id, &owner(), update)
        .await
        .unwrap();
    assert!(view.record.is_public);
    assert_eq!(view.record.entity_type, EntityType::Department);
    assert_eq!(view.record.entity_id.as_deref(), Some("dept-7"));
    assert_eq!(view.record.metadata.custom.len(), 2);

    let by_entity = t
        .depot
        .files
        .list_by_entity(EntityType::Department, "dept-7", &stranger())
        .await
        .unwrap();
    assert_eq!(by_entity.len(), 1);
    assert!(by_entity[0].urls.serve_url.is_some());

    let update = MetadataUpdate {
        remove_custom: vec!["project".to_string()],
        location: Some(None),
        ..MetadataUpdate::default()
    };
    let view = t
        .depot
        .files
        .update_metadata(record.id, &owner(), update)
        .await
        .unwrap();
    assert_eq!(view.record.metadata.custom.len(), 1);
    assert!(view.record.metadata.location.is_none());
}

#[tokio::test]
async fn test_metadata_update_rejections() {
    let t = setup().await;
    let record = seed_file(&t, "u1", "doc.txt", b"doc", None, None).await;

    let err = t
        .depot
        .files
        .update_metadata(
            record.id,
            &stranger(),
            MetadataUpdate {
                is_public: Some(true),
                ..MetadataUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let mut reserved = MetadataUpdate::default();
    reserved
        .custom
        .insert("_system_owner".to_string(), json!("me"));
    let err = t
        .depot
        .files
        .update_metadata(record.id, &owner(), reserved)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = t
        .depot
        .files
        .update_metadata(
            record.id,
            &owner(),
            MetadataUpdate {
                expires_at: Some(Some(Utc::now() - Duration::minutes(5))),
                ..MetadataUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = t
        .depot
        .files
        .update_metadata(
            record.id,
            &owner(),
            MetadataUpdate {
                location: Some(Some(Location::new(123.0, 0.0))),
                ..MetadataUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Nothing was written by the rejected updates.
    let stored = t.depot.files.get(record.id, &owner()).await.unwrap();
    assert!(!stored.record.is_public);
    assert!(stored.record.metadata.custom.is_empty());
}

#[tokio::test]
async fn test_tag_operations() {
    let t = setup().await;
    let a = seed_file(&t, "u1", "a.txt", b"a", None, None).await;
    let b = seed_file(&t, "u1", "b.txt", b"b", None, None).await;

    t.depot
        .files
        .add_tags(a.id, &owner(), &["Beach".to_string(), "summer".to_string()])
        .await
        .unwrap();
    t.depot
        .files
        .add_tags(b.id, &owner(), &["winter".to_string()])
        .await
        .unwrap();

    let found = t
        .depot
        .files
        .find_by_tags(&["beach".to_string(), "winter".to_string()], &owner())
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let view = t
        .depot
        .files
        .remove_tags(a.id, &owner(), &["BEACH".to_string()])
        .await
        .unwrap();
    assert_eq!(view.record.tags.len(), 1);
    assert!(view.record.tags.contains("summer"));

    let found = t
        .depot
        .files
        .find_by_tags(&["summer".to_string()], &stranger())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].urls.serve_url.is_none());

    let err = t
        .depot
        .files
        .find_by_tags(&[" ".to_string()], &owner())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_search_nearby() {
    let t = setup().await;
    let paris = seed_file(&t, "u1", "paris.txt", b"p", None, Some(Location::new(48.8566, 2.3522))).await;
    let versailles =
        seed_file(&t, "u1", "versailles.txt", b"v", None, Some(Location::new(48.8049, 2.1204))).await;
    seed_file(&t, "u1", "london.txt", b"l", None, Some(Location::new(51.5074, -0.1278))).await;
    seed_file(&t, "u1", "nowhere.txt", b"n", None, None).await;

    let results = t
        .depot
        .files
        .search_nearby(48.8566, 2.3522, 30.0, &stranger())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].file.record.id, paris.id);
    assert_eq!(results[1].file.record.id, versailles.id);
    assert!(results[0].distance_km < 0.01);
    assert!(results[1].distance_km > 10.0 && results[1].distance_km < 30.0);
    // Private files are listed without URLs.
    assert!(results[0].file.urls.serve_url.is_none());

    let err = t
        .depot
        .files
        .search_nearby(95.0, 0.0, 10.0, &owner())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use depot_core::models::{
    CompressionInfo, EntityType, FileRecord, Location, Metadata, NewFileRecord, Requester,
};
use depot_core::{DepotConfig, UploadOptionsInput};
use depot_db::{FileRepository, InMemoryFileRepository};
use depot_services::{Depot, ServedFile};
use depot_storage::{folder_key, new_folder_id, stored_filename};
use futures::StreamExt;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestDepot {
    pub depot: Depot,
    pub repo: InMemoryFileRepository,
    pub _temp_dir: TempDir,
}

impl TestDepot {
    pub fn root(&self) -> &std::path::Path {
        self._temp_dir.path()
    }

    pub fn archive_entries(&self) -> Vec<String> {
        match std::fs::read_dir(&self.depot.config.archive_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub async fn setup() -> TestDepot {
    setup_with(&[]).await
}

/// Depot on a temporary storage root and an in-memory store.
pub async fn setup_with(overrides: &[(&str, &str)]) -> TestDepot {
    let temp_dir = TempDir::new().expect("tempdir");
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert(
        "STORAGE_ROOT".to_string(),
        temp_dir.path().to_string_lossy().to_string(),
    );
    vars.insert("PUBLIC_BASE_URL".to_string(), "https://files.test".to_string());
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    let config = DepotConfig::from_vars(|k| vars.get(k).cloned()).expect("config");

    let repo = InMemoryFileRepository::new();
    let depot = Depot::initialize(config, Arc::new(repo.clone()))
        .await
        .expect("depot");

    TestDepot {
        depot,
        repo,
        _temp_dir: temp_dir,
    }
}

pub fn owner() -> Requester {
    Requester::user("u1")
}

pub fn stranger() -> Requester {
    Requester::user("u2")
}

pub fn admin() -> Requester {
    Requester::admin("root")
}

pub fn options(is_public: bool) -> UploadOptionsInput {
    UploadOptionsInput {
        is_public: Some(is_public.to_string()),
        ..UploadOptionsInput::default()
    }
}

/// A smooth gradient photo, so both derivatives decode cleanly.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("encode jpeg");
    buf
}

/// A JPEG whose EXIF block places it at the given GPS degrees.
pub fn jpeg_with_gps(latitude: (u32, &str), longitude: (u32, &str)) -> Vec<u8> {
    use exif::{Field, In, Rational, Tag, Value};

    let degrees = |d: u32| {
        Value::Rational(vec![
            Rational { num: d, denom: 1 },
            Rational { num: 0, denom: 1 },
            Rational { num: 0, denom: 1 },
        ])
    };
    let field = |tag, value| Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    };
    let fields = [
        field(Tag::Make, Value::Ascii(vec![b"Acme".to_vec()])),
        field(Tag::GPSLatitudeRef, Value::Ascii(vec![latitude.1.as_bytes().to_vec()])),
        field(Tag::GPSLatitude, degrees(latitude.0)),
        field(Tag::GPSLongitudeRef, Value::Ascii(vec![longitude.1.as_bytes().to_vec()])),
        field(Tag::GPSLongitude, degrees(longitude.0)),
    ];

    let mut writer = exif::experimental::Writer::new();
    for f in &fields {
        writer.push_field(f);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).expect("write exif");
    let tiff = tiff.into_inner();

    let jpeg = jpeg_bytes(64, 48);
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub async fn read_all(served: ServedFile) -> Vec<u8> {
    let mut stream = served.file.stream;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("chunk"));
    }
    out
}

/// Put a record and its bytes in place directly, bypassing upload.
pub async fn seed_file(
    t: &TestDepot,
    owner_id: &str,
    name: &str,
    data: &[u8],
    expires_at: Option<DateTime<Utc>>,
    location: Option<Location>,
) -> FileRecord {
    let folder = new_folder_id();
    let record = t
        .repo
        .insert(NewFileRecord {
            original_name: name.to_string(),
            stored_filename: String::new(),
            storage_path: String::new(),
            mimetype: "text/plain".to_string(),
            size: data.len() as i64,
            owner_id: owner_id.to_string(),
            entity_id: None,
            entity_type: EntityType::Other,
            is_public: false,
            tags: BTreeSet::new(),
            expires_at,
            compression: CompressionInfo::not_needed(data.len() as i64, Some(folder.clone())),
            metadata: Metadata {
                location,
                ..Metadata::default()
            },
        })
        .await
        .expect("insert");

    let filename = stored_filename(owner_id, record.id, Some("txt"));
    let temp = t.depot.storage.stage_upload(data).await.expect("stage");
    let key = t
        .depot
        .storage
        .move_into_place(&temp, &folder, &filename)
        .await
        .expect("move");
    assert_eq!(key, folder_key(&folder, &filename));
    t.repo
        .set_location(record.id, &filename, &key)
        .await
        .expect("set location")
}

pub fn missing_id() -> Uuid {
    Uuid::new_v4()
}

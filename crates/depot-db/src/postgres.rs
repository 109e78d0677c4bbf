use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{CompressionInfo, EntityType, FileRecord, Metadata, NewFileRecord};
use depot_core::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::query::BoundingBox;
use crate::repository::FileRepository;

/// Connect to PostgreSQL and apply pending migrations from this crate's `migrations/`.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(max_connections, "Database connected successfully");

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

const SELECT_FILES: &str = "SELECT id, original_name, stored_filename, storage_path, mimetype, size, \
     owner_id, entity_id, entity_type, is_public, tags, expires_at, created_at, updated_at, \
     compression, metadata FROM files";

#[derive(Debug, FromRow)]
struct FileRow {
    id: Uuid,
    original_name: String,
    stored_filename: String,
    storage_path: String,
    mimetype: String,
    size: i64,
    owner_id: String,
    entity_id: Option<String>,
    entity_type: String,
    is_public: bool,
    tags: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    compression: Json<CompressionInfo>,
    metadata: Json<Metadata>,
}

impl FileRow {
    fn into_record(self) -> Result<FileRecord, AppError> {
        let entity_type = self.entity_type.parse::<EntityType>().map_err(|e| {
            AppError::Internal(format!("Corrupt entity_type on file {}: {}", self.id, e))
        })?;
        Ok(FileRecord {
            id: self.id,
            original_name: self.original_name,
            stored_filename: self.stored_filename,
            storage_path: self.storage_path,
            mimetype: self.mimetype,
            size: self.size,
            owner_id: self.owner_id,
            entity_id: self.entity_id,
            entity_type,
            is_public: self.is_public,
            tags: self.tags.into_iter().collect(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            compression: self.compression.0,
            metadata: self.metadata.0,
        })
    }
}

fn rows_to_records(rows: Vec<FileRow>) -> Result<Vec<FileRecord>, AppError> {
    rows.into_iter().map(FileRow::into_record).collect()
}

fn coordinates(metadata: &Metadata) -> (Option<f64>, Option<f64>) {
    metadata
        .location
        .as_ref()
        .map(|l| (Some(l.latitude), Some(l.longitude)))
        .unwrap_or((None, None))
}

#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(
        &self,
        clause: &str,
        bind: impl FnOnce(
            sqlx::query::QueryAs<'_, Postgres, FileRow, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::QueryAs<'_, Postgres, FileRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<FileRecord>, AppError> {
        let sql = format!("{} WHERE {} ORDER BY created_at ASC, id ASC", SELECT_FILES, clause);
        let rows = bind(sqlx::query_as::<Postgres, FileRow>(&sql))
            .fetch_all(&self.pool)
            .await?;
        rows_to_records(rows)
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.operation = "insert", owner_id = %record.owner_id))]
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord, AppError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let tags: Vec<String> = record.tags.iter().cloned().collect();
        let (latitude, longitude) = coordinates(&record.metadata);

        let row: FileRow = sqlx::query_as::<Postgres, FileRow>(
            r#"
            INSERT INTO files (
                id, original_name, stored_filename, storage_path, mimetype, size, owner_id,
                entity_id, entity_type, is_public, tags, expires_at, created_at, updated_at,
                compression, metadata, latitude, longitude
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13, $14, $15, $16, $17)
            RETURNING id, original_name, stored_filename, storage_path, mimetype, size,
                owner_id, entity_id, entity_type, is_public, tags, expires_at, created_at,
                updated_at, compression, metadata
            "#,
        )
        .bind(id)
        .bind(&record.original_name)
        .bind(&record.stored_filename)
        .bind(&record.storage_path)
        .bind(&record.mimetype)
        .bind(record.size)
        .bind(&record.owner_id)
        .bind(&record.entity_id)
        .bind(record.entity_type.as_str())
        .bind(record.is_public)
        .bind(&tags)
        .bind(record.expires_at)
        .bind(now)
        .bind(Json(&record.compression))
        .bind(Json(&record.metadata))
        .bind(latitude)
        .bind(longitude)
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        let sql = format!("{} WHERE id = $1", SELECT_FILES);
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FileRow::into_record).transpose()
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "files", count = ids.len()))]
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError> {
        let ids = ids.to_vec();
        self.fetch_where("id = ANY($1)", |q| q.bind(ids)).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn set_location(
        &self,
        id: Uuid,
        stored_filename: &str,
        storage_path: &str,
    ) -> Result<FileRecord, AppError> {
        let row: FileRow = sqlx::query_as::<Postgres, FileRow>(
            r#"
            UPDATE files SET stored_filename = $2, storage_path = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, original_name, stored_filename, storage_path, mimetype, size,
                owner_id, entity_id, entity_type, is_public, tags, expires_at, created_at,
                updated_at, compression, metadata
            "#,
        )
        .bind(id)
        .bind(stored_filename)
        .bind(storage_path)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.operation = "update", db.record_id = %record.id))]
    async fn update(&self, record: &FileRecord) -> Result<FileRecord, AppError> {
        let tags: Vec<String> = record.tags.iter().cloned().collect();
        let (latitude, longitude) = coordinates(&record.metadata);

        let row: FileRow = sqlx::query_as::<Postgres, FileRow>(
            r#"
            UPDATE files SET
                is_public = $2, tags = $3, expires_at = $4, entity_type = $5, entity_id = $6,
                metadata = $7, latitude = $8, longitude = $9, updated_at = $10
            WHERE id = $1
            RETURNING id, original_name, stored_filename, storage_path, mimetype, size,
                owner_id, entity_id, entity_type, is_public, tags, expires_at, created_at,
                updated_at, compression, metadata
            "#,
        )
        .bind(record.id)
        .bind(record.is_public)
        .bind(&tags)
        .bind(record.expires_at)
        .bind(record.entity_type.as_str())
        .bind(&record.entity_id)
        .bind(Json(&record.metadata))
        .bind(latitude)
        .bind(longitude)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    #[tracing::instrument(skip(self, info), fields(db.table = "files", db.record_id = %id, status = %info.status))]
    async fn complete_compression(
        &self,
        id: Uuid,
        info: &CompressionInfo,
    ) -> Result<bool, AppError> {
        if !info.status.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE files SET compression = $2, updated_at = $3
            WHERE id = $1 AND compression->>'status' = 'processing'
            "#,
        )
        .bind(id)
        .bind(Json(info))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "delete", db.record_id = %id))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, AppError> {
        let owner_id = owner_id.to_string();
        self.fetch_where("owner_id = $1", |q| q.bind(owner_id)).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<FileRecord>, AppError> {
        let entity_id = entity_id.to_string();
        self.fetch_where("entity_type = $1 AND entity_id = $2", |q| {
            q.bind(entity_type.as_str()).bind(entity_id)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_public(&self) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_where("is_public = TRUE", |q| q).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_where("expires_at IS NOT NULL AND expires_at < $1", |q| q.bind(now))
            .await
    }

    #[tracing::instrument(skip(self, tags), fields(db.table = "files", tag_count = tags.len()))]
    async fn list_by_tags(&self, tags: &BTreeSet<String>) -> Result<Vec<FileRecord>, AppError> {
        let tags: Vec<String> = tags.iter().cloned().collect();
        self.fetch_where("tags && $1::text[]", |q| q.bind(tags)).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_in_bounding_box(
        &self,
        bbox: BoundingBox,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_where(
            "latitude BETWEEN $1 AND $2 AND longitude BETWEEN $3 AND $4",
            |q| {
                q.bind(bbox.min_lat)
                    .bind(bbox.max_lat)
                    .bind(bbox.min_lon)
                    .bind(bbox.max_lon)
            },
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_stuck_processing(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_where(
            "compression->>'status' = 'processing' AND created_at < $1",
            |q| q.bind(created_before),
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError> {
        self.fetch_where("TRUE", |q| q).await
    }
}

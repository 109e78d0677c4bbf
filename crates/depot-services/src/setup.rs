//! Wiring every service from one [`DepotConfig`].

use std::path::{Component, Path};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use depot_core::DepotConfig;
use depot_db::{connect, FileRepository, InMemoryFileRepository, PgFileRepository};
use depot_processing::CompressionPipeline;
use depot_storage::LocalStorage;
use depot_worker::{normalize_stuck_processing, CompressionDispatcher, DispatcherConfig, DrainReport};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveService;
use crate::cleanup::CleanupService;
use crate::files::{FileService, FileServiceConfig};

/// Long-lived services sharing one repository, storage root and dispatcher.
pub struct Depot {
    pub config: DepotConfig,
    pub repository: Arc<dyn FileRepository>,
    pub storage: LocalStorage,
    pub dispatcher: CompressionDispatcher,
    pub files: FileService,
    pub archives: ArchiveService,
    pub cleanup: Arc<CleanupService>,
    started_at: DateTime<Utc>,
    shutdown: CancellationToken,
}

/// Top-level directory name of `dir` when it lives directly under `root`.
fn reserved_dir_name(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => name.to_str().map(str::to_string),
        _ => None,
    }
}

/// PostgreSQL when `DATABASE_URL` is set, the in-memory store otherwise.
pub async fn open_repository(config: &DepotConfig) -> anyhow::Result<Arc<dyn FileRepository>> {
    match &config.database_url {
        Some(url) => {
            let pool = connect(url, config.db_max_connections)
                .await
                .context("Failed to connect to database")?;
            Ok(Arc::new(PgFileRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory only");
            Ok(Arc::new(InMemoryFileRepository::new()))
        }
    }
}

impl Depot {
    /// Must run inside a Tokio runtime.
    pub async fn initialize(
        config: DepotConfig,
        repository: Arc<dyn FileRepository>,
    ) -> anyhow::Result<Self> {
        let mut storage = LocalStorage::new(&config.storage_root)
            .await
            .with_context(|| {
                format!(
                    "Failed to initialize storage root {}",
                    config.storage_root.display()
                )
            })?;
        if let Some(name) = reserved_dir_name(&config.storage_root, &config.archive_dir) {
            storage = storage.with_reserved_dir(name);
        }

        let pipeline = CompressionPipeline::new(storage.clone(), &config.compression);
        let dispatcher = CompressionDispatcher::new(
            pipeline,
            Arc::clone(&repository),
            DispatcherConfig::from(&config),
        );

        let files = FileService::new(
            Arc::clone(&repository),
            storage.clone(),
            dispatcher.clone(),
            FileServiceConfig::from(&config),
        );
        let archives = ArchiveService::new(
            Arc::clone(&repository),
            storage.clone(),
            config.archive_dir.clone(),
        );
        let cleanup = Arc::new(CleanupService::new(Arc::clone(&repository), storage.clone()));

        tracing::info!(
            storage_root = %config.storage_root.display(),
            archive_dir = %config.archive_dir.display(),
            compression_enabled = config.compression.enabled,
            "Depot services initialized"
        );

        Ok(Self {
            config,
            repository,
            storage,
            dispatcher,
            files,
            archives,
            cleanup,
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Settle records a previous process left `processing`, then start the
    /// periodic sweeps. Call once at startup. Records created after this depot
    /// was initialized belong to live jobs and are left alone.
    pub async fn start_background(&self) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let normalized = normalize_stuck_processing(
            self.repository.as_ref(),
            self.dispatcher.pipeline(),
            self.started_at,
        )
        .await
            .context("Failed to normalize stuck compression records")?;
        if normalized > 0 {
            tracing::warn!(normalized, "Recovered compression records from a previous run");
        }

        Ok(Arc::clone(&self.cleanup).start(
            self.config.folder_sweep_interval(),
            self.config.expired_sweep_interval(),
            self.shutdown.clone(),
        ))
    }

    /// Stop the sweeps and drain in-flight compression for the configured window.
    pub async fn shutdown(&self) -> DrainReport {
        self.shutdown.cancel();
        self.dispatcher.shutdown(self.config.shutdown_drain()).await
    }
}

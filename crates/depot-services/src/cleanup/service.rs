use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_core::AppResult;
use depot_db::FileRepository;
use depot_storage::LocalStorage;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::files::remove_stored_files;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderSweepReport {
    pub scanned: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct CleanupService {
    repository: Arc<dyn FileRepository>,
    storage: LocalStorage,
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    })
}

impl CleanupService {
    pub fn new(repository: Arc<dyn FileRepository>, storage: LocalStorage) -> Self {
        Self {
            repository,
            storage,
        }
    }

    /// Run the sweeps on their own schedules until `shutdown` fires. A `None`
    /// interval disables that sweep.
    pub fn start(
        self: Arc<Self>,
        folder_interval: Option<Duration>,
        expired_interval: Option<Duration>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut folders = timer(folder_interval);
            let mut expired = timer(expired_interval);

            tracing::info!(
                folder_interval_secs = folder_interval.map(|d| d.as_secs()),
                expired_interval_secs = expired_interval.map(|d| d.as_secs()),
                "Cleanup sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick(&mut folders) => {
                        if let Err(e) = self.sweep_empty_folders().await {
                            tracing::error!(error = %e, "Folder sweep failed");
                        }
                    }
                    _ = tick(&mut expired) => {
                        if let Err(e) = self.cleanup_expired_files(Utc::now()).await {
                            tracing::error!(error = %e, "Expired file cleanup failed");
                        }
                    }
                }
            }

            tracing::info!("Cleanup sweeper stopped");
        })
    }

    /// Remove every top-level folder that is empty at the moment it is checked.
    ///
    /// The check and the removal are not atomic with respect to a compression
    /// job writing into the same folder; such a job fails and records `failed`.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "sweep_folders"))]
    pub async fn sweep_empty_folders(&self) -> AppResult<FolderSweepReport> {
        let folders = self.storage.list_folders().await?;
        let mut report = FolderSweepReport {
            scanned: folders.len(),
            removed: 0,
        };

        for folder in &folders {
            match self.storage.remove_folder_if_empty(folder).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(folder_id = %folder, error = %e, "Failed to sweep folder");
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            removed = report.removed,
            "Folder sweep completed"
        );
        Ok(report)
    }

    /// Delete every record whose `expiresAt` is before `now`, with its bytes.
    ///
    /// Returns how many records were deleted. A failure on one record is
    /// logged and the sweep moves on to the next.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "expire_all"))]
    pub async fn cleanup_expired_files(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let expired = self.repository.list_expired(now).await?;
        let found = expired.len();
        let mut deleted = 0;

        for record in expired {
            tracing::info!(
                file_id = %record.id,
                storage_path = %record.storage_path,
                expires_at = ?record.expires_at,
                "Deleting expired file"
            );

            remove_stored_files(&self.storage, &record).await;

            match self.repository.delete(record.id).await {
                Ok(true) => {
                    deleted += 1;
                    tracing::debug!(file_id = %record.id, "Expired record deleted");
                }
                Ok(false) => {
                    tracing::debug!(file_id = %record.id, "Expired record already gone");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        file_id = %record.id,
                        "Failed to delete expired record"
                    );
                }
            }
        }

        tracing::info!(found, deleted, "Expired file cleanup completed");
        Ok(deleted)
    }
}

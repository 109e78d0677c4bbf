use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depot_core::DepotConfig;
use depot_db::FileRepository;
use depot_processing::{CompressionJob, CompressionPipeline};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::task::TaskTracker;

use crate::status::{run_recorder, StatusSender, StatusUpdate};

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// 0 means unbounded: every job starts immediately.
    pub max_concurrent: usize,
}

impl From<&DepotConfig> for DispatcherConfig {
    fn from(config: &DepotConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_compressions,
        }
    }
}

/// Outcome of a shutdown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub drained: bool,
    /// Jobs still running when the drain window closed.
    pub abandoned: usize,
}

/// Counts one dispatched job until its task ends, however it ends.
struct PendingJob {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PendingJob {
    fn start(pending: &Arc<AtomicUsize>, idle: &Arc<Notify>) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self {
            pending: Arc::clone(pending),
            idle: Arc::clone(idle),
        }
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Spawns one detached task per compression job.
///
/// Nobody awaits a job; its result reaches the repository through the status
/// channel. With `max_concurrent > 0` jobs still spawn immediately but wait for
/// a permit before doing any work.
#[derive(Clone)]
pub struct CompressionDispatcher {
    pipeline: Arc<CompressionPipeline>,
    status_tx: StatusSender,
    semaphore: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    accepting: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl CompressionDispatcher {
    /// Must be called from within a Tokio runtime: the status recorder is spawned here.
    pub fn new(
        pipeline: CompressionPipeline,
        repository: Arc<dyn FileRepository>,
        config: DispatcherConfig,
    ) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_recorder(repository, status_rx));

        let semaphore = (config.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent)));

        tracing::info!(
            max_concurrent = config.max_concurrent,
            "Compression dispatcher started"
        );

        Self {
            pipeline: Arc::new(pipeline),
            status_tx,
            semaphore,
            tracker: TaskTracker::new(),
            accepting: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Start a job in the background. Returns `false` once shutdown has begun.
    pub fn dispatch(&self, job: CompressionJob) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::warn!(file_id = %job.file_id, "Dispatcher shutting down, job not started");
            return false;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let status_tx = self.status_tx.clone();
        let semaphore = self.semaphore.clone();
        let pending = PendingJob::start(&self.pending, &self.idle);

        tracing::debug!(file_id = %job.file_id, "Compression job dispatched");

        self.tracker.spawn(async move {
            let _pending = pending;
            let _permit = match semaphore {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let info = pipeline.run(&job).await;
            let completed = info.is_completed();

            let (update, ack) = StatusUpdate::with_ack(job.file_id, info);
            if status_tx.send(update).is_err() {
                tracing::error!(file_id = %job.file_id, "Status channel closed, result lost");
                return;
            }

            // The original goes only after `completed` is stored.
            match ack.await {
                Ok(true) if completed => pipeline.release_original(&job).await,
                Ok(_) | Err(_) if completed => tracing::warn!(
                    file_id = %job.file_id,
                    "Completed status not recorded, original kept"
                ),
                _ => {}
            }
        });

        true
    }

    pub fn pipeline(&self) -> &CompressionPipeline {
        &self.pipeline
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Wait until no job is pending: every dispatched job has run, been
    /// recorded and released its original. Safe to call from several tasks.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs and give in-flight ones up to `drain` to finish.
    /// Jobs still running afterwards are abandoned and stay `processing`.
    pub async fn shutdown(&self, drain: Duration) -> DrainReport {
        self.accepting.store(false, Ordering::SeqCst);
        self.tracker.close();

        let in_flight = self.tracker.len();
        tracing::info!(in_flight, drain_secs = drain.as_secs(), "Draining compression jobs");

        match tokio::time::timeout(drain, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("Compression jobs drained");
                DrainReport {
                    drained: true,
                    abandoned: 0,
                }
            }
            Err(_) => {
                let abandoned = self.tracker.len();
                tracing::warn!(abandoned, "Drain window elapsed, abandoning compression jobs");
                DrainReport {
                    drained: false,
                    abandoned,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::models::{
        CompressionInfo, CompressionStatus, EntityType, Metadata, NewFileRecord,
    };
    use depot_core::CompressionConfig;
    use depot_db::InMemoryFileRepository;
    use depot_storage::LocalStorage;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::collections::BTreeSet;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn jpeg() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(64, 48, |x, y| {
            Rgb([x as u8, y as u8, 200])
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    async fn seeded(
        storage: &LocalStorage,
        repo: &InMemoryFileRepository,
        data: &[u8],
    ) -> CompressionJob {
        let record = repo
            .insert(NewFileRecord {
                original_name: "photo.jpg".to_string(),
                stored_filename: String::new(),
                storage_path: String::new(),
                mimetype: "image/jpeg".to_string(),
                size: data.len() as i64,
                owner_id: "u1".to_string(),
                entity_id: None,
                entity_type: EntityType::Other,
                is_public: false,
                tags: BTreeSet::new(),
                expires_at: None,
                compression: CompressionInfo::processing(data.len() as i64, Some("f1".into())),
                metadata: Metadata::default(),
            })
            .await
            .unwrap();
        let name = format!("u1_{}.jpg", record.id);
        let temp = storage.stage_upload(data).await.unwrap();
        let key = storage.move_into_place(&temp, "f1", &name).await.unwrap();
        let record = repo.set_location(record.id, &name, &key).await.unwrap();
        CompressionJob::from_record(&record)
    }

    #[tokio::test]
    async fn test_dispatch_records_terminal_status() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let repo = InMemoryFileRepository::new();
        let pipeline = CompressionPipeline::new(storage.clone(), &CompressionConfig::default());
        let dispatcher =
            CompressionDispatcher::new(pipeline, Arc::new(repo.clone()), DispatcherConfig::default());

        let ok = seeded(&storage, &repo, &jpeg()).await;
        let bad = seeded(&storage, &repo, b"broken").await;
        assert!(dispatcher.dispatch(ok.clone()));
        assert!(dispatcher.dispatch(bad.clone()));
        dispatcher.wait_idle().await;

        let ok_record = repo.get(ok.file_id).await.unwrap().unwrap();
        assert_eq!(ok_record.compression.status, CompressionStatus::Completed);
        assert_eq!(ok_record.compression.folder_id.as_deref(), Some("f1"));

        let bad_record = repo.get(bad.file_id).await.unwrap().unwrap();
        assert_eq!(bad_record.compression.status, CompressionStatus::Failed);
        assert_eq!(bad_record.compression.folder_id.as_deref(), Some("f1"));

        // Still accepting after an idle wait.
        assert!(dispatcher.is_accepting());
    }

    #[tokio::test]
    async fn test_bounded_dispatch_completes_all() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let repo = InMemoryFileRepository::new();
        let pipeline = CompressionPipeline::new(storage.clone(), &CompressionConfig::default());
        let dispatcher = CompressionDispatcher::new(
            pipeline,
            Arc::new(repo.clone()),
            DispatcherConfig { max_concurrent: 1 },
        );

        let data = jpeg();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = seeded(&storage, &repo, &data).await;
            ids.push(job.file_id);
            dispatcher.dispatch(job);
        }
        dispatcher.wait_idle().await;

        for id in ids {
            let record = repo.get(id).await.unwrap().unwrap();
            assert_eq!(record.compression.status, CompressionStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_rejected_completion_keeps_original() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let repo = InMemoryFileRepository::new();
        let pipeline = CompressionPipeline::new(storage.clone(), &CompressionConfig::default());
        let dispatcher =
            CompressionDispatcher::new(pipeline, Arc::new(repo.clone()), DispatcherConfig::default());

        let data = jpeg();
        let job = seeded(&storage, &repo, &data).await;
        // Another actor settles the record before the job reports.
        let settled = CompressionInfo::not_needed(data.len() as i64, Some("f1".into()));
        assert!(repo.complete_compression(job.file_id, &settled).await.unwrap());

        assert!(dispatcher.dispatch(job.clone()));
        dispatcher.wait_idle().await;

        let record = repo.get(job.file_id).await.unwrap().unwrap();
        assert_eq!(record.compression.status, CompressionStatus::NotNeeded);
        assert!(storage.exists(&job.storage_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_idle_waits() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let repo = InMemoryFileRepository::new();
        let pipeline = CompressionPipeline::new(storage.clone(), &CompressionConfig::default());
        let dispatcher =
            CompressionDispatcher::new(pipeline, Arc::new(repo.clone()), DispatcherConfig::default());

        let data = jpeg();
        let first = seeded(&storage, &repo, &data).await;
        let second = seeded(&storage, &repo, &data).await;
        dispatcher.dispatch(first.clone());
        dispatcher.dispatch(second.clone());

        tokio::join!(dispatcher.wait_idle(), dispatcher.wait_idle());
        for id in [first.file_id, second.file_id] {
            let record = repo.get(id).await.unwrap().unwrap();
            assert_eq!(record.compression.status, CompressionStatus::Completed);
        }

        // Idle again with nothing pending.
        dispatcher.wait_idle().await;
        assert!(dispatcher.is_accepting());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let repo = InMemoryFileRepository::new();
        let pipeline = CompressionPipeline::new(storage.clone(), &CompressionConfig::default());
        let dispatcher =
            CompressionDispatcher::new(pipeline, Arc::new(repo.clone()), DispatcherConfig::default());

        let report = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert!(report.drained);
        assert_eq!(report.abandoned, 0);

        let job = seeded(&storage, &repo, &jpeg()).await;
        assert!(!dispatcher.dispatch(job.clone()));
        let record = repo.get(job.file_id).await.unwrap().unwrap();
        assert_eq!(record.compression.status, CompressionStatus::Processing);
    }
}

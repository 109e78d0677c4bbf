use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use depot_core::access::ensure_can_view;
use depot_core::constants::DEFAULT_ARCHIVE_NAME;
use depot_core::models::Requester;
use depot_core::{AppError, AppResult};
use depot_db::FileRepository;
use depot_storage::LocalStorage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::files::serve_key;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub file_ids: Vec<Uuid>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub path: PathBuf,
    pub size: u64,
    pub file_count: usize,
}

/// One file to copy into the archive.
struct ArchiveEntry {
    name: String,
    source: PathBuf,
}

/// Builds ZIP archives of access-checked files into a dedicated directory.
#[derive(Clone)]
pub struct ArchiveService {
    repository: Arc<dyn FileRepository>,
    storage: LocalStorage,
    archive_dir: PathBuf,
}

/// Base name only, so entries can never escape the archive root.
fn sanitize_entry_name(filename: &str, fallback: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// `photo.jpg`, `photo (1).jpg`, `photo (2).jpg`, ...
fn dedupe_entry_name(name: String, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(name.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        return name;
    }

    let path = Path::new(&name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(&name);
    let candidate = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, *count - 1, ext),
        None => format!("{} ({})", stem, *count - 1),
    };
    // The suffixed name may itself collide with a later original.
    dedupe_entry_name(candidate, seen)
}

/// Archive file stem: caller's name (base name, no `.zip`) or the default,
/// plus a short random suffix so concurrent requests never share a path.
fn archive_stem(name: Option<&str>) -> String {
    let base = name
        .map(|n| sanitize_entry_name(n.trim(), DEFAULT_ARCHIVE_NAME))
        .map(|n| n.trim_end_matches(".zip").to_string())
        .filter(|n| !n.is_empty() && !n.starts_with('.'))
        .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", base, &suffix[..8])
}

/// Stream every entry into a ZIP at `partial`, Deflate level 9, and finish it.
/// Remove a partial archive, logging anything left behind. Returns `true`
/// when no partial file remains.
async fn discard_partial(partial: &Path) -> bool {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial archive");
            false
        }
    }
}

fn write_zip(partial: &Path, entries: &[ArchiveEntry]) -> anyhow::Result<()> {
    use zip::write::{FileOptions, ZipWriter};
    use zip::CompressionMethod;

    let file = File::create(partial)
        .with_context(|| format!("Failed to create archive: {}", partial.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .unix_permissions(0o644);

    for entry in entries {
        let mut source = File::open(&entry.source)
            .with_context(|| format!("Failed to open file: {}", entry.source.display()))?;

        zip.start_file(entry.name.as_str(), options)
            .with_context(|| format!("Failed to add file to ZIP: {}", entry.name))?;
        std::io::copy(&mut source, &mut zip)
            .with_context(|| format!("Failed to write file data to ZIP: {}", entry.name))?;
    }

    let mut writer = zip.finish().context("Failed to finalize ZIP archive")?;
    writer.flush().context("Failed to flush ZIP archive")?;
    writer
        .get_ref()
        .sync_all()
        .context("Failed to sync ZIP archive")?;
    Ok(())
}

impl ArchiveService {
    pub fn new(
        repository: Arc<dyn FileRepository>,
        storage: LocalStorage,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository,
            storage,
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Build one ZIP from `request.file_ids`.
    ///
    /// Every id must pass the view check before any byte is written; one
    /// denial fails the whole request. The archive is written beside its final
    /// path and renamed into place only once the ZIP is finished, so a path in
    /// an [`ArchiveResult`] always names a complete archive.
    #[tracing::instrument(
        skip(self, requester, request),
        fields(requester_id = %requester.id, file_count = request.file_ids.len())
    )]
    pub async fn create_archive(
        &self,
        requester: &Requester,
        request: ArchiveRequest,
    ) -> AppResult<ArchiveResult> {
        let start = Instant::now();

        let mut seen_ids = HashSet::new();
        let ids: Vec<Uuid> = request
            .file_ids
            .iter()
            .copied()
            .filter(|id| seen_ids.insert(*id))
            .collect();
        if ids.is_empty() {
            return Err(AppError::validation("At least one file id is required"));
        }

        let records = self.repository.get_many(&ids).await?;
        let mut by_id: HashMap<Uuid, _> = records.into_iter().map(|r| (r.id, r)).collect();

        let mut ordered = Vec::with_capacity(ids.len());
        for id in &ids {
            let record = by_id
                .remove(id)
                .ok_or_else(|| AppError::not_found(format!("File {} not found", id)))?;
            ensure_can_view(&record, requester)?;
            ordered.push(record);
        }

        let mut names = HashMap::new();
        let mut entries = Vec::with_capacity(ordered.len());
        for record in &ordered {
            let (key, _) = serve_key(record);
            let source = self.storage.key_to_path(&key)?;
            let fallback = format!("unnamed_{}", record.id);
            let name = dedupe_entry_name(
                sanitize_entry_name(&record.served_name(), &fallback),
                &mut names,
            );
            entries.push(ArchiveEntry { name, source });
        }

        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|e| {
                tracing::error!(dir = %self.archive_dir.display(), error = %e, "Failed to create archive directory");
                AppError::compression(format!("Failed to create archive directory: {}", e))
            })?;

        let stem = archive_stem(request.name.as_deref());
        let final_path = self.archive_dir.join(format!("{}.zip", stem));
        let partial = self.archive_dir.join(format!("{}.zip.partial", stem));

        let file_count = entries.len();
        let partial_for_write = partial.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&partial_for_write, &entries))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        if let Err(e) = written {
            tracing::error!(error = %format!("{:#}", e), path = %partial.display(), "Archive creation failed");
            discard_partial(&partial).await;
            return Err(AppError::compression(format!("{:#}", e)));
        }

        if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
            tracing::error!(error = %e, path = %final_path.display(), "Failed to publish archive");
            discard_partial(&partial).await;
            return Err(AppError::compression(format!("Failed to publish archive: {}", e)));
        }

        let size = match tokio::fs::metadata(&final_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Err(AppError::compression(format!(
                    "Failed to stat archive: {}",
                    e
                )))
            }
        };

        tracing::info!(
            path = %final_path.display(),
            size,
            file_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Archive created"
        );

        Ok(ArchiveResult {
            path: final_path,
            size,
            file_count,
        })
    }
}

//! Served-URL materialization.
//!
//! List paths omit URLs the requester may not use; the missing URL is the denial.
//! Shapes: `/files/{id}/serve`, `/files/{id}/download`, `/files/{id}/compressed/{png|webp}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::models::{CompressionType, FileRecord, Requester};

/// Builds URLs under an optional public base (e.g. `https://files.example.com`).
#[derive(Debug, Clone, Default)]
pub struct UrlBuilder {
    base_url: String,
}

impl UrlBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn serve(&self, id: Uuid) -> String {
        format!("{}/files/{}/serve", self.base_url, id)
    }

    pub fn download(&self, id: Uuid) -> String {
        format!("{}/files/{}/download", self.base_url, id)
    }

    pub fn compressed(&self, id: Uuid, format: CompressionType) -> Option<String> {
        format
            .extension()
            .map(|ext| format!("{}/files/{}/compressed/{}", self.base_url, id, ext))
    }
}

/// Which bytes the default serve URL resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeTarget {
    Original,
    Png,
    Webp,
}

impl ServeTarget {
    pub fn for_record(record: &FileRecord) -> Self {
        match record.compression.primary() {
            Some(CompressionType::Webp) => ServeTarget::Webp,
            Some(CompressionType::Png) => ServeTarget::Png,
            _ => ServeTarget::Original,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webp_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_target: Option<ServeTarget>,
}

impl FileUrls {
    /// Materialize the URLs `requester` is allowed to use.
    pub fn for_requester(builder: &UrlBuilder, record: &FileRecord, requester: &Requester) -> Self {
        let view = record.viewable_by(requester);
        let download = record.downloadable_by(requester);
        let completed = record.compression.is_completed();

        FileUrls {
            serve_url: view.then(|| builder.serve(record.id)),
            download_url: download.then(|| builder.download(record.id)),
            png_url: (view && completed)
                .then(|| builder.compressed(record.id, CompressionType::Png))
                .flatten(),
            webp_url: (view && completed)
                .then(|| builder.compressed(record.id, CompressionType::Webp))
                .flatten(),
            serve_target: view.then(|| ServeTarget::for_record(record)),
        }
    }
}

/// A record paired with its materialized URLs, as returned by list and get paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    #[serde(flatten)]
    pub record: FileRecord,
    #[serde(flatten)]
    pub urls: FileUrls,
    pub can_view: bool,
    pub can_download: bool,
}

impl FileView {
    pub fn new(builder: &UrlBuilder, record: FileRecord, requester: &Requester) -> Self {
        let urls = FileUrls::for_requester(builder, &record, requester);
        let can_view = record.viewable_by(requester);
        let can_download = record.downloadable_by(requester);
        Self {
            record,
            urls,
            can_view,
            can_download,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CompressionInfo, CompressionStatus, EntityType, Metadata, NewFileRecord,
    };
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn record(is_public: bool) -> FileRecord {
        NewFileRecord {
            original_name: "photo.jpg".to_string(),
            stored_filename: "u1_x.jpg".to_string(),
            storage_path: "abc/u1_x.jpg".to_string(),
            mimetype: "image/jpeg".to_string(),
            size: 2_000_000,
            owner_id: "u1".to_string(),
            entity_id: None,
            entity_type: EntityType::Other,
            is_public,
            tags: BTreeSet::new(),
            expires_at: None,
            compression: CompressionInfo::processing(2_000_000, Some("abc".to_string())),
            metadata: Metadata::default(),
        }
        .into_record(Uuid::new_v4(), Utc::now())
    }

    fn complete(record: &mut FileRecord, primary: CompressionType) {
        record.compression.status = CompressionStatus::Completed;
        record.compression.compressed = true;
        record.compression.compression_type = primary;
    }

    #[test]
    fn test_urls_omitted_when_denied() {
        let builder = UrlBuilder::new("");
        let urls = FileUrls::for_requester(&builder, &record(false), &Requester::user("u2"));
        assert_eq!(urls, FileUrls::default());
    }

    #[test]
    fn test_urls_present_for_owner_before_completion() {
        let builder = UrlBuilder::new("https://cdn.example.com/");
        let r = record(false);
        let urls = FileUrls::for_requester(&builder, &r, &Requester::user("u1"));
        assert_eq!(
            urls.serve_url.as_deref(),
            Some(format!("https://cdn.example.com/files/{}/serve", r.id).as_str())
        );
        assert!(urls.download_url.is_some());
        assert!(urls.png_url.is_none());
        assert!(urls.webp_url.is_none());
        assert_eq!(urls.serve_target, Some(ServeTarget::Original));
    }

    #[test]
    fn test_default_target_follows_primary() {
        let builder = UrlBuilder::default();
        for (primary, target) in [
            (CompressionType::Webp, ServeTarget::Webp),
            (CompressionType::Png, ServeTarget::Png),
            (CompressionType::Both, ServeTarget::Original),
        ] {
            let mut r = record(true);
            complete(&mut r, primary);
            let urls = FileUrls::for_requester(&builder, &r, &Requester::user("anyone"));
            assert_eq!(urls.serve_target, Some(target));
            assert_eq!(
                urls.png_url,
                Some(format!("/files/{}/compressed/png", r.id))
            );
            assert_eq!(
                urls.webp_url,
                Some(format!("/files/{}/compressed/webp", r.id))
            );
        }
    }

    #[test]
    fn test_file_view_flags() {
        let view = FileView::new(&UrlBuilder::default(), record(false), &Requester::admin("root"));
        assert!(view.can_view);
        assert!(view.can_download);
    }
}

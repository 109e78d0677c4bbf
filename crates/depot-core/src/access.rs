//! Access decisions for every read, download, archive and list path.
//!
//! These are pure functions: they never touch storage or the metadata store.

use crate::error::AppError;
use crate::models::{FileRecord, Requester, Role};

/// True iff the file is public, the requester owns it, or the requester is an admin.
pub fn can_view(is_public: bool, owner_id: &str, requester_id: &str, requester_role: Role) -> bool {
    is_public || owner_id == requester_id || requester_role == Role::Admin
}

/// Download rights are the same as view rights.
pub fn can_download(
    is_public: bool,
    owner_id: &str,
    requester_id: &str,
    requester_role: Role,
) -> bool {
    can_view(is_public, owner_id, requester_id, requester_role)
}

/// Only the owner or an admin may change or delete a record.
pub fn can_modify(owner_id: &str, requester_id: &str, requester_role: Role) -> bool {
    owner_id == requester_id || requester_role == Role::Admin
}

/// Record-level helpers for callers that already hold a [`FileRecord`].
pub trait AccessPolicy {
    fn viewable_by(&self, requester: &Requester) -> bool;
    fn downloadable_by(&self, requester: &Requester) -> bool;
    fn modifiable_by(&self, requester: &Requester) -> bool;
}

impl AccessPolicy for FileRecord {
    fn viewable_by(&self, requester: &Requester) -> bool {
        can_view(self.is_public, &self.owner_id, &requester.id, requester.role)
    }

    fn downloadable_by(&self, requester: &Requester) -> bool {
        can_download(self.is_public, &self.owner_id, &requester.id, requester.role)
    }

    fn modifiable_by(&self, requester: &Requester) -> bool {
        can_modify(&self.owner_id, &requester.id, requester.role)
    }
}

/// Single-record read paths raise an explicit failure instead of omitting URLs.
pub fn ensure_can_view(record: &FileRecord, requester: &Requester) -> Result<(), AppError> {
    if record.viewable_by(requester) {
        Ok(())
    } else {
        Err(AppError::authorization(format!(
            "Access denied to file {}",
            record.id
        )))
    }
}

pub fn ensure_can_download(record: &FileRecord, requester: &Requester) -> Result<(), AppError> {
    if record.downloadable_by(requester) {
        Ok(())
    } else {
        Err(AppError::authorization(format!(
            "Download denied for file {}",
            record.id
        )))
    }
}

pub fn ensure_can_modify(record: &FileRecord, requester: &Requester) -> Result<(), AppError> {
    if record.modifiable_by(requester) {
        Ok(())
    } else {
        Err(AppError::authorization(format!(
            "Only the owner or an admin can modify file {}",
            record.id
        )))
    }
}

use crate::CoreError;
use satchel_schema::{LibraryId, LibraryRecord};
use satchel_store::StorageProvider;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// What to do with a library found in an uploaded package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "existing", rename_all = "kebab-case")]
pub enum Classification {
    /// Not installed under this name and major/minor version.
    New,
    /// Installed, and the upload supersedes the installed copy.
    Patch(LibraryId),
    /// Installed at the same or a newer patch level; the upload is discarded.
    UpToDate(LibraryId),
}

impl Classification {
    /// Whether the record and its dependency rows should be written.
    pub fn needs_save(&self) -> bool {
        !matches!(self, Classification::UpToDate(_))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::New => write!(f, "new"),
            Classification::Patch(id) => write!(f, "patch of {id}"),
            Classification::UpToDate(id) => write!(f, "up to date ({id})"),
        }
    }
}

pub struct VersionArbiter<'a, S: StorageProvider + ?Sized> {
    provider: &'a S,
}

impl<'a, S: StorageProvider + ?Sized> VersionArbiter<'a, S> {
    pub fn new(provider: &'a S) -> Self {
        Self { provider }
    }

    pub fn classify(&self, record: &LibraryRecord) -> Result<Classification, CoreError> {
        let Some(existing) = self.provider.installed_library(&record.identity)? else {
            debug!("{} is new", record.full_version());
            return Ok(Classification::New);
        };
        let outcome = if self.provider.is_patched_library(record)? {
            Classification::Patch(existing.id)
        } else {
            Classification::UpToDate(existing.id)
        };
        debug!(
            "{} against installed {}: {outcome}",
            record.full_version(),
            existing.record.full_version()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_schema::parse_manifest_str;
    use satchel_store::MemoryStorage;

    fn text(minor: u32, patch: u32) -> LibraryRecord {
        let manifest = parse_manifest_str(&format!(
            r#"{{"machineName": "H5P.Text", "majorVersion": 1, "minorVersion": {minor}, "patchVersion": {patch}}}"#
        ))
        .unwrap();
        LibraryRecord::from_manifest(manifest).unwrap()
    }

    #[test]
    fn classifies_three_ways() {
        let provider = MemoryStorage::new().with_library(text(1, 4));
        let arbiter = VersionArbiter::new(&provider);
        let id = LibraryId::new("H5P.Text-1.1");

        assert_eq!(arbiter.classify(&text(2, 0)).unwrap(), Classification::New);
        assert_eq!(
            arbiter.classify(&text(1, 5)).unwrap(),
            Classification::Patch(id.clone())
        );
        assert_eq!(
            arbiter.classify(&text(1, 4)).unwrap(),
            Classification::UpToDate(id.clone())
        );
        assert_eq!(
            arbiter.classify(&text(1, 2)).unwrap(),
            Classification::UpToDate(id)
        );
    }

    #[test]
    fn only_up_to_date_skips_save() {
        assert!(Classification::New.needs_save());
        assert!(Classification::Patch(LibraryId::new("x")).needs_save());
        assert!(!Classification::UpToDate(LibraryId::new("x")).needs_save());
    }

    #[test]
    fn serializes_with_outcome_tag() {
        let json = serde_json::to_value(Classification::Patch(LibraryId::new("H5P.Text-1.1"))).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "patch", "existing": "H5P.Text-1.1"}));
    }
}

use crate::fs::{read_record, record_names, Checksummed, ContentEntry, LibraryEntry, UsageEntry};
use crate::layout::StoreLayout;
use crate::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub libraries_checked: usize,
    pub libraries_passed: usize,
    pub content_checked: usize,
    pub content_passed: usize,
    pub usage_checked: usize,
    pub usage_passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct IntegrityFailure {
    pub id: String,
    pub reason: String,
}

/// Re-read every record in the store and check its embedded checksum.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    layout.verify_version()?;
    let mut report = IntegrityReport::default();

    (report.libraries_checked, report.libraries_passed) =
        check_dir::<LibraryEntry>(&layout.library_records_dir(), "library", &mut report.failed)?;
    (report.content_checked, report.content_passed) =
        check_dir::<ContentEntry>(&layout.content_records_dir(), "content", &mut report.failed)?;
    (report.usage_checked, report.usage_passed) =
        check_dir::<UsageEntry>(&layout.usage_dir(), "usage", &mut report.failed)?;

    Ok(report)
}

fn check_dir<T: Checksummed + DeserializeOwned>(
    dir: &Path,
    kind: &str,
    failed: &mut Vec<IntegrityFailure>,
) -> Result<(usize, usize), StoreError> {
    let names = record_names(dir)?;
    let mut passed = 0;
    for name in &names {
        match read_record::<T>(&dir.join(format!("{name}.json")), name) {
            Ok(_) => passed += 1,
            Err(StoreError::IntegrityFailure { actual, .. }) => failed.push(IntegrityFailure {
                id: format!("{kind}/{name}"),
                reason: format!("{kind} checksum mismatch: got {actual}"),
            }),
            Err(e) => failed.push(IntegrityFailure {
                id: format!("{kind}/{name}"),
                reason: format!("{kind} read error: {e}"),
            }),
        }
    }
    Ok((names.len(), passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsStorage;
    use crate::provider::{ContentRecord, StorageProvider};
    use satchel_schema::{parse_manifest_str, LibraryIdentity, LibraryRecord};
    use serde_json::json;
    use std::fs;

    fn populated_store() -> (tempfile::TempDir, FsStorage) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let store = FsStorage::new(layout);

        let manifest = parse_manifest_str(
            r#"{"machineName": "H5P.Text", "majorVersion": 1, "minorVersion": 1, "patchVersion": 0}"#,
        )
        .unwrap();
        store
            .save_library(&LibraryRecord::from_manifest(manifest).unwrap(), &[], None)
            .unwrap();
        store
            .save_content(
                &ContentRecord {
                    title: "c".to_owned(),
                    main_library: LibraryIdentity::new("H5P.Text", 1, 1),
                    parameters: json!({"text": "hi"}),
                    manifest: Default::default(),
                },
                &[],
                None,
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn clean_store_passes() {
        let (_dir, store) = populated_store();
        let report = verify_store_integrity(store.layout()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.libraries_checked, 1);
        assert_eq!(report.libraries_passed, 1);
        assert_eq!(report.content_passed, 1);
        assert_eq!(report.usage_passed, 1);
    }

    #[test]
    fn detects_tampered_content() {
        let (_dir, store) = populated_store();
        let path = store.layout().content_records_dir().join("1.json");
        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("\"hi\"", "\"<script>\"")).unwrap();

        let report = verify_store_integrity(store.layout()).unwrap();
        assert_eq!(report.content_passed, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "content/1");
        assert!(report.failed[0].reason.contains("checksum mismatch"));
    }

    #[test]
    fn unreadable_record_is_reported() {
        let (_dir, store) = populated_store();
        fs::write(store.layout().usage_dir().join("7.json"), "{").unwrap();
        let report = verify_store_integrity(store.layout()).unwrap();
        assert_eq!(report.usage_checked, 2);
        assert!(report.failed[0].reason.contains("read error"));
    }
}

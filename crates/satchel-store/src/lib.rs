//! Storage provider contract and library/content persistence for Satchel.
//!
//! This crate provides the storage layer: the `StorageProvider` trait the
//! validation engine calls for everything that touches installed state,
//! `FsStorage` (JSON records with embedded blake3 checksums, written atomically
//! under a `StoreLayout`), `MemoryStorage` for embedding and tests, and
//! `verify_store_integrity` for checksum verification of a filesystem store.

pub mod fs;
pub mod integrity;
pub mod layout;
pub mod memory;
pub mod provider;

pub use fs::{FsStorage, StoragePolicy, DEFAULT_CONTENT_EXTENSIONS, DEFAULT_LIBRARY_EXTENSIONS};
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use memory::MemoryStorage;
pub use provider::{ContentRecord, InstalledLibrary, LibraryUsage, StorageProvider};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("checksum mismatch for record '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("library not found: {0}")]
    LibraryNotFound(String),
    #[error("content not found: {0}")]
    ContentNotFound(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_library_not_found() {
        let e = StoreError::LibraryNotFound("H5P.Text 1.1".to_owned());
        assert!(e.to_string().contains("H5P.Text 1.1"));
    }

    #[test]
    fn store_error_display_content_not_found() {
        let e = StoreError::ContentNotFound("42".to_owned());
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('7'));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            id: "lib".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }
}

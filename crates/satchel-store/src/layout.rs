use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a Satchel store.
///
/// Records live under `store/`, unpacked library files under `libraries/`,
/// content payload files under `content/`. Subdirectories are created on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn library_records_dir(&self) -> PathBuf {
        self.root.join("store").join("libraries")
    }

    #[inline]
    pub fn content_records_dir(&self) -> PathBuf {
        self.root.join("store").join("content")
    }

    #[inline]
    pub fn usage_dir(&self) -> PathBuf {
        self.root.join("store").join("usage")
    }

    /// Unpacked files of one installed library, keyed by its folder name.
    #[inline]
    pub fn library_files_dir(&self, folder_name: &str) -> PathBuf {
        self.root.join("libraries").join(folder_name)
    }

    /// Payload files (images, media) of one stored content item.
    #[inline]
    pub fn content_files_dir(&self, content_id: &str) -> PathBuf {
        self.root.join("content").join(content_id)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("store").join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.library_records_dir())?;
        fs::create_dir_all(self.content_records_dir())?;
        fs::create_dir_all(self.usage_dir())?;
        fs::create_dir_all(self.root.join("libraries"))?;
        fs::create_dir_all(self.root.join("content"))?;

        let version_path = self.root.join("store").join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.root.join("store");
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join("store").join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

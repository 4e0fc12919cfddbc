use crate::StoreError;
use satchel_schema::{
    ContentId, DependencyDeclaration, Diagnostics, LibraryId, LibraryIdentity, LibraryRecord,
    Manifest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A library the provider already holds, with the id it assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledLibrary {
    pub id: LibraryId,
    pub record: LibraryRecord,
}

/// One row of a content item's library-usage list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryUsage {
    pub library: LibraryIdentity,
    pub preloaded: bool,
}

/// A content item as handed to the provider for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub title: String,
    pub main_library: LibraryIdentity,
    /// Sanitized `content.json`.
    pub parameters: Value,
    /// The package's `h5p.json`.
    pub manifest: Manifest,
}

/// Everything the validation engine needs from the embedding application.
///
/// All lookups go by library identity (name + major + minor), never by row id,
/// except where an id was handed out by the provider itself.
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Look up an installed library by name and major/minor version.
    fn installed_library(&self, id: &LibraryIdentity)
        -> Result<Option<InstalledLibrary>, StoreError>;

    /// Whether `candidate` supersedes the installed copy of the same identity.
    fn is_patched_library(&self, candidate: &LibraryRecord) -> Result<bool, StoreError>;

    /// Whether the caller may write (install or patch) this library.
    fn may_update_library(&self, id: &LibraryIdentity) -> bool;

    /// Full record of an installed library, semantics included.
    fn load_library(&self, id: &LibraryIdentity) -> Result<Option<LibraryRecord>, StoreError>;

    /// Check payload files under an extracted `content/` folder.
    fn validate_content_files(&self, content_dir: &Path) -> Result<Diagnostics, StoreError>;

    /// Persist a library record and its dependency rows. `files` is the
    /// extracted library folder to take the library's files from.
    fn save_library(
        &self,
        record: &LibraryRecord,
        dependencies: &[DependencyDeclaration],
        files: Option<&Path>,
    ) -> Result<LibraryId, StoreError>;

    /// Dependency rows stored for an installed library.
    fn library_dependencies(
        &self,
        id: &LibraryIdentity,
    ) -> Result<Vec<DependencyDeclaration>, StoreError>;

    fn list_libraries(&self) -> Result<Vec<InstalledLibrary>, StoreError>;

    /// Persist a content record and its library-usage rows. `files` is the
    /// extracted `content/` folder to take payload files from.
    fn save_content(
        &self,
        content: &ContentRecord,
        usage: &[LibraryUsage],
        files: Option<&Path>,
    ) -> Result<ContentId, StoreError>;

    fn load_content(&self, id: &ContentId) -> Result<ContentRecord, StoreError>;

    /// Folder holding the payload files of a stored content item, if the
    /// provider keeps them on disk.
    fn content_files(&self, _id: &ContentId) -> Option<PathBuf> {
        None
    }

    /// Remove a content record together with its usage rows.
    fn delete_content(&self, id: &ContentId) -> Result<(), StoreError>;

    fn content_usage(&self, id: &ContentId) -> Result<Vec<LibraryUsage>, StoreError>;

    /// Duplicate the usage rows of `from` onto `to`, for cloned content.
    fn copy_content_usage(&self, from: &ContentId, to: &ContentId) -> Result<(), StoreError>;
}

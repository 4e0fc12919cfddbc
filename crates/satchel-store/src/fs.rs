use crate::layout::StoreLayout;
use crate::provider::{ContentRecord, InstalledLibrary, LibraryUsage, StorageProvider};
use crate::{fsync_dir, StoreError};
use satchel_schema::{
    ContentId, DependencyDeclaration, Diagnostics, LibraryId, LibraryIdentity, LibraryRecord,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEFAULT_CONTENT_EXTENSIONS: &[&str] = &[
    "json", "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "svg", "eot", "ttf", "woff",
    "woff2", "otf", "webm", "mp4", "ogg", "mp3", "m4a", "wav", "txt", "pdf", "rtf", "doc", "docx",
    "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "xml", "csv", "diff", "patch", "swf", "md",
    "textile", "vtt", "webvtt",
];

pub const DEFAULT_LIBRARY_EXTENSIONS: &[&str] = &["js", "css"];

/// What the filesystem store permits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePolicy {
    pub allow_library_updates: bool,
    /// File extensions allowed under `content/`, lowercase, without dot.
    pub content_extensions: Vec<String>,
    /// Extensions additionally allowed inside library folders.
    pub library_extensions: Vec<String>,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            allow_library_updates: true,
            content_extensions: DEFAULT_CONTENT_EXTENSIONS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            library_extensions: DEFAULT_LIBRARY_EXTENSIONS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

pub(crate) trait Checksummed: Serialize + Clone {
    fn checksum(&self) -> Option<&str>;
    fn set_checksum(&mut self, checksum: Option<String>);

    /// blake3 over the pretty JSON of the record with the checksum field cleared.
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.set_checksum(None);
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LibraryEntry {
    pub id: LibraryId,
    pub record: LibraryRecord,
    pub dependencies: Vec<DependencyDeclaration>,
    pub installed_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ContentEntry {
    pub id: ContentId,
    pub content: ContentRecord,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct UsageEntry {
    pub content_id: ContentId,
    pub usage: Vec<LibraryUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

macro_rules! impl_checksummed {
    ($($ty:ty),*) => {
        $(impl Checksummed for $ty {
            fn checksum(&self) -> Option<&str> {
                self.checksum.as_deref()
            }
            fn set_checksum(&mut self, checksum: Option<String>) {
                self.checksum = checksum;
            }
        })*
    };
}

impl_checksummed!(LibraryEntry, ContentEntry, UsageEntry);

pub(crate) fn write_record<T: Checksummed>(dir: &Path, file_name: &str, record: &T) -> Result<(), StoreError> {
    let mut with_checksum = record.clone();
    with_checksum.set_checksum(Some(record.compute_checksum()?));
    let content = serde_json::to_string_pretty(&with_checksum)?;

    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file_name))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

pub(crate) fn read_record<T: Checksummed + DeserializeOwned>(path: &Path, id: &str) -> Result<T, StoreError> {
    let content = fs::read_to_string(path)?;
    let record: T = serde_json::from_str(&content)?;
    if let Some(expected) = record.checksum() {
        let actual = record.compute_checksum()?;
        if actual != expected {
            return Err(StoreError::IntegrityFailure {
                id: id.to_owned(),
                expected: expected.to_owned(),
                actual,
            });
        }
    }
    Ok(record)
}

/// Names of the `*.json` record files in `dir`, without extension, sorted.
pub(crate) fn record_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".json") {
            names.push(stem.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Machine names end up in file names; refuse anything that could escape a directory.
fn safe_folder_name(id: &LibraryIdentity) -> Option<String> {
    let name = &id.machine_name;
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    ok.then(|| id.folder_name())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Filesystem-backed provider rooted at a [`StoreLayout`].
pub struct FsStorage {
    layout: StoreLayout,
    policy: StoragePolicy,
}

impl FsStorage {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            policy: StoragePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StoragePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    fn library_entry(&self, id: &LibraryIdentity) -> Result<Option<LibraryEntry>, StoreError> {
        let Some(folder) = safe_folder_name(id) else {
            return Ok(None);
        };
        let path = self
            .layout
            .library_records_dir()
            .join(format!("{folder}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path, &folder).map(Some)
    }

    fn content_entry(&self, id: &ContentId) -> Result<ContentEntry, StoreError> {
        let path = self.content_record_path(id)?;
        if !path.exists() {
            return Err(StoreError::ContentNotFound(id.to_string()));
        }
        read_record(&path, id)
    }

    fn content_record_path(&self, id: &ContentId) -> Result<PathBuf, StoreError> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StoreError::ContentNotFound(id.to_string()));
        }
        Ok(self.layout.content_records_dir().join(format!("{id}.json")))
    }

    fn next_content_id(&self) -> Result<ContentId, StoreError> {
        let highest = record_names(&self.layout.content_records_dir())?
            .iter()
            .filter_map(|name| name.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(ContentId::new((highest + 1).to_string()))
    }

    fn write_usage(&self, id: &ContentId, usage: &[LibraryUsage]) -> Result<(), StoreError> {
        let entry = UsageEntry {
            content_id: id.clone(),
            usage: usage.to_vec(),
            checksum: None,
        };
        write_record(&self.layout.usage_dir(), &format!("{id}.json"), &entry)
    }

    /// Copy regular files whose extension passes `allowed`; symlinks and
    /// anything else are left behind.
    fn copy_tree(
        &self,
        from: &Path,
        to: &Path,
        allowed: &dyn Fn(&Path) -> bool,
    ) -> Result<usize, StoreError> {
        fs::create_dir_all(to)?;
        let mut copied = 0;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let src = entry.path();
            let dest = to.join(entry.file_name());
            if file_type.is_dir() {
                copied += self.copy_tree(&src, &dest, allowed)?;
            } else if file_type.is_file() && allowed(&src) {
                fs::copy(&src, &dest)?;
                copied += 1;
            } else {
                debug!("not copying {}", src.display());
            }
        }
        Ok(copied)
    }

    fn scan_content_files(
        &self,
        root: &Path,
        dir: &Path,
        diags: &mut Diagnostics,
    ) -> Result<(), StoreError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let context = format!("content/{}", relative.display());

            if file_type.is_symlink() {
                diags.error(context, "symbolic links are not allowed");
            } else if file_type.is_dir() {
                self.scan_content_files(root, &path, diags)?;
            } else if dir == root && entry.file_name() == "content.json" {
                continue;
            } else {
                match extension_of(&path) {
                    Some(ext) if self.policy.content_extensions.contains(&ext) => {}
                    Some(ext) => diags.error(context, format!("file type '.{ext}' is not allowed")),
                    None => diags.error(context, "files without an extension are not allowed"),
                }
            }
        }
        Ok(())
    }
}

impl StorageProvider for FsStorage {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn installed_library(
        &self,
        id: &LibraryIdentity,
    ) -> Result<Option<InstalledLibrary>, StoreError> {
        Ok(self.library_entry(id)?.map(|entry| InstalledLibrary {
            id: entry.id,
            record: entry.record,
        }))
    }

    fn is_patched_library(&self, candidate: &LibraryRecord) -> Result<bool, StoreError> {
        Ok(self
            .library_entry(&candidate.identity)?
            .is_some_and(|installed| candidate.patch_version > installed.record.patch_version))
    }

    fn may_update_library(&self, _id: &LibraryIdentity) -> bool {
        self.policy.allow_library_updates
    }

    fn load_library(&self, id: &LibraryIdentity) -> Result<Option<LibraryRecord>, StoreError> {
        Ok(self.library_entry(id)?.map(|entry| entry.record))
    }

    fn validate_content_files(&self, content_dir: &Path) -> Result<Diagnostics, StoreError> {
        let mut diags = Diagnostics::new();
        self.scan_content_files(content_dir, content_dir, &mut diags)?;
        Ok(diags)
    }

    fn save_library(
        &self,
        record: &LibraryRecord,
        dependencies: &[DependencyDeclaration],
        files: Option<&Path>,
    ) -> Result<LibraryId, StoreError> {
        self.layout.initialize()?;
        let folder = safe_folder_name(&record.identity)
            .ok_or_else(|| StoreError::LibraryNotFound(record.identity.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        let installed_at = self
            .library_entry(&record.identity)?
            .map_or_else(|| now.clone(), |existing| existing.installed_at);

        if let Some(src) = files {
            let dest = self.layout.library_files_dir(&folder);
            let parent = dest
                .parent()
                .ok_or_else(|| StoreError::LibraryNotFound(record.identity.to_string()))?;
            // Stage next to the destination so the swap is a rename on one filesystem.
            let staging = tempfile::Builder::new()
                .prefix(".staging-")
                .tempdir_in(parent)?;
            let staged = staging.path().join("files");
            let policy = &self.policy;
            let allowed = |path: &Path| {
                extension_of(path).is_some_and(|ext| {
                    policy.content_extensions.contains(&ext) || policy.library_extensions.contains(&ext)
                })
            };
            let copied = self.copy_tree(src, &staged, &allowed)?;

            let previous = staging.path().join("previous");
            if dest.exists() {
                fs::rename(&dest, &previous)?;
            }
            if let Err(e) = fs::rename(&staged, &dest) {
                if previous.exists() {
                    fs::rename(&previous, &dest)?;
                }
                return Err(e.into());
            }
            fsync_dir(parent)?;
            debug!("copied {copied} files for {}", record.full_version());
        }

        let entry = LibraryEntry {
            id: LibraryId::new(folder.clone()),
            record: record.clone(),
            dependencies: dependencies.to_vec(),
            installed_at,
            updated_at: now,
            checksum: None,
        };
        write_record(
            &self.layout.library_records_dir(),
            &format!("{folder}.json"),
            &entry,
        )?;
        Ok(entry.id)
    }

    fn library_dependencies(
        &self,
        id: &LibraryIdentity,
    ) -> Result<Vec<DependencyDeclaration>, StoreError> {
        self.library_entry(id)?
            .map(|entry| entry.dependencies)
            .ok_or_else(|| StoreError::LibraryNotFound(id.to_string()))
    }

    fn list_libraries(&self) -> Result<Vec<InstalledLibrary>, StoreError> {
        let dir = self.layout.library_records_dir();
        let mut results = Vec::new();
        for name in record_names(&dir)? {
            match read_record::<LibraryEntry>(&dir.join(format!("{name}.json")), &name) {
                Ok(entry) => results.push(InstalledLibrary {
                    id: entry.id,
                    record: entry.record,
                }),
                Err(e) => warn!("skipping corrupted library record '{name}': {e}"),
            }
        }
        results.sort_by(|a, b| a.record.identity.cmp(&b.record.identity));
        Ok(results)
    }

    fn save_content(
        &self,
        content: &ContentRecord,
        usage: &[LibraryUsage],
        files: Option<&Path>,
    ) -> Result<ContentId, StoreError> {
        self.layout.initialize()?;
        let id = self.next_content_id()?;
        let now = chrono::Utc::now().to_rfc3339();

        if let Some(src) = files {
            let policy = &self.policy;
            let allowed = |path: &Path| {
                path.file_name().is_some_and(|n| n != "content.json")
                    && extension_of(path).is_some_and(|ext| policy.content_extensions.contains(&ext))
            };
            self.copy_tree(src, &self.layout.content_files_dir(&id), &allowed)?;
        }

        let entry = ContentEntry {
            id: id.clone(),
            content: content.clone(),
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
        };
        write_record(
            &self.layout.content_records_dir(),
            &format!("{id}.json"),
            &entry,
        )?;
        self.write_usage(&id, usage)?;
        Ok(id)
    }

    fn load_content(&self, id: &ContentId) -> Result<ContentRecord, StoreError> {
        Ok(self.content_entry(id)?.content)
    }

    fn content_files(&self, id: &ContentId) -> Option<PathBuf> {
        self.content_record_path(id).ok()?;
        let dir = self.layout.content_files_dir(id);
        dir.is_dir().then_some(dir)
    }

    fn delete_content(&self, id: &ContentId) -> Result<(), StoreError> {
        let path = self.content_record_path(id)?;
        if !path.exists() {
            return Err(StoreError::ContentNotFound(id.to_string()));
        }
        fs::remove_file(&path)?;
        let usage = self.layout.usage_dir().join(format!("{id}.json"));
        if usage.exists() {
            fs::remove_file(usage)?;
        }
        let files = self.layout.content_files_dir(id);
        if files.exists() {
            fs::remove_dir_all(files)?;
        }
        Ok(())
    }

    fn content_usage(&self, id: &ContentId) -> Result<Vec<LibraryUsage>, StoreError> {
        self.content_entry(id)?;
        let path = self.layout.usage_dir().join(format!("{id}.json"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_record::<UsageEntry>(&path, id)?.usage)
    }

    fn copy_content_usage(&self, from: &ContentId, to: &ContentId) -> Result<(), StoreError> {
        let rows = self.content_usage(from)?;
        self.content_entry(to)?;
        self.write_usage(to, &rows)
    }
}

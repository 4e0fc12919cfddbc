use crate::provider::{ContentRecord, InstalledLibrary, LibraryUsage, StorageProvider};
use crate::StoreError;
use satchel_schema::{
    ContentId, DependencyDeclaration, Diagnostics, LibraryId, LibraryIdentity, LibraryRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

struct StoredLibrary {
    record: LibraryRecord,
    dependencies: Vec<DependencyDeclaration>,
}

#[derive(Default)]
struct State {
    libraries: BTreeMap<LibraryIdentity, StoredLibrary>,
    content: BTreeMap<u64, ContentRecord>,
    usage: HashMap<u64, Vec<LibraryUsage>>,
    last_content_id: u64,
}

/// In-process provider. Files are never copied and content files are
/// never rejected; everything else behaves like [`FsStorage`](crate::FsStorage).
pub struct MemoryStorage {
    state: Mutex<State>,
    allow_updates: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            allow_updates: true,
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preinstall a library, taking its dependency rows from its manifest.
    #[must_use]
    pub fn with_library(mut self, record: LibraryRecord) -> Self {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| {
            warn!("memory store lock was poisoned, preinstalling {} anyway", record.identity);
            poisoned.into_inner()
        });
        let dependencies = record.dependencies();
        state.libraries.insert(
            record.identity.clone(),
            StoredLibrary {
                record,
                dependencies,
            },
        );
        self
    }

    #[must_use]
    pub fn deny_updates(mut self) -> Self {
        self.allow_updates = false;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn content_key(id: &ContentId) -> Result<u64, StoreError> {
        id.parse()
            .map_err(|_| StoreError::ContentNotFound(id.to_string()))
    }
}

impl StorageProvider for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn installed_library(
        &self,
        id: &LibraryIdentity,
    ) -> Result<Option<InstalledLibrary>, StoreError> {
        let state = self.lock()?;
        Ok(state.libraries.get(id).map(|stored| InstalledLibrary {
            id: LibraryId::new(id.folder_name()),
            record: stored.record.clone(),
        }))
    }

    fn is_patched_library(&self, candidate: &LibraryRecord) -> Result<bool, StoreError> {
        let state = self.lock()?;
        Ok(state
            .libraries
            .get(&candidate.identity)
            .is_some_and(|stored| candidate.patch_version > stored.record.patch_version))
    }

    fn may_update_library(&self, _id: &LibraryIdentity) -> bool {
        self.allow_updates
    }

    fn load_library(&self, id: &LibraryIdentity) -> Result<Option<LibraryRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.libraries.get(id).map(|stored| stored.record.clone()))
    }

    fn validate_content_files(&self, _content_dir: &Path) -> Result<Diagnostics, StoreError> {
        Ok(Diagnostics::new())
    }

    fn save_library(
        &self,
        record: &LibraryRecord,
        dependencies: &[DependencyDeclaration],
        _files: Option<&Path>,
    ) -> Result<LibraryId, StoreError> {
        let mut state = self.lock()?;
        state.libraries.insert(
            record.identity.clone(),
            StoredLibrary {
                record: record.clone(),
                dependencies: dependencies.to_vec(),
            },
        );
        Ok(LibraryId::new(record.identity.folder_name()))
    }

    fn library_dependencies(
        &self,
        id: &LibraryIdentity,
    ) -> Result<Vec<DependencyDeclaration>, StoreError> {
        let state = self.lock()?;
        state
            .libraries
            .get(id)
            .map(|stored| stored.dependencies.clone())
            .ok_or_else(|| StoreError::LibraryNotFound(id.to_string()))
    }

    fn list_libraries(&self) -> Result<Vec<InstalledLibrary>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .libraries
            .iter()
            .map(|(id, stored)| InstalledLibrary {
                id: LibraryId::new(id.folder_name()),
                record: stored.record.clone(),
            })
            .collect())
    }

    fn save_content(
        &self,
        content: &ContentRecord,
        usage: &[LibraryUsage],
        _files: Option<&Path>,
    ) -> Result<ContentId, StoreError> {
        let mut state = self.lock()?;
        state.last_content_id += 1;
        let key = state.last_content_id;
        state.content.insert(key, content.clone());
        state.usage.insert(key, usage.to_vec());
        Ok(ContentId::new(key.to_string()))
    }

    fn load_content(&self, id: &ContentId) -> Result<ContentRecord, StoreError> {
        let key = Self::content_key(id)?;
        let state = self.lock()?;
        state
            .content
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::ContentNotFound(id.to_string()))
    }

    fn delete_content(&self, id: &ContentId) -> Result<(), StoreError> {
        let key = Self::content_key(id)?;
        let mut state = self.lock()?;
        state
            .content
            .remove(&key)
            .ok_or_else(|| StoreError::ContentNotFound(id.to_string()))?;
        state.usage.remove(&key);
        Ok(())
    }

    fn content_usage(&self, id: &ContentId) -> Result<Vec<LibraryUsage>, StoreError> {
        let key = Self::content_key(id)?;
        let state = self.lock()?;
        if !state.content.contains_key(&key) {
            return Err(StoreError::ContentNotFound(id.to_string()));
        }
        Ok(state.usage.get(&key).cloned().unwrap_or_default())
    }

    fn copy_content_usage(&self, from: &ContentId, to: &ContentId) -> Result<(), StoreError> {
        let from_key = Self::content_key(from)?;
        let to_key = Self::content_key(to)?;
        let mut state = self.lock()?;
        if !state.content.contains_key(&to_key) {
            return Err(StoreError::ContentNotFound(to.to_string()));
        }
        let rows = state
            .usage
            .get(&from_key)
            .cloned()
            .ok_or_else(|| StoreError::ContentNotFound(from.to_string()))?;
        state.usage.insert(to_key, rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_schema::parse_manifest_str;
    use serde_json::json;

    fn record(name: &str, patch: u32) -> LibraryRecord {
        let manifest = parse_manifest_str(&format!(
            r#"{{"machineName": "{name}", "majorVersion": 1, "minorVersion": 0,
                "patchVersion": {patch},
                "preloadedDependencies": [{{"machineName": "Dep", "majorVersion": 2, "minorVersion": 1}}]}}"#
        ))
        .unwrap();
        LibraryRecord::from_manifest(manifest).unwrap()
    }

    fn content() -> ContentRecord {
        ContentRecord {
            title: "t".to_owned(),
            main_library: LibraryIdentity::new("Main", 1, 0),
            parameters: json!({}),
            manifest: Default::default(),
        }
    }

    #[test]
    fn preinstall_survives_poisoned_lock() {
        let store = MemoryStorage::new();
        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = store.state.lock().unwrap();
                panic!("poison the store");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(store.state.is_poisoned());

        let mut store = store.with_library(record("Main", 2));
        let state = store.state.get_mut().unwrap_or_else(|p| p.into_inner());
        assert!(state.libraries.contains_key(&LibraryIdentity::new("Main", 1, 0)));
    }

    #[test]
    fn preinstalled_library_is_found_with_dependencies() {
        let store = MemoryStorage::new().with_library(record("Main", 2));
        let id = LibraryIdentity::new("Main", 1, 0);
        let installed = store.installed_library(&id).unwrap().unwrap();
        assert_eq!(installed.id.as_str(), "Main-1.0");
        let deps = store.library_dependencies(&id).unwrap();
        assert_eq!(deps[0].library, LibraryIdentity::new("Dep", 2, 1));
        assert!(store
            .installed_library(&LibraryIdentity::new("Main", 1, 1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn patch_detection() {
        let store = MemoryStorage::new().with_library(record("Main", 2));
        assert!(store.is_patched_library(&record("Main", 3)).unwrap());
        assert!(!store.is_patched_library(&record("Main", 2)).unwrap());
        assert!(!store.is_patched_library(&record("Other", 9)).unwrap());
    }

    #[test]
    fn deny_updates_is_reported() {
        let store = MemoryStorage::new().deny_updates();
        assert!(!store.may_update_library(&LibraryIdentity::new("Main", 1, 0)));
        assert!(MemoryStorage::new().may_update_library(&LibraryIdentity::new("Main", 1, 0)));
    }

    #[test]
    fn content_usage_lifecycle() {
        let store = MemoryStorage::new();
        let usage = vec![LibraryUsage {
            library: LibraryIdentity::new("Main", 1, 0),
            preloaded: true,
        }];
        let a = store.save_content(&content(), &usage, None).unwrap();
        let b = store.save_content(&content(), &[], None).unwrap();
        assert_ne!(a, b);

        store.copy_content_usage(&a, &b).unwrap();
        assert_eq!(store.content_usage(&b).unwrap(), usage);

        store.delete_content(&a).unwrap();
        assert!(store.content_usage(&a).is_err());
        assert!(store.load_content(&ContentId::new("nope")).is_err());
    }
}

use crate::arbiter::{Classification, VersionArbiter};
use crate::concurrency::StoreLock;
use crate::config::SatchelConfig;
use crate::content::{ContentReport, ContentValidator};
use crate::package::{DiscoveredPackage, PackageReport, PackageValidator};
use crate::resolver::{usage_closure, UsageEntry};
use crate::CoreError;
use satchel_schema::{
    ContentId, DependencyDeclaration, DependencyKind, Diagnostics, LibraryId, LibraryIdentity,
    Verdict,
};
use satchel_store::{
    ContentRecord, FsStorage, InstalledLibrary, LibraryUsage, StorageProvider, StoreLayout,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Save phase orchestration on top of a storage provider.
///
/// Validation runs first; nothing is persisted for a package that fails it.
/// When the engine knows the store's layout, every writing operation holds
/// the store lock for its whole duration.
pub struct Engine<S: StorageProvider> {
    provider: S,
    config: SatchelConfig,
    layout: Option<StoreLayout>,
}

/// What happened to one library of an installed package.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryOutcome {
    pub library: LibraryIdentity,
    /// `Name major.minor.patch` of the uploaded copy.
    pub version: String,
    pub classification: Classification,
    /// Id the provider stored the library under, for saved libraries.
    pub saved: Option<LibraryId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub verdict: Verdict,
    pub missing: Vec<DependencyDeclaration>,
    pub libraries: Vec<LibraryOutcome>,
    pub content_id: Option<ContentId>,
    /// Sanitization findings for `content.json`.
    pub content_diagnostics: Diagnostics,
    /// Usage rows stored with the content, in load order.
    pub usage: Vec<LibraryUsage>,
}

impl InstallReport {
    fn rejected(verdict: Verdict, missing: Vec<DependencyDeclaration>) -> Self {
        Self {
            verdict,
            missing,
            libraries: Vec::new(),
            content_id: None,
            content_diagnostics: Diagnostics::new(),
            usage: Vec::new(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.content_id.is_some()
    }
}

impl Engine<FsStorage> {
    /// Open (and initialize if needed) the filesystem store named by `config`.
    pub fn open(config: SatchelConfig) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(&config.store);
        layout.initialize()?;
        let provider = FsStorage::new(layout.clone()).with_policy(config.storage_policy());
        Ok(Self::new(provider, config).with_layout(layout))
    }
}

impl<S: StorageProvider> Engine<S> {
    pub fn new(provider: S, config: SatchelConfig) -> Self {
        Self {
            provider,
            config,
            layout: None,
        }
    }

    /// Lock this layout's store around writing operations.
    #[must_use]
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn provider(&self) -> &S {
        &self.provider
    }

    pub fn config(&self) -> &SatchelConfig {
        &self.config
    }

    fn lock(&self) -> Result<Option<StoreLock>, CoreError> {
        self.layout.as_ref().map(StoreLock::for_store).transpose()
    }

    /// Validate an extracted package without touching the store.
    pub fn validate(&self, root: &Path) -> Result<PackageReport, CoreError> {
        PackageValidator::new(&self.provider, &self.config).validate(root)
    }

    /// Validate, then persist libraries and sanitized content of a package.
    pub fn install(&self, root: &Path) -> Result<InstallReport, CoreError> {
        let _lock = self.lock()?;
        info!("installing package from {}", root.display());

        let PackageReport {
            mut verdict,
            missing,
            package,
        } = self.validate(root)?;
        let Some(package) = package.filter(|_| verdict.valid) else {
            info!("package rejected with {} findings", verdict.diagnostics.len());
            return Ok(InstallReport::rejected(verdict, missing));
        };

        let Some(main) = main_identity(&package) else {
            let name = package.main_library().unwrap_or_default();
            let mut diagnostics = verdict.diagnostics;
            diagnostics.error(
                "h5p.json",
                format!("main library {name} is not among the preloaded dependencies"),
            );
            verdict = Verdict::from_diagnostics(diagnostics);
            return Ok(InstallReport::rejected(verdict, missing));
        };

        let libraries = self.save_libraries(&package)?;

        let content = ContentValidator::new(&self.provider)
            .validate_for_library(&main, package.content.clone())?;
        let usage = self.usage_rows(&package, &content)?;

        let record = ContentRecord {
            title: package
                .manifest
                .str_field("title")
                .unwrap_or_default()
                .to_owned(),
            main_library: main,
            parameters: content.params,
            manifest: package.manifest.clone(),
        };
        let content_dir = package.content_dir();
        let id = self
            .provider
            .save_content(&record, &usage, Some(content_dir.as_path()))?;
        info!("stored content {id} ({} libraries used)", usage.len());

        Ok(InstallReport {
            verdict,
            missing,
            libraries,
            content_id: Some(id),
            content_diagnostics: content.diagnostics,
            usage,
        })
    }

    fn save_libraries(&self, package: &DiscoveredPackage) -> Result<Vec<LibraryOutcome>, CoreError> {
        let arbiter = VersionArbiter::new(&self.provider);
        let mut outcomes = Vec::with_capacity(package.libraries.len());
        for (name, record) in &package.libraries {
            let classification = arbiter.classify(record)?;
            let saved = if classification.needs_save() {
                let files = package.library_dirs.get(name).map(PathBuf::as_path);
                let id = self
                    .provider
                    .save_library(record, &record.dependencies(), files)?;
                debug!("saved {} as {id}", record.full_version());
                Some(id)
            } else {
                debug!("skipping {}: {classification}", record.full_version());
                None
            };
            outcomes.push(LibraryOutcome {
                library: record.identity.clone(),
                version: record.full_version(),
                classification,
                saved,
            });
        }
        Ok(outcomes)
    }

    /// Usage rows for a content item: the package's closure plus every
    /// library the sanitized parameters reference, the latter as dynamic.
    fn usage_rows(
        &self,
        package: &DiscoveredPackage,
        content: &ContentReport,
    ) -> Result<Vec<LibraryUsage>, CoreError> {
        let mut closure = usage_closure(&self.provider, &package.manifest)?;
        for used in &content.libraries {
            if closure.contains_key(&used.machine_name) {
                continue;
            }
            let record = self
                .provider
                .load_library(used)?
                .ok_or_else(|| CoreError::MissingLibrary(used.to_string()))?;
            let below = usage_closure(&self.provider, &record.manifest)?;
            let mut next = closure.values().map(|e| e.weight).max().unwrap_or(0);

            let mut below: Vec<UsageEntry> = below.into_values().collect();
            below.sort_by_key(|e| e.weight);
            for entry in below {
                let key = entry.library.machine_name().to_owned();
                closure.entry(key).or_insert_with(|| {
                    next += 1;
                    UsageEntry {
                        preloaded: false,
                        weight: next,
                        ..entry
                    }
                });
            }
            closure.insert(
                used.machine_name.clone(),
                UsageEntry {
                    library: record,
                    preloaded: false,
                    weight: next + 1,
                },
            );
        }

        let mut entries: Vec<&UsageEntry> = closure.values().collect();
        entries.sort_by_key(|e| e.weight);
        Ok(entries.into_iter().map(UsageEntry::to_usage).collect())
    }

    /// Sanitize parameters against an installed library's semantics.
    pub fn check_content(
        &self,
        library: &LibraryIdentity,
        params: Value,
    ) -> Result<ContentReport, CoreError> {
        ContentValidator::new(&self.provider).validate_for_library(library, params)
    }

    /// Usage closure of an installed library, keyed by machine name.
    pub fn deps(&self, library: &LibraryIdentity) -> Result<BTreeMap<String, UsageEntry>, CoreError> {
        let record = self
            .provider
            .load_library(library)?
            .ok_or_else(|| CoreError::MissingLibrary(library.to_string()))?;
        usage_closure(&self.provider, &record.manifest)
    }

    pub fn list_libraries(&self) -> Result<Vec<InstalledLibrary>, CoreError> {
        Ok(self.provider.list_libraries()?)
    }

    pub fn usage(&self, id: &ContentId) -> Result<Vec<LibraryUsage>, CoreError> {
        Ok(self.provider.content_usage(id)?)
    }

    pub fn delete_content(&self, id: &ContentId) -> Result<(), CoreError> {
        let _lock = self.lock()?;
        self.provider.delete_content(id)?;
        info!("deleted content {id}");
        Ok(())
    }

    /// Duplicate a content item with its payload files and usage rows.
    pub fn copy_content(&self, id: &ContentId) -> Result<ContentId, CoreError> {
        let _lock = self.lock()?;
        let record = self.provider.load_content(id)?;
        let files = self.provider.content_files(id);
        let copy = self.provider.save_content(&record, &[], files.as_deref())?;
        if let Err(e) = self.provider.copy_content_usage(id, &copy) {
            warn!("copying usage of {id} failed, removing copy {copy}: {e}");
            self.provider.delete_content(&copy)?;
            return Err(e.into());
        }
        info!("copied content {id} to {copy}");
        Ok(copy)
    }
}

/// The main library's identity, taken from the shipped copy or else from the
/// package's preloaded dependencies.
fn main_identity(package: &DiscoveredPackage) -> Option<LibraryIdentity> {
    let name = package.main_library()?;
    if let Some(record) = package.libraries.get(name) {
        return Some(record.identity.clone());
    }
    package
        .manifest
        .dependencies(DependencyKind::Preloaded)
        .into_iter()
        .find(|d| d.library.machine_name == name)
        .map(|d| d.library)
}

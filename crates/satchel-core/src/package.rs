//! Scanning and validation of an extracted package directory.

use crate::config::SatchelConfig;
use crate::resolver::missing_dependencies;
use crate::CoreError;
use regex::Regex;
use satchel_schema::{
    parse_manifest_str, parse_semantics, validate_manifest, CoreApiVersion, DependencyDeclaration,
    Diagnostics, LibraryRecord, Manifest, Verdict, LIBRARY_OPTIONAL, LIBRARY_REQUIRED,
    PACKAGE_OPTIONAL, PACKAGE_REQUIRED,
};
use satchel_store::StorageProvider;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

static LIBRARY_FOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-.]{1,255}$").expect("library folder pattern is valid")
});

static LANGUAGE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(-?[a-z]+){1,7}\.json$").expect("language file pattern is valid")
});

const PACKAGE_MANIFEST: &str = "h5p.json";
const CONTENT_DIR: &str = "content";
const CONTENT_FILE: &str = "content.json";
const LIBRARY_MANIFEST: &str = "library.json";
const SEMANTICS_FILE: &str = "semantics.json";
const LANGUAGE_DIR: &str = "language";

/// Everything a valid package contained.
#[derive(Debug, Clone)]
pub struct DiscoveredPackage {
    pub root: PathBuf,
    pub manifest: Manifest,
    /// Decoded `content/content.json`, not yet sanitized.
    pub content: Value,
    /// Libraries shipped in the package, keyed by machine name.
    pub libraries: BTreeMap<String, LibraryRecord>,
    /// Folder each library was found in, keyed by machine name.
    pub library_dirs: BTreeMap<String, PathBuf>,
}

impl DiscoveredPackage {
    pub fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR)
    }

    pub fn main_library(&self) -> Option<&str> {
        self.manifest.str_field("mainLibrary")
    }
}

#[derive(Debug)]
pub struct PackageReport {
    pub verdict: Verdict,
    pub missing: Vec<DependencyDeclaration>,
    /// Present only when the verdict is valid.
    pub package: Option<DiscoveredPackage>,
}

impl PackageReport {
    pub fn is_valid(&self) -> bool {
        self.verdict.valid
    }
}

pub struct PackageValidator<'a, S: StorageProvider + ?Sized> {
    provider: &'a S,
    core_api: CoreApiVersion,
}

impl<'a, S: StorageProvider + ?Sized> PackageValidator<'a, S> {
    pub fn new(provider: &'a S, config: &SatchelConfig) -> Self {
        Self {
            provider,
            core_api: config.core_api(),
        }
    }

    /// Scan `root`, an extracted package, and decide whether it can be installed.
    ///
    /// Every problem is reported in one pass. `Err` is reserved for provider failures.
    pub fn validate(&self, root: &Path) -> Result<PackageReport, CoreError> {
        info!("validating package {}", root.display());
        let mut diags = Diagnostics::new();
        let mut manifest: Option<Manifest> = None;
        let mut manifest_valid = false;
        let mut content: Option<Value> = None;
        let mut content_seen = false;
        let mut libraries = BTreeMap::new();
        let mut library_dirs: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut library_failed = false;

        let entries = match sorted_entries(root) {
            Ok(entries) => entries,
            Err(e) => {
                diags.error("", format!("cannot read package directory: {e}"));
                return Ok(PackageReport {
                    verdict: Verdict::from_diagnostics(diags),
                    missing: Vec::new(),
                    package: None,
                });
            }
        };

        for (name, path, is_dir) in entries {
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if name == PACKAGE_MANIFEST && !is_dir {
                if let Some((parsed, valid)) = check_package_manifest(&path, &mut diags) {
                    manifest = Some(parsed);
                    manifest_valid = valid;
                }
            } else if name == CONTENT_DIR && is_dir {
                content_seen = true;
                content = self.check_content(&path, &mut diags)?;
            } else if is_dir {
                let mut lib_diags = Diagnostics::new();
                let record = self.check_library(&name, &path, &mut lib_diags)?;
                diags.extend(lib_diags.with_prefix(&name));
                let Some(record) = record else {
                    library_failed = true;
                    continue;
                };
                let machine_name = record.machine_name().to_owned();
                if let Some(first) = library_dirs.get(&machine_name) {
                    diags.error(
                        name.as_str(),
                        format!(
                            "library {machine_name} declared twice (also in {})",
                            first.file_name().unwrap_or_default().to_string_lossy()
                        ),
                    );
                    library_failed = true;
                    continue;
                }
                debug!("found library {} in {name}", record.full_version());
                library_dirs.insert(machine_name.clone(), path);
                libraries.insert(machine_name, record);
            } else {
                debug!("ignoring {name}");
            }
        }

        if !content_seen {
            diags.error(CONTENT_DIR, "package has no content folder");
        }
        if manifest.is_none() && !diags.iter().any(|d| d.context.starts_with(PACKAGE_MANIFEST)) {
            diags.error(PACKAGE_MANIFEST, "package manifest is missing");
        }

        let mut missing = Vec::new();
        if let Some(manifest) = &manifest {
            for (_, declaration) in missing_dependencies(self.provider, manifest, &libraries)? {
                diags.error(
                    declaration.library.to_string(),
                    format!("missing required library {}", declaration.library),
                );
                missing.push(declaration);
            }
        }

        let verdict = Verdict::from_diagnostics(diags);
        let accepted = verdict.valid && manifest_valid && !library_failed;
        let package = match (accepted, manifest, content) {
            (true, Some(manifest), Some(content)) => Some(DiscoveredPackage {
                root: root.to_path_buf(),
                manifest,
                content,
                libraries,
                library_dirs,
            }),
            _ => None,
        };
        info!(
            "package {} is {}",
            root.display(),
            if package.is_some() { "valid" } else { "invalid" }
        );
        Ok(PackageReport {
            verdict: Verdict {
                valid: package.is_some(),
                diagnostics: verdict.diagnostics,
            },
            missing,
            package,
        })
    }

    fn check_content(&self, dir: &Path, diags: &mut Diagnostics) -> Result<Option<Value>, CoreError> {
        let context = format!("{CONTENT_DIR}/{CONTENT_FILE}");
        let parsed = match fs::read_to_string(dir.join(CONTENT_FILE)) {
            Err(e) => {
                diags.error(context, format!("cannot read content: {e}"));
                None
            }
            Ok(raw) => match serde_json::from_str::<Value>(raw.trim_start_matches('\u{feff}')) {
                Ok(value @ Value::Object(_)) => Some(value),
                Ok(_) => {
                    diags.error(context, "content must be a JSON object");
                    None
                }
                Err(e) => {
                    diags.error(context, format!("content is not valid JSON: {e}"));
                    None
                }
            },
        };
        diags.extend(self.provider.validate_content_files(dir)?);
        Ok(parsed)
    }

    /// Check one library folder. Diagnostics are relative to the folder.
    fn check_library(
        &self,
        folder: &str,
        dir: &Path,
        diags: &mut Diagnostics,
    ) -> Result<Option<LibraryRecord>, CoreError> {
        if !LIBRARY_FOLDER.is_match(folder) {
            diags.error("", "invalid library folder name");
            return Ok(None);
        }

        let raw = match fs::read_to_string(dir.join(LIBRARY_MANIFEST)) {
            Ok(raw) => raw,
            Err(e) => {
                diags.error(LIBRARY_MANIFEST, format!("cannot read library manifest: {e}"));
                return Ok(None);
            }
        };
        let manifest = match parse_manifest_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                diags.error(LIBRARY_MANIFEST, e.to_string());
                return Ok(None);
            }
        };

        let verdict = validate_manifest(&manifest, &LIBRARY_REQUIRED, &LIBRARY_OPTIONAL);
        diags.extend(verdict.diagnostics.with_prefix(LIBRARY_MANIFEST));

        let mut record = match LibraryRecord::from_manifest(manifest) {
            Ok(r) => r,
            Err(e) => {
                diags.error(LIBRARY_MANIFEST, e.to_string());
                return Ok(None);
            }
        };

        if folder != record.identity.folder_name() && folder != record.machine_name() {
            diags.error(
                "",
                format!(
                    "folder name must be {} or {}",
                    record.machine_name(),
                    record.identity.folder_name()
                ),
            );
        }

        if !self.provider.may_update_library(&record.identity) {
            diags.error("", format!("not allowed to install or update {}", record.identity));
        }

        let semantics_path = dir.join(SEMANTICS_FILE);
        if semantics_path.is_file() {
            match fs::read_to_string(&semantics_path) {
                Ok(raw) => match parse_semantics(&raw) {
                    Ok(_) => record.semantics = Some(raw),
                    Err(e) => diags.error(SEMANTICS_FILE, e.to_string()),
                },
                Err(e) => diags.error(SEMANTICS_FILE, e.to_string()),
            }
        }

        let language_dir = dir.join(LANGUAGE_DIR);
        if language_dir.is_dir() {
            record.languages = read_languages(&language_dir, diags)?;
        }

        for key in ["preloadedJs", "preloadedCss"] {
            for path in record.manifest.preloaded_paths(key) {
                if !stays_inside(&path) {
                    diags.error(key, format!("file {path} is outside the library folder"));
                } else if !dir.join(&path).is_file() {
                    diags.error(key, format!("file {path} does not exist"));
                }
            }
        }

        if let Some(required) = record.core_api() {
            if required > self.core_api {
                diags.error(
                    "coreApi",
                    format!("requires a newer core API ({required}, have {})", self.core_api),
                );
            }
        }

        Ok((!diags.has_errors()).then_some(record))
    }
}

/// Relative, without `..`, so joining it onto a folder cannot leave that folder.
fn stays_inside(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Decode and validate `h5p.json`. Returns the manifest and whether it passed the schemas.
fn check_package_manifest(path: &Path, diags: &mut Diagnostics) -> Option<(Manifest, bool)> {
    let manifest = match fs::read_to_string(path)
        .map_err(Into::into)
        .and_then(|raw| parse_manifest_str(&raw))
    {
        Ok(m) => m,
        Err(e) => {
            diags.error(PACKAGE_MANIFEST, e.to_string());
            return None;
        }
    };
    let verdict = validate_manifest(&manifest, &PACKAGE_REQUIRED, &PACKAGE_OPTIONAL);
    let valid = verdict.valid;
    diags.extend(verdict.diagnostics.with_prefix(PACKAGE_MANIFEST));
    Some((manifest, valid))
}

fn read_languages(
    dir: &Path,
    diags: &mut Diagnostics,
) -> Result<BTreeMap<String, Value>, CoreError> {
    let mut languages = BTreeMap::new();
    for (name, path, is_dir) in sorted_entries(dir)? {
        if name.starts_with('.') || is_dir {
            continue;
        }
        let context = format!("{LANGUAGE_DIR}/{name}");
        if !LANGUAGE_FILE.is_match(&name) {
            diags.error(context, "invalid language file name");
            continue;
        }
        let decoded = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<Value>(raw.trim_start_matches('\u{feff}'))
                    .map_err(|e| e.to_string())
            });
        match decoded {
            Ok(value) => {
                let code = name.trim_end_matches(".json").to_owned();
                languages.insert(code, value);
            }
            Err(e) => diags.error(context, format!("invalid language file: {e}")),
        }
    }
    Ok(languages)
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<(String, PathBuf, bool)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_dir = entry.file_type()?.is_dir();
        entries.push((name, entry.path(), is_dir));
    }
    entries.sort();
    Ok(entries)
}

//! Dependency graph queries over package and installed libraries.

use crate::CoreError;
use satchel_schema::{
    DependencyDeclaration, DependencyKind, LibraryIdentity, LibraryRecord, Manifest,
};
use satchel_store::{LibraryUsage, StorageProvider};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Dependencies declared by `package` or any of `libraries` that neither the
/// package nor the provider can satisfy, keyed by machine name.
///
/// A declaration is satisfied by a package library with the same machine name
/// and the same major/minor version; patch versions are not compared.
pub fn missing_dependencies<S: StorageProvider + ?Sized>(
    provider: &S,
    package: &Manifest,
    libraries: &BTreeMap<String, LibraryRecord>,
) -> Result<BTreeMap<String, DependencyDeclaration>, CoreError> {
    let declarations = package
        .all_dependencies()
        .into_iter()
        .chain(libraries.values().flat_map(LibraryRecord::dependencies));

    let mut missing = BTreeMap::new();
    for declaration in declarations {
        let wanted = &declaration.library;
        if missing.contains_key(&wanted.machine_name) {
            continue;
        }
        let in_package = libraries
            .get(&wanted.machine_name)
            .is_some_and(|record| record.identity.is_same_version(wanted));
        if in_package {
            continue;
        }
        if provider.installed_library(wanted)?.is_some() {
            debug!("{wanted} satisfied by installed library");
            continue;
        }
        debug!("{wanted} is missing ({} dependency)", declaration.kind);
        missing.insert(wanted.machine_name.clone(), declaration);
    }
    Ok(missing)
}

/// One library in a content item's usage closure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEntry {
    pub library: LibraryRecord,
    /// Reached through preloaded edges only.
    pub preloaded: bool,
    /// Load order: every library weighs more than its own dependencies.
    pub weight: usize,
}

impl UsageEntry {
    pub fn to_usage(&self) -> LibraryUsage {
        LibraryUsage {
            library: self.library.identity.clone(),
            preloaded: self.preloaded,
        }
    }
}

/// Every library `root` transitively uses, keyed by machine name.
///
/// Preloaded edges keep the dynamic-ness of the branch they sit on; dynamic
/// edges make everything below them dynamic. The first visit of a machine
/// name decides its `preloaded` flag.
pub fn usage_closure<S: StorageProvider + ?Sized>(
    provider: &S,
    root: &Manifest,
) -> Result<BTreeMap<String, UsageEntry>, CoreError> {
    let mut walk = ClosureWalk {
        provider,
        entries: BTreeMap::new(),
        path: Vec::new(),
        next_weight: 1,
    };
    if let (Some(name), Some(major), Some(minor)) = (
        root.str_field("machineName"),
        root.uint_field("majorVersion"),
        root.uint_field("minorVersion"),
    ) {
        walk.path.push(LibraryIdentity::new(name, major, minor));
    }
    walk.visit(root, false)?;
    Ok(walk.entries)
}

struct ClosureWalk<'a, S: ?Sized> {
    provider: &'a S,
    entries: BTreeMap<String, UsageEntry>,
    path: Vec<LibraryIdentity>,
    next_weight: usize,
}

impl<S: StorageProvider + ?Sized> ClosureWalk<'_, S> {
    fn visit(&mut self, manifest: &Manifest, dynamic: bool) -> Result<(), CoreError> {
        for dep in manifest.dependencies(DependencyKind::Preloaded) {
            self.follow(&dep.library, dynamic)?;
        }
        for dep in manifest.dependencies(DependencyKind::Dynamic) {
            self.follow(&dep.library, true)?;
        }
        Ok(())
    }

    fn follow(&mut self, id: &LibraryIdentity, dynamic: bool) -> Result<(), CoreError> {
        if let Some(start) = self
            .path
            .iter()
            .position(|p| p.machine_name == id.machine_name)
        {
            let mut cycle: Vec<String> = self.path[start..].iter().map(ToString::to_string).collect();
            cycle.push(id.to_string());
            return Err(CoreError::DependencyCycle(cycle));
        }
        if self.entries.contains_key(&id.machine_name) {
            return Ok(());
        }

        let record = self
            .provider
            .load_library(id)?
            .ok_or_else(|| CoreError::MissingLibrary(id.to_string()))?;
        let manifest = record.manifest.clone();
        self.entries.insert(
            id.machine_name.clone(),
            UsageEntry {
                library: record,
                preloaded: !dynamic,
                weight: 0,
            },
        );

        self.path.push(id.clone());
        self.visit(&manifest, dynamic)?;
        self.path.pop();

        if let Some(entry) = self.entries.get_mut(&id.machine_name) {
            entry.weight = self.next_weight;
        }
        self.next_weight += 1;
        Ok(())
    }
}

//! Validation engine for Satchel content packages.
//!
//! This crate ties the schema layer and a storage provider together: the
//! `PackageValidator` that scans an extracted package, the dependency
//! resolver (missing-dependency detection and usage closure), the
//! `VersionArbiter` that decides whether a library is new, a patch or
//! already up to date, the `ContentValidator` that sanitizes content
//! parameters against library semantics, and the `Engine` that drives the
//! install, delete and copy operations under a `StoreLock`.

pub mod arbiter;
pub mod concurrency;
pub mod config;
pub mod content;
pub mod engine;
mod html;
pub mod package;
pub mod resolver;

pub use arbiter::{Classification, VersionArbiter};
pub use concurrency::StoreLock;
pub use config::SatchelConfig;
pub use content::{ContentReport, ContentValidator};
pub use engine::{Engine, InstallReport, LibraryOutcome};
pub use package::{DiscoveredPackage, PackageReport, PackageValidator};
pub use resolver::{missing_dependencies, usage_closure, UsageEntry};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] satchel_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] satchel_store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("store is locked by another process")]
    Locked,
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("library not installed: {0}")]
    MissingLibrary(String),
    #[error("library has no semantics: {0}")]
    NoSemantics(String),
}

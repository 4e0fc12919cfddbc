//! Manifest schemas, rule-driven validation, library identities and semantics trees for Satchel.
//!
//! This crate defines the schema layer: JSON manifest decoding (`Manifest`),
//! declarative field rules (`SchemaRule`, `Schema`) and the manifest validator
//! that checks a manifest against them (`validate_manifest`), the built-in
//! package and library schemas, library identity parsing (`LibraryIdentity`),
//! and the typed semantics tree (`SemanticsField`) that drives content validation.

pub mod diagnostic;
pub mod identity;
pub mod manifest;
pub mod rule;
pub mod schemas;
pub mod semantics;
pub mod types;
pub mod validate;

pub use diagnostic::{Diagnostic, Diagnostics, Severity, Verdict};
pub use identity::{CoreApiVersion, LibraryIdentity, LibraryRecord};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, DependencyDeclaration, DependencyKind, Manifest,
    ManifestError,
};
pub use rule::{Schema, SchemaRule};
pub use schemas::{LIBRARY_OPTIONAL, LIBRARY_REQUIRED, PACKAGE_OPTIONAL, PACKAGE_REQUIRED};
pub use semantics::{
    parse_semantics, FieldKind, GroupField, LibraryField, ListField, NumberField, SelectField,
    SelectOption, SemanticsField, TextField, TextPattern,
};
pub use types::{ContentId, LibraryId};
pub use validate::validate_manifest;

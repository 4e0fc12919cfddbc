use crate::identity::LibraryIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("manifest must be a JSON object")]
    NotAnObject,
    #[error("manifest field '{0}' is missing or not a valid version number")]
    InvalidVersionField(&'static str),
    #[error("manifest field 'machineName' is missing")]
    MissingMachineName,
    #[error("invalid library string '{0}', expected '<machineName> <major>.<minor>'")]
    InvalidLibraryString(String),
    #[error("semantics must be a JSON list of fields")]
    InvalidSemantics,
}

/// A decoded `h5p.json` or `library.json`.
///
/// Keys keep their file order. Unknown keys are carried along untouched so
/// that newer manifest fields survive a round trip through the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Read a small unsigned integer that may be encoded as a number or a digit string.
    pub fn uint_field(&self, key: &str) -> Option<u32> {
        value_as_uint(self.0.get(key)?)
    }

    /// `true` for `1`, `"1"` and `true`.
    pub fn flag_field(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(other) => value_as_uint(other) == Some(1),
            None => false,
        }
    }

    /// Parse one dependency list. Entries that do not name a complete library are skipped;
    /// the manifest validator is responsible for reporting them.
    pub fn dependencies(&self, kind: DependencyKind) -> Vec<DependencyDeclaration> {
        self.entries(kind.manifest_key())
            .into_iter()
            .filter_map(|entry| {
                let library = LibraryIdentity::from_fields(entry.as_object()?)?;
                Some(DependencyDeclaration { library, kind })
            })
            .collect()
    }

    /// Preloaded, then dynamic, then editor dependencies, each in declaration order.
    pub fn all_dependencies(&self) -> Vec<DependencyDeclaration> {
        DependencyKind::ALL
            .iter()
            .flat_map(|kind| self.dependencies(*kind))
            .collect()
    }

    /// Paths declared in `preloadedJs` or `preloadedCss`.
    pub fn preloaded_paths(&self, key: &str) -> Vec<String> {
        self.entries(key)
            .into_iter()
            .filter_map(|e| e.get("path").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    }

    /// A list-valued field. A lone object counts as a one-element list.
    fn entries(&self, key: &str) -> Vec<&Value> {
        match self.0.get(key) {
            Some(Value::Array(entries)) => entries.iter().collect(),
            Some(object @ Value::Object(_)) => vec![object],
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl Deref for Manifest {
    type Target = Map<String, Value>;
    fn deref(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Manifest {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

pub(crate) fn value_as_uint(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Preloaded,
    Dynamic,
    Editor,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 3] = [
        DependencyKind::Preloaded,
        DependencyKind::Dynamic,
        DependencyKind::Editor,
    ];

    pub fn manifest_key(self) -> &'static str {
        match self {
            DependencyKind::Preloaded => "preloadedDependencies",
            DependencyKind::Dynamic => "dynamicDependencies",
            DependencyKind::Editor => "editorDependencies",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Preloaded => write!(f, "preloaded"),
            DependencyKind::Dynamic => write!(f, "dynamic"),
            DependencyKind::Editor => write!(f, "editor"),
        }
    }
}

/// One entry of a manifest's dependency lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyDeclaration {
    pub library: LibraryIdentity,
    pub kind: DependencyKind,
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    match serde_json::from_str(input)? {
        Value::Object(fields) => Ok(Manifest(fields)),
        _ => Err(ManifestError::NotAnObject),
    }
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

use crate::manifest::{value_as_uint, DependencyDeclaration, Manifest, ManifestError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static LIBRARY_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_\-.]{1,255})[- ]([0-9]{1,5})\.([0-9]{1,5})$")
        .expect("library string pattern is valid")
});

/// A library name plus the major/minor pair that dependency declarations pin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LibraryIdentity {
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
}

impl LibraryIdentity {
    pub fn new(machine_name: impl Into<String>, major_version: u32, minor_version: u32) -> Self {
        Self {
            machine_name: machine_name.into(),
            major_version,
            minor_version,
        }
    }

    /// Parse `Name-1.2` (folder form) or `Name 1.2` (display form).
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidLibraryString(input.to_owned());
        let caps = LIBRARY_STRING.captures(input).ok_or_else(invalid)?;
        Ok(Self {
            machine_name: caps[1].to_owned(),
            major_version: caps[2].parse().map_err(|_| invalid())?,
            minor_version: caps[3].parse().map_err(|_| invalid())?,
        })
    }

    /// `{machineName}-{major}.{minor}`, the directory name a library unpacks into.
    pub fn folder_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.machine_name, self.major_version, self.minor_version
        )
    }

    /// Major and minor match. Patch and machine name are not compared; callers
    /// have already paired the identities up by machine name.
    pub fn is_same_version(&self, other: &LibraryIdentity) -> bool {
        self.major_version == other.major_version && self.minor_version == other.minor_version
    }

    pub(crate) fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        Some(Self {
            machine_name: fields.get("machineName")?.as_str()?.to_owned(),
            major_version: value_as_uint(fields.get("majorVersion")?)?,
            minor_version: value_as_uint(fields.get("minorVersion")?)?,
        })
    }
}

impl fmt::Display for LibraryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}",
            self.machine_name, self.major_version, self.minor_version
        )
    }
}

/// `coreApi` declared by a library: the lowest engine API it runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CoreApiVersion {
    pub major_version: u32,
    pub minor_version: u32,
}

impl fmt::Display for CoreApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

/// A library as found in a package or in the store: identity, patch level,
/// the full manifest, and the optional schema and translations shipped with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRecord {
    pub identity: LibraryIdentity,
    pub patch_version: u32,
    pub manifest: Manifest,
    /// Raw `semantics.json`. Decoded lazily by content validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantics: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub languages: BTreeMap<String, Value>,
}

impl LibraryRecord {
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let machine_name = manifest
            .str_field("machineName")
            .ok_or(ManifestError::MissingMachineName)?
            .to_owned();
        let major_version = manifest
            .uint_field("majorVersion")
            .ok_or(ManifestError::InvalidVersionField("majorVersion"))?;
        let minor_version = manifest
            .uint_field("minorVersion")
            .ok_or(ManifestError::InvalidVersionField("minorVersion"))?;
        let patch_version = manifest
            .uint_field("patchVersion")
            .ok_or(ManifestError::InvalidVersionField("patchVersion"))?;
        Ok(Self {
            identity: LibraryIdentity::new(machine_name, major_version, minor_version),
            patch_version,
            manifest,
            semantics: None,
            languages: BTreeMap::new(),
        })
    }

    pub fn machine_name(&self) -> &str {
        &self.identity.machine_name
    }

    pub fn title(&self) -> &str {
        self.manifest.str_field("title").unwrap_or_default()
    }

    pub fn runnable(&self) -> bool {
        self.manifest.flag_field("runnable")
    }

    pub fn dependencies(&self) -> Vec<DependencyDeclaration> {
        self.manifest.all_dependencies()
    }

    pub fn core_api(&self) -> Option<CoreApiVersion> {
        let api = self.manifest.get("coreApi")?.as_object()?;
        Some(CoreApiVersion {
            major_version: value_as_uint(api.get("majorVersion")?)?,
            minor_version: value_as_uint(api.get("minorVersion")?)?,
        })
    }

    /// `Name 1.2.3`, for log lines and reports.
    pub fn full_version(&self) -> String {
        format!("{}.{}", self.identity, self.patch_version)
    }
}

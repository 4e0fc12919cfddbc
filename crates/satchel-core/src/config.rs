use crate::CoreError;
use satchel_schema::CoreApiVersion;
use satchel_store::{StoragePolicy, DEFAULT_CONTENT_EXTENSIONS, DEFAULT_LIBRARY_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Highest `coreApi` a library may require.
pub const DEFAULT_CORE_API: CoreApiVersion = CoreApiVersion {
    major_version: 1,
    minor_version: 24,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreApiSetting {
    pub major: u32,
    pub minor: u32,
}

impl From<CoreApiSetting> for CoreApiVersion {
    fn from(s: CoreApiSetting) -> Self {
        CoreApiVersion {
            major_version: s.major,
            minor_version: s.minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SatchelConfig {
    pub store: PathBuf,
    pub content_extensions: Vec<String>,
    pub library_extensions: Vec<String>,
    pub allow_library_updates: bool,
    pub core_api: CoreApiSetting,
}

impl Default for SatchelConfig {
    fn default() -> Self {
        Self {
            store: default_store_path(),
            content_extensions: DEFAULT_CONTENT_EXTENSIONS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            library_extensions: DEFAULT_LIBRARY_EXTENSIONS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            allow_library_updates: true,
            core_api: CoreApiSetting {
                major: DEFAULT_CORE_API.major_version,
                minor: DEFAULT_CORE_API.minor_version,
            },
        }
    }
}

impl SatchelConfig {
    /// Load `~/.config/satchel/config.toml`, or defaults when it does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn with_store(mut self, store: impl Into<PathBuf>) -> Self {
        self.store = store.into();
        self
    }

    pub fn core_api(&self) -> CoreApiVersion {
        self.core_api.clone().into()
    }

    /// The part of the config the filesystem store enforces.
    pub fn storage_policy(&self) -> StoragePolicy {
        StoragePolicy {
            allow_library_updates: self.allow_library_updates,
            content_extensions: self.content_extensions.clone(),
            library_extensions: self.library_extensions.clone(),
        }
    }

    fn normalize(&mut self) {
        for list in [&mut self.content_extensions, &mut self.library_extensions] {
            for ext in list.iter_mut() {
                *ext = ext.trim_start_matches('.').to_ascii_lowercase();
            }
        }
    }
}

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    home().map(|h| h.join(".config/satchel/config.toml"))
}

fn default_store_path() -> PathBuf {
    home().map_or_else(
        || PathBuf::from(".satchel"),
        |h| h.join(".local/share/satchel"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = SatchelConfig::default().with_store("/srv/satchel");
        config.allow_library_updates = false;
        config.save(&path).unwrap();

        let loaded = SatchelConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "content_extensions = [\".PNG\", \"json\"]\n[core_api]\nmajor = 1\nminor = 19\n",
        )
        .unwrap();

        let config = SatchelConfig::load(&path).unwrap();
        assert_eq!(config.content_extensions, vec!["png", "json"]);
        assert_eq!(config.core_api().to_string(), "1.19");
        assert!(config.allow_library_updates);
        assert_eq!(config.library_extensions, vec!["js", "css"]);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "allow_library_updates = \"maybe\"").unwrap();
        assert!(matches!(
            SatchelConfig::load(&path),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn storage_policy_mirrors_config() {
        let config = SatchelConfig {
            allow_library_updates: false,
            ..SatchelConfig::default()
        };
        let policy = config.storage_policy();
        assert!(!policy.allow_library_updates);
        assert!(policy.content_extensions.contains(&"webm".to_owned()));
    }
}

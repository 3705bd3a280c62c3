//! Storage configuration
//!
//! Controls where session state lives on disk, how subscription and retained
//! records are spread across shard directories, and how large a stored
//! payload may be. Can be built in code or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::limits::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SHARD_COUNT, DEFAULT_STORAGE_DIR};

/// Storage configuration.
///
/// # Example
///
/// ```toml
/// # root = "/var/lib/mqsession"
/// shard_count = 4096
/// max_message_size = 268435455
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root override. `None` resolves to `$HOME/.mqsession-storage`
    /// (or `./.mqsession-storage` without `HOME`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Number of shard directories; 0 disables subscription/retained storage
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    /// Maximum payload size accepted by the message and retained stores
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_shard_count() -> u32 {
    DEFAULT_SHARD_COUNT
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            root: None,
            shard_count: DEFAULT_SHARD_COUNT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl StorageConfig {
    /// Config rooted at an explicit directory, other settings default
    pub fn at(root: impl Into<PathBuf>) -> Self {
        StorageConfig::default().with_root(root)
    }

    /// Set the storage root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the shard count
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Set the maximum payload size
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Resolve the effective storage root.
    ///
    /// An explicit root wins; otherwise `$HOME/.mqsession-storage`, and when
    /// `HOME` is unset or empty, `.mqsession-storage` relative to the working
    /// directory.
    pub fn resolve_root(&self) -> PathBuf {
        if let Some(root) = &self.root {
            return root.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => PathBuf::from(home).join(DEFAULT_STORAGE_DIR),
            _ => PathBuf::from(DEFAULT_STORAGE_DIR),
        }
    }

    /// Validate configuration.
    ///
    /// A zero shard count is allowed (stores fail closed), an empty root
    /// path or a zero message size is not.
    pub fn validate(&self) -> Result<()> {
        if let Some(root) = &self.root {
            if root.as_os_str().is_empty() {
                return Err(Error::invalid_input("storage root path is empty"));
            }
        }
        if self.max_message_size == 0 {
            return Err(Error::invalid_input("max_message_size must be positive"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# mqsession storage configuration
#
# Storage root. Defaults to $HOME/.mqsession-storage
# root = "/var/lib/mqsession"

# Number of shard directories for subscriptions and retained messages.
# 0 disables both stores.
shard_count = 4096

# Largest payload accepted for queued and retained messages (bytes).
max_message_size = 268435455
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("reading config {}", path.display()), e))?;
        let config: StorageConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_input(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::storage(format!("writing config {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.shard_count, 4096);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.root.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StorageConfig::default()
            .with_root("/tmp/mq")
            .with_shard_count(16)
            .with_max_message_size(1024);

        assert_eq!(config.root, Some(PathBuf::from("/tmp/mq")));
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.max_message_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_root_wins() {
        let config = StorageConfig::at("/srv/storage");
        assert_eq!(config.resolve_root(), PathBuf::from("/srv/storage"));
    }

    #[test]
    fn test_default_root_ends_with_storage_dir() {
        let root = StorageConfig::default().resolve_root();
        assert!(root.ends_with(DEFAULT_STORAGE_DIR));
    }

    #[test]
    fn test_validate_rejects_empty_root() {
        let config = StorageConfig::default().with_root("");
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_zero_message_size() {
        let config = StorageConfig::default().with_max_message_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_shard_count_is_valid() {
        let config = StorageConfig::default().with_shard_count(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_parses() {
        let config: StorageConfig = toml::from_str(StorageConfig::default_toml()).unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StorageConfig = toml::from_str("shard_count = 8").unwrap();
        assert_eq!(config.shard_count, 8);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mqsession.toml");
        let config = StorageConfig::at(dir.path().join("root")).with_shard_count(64);

        config.write_to_file(&path).unwrap();
        let loaded = StorageConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = TempDir::new().unwrap();
        let result = StorageConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Storage { .. })));
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "shard_count = \"many\"").unwrap();
        assert!(matches!(
            StorageConfig::from_file(&path),
            Err(Error::InvalidInput(_))
        ));
    }
}

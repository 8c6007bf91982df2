//! Node configuration
//!
//! Loaded from a JSON file at startup. Every field has a default so a
//! partial file is enough; `volstore init` writes a fully-populated one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding volume container files (default: "./data/block")
    #[serde(default = "default_block_dir")]
    pub block_dir: PathBuf,

    /// Directory holding index files and the locations registry
    /// (default: "./data/index")
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Maximum container size in bytes per volume (default: 32 GiB)
    #[serde(default = "default_volume_capacity")]
    pub volume_capacity: u64,

    /// Admin HTTP endpoint settings
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Admin HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 6063)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_block_dir() -> PathBuf {
    PathBuf::from("./data/block")
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

fn default_volume_capacity() -> u64 {
    32 * 1024 * 1024 * 1024
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6063
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_dir: default_block_dir(),
            index_dir: default_index_dir(),
            volume_capacity: default_volume_capacity(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid config {}: {}", path.display(), err),
            )
        })
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        fs::write(path, content)
    }
}

impl AdminConfig {
    /// Socket address string for binding.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.block_dir, PathBuf::from("./data/block"));
        assert_eq!(config.volume_capacity, 32 * 1024 * 1024 * 1024);
        assert_eq!(config.admin.port, 6063);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"block_dir": "/mnt/vol"}"#).unwrap();
        assert_eq!(config.block_dir, PathBuf::from("/mnt/vol"));
        assert_eq!(config.index_dir, PathBuf::from("./data/index"));
        assert_eq!(config.admin.host, "0.0.0.0");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volstore.json");

        let mut config = StoreConfig::default();
        config.admin.port = 7070;
        config.save(&path).unwrap();

        let loaded = StoreConfig::load(&path).unwrap();
        assert_eq!(loaded.admin.port, 7070);
        assert_eq!(loaded.volume_capacity, config.volume_capacity);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volstore.json");
        fs::write(&path, "not json").unwrap();
        assert!(StoreConfig::load(&path).is_err());
    }

    #[test]
    fn test_socket_addr() {
        let admin = AdminConfig {
            host: "127.0.0.1".to_string(),
            port: 6063,
        };
        assert_eq!(admin.socket_addr(), "127.0.0.1:6063");
    }
}

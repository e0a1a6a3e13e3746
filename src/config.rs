//! Tracker configuration and the layout of its config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Deadline for a peer tracker to present its certificate after connecting.
pub const RECV_CERT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline of the self lookup joining the overlay at startup.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline of a single outbound find tracker query.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Contents of `config.yaml`.
pub struct Config {
    /// UDP port to listen on.
    ///
    /// Defaults to 0, picking any free port. The bound port is written back after startup.
    pub port: u16,
    /// Drop published records whose id is not the hash of their own certificate.
    ///
    /// Defaults to false.
    pub require_record_binding: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            require_record_binding: false,
        }
    }
}

impl Config {
    /// Read the config file, falling back to defaults if there is none.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }

        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Files of a tracker's config directory.
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> ConfigDir {
        ConfigDir { root: root.into() }
    }

    /// `<user config dir>/pie/tracker`
    pub fn default_root() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pie").join("tracker"))
    }

    /// Create the directory and its `files` subdirectory.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(self.files())?;

        Ok(())
    }

    // === Getters ===

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn certificate(&self) -> PathBuf {
        self.root.join("id.crt")
    }

    pub fn key(&self) -> PathBuf {
        self.root.join("id.key")
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("main.db")
    }

    pub fn files(&self) -> PathBuf {
        self.root.join("files")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(&dir.path().join("config.yaml")).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: 7000\n").unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.port, 7000);
        assert!(!config.require_record_binding);
    }

    #[test]
    fn saved_config_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = Config {
            port: 41000,
            require_record_binding: true,
        };
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: [not a port]\n").unwrap();

        assert!(matches!(Config::load(&path), Err(crate::Error::Config(_))));
    }

    #[test]
    fn layout() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = ConfigDir::new(dir.path().join("tracker"));

        config_dir.create().unwrap();

        assert!(config_dir.files().is_dir());
        assert_eq!(config_dir.database(), dir.path().join("tracker").join("main.db"));
    }
}

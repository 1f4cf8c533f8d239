use std::path::{Path, PathBuf};

use panel_library_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_CANDIDATES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

/// Reads `AppConfig` from YAML or TOML, picked by file extension.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Directory searched when no explicit config path is given.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("panel-library")
    }

    /// Load from `path` if given, otherwise from the first candidate file in
    /// the default config directory. A missing default file yields defaults;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        match path {
            Some(path) => Self::load_file(path),
            None => Self::load_from_dir(&Self::default_config_dir()),
        }
    }

    pub fn load_from_dir(dir: &Path) -> Result<AppConfig> {
        for candidate in CONFIG_CANDIDATES {
            let path = dir.join(candidate);
            if path.is_file() {
                return Self::load_file(&path);
            }
        }
        debug!("no config file in {}, using defaults", dir.display());
        Ok(AppConfig::default())
    }

    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::parse(path, &contents)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!("unsupported config extension: {other}"))),
        }
    }
}

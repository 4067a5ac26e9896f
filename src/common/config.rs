//! Configuration for the region state store and its host process

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment prefix for overrides, e.g. `REGIONSTORE_META_CONNECTIONS=4`
pub const ENV_PREFIX: &str = "REGIONSTORE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the catalog table and the coordination store
    pub data_dir: PathBuf,

    /// Number of pooled connections used to write the catalog table when the
    /// catalog region is not hosted by this process. A single connection is
    /// enough unless the catalog sees a very high write rate.
    pub meta_connections: usize,

    /// Whether the coordinator hosts the catalog region itself
    pub colocated_meta: bool,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./regionstore-data"),
            meta_connections: default_meta_connections(),
            colocated_meta: true,
            log_level: default_log_level(),
        }
    }
}

fn default_meta_connections() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `REGIONSTORE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.meta_connections == 0 {
            return Err(crate::Error::InvalidConfig(
                "meta_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// RocksDB path of the catalog table
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    /// RocksDB path of the coordination store
    pub fn coordination_path(&self) -> PathBuf {
        self.data_dir.join("coordination")
    }
}

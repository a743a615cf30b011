//! Settings for the command line tool.
//!
//! Read from an INI file (optional, defaults apply for anything missing) and
//! then from `STRUCTDB_*` environment variables, e.g.
//!
//! ```ini
//! data_directory = data
//! auto_catalog = true
//! granularity = byte
//! cache_capacity = 1000
//! full_blueprints = false
//! ```

use std::path::{Path, PathBuf};

// config lets you read a separate settings file
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::catalog::Granularity;
use crate::construct::{DEFAULT_CACHE_CAPACITY, PersistenceMode};
use crate::error::{Result, StructDbError};

pub const DEFAULT_SETTINGS_FILE: &str = "settings.ini";
pub const ENVIRONMENT_PREFIX: &str = "STRUCTDB";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub data_directory: PathBuf,
    pub auto_catalog: bool,
    pub granularity: Granularity,
    pub cache_capacity: usize,
    pub full_blueprints: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            auto_catalog: true,
            granularity: Granularity::Byte,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            full_blueprints: false,
        }
    }
}

impl Settings {
    pub fn load(file: &Path) -> Result<Self> {
        let is_ini = file
            .extension()
            .map(|extension| extension.eq_ignore_ascii_case("ini"))
            .unwrap_or(false);
        if !is_ini {
            return Err(StructDbError::Config(format!(
                "settings file {} is not an .ini file",
                file.display()
            )));
        }
        let settings: Settings = Config::builder()
            .set_default("data_directory", "data")?
            .set_default("auto_catalog", true)?
            .set_default("granularity", "byte")?
            .set_default("cache_capacity", DEFAULT_CACHE_CAPACITY as i64)?
            .set_default("full_blueprints", false)?
            .add_source(File::from(file).format(FileFormat::Ini).required(false))
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX))
            .build()?
            .try_deserialize()?;
        if settings.cache_capacity == 0 {
            return Err(StructDbError::Config("cache_capacity must be positive".into()));
        }
        Ok(settings)
    }
    pub fn persistence_mode(&self) -> PersistenceMode {
        PersistenceMode::Directory(self.data_directory.clone())
    }
}

//! File level interface to the catalog engine.
//!
//! The [`Manager`] owns the store for the lifetime of a run. It walks a file
//! or directory and, per file, either catalogs the contents (writing a `.sbp`
//! blueprint into the data directory) or, when the file already is a
//! blueprint, restores the original contents next to it. A file that fails is
//! logged and skipped; failures of the store itself abort the run.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::blueprint::{BLUEPRINT_EXTENSION, Blueprint};
use crate::catalog::{Catalog, Granularity};
use crate::construct::{Database, Value};
use crate::error::{Result, StructDbError};
use crate::persist::{DATA_FILE_NAME, POINTER_FILE_NAME};
use crate::settings::Settings;

pub const RESTORED_EXTENSION: &str = "restored";

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Cataloged { source: PathBuf, blueprint: PathBuf },
    Restored { source: PathBuf, output: PathBuf },
    Skipped { source: PathBuf, reason: String },
}

pub struct Manager {
    settings: Settings,
    database: Database,
}

impl Manager {
    pub fn open(settings: Settings) -> Result<Self> {
        let database = Database::with_cache_capacity(settings.persistence_mode(), settings.cache_capacity)?;
        Ok(Self { settings, database })
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Processes `target`, or the data directory when no target is given and
    /// auto cataloging is on.
    pub fn run(&self, target: Option<&Path>) -> Result<Vec<Outcome>> {
        match target {
            Some(target) => self.process(target, false),
            None if self.settings.auto_catalog => {
                let directory = self.settings.data_directory.clone();
                self.process(&directory, true)
            }
            None => Err(StructDbError::InvalidArgument(
                "no path given and auto catalog is disabled".into(),
            )),
        }
    }

    pub fn process(&self, target: &Path, skip_blueprints: bool) -> Result<Vec<Outcome>> {
        let mut files = collect_files(target, skip_blueprints)?;
        files.sort();
        let mut catalog = Catalog::new(&self.database, self.settings.granularity)
            .with_full_blueprints(self.settings.full_blueprints);
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let outcome = match self.process_file(&mut catalog, &file) {
                Ok(outcome) => outcome,
                Err(e @ (StructDbError::Lock(_) | StructDbError::Invariant(_))) => return Err(e),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping file");
                    Outcome::Skipped { source: file, reason: e.to_string() }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub fn process_file(&self, catalog: &mut Catalog<'_>, file: &Path) -> Result<Outcome> {
        let bytes = fs::read(file)?;
        if Blueprint::is_blueprint(&bytes) {
            let values = self.database.materialize(&bytes)?;
            let output = file.with_extension(RESTORED_EXTENSION);
            write_literals(&output, &values, self.settings.granularity)?;
            info!(source = %file.display(), output = %output.display(), "restored blueprint");
            return Ok(Outcome::Restored { source: file.to_path_buf(), output });
        }
        let values = literals_from_bytes(&bytes, self.settings.granularity);
        let blueprint = catalog.catalog(&values)?;
        let name = file
            .file_name()
            .ok_or_else(|| StructDbError::InvalidArgument(format!("{} has no file name", file.display())))?;
        let mut blueprint_name = name.to_os_string();
        blueprint_name.push(".");
        blueprint_name.push(BLUEPRINT_EXTENSION);
        let output = self.settings.data_directory.join(blueprint_name);
        fs::create_dir_all(&self.settings.data_directory)?;
        fs::write(&output, blueprint.to_bytes()?)?;
        info!(source = %file.display(), blueprint = %output.display(), "cataloged file");
        Ok(Outcome::Cataloged { source: file.to_path_buf(), blueprint: output })
    }
}

fn is_store_file(path: &Path) -> bool {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name == DATA_FILE_NAME || name == POINTER_FILE_NAME || name.ends_with(".tmp"),
        None => false,
    }
}

// Symbolic links are not followed into directories, so a link back up the
// tree is seen once and skipped.
fn collect_files(path: &Path, skip_blueprints: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        let is_file = file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        let is_blueprint = entry
            .path()
            .extension()
            .map(|extension| extension == BLUEPRINT_EXTENSION)
            .unwrap_or(false);
        if is_store_file(entry.path()) || (skip_blueprints && is_blueprint) {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

// ------------- Literal files -------------
pub fn literals_from_bytes(bytes: &[u8], granularity: Granularity) -> Vec<Value> {
    match granularity {
        Granularity::Byte => bytes.to_vec(),
        // most significant bit first
        Granularity::Bit => bytes
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
            .collect(),
    }
}

pub fn bytes_from_literals(values: &[Value], granularity: Granularity) -> Result<Vec<u8>> {
    match granularity {
        Granularity::Byte => Ok(values.to_vec()),
        Granularity::Bit => {
            if values.len() % 8 != 0 {
                return Err(StructDbError::InvalidArgument(format!(
                    "{} bits do not make whole bytes",
                    values.len()
                )));
            }
            values
                .chunks(8)
                .map(|bits| {
                    bits.iter().try_fold(0u8, |byte, bit| match bit {
                        0 | 1 => Ok((byte << 1) | bit),
                        other => Err(StructDbError::InvalidArgument(format!("{} is not a bit", other))),
                    })
                })
                .collect()
        }
    }
}

pub fn read_literals(path: &Path, granularity: Granularity) -> Result<Vec<Value>> {
    Ok(literals_from_bytes(&fs::read(path)?, granularity))
}

pub fn write_literals(path: &Path, values: &[Value], granularity: Granularity) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes_from_literals(values, granularity)?)?;
    Ok(())
}

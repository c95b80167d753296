//! File pipeline: finds data files, deserializes them by format and feeds
//! them to the catalogue builder and the layout assembler.
//!
//! A scenario directory holds `items.*` and `layout.*` (required) and an
//! optional `config.*`, each in RON, TOML or JSON.

use crate::assembly::{LayoutError, build_factory};
use crate::schema::LayoutData;
use flowsim_core::Factory;
use flowsim_core::catalogue::{Catalogue, CatalogueBuilder, CatalogueError, ItemDef};
use flowsim_core::config::SimConfig;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::info;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The item list did not form a valid catalogue.
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let extensions = ["ron", "toml", "json"];
    let mut found: Option<PathBuf> = None;

    for ext in &extensions {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(ref existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.clone(),
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `origin` only labels errors.
pub fn deserialize_str<T: DeserializeOwned>(content: &str, format: Format, origin: &Path) -> Result<T, DataLoadError> {
    let parse = |detail: String| DataLoadError::Parse {
        file: origin.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(path: &Path, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron | Format::Json => deserialize_str(&content, format, path),
        Format::Toml => {
            let table: toml::Value = deserialize_str(&content, format, path)?;
            let array = table
                .get(toml_key)
                .ok_or_else(|| DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: format!("missing key '{toml_key}' in TOML file"),
                })?
                .clone();
            array.try_into().map_err(|e: toml::de::Error| DataLoadError::Parse {
                file: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    }
}

// ===========================================================================
// Loading
// ===========================================================================

/// Load a simulation configuration. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<SimConfig, DataLoadError> {
    deserialize_file(path)
}

/// Load an item list (`items` key in TOML) into a catalogue.
pub fn load_catalogue(path: &Path) -> Result<Catalogue, DataLoadError> {
    let items: Vec<ItemDef> = deserialize_list(path, "items")?;
    let mut builder = CatalogueBuilder::new();
    for item in items {
        builder.register(item);
    }
    Ok(builder.build()?)
}

/// Load a layout file and assemble it into an unstarted factory.
pub fn load_layout(path: &Path, config: SimConfig, catalogue: Catalogue) -> Result<Factory, LayoutError> {
    let layout: LayoutData = deserialize_file(path)?;
    build_factory(&layout, config, catalogue)
}

/// Load a whole scenario directory.
pub fn load_scenario(dir: &Path) -> Result<Factory, LayoutError> {
    let items = require_data_file(dir, "items")?;
    let layout = require_data_file(dir, "layout")?;
    let config = match find_data_file(dir, "config")? {
        Some(path) => load_config(&path)?,
        None => SimConfig::default(),
    };
    let catalogue = load_catalogue(&items)?;
    info!(dir = %dir.display(), items = catalogue.len(), "scenario loaded");
    load_layout(&layout, config, catalogue)
}

// ===========================================================================
// Tests
// ===========================================================================

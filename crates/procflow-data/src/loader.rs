//! Resolution pipeline: reads data files, resolves cross-references, builds registry.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, deserialization
//! helpers, and the catalog/config loading built on them.

use crate::schema::{EquipmentData, ParamData, PortData};
use procflow_core::catalog::register_standard;
use procflow_core::engine::EngineConfig;
use procflow_core::registry::{
    EquipmentKindDef, ParamDef, PortDef, Registry, RegistryBuilder, RegistryError,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Base name of the equipment catalog file.
pub const EQUIPMENT_FILE: &str = "equipment";
/// Base name of the engine configuration file.
pub const ENGINE_FILE: &str = "engine";

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

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// A kind gives neither a category nor a base kind to take one from.
    #[error("equipment kind '{name}' in {file} has no category")]
    MissingCategory { file: PathBuf, name: String },

    /// The resolved catalog failed registry validation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

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

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Json => serde_json::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Toml => toml::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Json => serde_json::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Toml => {
            let table: toml::Value =
                toml::from_str(&content).map_err(|e| DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: e.to_string(),
                })?;
            let array = table
                .get(toml_key)
                .ok_or_else(|| DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: format!("missing key '{toml_key}' in TOML file"),
                })?
                .clone();
            // Deserialize the array value into Vec<T>.
            array
                .try_into()
                .map_err(|e: toml::de::Error| DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: e.to_string(),
                })
        }
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

// ===========================================================================
// Catalog resolution
// ===========================================================================

fn to_port_def(p: &PortData) -> PortDef {
    PortDef {
        name: p.name.clone(),
        class: p.class,
    }
}

fn to_param_def(p: &ParamData) -> ParamDef {
    match p {
        ParamData::Number {
            name,
            default,
            min,
            max,
            extreme,
        } => {
            let def = ParamDef::number(name, *default, *min, *max);
            match extreme {
                Some(v) => def.with_extreme(*v),
                None => def,
            }
        }
        ParamData::Choice {
            name,
            default,
            options,
        } => {
            let options: Vec<&str> = options.iter().map(String::as_str).collect();
            ParamDef::choice(name, default, &options)
        }
    }
}

/// Resolve one entry against the kinds defined so far.
fn resolve_kind(
    entry: &EquipmentData,
    known: &HashMap<String, EquipmentKindDef>,
    file: &Path,
) -> Result<EquipmentKindDef, DataLoadError> {
    check_duplicate(known, &entry.name, file)?;
    let base = entry
        .extends
        .as_deref()
        .map(|name| resolve_name(known, name, file, "equipment kind"))
        .transpose()?;

    let category = match (entry.category, base) {
        (Some(c), _) => c.into(),
        (None, Some(b)) => b.category,
        (None, None) => {
            return Err(DataLoadError::MissingCategory {
                file: file.to_path_buf(),
                name: entry.name.clone(),
            });
        }
    };

    let ports = if entry.ports.is_empty() {
        base.map(|b| b.ports.clone()).unwrap_or_default()
    } else {
        entry.ports.iter().map(to_port_def).collect()
    };

    // Entry parameters override inherited ones of the same name.
    let mut params: Vec<ParamDef> = base.map(|b| b.params.clone()).unwrap_or_default();
    for p in &entry.params {
        let def = to_param_def(p);
        match params.iter_mut().find(|existing| existing.name == def.name) {
            Some(slot) => *slot = def,
            None => params.push(def),
        }
    }

    Ok(EquipmentKindDef {
        name: entry.name.clone(),
        category,
        ports,
        params,
    })
}

/// Read the equipment file in `dir` and register its kinds into `builder`.
/// `known` holds the kinds already registered, by name.
fn load_kinds_into(
    dir: &Path,
    mut builder: RegistryBuilder,
    mut known: HashMap<String, EquipmentKindDef>,
) -> Result<Registry, DataLoadError> {
    let path = require_data_file(dir, EQUIPMENT_FILE)?;
    let entries: Vec<EquipmentData> = deserialize_list(&path, EQUIPMENT_FILE)?;

    for entry in &entries {
        let def = resolve_kind(entry, &known, &path)?;
        known.insert(def.name.clone(), def.clone());
        builder.register(def);
    }
    let registry = builder.build()?;
    tracing::debug!(
        file = %path.display(),
        kinds = registry.kind_count(),
        "equipment catalog loaded"
    );
    Ok(registry)
}

/// Load a catalog made only of the kinds in `dir`'s equipment file.
pub fn load_catalog(dir: &Path) -> Result<Registry, DataLoadError> {
    load_kinds_into(dir, RegistryBuilder::new(), HashMap::new())
}

/// Load the built-in catalog plus the kinds in `dir`'s equipment file.
/// Data kinds may extend built-in ones but not redefine them.
pub fn load_catalog_extending_standard(dir: &Path) -> Result<Registry, DataLoadError> {
    let mut builder = RegistryBuilder::new();
    register_standard(&mut builder);
    let known = Registry::standard()
        .kinds()
        .map(|(_, k)| (k.name.clone(), k.clone()))
        .collect();
    load_kinds_into(dir, builder, known)
}

/// Load `engine.{ron,toml,json}` from `dir`. A missing file gives the
/// default configuration; missing fields take their defaults.
pub fn load_config(dir: &Path) -> Result<EngineConfig, DataLoadError> {
    match find_data_file(dir, ENGINE_FILE)? {
        Some(path) => deserialize_file(&path),
        None => Ok(EngineConfig::default()),
    }
}

/// Everything needed to construct an engine.
#[derive(Debug, Clone)]
pub struct PlantData {
    pub registry: Registry,
    pub config: EngineConfig,
}

/// Load the catalog and engine configuration from `dir`.
pub fn load_plant_data(dir: &Path, extend_standard: bool) -> Result<PlantData, DataLoadError> {
    let registry = if extend_standard {
        load_catalog_extending_standard(dir)?
    } else {
        load_catalog(dir)?
    };
    let config = load_config(dir)?;
    Ok(PlantData { registry, config })
}

// ===========================================================================
// Tests
// ===========================================================================

//! Loads procflow equipment catalogs and engine configuration from RON,
//! TOML or JSON data files.

pub mod loader;
pub mod schema;

pub use loader::{
    DataLoadError, PlantData, load_catalog, load_catalog_extending_standard, load_config,
    load_plant_data,
};

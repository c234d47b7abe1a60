//! Serde data file structs for equipment catalogs.
//!
//! These structs define the on-disk format for equipment kinds. They are
//! deserialized from RON, JSON, or TOML data files and then resolved into
//! engine types by the loader.

use procflow_core::registry::{Category, PortClass, SeparatorStyle, ValveStyle};
use serde::Deserialize;

// ===========================================================================
// Equipment kinds
// ===========================================================================

/// An equipment kind definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentData {
    pub name: String,
    /// Behaviour category. Optional when `extends` names a base kind.
    #[serde(default)]
    pub category: Option<CategoryData>,
    /// Earlier kind (or built-in kind) whose ports and parameters this one
    /// starts from.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortData>,
    #[serde(default)]
    pub params: Vec<ParamData>,
}

/// Flat spelling of the engine's categories for data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryData {
    Pump,
    Compressor,
    ControlValve,
    CheckValve,
    Tank,
    Vessel,
    Furnace,
    Cooler,
    HeatExchanger,
    Column,
    Separator,
    ThreePhaseSeparator,
    PassThrough,
}

impl From<CategoryData> for Category {
    fn from(c: CategoryData) -> Self {
        match c {
            CategoryData::Pump => Category::Pump,
            CategoryData::Compressor => Category::Compressor,
            CategoryData::ControlValve => Category::Valve(ValveStyle::Control),
            CategoryData::CheckValve => Category::Valve(ValveStyle::Check),
            CategoryData::Tank => Category::Tank,
            CategoryData::Vessel => Category::Vessel,
            CategoryData::Furnace => Category::Furnace,
            CategoryData::Cooler => Category::Cooler,
            CategoryData::HeatExchanger => Category::HeatExchanger,
            CategoryData::Column => Category::Column,
            CategoryData::Separator => Category::Separator(SeparatorStyle::Simple),
            CategoryData::ThreePhaseSeparator => Category::Separator(SeparatorStyle::ThreePhase),
            CategoryData::PassThrough => Category::PassThrough,
        }
    }
}

/// A port on an equipment kind.
#[derive(Debug, Clone, Deserialize)]
pub struct PortData {
    pub name: String,
    pub class: PortClass,
}

/// A parameter on an equipment kind. Numbers carry a range; anything with a
/// string default is a choice.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamData {
    Number {
        name: String,
        default: f64,
        min: f64,
        max: f64,
        #[serde(default)]
        extreme: Option<f64>,
    },
    Choice {
        name: String,
        default: String,
        options: Vec<String>,
    },
}

impl ParamData {
    pub fn name(&self) -> &str {
        match self {
            ParamData::Number { name, .. } | ParamData::Choice { name, .. } => name,
        }
    }
}

// ===========================================================================
// TOML wrapper
// ===========================================================================

/// TOML has no top-level arrays, so equipment files wrap the list in an
/// `[[equipment]]` table array.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlEquipment {
    pub equipment: Vec<EquipmentData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_param_from_ron() {
        let p: ParamData =
            ron::from_str(r#"(name: "flow_rate", default: 10.0, min: 0.0, max: 50.0)"#).unwrap();
        assert!(matches!(p, ParamData::Number { extreme: None, .. }));
        assert_eq!(p.name(), "flow_rate");
    }

    #[test]
    fn choice_param_from_json() {
        let p: ParamData = serde_json::from_str(
            r#"{"name": "drive", "default": "electric", "options": ["electric", "diesel"]}"#,
        )
        .unwrap();
        assert!(matches!(p, ParamData::Choice { ref options, .. } if options.len() == 2));
    }

    #[test]
    fn category_names_are_flat() {
        let c: CategoryData = serde_json::from_str(r#""three_phase_separator""#).unwrap();
        assert_eq!(
            Category::from(c),
            Category::Separator(SeparatorStyle::ThreePhase)
        );
        let c: CategoryData = serde_json::from_str(r#""check_valve""#).unwrap();
        assert_eq!(Category::from(c), Category::Valve(ValveStyle::Check));
    }

    #[test]
    fn equipment_from_toml() {
        let data: TomlEquipment = toml::from_str(
            r#"
[[equipment]]
name = "booster"
extends = "centrifugal_pump"

[[equipment.params]]
name = "flow_rate"
default = 20.0
min = 0.0
max = 40.0
"#,
        )
        .unwrap();
        assert_eq!(data.equipment.len(), 1);
        assert_eq!(data.equipment[0].extends.as_deref(), Some("centrifugal_pump"));
        assert!(data.equipment[0].category.is_none());
        assert_eq!(data.equipment[0].params[0].name(), "flow_rate");
    }
}

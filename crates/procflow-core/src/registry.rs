//! Equipment registry: the catalog of equipment kinds, their ports and their
//! parameter schemas. Built once through [`RegistryBuilder`] and read-only
//! afterwards.

use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::id::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Well-known names
// ---------------------------------------------------------------------------

/// Parameter names the transfer functions read.
pub mod param {
    pub const FLOW_RATE: &str = "flow_rate";
    pub const PRESSURE: &str = "pressure";
    pub const OPENING: &str = "opening";
    pub const PRESSURE_DROP: &str = "pressure_drop";
    pub const CRACKING_PRESSURE: &str = "cracking_pressure";
    pub const LEVEL: &str = "level";
    pub const VOLUME: &str = "volume";
    pub const TEMPERATURE: &str = "temperature";
    pub const OUTLET_TEMPERATURE: &str = "outlet_temperature";
    pub const HOT_OUTLET_TEMPERATURE: &str = "hot_outlet_temperature";
    pub const COLD_OUTLET_TEMPERATURE: &str = "cold_outlet_temperature";
    pub const TOP_TEMPERATURE: &str = "top_temperature";
    pub const BOTTOM_TEMPERATURE: &str = "bottom_temperature";
}

/// Port names the transfer functions route by.
pub mod port {
    pub const SHELL_IN: &str = "shell_in";
    pub const SHELL_OUT: &str = "shell_out";
    pub const TUBE_IN: &str = "tube_in";
    pub const TUBE_OUT: &str = "tube_out";
    pub const FEED: &str = "feed";
    pub const TOP: &str = "top";
    pub const BOTTOM: &str = "bottom";
    pub const GAS_OUT: &str = "gas_out";
    pub const OIL_OUT: &str = "oil_out";
    pub const WATER_OUT: &str = "water_out";
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Valve behaviour variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValveStyle {
    /// Throttles by `opening` percent.
    Control,
    /// Passes everything once inbound pressure exceeds `cracking_pressure`.
    Check,
}

/// Separator behaviour variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorStyle {
    /// Behaves like a generic pass-through.
    Simple,
    /// Splits into gas / oil / water outlets.
    ThreePhase,
}

/// The closed set of equipment categories. The transfer evaluator matches on
/// this exhaustively, so adding a category forces an evaluator update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Pump,
    Compressor,
    Valve(ValveStyle),
    Tank,
    Vessel,
    Furnace,
    Cooler,
    HeatExchanger,
    Column,
    Separator(SeparatorStyle),
    PassThrough,
}

impl Category {
    /// Numeric parameters the transfer function for this category reads.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Category::Pump | Category::Compressor => &[param::FLOW_RATE, param::PRESSURE],
            Category::Valve(ValveStyle::Control) => &[param::OPENING, param::PRESSURE_DROP],
            Category::Valve(ValveStyle::Check) => {
                &[param::CRACKING_PRESSURE, param::PRESSURE_DROP]
            }
            Category::Tank | Category::Vessel => &[
                param::LEVEL,
                param::VOLUME,
                param::TEMPERATURE,
                param::PRESSURE,
            ],
            Category::Furnace | Category::Cooler => &[param::OUTLET_TEMPERATURE],
            Category::HeatExchanger => &[
                param::HOT_OUTLET_TEMPERATURE,
                param::COLD_OUTLET_TEMPERATURE,
            ],
            Category::Column => &[
                param::TOP_TEMPERATURE,
                param::BOTTOM_TEMPERATURE,
                param::PRESSURE,
            ],
            Category::Separator(_) | Category::PassThrough => &[],
        }
    }

    /// Ports (name, class) the transfer function for this category routes by.
    pub fn required_ports(self) -> &'static [(&'static str, PortClass)] {
        match self {
            Category::HeatExchanger => &[
                (port::SHELL_IN, PortClass::Sink),
                (port::SHELL_OUT, PortClass::Source),
                (port::TUBE_IN, PortClass::Sink),
                (port::TUBE_OUT, PortClass::Source),
            ],
            Category::Column => &[
                (port::FEED, PortClass::Sink),
                (port::TOP, PortClass::Source),
                (port::BOTTOM, PortClass::Source),
            ],
            Category::Separator(SeparatorStyle::ThreePhase) => &[
                (port::GAS_OUT, PortClass::Source),
                (port::OIL_OUT, PortClass::Source),
                (port::WATER_OUT, PortClass::Source),
            ],
            _ => &[],
        }
    }

    /// The parameter a stuck-setpoint fault pins when none is named.
    pub fn setpoint_param(self) -> Option<&'static str> {
        match self {
            Category::Pump | Category::Compressor => Some(param::FLOW_RATE),
            Category::Valve(ValveStyle::Control) => Some(param::OPENING),
            Category::Valve(ValveStyle::Check) => Some(param::CRACKING_PRESSURE),
            Category::Tank | Category::Vessel => Some(param::TEMPERATURE),
            Category::Furnace | Category::Cooler => Some(param::OUTLET_TEMPERATURE),
            Category::HeatExchanger => Some(param::HOT_OUTLET_TEMPERATURE),
            Category::Column => Some(param::PRESSURE),
            Category::Separator(_) | Category::PassThrough => None,
        }
    }

    /// The output-governing parameter a forced-extreme-output fault
    /// overrides when none is named.
    pub fn output_param(self) -> Option<&'static str> {
        match self {
            Category::Pump | Category::Compressor => Some(param::FLOW_RATE),
            Category::Valve(_) => None,
            Category::Tank | Category::Vessel => Some(param::TEMPERATURE),
            Category::Furnace | Category::Cooler => Some(param::OUTLET_TEMPERATURE),
            Category::HeatExchanger => Some(param::HOT_OUTLET_TEMPERATURE),
            Category::Column => Some(param::TOP_TEMPERATURE),
            Category::Separator(_) | Category::PassThrough => None,
        }
    }

    /// Whether this category accumulates inventory and carries a level.
    pub fn is_accumulator(self) -> bool {
        matches!(self, Category::Tank | Category::Vessel)
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Flow class of a port. Pipes always run from a `Source` port to a `Sink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortClass {
    /// Flow leaves the equipment here.
    Source,
    /// Flow enters the equipment here.
    Sink,
}

/// A named port on an equipment kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub class: PortClass,
}

impl PortDef {
    pub fn source(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: PortClass::Source,
        }
    }

    pub fn sink(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: PortClass::Sink,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A parameter value on an equipment instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    Number(Fixed64),
    Choice(String),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<Fixed64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Choice(_) => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            ParamValue::Choice(c) => Some(c),
            ParamValue::Number(_) => None,
        }
    }
}

/// Schema of a single parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamSpec {
    /// A numeric parameter with a normal operating range. `extreme` is the
    /// out-of-range value a forced-extreme-output fault drives it to.
    Number {
        default: Fixed64,
        min: Fixed64,
        max: Fixed64,
        extreme: Option<Fixed64>,
    },
    /// An enumerated parameter.
    Choice {
        default: String,
        options: Vec<String>,
    },
}

/// A named parameter on an equipment kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub spec: ParamSpec,
}

impl ParamDef {
    pub fn number(name: &str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            spec: ParamSpec::Number {
                default: f64_to_fixed64(default),
                min: f64_to_fixed64(min),
                max: f64_to_fixed64(max),
                extreme: None,
            },
        }
    }

    /// Attach a forced-extreme value to a numeric parameter.
    pub fn with_extreme(mut self, value: f64) -> Self {
        if let ParamSpec::Number { extreme, .. } = &mut self.spec {
            *extreme = Some(f64_to_fixed64(value));
        }
        self
    }

    pub fn choice(name: &str, default: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            spec: ParamSpec::Choice {
                default: default.to_string(),
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        }
    }

    /// The value a freshly placed instance starts with.
    pub fn default_value(&self) -> ParamValue {
        match &self.spec {
            ParamSpec::Number { default, .. } => ParamValue::Number(*default),
            ParamSpec::Choice { default, .. } => ParamValue::Choice(default.clone()),
        }
    }

    /// The forced-extreme value, if this parameter has one.
    pub fn extreme(&self) -> Option<Fixed64> {
        match &self.spec {
            ParamSpec::Number { extreme, .. } => *extreme,
            ParamSpec::Choice { .. } => None,
        }
    }

    /// Validate a value against the schema. Numbers are clamped into the
    /// normal range; choices must name a known option.
    pub fn validate(&self, value: ParamValue) -> Result<ParamValue, ParameterError> {
        match (&self.spec, value) {
            (ParamSpec::Number { min, max, .. }, ParamValue::Number(v)) => {
                Ok(ParamValue::Number(v.clamp(*min, *max)))
            }
            (ParamSpec::Choice { options, .. }, ParamValue::Choice(c)) => {
                if options.iter().any(|o| *o == c) {
                    Ok(ParamValue::Choice(c))
                } else {
                    Err(ParameterError::UnknownChoice {
                        name: self.name.clone(),
                        value: c,
                    })
                }
            }
            _ => Err(ParameterError::TypeMismatch(self.name.clone())),
        }
    }
}

/// Errors from validating a parameter write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("unknown parameter '{name}' on kind '{kind}'")]
    Unknown { kind: String, name: String },
    #[error("parameter '{0}' given a value of the wrong type")]
    TypeMismatch(String),
    #[error("'{value}' is not an option of parameter '{name}'")]
    UnknownChoice { name: String, value: String },
    #[error("parameter '{0}' is pinned by an active fault")]
    Pinned(String),
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// An equipment kind definition in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentKindDef {
    pub name: String,
    pub category: Category,
    pub ports: Vec<PortDef>,
    pub params: Vec<ParamDef>,
}

impl EquipmentKindDef {
    pub fn port_index(&self, name: &str) -> Option<PortIndex> {
        self.ports
            .iter()
            .position(|p| p.name == name)
            .map(|i| PortIndex(i as u16))
    }

    pub fn param(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Default parameter map for a new instance of this kind.
    pub fn default_params(&self) -> Vec<(String, ParamValue)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default_value()))
            .collect()
    }

    fn check(&self) -> Result<(), RegistryError> {
        for (i, port) in self.ports.iter().enumerate() {
            if self.ports[..i].iter().any(|p| p.name == port.name) {
                return Err(RegistryError::DuplicatePort {
                    kind: self.name.clone(),
                    port: port.name.clone(),
                });
            }
        }
        for &(name, class) in self.category.required_ports() {
            let found = self.ports.iter().any(|p| p.name == name && p.class == class);
            if !found {
                return Err(RegistryError::MissingPort {
                    kind: self.name.clone(),
                    port: name.to_string(),
                });
            }
        }
        for &name in self.category.required_params() {
            let numeric = self
                .param(name)
                .is_some_and(|p| matches!(p.spec, ParamSpec::Number { .. }));
            if !numeric {
                return Err(RegistryError::MissingParameter {
                    kind: self.name.clone(),
                    param: name.to_string(),
                });
            }
        }
        for param in &self.params {
            match &param.spec {
                ParamSpec::Number { default, min, max, .. } => {
                    if min > max || default < min || default > max {
                        return Err(RegistryError::InvalidRange {
                            kind: self.name.clone(),
                            param: param.name.clone(),
                        });
                    }
                }
                ParamSpec::Choice { default, options } => {
                    if !options.contains(default) {
                        return Err(RegistryError::InvalidRange {
                            kind: self.name.clone(),
                            param: param.name.clone(),
                        });
                    }
                }
            }
        }
        if self.category.is_accumulator() {
            self.check_accumulator()?;
        }
        Ok(())
    }

    /// Level must stay within [0, 100] % and volume must be positive, for
    /// the whole range and any forced-extreme value.
    fn check_accumulator(&self) -> Result<(), RegistryError> {
        let bounds = [
            (param::LEVEL, Fixed64::ZERO, Fixed64::from_num(100), true),
            (param::VOLUME, Fixed64::ZERO, Fixed64::MAX, false),
        ];
        for (name, lo, hi, lo_inclusive) in bounds {
            let Some(def) = self.param(name) else {
                continue;
            };
            let ParamSpec::Number { min, max, extreme, .. } = &def.spec else {
                continue;
            };
            let within = |v: Fixed64| (v > lo || (lo_inclusive && v == lo)) && v <= hi;
            if !within(*min) || !within(*max) || extreme.is_some_and(|e| !within(e)) {
                return Err(RegistryError::AccumulatorBounds {
                    kind: self.name.clone(),
                    param: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    kinds: Vec<EquipmentKindDef>,
    kind_name_to_id: HashMap<String, KindId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an equipment kind. Returns its ID. Re-registering a name
    /// is reported by [`build`](Self::build).
    pub fn register_kind(
        &mut self,
        name: &str,
        category: Category,
        ports: Vec<PortDef>,
        params: Vec<ParamDef>,
    ) -> KindId {
        self.register(EquipmentKindDef {
            name: name.to_string(),
            category,
            ports,
            params,
        })
    }

    /// Register a fully built kind definition. Returns its ID.
    pub fn register(&mut self, def: EquipmentKindDef) -> KindId {
        let id = KindId(self.kinds.len() as u32);
        self.kind_name_to_id.entry(def.name.clone()).or_insert(id);
        self.kinds.push(def);
        id
    }

    /// Mutate an existing kind by name before the registry is frozen.
    pub fn mutate_kind<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut EquipmentKindDef),
    {
        let id = self
            .kind_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.kinds[id.0 as usize]);
        Ok(())
    }

    pub fn kind_id(&self, name: &str) -> Option<KindId> {
        self.kind_name_to_id.get(name).copied()
    }

    /// Finalize and build the immutable registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        if self.kind_name_to_id.len() != self.kinds.len() {
            let dup = self
                .kinds
                .iter()
                .enumerate()
                .find(|(i, k)| self.kind_name_to_id.get(&k.name) != Some(&KindId(*i as u32)))
                .map(|(_, k)| k.name.clone())
                .unwrap_or_default();
            return Err(RegistryError::DuplicateKind(dup));
        }
        for kind in &self.kinds {
            kind.check()?;
        }
        Ok(Registry {
            kinds: self.kinds,
            kind_name_to_id: self.kind_name_to_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable registry. Frozen after build(). Thread-safe to share.
#[derive(Debug, Clone)]
pub struct Registry {
    kinds: Vec<EquipmentKindDef>,
    kind_name_to_id: HashMap<String, KindId>,
}

impl Registry {
    pub fn get_kind(&self, id: KindId) -> Option<&EquipmentKindDef> {
        self.kinds.get(id.0 as usize)
    }

    pub fn kind_id(&self, name: &str) -> Option<KindId> {
        self.kind_name_to_id.get(name).copied()
    }

    pub fn kind_by_name(&self, name: &str) -> Option<&EquipmentKindDef> {
        self.kind_id(name).and_then(|id| self.get_kind(id))
    }

    pub fn kind_count(&self) -> usize {
        self.kinds.len()
    }

    pub fn kinds(&self) -> impl Iterator<Item = (KindId, &EquipmentKindDef)> {
        self.kinds
            .iter()
            .enumerate()
            .map(|(i, k)| (KindId(i as u32), k))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("equipment kind '{0}' registered twice")]
    DuplicateKind(String),
    #[error("kind '{kind}' declares port '{port}' twice")]
    DuplicatePort { kind: String, port: String },
    #[error("kind '{kind}' is missing required port '{port}'")]
    MissingPort { kind: String, port: String },
    #[error("kind '{kind}' is missing required numeric parameter '{param}'")]
    MissingParameter { kind: String, param: String },
    #[error("parameter '{param}' on kind '{kind}' has an invalid default or range")]
    InvalidRange { kind: String, param: String },
    #[error("parameter '{param}' on tank/vessel kind '{kind}' allows values outside its physical bounds")]
    AccumulatorBounds { kind: String, param: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_builder() -> RegistryBuilder {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "pump",
            Category::Pump,
            vec![PortDef::sink("suction"), PortDef::source("discharge")],
            vec![
                ParamDef::number(param::FLOW_RATE, 100.0, 0.0, 1000.0).with_extreme(2000.0),
                ParamDef::number(param::PRESSURE, 5.0, 0.0, 100.0),
            ],
        );
        b.register_kind(
            "pipe_filter",
            Category::PassThrough,
            vec![PortDef::sink("inlet"), PortDef::source("outlet")],
            vec![],
        );
        b
    }

    #[test]
    fn register_and_build() {
        let reg = setup_builder().build().unwrap();
        assert_eq!(reg.kind_count(), 2);
        let pump = reg.kind_by_name("pump").unwrap();
        assert_eq!(pump.category, Category::Pump);
        assert_eq!(pump.port_index("discharge"), Some(PortIndex(1)));
        assert_eq!(pump.port_index("nope"), None);
    }

    #[test]
    fn duplicate_kind_rejected() {
        let mut b = setup_builder();
        b.register_kind("pipe_filter", Category::PassThrough, vec![], vec![]);
        assert_eq!(
            b.build().unwrap_err(),
            RegistryError::DuplicateKind("pipe_filter".to_string())
        );
    }

    #[test]
    fn missing_required_param_rejected() {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "broken_valve",
            Category::Valve(ValveStyle::Control),
            vec![PortDef::sink("inlet"), PortDef::source("outlet")],
            vec![ParamDef::number(param::OPENING, 100.0, 0.0, 100.0)],
        );
        match b.build() {
            Err(RegistryError::MissingParameter { param, .. }) => {
                assert_eq!(param, param::PRESSURE_DROP)
            }
            other => panic!("expected MissingParameter, got {other:?}"),
        }
    }

    #[test]
    fn heat_exchanger_requires_named_ports() {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "hx",
            Category::HeatExchanger,
            vec![PortDef::sink("shell_in"), PortDef::source("shell_out")],
            vec![
                ParamDef::number(param::HOT_OUTLET_TEMPERATURE, 80.0, 0.0, 500.0),
                ParamDef::number(param::COLD_OUTLET_TEMPERATURE, 60.0, 0.0, 500.0),
            ],
        );
        assert!(matches!(
            b.build(),
            Err(RegistryError::MissingPort { port, .. }) if port == "tube_in"
        ));
    }

    #[test]
    fn duplicate_port_rejected() {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "twin",
            Category::PassThrough,
            vec![PortDef::sink("inlet"), PortDef::source("inlet")],
            vec![],
        );
        assert!(matches!(b.build(), Err(RegistryError::DuplicatePort { .. })));
    }

    #[test]
    fn default_outside_range_rejected() {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "odd",
            Category::PassThrough,
            vec![],
            vec![ParamDef::number("speed", 200.0, 0.0, 100.0)],
        );
        assert!(matches!(b.build(), Err(RegistryError::InvalidRange { .. })));
    }

    fn tank_with(level: ParamDef, volume: ParamDef) -> RegistryBuilder {
        let mut b = RegistryBuilder::new();
        b.register_kind(
            "big_tank",
            Category::Tank,
            vec![PortDef::sink("inlet"), PortDef::source("outlet")],
            vec![
                level,
                volume,
                ParamDef::number(param::TEMPERATURE, 25.0, -50.0, 400.0),
                ParamDef::number(param::PRESSURE, 1.0, 0.0, 50.0),
            ],
        );
        b
    }

    #[test]
    fn tank_level_range_beyond_full_rejected() {
        let b = tank_with(
            ParamDef::number(param::LEVEL, 50.0, 0.0, 500.0),
            ParamDef::number(param::VOLUME, 50.0, 0.1, 100.0),
        );
        assert!(matches!(
            b.build(),
            Err(RegistryError::AccumulatorBounds { param: p, .. }) if p == param::LEVEL
        ));
    }

    #[test]
    fn tank_level_extreme_beyond_full_rejected() {
        let b = tank_with(
            ParamDef::number(param::LEVEL, 50.0, 0.0, 100.0).with_extreme(150.0),
            ParamDef::number(param::VOLUME, 50.0, 0.1, 100.0),
        );
        assert!(matches!(b.build(), Err(RegistryError::AccumulatorBounds { .. })));
    }

    #[test]
    fn tank_volume_reaching_zero_rejected() {
        let b = tank_with(
            ParamDef::number(param::LEVEL, 50.0, 0.0, 100.0),
            ParamDef::number(param::VOLUME, 50.0, 0.0, 100.0),
        );
        assert!(matches!(
            b.build(),
            Err(RegistryError::AccumulatorBounds { param: p, .. }) if p == param::VOLUME
        ));
    }

    #[test]
    fn tank_with_physical_ranges_accepted() {
        let b = tank_with(
            ParamDef::number(param::LEVEL, 0.0, 0.0, 100.0),
            ParamDef::number(param::VOLUME, 1.0, 0.5, 100.0),
        );
        assert!(b.build().is_ok());
    }

    #[test]
    fn mutate_kind_before_build() {
        let mut b = setup_builder();
        b.mutate_kind("pump", |k| k.params[0] = ParamDef::number(param::FLOW_RATE, 10.0, 0.0, 50.0))
            .unwrap();
        assert!(b.mutate_kind("nonexistent", |_| {}).is_err());
        let reg = b.build().unwrap();
        let pump = reg.kind_by_name("pump").unwrap();
        assert_eq!(
            pump.param(param::FLOW_RATE).unwrap().default_value(),
            ParamValue::Number(Fixed64::from_num(10))
        );
    }

    #[test]
    fn validate_clamps_numbers() {
        let def = ParamDef::number(param::OPENING, 100.0, 0.0, 100.0);
        let v = def.validate(ParamValue::Number(Fixed64::from_num(150))).unwrap();
        assert_eq!(v, ParamValue::Number(Fixed64::from_num(100)));
        let v = def.validate(ParamValue::Number(Fixed64::from_num(-5))).unwrap();
        assert_eq!(v, ParamValue::Number(Fixed64::ZERO));
    }

    #[test]
    fn validate_choices() {
        let def = ParamDef::choice("actuator", "manual", &["manual", "pneumatic"]);
        assert!(def.validate(ParamValue::Choice("pneumatic".into())).is_ok());
        assert!(matches!(
            def.validate(ParamValue::Choice("hydraulic".into())),
            Err(ParameterError::UnknownChoice { .. })
        ));
        assert!(matches!(
            def.validate(ParamValue::Number(Fixed64::ONE)),
            Err(ParameterError::TypeMismatch(_))
        ));
    }

    #[test]
    fn extreme_only_on_numbers() {
        let reg = setup_builder().build().unwrap();
        let pump = reg.kind_by_name("pump").unwrap();
        assert_eq!(
            pump.param(param::FLOW_RATE).unwrap().extreme(),
            Some(Fixed64::from_num(2000))
        );
        assert_eq!(pump.param(param::PRESSURE).unwrap().extreme(), None);
    }

    #[test]
    fn registry_get_nonexistent_returns_none() {
        let reg = setup_builder().build().unwrap();
        assert!(reg.get_kind(KindId(999)).is_none());
        assert!(reg.kind_id("nonexistent").is_none());
    }

    #[test]
    fn empty_registry_builds_successfully() {
        let reg = RegistryBuilder::new().build().unwrap();
        assert_eq!(reg.kind_count(), 0);
    }
}

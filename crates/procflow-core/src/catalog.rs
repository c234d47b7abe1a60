//! The built-in equipment catalog.
//!
//! Hosts that ship their own catalog load it through `procflow-data`; this
//! one covers every category with plausible teaching-scale defaults.

use crate::registry::*;

/// Kind names of the built-in catalog.
pub mod kinds {
    pub const CENTRIFUGAL_PUMP: &str = "centrifugal_pump";
    pub const GAS_COMPRESSOR: &str = "gas_compressor";
    pub const CONTROL_VALVE: &str = "control_valve";
    pub const CHECK_VALVE: &str = "check_valve";
    pub const STORAGE_TANK: &str = "storage_tank";
    pub const PRESSURE_VESSEL: &str = "pressure_vessel";
    pub const FIRED_HEATER: &str = "fired_heater";
    pub const AIR_COOLER: &str = "air_cooler";
    pub const SHELL_TUBE_EXCHANGER: &str = "shell_tube_exchanger";
    pub const DISTILLATION_COLUMN: &str = "distillation_column";
    pub const SEPARATOR: &str = "separator";
    pub const THREE_PHASE_SEPARATOR: &str = "three_phase_separator";
    pub const FILTER: &str = "filter";
    pub const MIXER: &str = "mixer";
    pub const SPLITTER: &str = "splitter";
}

fn inlet_outlet() -> Vec<PortDef> {
    vec![PortDef::sink("inlet"), PortDef::source("outlet")]
}

fn vessel_params(pressure: f64) -> Vec<ParamDef> {
    vec![
        ParamDef::number(param::LEVEL, 50.0, 0.0, 100.0),
        ParamDef::number(param::VOLUME, 50.0, 0.1, 10_000.0),
        ParamDef::number(param::TEMPERATURE, 25.0, -50.0, 400.0).with_extreme(650.0),
        ParamDef::number(param::PRESSURE, pressure, 0.0, 50.0),
    ]
}

/// Register every built-in kind into `b`.
pub fn register_standard(b: &mut RegistryBuilder) {
    b.register_kind(
        kinds::CENTRIFUGAL_PUMP,
        Category::Pump,
        vec![PortDef::sink("suction"), PortDef::source("discharge")],
        vec![
            ParamDef::number(param::FLOW_RATE, 100.0, 0.0, 1000.0).with_extreme(2500.0),
            ParamDef::number(param::PRESSURE, 5.0, 0.0, 100.0),
            ParamDef::choice("drive", "electric", &["electric", "steam_turbine"]),
        ],
    );
    b.register_kind(
        kinds::GAS_COMPRESSOR,
        Category::Compressor,
        vec![PortDef::sink("suction"), PortDef::source("discharge")],
        vec![
            ParamDef::number(param::FLOW_RATE, 50.0, 0.0, 500.0).with_extreme(1200.0),
            ParamDef::number(param::PRESSURE, 20.0, 0.0, 200.0),
        ],
    );
    b.register_kind(
        kinds::CONTROL_VALVE,
        Category::Valve(ValveStyle::Control),
        inlet_outlet(),
        vec![
            ParamDef::number(param::OPENING, 100.0, 0.0, 100.0),
            ParamDef::number(param::PRESSURE_DROP, 0.1, 0.0, 10.0),
            ParamDef::choice("actuator", "pneumatic", &["manual", "pneumatic", "electric"]),
        ],
    );
    b.register_kind(
        kinds::CHECK_VALVE,
        Category::Valve(ValveStyle::Check),
        inlet_outlet(),
        vec![
            ParamDef::number(param::CRACKING_PRESSURE, 0.05, 0.0, 10.0),
            ParamDef::number(param::PRESSURE_DROP, 0.05, 0.0, 10.0),
        ],
    );
    b.register_kind(
        kinds::STORAGE_TANK,
        Category::Tank,
        inlet_outlet(),
        vessel_params(1.0),
    );
    b.register_kind(
        kinds::PRESSURE_VESSEL,
        Category::Vessel,
        inlet_outlet(),
        vessel_params(10.0),
    );
    b.register_kind(
        kinds::FIRED_HEATER,
        Category::Furnace,
        inlet_outlet(),
        vec![
            ParamDef::number(param::OUTLET_TEMPERATURE, 350.0, 0.0, 1200.0).with_extreme(1500.0),
            ParamDef::choice("fuel", "gas", &["gas", "oil"]),
        ],
    );
    b.register_kind(
        kinds::AIR_COOLER,
        Category::Cooler,
        inlet_outlet(),
        vec![ParamDef::number(param::OUTLET_TEMPERATURE, 40.0, -50.0, 200.0).with_extreme(-120.0)],
    );
    b.register_kind(
        kinds::SHELL_TUBE_EXCHANGER,
        Category::HeatExchanger,
        vec![
            PortDef::sink(port::SHELL_IN),
            PortDef::source(port::SHELL_OUT),
            PortDef::sink(port::TUBE_IN),
            PortDef::source(port::TUBE_OUT),
        ],
        vec![
            ParamDef::number(param::HOT_OUTLET_TEMPERATURE, 80.0, -50.0, 500.0).with_extreme(700.0),
            ParamDef::number(param::COLD_OUTLET_TEMPERATURE, 60.0, -50.0, 500.0).with_extreme(700.0),
        ],
    );
    b.register_kind(
        kinds::DISTILLATION_COLUMN,
        Category::Column,
        vec![
            PortDef::sink(port::FEED),
            PortDef::source(port::TOP),
            PortDef::source(port::BOTTOM),
        ],
        vec![
            ParamDef::number(param::TOP_TEMPERATURE, 80.0, -50.0, 400.0).with_extreme(550.0),
            ParamDef::number(param::BOTTOM_TEMPERATURE, 180.0, -50.0, 450.0).with_extreme(600.0),
            ParamDef::number(param::PRESSURE, 2.0, 0.0, 50.0),
        ],
    );
    b.register_kind(
        kinds::SEPARATOR,
        Category::Separator(SeparatorStyle::Simple),
        inlet_outlet(),
        vec![],
    );
    b.register_kind(
        kinds::THREE_PHASE_SEPARATOR,
        Category::Separator(SeparatorStyle::ThreePhase),
        vec![
            PortDef::sink("inlet"),
            PortDef::source(port::GAS_OUT),
            PortDef::source(port::OIL_OUT),
            PortDef::source(port::WATER_OUT),
        ],
        vec![],
    );
    b.register_kind(kinds::FILTER, Category::PassThrough, inlet_outlet(), vec![]);
    b.register_kind(
        kinds::MIXER,
        Category::PassThrough,
        vec![
            PortDef::sink("inlet_a"),
            PortDef::sink("inlet_b"),
            PortDef::source("outlet"),
        ],
        vec![],
    );
    b.register_kind(
        kinds::SPLITTER,
        Category::PassThrough,
        vec![
            PortDef::sink("inlet"),
            PortDef::source("outlet_a"),
            PortDef::source("outlet_b"),
        ],
        vec![],
    );
}

impl Registry {
    /// The built-in catalog covering every equipment category.
    pub fn standard() -> Registry {
        let mut b = RegistryBuilder::new();
        register_standard(&mut b);
        match b.build() {
            Ok(registry) => registry,
            Err(e) => unreachable!("built-in catalog is invalid: {e}"),
        }
    }
}

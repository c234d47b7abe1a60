//! Per-category transfer functions.
//!
//! Each function maps the aggregated inbound values of one node (and its
//! own parameters) to outbound values. They are pure: the evaluator owns
//! aggregation, distribution onto pipes and write-back.

use crate::fixed::{Fixed64, div_or, percent};
use crate::id::PortIndex;
use crate::registry::{Category, PortClass, SeparatorStyle, ValveStyle, param, port};
use crate::topology::{Equipment, PipeReadings};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// `num / den` as a fixed-point constant. `den` must be nonzero.
fn ratio(num: i32, den: i32) -> Fixed64 {
    Fixed64::from_num(num) / Fixed64::from_num(den)
}

/// Temperature rise across a pump, in °C.
pub fn pump_temperature_rise() -> Fixed64 {
    ratio(1, 2)
}

/// Temperature rise across a compressor, in °C.
pub fn compressor_temperature_rise() -> Fixed64 {
    Fixed64::from_num(15)
}

/// Outlet-to-inlet pressure ratio of a furnace.
pub fn furnace_pressure_ratio() -> Fixed64 {
    ratio(95, 100)
}

/// Outlet-to-inlet pressure ratio of coolers, exchangers, simple
/// separators and generic pass-through equipment.
pub fn passthrough_pressure_ratio() -> Fixed64 {
    ratio(98, 100)
}

/// Share of column feed leaving through the top port.
pub fn column_top_fraction() -> Fixed64 {
    ratio(4, 10)
}

/// Share of column feed leaving through the bottom port.
pub fn column_bottom_fraction() -> Fixed64 {
    ratio(6, 10)
}

/// One named outlet of a three-phase separator.
struct Phase {
    port: &'static str,
    fraction: Fixed64,
    temp_delta: Fixed64,
    pressure_ratio: Fixed64,
}

fn three_phase_split() -> [Phase; 3] {
    [
        Phase {
            port: port::GAS_OUT,
            fraction: ratio(30, 100),
            temp_delta: Fixed64::from_num(2),
            pressure_ratio: ratio(95, 100),
        },
        Phase {
            port: port::OIL_OUT,
            fraction: ratio(40, 100),
            temp_delta: Fixed64::ZERO,
            pressure_ratio: ratio(90, 100),
        },
        Phase {
            port: port::WATER_OUT,
            fraction: ratio(30, 100),
            temp_delta: Fixed64::from_num(-1),
            pressure_ratio: ratio(90, 100),
        },
    ]
}

// ---------------------------------------------------------------------------
// Inflow / outflow
// ---------------------------------------------------------------------------

/// Aggregated inbound values of a node (or one side of a node).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inflow {
    /// Sum of inbound pipe flows.
    pub flow: Fixed64,
    /// Flow-weighted mean inbound temperature, or ambient with no flow.
    pub temperature: Fixed64,
    /// Highest inbound pipe pressure, zero with no inbound pipes.
    pub pressure: Fixed64,
}

impl Inflow {
    /// Aggregate a set of inbound pipe readings.
    pub fn aggregate<'a>(
        pipes: impl IntoIterator<Item = &'a PipeReadings>,
        ambient: Fixed64,
    ) -> Self {
        let mut flow = Fixed64::ZERO;
        let mut heat = Fixed64::ZERO;
        let mut pressure = Fixed64::ZERO;
        for r in pipes {
            flow = flow.saturating_add(r.flow);
            heat = heat.saturating_add(r.flow.saturating_mul(r.temperature));
            pressure = pressure.max(r.pressure);
        }
        let temperature = if flow == Fixed64::ZERO {
            ambient
        } else {
            div_or(heat, flow, ambient)
        };
        Self {
            flow,
            temperature,
            pressure,
        }
    }
}

/// Outbound values of a node or port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outflow {
    pub flow: Fixed64,
    pub pressure: Fixed64,
    pub temperature: Fixed64,
}

/// How a node's output is placed onto its outbound pipes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Flow divided evenly across every outbound pipe; each pipe carries
    /// the same pressure and temperature.
    Even(Outflow),
    /// Values assigned per source port. The port's pipe (if connected)
    /// carries the port's values unchanged.
    Ports(Vec<(PortIndex, Outflow)>),
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Output of a stopped node: no flow, no pressure, inbound temperature.
pub fn stopped(inflow: &Inflow) -> Transfer {
    Transfer::Even(Outflow {
        flow: Fixed64::ZERO,
        pressure: Fixed64::ZERO,
        temperature: inflow.temperature,
    })
}

/// Run the transfer function for a running node.
///
/// `side` aggregates the pipes entering one named sink port; only the heat
/// exchanger, whose two sides are independent, asks for it.
pub fn transfer<F>(eq: &Equipment, inflow: &Inflow, side: F) -> Transfer
where
    F: Fn(&str) -> Inflow,
{
    match eq.category {
        Category::Pump => Transfer::Even(source(eq, inflow, pump_temperature_rise())),
        Category::Compressor => {
            Transfer::Even(source(eq, inflow, compressor_temperature_rise()))
        }
        Category::Valve(ValveStyle::Control) => Transfer::Even(control_valve(eq, inflow)),
        Category::Valve(ValveStyle::Check) => Transfer::Even(check_valve(eq, inflow)),
        Category::Tank | Category::Vessel => Transfer::Even(vessel(eq, inflow)),
        Category::Furnace => Transfer::Even(heater(eq, inflow, furnace_pressure_ratio())),
        Category::Cooler => Transfer::Even(heater(eq, inflow, passthrough_pressure_ratio())),
        Category::HeatExchanger => heat_exchanger(eq, side),
        Category::Column => column(eq, inflow),
        Category::Separator(SeparatorStyle::ThreePhase) => three_phase_separator(eq, inflow),
        Category::Separator(SeparatorStyle::Simple) | Category::PassThrough => {
            Transfer::Even(pass_through(inflow))
        }
    }
}

// ---------------------------------------------------------------------------
// Transfer functions
// ---------------------------------------------------------------------------

/// Pumps and compressors: flow and pressure come from the setpoints,
/// regardless of what arrives.
pub fn source(eq: &Equipment, inflow: &Inflow, temp_rise: Fixed64) -> Outflow {
    Outflow {
        flow: eq.number(param::FLOW_RATE),
        pressure: eq.number(param::PRESSURE),
        temperature: inflow.temperature.saturating_add(temp_rise),
    }
}

/// Control valve: throttles flow by `opening` percent and drops pressure by
/// `pressure_drop` scaled up as the valve closes. A shut valve gives zero
/// pressure.
pub fn control_valve(eq: &Equipment, inflow: &Inflow) -> Outflow {
    let opening = eq.number(param::OPENING);
    let drop = eq.number(param::PRESSURE_DROP);
    let pressure = match Fixed64::from_num(100).checked_div(opening) {
        Some(scale) => inflow
            .pressure
            .saturating_sub(drop.saturating_mul(scale))
            .max(Fixed64::ZERO),
        None => Fixed64::ZERO,
    };
    Outflow {
        flow: inflow.flow.saturating_mul(percent(opening)),
        pressure,
        temperature: inflow.temperature,
    }
}

/// Check valve: all or nothing, depending on whether inbound pressure
/// exceeds the cracking pressure.
pub fn check_valve(eq: &Equipment, inflow: &Inflow) -> Outflow {
    let open = inflow.pressure > eq.number(param::CRACKING_PRESSURE);
    Outflow {
        flow: if open { inflow.flow } else { Fixed64::ZERO },
        pressure: inflow
            .pressure
            .saturating_sub(eq.number(param::PRESSURE_DROP))
            .max(Fixed64::ZERO),
        temperature: inflow.temperature,
    }
}

/// Tanks and vessels pass their inflow on while they hold any inventory;
/// outlet conditions are the vessel's own.
pub fn vessel(eq: &Equipment, inflow: &Inflow) -> Outflow {
    let holding = eq.number(param::LEVEL) > Fixed64::ZERO;
    Outflow {
        flow: if holding { inflow.flow } else { Fixed64::ZERO },
        pressure: eq.number(param::PRESSURE),
        temperature: eq.number(param::TEMPERATURE),
    }
}

/// Furnaces and coolers force the outlet temperature.
pub fn heater(eq: &Equipment, inflow: &Inflow, pressure_ratio: Fixed64) -> Outflow {
    Outflow {
        flow: inflow.flow,
        pressure: inflow.pressure.saturating_mul(pressure_ratio),
        temperature: eq.number(param::OUTLET_TEMPERATURE),
    }
}

/// Simple separators and generic equipment.
pub fn pass_through(inflow: &Inflow) -> Outflow {
    Outflow {
        flow: inflow.flow,
        pressure: inflow.pressure.saturating_mul(passthrough_pressure_ratio()),
        temperature: inflow.temperature,
    }
}

/// Two independent sides: shell (hot) and tube (cold).
pub fn heat_exchanger<F>(eq: &Equipment, side: F) -> Transfer
where
    F: Fn(&str) -> Inflow,
{
    let sides = [
        (port::SHELL_IN, port::SHELL_OUT, param::HOT_OUTLET_TEMPERATURE),
        (port::TUBE_IN, port::TUBE_OUT, param::COLD_OUTLET_TEMPERATURE),
    ];
    let mut out = Vec::with_capacity(2);
    for (inlet, outlet, temp_param) in sides {
        let Some(index) = eq.port_index(outlet) else {
            continue;
        };
        let inflow = side(inlet);
        out.push((
            index,
            Outflow {
                flow: inflow.flow,
                pressure: inflow.pressure.saturating_mul(passthrough_pressure_ratio()),
                temperature: eq.number(temp_param),
            },
        ));
    }
    Transfer::Ports(out)
}

/// Column: fixed top/bottom split at the column's own pressure.
pub fn column(eq: &Equipment, inflow: &Inflow) -> Transfer {
    let pressure = eq.number(param::PRESSURE);
    let draws = [
        (port::TOP, column_top_fraction(), param::TOP_TEMPERATURE),
        (port::BOTTOM, column_bottom_fraction(), param::BOTTOM_TEMPERATURE),
    ];
    let out = draws
        .into_iter()
        .filter_map(|(name, fraction, temp_param)| {
            eq.port_index(name).map(|index| {
                (
                    index,
                    Outflow {
                        flow: inflow.flow.saturating_mul(fraction),
                        pressure,
                        temperature: eq.number(temp_param),
                    },
                )
            })
        })
        .collect();
    Transfer::Ports(out)
}

/// Three-phase separator: fixed gas/oil/water shares. Any other connected
/// source ports share whatever the connected named outlets leave over.
pub fn three_phase_separator(eq: &Equipment, inflow: &Inflow) -> Transfer {
    let phases = three_phase_split();
    let mut out = Vec::new();
    let mut claimed = Fixed64::ZERO;

    for phase in &phases {
        let Some(index) = eq.port_index(phase.port) else {
            continue;
        };
        let connected = eq.port(index).is_some_and(|p| p.pipe.is_some());
        if connected {
            claimed = claimed.saturating_add(phase.fraction);
        }
        out.push((
            index,
            Outflow {
                flow: inflow.flow.saturating_mul(phase.fraction),
                pressure: inflow.pressure.saturating_mul(phase.pressure_ratio),
                temperature: inflow.temperature.saturating_add(phase.temp_delta),
            },
        ));
    }

    let others: Vec<PortIndex> = eq
        .ports()
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.class == PortClass::Source
                && p.pipe.is_some()
                && !phases.iter().any(|ph| ph.port == p.name)
        })
        .map(|(i, _)| PortIndex(i as u16))
        .collect();

    if !others.is_empty() {
        let remainder = (Fixed64::ONE - claimed).max(Fixed64::ZERO);
        let share = div_or(
            inflow.flow.saturating_mul(remainder),
            Fixed64::from_num(others.len()),
            Fixed64::ZERO,
        );
        let pressure = inflow.pressure.saturating_mul(passthrough_pressure_ratio());
        out.extend(others.into_iter().map(|index| {
            (
                index,
                Outflow {
                    flow: share,
                    pressure,
                    temperature: inflow.temperature,
                },
            )
        }));
    }
    Transfer::Ports(out)
}

// ---------------------------------------------------------------------------
// Level integration
// ---------------------------------------------------------------------------

/// Integrate a vessel level (percent) over `dt` seconds.
///
/// `level + (flow_in - flow_out) / volume * dt * 100`, clamped to
/// `[0, 100]`. A non-positive volume freezes the level.
pub fn integrate_level(
    level: Fixed64,
    flow_in: Fixed64,
    flow_out: Fixed64,
    volume: Fixed64,
    dt: Fixed64,
) -> Fixed64 {
    let hundred = Fixed64::from_num(100);
    if volume <= Fixed64::ZERO {
        return level.clamp(Fixed64::ZERO, hundred);
    }
    let net = flow_in.saturating_sub(flow_out);
    let delta = net
        .checked_div(volume)
        .map(|rate| rate.saturating_mul(dt).saturating_mul(hundred))
        .unwrap_or(Fixed64::ZERO);
    level.saturating_add(delta).clamp(Fixed64::ZERO, hundred)
}

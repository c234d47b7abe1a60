//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::catalog::kinds;
use crate::engine::Engine;
use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::id::*;
use crate::registry::{ParamValue, param};

// ===========================================================================
// Value helpers
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

pub fn number(v: f64) -> ParamValue {
    ParamValue::Number(fixed(v))
}

/// Absolute difference within `tolerance`.
pub fn approx(a: Fixed64, b: Fixed64, tolerance: f64) -> bool {
    a.saturating_sub(b).saturating_abs() <= fixed(tolerance)
}

// ===========================================================================
// Engine helpers
// ===========================================================================

/// Place an instance of `kind` with catalog defaults.
pub fn place(engine: &mut Engine, kind: &str) -> EquipmentId {
    engine.add_equipment(kind, vec![]).unwrap()
}

/// Place an instance of `kind` with numeric overrides.
pub fn place_with(engine: &mut Engine, kind: &str, params: &[(&str, f64)]) -> EquipmentId {
    let params = params
        .iter()
        .map(|(name, v)| (name.to_string(), number(*v)))
        .collect();
    engine.add_equipment(kind, params).unwrap()
}

/// Connect `from`'s port to `to`'s port with no medium label.
pub fn pipe(
    engine: &mut Engine,
    from: EquipmentId,
    from_port: &str,
    to: EquipmentId,
    to_port: &str,
) -> PipeId {
    engine.add_pipe(from, from_port, to, to_port, None).unwrap()
}

/// Current flow on a pipe, zero if it does not exist.
pub fn pipe_flow(engine: &Engine, id: PipeId) -> Fixed64 {
    engine.pipe_readings(id).map(|r| r.flow).unwrap_or_default()
}

// ===========================================================================
// Plant builders (for benchmarks, integration tests, and proptests)
// ===========================================================================

/// The ids of a pump -> control valve -> tank line.
#[derive(Debug, Clone, Copy)]
pub struct PumpValveTank {
    pub pump: EquipmentId,
    pub valve: EquipmentId,
    pub tank: EquipmentId,
    pub feed: PipeId,
    pub drain: PipeId,
}

/// Pump at `flow` m³/h through a valve at `opening` % into a storage tank.
pub fn pump_valve_tank(engine: &mut Engine, flow: f64, opening: f64) -> PumpValveTank {
    let pump = place_with(engine, kinds::CENTRIFUGAL_PUMP, &[(param::FLOW_RATE, flow)]);
    let valve = place_with(engine, kinds::CONTROL_VALVE, &[(param::OPENING, opening)]);
    let tank = place(engine, kinds::STORAGE_TANK);
    let feed = pipe(engine, pump, "discharge", valve, "inlet");
    let drain = pipe(engine, valve, "outlet", tank, "inlet");
    PumpValveTank {
        pump,
        valve,
        tank,
        feed,
        drain,
    }
}

/// Build `count` independent pump -> valve -> filter -> tank lines.
pub fn build_parallel_lines(count: usize) -> Engine {
    let mut engine = Engine::standard();
    for _ in 0..count {
        let line = pump_valve_tank(&mut engine, 100.0, 75.0);
        let filter = place(&mut engine, kinds::FILTER);
        engine.remove_pipe(line.drain).unwrap();
        pipe(&mut engine, line.valve, "outlet", filter, "inlet");
        pipe(&mut engine, filter, "outlet", line.tank, "inlet");
    }
    engine
}

/// Build a linear chain: one pump feeding `length` filters in series.
/// Deep graph with one node per topological level.
pub fn build_chain_plant(length: usize) -> Engine {
    let mut engine = Engine::standard();
    let mut prev = place(&mut engine, kinds::CENTRIFUGAL_PUMP);
    let mut port = "discharge";
    for _ in 0..length {
        let filter = place(&mut engine, kinds::FILTER);
        pipe(&mut engine, prev, port, filter, "inlet");
        prev = filter;
        port = "outlet";
    }
    engine
}

/// Build a recycle loop: pump -> mixer -> splitter, with the splitter's
/// second outlet fed back into the mixer.
pub fn build_recycle_loop() -> (Engine, EquipmentId, EquipmentId, EquipmentId) {
    let mut engine = Engine::standard();
    let pump = place(&mut engine, kinds::CENTRIFUGAL_PUMP);
    let mixer = place(&mut engine, kinds::MIXER);
    let splitter = place(&mut engine, kinds::SPLITTER);
    pipe(&mut engine, pump, "discharge", mixer, "inlet_a");
    pipe(&mut engine, mixer, "outlet", splitter, "inlet");
    pipe(&mut engine, splitter, "outlet_b", mixer, "inlet_b");
    (engine, pump, mixer, splitter)
}

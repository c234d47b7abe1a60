//! The tick: faults, two evaluation passes over the flow graph, branch
//! propagation and vessel level integration.
//!
//! Two passes are a bounded approximation. An acyclic graph is fully
//! settled after the first pass; the second lets values travel once around
//! a cycle (or through a branch into an earlier node). Nothing iterates to
//! convergence.

use crate::fault::FaultTable;
use crate::fixed::{Fixed64, div_or};
use crate::graph::FlowGraph;
use crate::id::*;
use crate::registry::param;
use crate::topology::{EquipmentReadings, PipeReadings, PipeSource, Topology};
use crate::transfer::{self, Inflow, Outflow, Transfer};

/// Full passes over the evaluation order per tick.
pub const PASSES_PER_TICK: usize = 2;

/// What changed during a tick that the engine reports as events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Vessels whose level reached 100 % this tick.
    pub vessels_full: Vec<EquipmentId>,
    /// Vessels whose level reached 0 % this tick.
    pub vessels_empty: Vec<EquipmentId>,
}

/// Run one tick of `dt` seconds.
///
/// `graph` must have been built from the current `topology` revision.
pub fn tick(
    graph: &FlowGraph,
    topology: &mut Topology,
    faults: &FaultTable,
    dt: Fixed64,
    ambient: Fixed64,
) -> TickReport {
    faults.apply(topology);

    for _ in 0..PASSES_PER_TICK {
        sync_branches(topology);
        for &id in graph.order() {
            evaluate_node(graph, topology, id, ambient);
        }
    }
    sync_branches(topology);

    let report = integrate_levels(graph, topology, dt);
    tracing::trace!(
        nodes = graph.node_count(),
        pipes = topology.pipe_count(),
        "tick evaluated"
    );
    report
}

/// Copy every branch pipe's readings from its parent. Pipe order puts a
/// branch after its parent, so chained branches see fresh values.
pub fn sync_branches(topology: &mut Topology) {
    let order: Vec<PipeId> = topology.pipe_order().to_vec();
    for pid in order {
        let Some(PipeSource::Branch { parent, .. }) = topology.pipe(pid).map(|p| p.source) else {
            continue;
        };
        let Some(readings) = topology.pipe(parent).map(|p| p.readings) else {
            continue;
        };
        if let Some(pipe) = topology.pipe_mut(pid) {
            pipe.readings = readings;
        }
    }
}

fn inbound_readings<'a>(
    topology: &'a Topology,
    pipes: &'a [PipeId],
) -> impl Iterator<Item = &'a PipeReadings> + 'a {
    pipes
        .iter()
        .filter_map(|&pid| topology.pipe(pid).map(|p| &p.readings))
}

/// Evaluate one node and write its outputs onto its outbound pipes.
fn evaluate_node(graph: &FlowGraph, topology: &mut Topology, id: EquipmentId, ambient: Fixed64) {
    let inbound = graph.inbound(id);
    let outbound = graph.outbound(id);
    let inflow = Inflow::aggregate(inbound_readings(topology, inbound), ambient);

    let Some(eq) = topology.get(id) else {
        return;
    };
    let result = if eq.is_running() {
        let side = |port_name: &str| {
            let Some(index) = eq.port_index(port_name) else {
                return Inflow::aggregate(std::iter::empty(), ambient);
            };
            let on_port = inbound
                .iter()
                .filter_map(|&pid| topology.pipe(pid))
                .filter(|p| p.to_port == index)
                .map(|p| &p.readings);
            Inflow::aggregate(on_port, ambient)
        };
        transfer::transfer(eq, &inflow, side)
    } else {
        transfer::stopped(&inflow)
    };

    // Resolve the result to concrete pipe assignments before mutating.
    let mut assignments: Vec<(PipeId, Outflow)> = Vec::with_capacity(outbound.len());
    let summary = match result {
        Transfer::Even(out) => {
            let share = if outbound.is_empty() {
                Fixed64::ZERO
            } else {
                div_or(out.flow, Fixed64::from_num(outbound.len()), Fixed64::ZERO)
            };
            for &pid in outbound {
                assignments.push((pid, Outflow { flow: share, ..out }));
            }
            out
        }
        Transfer::Ports(ports) => {
            for (index, out) in &ports {
                if let Some(pid) = eq.port(*index).and_then(|slot| slot.pipe)
                    && outbound.contains(&pid)
                {
                    assignments.push((pid, *out));
                }
            }
            let as_readings: Vec<PipeReadings> = ports
                .iter()
                .map(|(_, o)| PipeReadings {
                    flow: o.flow,
                    temperature: o.temperature,
                    pressure: o.pressure,
                })
                .collect();
            let mixed = Inflow::aggregate(&as_readings, inflow.temperature);
            Outflow {
                flow: mixed.flow,
                pressure: mixed.pressure,
                temperature: mixed.temperature,
            }
        }
    };

    let placed = assignments
        .iter()
        .fold(Fixed64::ZERO, |acc, (_, o)| acc.saturating_add(o.flow));

    for (pid, out) in assignments {
        if let Some(pipe) = topology.pipe_mut(pid) {
            pipe.readings = PipeReadings {
                flow: out.flow,
                temperature: out.temperature,
                pressure: out.pressure,
            };
        }
    }
    if let Some(eq) = topology.get_mut(id) {
        eq.readings = EquipmentReadings {
            flow_in: inflow.flow,
            flow_out: placed,
            pressure_in: inflow.pressure,
            pressure_out: summary.pressure,
            temp_in: inflow.temperature,
            temp_out: summary.temperature,
        };
    }
}

/// Integrate accumulator levels from the final pass and report vessels
/// that just became full or empty.
fn integrate_levels(graph: &FlowGraph, topology: &mut Topology, dt: Fixed64) -> TickReport {
    let hundred = Fixed64::from_num(100);
    let mut report = TickReport::default();

    for &id in graph.order() {
        let Some(eq) = topology.get_mut(id) else {
            continue;
        };
        if !eq.category.is_accumulator() {
            continue;
        }
        let before = eq.number(param::LEVEL);
        let after = transfer::integrate_level(
            before,
            eq.readings.flow_in,
            eq.readings.flow_out,
            eq.number(param::VOLUME),
            dt,
        );
        eq.set_number(param::LEVEL, after);

        if after == hundred && before < hundred {
            report.vessels_full.push(id);
        } else if after == Fixed64::ZERO && before > Fixed64::ZERO {
            report.vessels_empty.push(id);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::kinds;
    use crate::fault::FaultKind;
    use crate::fixed::f64_to_fixed64;
    use crate::registry::{ParamValue, Registry};

    fn fx(v: f64) -> Fixed64 {
        f64_to_fixed64(v)
    }

    struct Plant {
        reg: Registry,
        topo: Topology,
        faults: FaultTable,
    }

    impl Plant {
        fn new() -> Self {
            Self {
                reg: Registry::standard(),
                topo: Topology::new(),
                faults: FaultTable::new(),
            }
        }

        fn place(&mut self, kind: &str, params: &[(&str, f64)]) -> EquipmentId {
            let kid = self.reg.kind_id(kind).unwrap();
            let overrides = params
                .iter()
                .map(|(n, v)| (n.to_string(), ParamValue::Number(fx(*v))))
                .collect();
            let id = self
                .topo
                .add_equipment(kid, self.reg.get_kind(kid).unwrap(), overrides)
                .unwrap();
            self.topo.get_mut(id).unwrap().running = true;
            id
        }

        fn pipe(&mut self, from: EquipmentId, fp: &str, to: EquipmentId, tp: &str) -> PipeId {
            self.topo.connect(from, fp, to, tp, None).unwrap()
        }

        fn tick(&mut self) -> TickReport {
            let graph = FlowGraph::build(&self.topo);
            tick(&graph, &mut self.topo, &self.faults, fx(0.2), fx(25.0))
        }

        fn flow(&self, pipe: PipeId) -> Fixed64 {
            self.topo.pipe(pipe).unwrap().readings().flow
        }
    }

    #[test]
    fn pump_valve_tank_scenario() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let valve = p.place(kinds::CONTROL_VALVE, &[(param::OPENING, 50.0)]);
        let tank = p.place(kinds::STORAGE_TANK, &[]);
        let a = p.pipe(pump, "discharge", valve, "inlet");
        let b = p.pipe(valve, "outlet", tank, "inlet");

        p.tick();
        assert_eq!(p.flow(a), fx(100.0));
        assert_eq!(p.flow(b), fx(50.0));
        let tank_r = *p.topo.get(tank).unwrap().readings();
        assert_eq!(tank_r.flow_in, fx(50.0));
        assert_eq!(tank_r.flow_out, Fixed64::ZERO);
        assert!(p.topo.get(tank).unwrap().number(param::LEVEL) > fx(50.0));
    }

    #[test]
    fn stopped_node_emits_no_flow() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let filter = p.place(kinds::FILTER, &[]);
        let a = p.pipe(pump, "discharge", filter, "inlet");
        p.topo.get_mut(pump).unwrap().running = false;

        p.tick();
        let r = p.topo.pipe(a).unwrap().readings();
        assert_eq!(r.flow, Fixed64::ZERO);
        assert_eq!(r.pressure, Fixed64::ZERO);
        assert_eq!(r.temperature, fx(25.0));
    }

    #[test]
    fn forced_stop_zeroes_outbound_on_next_tick() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let filter = p.place(kinds::FILTER, &[]);
        let a = p.pipe(pump, "discharge", filter, "inlet");
        p.tick();
        assert_eq!(p.flow(a), fx(100.0));

        let def = p.reg.kind_by_name(kinds::CENTRIFUGAL_PUMP).unwrap().clone();
        p.faults
            .inject(FaultKind::ForcedStop, pump, None, &def, &mut p.topo)
            .unwrap();
        p.topo.get_mut(pump).unwrap().running = true;
        p.tick();
        assert_eq!(p.flow(a), Fixed64::ZERO);
    }

    #[test]
    fn even_split_across_outbound_pipes() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let split = p.place(kinds::SPLITTER, &[]);
        let x = p.place(kinds::FILTER, &[]);
        let y = p.place(kinds::FILTER, &[]);
        p.pipe(pump, "discharge", split, "inlet");
        let a = p.pipe(split, "outlet_a", x, "inlet");
        let b = p.pipe(split, "outlet_b", y, "inlet");

        p.tick();
        assert_eq!(p.flow(a), fx(50.0));
        assert_eq!(p.flow(b), fx(50.0));
        assert_eq!(p.topo.get(split).unwrap().readings().flow_out, fx(100.0));
    }

    #[test]
    fn branch_copies_parent_after_tick() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let valve = p.place(kinds::CONTROL_VALVE, &[]);
        let filter = p.place(kinds::FILTER, &[]);
        let main = p.pipe(pump, "discharge", valve, "inlet");
        let branch = p
            .topo
            .connect_branch(main, fx(0.5), filter, "inlet", None)
            .unwrap();
        let tee = p
            .topo
            .connect_branch(branch, fx(0.1), valve, "inlet", None)
            .err();
        assert!(tee.is_some(), "valve inlet is already occupied");

        p.tick();
        assert_eq!(
            p.topo.pipe(branch).unwrap().readings(),
            p.topo.pipe(main).unwrap().readings()
        );
        assert_eq!(p.topo.get(filter).unwrap().readings().flow_in, fx(100.0));
    }

    #[test]
    fn heat_exchanger_routes_by_side() {
        let mut p = Plant::new();
        let hot = p.place(kinds::CENTRIFUGAL_PUMP, &[(param::FLOW_RATE, 20.0)]);
        let cold = p.place(kinds::CENTRIFUGAL_PUMP, &[(param::FLOW_RATE, 5.0)]);
        let hx = p.place(kinds::SHELL_TUBE_EXCHANGER, &[]);
        let sink_a = p.place(kinds::FILTER, &[]);
        let sink_b = p.place(kinds::FILTER, &[]);
        p.pipe(hot, "discharge", hx, "shell_in");
        p.pipe(cold, "discharge", hx, "tube_in");
        let shell = p.pipe(hx, "shell_out", sink_a, "inlet");
        let tube = p.pipe(hx, "tube_out", sink_b, "inlet");

        p.tick();
        assert_eq!(p.flow(shell), fx(20.0));
        assert_eq!(p.flow(tube), fx(5.0));
        assert_eq!(p.topo.pipe(shell).unwrap().readings().temperature, fx(80.0));
        assert_eq!(p.topo.pipe(tube).unwrap().readings().temperature, fx(60.0));
    }

    #[test]
    fn unconnected_column_outlet_is_not_placed() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let col = p.place(kinds::DISTILLATION_COLUMN, &[]);
        let sink = p.place(kinds::FILTER, &[]);
        p.pipe(pump, "discharge", col, "feed");
        let bottom = p.pipe(col, "bottom", sink, "inlet");

        p.tick();
        assert!((p.flow(bottom) - fx(60.0)).abs() < fx(1e-6));
        let r = p.topo.get(col).unwrap().readings();
        assert!((r.flow_out - fx(60.0)).abs() < fx(1e-6));
    }

    #[test]
    fn three_phase_remainder_goes_to_other_ports() {
        let mut b = crate::registry::RegistryBuilder::new();
        crate::catalog::register_standard(&mut b);
        b.mutate_kind(kinds::THREE_PHASE_SEPARATOR, |k| {
            k.ports.push(crate::registry::PortDef::source("sludge_out"))
        })
        .unwrap();
        let mut p = Plant::new();
        p.reg = b.build().unwrap();

        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let sep = p.place(kinds::THREE_PHASE_SEPARATOR, &[]);
        let gas_sink = p.place(kinds::FILTER, &[]);
        let sludge_sink = p.place(kinds::FILTER, &[]);
        p.pipe(pump, "discharge", sep, "inlet");
        let gas = p.pipe(sep, "gas_out", gas_sink, "inlet");
        let sludge = p.pipe(sep, "sludge_out", sludge_sink, "inlet");

        p.tick();
        assert!((p.flow(gas) - fx(30.0)).abs() < fx(1e-6));
        // Oil and water are unconnected, so sludge gets 1 - 0.3.
        assert!((p.flow(sludge) - fx(70.0)).abs() < fx(1e-6));
    }

    #[test]
    fn level_events_fire_on_transition_only() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[(param::FLOW_RATE, 1000.0)]);
        let tank = p.place(kinds::STORAGE_TANK, &[(param::LEVEL, 95.0)]);
        p.pipe(pump, "discharge", tank, "inlet");

        let first = p.tick();
        assert_eq!(first.vessels_full, vec![tank]);
        let second = p.tick();
        assert!(second.vessels_full.is_empty());
        assert_eq!(p.topo.get(tank).unwrap().number(param::LEVEL), fx(100.0));
    }

    #[test]
    fn idle_vessel_holds_level() {
        let mut p = Plant::new();
        let tank = p.place(kinds::STORAGE_TANK, &[(param::LEVEL, 1.0)]);
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let sink = p.place(kinds::FILTER, &[]);
        p.pipe(pump, "discharge", tank, "inlet");
        p.pipe(tank, "outlet", sink, "inlet");
        p.topo.get_mut(pump).unwrap().running = false;

        // Nothing flows in, so nothing flows out and the level holds.
        let report = p.tick();
        assert!(report.vessels_empty.is_empty());
        assert_eq!(p.topo.get(tank).unwrap().number(param::LEVEL), fx(1.0));
    }

    #[test]
    fn cycle_is_evaluated_approximately() {
        let mut p = Plant::new();
        let pump = p.place(kinds::CENTRIFUGAL_PUMP, &[]);
        let mix = p.place(kinds::MIXER, &[]);
        let split = p.place(kinds::SPLITTER, &[]);
        let out = p.place(kinds::FILTER, &[]);
        p.pipe(pump, "discharge", mix, "inlet_a");
        p.pipe(mix, "outlet", split, "inlet");
        let recycle = p.pipe(split, "outlet_a", mix, "inlet_b");
        let product = p.pipe(split, "outlet_b", out, "inlet");

        p.tick();
        // Approximate: the recycle has only travelled around once.
        assert!(p.flow(recycle) > Fixed64::ZERO);
        assert!(p.flow(product) > fx(50.0));
        let graph = FlowGraph::build(&p.topo);
        assert!(graph.has_cycles());
    }
}

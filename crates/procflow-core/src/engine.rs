//! The engine facade: owns the registry, topology, cached flow graph, fault
//! table, scheduler and event bus, and exposes the editor/renderer contract.
//!
//! # Architecture
//!
//! Every mutation and every tick goes through `&mut Engine`, so a tick can
//! never overlap another tick or an edit. Edits only bump the topology
//! revision; the cached [`FlowGraph`] is rebuilt lazily right before the
//! next tick.
//!
//! Each tick runs:
//! 1. **Graph** -- rebuild the flow graph if the topology changed
//! 2. **Faults** -- re-apply active fault overrides
//! 3. **Evaluate** -- two passes over the evaluation order, branch sync
//! 4. **Integrate** -- vessel levels; vessel events
//! 5. **Bookkeeping** -- tick counter, state hash, event delivery

use crate::event::{Event, EventBus, EventFilter, EventKind, ListenerPriority, PassiveListener};
use crate::evaluate;
use crate::fault::{Fault, FaultError, FaultKind, FaultTable};
use crate::fixed::{Fixed64, Ticks, f64_to_fixed64};
use crate::graph::FlowGraph;
use crate::id::*;
use crate::layout::{Layout, LayoutError, LayoutSource};
use crate::query::{self, EquipmentSnapshot, PipeSnapshot, PlantSnapshot};
use crate::registry::{ParamValue, ParameterError, Registry, RegistryError, param};
use crate::scheduler::{RunState, Scheduler, SchedulerError, StateHash};
use crate::topology::{EquipmentReadings, PipeReadings, Topology, TopologyError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine configuration. Missing fields take their defaults when loaded
/// from data files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one recurring tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// Temperature assigned to nodes with no inbound flow, in °C.
    pub ambient_temperature: f64,
    /// Upper bound on ticks run by a single `advance` call.
    pub max_ticks_per_advance: u32,
    /// Ring buffer capacity per event kind.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            ambient_temperature: 25.0,
            max_ticks_per_advance: 8,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Umbrella error for engine operations. Every failed operation leaves the
/// engine unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The process-flow propagation engine.
#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    config: EngineConfig,
    topology: Topology,
    /// Cached flow graph; stale whenever its revision lags the topology's.
    graph: FlowGraph,
    faults: FaultTable,
    scheduler: Scheduler,
    ambient: Fixed64,
    last_state_hash: u64,
    /// Typed event bus for engine events.
    pub event_bus: EventBus,
}

impl Engine {
    pub fn new(registry: Registry, config: EngineConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config.tick_interval(), config.max_ticks_per_advance),
            ambient: f64_to_fixed64(config.ambient_temperature),
            event_bus: EventBus::new(config.event_capacity),
            registry,
            config,
            topology: Topology::new(),
            graph: FlowGraph::default(),
            faults: FaultTable::new(),
            last_state_hash: 0,
        }
    }

    /// An engine over the built-in catalog with default configuration.
    pub fn standard() -> Self {
        Self::new(Registry::standard(), EngineConfig::default())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn faults(&self) -> &FaultTable {
        &self.faults
    }

    /// The flow graph for the current topology, rebuilding it if stale.
    pub fn graph(&mut self) -> &FlowGraph {
        self.ensure_graph();
        &self.graph
    }

    fn ensure_graph(&mut self) {
        if self.graph.is_stale(&self.topology) {
            self.graph = FlowGraph::build(&self.topology);
        }
    }

    fn tick_counter(&self) -> Ticks {
        self.scheduler.tick()
    }

    // -----------------------------------------------------------------------
    // Editor: topology
    // -----------------------------------------------------------------------

    /// Place an instance of `kind`. `params` override catalog defaults and
    /// are clamped to their ranges.
    pub fn add_equipment(
        &mut self,
        kind: &str,
        params: Vec<(String, ParamValue)>,
    ) -> Result<EquipmentId, EngineError> {
        let kind_id = self
            .registry
            .kind_id(kind)
            .ok_or_else(|| TopologyError::UnknownKind(kind.to_string()))?;
        let def = self
            .registry
            .get_kind(kind_id)
            .ok_or_else(|| TopologyError::UnknownKind(kind.to_string()))?;
        let id = self.topology.add_equipment(kind_id, def, params)?;
        tracing::debug!(?id, kind, "equipment added");
        self.event_bus.emit(Event::EquipmentAdded {
            equipment: id,
            kind: kind_id,
            tick: self.tick_counter(),
        });
        Ok(id)
    }

    /// Remove an instance together with its pipes, the branches hanging off
    /// them, and any faults on it.
    pub fn remove_equipment(&mut self, id: EquipmentId) -> Result<(), EngineError> {
        if !self.topology.contains_equipment(id) {
            return Err(TopologyError::EquipmentNotFound(id).into());
        }
        let tick = self.tick_counter();
        for fault in self.faults.remove_target(id) {
            self.event_bus.emit(Event::FaultCleared {
                fault,
                equipment: id,
                tick,
            });
        }
        let removed = self.topology.remove_equipment(id)?;
        for pipe in removed {
            self.event_bus.emit(Event::PipeRemoved { pipe, tick });
        }
        self.event_bus.emit(Event::EquipmentRemoved { equipment: id, tick });
        tracing::debug!(?id, "equipment removed");
        Ok(())
    }

    /// Connect a source port to a sink port.
    pub fn add_pipe(
        &mut self,
        from: EquipmentId,
        from_port: &str,
        to: EquipmentId,
        to_port: &str,
        medium: Option<String>,
    ) -> Result<PipeId, EngineError> {
        let pipe = self
            .topology
            .connect(from, from_port, to, to_port, medium)
            .inspect_err(|e| tracing::debug!(error = %e, "pipe rejected"))?;
        self.event_bus.emit(Event::PipeAdded {
            pipe,
            to,
            tick: self.tick_counter(),
        });
        Ok(pipe)
    }

    /// Tee a branch pipe off `parent` at `position` in `[0, 1]`.
    pub fn add_branch_pipe(
        &mut self,
        parent: PipeId,
        position: Fixed64,
        to: EquipmentId,
        to_port: &str,
        medium: Option<String>,
    ) -> Result<PipeId, EngineError> {
        let pipe = self
            .topology
            .connect_branch(parent, position, to, to_port, medium)
            .inspect_err(|e| tracing::debug!(error = %e, "branch pipe rejected"))?;
        self.event_bus.emit(Event::PipeAdded {
            pipe,
            to,
            tick: self.tick_counter(),
        });
        Ok(pipe)
    }

    /// Remove a pipe and every branch teed off it.
    pub fn remove_pipe(&mut self, id: PipeId) -> Result<(), EngineError> {
        let removed = self.topology.remove_pipe(id)?;
        let tick = self.tick_counter();
        for pipe in removed {
            self.event_bus.emit(Event::PipeRemoved { pipe, tick });
        }
        Ok(())
    }

    pub fn set_tag(&mut self, id: EquipmentId, tag: impl Into<String>) -> Result<(), EngineError> {
        let eq = self
            .topology
            .get_mut(id)
            .ok_or(TopologyError::EquipmentNotFound(id))?;
        eq.tag = tag.into();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Editor: parameters and running flags
    // -----------------------------------------------------------------------

    /// Validate `value` against the schema of parameter `name` on `id`.
    fn validated(
        &self,
        id: EquipmentId,
        name: &str,
        value: ParamValue,
    ) -> Result<ParamValue, EngineError> {
        let eq = self
            .topology
            .get(id)
            .ok_or(TopologyError::EquipmentNotFound(id))?;
        let def = self
            .registry
            .get_kind(eq.kind)
            .ok_or_else(|| RegistryError::NotFound(format!("{:?}", eq.kind)))?;
        let schema = def.param(name).ok_or_else(|| ParameterError::Unknown {
            kind: def.name.clone(),
            name: name.to_string(),
        })?;
        Ok(schema.validate(value)?)
    }

    /// Set a parameter. Numbers are clamped to the catalogued range.
    /// Rejected while a fault holds the parameter.
    pub fn set_parameter(
        &mut self,
        id: EquipmentId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), EngineError> {
        let value = self.validated(id, name, value)?;
        if self.faults.holding(id, name).next().is_some() {
            tracing::debug!(?id, name, "parameter write rejected: pinned by fault");
            return Err(ParameterError::Pinned(name.to_string()).into());
        }
        if let Some(eq) = self.topology.get_mut(id) {
            eq.params.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Set a parameter, clearing any fault that holds it first.
    pub fn force_parameter(
        &mut self,
        id: EquipmentId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), EngineError> {
        let value = self.validated(id, name, value)?;
        let holding: Vec<FaultId> = self.faults.holding(id, name).collect();
        for fault in holding {
            self.clear_fault(fault)?;
        }
        if let Some(eq) = self.topology.get_mut(id) {
            eq.params.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Set an instance's running flag. Turning it on is rejected while a
    /// forced stop holds it or the scheduler is halted.
    pub fn set_running(&mut self, id: EquipmentId, running: bool) -> Result<(), EngineError> {
        if !self.topology.contains_equipment(id) {
            return Err(TopologyError::EquipmentNotFound(id).into());
        }
        if running {
            if self.scheduler.state() == RunState::Halted {
                return Err(SchedulerError::Halted.into());
            }
            if self.faults.is_forced_stopped(id) {
                tracing::debug!(?id, "restart rejected: forced stop active");
                return Err(FaultError::ForcedStop(id).into());
            }
        }
        self.write_running(id, running);
        Ok(())
    }

    /// Write a running flag, letting a forced stop keep the instance off
    /// while remembering the request for when the fault clears.
    fn write_running(&mut self, id: EquipmentId, running: bool) {
        if self.faults.is_forced_stopped(id) {
            self.faults.note_running(id, running);
            return;
        }
        if let Some(eq) = self.topology.get_mut(id) {
            eq.running = running;
        }
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Stopped -> Running: turn every instance on and run one tick at once.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if !self.scheduler.start()? {
            return Ok(());
        }
        self.ensure_graph();
        let ids: Vec<EquipmentId> = self.topology.placement_order().to_vec();
        for id in ids {
            self.write_running(id, true);
        }
        self.event_bus.emit(Event::SchedulerStarted {
            tick: self.tick_counter(),
        });
        self.run_tick();
        Ok(())
    }

    /// Running -> Stopped: cancel the recurring tick and zero all readings.
    /// Running flags are kept.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.scheduler.stop()? {
            self.topology.reset_readings();
            self.event_bus.emit(Event::SchedulerStopped {
                tick: self.tick_counter(),
            });
            self.event_bus.deliver();
        }
        Ok(())
    }

    /// Running -> Halted: cancel the recurring tick and force every
    /// instance off until [`reset_emergency_stop`](Self::reset_emergency_stop).
    pub fn emergency_stop(&mut self) -> Result<(), EngineError> {
        self.scheduler.emergency_stop()?;
        let ids: Vec<EquipmentId> = self.topology.placement_order().to_vec();
        for id in ids {
            self.write_running(id, false);
        }
        self.event_bus.emit(Event::EmergencyStop {
            tick: self.tick_counter(),
        });
        self.event_bus.deliver();
        Ok(())
    }

    /// Halted -> Stopped.
    pub fn reset_emergency_stop(&mut self) -> Result<(), EngineError> {
        Ok(self.scheduler.reset_emergency_stop()?)
    }

    /// Run one tick outside the recurring timer.
    pub fn step(&mut self) -> Result<(), EngineError> {
        self.scheduler.check_step()?;
        self.run_tick();
        Ok(())
    }

    /// Feed elapsed time to the recurring timer and run the ticks that are
    /// due. Returns the number of ticks run.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        let due = self.scheduler.accumulate(elapsed);
        for _ in 0..due {
            self.run_tick();
        }
        due
    }

    fn run_tick(&mut self) {
        self.ensure_graph();
        let report = evaluate::tick(
            &self.graph,
            &mut self.topology,
            &self.faults,
            self.scheduler.dt(),
            self.ambient,
        );
        self.scheduler.record_tick();

        let tick = self.tick_counter();
        for equipment in report.vessels_full {
            self.event_bus.emit(Event::VesselFull { equipment, tick });
        }
        for equipment in report.vessels_empty {
            self.event_bus.emit(Event::VesselEmpty { equipment, tick });
        }
        self.last_state_hash = self.compute_state_hash();
        self.event_bus.deliver();
    }

    pub fn state(&self) -> RunState {
        self.scheduler.state()
    }

    /// Ticks executed so far, manual steps included.
    pub fn tick(&self) -> Ticks {
        self.scheduler.tick()
    }

    /// Simulated time covered by executed ticks.
    pub fn elapsed(&self) -> Duration {
        self.scheduler.elapsed()
    }

    // -----------------------------------------------------------------------
    // Faults
    // -----------------------------------------------------------------------

    /// Inject a fault. Injecting one that is already active returns the
    /// existing id.
    pub fn inject_fault(
        &mut self,
        kind: FaultKind,
        target: EquipmentId,
        parameter: Option<&str>,
    ) -> Result<FaultId, EngineError> {
        let eq = self
            .topology
            .get(target)
            .ok_or(TopologyError::EquipmentNotFound(target))?;
        let def = self
            .registry
            .get_kind(eq.kind)
            .ok_or_else(|| RegistryError::NotFound(format!("{:?}", eq.kind)))?;
        let before = self.faults.len();
        let id = self
            .faults
            .inject(kind, target, parameter, def, &mut self.topology)?;
        if self.faults.len() > before {
            self.event_bus.emit(Event::FaultInjected {
                fault: id,
                equipment: target,
                kind,
                tick: self.tick_counter(),
            });
        }
        Ok(id)
    }

    /// Clear a fault, restoring what it overrode.
    pub fn clear_fault(&mut self, id: FaultId) -> Result<(), EngineError> {
        let fault = self.faults.clear(id, &mut self.topology)?;
        self.event_bus.emit(Event::FaultCleared {
            fault: id,
            equipment: fault.target,
            tick: self.tick_counter(),
        });
        Ok(())
    }

    /// The first active fault on `id`, if any.
    pub fn is_faulted(&self, id: EquipmentId) -> Option<&Fault> {
        self.faults.first_on(id)
    }

    pub fn faults_on(&self, id: EquipmentId) -> impl Iterator<Item = (FaultId, &Fault)> {
        self.faults.faults_on(id)
    }

    // -----------------------------------------------------------------------
    // Renderer queries
    // -----------------------------------------------------------------------

    pub fn equipment_readings(&self, id: EquipmentId) -> Option<EquipmentReadings> {
        self.topology.get(id).map(|e| *e.readings())
    }

    pub fn pipe_readings(&self, id: PipeId) -> Option<PipeReadings> {
        self.topology.pipe(id).map(|p| *p.readings())
    }

    /// Level in percent, for tanks and vessels.
    pub fn level(&self, id: EquipmentId) -> Option<Fixed64> {
        self.topology
            .get(id)
            .filter(|e| e.category.is_accumulator())
            .map(|e| e.number(param::LEVEL))
    }

    pub fn snapshot_equipment(&self, id: EquipmentId) -> Option<EquipmentSnapshot> {
        query::equipment_snapshot(&self.topology, &self.faults, id)
    }

    pub fn snapshot_pipe(&self, id: PipeId) -> Option<PipeSnapshot> {
        query::pipe_snapshot(&self.topology, id)
    }

    pub fn snapshot_all(&self) -> PlantSnapshot {
        query::plant_snapshot(&self.topology, &self.faults, self.tick(), self.state())
    }

    pub fn equipment_count(&self) -> usize {
        self.topology.equipment_count()
    }

    pub fn pipe_count(&self) -> usize {
        self.topology.pipe_count()
    }

    // -----------------------------------------------------------------------
    // State hash
    // -----------------------------------------------------------------------

    /// Hash from the most recent tick. Zero before the first tick.
    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    fn compute_state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.tick());
        for (_, eq) in self.topology.equipment() {
            let r = eq.readings();
            h.write_bool(eq.is_running());
            for v in [
                r.flow_in,
                r.flow_out,
                r.pressure_in,
                r.pressure_out,
                r.temp_in,
                r.temp_out,
            ] {
                h.write_fixed64(v);
            }
            if eq.category.is_accumulator() {
                h.write_fixed64(eq.number(param::LEVEL));
            }
        }
        for (_, pipe) in self.topology.pipes() {
            let r = pipe.readings();
            h.write_fixed64(r.flow);
            h.write_fixed64(r.temperature);
            h.write_fixed64(r.pressure);
        }
        h.finish()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn on(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on(kind, listener);
    }

    pub fn on_filtered(
        &mut self,
        kind: EventKind,
        priority: ListenerPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        self.event_bus.on_filtered(kind, priority, filter, listener);
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    /// Deliver buffered events now instead of at the end of the next tick.
    pub fn deliver_events(&mut self) {
        self.event_bus.deliver();
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Describe the current plant for the editor to store.
    pub fn export_layout(&self) -> Result<Layout, EngineError> {
        Ok(Layout::capture(&self.topology, &self.registry, &self.faults)?)
    }

    /// Build a stopped engine from a layout through the ordinary `add_*`
    /// calls.
    pub fn from_layout(
        registry: Registry,
        config: EngineConfig,
        layout: &Layout,
    ) -> Result<Self, EngineError> {
        layout.header.validate()?;
        layout.check_references()?;

        let mut engine = Self::new(registry, config);
        let mut equipment = Vec::with_capacity(layout.equipment.len());
        for item in &layout.equipment {
            let id = engine.add_equipment(&item.kind, item.params.clone())?;
            engine.set_tag(id, item.tag.clone())?;
            engine.write_running(id, item.running);
            equipment.push(id);
        }

        let mut pipes: Vec<PipeId> = Vec::with_capacity(layout.pipes.len());
        for (i, pipe) in layout.pipes.iter().enumerate() {
            let dangling = |what, index| LayoutError::DanglingReference {
                pipe: i,
                what,
                index,
            };
            let to = *equipment
                .get(pipe.to as usize)
                .ok_or_else(|| dangling("equipment", pipe.to))?;
            let id = match &pipe.source {
                LayoutSource::Port {
                    equipment: from,
                    port,
                } => {
                    let from = *equipment
                        .get(*from as usize)
                        .ok_or_else(|| dangling("equipment", *from))?;
                    engine.add_pipe(from, port, to, &pipe.to_port, pipe.medium.clone())?
                }
                LayoutSource::Branch { parent, position } => {
                    let parent_id = *pipes
                        .get(*parent as usize)
                        .ok_or_else(|| dangling("pipe", *parent))?;
                    engine.add_branch_pipe(
                        parent_id,
                        *position,
                        to,
                        &pipe.to_port,
                        pipe.medium.clone(),
                    )?
                }
            };
            pipes.push(id);
        }

        // Loading is not an edit the host needs to hear about.
        engine.event_bus.clear_all();
        tracing::debug!(
            equipment = equipment.len(),
            pipes = pipes.len(),
            "engine rebuilt from layout"
        );
        Ok(engine)
    }

    /// Decode a binary layout and build an engine from it.
    pub fn from_layout_bytes(
        registry: Registry,
        config: EngineConfig,
        data: &[u8],
    ) -> Result<Self, EngineError> {
        let layout = Layout::decode(data)?;
        Self::from_layout(registry, config, &layout)
    }
}

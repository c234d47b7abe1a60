//! The topology store: placed equipment instances and the pipes between
//! them, kept in slot-map arenas with stable ids.
//!
//! Every mutation is validated before anything changes, so a rejected call
//! leaves the store untouched. Port occupancy is tracked on the instance
//! itself: each port slot holds the id of the one pipe attached to it.

use crate::fixed::Fixed64;
use crate::id::*;
use crate::registry::{Category, EquipmentKindDef, ParamValue, ParameterError, PortClass};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Topology-integrity errors. All of them are raised before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("unknown equipment kind '{0}'")]
    UnknownKind(String),
    #[error("equipment not found: {0:?}")]
    EquipmentNotFound(EquipmentId),
    #[error("pipe not found: {0:?}")]
    PipeNotFound(PipeId),
    #[error("equipment {equipment:?} has no port '{port}'")]
    UnknownPort { equipment: EquipmentId, port: String },
    #[error("port '{port}' on {equipment:?} is already connected by {pipe:?}")]
    PortOccupied {
        equipment: EquipmentId,
        port: String,
        pipe: PipeId,
    },
    #[error("port '{port}' cannot be used here: expected a {expected:?} port")]
    WrongPortClass { port: String, expected: PortClass },
    #[error("a pipe cannot connect {0:?} to itself")]
    SelfConnection(EquipmentId),
    #[error("branch position {0} is outside [0, 1]")]
    InvalidBranchPosition(Fixed64),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

// ---------------------------------------------------------------------------
// Computed records
// ---------------------------------------------------------------------------

/// Per-tick values computed for an equipment instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentReadings {
    pub flow_in: Fixed64,
    pub flow_out: Fixed64,
    pub pressure_in: Fixed64,
    pub pressure_out: Fixed64,
    pub temp_in: Fixed64,
    pub temp_out: Fixed64,
}

/// Per-tick values computed for a pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeReadings {
    pub flow: Fixed64,
    pub temperature: Fixed64,
    pub pressure: Fixed64,
}

// ---------------------------------------------------------------------------
// Equipment
// ---------------------------------------------------------------------------

/// A port on a placed instance, with the pipe occupying it (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSlot {
    pub name: String,
    pub class: PortClass,
    pub pipe: Option<PipeId>,
}

/// A placed equipment instance.
#[derive(Debug, Clone)]
pub struct Equipment {
    /// The registry kind this instance was placed from.
    pub kind: KindId,
    /// Category copied from the kind, so the evaluator needs no registry.
    pub category: Category,
    /// Editor label.
    pub tag: String,
    pub(crate) params: BTreeMap<String, ParamValue>,
    pub(crate) running: bool,
    pub(crate) ports: Vec<PortSlot>,
    pub(crate) readings: EquipmentReadings,
}

impl Equipment {
    /// Whether the instance's running flag is set. Faults may force it off.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn readings(&self) -> &EquipmentReadings {
        &self.readings
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Numeric parameter value, or zero when absent or not numeric.
    pub fn number(&self, name: &str) -> Fixed64 {
        self.params
            .get(name)
            .and_then(ParamValue::as_number)
            .unwrap_or(Fixed64::ZERO)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn ports(&self) -> &[PortSlot] {
        &self.ports
    }

    pub fn port_index(&self, name: &str) -> Option<PortIndex> {
        self.ports
            .iter()
            .position(|p| p.name == name)
            .map(|i| PortIndex(i as u16))
    }

    pub fn port(&self, index: PortIndex) -> Option<&PortSlot> {
        self.ports.get(index.0 as usize)
    }

    pub(crate) fn set_number(&mut self, name: &str, value: Fixed64) {
        self.params.insert(name.to_string(), ParamValue::Number(value));
    }
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

/// Where a pipe draws its flow from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipeSource {
    /// A source port on an equipment instance.
    Port {
        equipment: EquipmentId,
        port: PortIndex,
    },
    /// A tee on an existing pipe at curve parameter `position` in [0, 1].
    /// Readings are copied from the parent each tick.
    Branch { parent: PipeId, position: Fixed64 },
}

/// A pipe connection ending at a sink port.
#[derive(Debug, Clone)]
pub struct Pipe {
    pub source: PipeSource,
    pub to: EquipmentId,
    pub to_port: PortIndex,
    pub medium: Option<String>,
    pub(crate) readings: PipeReadings,
    pub(crate) branches: Vec<PipeId>,
}

impl Pipe {
    pub fn readings(&self) -> &PipeReadings {
        &self.readings
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.source, PipeSource::Branch { .. })
    }

    /// The upstream equipment, for port-sourced pipes.
    pub fn from_equipment(&self) -> Option<EquipmentId> {
        match self.source {
            PipeSource::Port { equipment, .. } => Some(equipment),
            PipeSource::Branch { .. } => None,
        }
    }

    /// Branch pipes teed off this pipe.
    pub fn branches(&self) -> &[PipeId] {
        &self.branches
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// The live collection of equipment instances and pipe connections.
///
/// Arena iteration order is slot order, which is not insertion order once
/// ids are recycled; `placement_order` and `pipe_order` keep insertion order
/// for deterministic graph building and branch propagation.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    equipment: SlotMap<EquipmentId, Equipment>,
    pipes: SlotMap<PipeId, Pipe>,
    placement_order: Vec<EquipmentId>,
    pipe_order: Vec<PipeId>,
    /// Bumped on every structural change (add/remove of equipment or pipe).
    revision: u64,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Equipment
    // -----------------------------------------------------------------------

    /// Place an instance of `def`. `overrides` replace catalog defaults and
    /// are validated (and clamped) against the kind's parameter schema.
    pub fn add_equipment(
        &mut self,
        kind: KindId,
        def: &EquipmentKindDef,
        overrides: Vec<(String, ParamValue)>,
    ) -> Result<EquipmentId, TopologyError> {
        let mut params: BTreeMap<String, ParamValue> = def.default_params().into_iter().collect();
        for (name, value) in overrides {
            let schema = def.param(&name).ok_or_else(|| ParameterError::Unknown {
                kind: def.name.clone(),
                name: name.clone(),
            })?;
            params.insert(name, schema.validate(value)?);
        }

        let ports = def
            .ports
            .iter()
            .map(|p| PortSlot {
                name: p.name.clone(),
                class: p.class,
                pipe: None,
            })
            .collect();

        let id = self.equipment.insert(Equipment {
            kind,
            category: def.category,
            tag: String::new(),
            params,
            running: false,
            ports,
            readings: EquipmentReadings::default(),
        });
        self.placement_order.push(id);
        self.revision += 1;
        Ok(id)
    }

    /// Remove an instance and every pipe touching it (plus branches teed off
    /// those pipes). Returns the removed pipe ids.
    pub fn remove_equipment(&mut self, id: EquipmentId) -> Result<Vec<PipeId>, TopologyError> {
        let attached: Vec<PipeId> = self
            .equipment
            .get(id)
            .ok_or(TopologyError::EquipmentNotFound(id))?
            .ports
            .iter()
            .filter_map(|p| p.pipe)
            .collect();

        let mut removed = Vec::new();
        for pipe in attached {
            if self.pipes.contains_key(pipe) {
                self.remove_pipe_inner(pipe, &mut removed);
            }
        }

        self.equipment.remove(id);
        self.placement_order.retain(|&e| e != id);
        self.revision += 1;
        Ok(removed)
    }

    pub fn get(&self, id: EquipmentId) -> Option<&Equipment> {
        self.equipment.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: EquipmentId) -> Option<&mut Equipment> {
        self.equipment.get_mut(id)
    }

    pub fn contains_equipment(&self, id: EquipmentId) -> bool {
        self.equipment.contains_key(id)
    }

    pub fn equipment_count(&self) -> usize {
        self.equipment.len()
    }

    /// Equipment ids in placement order.
    pub fn placement_order(&self) -> &[EquipmentId] {
        &self.placement_order
    }

    /// Iterate over instances in placement order.
    pub fn equipment(&self) -> impl Iterator<Item = (EquipmentId, &Equipment)> {
        self.placement_order
            .iter()
            .filter_map(|&id| self.equipment.get(id).map(|e| (id, e)))
    }

    pub(crate) fn equipment_mut(&mut self) -> impl Iterator<Item = (EquipmentId, &mut Equipment)> {
        self.equipment.iter_mut()
    }

    // -----------------------------------------------------------------------
    // Pipes
    // -----------------------------------------------------------------------

    /// Connect source port `from_port` of `from` to sink port `to_port` of `to`.
    pub fn connect(
        &mut self,
        from: EquipmentId,
        from_port: &str,
        to: EquipmentId,
        to_port: &str,
        medium: Option<String>,
    ) -> Result<PipeId, TopologyError> {
        if from == to {
            return Err(TopologyError::SelfConnection(from));
        }
        let src_index = self.free_port(from, from_port, PortClass::Source)?;
        let dst_index = self.free_port(to, to_port, PortClass::Sink)?;

        let pipe = self.pipes.insert(Pipe {
            source: PipeSource::Port {
                equipment: from,
                port: src_index,
            },
            to,
            to_port: dst_index,
            medium,
            readings: PipeReadings::default(),
            branches: Vec::new(),
        });
        self.occupy(from, src_index, Some(pipe));
        self.occupy(to, dst_index, Some(pipe));
        self.pipe_order.push(pipe);
        self.revision += 1;
        Ok(pipe)
    }

    /// Tee a new pipe off `parent` at `position` into sink port `to_port` of `to`.
    pub fn connect_branch(
        &mut self,
        parent: PipeId,
        position: Fixed64,
        to: EquipmentId,
        to_port: &str,
        medium: Option<String>,
    ) -> Result<PipeId, TopologyError> {
        if !self.pipes.contains_key(parent) {
            return Err(TopologyError::PipeNotFound(parent));
        }
        if position < Fixed64::ZERO || position > Fixed64::ONE {
            return Err(TopologyError::InvalidBranchPosition(position));
        }
        if self.root_equipment(parent) == Some(to) {
            return Err(TopologyError::SelfConnection(to));
        }
        let dst_index = self.free_port(to, to_port, PortClass::Sink)?;

        let pipe = self.pipes.insert(Pipe {
            source: PipeSource::Branch { parent, position },
            to,
            to_port: dst_index,
            medium,
            readings: PipeReadings::default(),
            branches: Vec::new(),
        });
        if let Some(p) = self.pipes.get_mut(parent) {
            p.branches.push(pipe);
        }
        self.occupy(to, dst_index, Some(pipe));
        self.pipe_order.push(pipe);
        self.revision += 1;
        Ok(pipe)
    }

    /// Remove a pipe and, recursively, every branch teed off it. Returns the
    /// removed pipe ids (the pipe itself first).
    pub fn remove_pipe(&mut self, id: PipeId) -> Result<Vec<PipeId>, TopologyError> {
        if !self.pipes.contains_key(id) {
            return Err(TopologyError::PipeNotFound(id));
        }
        let mut removed = Vec::new();
        self.remove_pipe_inner(id, &mut removed);
        Ok(removed)
    }

    fn remove_pipe_inner(&mut self, id: PipeId, removed: &mut Vec<PipeId>) {
        let Some(pipe) = self.pipes.remove(id) else {
            return;
        };
        removed.push(id);

        match pipe.source {
            PipeSource::Port { equipment, port } => self.occupy(equipment, port, None),
            PipeSource::Branch { parent, .. } => {
                if let Some(p) = self.pipes.get_mut(parent) {
                    p.branches.retain(|&b| b != id);
                }
            }
        }
        self.occupy(pipe.to, pipe.to_port, None);
        self.pipe_order.retain(|&p| p != id);
        self.revision += 1;

        for branch in pipe.branches {
            self.remove_pipe_inner(branch, removed);
        }
    }

    pub fn pipe(&self, id: PipeId) -> Option<&Pipe> {
        self.pipes.get(id)
    }

    pub(crate) fn pipe_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
        self.pipes.get_mut(id)
    }

    pub fn contains_pipe(&self, id: PipeId) -> bool {
        self.pipes.contains_key(id)
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    /// Pipe ids in insertion order. A branch always follows its parent.
    pub fn pipe_order(&self) -> &[PipeId] {
        &self.pipe_order
    }

    /// Iterate over pipes in insertion order.
    pub fn pipes(&self) -> impl Iterator<Item = (PipeId, &Pipe)> {
        self.pipe_order
            .iter()
            .filter_map(|&id| self.pipes.get(id).map(|p| (id, p)))
    }

    /// Follow branch parents up to the equipment that feeds the pipe tree.
    pub fn root_equipment(&self, mut id: PipeId) -> Option<EquipmentId> {
        loop {
            match self.pipes.get(id)?.source {
                PipeSource::Port { equipment, .. } => return Some(equipment),
                PipeSource::Branch { parent, .. } => id = parent,
            }
        }
    }

    /// Structural revision counter; changes whenever the cached graph must
    /// be rebuilt.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Zero every computed record.
    pub(crate) fn reset_readings(&mut self) {
        for (_, e) in self.equipment.iter_mut() {
            e.readings = EquipmentReadings::default();
        }
        for (_, p) in self.pipes.iter_mut() {
            p.readings = PipeReadings::default();
        }
    }

    // -----------------------------------------------------------------------
    // Port helpers
    // -----------------------------------------------------------------------

    /// Resolve a port by name and check it is free and of `class`.
    fn free_port(
        &self,
        equipment: EquipmentId,
        name: &str,
        class: PortClass,
    ) -> Result<PortIndex, TopologyError> {
        let eq = self
            .equipment
            .get(equipment)
            .ok_or(TopologyError::EquipmentNotFound(equipment))?;
        let index = eq
            .port_index(name)
            .ok_or_else(|| TopologyError::UnknownPort {
                equipment,
                port: name.to_string(),
            })?;
        let slot = &eq.ports[index.0 as usize];
        if slot.class != class {
            return Err(TopologyError::WrongPortClass {
                port: name.to_string(),
                expected: class,
            });
        }
        if let Some(pipe) = slot.pipe {
            return Err(TopologyError::PortOccupied {
                equipment,
                port: name.to_string(),
                pipe,
            });
        }
        Ok(index)
    }

    fn occupy(&mut self, equipment: EquipmentId, port: PortIndex, pipe: Option<PipeId>) {
        if let Some(slot) = self
            .equipment
            .get_mut(equipment)
            .and_then(|e| e.ports.get_mut(port.0 as usize))
        {
            slot.pipe = pipe;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::kinds;
    use crate::registry::{Registry, param};

    fn place(topo: &mut Topology, reg: &Registry, kind: &str) -> EquipmentId {
        let id = reg.kind_id(kind).unwrap();
        topo.add_equipment(id, reg.get_kind(id).unwrap(), vec![]).unwrap()
    }

    fn pump_valve_tank() -> (Topology, [EquipmentId; 3]) {
        let reg = Registry::standard();
        let mut topo = Topology::new();
        let pump = place(&mut topo, &reg, kinds::CENTRIFUGAL_PUMP);
        let valve = place(&mut topo, &reg, kinds::CONTROL_VALVE);
        let tank = place(&mut topo, &reg, kinds::STORAGE_TANK);
        (topo, [pump, valve, tank])
    }

    #[test]
    fn add_equipment_uses_catalog_defaults() {
        let (topo, [pump, ..]) = pump_valve_tank();
        let eq = topo.get(pump).unwrap();
        assert_eq!(eq.number(param::FLOW_RATE), Fixed64::from_num(100));
        assert!(!eq.is_running());
        assert_eq!(eq.ports().len(), 2);
    }

    #[test]
    fn overrides_are_validated_and_clamped() {
        let reg = Registry::standard();
        let mut topo = Topology::new();
        let kind = reg.kind_id(kinds::CONTROL_VALVE).unwrap();
        let def = reg.get_kind(kind).unwrap();

        let id = topo
            .add_equipment(
                kind,
                def,
                vec![(param::OPENING.to_string(), ParamValue::Number(Fixed64::from_num(180)))],
            )
            .unwrap();
        assert_eq!(topo.get(id).unwrap().number(param::OPENING), Fixed64::from_num(100));

        let err = topo
            .add_equipment(
                kind,
                def,
                vec![("bogus".to_string(), ParamValue::Number(Fixed64::ONE))],
            )
            .unwrap_err();
        assert!(matches!(err, TopologyError::Parameter(ParameterError::Unknown { .. })));
        assert_eq!(topo.equipment_count(), 1);
    }

    #[test]
    fn connect_occupies_both_ports() {
        let (mut topo, [pump, valve, _]) = pump_valve_tank();
        let pipe = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        let p = topo.get(pump).unwrap();
        assert_eq!(p.ports()[1].pipe, Some(pipe));
        let v = topo.get(valve).unwrap();
        assert_eq!(v.ports()[0].pipe, Some(pipe));
        assert_eq!(topo.pipe(pipe).unwrap().from_equipment(), Some(pump));
    }

    #[test]
    fn occupied_port_rejected_without_change() {
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        let rev = topo.revision();
        let err = topo.connect(pump, "discharge", tank, "inlet", None).unwrap_err();
        assert!(matches!(err, TopologyError::PortOccupied { .. }));
        assert_eq!(topo.pipe_count(), 1);
        assert_eq!(topo.revision(), rev);
        assert_eq!(topo.get(tank).unwrap().ports()[0].pipe, None);
    }

    #[test]
    fn incompatible_port_classes_rejected() {
        let (mut topo, [pump, valve, _]) = pump_valve_tank();
        let err = topo.connect(pump, "suction", valve, "inlet", None).unwrap_err();
        assert_eq!(
            err,
            TopologyError::WrongPortClass {
                port: "suction".into(),
                expected: PortClass::Source
            }
        );
        let err = topo.connect(pump, "discharge", valve, "outlet", None).unwrap_err();
        assert!(matches!(err, TopologyError::WrongPortClass { expected: PortClass::Sink, .. }));
        assert_eq!(topo.pipe_count(), 0);
    }

    #[test]
    fn self_connection_rejected() {
        let (mut topo, [_, valve, _]) = pump_valve_tank();
        let err = topo.connect(valve, "outlet", valve, "inlet", None).unwrap_err();
        assert_eq!(err, TopologyError::SelfConnection(valve));
    }

    #[test]
    fn unknown_port_rejected() {
        let (mut topo, [pump, valve, _]) = pump_valve_tank();
        let err = topo.connect(pump, "nozzle", valve, "inlet", None).unwrap_err();
        assert!(matches!(err, TopologyError::UnknownPort { .. }));
    }

    #[test]
    fn branch_pipe_tracks_parent() {
        let reg = Registry::standard();
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        let main = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        let filter = place(&mut topo, &reg, kinds::FILTER);
        let branch = topo
            .connect_branch(main, Fixed64::from_num(0.5), filter, "inlet", Some("water".into()))
            .unwrap();

        assert!(topo.pipe(branch).unwrap().is_branch());
        assert_eq!(topo.pipe(main).unwrap().branches(), &[branch]);
        assert_eq!(topo.root_equipment(branch), Some(pump));
        assert_eq!(topo.pipe_order(), &[main, branch]);
        let _ = tank;
    }

    #[test]
    fn branch_validation() {
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        let main = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();

        let err = topo
            .connect_branch(main, Fixed64::from_num(1.5), tank, "inlet", None)
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidBranchPosition(_)));

        let err = topo
            .connect_branch(main, Fixed64::from_num(0.5), pump, "suction", None)
            .unwrap_err();
        assert_eq!(err, TopologyError::SelfConnection(pump));

        let err = topo
            .connect_branch(main, Fixed64::from_num(0.5), valve, "inlet", None)
            .unwrap_err();
        assert!(matches!(err, TopologyError::PortOccupied { .. }));

        assert_eq!(topo.pipe_count(), 1);
    }

    #[test]
    fn removing_pipe_cascades_to_branches() {
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        let main = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        let branch = topo
            .connect_branch(main, Fixed64::from_num(0.25), tank, "inlet", None)
            .unwrap();

        let removed = topo.remove_pipe(main).unwrap();
        assert_eq!(removed, vec![main, branch]);
        assert_eq!(topo.pipe_count(), 0);
        assert_eq!(topo.get(tank).unwrap().ports()[0].pipe, None);
        assert_eq!(topo.get(pump).unwrap().ports()[1].pipe, None);
    }

    #[test]
    fn removing_equipment_cascades_to_pipes() {
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        let a = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        let b = topo.connect(valve, "outlet", tank, "inlet", None).unwrap();

        let removed = topo.remove_equipment(valve).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&a) && removed.contains(&b));
        assert!(!topo.contains_equipment(valve));
        assert_eq!(topo.placement_order(), &[pump, tank]);
        assert_eq!(topo.get(pump).unwrap().ports()[1].pipe, None);
        assert_eq!(topo.get(tank).unwrap().ports()[0].pipe, None);
    }

    #[test]
    fn removing_missing_ids_fails() {
        let (mut topo, [pump, ..]) = pump_valve_tank();
        topo.remove_equipment(pump).unwrap();
        assert_eq!(
            topo.remove_equipment(pump).unwrap_err(),
            TopologyError::EquipmentNotFound(pump)
        );
    }

    #[test]
    fn freed_port_can_be_reconnected() {
        let (mut topo, [pump, valve, tank]) = pump_valve_tank();
        let a = topo.connect(pump, "discharge", valve, "inlet", None).unwrap();
        topo.remove_pipe(a).unwrap();
        assert!(topo.connect(pump, "discharge", tank, "inlet", None).is_ok());
    }
}

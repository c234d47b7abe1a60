//! Read-only query API for inspecting engine state.
//!
//! Provides snapshot types that copy topology and readings into convenient
//! views for rendering and UI. All types are owned copies, with no
//! references into internal engine storage.

use crate::fault::FaultTable;
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::registry::{Category, ParamValue, PortClass, param};
use crate::scheduler::RunState;
use crate::topology::{EquipmentReadings, PipeReadings, PipeSource, Topology};

// ---------------------------------------------------------------------------
// Equipment snapshot
// ---------------------------------------------------------------------------

/// A read-only view of a single equipment instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentSnapshot {
    pub id: EquipmentId,
    pub kind: KindId,
    pub category: Category,
    pub tag: String,
    pub running: bool,
    /// Whether any fault is active on the instance.
    pub faulted: bool,
    pub readings: EquipmentReadings,
    /// Current level in percent, for tanks and vessels.
    pub level: Option<Fixed64>,
    /// Parameters sorted by name.
    pub params: Vec<(String, ParamValue)>,
    /// Pipes attached to sink ports, in port order.
    pub inbound: Vec<PipeId>,
    /// Pipes attached to source ports, in port order.
    pub outbound: Vec<PipeId>,
}

/// Build a snapshot of one instance, or `None` if it does not exist.
pub fn equipment_snapshot(
    topology: &Topology,
    faults: &FaultTable,
    id: EquipmentId,
) -> Option<EquipmentSnapshot> {
    let eq = topology.get(id)?;
    let attached = |class: PortClass| -> Vec<PipeId> {
        eq.ports()
            .iter()
            .filter(|p| p.class == class)
            .filter_map(|p| p.pipe)
            .collect()
    };
    Some(EquipmentSnapshot {
        id,
        kind: eq.kind,
        category: eq.category,
        tag: eq.tag.clone(),
        running: eq.is_running(),
        faulted: faults.first_on(id).is_some(),
        readings: *eq.readings(),
        level: eq
            .category
            .is_accumulator()
            .then(|| eq.number(param::LEVEL)),
        params: eq
            .params()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        inbound: attached(PortClass::Sink),
        outbound: attached(PortClass::Source),
    })
}

// ---------------------------------------------------------------------------
// Pipe snapshot
// ---------------------------------------------------------------------------

/// A read-only view of a single pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSnapshot {
    pub id: PipeId,
    pub source: PipeSource,
    pub to: EquipmentId,
    /// Name of the destination port.
    pub to_port: String,
    pub medium: Option<String>,
    pub readings: PipeReadings,
}

impl PipeSnapshot {
    pub fn is_branch(&self) -> bool {
        matches!(self.source, PipeSource::Branch { .. })
    }
}

/// Build a snapshot of one pipe, or `None` if it does not exist.
pub fn pipe_snapshot(topology: &Topology, id: PipeId) -> Option<PipeSnapshot> {
    let pipe = topology.pipe(id)?;
    let to_port = topology
        .get(pipe.to)
        .and_then(|e| e.port(pipe.to_port))
        .map(|p| p.name.clone())
        .unwrap_or_default();
    Some(PipeSnapshot {
        id,
        source: pipe.source,
        to: pipe.to,
        to_port,
        medium: pipe.medium.clone(),
        readings: *pipe.readings(),
    })
}

// ---------------------------------------------------------------------------
// Plant snapshot
// ---------------------------------------------------------------------------

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantSnapshot {
    pub tick: Ticks,
    pub state: RunState,
    /// Instances in placement order.
    pub equipment: Vec<EquipmentSnapshot>,
    /// Pipes in insertion order.
    pub pipes: Vec<PipeSnapshot>,
}

pub fn plant_snapshot(
    topology: &Topology,
    faults: &FaultTable,
    tick: Ticks,
    state: RunState,
) -> PlantSnapshot {
    PlantSnapshot {
        tick,
        state,
        equipment: topology
            .placement_order()
            .iter()
            .filter_map(|&id| equipment_snapshot(topology, faults, id))
            .collect(),
        pipes: topology
            .pipe_order()
            .iter()
            .filter_map(|&id| pipe_snapshot(topology, id))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::kinds;
    use crate::registry::Registry;

    fn two_tanks() -> (Topology, EquipmentId, EquipmentId, PipeId) {
        let reg = Registry::standard();
        let mut topo = Topology::new();
        let kind = reg.kind_id(kinds::STORAGE_TANK).unwrap();
        let def = reg.get_kind(kind).unwrap();
        let a = topo.add_equipment(kind, def, vec![]).unwrap();
        let b = topo.add_equipment(kind, def, vec![]).unwrap();
        let pipe = topo
            .connect(a, "outlet", b, "inlet", Some("crude".into()))
            .unwrap();
        (topo, a, b, pipe)
    }

    #[test]
    fn equipment_snapshot_lists_attached_pipes() {
        let (topo, a, b, pipe) = two_tanks();
        let faults = FaultTable::new();
        let snap_a = equipment_snapshot(&topo, &faults, a).unwrap();
        assert_eq!(snap_a.outbound, vec![pipe]);
        assert!(snap_a.inbound.is_empty());
        assert_eq!(snap_a.level, Some(Fixed64::from_num(50)));
        assert!(!snap_a.faulted);

        let snap_b = equipment_snapshot(&topo, &faults, b).unwrap();
        assert_eq!(snap_b.inbound, vec![pipe]);
        assert_eq!(snap_b.category, Category::Tank);
    }

    #[test]
    fn pipe_snapshot_names_destination_port() {
        let (topo, _, b, pipe) = two_tanks();
        let snap = pipe_snapshot(&topo, pipe).unwrap();
        assert_eq!(snap.to, b);
        assert_eq!(snap.to_port, "inlet");
        assert_eq!(snap.medium.as_deref(), Some("crude"));
        assert!(!snap.is_branch());
    }

    #[test]
    fn plant_snapshot_follows_insertion_order() {
        let (topo, a, b, pipe) = two_tanks();
        let snap = plant_snapshot(&topo, &FaultTable::new(), 3, RunState::Stopped);
        let ids: Vec<EquipmentId> = snap.equipment.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(snap.pipes.len(), 1);
        assert_eq!(snap.pipes[0].id, pipe);
        assert_eq!(snap.tick, 3);
    }

    #[test]
    fn missing_ids_give_none() {
        let (mut topo, a, _, pipe) = two_tanks();
        topo.remove_equipment(a).unwrap();
        assert!(equipment_snapshot(&topo, &FaultTable::new(), a).is_none());
        assert!(pipe_snapshot(&topo, pipe).is_none());
    }
}

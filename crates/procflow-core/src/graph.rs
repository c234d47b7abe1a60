//! The flow graph: equipment as nodes, pipes as edges, and a cycle-tolerant
//! topological evaluation order.
//!
//! A [`FlowGraph`] is derived from a [`Topology`] and cached by the engine
//! until the topology's revision changes.

use crate::id::*;
use crate::topology::{PipeSource, Topology};
use slotmap::SecondaryMap;
use std::collections::VecDeque;

/// Adjacency lists for a single equipment node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NodeAdjacency {
    /// Pipes ending at this node, branch pipes included.
    inbound: Vec<PipeId>,
    /// Port-sourced pipes leaving this node.
    outbound: Vec<PipeId>,
}

/// Derived evaluation structure for one topology revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowGraph {
    order: Vec<EquipmentId>,
    adjacency: SecondaryMap<EquipmentId, NodeAdjacency>,
    cycle_members: Vec<EquipmentId>,
    revision: u64,
}

impl FlowGraph {
    /// Build the graph for `topology`. Pure and infallible; cycles are
    /// tolerated rather than rejected.
    ///
    /// Kahn's algorithm with in-degree counted from port-sourced pipes only.
    /// The queue is seeded with zero in-degree nodes in placement order.
    /// Whatever remains unvisited sits on or behind a cycle and is appended
    /// afterwards, again in placement order, and recorded as a cycle member.
    pub fn build(topology: &Topology) -> Self {
        let mut adjacency: SecondaryMap<EquipmentId, NodeAdjacency> = SecondaryMap::new();
        let mut in_degree: SecondaryMap<EquipmentId, usize> = SecondaryMap::new();
        for &id in topology.placement_order() {
            adjacency.insert(id, NodeAdjacency::default());
            in_degree.insert(id, 0);
        }

        for (pid, pipe) in topology.pipes() {
            if let Some(adj) = adjacency.get_mut(pipe.to) {
                adj.inbound.push(pid);
            }
            if let PipeSource::Port { equipment, .. } = pipe.source {
                if let Some(adj) = adjacency.get_mut(equipment) {
                    adj.outbound.push(pid);
                }
                if let Some(deg) = in_degree.get_mut(pipe.to) {
                    *deg += 1;
                }
            }
        }

        let mut queue: VecDeque<EquipmentId> = topology
            .placement_order()
            .iter()
            .copied()
            .filter(|id| in_degree.get(*id) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(topology.equipment_count());
        let mut visited: SecondaryMap<EquipmentId, ()> = SecondaryMap::new();

        while let Some(node) = queue.pop_front() {
            order.push(node);
            visited.insert(node, ());

            let Some(adj) = adjacency.get(node) else {
                continue;
            };
            for &pid in &adj.outbound {
                let Some(dest) = topology.pipe(pid).map(|p| p.to) else {
                    continue;
                };
                if let Some(deg) = in_degree.get_mut(dest) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dest);
                    }
                }
            }
        }

        let cycle_members: Vec<EquipmentId> = topology
            .placement_order()
            .iter()
            .copied()
            .filter(|id| !visited.contains_key(*id))
            .collect();
        order.extend_from_slice(&cycle_members);

        if !cycle_members.is_empty() {
            tracing::debug!(
                members = cycle_members.len(),
                "flow graph contains cycles; evaluating approximately"
            );
        }
        tracing::debug!(
            nodes = order.len(),
            revision = topology.revision(),
            "flow graph rebuilt"
        );

        Self {
            order,
            adjacency,
            cycle_members,
            revision: topology.revision(),
        }
    }

    /// Equipment ids in evaluation order.
    pub fn order(&self) -> &[EquipmentId] {
        &self.order
    }

    /// Pipes ending at `id`, in pipe insertion order. Includes branch pipes.
    pub fn inbound(&self, id: EquipmentId) -> &[PipeId] {
        self.adjacency
            .get(id)
            .map(|a| a.inbound.as_slice())
            .unwrap_or(&[])
    }

    /// Port-sourced pipes leaving `id`, in pipe insertion order.
    pub fn outbound(&self, id: EquipmentId) -> &[PipeId] {
        self.adjacency
            .get(id)
            .map(|a| a.outbound.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes appended after Kahn's pass because they sit on or downstream
    /// of a cycle.
    pub fn cycle_members(&self) -> &[EquipmentId] {
        &self.cycle_members
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycle_members.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// The topology revision this graph was built from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether this graph is out of date for `topology`.
    pub fn is_stale(&self, topology: &Topology) -> bool {
        self.revision != topology.revision()
    }
}

//! Fault/override layer: injected records that force equipment into
//! degraded states ahead of every tick.

use crate::fixed::Fixed64;
use crate::id::*;
use crate::registry::{EquipmentKindDef, ParamValue};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// The kinds of fault that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The instance is held stopped; it cannot be restarted while active.
    ForcedStop,
    /// A setpoint parameter is frozen at the value it held at injection.
    StuckSetpoint,
    /// An output-governing parameter is driven to its catalogued extreme,
    /// outside its normal range.
    ForcedExtremeOutput,
}

/// State captured at injection, put back when the fault clears.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Restore {
    Running(bool),
    Parameter(ParamValue),
}

/// An active fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub target: EquipmentId,
    pub kind: FaultKind,
    /// The affected parameter. `None` for forced stops.
    pub parameter: Option<String>,
    /// The value the parameter is held at. `None` for forced stops.
    pub pinned: Option<Fixed64>,
    restore: Restore,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("fault not found: {0:?}")]
    NotFound(FaultId),
    #[error("equipment not found: {0:?}")]
    EquipmentNotFound(EquipmentId),
    #[error("{kind:?} needs a parameter and the equipment has no default one")]
    NoParameter { kind: FaultKind },
    #[error("parameter '{0}' does not exist or is not numeric")]
    UnknownParameter(String),
    #[error("parameter '{0}' has no catalogued extreme value")]
    NoExtreme(String),
    #[error("{0:?} is held by a forced stop")]
    ForcedStop(EquipmentId),
}

/// All active faults, in injection order.
#[derive(Debug, Clone, Default)]
pub struct FaultTable {
    faults: SlotMap<FaultId, Fault>,
    order: Vec<FaultId>,
}

impl FaultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a fault and apply it immediately.
    ///
    /// `parameter` defaults to the category's setpoint parameter for stuck
    /// setpoints and to its output parameter for forced extremes.
    ///
    /// Re-injection is a no-op only when kind *and* parameter match: a fault
    /// of the same kind on the same parameter already on `target` is
    /// returned as is. The same kind on a different parameter is a separate
    /// fault, so one unit can carry several stuck setpoints at once.
    pub fn inject(
        &mut self,
        kind: FaultKind,
        target: EquipmentId,
        parameter: Option<&str>,
        def: &EquipmentKindDef,
        topology: &mut Topology,
    ) -> Result<FaultId, FaultError> {
        let eq = topology
            .get(target)
            .ok_or(FaultError::EquipmentNotFound(target))?;

        let parameter = match kind {
            FaultKind::ForcedStop => None,
            FaultKind::StuckSetpoint => Some(
                parameter
                    .or(eq.category.setpoint_param())
                    .ok_or(FaultError::NoParameter { kind })?,
            ),
            FaultKind::ForcedExtremeOutput => Some(
                parameter
                    .or(eq.category.output_param())
                    .ok_or(FaultError::NoParameter { kind })?,
            ),
        };

        if let Some(existing) = self.find(target, kind, parameter) {
            return Ok(existing);
        }

        let (restore, pinned) = match parameter {
            None => (Restore::Running(eq.running), None),
            Some(name) => {
                let current = eq
                    .param(name)
                    .filter(|v| v.as_number().is_some())
                    .cloned()
                    .ok_or_else(|| FaultError::UnknownParameter(name.to_string()))?;
                let pinned = if kind == FaultKind::ForcedExtremeOutput {
                    def.param(name)
                        .and_then(|p| p.extreme())
                        .ok_or_else(|| FaultError::NoExtreme(name.to_string()))?
                } else {
                    current.as_number().unwrap_or(Fixed64::ZERO)
                };
                // A parameter already held by another fault restores to
                // what that fault saved, not to the held value.
                let restore = self
                    .saved_parameter(target, name)
                    .cloned()
                    .unwrap_or(current);
                (Restore::Parameter(restore), Some(pinned))
            }
        };

        let fault = Fault {
            target,
            kind,
            parameter: parameter.map(str::to_string),
            pinned,
            restore,
        };
        Self::apply_one(&fault, topology);
        let id = self.faults.insert(fault);
        self.order.push(id);
        tracing::debug!(?kind, ?target, ?parameter, "fault injected");
        Ok(id)
    }

    /// Remove a fault and restore what it overrode.
    ///
    /// A forced stop restores the running flag. A parameter fault restores
    /// the saved value unless another active fault still holds the same
    /// parameter; in that case the remaining fault keeps it.
    pub fn clear(&mut self, id: FaultId, topology: &mut Topology) -> Result<Fault, FaultError> {
        let fault = self.faults.remove(id).ok_or(FaultError::NotFound(id))?;
        self.order.retain(|&f| f != id);

        match (&fault.restore, fault.parameter.as_deref()) {
            (Restore::Running(running), _) => {
                if let Some(eq) = topology.get_mut(fault.target) {
                    eq.running = *running;
                }
            }
            (Restore::Parameter(value), Some(name)) => {
                let still_held = self.holding(fault.target, name).next();
                match still_held {
                    Some(other) => {
                        if let Some(f) = self.faults.get(other) {
                            Self::apply_one(f, topology);
                        }
                    }
                    None => {
                        if let Some(eq) = topology.get_mut(fault.target) {
                            eq.params.insert(name.to_string(), value.clone());
                        }
                    }
                }
            }
            (Restore::Parameter(_), None) => {}
        }
        tracing::debug!(kind = ?fault.kind, target = ?fault.target, "fault cleared");
        Ok(fault)
    }

    /// Drop every fault on `target` without restoring anything. Used when
    /// the equipment itself is removed.
    pub fn remove_target(&mut self, target: EquipmentId) -> Vec<FaultId> {
        let ids: Vec<FaultId> = self.faults_on(target).map(|(id, _)| id).collect();
        for id in &ids {
            self.faults.remove(*id);
        }
        self.order.retain(|id| self.faults.contains_key(*id));
        ids
    }

    /// Re-apply every fault. Runs at the start of each tick.
    pub fn apply(&self, topology: &mut Topology) {
        for fault in self.order.iter().filter_map(|&id| self.faults.get(id)) {
            Self::apply_one(fault, topology);
        }
    }

    fn apply_one(fault: &Fault, topology: &mut Topology) {
        let Some(eq) = topology.get_mut(fault.target) else {
            return;
        };
        match (fault.kind, fault.parameter.as_deref(), fault.pinned) {
            (FaultKind::ForcedStop, _, _) => eq.running = false,
            (_, Some(name), Some(value)) => eq.set_number(name, value),
            _ => {}
        }
    }

    /// Record an editor write of the running flag on a forced-stopped
    /// instance, so clearing the fault restores the latest intent.
    pub fn note_running(&mut self, target: EquipmentId, running: bool) {
        for fault in self.faults.values_mut() {
            if fault.target == target && fault.kind == FaultKind::ForcedStop {
                fault.restore = Restore::Running(running);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: FaultId) -> Option<&Fault> {
        self.faults.get(id)
    }

    /// Faults on `target`, in injection order.
    pub fn faults_on(&self, target: EquipmentId) -> impl Iterator<Item = (FaultId, &Fault)> {
        self.order
            .iter()
            .filter_map(|&id| self.faults.get(id).map(|f| (id, f)))
            .filter(move |(_, f)| f.target == target)
    }

    /// The first active fault on `target`, if any.
    pub fn first_on(&self, target: EquipmentId) -> Option<&Fault> {
        self.faults_on(target).next().map(|(_, f)| f)
    }

    pub fn is_forced_stopped(&self, target: EquipmentId) -> bool {
        self.faults_on(target)
            .any(|(_, f)| f.kind == FaultKind::ForcedStop)
    }

    /// Faults currently holding parameter `name` on `target`.
    pub fn holding<'a>(
        &'a self,
        target: EquipmentId,
        name: &'a str,
    ) -> impl Iterator<Item = FaultId> + 'a {
        self.faults_on(target)
            .filter(move |(_, f)| f.parameter.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// The running flag a forced stop on `target` will restore.
    pub fn saved_running(&self, target: EquipmentId) -> Option<bool> {
        self.faults_on(target).find_map(|(_, f)| match f.restore {
            Restore::Running(r) => Some(r),
            Restore::Parameter(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FaultId, &Fault)> {
        self.order
            .iter()
            .filter_map(|&id| self.faults.get(id).map(|f| (id, f)))
    }

    fn find(&self, target: EquipmentId, kind: FaultKind, parameter: Option<&str>) -> Option<FaultId> {
        self.faults_on(target)
            .find(|(_, f)| f.kind == kind && f.parameter.as_deref() == parameter)
            .map(|(id, _)| id)
    }

    /// The value parameter `name` on `target` goes back to once every fault
    /// holding it clears.
    pub fn saved_parameter(&self, target: EquipmentId, name: &str) -> Option<&ParamValue> {
        self.faults_on(target)
            .filter(|(_, f)| f.parameter.as_deref() == Some(name))
            .find_map(|(_, f)| match &f.restore {
                Restore::Parameter(v) => Some(v),
                Restore::Running(_) => None,
            })
    }
}

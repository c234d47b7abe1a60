//! Layout export for editor persistence.
//!
//! A [`Layout`] is a self-contained description of a plant: every instance
//! (by kind name) and every pipe (by list position), with branch pipes
//! listed after their parents. The engine rebuilds itself from a layout
//! through its ordinary `add_*` calls, so a loaded layout obeys the same
//! validation as an edited one. The binary form is `bitcode` with a
//! magic + version header.

use crate::fault::FaultTable;
use crate::fixed::Fixed64;
use crate::id::*;
use crate::registry::{ParamValue, Registry};
use crate::topology::{PipeSource, Topology};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a procflow layout.
pub const LAYOUT_MAGIC: u32 = 0x5046_4C4F;

/// Current format version. Increment when breaking the wire format.
pub const LAYOUT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", LAYOUT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported layout version {0} (this build reads {LAYOUT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("pipe {pipe} refers to missing {what} {index}")]
    DanglingReference {
        pipe: usize,
        what: &'static str,
        index: u32,
    },
    #[error("unknown equipment kind id {0:?}")]
    UnknownKind(KindId),
}

// ---------------------------------------------------------------------------
// Layout types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutHeader {
    pub magic: u32,
    pub version: u32,
}

impl LayoutHeader {
    pub fn current() -> Self {
        Self {
            magic: LAYOUT_MAGIC,
            version: LAYOUT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.magic != LAYOUT_MAGIC {
            return Err(LayoutError::InvalidMagic(self.magic));
        }
        if self.version != LAYOUT_VERSION {
            return Err(LayoutError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// One placed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEquipment {
    pub kind: String,
    pub tag: String,
    pub params: Vec<(String, ParamValue)>,
    pub running: bool,
}

/// Where a layout pipe draws from. Indices point into the layout's own
/// `equipment` and `pipes` lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutSource {
    Port { equipment: u32, port: String },
    Branch { parent: u32, position: Fixed64 },
}

/// One pipe connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPipe {
    pub source: LayoutSource,
    pub to: u32,
    pub to_port: String,
    pub medium: Option<String>,
}

/// A complete plant description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub header: LayoutHeader,
    pub equipment: Vec<LayoutEquipment>,
    pub pipes: Vec<LayoutPipe>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            header: LayoutHeader::current(),
            equipment: Vec::new(),
            pipes: Vec::new(),
        }
    }
}

impl Layout {
    /// Capture `topology` as a layout. Fault overrides are not persisted:
    /// parameters and running flags are recorded as they will be once every
    /// active fault clears.
    pub fn capture(
        topology: &Topology,
        registry: &Registry,
        faults: &FaultTable,
    ) -> Result<Self, LayoutError> {
        let mut index_of: HashMap<EquipmentId, u32> = HashMap::new();
        let mut equipment = Vec::with_capacity(topology.equipment_count());

        for (id, eq) in topology.equipment() {
            let kind = registry
                .get_kind(eq.kind)
                .ok_or(LayoutError::UnknownKind(eq.kind))?;
            let params = eq
                .params()
                .map(|(name, value)| {
                    let value = faults.saved_parameter(id, name).unwrap_or(value);
                    (name.to_string(), value.clone())
                })
                .collect();
            index_of.insert(id, equipment.len() as u32);
            equipment.push(LayoutEquipment {
                kind: kind.name.clone(),
                tag: eq.tag.clone(),
                params,
                running: faults.saved_running(id).unwrap_or(eq.is_running()),
            });
        }

        let mut pipe_index: HashMap<PipeId, u32> = HashMap::new();
        let mut pipes = Vec::with_capacity(topology.pipe_count());
        for (pid, pipe) in topology.pipes() {
            let position = pipes.len();
            let source = match pipe.source {
                PipeSource::Port { equipment: from, port } => {
                    let port = topology
                        .get(from)
                        .and_then(|e| e.port(port))
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    LayoutSource::Port {
                        equipment: index_of.get(&from).copied().ok_or(
                            LayoutError::DanglingReference {
                                pipe: position,
                                what: "equipment",
                                index: u32::MAX,
                            },
                        )?,
                        port,
                    }
                }
                PipeSource::Branch { parent, position: at } => LayoutSource::Branch {
                    parent: pipe_index.get(&parent).copied().ok_or(
                        LayoutError::DanglingReference {
                            pipe: position,
                            what: "pipe",
                            index: u32::MAX,
                        },
                    )?,
                    position: at,
                },
            };
            let to_port = topology
                .get(pipe.to)
                .and_then(|e| e.port(pipe.to_port))
                .map(|p| p.name.clone())
                .unwrap_or_default();
            pipe_index.insert(pid, position as u32);
            pipes.push(LayoutPipe {
                source,
                to: index_of.get(&pipe.to).copied().ok_or(
                    LayoutError::DanglingReference {
                        pipe: position,
                        what: "equipment",
                        index: u32::MAX,
                    },
                )?,
                to_port,
                medium: pipe.medium.clone(),
            });
        }

        Ok(Self {
            header: LayoutHeader::current(),
            equipment,
            pipes,
        })
    }

    /// Check every index refers to an earlier entry, so the layout can be
    /// replayed front to back.
    pub fn check_references(&self) -> Result<(), LayoutError> {
        let n_eq = self.equipment.len() as u32;
        for (i, pipe) in self.pipes.iter().enumerate() {
            let dangling = |what, index| LayoutError::DanglingReference {
                pipe: i,
                what,
                index,
            };
            match &pipe.source {
                LayoutSource::Port { equipment, .. } if *equipment >= n_eq => {
                    return Err(dangling("equipment", *equipment));
                }
                LayoutSource::Branch { parent, .. } if *parent as usize >= i => {
                    return Err(dangling("pipe", *parent));
                }
                _ => {}
            }
            if pipe.to >= n_eq {
                return Err(dangling("equipment", pipe.to));
            }
        }
        Ok(())
    }

    /// Encode with a versioned header.
    pub fn encode(&self) -> Result<Vec<u8>, LayoutError> {
        bitcode::serialize(self).map_err(|e| LayoutError::Encode(e.to_string()))
    }

    /// Decode and validate the header and references.
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        let layout: Layout =
            bitcode::deserialize(data).map_err(|e| LayoutError::Decode(e.to_string()))?;
        layout.header.validate()?;
        layout.check_references()?;
        Ok(layout)
    }
}

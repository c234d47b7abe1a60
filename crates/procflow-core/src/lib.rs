//! Procflow Core -- the propagation engine behind process-plant diagrams.
//!
//! This crate holds the equipment catalog, the live topology of equipment
//! and pipes, the derived flow graph, per-category transfer functions, the
//! fault layer, the tick scheduler, typed events, renderer snapshots and
//! layout persistence. An editor drives it through [`engine::Engine`]; a
//! renderer reads snapshots back out.
//!
//! # Tick Pipeline
//!
//! Each tick (recurring via [`engine::Engine::advance`] or manual via
//! [`engine::Engine::step`]) runs:
//!
//! 1. **Graph** -- Rebuild the cached flow graph if the topology changed.
//! 2. **Faults** -- Re-apply active fault overrides.
//! 3. **Evaluate** -- Two passes over the evaluation order, so values fed
//!    back through a cycle propagate one hop; branch pipes copy their
//!    parent's readings between passes.
//! 4. **Integrate** -- Tank and vessel levels move by net flow.
//! 5. **Bookkeeping** -- Tick counter, state hash, event delivery.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- The facade: editor operations, scheduler control,
//!   faults, queries and layout export.
//! - [`registry::Registry`] -- Immutable catalog of equipment kinds.
//! - [`topology::Topology`] -- Equipment instances and pipe connections.
//! - [`graph::FlowGraph`] -- Cycle-tolerant evaluation order.
//! - [`fault::FaultTable`] -- Active faults and what they restore.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.
//! - [`layout::Layout`] -- Versioned binary plant description.

pub mod catalog;
pub mod engine;
pub mod evaluate;
pub mod event;
pub mod fault;
pub mod fixed;
pub mod graph;
pub mod id;
pub mod layout;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod topology;
pub mod transfer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

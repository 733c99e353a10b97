//! Deterministic per-tick ordering via `SystemSet` phases.
//!
//! Within one `FixedUpdate` tick the simulation follows a fixed contract:
//!
//! ```text
//! PreSim  →  Simulation  →  PostSim
//! ```
//!
//! * **PreSim** – clock accumulation, event-queue drain, pending
//!   tilemap-change resolution and the road-network rebuild it triggers.
//! * **Simulation** – entity state machines and car physics: tiles, traffic
//!   lights, routing, steering, traffic rules, integration.
//! * **PostSim** – spatial-index refresh and outbound action emission, so
//!   downstream consumers observe a consistent world.
//!
//! Plugins register their systems with `.in_set(SimulationSet::X)`; ordering
//! inside a phase is pinned with explicit `.chain()` / `.after()` where it
//! matters.

use bevy::prelude::*;

/// Ordered phases for systems running in the `FixedUpdate` schedule.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulationSet {
    /// Clock, scheduled events, debounced tilemap changes, network rebuild.
    PreSim,
    /// FSM updates and car movement.
    Simulation,
    /// Spatial-index refresh and reporting.
    PostSim,
}

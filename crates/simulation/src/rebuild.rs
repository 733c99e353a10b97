//! The tilemap-change pipeline: debounce expiry starts a solve, the solver
//! advances a bounded number of steps per tick, and a finished solve is
//! applied to the world — new tiles constructed, new lots announced, the
//! road network rebuilt with traffic-light identities preserved.

use bevy::prelude::*;
use rand::Rng as _;

use crate::app_state::AppState;
use crate::audio::PlayAudioEvent;
use crate::config::WFC_STEP_BUDGET_PER_FRAME;
use crate::event_queue::{PendingTilemapChange, TilemapChangedEvent};
use crate::lots::LotPlacedEvent;
use crate::road_network::RoadNetwork;
use crate::sim_rng::SimRng;
use crate::simulation_sets::SimulationSet;
use crate::tilemap::Tilemap;
use crate::tiles::{TileAction, TileKind};
use crate::tileset::Tileset;
use crate::traffic_lights::{snapshot_lights, TrafficLight};
use crate::wfc::{Solver, StopCondition};

/// The in-progress background solve, if any.
#[derive(Resource, Default)]
pub struct ActiveSolve {
    pub solver: Option<Solver>,
}

/// Fired when a solve run ends, successfully or not; triggers the network
/// rebuild either way.
#[derive(Event, Debug, Clone, Copy)]
pub struct SolveCompletedEvent {
    pub solved: bool,
}

/// Count down the debounce; on expiry, reset decoration and start a fresh
/// solve over the current fixed cells.
pub fn resolve_pending_change(
    time: Res<Time>,
    mut pending: ResMut<PendingTilemapChange>,
    mut tilemap: ResMut<Tilemap>,
    mut active: ResMut<ActiveSolve>,
    mut rng: ResMut<SimRng>,
    tileset: Res<Tileset>,
    mut changed_events: EventWriter<TilemapChangedEvent>,
) {
    let Some(cells) = pending.tick(time.delta_secs()) else {
        return;
    };
    changed_events.send(TilemapChangedEvent {
        cells: cells.iter().copied().collect(),
    });
    info!("tilemap changed ({} cells), starting solve", cells.len());

    tilemap.reset_decoration();
    let seed = rng.rng().gen::<u64>();
    active.solver = Some(Solver::new(&tilemap, &tileset, seed));
}

/// Advance the active solve by a bounded number of steps, and apply the
/// result once it terminates.
pub fn advance_active_solve(
    mut active: ResMut<ActiveSolve>,
    pending: Res<PendingTilemapChange>,
    mut tilemap: ResMut<Tilemap>,
    mut lot_events: EventWriter<LotPlacedEvent>,
    mut completed: EventWriter<SolveCompletedEvent>,
    mut audio: EventWriter<PlayAudioEvent>,
) {
    let Some(solver) = active.solver.as_mut() else {
        return;
    };
    solver.step_n(StopCondition::StopAtSolved, WFC_STEP_BUDGET_PER_FRAME);
    if !solver.stopped() {
        return;
    }

    let solver = active.solver.take().expect("checked above");
    // The map was edited again while this solve ran; its snapshot is
    // stale, and the queued change will trigger a fresh one.
    if pending.is_pending() {
        info!("discarding stale solve result");
        return;
    }
    if solver.failed() {
        warn!("tilemap solve failed: {}", solver.state_debug());
        completed.send(SolveCompletedEvent { solved: false });
        return;
    }

    // Commit the solver's cells into the live tilemap. Cells that only
    // changed their road id (anchor bits) are re-fixed in place; genuinely
    // new tiles run their construction animation.
    let dims = tilemap.dims();
    for cell in solver.changed_cells() {
        let kind = &solver.kinds()[dims.index(*cell)];
        let TileKind::Fixed { id, parent } = kind else {
            continue;
        };
        let old = tilemap.tile(*cell).kind.fixed_id();
        let same_road =
            old.is_some_and(|o| o.is_road() && id.is_road() && o.base_road() == id.base_road());
        if same_road {
            tilemap.refix_id(*cell, *id);
        } else {
            for action in tilemap.fix_tile(*cell, *id, *parent) {
                let TileAction::PlayAudio(sound) = action;
                audio.send(PlayAudioEvent::new(sound));
            }
        }
    }

    for placed in solver.placed_lots() {
        lot_events.send(LotPlacedEvent(*placed));
    }
    info!(
        "solve complete: {} cells committed, {} lots placed",
        solver.changed_cells().len(),
        solver.placed_lots().len()
    );
    completed.send(SolveCompletedEvent { solved: true });
}

/// Rebuild the road network after a completed solve: old lights are torn
/// down and respawned from the build's specs, which carry over the phase
/// of every surviving intersection.
pub fn rebuild_road_network(
    mut commands: Commands,
    mut completed: EventReader<SolveCompletedEvent>,
    tilemap: Res<Tilemap>,
    lights: Query<&TrafficLight>,
    light_entities: Query<Entity, With<TrafficLight>>,
    mut network: ResMut<RoadNetwork>,
) {
    if completed.is_empty() {
        return;
    }
    completed.clear();

    let existing = snapshot_lights(&lights);
    let generation = network.generation + 1;
    let (rebuilt, specs) = RoadNetwork::build(&tilemap, &existing, generation);

    for entity in &light_entities {
        commands.entity(entity).despawn();
    }
    for spec in &specs {
        commands.spawn(TrafficLight::from_spec(spec));
    }

    info!(
        "road network rebuilt: {} nodes, {} edges, {} lights (generation {})",
        rebuilt.nodes().len(),
        rebuilt.edge_count(),
        specs.len(),
        generation
    );
    *network = rebuilt;
}

pub struct RebuildPlugin;

impl Plugin for RebuildPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ActiveSolve>()
            .add_event::<SolveCompletedEvent>()
            .add_systems(
                FixedUpdate,
                (resolve_pending_change, advance_active_solve)
                    .chain()
                    .after(crate::editor::execute_editor_actions)
                    .in_set(SimulationSet::PreSim)
                    .run_if(in_state(AppState::Playing)),
            )
            .add_systems(
                FixedUpdate,
                rebuild_road_network
                    .after(crate::lots::remove_lots)
                    .in_set(SimulationSet::PreSim),
            );
    }
}

//! Headless traffic-mat simulation core.
//!
//! Three engines drive the world: the constraint-propagation tilemap
//! solver ([`wfc`]), the road-network builder ([`road_network`]), and the
//! per-tick traffic simulator ([`movement`], [`cars`]). Everything hangs
//! off [`SimulationPlugin`]; rendering, input, and audio playback are the
//! host's business.

use bevy::prelude::*;

pub mod app_state;
pub mod audio;
pub mod cars;
pub mod config;
pub mod editor;
pub mod event_queue;
pub mod fsm;
pub mod grid;
pub mod invariants;
pub mod lots;
pub mod movement;
pub mod rebuild;
pub mod road_network;
pub mod route;
pub mod sim_rng;
pub mod simulation_sets;
pub mod spatial_index;
pub mod splines;
pub mod test_harness;
pub mod tilemap;
pub mod tiles;
pub mod tileset;
pub mod traffic_lights;
pub mod wfc;
pub mod world_init;

#[cfg(test)]
mod integration_tests;

pub use app_state::AppState;
pub use simulation_sets::SimulationSet;

use crate::app_state::AppStatePlugin;
use crate::audio::PlayAudioEvent;
use crate::tilemap::Tilemap;
use crate::tiles::TileAction;

/// Global tick counter, incremented once per fixed update.
#[derive(Resource, Default)]
pub struct TickCounter(pub u64);

pub fn advance_tick_counter(mut counter: ResMut<TickCounter>) {
    counter.0 = counter.0.wrapping_add(1);
}

/// Advance every tile's lifecycle FSM and clear finished demolitions.
pub fn update_tiles(
    time: Res<Time>,
    mut tilemap: ResMut<Tilemap>,
    mut audio: EventWriter<PlayAudioEvent>,
) {
    for (_cell, action) in tilemap.update_tile_fsms(time.delta_secs()) {
        let TileAction::PlayAudio(sound) = action;
        audio.send(PlayAudioEvent::new(sound));
    }
    let freed = tilemap.sweep_removed();
    if !freed.is_empty() {
        debug!("{} demolished cells cleared", freed.len());
    }
}

pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Time::<Fixed>::from_seconds(
            config::PHYSICS_TIMESTEP as f64,
        ));
        app.configure_sets(
            FixedUpdate,
            (
                SimulationSet::PreSim,
                SimulationSet::Simulation,
                SimulationSet::PostSim,
            )
                .chain(),
        );

        app.init_resource::<TickCounter>()
            .init_resource::<world_init::WorldConfig>()
            .init_resource::<road_network::RoadNetwork>();

        app.add_plugins((
            AppStatePlugin,
            audio::AudioEventPlugin,
            event_queue::EventQueuePlugin,
            editor::EditorPlugin,
            rebuild::RebuildPlugin,
            lots::LotsPlugin,
            traffic_lights::TrafficLightPlugin,
            movement::MovementPlugin,
            cars::CarsPlugin,
            spatial_index::SpatialIndexPlugin,
        ));

        app.add_systems(Startup, world_init::init_world);
        app.add_systems(
            FixedUpdate,
            advance_tick_counter
                .in_set(SimulationSet::PreSim)
                .run_if(in_state(AppState::Playing)),
        );
        app.add_systems(
            FixedUpdate,
            update_tiles
                .before(traffic_lights::update_traffic_lights)
                .in_set(SimulationSet::Simulation)
                .run_if(in_state(AppState::Playing)),
        );
    }
}

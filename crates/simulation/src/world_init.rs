//! World construction: configuration, startup resources, and the demo
//! layout.

use bevy::prelude::*;

use crate::config::{DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH};
use crate::editor::EditorAction;
use crate::event_queue::PendingTilemapChange;
use crate::grid::TilemapDims;
use crate::sim_rng::{SimRng, DEFAULT_SEED};
use crate::tilemap::Tilemap;
use crate::tileset::Tileset;

/// Options recognized at world construction.
#[derive(Resource, Debug, Clone, Copy)]
pub struct WorldConfig {
    pub horizontal_cells: usize,
    pub vertical_cells: usize,
    pub initial_seed: u64,
    /// When false the solver never places lots on its own; lots can still
    /// arrive through savegames or scripted placement.
    pub lots_enabled: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            horizontal_cells: DEFAULT_GRID_WIDTH,
            vertical_cells: DEFAULT_GRID_HEIGHT,
            initial_seed: DEFAULT_SEED,
            lots_enabled: true,
        }
    }
}

impl WorldConfig {
    pub fn dims(&self) -> TilemapDims {
        TilemapDims::new(self.horizontal_cells, self.vertical_cells)
    }
}

/// Insert the world resources and queue the initial decoration solve.
pub fn init_world(
    mut commands: Commands,
    config: Res<WorldConfig>,
    mut pending: ResMut<PendingTilemapChange>,
) {
    let dims = config.dims();
    let tileset = if config.lots_enabled {
        Tileset::standard()
    } else {
        Tileset::standard().without_spontaneous_lots()
    };
    commands.insert_resource(Tilemap::new(dims));
    commands.insert_resource(SimRng::from_seed(config.initial_seed));
    commands.insert_resource(tileset);
    // An empty map still gets decorated: fire the change pipeline once.
    pending.register(std::iter::empty());
    info!(
        "world initialized: {}x{} cells, seed {}",
        dims.width, dims.height, config.initial_seed
    );
}

/// A small scripted starter layout: a ring road with a crossing street,
/// enough to produce intersections, deadends, and lot frontage.
pub fn demo_actions(dims: TilemapDims) -> Vec<EditorAction> {
    let mut actions = Vec::new();
    let left = 2;
    let right = (dims.width as i32 - 1).max(3);
    let top = 2;
    let bottom = (dims.height as i32 - 1).max(3);
    let mid_x = (left + right) / 2;

    for x in left..=right {
        actions.push((x, top));
        actions.push((x, bottom));
    }
    for y in top..=bottom {
        actions.push((left, y));
        actions.push((right, y));
        actions.push((mid_x, y));
    }

    actions
        .into_iter()
        .filter_map(|(x, y)| dims.cell(x, y).map(EditorAction::Primary))
        .collect()
}

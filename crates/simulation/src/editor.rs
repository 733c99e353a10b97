//! Editor actions: the single mutation path for player (and scripted)
//! edits.
//!
//! `Primary` places a road with mask-based auto-tiling — the placed cell's
//! connections come from its live road neighbors, and those neighbors are
//! re-masked in turn. `Secondary` bulldozes: roads start their demolition
//! animation immediately, and hitting any cell of a lot (or its anchor)
//! cascades the whole lot away, residents included. Every edit registers
//! its changed cells with the debounce slot, which later triggers the
//! solver and the network rebuild.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audio::PlayAudioEvent;
use crate::event_queue::PendingTilemapChange;
use crate::grid::{Cell, OrthogonalDirection};
use crate::lots::{Lot, LotRemovedEvent};
use crate::simulation_sets::SimulationSet;
use crate::tilemap::Tilemap;
use crate::tiles::{TileAction, TileBuildState, TileId};
use crate::tileset::Tileset;

/// A cell-level edit from the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditorAction {
    /// Place road / seed collapse at the cell.
    Primary(Cell),
    /// Bulldoze the cell.
    Secondary(Cell),
}

/// FIFO queue of pending editor actions. Input, replay, and tests all push
/// here; the executor drains it every tick.
#[derive(Resource, Debug, Default)]
pub struct ActionQueue {
    pending: Vec<EditorAction>,
}

impl ActionQueue {
    pub fn push(&mut self, action: EditorAction) {
        self.pending.push(action);
    }

    pub fn drain(&mut self) -> Vec<EditorAction> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Road id for a connection mask. A single live neighbor extends to the
/// straight through its axis, and an isolated cell falls back to
/// `default` (vertical straights keep their axis), so painting a line of
/// cells yields a line of straights.
fn road_id_for_mask(mask: &[OrthogonalDirection], fallback_vertical: bool, default: TileId) -> TileId {
    use OrthogonalDirection::*;
    match mask {
        [] => {
            if fallback_vertical {
                TileId::road(&[Up, Down])
            } else {
                default
            }
        }
        [Up] | [Down] => TileId::road(&[Up, Down]),
        [Left] | [Right] => TileId::road(&[Left, Right]),
        _ => TileId::road(mask),
    }
}

/// Re-mask the live road neighbors of `cell` after an edit, preserving
/// anchor bits. Returns the cells whose id changed.
fn refresh_neighbor_masks(tilemap: &mut Tilemap, cell: Cell, default: TileId) -> Vec<Cell> {
    let dims = tilemap.dims();
    let mut changed = Vec::new();
    for dir in OrthogonalDirection::ALL {
        let Some(neighbor) = dims.neighbor(cell, dir) else {
            continue;
        };
        if !tilemap.tile(neighbor).is_active_road() {
            continue;
        }
        let old = tilemap
            .tile(neighbor)
            .kind
            .fixed_id()
            .expect("active road is fixed");
        let was_vertical =
            old.connects(OrthogonalDirection::Up) || old.connects(OrthogonalDirection::Down);
        let mask = tilemap.neighbor_road_mask(neighbor);
        let mut new_id = road_id_for_mask(&mask, was_vertical, default);
        if old.is_lot_anchor() {
            new_id = new_id.with_anchor();
        }
        if new_id != old {
            tilemap.refix_id(neighbor, new_id);
            changed.push(neighbor);
        }
    }
    changed
}

/// Start demolition of every cell of a lot and strip its anchor bit from
/// the road. The lot entity itself is torn down by the lots plugin in
/// response to the emitted event.
fn demolish_lot(
    tilemap: &mut Tilemap,
    lot_entity: Entity,
    lot: &Lot,
    removed: &mut EventWriter<LotRemovedEvent>,
    changed: &mut Vec<Cell>,
) {
    for cell in tilemap.lot_footprint(lot.top_left_cell, lot.width, lot.height) {
        let tile = tilemap.tile_mut(cell);
        if tile.kind.is_fixed() && tile.fsm.transition_to(TileBuildState::Removing).is_ok() {
            changed.push(cell);
        }
    }
    if let Some(road_id) = tilemap.tile(lot.road_cell).kind.fixed_id() {
        if road_id.is_lot_anchor() {
            tilemap.refix_id(lot.road_cell, road_id.base_road());
            changed.push(lot.road_cell);
        }
    }
    removed.send(LotRemovedEvent {
        entity: lot_entity,
        lot_id: lot.id,
    });
}

/// Drain and apply queued editor actions.
pub fn execute_editor_actions(
    mut queue: ResMut<ActionQueue>,
    mut tilemap: ResMut<Tilemap>,
    mut pending: ResMut<PendingTilemapChange>,
    tileset: Res<Tileset>,
    mut audio: EventWriter<PlayAudioEvent>,
    mut lot_removed: EventWriter<LotRemovedEvent>,
    lots: Query<(Entity, &Lot)>,
) {
    if queue.is_empty() {
        return;
    }
    let default_road = tileset.default_road;

    for action in queue.drain() {
        let mut changed: Vec<Cell> = Vec::new();
        match action {
            EditorAction::Primary(cell) => {
                let tile = tilemap.tile(cell);
                if tile.is_active_road() || tile.kind.parent().is_some() {
                    // Already a road, or a lot stands here; bulldoze first.
                    continue;
                }
                let mask = tilemap.neighbor_road_mask(cell);
                let id = road_id_for_mask(&mask, false, default_road);
                for tile_action in tilemap.fix_tile(cell, id, None) {
                    let TileAction::PlayAudio(sound) = tile_action;
                    audio.send(PlayAudioEvent::new(sound));
                }
                changed.push(cell);
                changed.extend(refresh_neighbor_masks(&mut tilemap, cell, default_road));
            }

            EditorAction::Secondary(cell) => {
                // A lot dies as a unit, whether hit on its footprint or on
                // its anchor road cell.
                let covering_lot = lots.iter().find(|(_, lot)| {
                    lot.road_cell == cell
                        || tilemap
                            .lot_footprint(lot.top_left_cell, lot.width, lot.height)
                            .contains(&cell)
                });
                if let Some((lot_entity, lot)) = covering_lot {
                    demolish_lot(&mut tilemap, lot_entity, lot, &mut lot_removed, &mut changed);
                }

                let tile = tilemap.tile_mut(cell);
                if tile.kind.is_fixed() && tile.kind.parent().is_none() {
                    let actions = tile.fsm.transition_to(TileBuildState::Removing);
                    if let Ok(actions) = actions {
                        for tile_action in actions {
                            let TileAction::PlayAudio(sound) = tile_action;
                            audio.send(PlayAudioEvent::new(sound));
                        }
                        changed.push(cell);
                        changed.extend(refresh_neighbor_masks(&mut tilemap, cell, default_road));
                    }
                }
            }
        }

        if !changed.is_empty() {
            pending.register(changed);
        }
    }
}

pub struct EditorPlugin;

impl Plugin for EditorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ActionQueue>().add_systems(
            FixedUpdate,
            execute_editor_actions
                .after(crate::cars::process_world_events)
                .in_set(SimulationSet::PreSim),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OrthogonalDirection::*;

    const DEFAULT: TileId = TileId(6);

    #[test]
    fn test_mask_normalization() {
        assert_eq!(road_id_for_mask(&[], false, DEFAULT), TileId(6));
        assert_eq!(road_id_for_mask(&[], true, DEFAULT), TileId(9));
        assert_eq!(road_id_for_mask(&[Left], false, DEFAULT), TileId(6));
        assert_eq!(road_id_for_mask(&[Right], false, DEFAULT), TileId(6));
        assert_eq!(road_id_for_mask(&[Up], false, DEFAULT), TileId(9));
        assert_eq!(
            road_id_for_mask(&[Left, Right, Down], false, DEFAULT),
            TileId(14)
        );
        assert_eq!(
            road_id_for_mask(&[Up, Left, Right, Down], false, DEFAULT),
            TileId(15)
        );
    }

    #[test]
    fn test_placing_two_cells_yields_straights() {
        use crate::grid::TilemapDims;
        let mut tilemap = Tilemap::new(TilemapDims::new(2, 1));
        let dims = tilemap.dims();
        let a = dims.cell(1, 1).unwrap();
        let b = dims.cell(2, 1).unwrap();

        // First placement: isolated, defaults to a horizontal straight.
        let mask = tilemap.neighbor_road_mask(a);
        tilemap.fix_tile(a, road_id_for_mask(&mask, false, DEFAULT), None);
        assert_eq!(tilemap.tile(a).kind.fixed_id(), Some(TileId(6)));

        // Second placement connects left, extends straight through, and
        // the re-mask keeps the first cell a straight too.
        let mask = tilemap.neighbor_road_mask(b);
        tilemap.fix_tile(b, road_id_for_mask(&mask, false, DEFAULT), None);
        refresh_neighbor_masks(&mut tilemap, b, DEFAULT);
        assert_eq!(tilemap.tile(b).kind.fixed_id(), Some(TileId(6)));
        assert_eq!(tilemap.tile(a).kind.fixed_id(), Some(TileId(6)));
    }

    #[test]
    fn test_cross_forms_from_five_placements() {
        use crate::grid::TilemapDims;
        let mut tilemap = Tilemap::new(TilemapDims::new(3, 3));
        let dims = tilemap.dims();
        for (x, y) in [(2, 2), (1, 2), (3, 2), (2, 1), (2, 3)] {
            let cell = dims.cell(x, y).unwrap();
            let mask = tilemap.neighbor_road_mask(cell);
            tilemap.fix_tile(cell, road_id_for_mask(&mask, false, DEFAULT), None);
            refresh_neighbor_masks(&mut tilemap, cell, DEFAULT);
        }
        let center = dims.cell(2, 2).unwrap();
        assert_eq!(tilemap.tile(center).kind.fixed_id(), Some(TileId(15)));
    }
}

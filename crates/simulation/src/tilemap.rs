//! The tilemap resource: a fixed-size sequence of tile slots plus the
//! road-cell → lot anchor mapping.

use std::collections::HashMap;

use bevy::prelude::*;

use crate::grid::{Cell, OrthogonalDirection, TilemapDims};
use crate::lots::LotId;
use crate::tiles::{ParentTile, Tile, TileAction, TileId, TileKind};
use crate::tileset::Tileset;

/// A road cell marked as the attachment point of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub lot_id: LotId,
    /// Direction from the road cell toward the lot's driveway cell.
    pub direction: OrthogonalDirection,
    /// The lot's driveway cell.
    pub entry_cell: Cell,
}

/// World tile storage. One slot per cell, row-major.
#[derive(Resource, Debug, Clone)]
pub struct Tilemap {
    dims: TilemapDims,
    tiles: Vec<Tile>,
    anchors: HashMap<Cell, Anchor>,
}

impl Tilemap {
    pub fn new(dims: TilemapDims) -> Self {
        Self {
            dims,
            tiles: (0..dims.cell_count()).map(|_| Tile::unintialized()).collect(),
            anchors: HashMap::new(),
        }
    }

    pub fn dims(&self) -> TilemapDims {
        self.dims
    }

    pub fn tile(&self, cell: Cell) -> &Tile {
        &self.tiles[self.dims.index(cell)]
    }

    pub fn tile_mut(&mut self, cell: Cell) -> &mut Tile {
        let index = self.dims.index(cell);
        &mut self.tiles[index]
    }

    pub fn set_tile(&mut self, cell: Cell, tile: Tile) {
        let index = self.dims.index(cell);
        self.tiles[index] = tile;
    }

    /// Fix a cell to a tile, starting its construction animation. Returns
    /// the tile FSM's entry actions.
    pub fn fix_tile(
        &mut self,
        cell: Cell,
        id: TileId,
        parent: Option<ParentTile>,
    ) -> Vec<TileAction> {
        let (tile, actions) = Tile::fixed(id, parent);
        self.set_tile(cell, tile);
        actions
    }

    /// Swap a fixed cell's id in place without restarting construction.
    /// Used by auto-tiling mask updates on neighbor roads.
    pub fn refix_id(&mut self, cell: Cell, id: TileId) {
        let tile = self.tile_mut(cell);
        if let TileKind::Fixed { id: slot, .. } = &mut tile.kind {
            *slot = id;
        }
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = (Cell, &Tile)> {
        self.tiles.iter().enumerate().map(|(index, tile)| {
            let cell = self
                .dims
                .cell_from_index(index)
                .expect("tile storage length matches dims");
            (cell, tile)
        })
    }

    /// Cells holding live road tiles (demolitions in progress excluded).
    pub fn road_cells(&self) -> impl Iterator<Item = (Cell, TileId)> + '_ {
        self.iter_cells().filter_map(|(cell, tile)| {
            if tile.is_active_road() {
                tile.kind.fixed_id().map(|id| (cell, id))
            } else {
                None
            }
        })
    }

    /// Live road connections of a cell's neighbors, used for auto-tiling.
    pub fn neighbor_road_mask(&self, cell: Cell) -> Vec<OrthogonalDirection> {
        OrthogonalDirection::ALL
            .into_iter()
            .filter(|dir| {
                self.dims
                    .neighbor(cell, *dir)
                    .is_some_and(|n| self.tile(n).is_active_road())
            })
            .collect()
    }

    /// Reset decorative cells (grass, flowers, trees) to unintialized so a
    /// fresh solve can re-derive them. Roads and lot footprints stay.
    pub fn reset_decoration(&mut self) {
        for index in 0..self.tiles.len() {
            let tile = &self.tiles[index];
            let decorative = match &tile.kind {
                TileKind::Fixed { id, parent } => {
                    parent.is_none() && !id.is_road() && id.0 < 64
                }
                TileKind::Superposition(_) => true,
                _ => false,
            };
            if decorative {
                self.tiles[index] = Tile::unintialized();
            }
        }
    }

    // -- anchors ------------------------------------------------------------

    pub fn add_anchor(&mut self, road_cell: Cell, anchor: Anchor) {
        self.anchors.insert(road_cell, anchor);
    }

    pub fn anchor_at(&self, road_cell: Cell) -> Option<&Anchor> {
        self.anchors.get(&road_cell)
    }

    pub fn anchors(&self) -> impl Iterator<Item = (&Cell, &Anchor)> {
        self.anchors.iter()
    }

    pub fn remove_anchors_for_lot(&mut self, lot_id: LotId) {
        self.anchors.retain(|_, anchor| anchor.lot_id != lot_id);
    }

    /// Cells fixed as subgrid members of the given large tile rooted at
    /// `top_left`.
    pub fn lot_footprint(&self, top_left: Cell, width: usize, height: usize) -> Vec<Cell> {
        let mut cells = Vec::with_capacity(width * height);
        for dy in 0..height {
            for dx in 0..width {
                if let Some(cell) = self.dims.cell(
                    top_left.x() as i32 + dx as i32,
                    top_left.y() as i32 + dy as i32,
                ) {
                    cells.push(cell);
                }
            }
        }
        cells
    }

    // -- lifecycle ----------------------------------------------------------

    /// Advance every tile FSM, collecting emitted actions.
    pub fn update_tile_fsms(&mut self, delta: f32) -> Vec<(Cell, TileAction)> {
        let mut out = Vec::new();
        for index in 0..self.tiles.len() {
            let actions = self.tiles[index].fsm.update(delta, &());
            if !actions.is_empty() {
                let cell = self.dims.cell_from_index(index).expect("index in range");
                out.extend(actions.into_iter().map(|a| (cell, a)));
            }
        }
        out
    }

    /// Clear slots whose removal completed. Returns the freed cells.
    pub fn sweep_removed(&mut self) -> Vec<Cell> {
        let mut freed = Vec::new();
        for index in 0..self.tiles.len() {
            if self.tiles[index].is_removed() {
                self.tiles[index] = Tile::unintialized();
                freed.push(self.dims.cell_from_index(index).expect("index in range"));
            }
        }
        freed
    }

    // -- invariants ---------------------------------------------------------

    /// Fixed cells whose sockets fail to pair with a fixed neighbor.
    /// User-placed roads facing the border or an undecided cell are fine.
    pub fn socket_violations(&self, tileset: &Tileset) -> Vec<(Cell, OrthogonalDirection)> {
        let mut violations = Vec::new();
        for (cell, tile) in self.iter_cells() {
            let Some(id) = tile.kind.fixed_id() else {
                continue;
            };
            for dir in OrthogonalDirection::ALL {
                let Some(own) = tileset.socket(id, dir) else {
                    continue;
                };
                let neighbor = self.dims.neighbor(cell, dir);
                let facing = match neighbor {
                    None => continue, // off-grid
                    Some(n) => match &self.tile(n).kind {
                        TileKind::Buffer => continue,
                        TileKind::Fixed { id: nid, .. } => {
                            tileset.socket(*nid, dir.opposite())
                        }
                        _ => continue, // undecided neighbors are not checked
                    },
                };
                if let Some(facing) = facing {
                    if !own.pairs_with(facing) {
                        violations.push((cell, dir));
                    }
                }
            }
        }
        violations
    }
}

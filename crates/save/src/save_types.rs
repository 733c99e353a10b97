//! The durable savegame record.
//!
//! A save stores exactly what cannot be re-derived: the RNG state, the
//! grid dimensions, the road cells the player shaped, and the placed lots.
//! Decorative cells are stored as `0` and re-solved from the saved RNG
//! stream on load, so a reload reproduces the map bit for bit. Lot subgrid
//! cells carry a `-1` sentinel in the flat array and are reconstructed
//! from the lot triples.

use serde::{Deserialize, Serialize};

use simulation::grid::TilemapDims;
use simulation::lots::Lot;
use simulation::sim_rng::SimRng;
use simulation::tilemap::Tilemap;
use simulation::tiles::TileId;

use crate::save_error::SaveError;

/// Current savegame schema version.
pub const SAVE_VERSION: u32 = 1;

/// Marker for cells covered by a lot's footprint.
pub const SUBGRID_SENTINEL: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Schema version.
    pub v: u32,
    /// RNG state: seed and stream position.
    pub seed: [u64; 2],
    /// Tilemap dimensions in cells.
    pub tmd: [u32; 2],
    /// One integer per cell: `0` empty, road ids as-is (anchor bit
    /// included), `-1` for lot subgrid members.
    pub tilemap: Vec<i32>,
    /// `[lot-kind-id, top-left-x, top-left-y]` per lot.
    pub lots: Vec<[i32; 3]>,
}

impl SaveGame {
    /// Snapshot the durable parts of the world.
    pub fn capture(tilemap: &Tilemap, rng: &SimRng, lots: &[Lot]) -> Self {
        let cells = tilemap
            .iter_cells()
            .map(|(_, tile)| match (&tile.kind, tile.kind.fixed_id()) {
                _ if tile.kind.parent().is_some() => SUBGRID_SENTINEL,
                (_, Some(id)) if id.is_road() => i32::from(id.0),
                _ => 0,
            })
            .collect();

        let mut lot_entries: Vec<[i32; 3]> = lots
            .iter()
            .map(|lot| {
                [
                    i32::from(lot.large_id.0),
                    lot.top_left_cell.x() as i32,
                    lot.top_left_cell.y() as i32,
                ]
            })
            .collect();
        lot_entries.sort_unstable();

        Self {
            v: SAVE_VERSION,
            seed: [rng.seed(), rng.word_pos()],
            tmd: [tilemap.dims().width as u32, tilemap.dims().height as u32],
            tilemap: cells,
            lots: lot_entries,
        }
    }

    pub fn encode(&self) -> Result<String, SaveError> {
        serde_json::to_string_pretty(self).map_err(|e| SaveError::Encode(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, SaveError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            v: u32,
        }
        let probe: VersionProbe =
            serde_json::from_str(text).map_err(|e| SaveError::Decode(e.to_string()))?;
        if probe.v > SAVE_VERSION {
            return Err(SaveError::VersionMismatch {
                expected_max: SAVE_VERSION,
                found: probe.v,
            });
        }
        let save: SaveGame =
            serde_json::from_str(text).map_err(|e| SaveError::Decode(e.to_string()))?;
        save.validate()?;
        Ok(save)
    }

    /// Structural consistency: dimensions match the array, lots fit the
    /// grid, stored ids are plausible.
    pub fn validate(&self) -> Result<(), SaveError> {
        let [w, h] = self.tmd;
        if w == 0 || h == 0 {
            return Err(SaveError::Corrupt("zero-sized tilemap".into()));
        }
        if self.tilemap.len() != (w * h) as usize {
            return Err(SaveError::Corrupt(format!(
                "tilemap array holds {} cells for a {}x{} grid",
                self.tilemap.len(),
                w,
                h
            )));
        }
        for value in &self.tilemap {
            if *value != SUBGRID_SENTINEL && !(0..=255).contains(value) {
                return Err(SaveError::Corrupt(format!("tile id {value} out of range")));
            }
        }
        let dims = TilemapDims::new(w as usize, h as usize);
        for [kind, x, y] in &self.lots {
            if dims.cell(*x, *y).is_none() {
                return Err(SaveError::Corrupt(format!(
                    "lot anchor ({x}, {y}) outside the grid"
                )));
            }
            if !(0..=255).contains(kind) {
                return Err(SaveError::Corrupt(format!("lot kind {kind} out of range")));
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> TilemapDims {
        TilemapDims::new(self.tmd[0] as usize, self.tmd[1] as usize)
    }

    /// Road cells recorded in the flat array, in index order.
    pub fn road_cells(&self) -> impl Iterator<Item = (usize, TileId)> + '_ {
        self.tilemap.iter().enumerate().filter_map(|(index, value)| {
            let id = TileId(u8::try_from(*value).ok()?);
            id.is_road().then_some((index, id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_save() -> SaveGame {
        SaveGame {
            v: SAVE_VERSION,
            seed: [42, 0],
            tmd: [2, 1],
            tilemap: vec![6, 6],
            lots: vec![],
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let save = minimal_save();
        let text = save.encode().unwrap();
        let decoded = SaveGame::decode(&text).unwrap();
        assert_eq!(save, decoded);
    }

    #[test]
    fn test_newer_version_is_refused() {
        let mut save = minimal_save();
        save.v = SAVE_VERSION + 1;
        let text = save.encode().unwrap();
        match SaveGame::decode(&text) {
            Err(SaveError::VersionMismatch {
                expected_max,
                found,
            }) => {
                assert_eq!(expected_max, SAVE_VERSION);
                assert_eq!(found, SAVE_VERSION + 1);
            }
            other => panic!("expected a version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_array_length_is_corrupt() {
        let mut save = minimal_save();
        save.tilemap.push(0);
        let text = save.encode().unwrap();
        assert!(matches!(
            SaveGame::decode(&text),
            Err(SaveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            SaveGame::decode("not json at all"),
            Err(SaveError::Decode(_))
        ));
    }

    #[test]
    fn test_road_cells_skip_sentinels_and_empties() {
        let save = SaveGame {
            v: SAVE_VERSION,
            seed: [1, 0],
            tmd: [2, 2],
            tilemap: vec![6, 0, SUBGRID_SENTINEL, 22],
            lots: vec![],
        };
        let roads: Vec<_> = save.road_cells().collect();
        assert_eq!(roads.len(), 2);
        assert_eq!(roads[0], (0, TileId(6)));
        // Anchor-modified road ids survive as-is.
        assert_eq!(roads[1], (3, TileId(22)));
    }
}

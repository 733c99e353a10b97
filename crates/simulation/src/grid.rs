//! Grid cells, dimensions, and the cell ↔ world-space mapping.
//!
//! Cells are 1-indexed: `1 ≤ x ≤ W`, `1 ≤ y ≤ H`, row 1 at the top of the
//! map. World space is meters, +x east, +y north, origin at the map's
//! bottom-left corner, so a cell's bottom-left corner sits at
//! `((x-1)·S, (H-y)·S)` with `S` the cell edge length.

use bevy::math::{Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::config::CELL_SIZE;

/// The four cardinal directions, in tile-id bit order (up, left, right,
/// down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrthogonalDirection {
    Up,
    Left,
    Right,
    Down,
}

impl OrthogonalDirection {
    pub const ALL: [OrthogonalDirection; 4] = [
        OrthogonalDirection::Up,
        OrthogonalDirection::Left,
        OrthogonalDirection::Right,
        OrthogonalDirection::Down,
    ];

    pub fn opposite(self) -> Self {
        match self {
            OrthogonalDirection::Up => OrthogonalDirection::Down,
            OrthogonalDirection::Left => OrthogonalDirection::Right,
            OrthogonalDirection::Right => OrthogonalDirection::Left,
            OrthogonalDirection::Down => OrthogonalDirection::Up,
        }
    }

    /// Unit vector in world space. `Up` is world north (+y).
    pub fn as_vec(self) -> Vec2 {
        match self {
            OrthogonalDirection::Up => Vec2::Y,
            OrthogonalDirection::Left => Vec2::NEG_X,
            OrthogonalDirection::Right => Vec2::X,
            OrthogonalDirection::Down => Vec2::NEG_Y,
        }
    }

    /// Grid-coordinate offset. Row numbers grow southward, so `Up` is
    /// `(0, -1)`.
    pub fn cell_offset(self) -> (i32, i32) {
        match self {
            OrthogonalDirection::Up => (0, -1),
            OrthogonalDirection::Left => (-1, 0),
            OrthogonalDirection::Right => (1, 0),
            OrthogonalDirection::Down => (0, 1),
        }
    }

    /// Clockwise perpendicular: the "right-hand side" of travel.
    pub fn right_normal(self) -> Vec2 {
        let v = self.as_vec();
        Vec2::new(v.y, -v.x)
    }
}

/// Tilemap dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilemapDims {
    pub width: usize,
    pub height: usize,
}

impl TilemapDims {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "degenerate tilemap dimensions");
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Construct a cell, failing explicitly on out-of-bounds coordinates.
    pub fn cell(&self, x: i32, y: i32) -> Option<Cell> {
        if x >= 1 && y >= 1 && (x as usize) <= self.width && (y as usize) <= self.height {
            Some(Cell {
                x: x as u16,
                y: y as u16,
            })
        } else {
            None
        }
    }

    /// Canonical array index of a cell: `(x-1) + (y-1)·W`.
    pub fn index(&self, cell: Cell) -> usize {
        (cell.x as usize - 1) + (cell.y as usize - 1) * self.width
    }

    pub fn cell_from_index(&self, index: usize) -> Option<Cell> {
        if index >= self.cell_count() {
            return None;
        }
        Some(Cell {
            x: (index % self.width + 1) as u16,
            y: (index / self.width + 1) as u16,
        })
    }

    /// Bottom-left corner of a cell in meters.
    pub fn bottom_left(&self, cell: Cell) -> Vec2 {
        Vec2::new(
            (cell.x as f32 - 1.0) * CELL_SIZE,
            (self.height as f32 - cell.y as f32) * CELL_SIZE,
        )
    }

    /// Center of a cell in meters.
    pub fn center(&self, cell: Cell) -> Vec2 {
        self.bottom_left(cell) + Vec2::splat(CELL_SIZE / 2.0)
    }

    /// Midpoint of a cell's boundary edge in the given direction.
    pub fn edge_midpoint(&self, cell: Cell, direction: OrthogonalDirection) -> Vec2 {
        self.center(cell) + direction.as_vec() * (CELL_SIZE / 2.0)
    }

    /// Neighbor in a direction, `None` past the map edge.
    pub fn neighbor(&self, cell: Cell, direction: OrthogonalDirection) -> Option<Cell> {
        let (dx, dy) = direction.cell_offset();
        self.cell(cell.x as i32 + dx, cell.y as i32 + dy)
    }

    /// The whole map in meters.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            0.0,
            0.0,
            self.width as f32 * CELL_SIZE,
            self.height as f32 * CELL_SIZE,
        )
    }

    /// Cell containing a world-space point.
    pub fn cell_at_point(&self, point: Vec2) -> Option<Cell> {
        let x = (point.x / CELL_SIZE).floor() as i32 + 1;
        let y = self.height as i32 - (point.y / CELL_SIZE).floor() as i32;
        self.cell(x, y)
    }

    /// True for cells on the outermost ring of the grid.
    pub fn is_edge_cell(&self, cell: Cell) -> bool {
        cell.x == 1
            || cell.y == 1
            || cell.x as usize == self.width
            || cell.y as usize == self.height
    }
}

/// A 1-indexed grid coordinate. Only constructible through
/// [`TilemapDims::cell`], so a `Cell` is always in bounds for the dims it
/// was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    x: u16,
    y: u16,
}

impl Cell {
    pub fn x(&self) -> usize {
        self.x as usize
    }

    pub fn y(&self) -> usize {
        self.y as usize
    }

    pub fn coordinates(&self) -> (usize, usize) {
        (self.x as usize, self.y as usize)
    }
}

impl core::fmt::Display for Cell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: TilemapDims = TilemapDims {
        width: 4,
        height: 3,
    };

    #[test]
    fn test_cell_construction_bounds() {
        assert!(DIMS.cell(1, 1).is_some());
        assert!(DIMS.cell(4, 3).is_some());
        assert!(DIMS.cell(0, 1).is_none());
        assert!(DIMS.cell(5, 1).is_none());
        assert!(DIMS.cell(1, 4).is_none());
        assert!(DIMS.cell(-2, 2).is_none());
    }

    #[test]
    fn test_index_round_trip() {
        for idx in 0..DIMS.cell_count() {
            let cell = DIMS.cell_from_index(idx).unwrap();
            assert_eq!(DIMS.index(cell), idx);
        }
        assert_eq!(DIMS.index(DIMS.cell(1, 1).unwrap()), 0);
        assert_eq!(DIMS.index(DIMS.cell(2, 3).unwrap()), 9);
    }

    #[test]
    fn test_world_mapping_bottom_left() {
        // Row 1 is the top of the map: its bottom-left corner sits one cell
        // below the top edge.
        let top_left = DIMS.cell(1, 1).unwrap();
        assert_eq!(DIMS.bottom_left(top_left), Vec2::new(0.0, 2.0 * CELL_SIZE));
        let bottom_left = DIMS.cell(1, 3).unwrap();
        assert_eq!(DIMS.bottom_left(bottom_left), Vec2::ZERO);
    }

    #[test]
    fn test_cell_at_point_round_trip() {
        for idx in 0..DIMS.cell_count() {
            let cell = DIMS.cell_from_index(idx).unwrap();
            assert_eq!(DIMS.cell_at_point(DIMS.center(cell)), Some(cell));
        }
        assert!(DIMS.cell_at_point(Vec2::new(-1.0, 5.0)).is_none());
        assert!(DIMS
            .cell_at_point(Vec2::new(4.0 * CELL_SIZE + 0.1, 5.0))
            .is_none());
    }

    #[test]
    fn test_neighbor_and_direction_agreement() {
        let cell = DIMS.cell(2, 2).unwrap();
        let up = DIMS.neighbor(cell, OrthogonalDirection::Up).unwrap();
        // Moving "up" raises the world-space center.
        assert!(DIMS.center(up).y > DIMS.center(cell).y);
        assert_eq!(up.coordinates(), (2, 1));
        assert_eq!(
            DIMS.neighbor(cell, OrthogonalDirection::Right)
                .unwrap()
                .coordinates(),
            (3, 2)
        );
    }

    #[test]
    fn test_opposites_and_normals() {
        for dir in OrthogonalDirection::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
            let v = dir.as_vec();
            assert!((v.dot(dir.right_normal())).abs() < 1e-6);
        }
    }
}

//! The tile library: per-edge socket colors, the pairing table, and the
//! standard set of single and large (multi-cell) tiles.
//!
//! Socket semantics: `Gray` is a road surface crossing the cell boundary and
//! only docks `Gray`, which is what forces road continuity. `Orange` is a
//! lot driveway mouth and only docks `LightBrown` (a road shoulder), which
//! is what forces driveways to face a road side. `White` is the neutral
//! buffer color used for the virtual ring outside the grid; it never docks
//! `Gray` or `Orange`, keeping roads and driveways off the map border.

use bevy::prelude::*;

use crate::grid::OrthogonalDirection;
use crate::tiles::TileId;

/// Edge socket colors. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Socket {
    Red,
    Green,
    Blue,
    Pink,
    Yellow,
    Orange,
    LightBrown,
    DarkBrown,
    Gray,
    White,
}

impl Socket {
    /// The sockets this color may dock against.
    pub fn docks_with(self) -> &'static [Socket] {
        use Socket::*;
        match self {
            Green => &[Green, White, LightBrown, DarkBrown, Blue],
            White => &[Green, White, LightBrown, DarkBrown, Blue],
            Gray => &[Gray],
            LightBrown => &[Green, White, DarkBrown, Blue, Orange, LightBrown],
            DarkBrown => &[Green, White, LightBrown, DarkBrown, Blue],
            Blue => &[Green, White, LightBrown, DarkBrown, Blue],
            Orange => &[LightBrown],
            Pink => &[Pink],
            Yellow => &[Yellow],
            Red => &[Red],
        }
    }

    pub fn pairs_with(self, other: Socket) -> bool {
        self.docks_with().contains(&other)
    }
}

/// Socket colors on the four edges of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sockets {
    pub top: Socket,
    pub right: Socket,
    pub bottom: Socket,
    pub left: Socket,
}

impl Sockets {
    pub fn uniform(socket: Socket) -> Self {
        Self {
            top: socket,
            right: socket,
            bottom: socket,
            left: socket,
        }
    }

    pub fn on(&self, direction: OrthogonalDirection) -> Socket {
        match direction {
            OrthogonalDirection::Up => self.top,
            OrthogonalDirection::Right => self.right,
            OrthogonalDirection::Down => self.bottom,
            OrthogonalDirection::Left => self.left,
        }
    }
}

/// A one-cell tile.
#[derive(Debug, Clone)]
pub struct SingleTile {
    pub id: TileId,
    pub sockets: Sockets,
    pub weight: f32,
}

/// Lot categories, used to pick resident behavior and reporting labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LotKind {
    Residential,
    School,
}

/// A multi-cell tile: an indivisible footprint of single tiles.
///
/// `anchor_index` is the subgrid cell holding the driveway; collapsing a
/// cell to this id places the driveway cell there and the rest of the
/// footprint around it. Subgrid indices are row-major from the top-left.
#[derive(Debug, Clone)]
pub struct LargeTile {
    pub id: TileId,
    pub kind: LotKind,
    pub width: usize,
    pub height: usize,
    pub anchor_index: usize,
    /// Direction from the driveway cell toward the road it must attach to.
    pub driveway_exit: OrthogonalDirection,
    pub parking_spots: usize,
    pub subgrid: Vec<SingleTile>,
    pub weight: f32,
}

impl LargeTile {
    /// Offset of a subgrid index from the footprint's top-left, in cells.
    pub fn subgrid_offset(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    pub fn subgrid_tile(&self, index: usize) -> Option<&SingleTile> {
        self.subgrid.get(index)
    }
}

/// The tile library the solver and the network builder work from.
#[derive(Resource, Debug, Clone)]
pub struct Tileset {
    singles: Vec<SingleTile>,
    larges: Vec<LargeTile>,
    /// When false, lots never enter a superposition: the solver cannot
    /// place them spontaneously, but existing lots still resolve through
    /// the library (savegames, scripted placement).
    spontaneous_lots: bool,
    /// The id the editor paints with before auto-tiling refines it.
    pub default_road: TileId,
}

impl Tileset {
    /// The standard library: all fifteen road shapes, grass and decor
    /// singles, and four lot tiles.
    pub fn standard() -> Self {
        let mut singles = Vec::new();

        // Road tiles 1..=15: Gray on connected edges, LightBrown shoulders.
        for mask in 1u8..=15 {
            let id = TileId(mask);
            let socket_on = |dir: OrthogonalDirection| {
                if id.connects(dir) {
                    Socket::Gray
                } else {
                    Socket::LightBrown
                }
            };
            singles.push(SingleTile {
                id,
                sockets: Sockets {
                    top: socket_on(OrthogonalDirection::Up),
                    right: socket_on(OrthogonalDirection::Right),
                    bottom: socket_on(OrthogonalDirection::Down),
                    left: socket_on(OrthogonalDirection::Left),
                },
                weight: 1.0,
            });
        }

        singles.push(SingleTile {
            id: TileId::GRASS,
            sockets: Sockets::uniform(Socket::Green),
            weight: 3.0,
        });
        singles.push(SingleTile {
            id: TileId::FLOWERS,
            sockets: Sockets::uniform(Socket::Green),
            weight: 1.0,
        });
        singles.push(SingleTile {
            id: TileId::TREES,
            sockets: Sockets::uniform(Socket::DarkBrown),
            weight: 1.0,
        });

        let mut larges = Vec::new();
        let mut next_member = 128u8;
        let mut build_lot = |id: u8,
                             kind: LotKind,
                             width: usize,
                             height: usize,
                             anchor_index: usize,
                             driveway_exit: OrthogonalDirection,
                             parking_spots: usize,
                             seam: Socket| {
            let mut subgrid = Vec::with_capacity(width * height);
            for index in 0..width * height {
                let (sx, sy) = (index % width, index / width);
                let edge = |dir: OrthogonalDirection| -> Socket {
                    let interior = match dir {
                        OrthogonalDirection::Up => sy > 0,
                        OrthogonalDirection::Down => sy + 1 < height,
                        OrthogonalDirection::Left => sx > 0,
                        OrthogonalDirection::Right => sx + 1 < width,
                    };
                    if interior {
                        seam
                    } else if index == anchor_index && dir == driveway_exit {
                        Socket::Orange
                    } else {
                        Socket::Blue
                    }
                };
                subgrid.push(SingleTile {
                    id: TileId(next_member),
                    sockets: Sockets {
                        top: edge(OrthogonalDirection::Up),
                        right: edge(OrthogonalDirection::Right),
                        bottom: edge(OrthogonalDirection::Down),
                        left: edge(OrthogonalDirection::Left),
                    },
                    weight: 0.0,
                });
                next_member += 1;
            }
            larges.push(LargeTile {
                id: TileId(id),
                kind,
                width,
                height,
                anchor_index,
                driveway_exit,
                parking_spots,
                subgrid,
                weight: 0.25,
            });
        };

        // 2x2 lots: subgrid rows are [0 1] / [2 3].
        build_lot(64, LotKind::Residential, 2, 2, 2, OrthogonalDirection::Down, 2, Socket::Pink);
        build_lot(65, LotKind::Residential, 2, 2, 3, OrthogonalDirection::Right, 2, Socket::Pink);
        build_lot(66, LotKind::Residential, 2, 2, 2, OrthogonalDirection::Left, 2, Socket::Red);
        // 3x2 school: rows [0 1 2] / [3 4 5], driveway mid-bottom.
        build_lot(67, LotKind::School, 3, 2, 4, OrthogonalDirection::Down, 4, Socket::Yellow);

        Self {
            singles,
            larges,
            spontaneous_lots: true,
            // An isolated placement paints a horizontal straight.
            default_road: TileId(0b0110),
        }
    }

    /// Keep the library intact but stop the solver from placing lots on
    /// its own.
    pub fn without_spontaneous_lots(mut self) -> Self {
        self.spontaneous_lots = false;
        self
    }

    /// Every id a fresh superposition starts from: roads, decor, and
    /// (when enabled) lots. Anchored road variants and subgrid members
    /// are placement outcomes, never options.
    pub fn all_option_ids(&self) -> Vec<TileId> {
        let larges = self
            .larges
            .iter()
            .filter(|_| self.spontaneous_lots)
            .map(|l| l.id);
        self.singles.iter().map(|s| s.id).chain(larges).collect()
    }

    pub fn single(&self, id: TileId) -> Option<&SingleTile> {
        let id = id.without_anchor();
        self.singles.iter().find(|s| s.id == id).or_else(|| {
            self.larges
                .iter()
                .flat_map(|l| l.subgrid.iter())
                .find(|s| s.id == id)
        })
    }

    pub fn large(&self, id: TileId) -> Option<&LargeTile> {
        self.larges.iter().find(|l| l.id == id)
    }

    pub fn is_large(&self, id: TileId) -> bool {
        self.large(id).is_some()
    }

    pub fn larges(&self) -> &[LargeTile] {
        &self.larges
    }

    /// Socket an option id shows on an edge. For a large id this is the
    /// anchor subgrid tile's socket: the collapsed cell is the driveway
    /// cell, and footprint conflicts are caught at placement.
    pub fn socket(&self, id: TileId, direction: OrthogonalDirection) -> Option<Socket> {
        if let Some(large) = self.large(id) {
            return large
                .subgrid_tile(large.anchor_index)
                .map(|t| t.sockets.on(direction));
        }
        self.single(id).map(|s| s.sockets.on(direction))
    }

    /// Collapse weight of an option.
    pub fn weight(&self, id: TileId) -> f32 {
        if let Some(large) = self.large(id) {
            return large.weight;
        }
        self.single(id).map(|s| s.weight).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OrthogonalDirection::*;

    #[test]
    fn test_pairing_table_is_symmetric() {
        use Socket::*;
        let all = [
            Red, Green, Blue, Pink, Yellow, Orange, LightBrown, DarkBrown, Gray, White,
        ];
        for a in all {
            for b in all {
                assert_eq!(
                    a.pairs_with(b),
                    b.pairs_with(a),
                    "pairing must be symmetric for {a:?}/{b:?}"
                );
            }
        }
    }

    #[test]
    fn test_roads_never_dock_the_border() {
        assert!(!Socket::Gray.pairs_with(Socket::White));
        assert!(!Socket::Orange.pairs_with(Socket::White));
        assert!(Socket::Orange.pairs_with(Socket::LightBrown));
    }

    #[test]
    fn test_road_tile_sockets_follow_connections() {
        let tileset = Tileset::standard();
        let horizontal = TileId(6);
        assert_eq!(tileset.socket(horizontal, Left), Some(Socket::Gray));
        assert_eq!(tileset.socket(horizontal, Right), Some(Socket::Gray));
        assert_eq!(tileset.socket(horizontal, Up), Some(Socket::LightBrown));
        assert_eq!(tileset.socket(horizontal, Down), Some(Socket::LightBrown));
        // The anchored variant reads through to the base road.
        assert_eq!(
            tileset.socket(horizontal.with_anchor(), Left),
            Some(Socket::Gray)
        );
    }

    #[test]
    fn test_lot_anchor_sockets() {
        let tileset = Tileset::standard();
        let house = tileset.large(TileId(64)).unwrap();
        assert_eq!((house.width, house.height), (2, 2));
        let anchor = house.subgrid_tile(house.anchor_index).unwrap();
        // Driveway mouth faces down, perimeter left, seams up and right.
        assert_eq!(anchor.sockets.bottom, Socket::Orange);
        assert_eq!(anchor.sockets.left, Socket::Blue);
        assert_eq!(anchor.sockets.top, Socket::Pink);
        assert_eq!(anchor.sockets.right, Socket::Pink);
        // The option-level socket lookup sees the anchor cell.
        assert_eq!(tileset.socket(TileId(64), Down), Some(Socket::Orange));
    }

    #[test]
    fn test_option_set_excludes_subgrid_members() {
        let tileset = Tileset::standard();
        let options = tileset.all_option_ids();
        assert!(options.contains(&TileId(6)));
        assert!(options.contains(&TileId::GRASS));
        assert!(options.contains(&TileId(64)));
        assert!(options.iter().all(|id| id.0 < 128));
        // Subgrid members resolve through `single` for socket checks.
        assert!(tileset.single(TileId(128)).is_some());
    }

    #[test]
    fn test_subgrid_offsets_row_major() {
        let tileset = Tileset::standard();
        let school = tileset.large(TileId(67)).unwrap();
        assert_eq!(school.subgrid_offset(0), (0, 0));
        assert_eq!(school.subgrid_offset(2), (2, 0));
        assert_eq!(school.subgrid_offset(4), (1, 1));
        assert_eq!(school.subgrid.len(), 6);
    }
}

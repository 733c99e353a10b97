//! Tile identity and per-tile lifecycle.
//!
//! Road tile ids encode their connections as a bitmask — bit 0 up, bit 1
//! left, bit 2 right, bit 3 down — so a straight horizontal road is 6 and
//! the 4-way crossing is 15. Bit 4 marks a road cell as a lot anchor.
//! Ids 32+ are decorative singles, 64+ large (lot) tiles, 128+ the subgrid
//! members large tiles expand into.

use crate::audio::Sound;
use crate::config::{TILE_BUILD_SECONDS, TILE_REMOVE_SECONDS};
use crate::fsm::{Fsm, FsmState, Transition};
use crate::grid::OrthogonalDirection;

/// Integer identifier of a tile kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u8);

/// Bit flagging a road tile as a lot anchor.
const ANCHOR_BIT: u8 = 0x10;

impl TileId {
    pub const GRASS: TileId = TileId(32);
    pub const FLOWERS: TileId = TileId(33);
    pub const TREES: TileId = TileId(34);

    /// Road tile from a set of connected directions. At least one bit set.
    pub fn road(connections: &[OrthogonalDirection]) -> TileId {
        let mut mask = 0u8;
        for dir in connections {
            mask |= Self::connection_bit(*dir);
        }
        debug_assert!(mask != 0, "a road tile needs at least one connection");
        TileId(mask)
    }

    fn connection_bit(direction: OrthogonalDirection) -> u8 {
        match direction {
            OrthogonalDirection::Up => 0b0001,
            OrthogonalDirection::Left => 0b0010,
            OrthogonalDirection::Right => 0b0100,
            OrthogonalDirection::Down => 0b1000,
        }
    }

    pub fn is_road(self) -> bool {
        let base = self.0 & !ANCHOR_BIT;
        self.0 < 0x20 && base != 0 && base <= 0x0F
    }

    pub fn is_lot_anchor(self) -> bool {
        self.is_road() && self.0 & ANCHOR_BIT != 0
    }

    /// The road id with the anchor modifier stripped.
    pub fn base_road(self) -> TileId {
        debug_assert!(self.is_road());
        TileId(self.0 & 0x0F)
    }

    pub fn with_anchor(self) -> TileId {
        debug_assert!(self.is_road());
        TileId(self.0 | ANCHOR_BIT)
    }

    pub fn without_anchor(self) -> TileId {
        if self.is_road() {
            self.base_road()
        } else {
            self
        }
    }

    /// Does this road tile connect toward `direction`?
    pub fn connects(self, direction: OrthogonalDirection) -> bool {
        self.is_road() && self.0 & Self::connection_bit(direction) != 0
    }

    pub fn connections(self) -> impl Iterator<Item = OrthogonalDirection> {
        OrthogonalDirection::ALL
            .into_iter()
            .filter(move |dir| self.connects(*dir))
    }

    pub fn connection_count(self) -> usize {
        if self.is_road() {
            (self.0 & 0x0F).count_ones() as usize
        } else {
            0
        }
    }

    /// A deadend road: exactly one connection.
    pub fn is_deadend(self) -> bool {
        self.connection_count() == 1
    }

    pub fn is_intersection(self) -> bool {
        self.connection_count() >= 3
    }
}

/// Reference from a subgrid member back to the large tile that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentTile {
    pub large_id: TileId,
    /// Row-major index into the large tile's subgrid; index 0 is the
    /// top-left cell and serves as the render/graph root.
    pub subgrid_index: usize,
}

/// What a cell currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum TileKind {
    /// Nothing decided yet and no solve in progress.
    Unintialized,
    /// Remaining legal tile ids for a not-yet-collapsed cell.
    Superposition(Vec<TileId>),
    /// A decided tile; subgrid members carry their parent reference.
    Fixed {
        id: TileId,
        parent: Option<ParentTile>,
    },
    /// Reserved margin cell that can never be collapsed.
    Buffer,
}

impl TileKind {
    pub fn fixed(id: TileId) -> Self {
        TileKind::Fixed { id, parent: None }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, TileKind::Fixed { .. })
    }

    pub fn fixed_id(&self) -> Option<TileId> {
        match self {
            TileKind::Fixed { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<ParentTile> {
        match self {
            TileKind::Fixed { parent, .. } => *parent,
            _ => None,
        }
    }

    pub fn options(&self) -> Option<&[TileId]> {
        match self {
            TileKind::Superposition(options) => Some(options),
            _ => None,
        }
    }

    /// True when this cell holds a fixed road tile.
    pub fn is_road(&self) -> bool {
        self.fixed_id().is_some_and(|id| id.is_road())
    }
}

/// Build/teardown lifecycle of a fixed tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileBuildState {
    Constructing,
    Built,
    Removing,
    Removed,
}

/// Side effects emitted by tile transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAction {
    PlayAudio(Sound),
}

impl FsmState for TileBuildState {
    type Context = ();
    type Action = TileAction;

    fn transitions(&self) -> Vec<Transition<Self, (), TileAction>> {
        match self {
            TileBuildState::Constructing => vec![
                Transition::timed(TileBuildState::Built, TILE_BUILD_SECONDS)
                    .with_actions(vec![TileAction::PlayAudio(Sound::BuildRoadEnd)]),
                Transition::direct(TileBuildState::Removing),
            ],
            TileBuildState::Built => vec![Transition::direct(TileBuildState::Removing)],
            TileBuildState::Removing => {
                vec![Transition::timed(TileBuildState::Removed, TILE_REMOVE_SECONDS)]
            }
            TileBuildState::Removed => Vec::new(),
        }
    }

    fn entry_actions(&self) -> Vec<TileAction> {
        match self {
            TileBuildState::Constructing => vec![TileAction::PlayAudio(Sound::BuildRoadStart)],
            TileBuildState::Removing => vec![TileAction::PlayAudio(Sound::DestroyRoad)],
            _ => Vec::new(),
        }
    }
}

/// Logical contents of a cell: its kind plus its lifecycle machine.
#[derive(Debug, Clone)]
pub struct Tile {
    pub kind: TileKind,
    pub fsm: Fsm<TileBuildState>,
}

impl Tile {
    pub fn unintialized() -> Self {
        let (fsm, _) = Fsm::new(TileBuildState::Built);
        Self {
            kind: TileKind::Unintialized,
            fsm,
        }
    }

    pub fn buffer() -> Self {
        let (fsm, _) = Fsm::new(TileBuildState::Built);
        Self {
            kind: TileKind::Buffer,
            fsm,
        }
    }

    pub fn superposition(options: Vec<TileId>) -> Self {
        let (fsm, _) = Fsm::new(TileBuildState::Built);
        Self {
            kind: TileKind::Superposition(options),
            fsm,
        }
    }

    /// A freshly decided tile, starting its construction animation.
    /// Returns the entry actions of `Constructing`.
    pub fn fixed(id: TileId, parent: Option<ParentTile>) -> (Self, Vec<TileAction>) {
        let (fsm, actions) = Fsm::new(TileBuildState::Constructing);
        (
            Self {
                kind: TileKind::Fixed { id, parent },
                fsm,
            },
            actions,
        )
    }

    pub fn is_removed(&self) -> bool {
        *self.fsm.current() == TileBuildState::Removed
    }

    /// A road that still participates in the network: fixed and not
    /// mid-demolition.
    pub fn is_active_road(&self) -> bool {
        self.kind.is_road()
            && !matches!(
                self.fsm.current(),
                TileBuildState::Removing | TileBuildState::Removed
            )
    }
}

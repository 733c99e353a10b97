//! Constraint-propagation tilemap solver ("wave function collapse").
//!
//! Given the user's fixed cells, assigns every remaining cell a tile id such
//! that adjacent socket colors pair, expanding large tiles across their
//! footprint atomically. The solver is cooperatively chunked: each
//! [`Solver::step`] is bounded work, and the caller decides when to yield.
//!
//! Recovery is local: before every collapse a snapshot of the whole solver
//! is pushed; a contradiction pops the snapshot and removes the offending
//! option. Only snapshot-stack underflow surfaces as [`SolverState::Failed`].

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::grid::{Cell, OrthogonalDirection, TilemapDims};
use crate::tilemap::Tilemap;
use crate::tiles::{ParentTile, TileId, TileKind};
use crate::tileset::{Socket, Tileset};

/// When to halt stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Halt when every cell is fixed.
    StopAtSolved,
    /// Halt when propagation has settled and no forced (single-option)
    /// collapse remains; random choices are left to the caller.
    StopAtEmptySteps,
}

/// Why a solve gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverFailure {
    pub reason: &'static str,
    pub last_cell: Option<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverState {
    Running,
    Solved,
    Stopped,
    Failed(SolverFailure),
}

/// A lot footprint the solver committed during this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedLot {
    pub large_id: TileId,
    pub top_left: Cell,
    pub driveway_cell: Cell,
    /// The road cell the driveway attaches to, now carrying the anchor bit.
    pub road_cell: Cell,
    /// Direction from the road cell toward the driveway cell.
    pub anchor_direction: OrthogonalDirection,
}

/// Propagation work item: re-filter `to` against `from`'s remaining options.
#[derive(Debug, Clone, Copy)]
struct Filter {
    from: Cell,
    to: Cell,
}

struct Snapshot {
    kinds: Vec<TileKind>,
    queue: VecDeque<Filter>,
    rng: ChaCha8Rng,
    placed_lots: Vec<PlacedLot>,
    tried: (Cell, TileId),
}

/// Bound on the snapshot stack. Pushing past it drops the oldest snapshot;
/// popping an empty stack fails the solve.
const SNAPSHOT_STACK_LIMIT: usize = 64;

pub struct Solver {
    tileset: Tileset,
    dims: TilemapDims,
    kinds: Vec<TileKind>,
    queue: VecDeque<Filter>,
    snapshots: Vec<Snapshot>,
    rng: ChaCha8Rng,
    state: SolverState,
    current_cell: Option<Cell>,
    placed_lots: Vec<PlacedLot>,
    changed_cells: Vec<Cell>,
}

impl Solver {
    /// Initialize from a tilemap: fixed and buffer cells are kept, every
    /// other cell enters superposition over the full option set, and the
    /// queue is seeded so the first steps settle arc consistency against
    /// the fixed cells and the virtual buffer ring outside the grid.
    pub fn new(tilemap: &Tilemap, tileset: &Tileset, seed: u64) -> Self {
        let dims = tilemap.dims();
        let all_options = tileset.all_option_ids();
        let mut kinds: Vec<TileKind> = Vec::with_capacity(dims.cell_count());
        for (_, tile) in tilemap.iter_cells() {
            kinds.push(match &tile.kind {
                TileKind::Fixed { id, parent } => TileKind::Fixed {
                    id: *id,
                    parent: *parent,
                },
                TileKind::Buffer => TileKind::Buffer,
                _ => TileKind::Superposition(all_options.clone()),
            });
        }

        let mut solver = Self {
            tileset: tileset.clone(),
            dims,
            kinds,
            queue: VecDeque::new(),
            snapshots: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            state: SolverState::Running,
            current_cell: None,
            placed_lots: Vec::new(),
            changed_cells: Vec::new(),
        };
        solver.constrain_border();
        solver.seed_queue();
        solver
    }

    /// Filter border-cell options against the virtual `White` ring.
    fn constrain_border(&mut self) {
        let dims = self.dims;
        for index in 0..dims.cell_count() {
            let cell = dims.cell_from_index(index).expect("index in range");
            if !dims.is_edge_cell(cell) {
                continue;
            }
            let open_dirs: Vec<OrthogonalDirection> = OrthogonalDirection::ALL
                .into_iter()
                .filter(|d| dims.neighbor(cell, *d).is_none())
                .collect();
            let Self { kinds, tileset, .. } = self;
            if let TileKind::Superposition(options) = &mut kinds[index] {
                options.retain(|id| {
                    open_dirs.iter().all(|dir| {
                        tileset
                            .socket(*id, *dir)
                            .is_some_and(|s| s.pairs_with(Socket::White))
                    })
                });
            }
        }
    }

    /// Enqueue a filter item for every adjacent pair whose target is still
    /// in superposition. Scan order keeps this deterministic.
    fn seed_queue(&mut self) {
        for index in 0..self.dims.cell_count() {
            let cell = self.dims.cell_from_index(index).expect("index in range");
            for dir in OrthogonalDirection::ALL {
                if let Some(neighbor) = self.dims.neighbor(cell, dir) {
                    if self.is_superposition(neighbor) {
                        self.queue.push_back(Filter {
                            from: cell,
                            to: neighbor,
                        });
                    }
                }
            }
        }
    }

    // -- state predicates ---------------------------------------------------

    pub fn state(&self) -> &SolverState {
        &self.state
    }

    pub fn solved(&self) -> bool {
        self.state == SolverState::Solved
    }

    pub fn failed(&self) -> bool {
        matches!(self.state, SolverState::Failed(_))
    }

    /// Terminal for the current stop condition: solved, stopped, or failed.
    pub fn stopped(&self) -> bool {
        !matches!(self.state, SolverState::Running)
    }

    /// The cell most recently collapsed, for introspection.
    pub fn current_cell(&self) -> Option<Cell> {
        self.current_cell
    }

    /// One-line summary of the solver context.
    pub fn context_debug(&self) -> String {
        let open = self
            .kinds
            .iter()
            .filter(|k| matches!(k, TileKind::Superposition(_)))
            .count();
        format!(
            "open={} queued={} snapshots={} lots={}",
            open,
            self.queue.len(),
            self.snapshots.len(),
            self.placed_lots.len()
        )
    }

    pub fn state_debug(&self) -> String {
        format!("{:?}", self.state)
    }

    /// Lots committed so far.
    pub fn placed_lots(&self) -> &[PlacedLot] {
        &self.placed_lots
    }

    /// Cells fixed by this run, in commit order.
    pub fn changed_cells(&self) -> &[Cell] {
        &self.changed_cells
    }

    // -- stepping -----------------------------------------------------------

    /// One unit of work: drain the propagation queue if non-empty,
    /// otherwise pick and collapse the next cell.
    pub fn step(&mut self, stop: StopCondition) {
        if self.stopped() {
            return;
        }

        if !self.queue.is_empty() {
            self.drain_queue();
            return;
        }

        match self.pick_cell(stop) {
            Pick::Solved => self.state = SolverState::Solved,
            Pick::NothingForced => self.state = SolverState::Stopped,
            Pick::Cell(cell) => self.collapse(cell),
        }
    }

    /// Invoke [`Self::step`] up to `n` times or until stopped or failed.
    pub fn step_n(&mut self, stop: StopCondition, n: usize) {
        for _ in 0..n {
            if self.stopped() {
                return;
            }
            self.step(stop);
        }
    }

    /// Step until solved or failed.
    pub fn solve(&mut self) {
        while !self.stopped() {
            self.step(StopCondition::StopAtSolved);
        }
    }

    fn drain_queue(&mut self) {
        while let Some(item) = self.queue.pop_front() {
            if !self.apply_filter(item) {
                self.backtrack();
                return;
            }
        }
    }

    /// Re-filter `item.to` against `item.from`. Returns false on a
    /// contradiction (empty option set).
    fn apply_filter(&mut self, item: Filter) -> bool {
        let direction = direction_between(item.from, item.to)
            .expect("queued filters connect adjacent cells");
        let Some(from_sockets) = self.outward_sockets(item.from, direction) else {
            return true;
        };
        let to_index = self.dims.index(item.to);

        let (before, after) = {
            let Self { kinds, tileset, .. } = self;
            let TileKind::Superposition(options) = &mut kinds[to_index] else {
                return true;
            };
            let before = options.len();
            options.retain(|id| {
                tileset
                    .socket(*id, direction.opposite())
                    .is_some_and(|own| from_sockets.iter().any(|s| own.pairs_with(*s)))
            });
            (before, options.len())
        };

        if after == 0 {
            self.current_cell = Some(item.to);
            return false;
        }
        if after != before {
            self.enqueue_neighbors(item.to);
        }
        true
    }

    /// Union of sockets a cell can show toward `direction`.
    fn outward_sockets(&self, cell: Cell, direction: OrthogonalDirection) -> Option<Vec<Socket>> {
        match &self.kinds[self.dims.index(cell)] {
            TileKind::Buffer => Some(vec![Socket::White]),
            TileKind::Fixed { id, .. } => {
                Some(self.tileset.socket(*id, direction).into_iter().collect())
            }
            TileKind::Superposition(options) => {
                let mut sockets: Vec<Socket> = Vec::new();
                for id in options {
                    if let Some(s) = self.tileset.socket(*id, direction) {
                        if !sockets.contains(&s) {
                            sockets.push(s);
                        }
                    }
                }
                Some(sockets)
            }
            TileKind::Unintialized => None,
        }
    }

    fn enqueue_neighbors(&mut self, cell: Cell) {
        for dir in OrthogonalDirection::ALL {
            if let Some(neighbor) = self.dims.neighbor(cell, dir) {
                if self.is_superposition(neighbor) {
                    self.queue.push_back(Filter {
                        from: cell,
                        to: neighbor,
                    });
                }
            }
        }
    }

    fn is_superposition(&self, cell: Cell) -> bool {
        matches!(
            self.kinds[self.dims.index(cell)],
            TileKind::Superposition(_)
        )
    }

    // -- cell selection -----------------------------------------------------

    fn pick_cell(&mut self, stop: StopCondition) -> Pick {
        let mut best: Option<(usize, Vec<Cell>)> = None;
        for index in 0..self.kinds.len() {
            let TileKind::Superposition(options) = &self.kinds[index] else {
                continue;
            };
            let cell = self.dims.cell_from_index(index).expect("index in range");
            let entropy = options.len();
            match &mut best {
                None => best = Some((entropy, vec![cell])),
                Some((min, cells)) => {
                    if entropy < *min {
                        *min = entropy;
                        cells.clear();
                        cells.push(cell);
                    } else if entropy == *min {
                        // Ties collect in index order for reproducibility.
                        cells.push(cell);
                    }
                }
            }
        }

        match best {
            None => Pick::Solved,
            Some((entropy, cells)) => {
                if stop == StopCondition::StopAtEmptySteps && entropy > 1 {
                    return Pick::NothingForced;
                }
                let choice = cells[self.rng.gen_range(0..cells.len())];
                Pick::Cell(choice)
            }
        }
    }

    // -- collapse -----------------------------------------------------------

    /// Collapse a superposition cell to one of its options and schedule
    /// propagation. Exposed for seeded placement; resumes a stopped solver.
    pub fn collapse(&mut self, cell: Cell) {
        if self.state == SolverState::Stopped {
            self.state = SolverState::Running;
        }
        let index = self.dims.index(cell);
        let options = match &self.kinds[index] {
            TileKind::Superposition(options) => options.clone(),
            _ => return,
        };
        if options.is_empty() {
            self.current_cell = Some(cell);
            self.backtrack();
            return;
        }

        let choice = self.weighted_choice(&options);
        self.current_cell = Some(cell);
        self.push_snapshot(cell, choice);

        if self.tileset.is_large(choice) {
            if !self.place_large(cell, choice) {
                self.backtrack();
            }
        } else {
            self.commit_single(cell, choice);
        }
    }

    fn weighted_choice(&mut self, options: &[TileId]) -> TileId {
        let total: f32 = options.iter().map(|id| self.tileset.weight(*id)).sum();
        if total <= 0.0 {
            return options[self.rng.gen_range(0..options.len())];
        }
        let mut roll = self.rng.gen::<f32>() * total;
        for id in options {
            roll -= self.tileset.weight(*id);
            if roll <= 0.0 {
                return *id;
            }
        }
        *options.last().expect("options checked non-empty")
    }

    fn commit_single(&mut self, cell: Cell, id: TileId) {
        let index = self.dims.index(cell);
        self.kinds[index] = TileKind::Fixed { id, parent: None };
        self.changed_cells.push(cell);
        self.enqueue_neighbors(cell);
    }

    /// Atomically place a large tile with its driveway cell at `cell`.
    /// Returns false on any footprint or road-attachment conflict.
    fn place_large(&mut self, cell: Cell, large_id: TileId) -> bool {
        let large = self
            .tileset
            .large(large_id)
            .expect("collapse choice came from the option set")
            .clone();

        let (ax, ay) = large.subgrid_offset(large.anchor_index);
        let Some(top_left) = self
            .dims
            .cell(cell.x() as i32 - ax as i32, cell.y() as i32 - ay as i32)
        else {
            return false;
        };

        // The footprint must lie in bounds, and every covered cell must
        // still admit this lot (or already hold exactly this placement).
        let mut footprint = Vec::with_capacity(large.subgrid.len());
        for sub_index in 0..large.subgrid.len() {
            let (dx, dy) = large.subgrid_offset(sub_index);
            let Some(covered) = self.dims.cell(
                top_left.x() as i32 + dx as i32,
                top_left.y() as i32 + dy as i32,
            ) else {
                return false;
            };
            match &self.kinds[self.dims.index(covered)] {
                TileKind::Superposition(options) if options.contains(&large_id) => {}
                TileKind::Fixed {
                    parent: Some(p), ..
                } if p.large_id == large_id && p.subgrid_index == sub_index => {}
                _ => return false,
            }
            footprint.push((covered, sub_index));
        }

        // The driveway must open onto an already-fixed road whose facing
        // side is a free shoulder.
        let Some(road_cell) = self.dims.neighbor(cell, large.driveway_exit) else {
            return false;
        };
        let road_index = self.dims.index(road_cell);
        let road_id = match &self.kinds[road_index] {
            TileKind::Fixed { id, .. } if id.is_road() => *id,
            _ => return false,
        };
        if road_id.is_lot_anchor() || road_id.connects(large.driveway_exit.opposite()) {
            return false;
        }

        for (covered, sub_index) in footprint {
            let member_id = large.subgrid[sub_index].id;
            self.kinds[self.dims.index(covered)] = TileKind::Fixed {
                id: member_id,
                parent: Some(ParentTile {
                    large_id,
                    subgrid_index: sub_index,
                }),
            };
            self.changed_cells.push(covered);
            self.enqueue_neighbors(covered);
        }

        self.kinds[road_index] = TileKind::Fixed {
            id: road_id.with_anchor(),
            parent: None,
        };
        self.changed_cells.push(road_cell);

        self.placed_lots.push(PlacedLot {
            large_id,
            top_left,
            driveway_cell: cell,
            road_cell,
            anchor_direction: large.driveway_exit.opposite(),
        });
        true
    }

    // -- backtracking -------------------------------------------------------

    fn push_snapshot(&mut self, cell: Cell, tried: TileId) {
        if self.snapshots.len() == SNAPSHOT_STACK_LIMIT {
            self.snapshots.remove(0);
        }
        self.snapshots.push(Snapshot {
            kinds: self.kinds.clone(),
            queue: self.queue.clone(),
            rng: self.rng.clone(),
            placed_lots: self.placed_lots.clone(),
            tried: (cell, tried),
        });
    }

    /// Pop snapshots until one yields a cell with remaining options.
    fn backtrack(&mut self) {
        loop {
            let Some(snapshot) = self.snapshots.pop() else {
                self.state = SolverState::Failed(SolverFailure {
                    reason: "backtrack stack underflow",
                    last_cell: self.current_cell,
                });
                return;
            };

            self.kinds = snapshot.kinds;
            self.queue = snapshot.queue;
            self.rng = snapshot.rng;
            self.placed_lots = snapshot.placed_lots;
            let mut changed = std::mem::take(&mut self.changed_cells);
            changed.retain(|c| self.kinds[self.dims.index(*c)].is_fixed());
            self.changed_cells = changed;

            let (cell, tried) = snapshot.tried;
            let index = self.dims.index(cell);
            let has_options = match &mut self.kinds[index] {
                TileKind::Superposition(options) => {
                    options.retain(|id| *id != tried);
                    !options.is_empty()
                }
                _ => false,
            };
            self.current_cell = Some(cell);
            if has_options {
                self.enqueue_neighbors(cell);
                return;
            }
        }
    }

    // -- materialization ----------------------------------------------------

    /// Materialize the solved (or partially solved) state into a tilemap.
    /// Fixed cells become already-built tiles; undecided cells carry over.
    /// Anchor records are the lot system's job.
    pub fn to_tilemap(&self) -> Tilemap {
        let mut tilemap = Tilemap::new(self.dims);
        for index in 0..self.kinds.len() {
            let cell = self.dims.cell_from_index(index).expect("index in range");
            match &self.kinds[index] {
                TileKind::Fixed { id, parent } => {
                    let (mut tile, _) = crate::tiles::Tile::fixed(*id, *parent);
                    // Materialized tiles skip the construction animation.
                    let _ = tile
                        .fsm
                        .update(crate::config::TILE_BUILD_SECONDS + 0.001, &());
                    tilemap.set_tile(cell, tile);
                }
                TileKind::Buffer => tilemap.set_tile(cell, crate::tiles::Tile::buffer()),
                TileKind::Superposition(options) => tilemap
                    .set_tile(cell, crate::tiles::Tile::superposition(options.clone())),
                TileKind::Unintialized => {}
            }
        }
        tilemap
    }

    /// Direct access to the working cell kinds, index-ordered.
    pub fn kinds(&self) -> &[TileKind] {
        &self.kinds
    }
}

enum Pick {
    Solved,
    NothingForced,
    Cell(Cell),
}

fn direction_between(from: Cell, to: Cell) -> Option<OrthogonalDirection> {
    let dx = to.x() as i32 - from.x() as i32;
    let dy = to.y() as i32 - from.y() as i32;
    match (dx, dy) {
        (0, -1) => Some(OrthogonalDirection::Up),
        (-1, 0) => Some(OrthogonalDirection::Left),
        (1, 0) => Some(OrthogonalDirection::Right),
        (0, 1) => Some(OrthogonalDirection::Down),
        _ => None,
    }
}

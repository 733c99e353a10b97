//! Lot instances: the entities large tiles expand into.
//!
//! A lot owns its parking spots, each with precomputed driveway splines in
//! and out, and a reservation field that acts as the single serialization
//! point for the parking protocol: at most one car may hold a spot, and a
//! per-lot parking lock serializes concurrent unparking maneuvers.

use bevy::math::Rect;
use bevy::prelude::*;

use crate::config::{CELL_SIZE, RESIDENT_SPAWN_DELAY};
use crate::event_queue::{ScheduledEvents, SimTime, WorldEvent};
use crate::grid::{Cell, OrthogonalDirection, TilemapDims};
use crate::road_network::driveway_node_positions;
use crate::simulation_sets::SimulationSet;
use crate::splines::CubicSpline;
use crate::tilemap::{Anchor, Tilemap};
use crate::tiles::TileId;
use crate::tileset::{LargeTile, LotKind, Tileset};
use crate::wfc::PlacedLot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParkingSpotId(pub usize);

/// Hands out lot ids, stable within a session.
#[derive(Resource, Debug, Default)]
pub struct LotIdAllocator {
    next: u32,
}

impl LotIdAllocator {
    pub fn allocate(&mut self) -> LotId {
        let id = LotId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone)]
pub struct ParkingSpot {
    pub id: ParkingSpotId,
    pub position: Vec2,
    pub orientation: OrthogonalDirection,
    /// Driveway geometry from the lot entry node to this spot.
    pub from_entry: Vec<CubicSpline>,
    /// Driveway geometry from this spot to the lot exit node.
    pub to_exit: Vec<CubicSpline>,
    pub reserved_by: Option<Entity>,
}

/// A lot instance expanded from a large tile.
#[derive(Component, Debug, Clone)]
pub struct Lot {
    pub id: LotId,
    pub kind: LotKind,
    pub large_id: TileId,
    /// Direction from the driveway cell toward the anchor road.
    pub driveway_exit: OrthogonalDirection,
    /// Facing of parked cars: nose-in, away from the road.
    pub spot_orientation: OrthogonalDirection,
    pub width: usize,
    pub height: usize,
    /// Bottom-left corner of the footprint in meters.
    pub position: Vec2,
    pub bounds: Rect,
    pub top_left_cell: Cell,
    pub driveway_cell: Cell,
    pub road_cell: Cell,
    pub spots: Vec<ParkingSpot>,
    /// Car currently performing an unparking maneuver, if any. Other cars
    /// wait until the lock clears.
    pub parking_lock: Option<Entity>,
}

impl Lot {
    pub fn from_placement(
        placed: &PlacedLot,
        large: &LargeTile,
        dims: &TilemapDims,
        id: LotId,
    ) -> Self {
        let into_lot = placed.anchor_direction;
        let out_of_lot = into_lot.opposite();
        let (entry_pos, exit_pos) = driveway_node_positions(dims, placed.road_cell, into_lot);

        // Footprint bounds: from the bottom-left cell's bottom-left corner
        // to the top-right cell's top-right corner.
        let bottom_left_cell = dims
            .cell(
                placed.top_left.x() as i32,
                placed.top_left.y() as i32 + large.height as i32 - 1,
            )
            .unwrap_or(placed.top_left);
        let position = dims.bottom_left(bottom_left_cell);
        let size = Vec2::new(
            large.width as f32 * CELL_SIZE,
            large.height as f32 * CELL_SIZE,
        );
        let bounds = Rect::from_corners(position, position + size);

        let driveway_center = dims.center(placed.driveway_cell);
        let into_vec = into_lot.as_vec();
        let lateral = into_vec.perp();
        let spread = large.parking_spots.saturating_sub(1) as f32 * 1.75;

        let spots = (0..large.parking_spots)
            .map(|i| {
                let offset = lateral * (i as f32 * 3.5 - spread);
                let spot_pos = driveway_center + into_vec * 5.0 + offset;
                ParkingSpot {
                    id: ParkingSpotId(i),
                    position: spot_pos,
                    orientation: into_lot,
                    from_entry: vec![CubicSpline::from_endpoints(
                        entry_pos, into_vec, spot_pos, into_vec, 0.4,
                    )],
                    to_exit: vec![CubicSpline::from_endpoints(
                        spot_pos,
                        out_of_lot.as_vec(),
                        exit_pos,
                        out_of_lot.as_vec(),
                        0.4,
                    )],
                    reserved_by: None,
                }
            })
            .collect();

        Self {
            id,
            kind: large.kind,
            large_id: placed.large_id,
            driveway_exit: out_of_lot,
            spot_orientation: into_lot,
            width: large.width,
            height: large.height,
            position,
            bounds,
            top_left_cell: placed.top_left,
            driveway_cell: placed.driveway_cell,
            road_cell: placed.road_cell,
            spots,
            parking_lock: None,
        }
    }

    pub fn spot(&self, id: ParkingSpotId) -> Option<&ParkingSpot> {
        self.spots.get(id.0)
    }

    /// First unreserved spot, if any.
    pub fn free_spot(&self) -> Option<ParkingSpotId> {
        self.spots
            .iter()
            .find(|s| s.reserved_by.is_none())
            .map(|s| s.id)
    }

    /// Atomic reservation swap: succeeds only when the spot is free.
    pub fn try_reserve(&mut self, spot: ParkingSpotId, car: Entity) -> bool {
        match self.spots.get_mut(spot.0) {
            Some(s) if s.reserved_by.is_none() => {
                s.reserved_by = Some(car);
                true
            }
            _ => false,
        }
    }

    /// Release a reservation; only the holder may release.
    pub fn release(&mut self, spot: ParkingSpotId, car: Entity) -> bool {
        match self.spots.get_mut(spot.0) {
            Some(s) if s.reserved_by == Some(car) => {
                s.reserved_by = None;
                true
            }
            _ => false,
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.spots.iter().filter(|s| s.reserved_by.is_some()).count()
    }
}

/// Fix a lot's subgrid tiles and anchor its road cell directly, without
/// going through the solver. Used by savegame restore (and tests) to
/// reinstate lots recorded as `[kind, x, y]` triples. Returns `None` when
/// the footprint or its road attachment does not fit the current tilemap.
pub fn restore_lot_footprint(
    tilemap: &mut Tilemap,
    tileset: &Tileset,
    large_id: TileId,
    top_left: Cell,
) -> Option<PlacedLot> {
    let large = tileset.large(large_id)?.clone();
    let dims = tilemap.dims();
    let (ax, ay) = large.subgrid_offset(large.anchor_index);
    let driveway = dims.cell(
        top_left.x() as i32 + ax as i32,
        top_left.y() as i32 + ay as i32,
    )?;
    let road_cell = dims.neighbor(driveway, large.driveway_exit)?;
    let road_id = tilemap
        .tile(road_cell)
        .kind
        .fixed_id()
        .filter(|id| id.is_road())?;

    // Validate the whole footprint before touching any tile.
    let mut members = Vec::with_capacity(large.subgrid.len());
    for (index, member) in large.subgrid.iter().enumerate() {
        let (dx, dy) = large.subgrid_offset(index);
        let cell = dims.cell(
            top_left.x() as i32 + dx as i32,
            top_left.y() as i32 + dy as i32,
        )?;
        members.push((cell, member.id, index));
    }
    for (cell, member_id, index) in members {
        tilemap.fix_tile(
            cell,
            member_id,
            Some(crate::tiles::ParentTile {
                large_id,
                subgrid_index: index,
            }),
        );
    }
    tilemap.refix_id(road_cell, road_id.with_anchor());

    Some(PlacedLot {
        large_id,
        top_left,
        driveway_cell: driveway,
        road_cell,
        anchor_direction: large.driveway_exit.opposite(),
    })
}

/// Sent when the solver commits a new lot footprint.
#[derive(Event, Debug, Clone, Copy)]
pub struct LotPlacedEvent(pub PlacedLot);

/// Sent when a lot's tile is bulldozed; cascades to resident despawns.
#[derive(Event, Debug, Clone, Copy)]
pub struct LotRemovedEvent {
    pub entity: Entity,
    pub lot_id: LotId,
}

/// Spawn lot entities for freshly committed large tiles, record their
/// anchors on the tilemap, and schedule their residents.
pub fn spawn_placed_lots(
    mut commands: Commands,
    mut placed_events: EventReader<LotPlacedEvent>,
    mut tilemap: ResMut<Tilemap>,
    mut allocator: ResMut<LotIdAllocator>,
    mut scheduled: ResMut<ScheduledEvents>,
    sim_time: Res<SimTime>,
    tileset: Res<Tileset>,
) {
    for LotPlacedEvent(placed) in placed_events.read() {
        let Some(large) = tileset.large(placed.large_id) else {
            warn!("placed lot references unknown large tile {:?}", placed.large_id);
            continue;
        };
        let id = allocator.allocate();
        let dims = tilemap.dims();
        let lot = Lot::from_placement(placed, large, &dims, id);

        tilemap.add_anchor(
            placed.road_cell,
            Anchor {
                lot_id: id,
                direction: placed.anchor_direction,
                entry_cell: placed.driveway_cell,
            },
        );

        if lot.kind == LotKind::Residential {
            scheduled.schedule(
                WorldEvent::SpawnResident { lot: id, make: None },
                sim_time.0 + RESIDENT_SPAWN_DELAY,
            );
        }
        info!("lot {:?} placed at {}", id, placed.top_left);
        commands.spawn(lot);
    }
}

/// Tear down removed lots: despawn the entity and drop its anchors.
/// Cars homed at the lot react in the car systems via the same event.
pub fn remove_lots(
    mut commands: Commands,
    mut removed: EventReader<LotRemovedEvent>,
    mut tilemap: ResMut<Tilemap>,
) {
    for event in removed.read() {
        tilemap.remove_anchors_for_lot(event.lot_id);
        commands.entity(event.entity).despawn();
        info!("lot {:?} removed", event.lot_id);
    }
}

pub struct LotsPlugin;

impl Plugin for LotsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LotIdAllocator>()
            .add_event::<LotPlacedEvent>()
            .add_event::<LotRemovedEvent>()
            .add_systems(
                FixedUpdate,
                (spawn_placed_lots, remove_lots)
                    .chain()
                    .after(crate::rebuild::advance_active_solve)
                    .in_set(SimulationSet::PreSim),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TilemapDims;
    use crate::tileset::Tileset;

    fn sample_lot() -> Lot {
        let dims = TilemapDims::new(8, 8);
        let tileset = Tileset::standard();
        let large = tileset.large(TileId(64)).unwrap();
        let placed = PlacedLot {
            large_id: TileId(64),
            top_left: dims.cell(3, 3).unwrap(),
            driveway_cell: dims.cell(3, 4).unwrap(),
            road_cell: dims.cell(3, 5).unwrap(),
            anchor_direction: OrthogonalDirection::Up,
        };
        Lot::from_placement(&placed, large, &dims, LotId(0))
    }

    #[test]
    fn test_lot_geometry() {
        let lot = sample_lot();
        assert_eq!((lot.width, lot.height), (2, 2));
        assert_eq!(lot.spots.len(), 2);
        // All spots sit inside the lot bounds.
        for spot in &lot.spots {
            assert!(lot.bounds.contains(spot.position), "{:?}", spot.position);
            assert!(!spot.from_entry.is_empty());
            assert!(!spot.to_exit.is_empty());
            assert!(spot.from_entry.iter().all(|s| s.length() > 0.0));
        }
        // The footprint covers exactly width × height cells.
        assert_eq!(
            lot.bounds.size(),
            Vec2::new(2.0 * CELL_SIZE, 2.0 * CELL_SIZE)
        );
    }

    #[test]
    fn test_reservation_swap_is_exclusive() {
        let mut lot = sample_lot();
        let car_a = Entity::from_raw(1);
        let car_b = Entity::from_raw(2);

        let spot = lot.free_spot().unwrap();
        assert!(lot.try_reserve(spot, car_a));
        // The losing car's swap fails; it must pick another spot.
        assert!(!lot.try_reserve(spot, car_b));
        let other = lot.free_spot().unwrap();
        assert_ne!(other, spot);
        assert!(lot.try_reserve(other, car_b));
        assert_eq!(lot.free_spot(), None);

        // Only the holder may release.
        assert!(!lot.release(spot, car_b));
        assert!(lot.release(spot, car_a));
        assert_eq!(lot.free_spot(), Some(spot));
    }
}

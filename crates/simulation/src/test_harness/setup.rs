//! Builder methods for editing the map and standing up fixtures in tests.

use bevy::prelude::*;

use crate::cars::{Car, CarMakeId, CarState};
use crate::editor::{ActionQueue, EditorAction};
use crate::event_queue::{ScheduledEvents, SimTime, WorldEvent};
use crate::grid::Cell;
use crate::lots::LotPlacedEvent;
use crate::rebuild::{ActiveSolve, SolveCompletedEvent};
use crate::tilemap::Tilemap;
use crate::tiles::TileId;
use crate::tileset::Tileset;

use super::TestWorld;

impl TestWorld {
    pub fn cell(&self, x: i32, y: i32) -> Cell {
        self.app
            .world()
            .resource::<Tilemap>()
            .dims()
            .cell(x, y)
            .expect("test coordinates are in bounds")
    }

    /// Queue a primary (place road) action.
    pub fn place_road(&mut self, x: i32, y: i32) -> &mut Self {
        let cell = self.cell(x, y);
        self.app
            .world_mut()
            .resource_mut::<ActionQueue>()
            .push(EditorAction::Primary(cell));
        self
    }

    /// Queue a secondary (bulldoze) action.
    pub fn bulldoze(&mut self, x: i32, y: i32) -> &mut Self {
        let cell = self.cell(x, y);
        self.app
            .world_mut()
            .resource_mut::<ActionQueue>()
            .push(EditorAction::Secondary(cell));
        self
    }

    /// Run the edit debounce out and step the solver until it terminates,
    /// plus one tick so the network rebuild and lot spawns settle.
    pub fn solve_now(&mut self) -> &mut Self {
        self.tick_seconds(crate::config::TILEMAP_CHANGE_DEBOUNCE + 0.05);
        for _ in 0..10_000 {
            if self
                .app
                .world()
                .resource::<ActiveSolve>()
                .solver
                .is_none()
            {
                break;
            }
            self.tick(1);
        }
        self.tick(2);
        self
    }

    /// Commit a lot placement directly, bypassing the solver: fixes the
    /// footprint tiles and the anchored road, then runs the lot spawn and
    /// network rebuild. The road cell must already hold a road.
    pub fn place_lot_manually(&mut self, large_id: u8, top_left_x: i32, top_left_y: i32) {
        let top_left = self.cell(top_left_x, top_left_y);
        let placed = {
            let world = self.app.world_mut();
            let tileset = world.resource::<Tileset>().clone();
            let mut tilemap = world.resource_mut::<Tilemap>();
            crate::lots::restore_lot_footprint(&mut tilemap, &tileset, TileId(large_id), top_left)
                .expect("lot placement fits the test map")
        };
        self.app.world_mut().send_event(LotPlacedEvent(placed));
        self.app
            .world_mut()
            .send_event(SolveCompletedEvent { solved: true });
        self.tick(2);
    }

    /// Spawn a car directly into the world.
    pub fn spawn_car(&mut self, state: CarState, position: Vec2, orientation: f32) -> Entity {
        let car = Car::new(CarMakeId(0), state, position, orientation);
        self.app.world_mut().spawn(car).id()
    }

    /// Schedule a world event for the next environment tick.
    pub fn schedule_event(&mut self, event: WorldEvent) {
        let now = self.app.world().resource::<SimTime>().0;
        self.app
            .world_mut()
            .resource_mut::<ScheduledEvents>()
            .schedule(event, now);
    }
}

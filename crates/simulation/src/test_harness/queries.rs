//! Query helpers for `TestWorld`.

use bevy::prelude::*;

use crate::cars::{Car, CarState};
use crate::lots::Lot;
use crate::road_network::RoadNetwork;
use crate::tilemap::Tilemap;
use crate::tiles::TileId;
use crate::traffic_lights::TrafficLight;

use super::TestWorld;

impl TestWorld {
    pub fn tilemap(&self) -> &Tilemap {
        self.app.world().resource::<Tilemap>()
    }

    pub fn network(&self) -> &RoadNetwork {
        self.app.world().resource::<RoadNetwork>()
    }

    /// Fixed tile id at a cell, `None` while undecided.
    pub fn tile_id(&self, x: i32, y: i32) -> Option<TileId> {
        let cell = self.cell(x, y);
        self.tilemap().tile(cell).kind.fixed_id()
    }

    /// Owned snapshot of every car.
    pub fn cars(&mut self) -> Vec<(Entity, Car)> {
        let world = self.app.world_mut();
        let mut query = world.query::<(Entity, &Car)>();
        query
            .iter(world)
            .map(|(entity, car)| (entity, car.clone()))
            .collect()
    }

    pub fn car(&mut self, entity: Entity) -> Option<Car> {
        self.app.world().get::<Car>(entity).cloned()
    }

    pub fn car_states(&mut self) -> Vec<CarState> {
        self.cars().into_iter().map(|(_, car)| car.state()).collect()
    }

    /// Owned snapshot of every lot.
    pub fn lots(&mut self) -> Vec<(Entity, Lot)> {
        let world = self.app.world_mut();
        let mut query = world.query::<(Entity, &Lot)>();
        query
            .iter(world)
            .map(|(entity, lot)| (entity, lot.clone()))
            .collect()
    }

    /// Owned snapshot of every traffic light.
    pub fn lights(&mut self) -> Vec<TrafficLight> {
        let world = self.app.world_mut();
        let mut query = world.query::<&TrafficLight>();
        query.iter(world).cloned().collect()
    }
}

//! Cars: component data, the make registry, the per-car state machine, and
//! the world-event executor that spawns, routes, and parks them.
//!
//! A car's position, orientation, shape, and bounding box are kept
//! consistent every frame: the shape is the make's body rectangle placed at
//! the current frame, the bbox is the shape's bounds.

use bevy::math::Rect;
use bevy::prelude::*;

use crate::app_state::AppState;
use crate::config::{
    DESPAWN_TIMEOUT_SECONDS, RESIDENT_IDLE_SECONDS, UNPARKING_COMPLETION_RADIUS,
};
use crate::event_queue::{EnvironmentTimer, ScheduledEvents, SimTime, WorldEvent};
use crate::fsm::{Fsm, FsmState, Transition};
use crate::lots::{Lot, LotId, LotRemovedEvent, ParkingSpotId};
use crate::road_network::RoadNetwork;
use crate::route::{
    route_between_nodes, route_from_parking_spot, route_to_parking_spot, Route,
};
use crate::sim_rng::SimRng;
use crate::simulation_sets::SimulationSet;
use crate::tilemap::Tilemap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CarMakeId(pub usize);

/// Static description of a car model.
#[derive(Debug, Clone, Copy)]
pub struct CarMake {
    pub id: CarMakeId,
    pub name: &'static str,
    /// Body length and width in meters.
    pub length: f32,
    pub width: f32,
    /// Top speed, m/s.
    pub max_velocity: f32,
    /// Acceleration and braking limits, m/s².
    pub max_acceleration: f32,
    pub max_deceleration: f32,
}

const CAR_MAKES: [CarMake; 3] = [
    CarMake {
        id: CarMakeId(0),
        name: "hatchback",
        length: 4.2,
        width: 1.9,
        max_velocity: 11.1,
        max_acceleration: 5.0,
        max_deceleration: 20.0,
    },
    CarMake {
        id: CarMakeId(1),
        name: "sedan",
        length: 4.6,
        width: 1.9,
        max_velocity: 11.1,
        max_acceleration: 4.5,
        max_deceleration: 18.0,
    },
    CarMake {
        id: CarMakeId(2),
        name: "van",
        length: 5.4,
        width: 2.0,
        max_velocity: 10.0,
        max_acceleration: 4.0,
        max_deceleration: 16.0,
    },
];

pub fn car_makes() -> &'static [CarMake] {
    &CAR_MAKES
}

pub fn car_make(id: CarMakeId) -> &'static CarMake {
    &CAR_MAKES[id.0.min(CAR_MAKES.len() - 1)]
}

/// Random destination picks tried before a routing request gives up for
/// this drain. The solver may grow road fragments the origin cannot reach.
const DESTINATION_ATTEMPTS: usize = 8;

/// Per-car lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarState {
    Parked,
    Unparking,
    Driving,
    WaitingForParkingSpot,
    Parking,
    Despawning,
    Queued,
}

impl CarState {
    /// States in which the car follows its path.
    pub fn is_moving(self) -> bool {
        matches!(
            self,
            CarState::Unparking | CarState::Driving | CarState::Parking | CarState::Despawning
        )
    }
}

/// Notable car transitions, emitted for the host (audio, logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarAction {
    UnparkingStarted,
    UnparkingComplete,
    ParkingStarted,
    ParkingComplete,
    DespawnComplete,
    EnteredQueue,
}

/// Context the car FSM conditions read each update.
#[derive(Debug, Clone, Copy)]
pub struct CarContext {
    pub velocity: f32,
    pub route_is_routed: bool,
    pub route_is_arriving_to_spot: bool,
    pub route_is_unrouted: bool,
    pub distance_to_route_start: f32,
}

fn route_set(ctx: &CarContext) -> bool {
    ctx.route_is_routed
}

fn reached_route_start(ctx: &CarContext) -> bool {
    ctx.distance_to_route_start <= UNPARKING_COMPLETION_RADIUS
}

fn arriving_to_spot(ctx: &CarContext) -> bool {
    ctx.route_is_arriving_to_spot
}

fn waiting_for_route(ctx: &CarContext) -> bool {
    ctx.route_is_unrouted
}

fn nearly_stopped(ctx: &CarContext) -> bool {
    ctx.velocity <= 0.05
}

impl FsmState for CarState {
    type Context = CarContext;
    type Action = CarAction;

    fn transitions(&self) -> Vec<Transition<Self, CarContext, CarAction>> {
        match self {
            CarState::Parked => vec![
                Transition::condition(CarState::Unparking, route_set),
                Transition::direct(CarState::Despawning),
            ],
            CarState::Unparking => vec![
                Transition::condition(CarState::Driving, reached_route_start)
                    .with_actions(vec![CarAction::UnparkingComplete]),
                Transition::direct(CarState::Despawning),
            ],
            CarState::Driving => vec![
                Transition::direct(CarState::Parking),
                Transition::direct(CarState::WaitingForParkingSpot),
                Transition::direct(CarState::Despawning),
            ],
            CarState::WaitingForParkingSpot => vec![
                Transition::condition(CarState::Parking, arriving_to_spot),
                Transition::direct(CarState::Despawning),
            ],
            CarState::Parking => vec![
                Transition::condition(CarState::Parked, waiting_for_route)
                    .with_actions(vec![CarAction::ParkingComplete]),
                Transition::direct(CarState::Despawning),
            ],
            CarState::Despawning => vec![
                Transition::condition(CarState::Queued, nearly_stopped)
                    .with_actions(vec![CarAction::DespawnComplete]),
                Transition::timed(CarState::Queued, DESPAWN_TIMEOUT_SECONDS)
                    .with_actions(vec![CarAction::DespawnComplete]),
            ],
            CarState::Queued => vec![
                Transition::direct(CarState::Parked),
                Transition::direct(CarState::Driving),
            ],
        }
    }

    fn entry_actions(&self) -> Vec<CarAction> {
        match self {
            CarState::Unparking => vec![CarAction::UnparkingStarted],
            CarState::Parking => vec![CarAction::ParkingStarted],
            CarState::Queued => vec![CarAction::EnteredQueue],
            _ => Vec::new(),
        }
    }
}

/// A car in the world.
#[derive(Component, Debug, Clone)]
pub struct Car {
    pub make: CarMakeId,
    pub fsm: Fsm<CarState>,
    pub position: Vec2,
    /// Heading in radians.
    pub orientation: f32,
    /// Forward speed along the path, m/s.
    pub velocity: f32,
    pub angular_velocity: f32,
    /// Body polygon at the current frame.
    pub shape: [Vec2; 4],
    pub bbox: Rect,
    pub route: Route,
    pub home_lot: Option<LotId>,
    /// Exclusive claim on a parking spot while parked / parking /
    /// unparking.
    pub parking_reservation: Option<(Entity, LotId, ParkingSpotId)>,
}

impl Car {
    pub fn new(make: CarMakeId, state: CarState, position: Vec2, orientation: f32) -> Self {
        let (fsm, _) = Fsm::new(state);
        let mut car = Self {
            make,
            fsm,
            position,
            orientation,
            velocity: 0.0,
            angular_velocity: 0.0,
            shape: [Vec2::ZERO; 4],
            bbox: Rect::default(),
            route: Route::Unrouted,
            home_lot: None,
            parking_reservation: None,
        };
        car.refresh_shape();
        car
    }

    pub fn make(&self) -> &'static CarMake {
        car_make(self.make)
    }

    pub fn state(&self) -> CarState {
        *self.fsm.current()
    }

    /// Re-place the body polygon and bbox at the current frame.
    pub fn refresh_shape(&mut self) {
        let make = self.make();
        let forward = Vec2::from_angle(self.orientation);
        let side = forward.perp();
        let half_l = forward * (make.length / 2.0);
        let half_w = side * (make.width / 2.0);
        self.shape = [
            self.position + half_l + half_w,
            self.position + half_l - half_w,
            self.position - half_l - half_w,
            self.position - half_l + half_w,
        ];
        let mut min = self.shape[0];
        let mut max = self.shape[0];
        for corner in &self.shape[1..] {
            min = min.min(*corner);
            max = max.max(*corner);
        }
        self.bbox = Rect::from_corners(min, max);
    }

    pub fn context(&self) -> CarContext {
        let distance_to_route_start = match &self.route {
            Route::Routed {
                start_node_position,
                ..
            } => self.position.distance(*start_node_position),
            _ => f32::MAX,
        };
        CarContext {
            velocity: self.velocity,
            route_is_routed: self.route.is_routed(),
            route_is_arriving_to_spot: self.route.is_arriving_to_spot(),
            route_is_unrouted: matches!(self.route, Route::Unrouted),
            distance_to_route_start,
        }
    }

    /// Mark the car for removal: the path ends at the current spline's end
    /// and the car brakes to a halt before leaving the world.
    pub fn trigger_despawn(&mut self) {
        if let Some(path) = self.route.path_mut() {
            path.truncate_after_current();
        }
        // Err means the car is already queued or despawning.
        let _ = self.fsm.transition_to(CarState::Despawning);
    }
}

/// Outbound notification of a car FSM action.
#[derive(Event, Debug, Clone, Copy)]
pub struct CarStateChangedEvent {
    pub car: Entity,
    pub action: CarAction,
}

/// Queue test-car spawns, one per environment tick's drain.
pub fn schedule_test_cars(scheduled: &mut ScheduledEvents, now: f64, amount: usize) {
    for i in 0..amount {
        scheduled.schedule(WorldEvent::SpawnTestCar, now + i as f64 * 0.25);
    }
}

/// Drain due world events and apply them. Runs on the environment tick,
/// first thing in the tick order.
#[allow(clippy::too_many_arguments)]
pub fn process_world_events(
    mut commands: Commands,
    env: Res<EnvironmentTimer>,
    sim_time: Res<SimTime>,
    mut scheduled: ResMut<ScheduledEvents>,
    mut rng: ResMut<SimRng>,
    network: Res<RoadNetwork>,
    mut lots: Query<(Entity, &mut Lot)>,
    mut cars: Query<&mut Car>,
) {
    if !env.just_ticked() {
        return;
    }
    let now = sim_time.0;

    for event in scheduled.drain_due(now) {
        let outcome = apply_world_event(
            &event.event,
            &mut commands,
            now,
            &mut scheduled,
            &mut rng,
            &network,
            &mut lots,
            &mut cars,
        );
        if outcome == Outcome::NotReady && !scheduled.retry(event.clone(), now) {
            warn!("dropping event after retry cap: {:?}", event.event);
            // A car waiting on the dropped event would wait forever.
            match event.event {
                WorldEvent::BeginCarParking { car, .. }
                | WorldEvent::CreateRouteFromNode { car }
                | WorldEvent::CreateRouteFromParkingSpot { car } => {
                    if let Ok(mut car) = cars.get_mut(car) {
                        car.trigger_despawn();
                    }
                }
                _ => {}
            }
        }
    }
}

#[derive(PartialEq)]
enum Outcome {
    Done,
    NotReady,
}

#[allow(clippy::too_many_arguments)]
fn apply_world_event(
    event: &WorldEvent,
    commands: &mut Commands,
    now: f64,
    scheduled: &mut ScheduledEvents,
    rng: &mut SimRng,
    network: &RoadNetwork,
    lots: &mut Query<(Entity, &mut Lot)>,
    cars: &mut Query<&mut Car>,
) -> Outcome {
    use rand::Rng as _;

    match *event {
        WorldEvent::None => Outcome::Done,

        WorldEvent::SpawnResident { lot, make } => {
            let Some((lot_entity, mut lot_data)) =
                lots.iter_mut().find(|(_, l)| l.id == lot)
            else {
                // The lot is gone; nothing to spawn.
                return Outcome::Done;
            };
            let Some(spot_id) = lot_data.free_spot() else {
                return Outcome::NotReady;
            };
            let spot = lot_data.spot(spot_id).expect("free spot exists").clone();

            let make =
                make.unwrap_or_else(|| CarMakeId(rng.rng().gen_range(0..car_makes().len())));
            let entity = commands.spawn_empty().id();
            if !lot_data.try_reserve(spot_id, entity) {
                commands.entity(entity).despawn();
                return Outcome::NotReady;
            }

            let mut car = Car::new(
                make,
                CarState::Parked,
                spot.position,
                spot.orientation.as_vec().to_angle(),
            );
            car.home_lot = Some(lot);
            car.parking_reservation = Some((lot_entity, lot, spot_id));
            commands.entity(entity).insert(car);

            scheduled.schedule(
                WorldEvent::CreateRouteFromParkingSpot { car: entity },
                now + RESIDENT_IDLE_SECONDS,
            );
            info!("resident spawned at lot {:?}", lot);
            Outcome::Done
        }

        WorldEvent::SpawnTestCar => {
            let Some(start) = network.random_lane_connector(rng.rng()) else {
                return Outcome::NotReady;
            };
            let start = *start;
            let mut route = None;
            for _ in 0..DESTINATION_ATTEMPTS {
                let Some(end) = network.random_lane_connector(rng.rng()).map(|n| n.id) else {
                    break;
                };
                if let Some(found) = route_between_nodes(network, start.id, end) {
                    route = Some(found);
                    break;
                }
            }
            let Some(route) = route else {
                return Outcome::NotReady;
            };

            let make = CarMakeId(rng.rng().gen_range(0..car_makes().len()));
            let mut car = Car::new(
                make,
                CarState::Driving,
                start.position,
                start.direction.as_vec().to_angle(),
            );
            car.route = route;
            commands.spawn(car);
            Outcome::Done
        }

        WorldEvent::CreateRouteFromParkingSpot { car } => {
            let Ok(mut car_data) = cars.get_mut(car) else {
                return Outcome::Done;
            };
            if car_data.state() != CarState::Parked {
                return Outcome::NotReady;
            }
            let Some((lot_entity, _, spot)) = car_data.parking_reservation else {
                return Outcome::Done;
            };
            let Ok((_, mut lot_data)) = lots.get_mut(lot_entity) else {
                return Outcome::Done;
            };
            // One unparking maneuver per lot at a time.
            if lot_data.parking_lock.is_some_and(|locked| locked != car) {
                return Outcome::NotReady;
            }
            let mut route = None;
            for _ in 0..DESTINATION_ATTEMPTS {
                let Some(destination) = network.random_lane_connector(rng.rng()).map(|n| n.id)
                else {
                    break;
                };
                if let Some(found) =
                    route_from_parking_spot(network, &lot_data, spot, destination)
                {
                    route = Some(found);
                    break;
                }
            }
            let Some(route) = route else {
                return Outcome::NotReady;
            };
            lot_data.parking_lock = Some(car);
            car_data.route = route;
            Outcome::Done
        }

        WorldEvent::CreateRouteFromNode { car } => {
            let Ok(mut car_data) = cars.get_mut(car) else {
                return Outcome::Done;
            };
            let Some(from) = network.node_near(car_data.position, 8.0).map(|n| n.id) else {
                return Outcome::NotReady;
            };
            let mut route = None;
            for _ in 0..DESTINATION_ATTEMPTS {
                let Some(to) = network.random_lane_connector(rng.rng()).map(|n| n.id) else {
                    break;
                };
                if let Some(found) = route_between_nodes(network, from, to) {
                    route = Some(found);
                    break;
                }
            }
            let Some(route) = route else {
                return Outcome::NotReady;
            };
            car_data.route = route;
            Outcome::Done
        }

        WorldEvent::BeginCarParking { car, lot } => {
            let Ok(mut car_data) = cars.get_mut(car) else {
                return Outcome::Done;
            };
            let Some((lot_entity, mut lot_data)) =
                lots.iter_mut().find(|(_, l)| l.id == lot)
            else {
                // Home lot disappeared while driving.
                car_data.trigger_despawn();
                return Outcome::Done;
            };
            let Some(spot_id) = lot_data.free_spot() else {
                return Outcome::NotReady;
            };
            if !lot_data.try_reserve(spot_id, car) {
                // Lost the race; ask again for a fresh spot.
                return Outcome::NotReady;
            }
            let Some(from) = network.node_near(car_data.position, 8.0).map(|n| n.id) else {
                lot_data.release(spot_id, car);
                return Outcome::NotReady;
            };
            let Some(route) =
                route_to_parking_spot(network, from, lot_entity, &lot_data, spot_id)
            else {
                lot_data.release(spot_id, car);
                return Outcome::NotReady;
            };
            car_data.parking_reservation = Some((lot_entity, lot, spot_id));
            car_data.route = route;
            Outcome::Done
        }
    }
}

/// Advance every car FSM and apply the side effects of its actions.
fn update_car_fsms(
    time: Res<Time>,
    mut cars: Query<(Entity, &mut Car)>,
    mut lots: Query<&mut Lot>,
    mut state_events: EventWriter<CarStateChangedEvent>,
) {
    let delta = time.delta_secs();
    for (entity, mut car) in &mut cars {
        let mut actions = Vec::new();
        // A parking route granted mid-drive sends the car straight into
        // its parking maneuver.
        if car.state() == CarState::Driving && car.route.is_arriving_to_spot() {
            if let Ok(granted) = car.fsm.transition_to(CarState::Parking) {
                actions.extend(granted);
            }
        }
        let ctx = car.context();
        actions.extend(car.fsm.update(delta, &ctx));
        for action in actions {
            state_events.send(CarStateChangedEvent {
                car: entity,
                action,
            });
            match action {
                CarAction::UnparkingStarted => {}
                CarAction::UnparkingComplete => {
                    if let Some((lot_entity, _, spot)) = car.parking_reservation.take() {
                        if let Ok(mut lot) = lots.get_mut(lot_entity) {
                            lot.release(spot, entity);
                            if lot.parking_lock == Some(entity) {
                                lot.parking_lock = None;
                            }
                        }
                    }
                }
                CarAction::ParkingStarted => {}
                CarAction::ParkingComplete => {
                    // Settle exactly onto the reserved spot.
                    if let Some((lot_entity, _, spot)) = car.parking_reservation {
                        if let Ok(lot) = lots.get_mut(lot_entity) {
                            if let Some(spot) = lot.spot(spot) {
                                car.position = spot.position;
                                car.orientation = spot.orientation.as_vec().to_angle();
                            }
                        }
                    }
                    car.velocity = 0.0;
                    car.refresh_shape();
                }
                CarAction::DespawnComplete | CarAction::EnteredQueue => {
                    if let Some((lot_entity, _, spot)) = car.parking_reservation.take() {
                        if let Ok(mut lot) = lots.get_mut(lot_entity) {
                            lot.release(spot, entity);
                            if lot.parking_lock == Some(entity) {
                                lot.parking_lock = None;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// When a parked resident finishes a trip, it asks to park at home again;
/// roaming test cars pick a fresh destination instead.
fn reroute_finished_cars(
    mut cars: Query<(Entity, &mut Car)>,
    mut scheduled: ResMut<ScheduledEvents>,
    sim_time: Res<SimTime>,
) {
    for (entity, mut car) in &mut cars {
        if car.state() != CarState::Driving {
            continue;
        }
        let finished = car.route.path().is_some_and(|p| p.finished());
        if !finished || !car.route.is_routed() {
            continue;
        }
        car.route = Route::Unrouted;
        match car.home_lot {
            Some(lot) => {
                scheduled.schedule(WorldEvent::BeginCarParking { car: entity, lot }, sim_time.0);
                let _ = car.fsm.transition_to(CarState::WaitingForParkingSpot);
            }
            None => {
                scheduled.schedule(WorldEvent::CreateRouteFromNode { car: entity }, sim_time.0);
            }
        }
    }
}

/// Cascade lot removal to its cars: parked and homed residents despawn.
fn despawn_cars_of_removed_lots(
    mut removed: EventReader<LotRemovedEvent>,
    mut cars: Query<&mut Car>,
) {
    for event in removed.read() {
        for mut car in &mut cars {
            let homed = car.home_lot == Some(event.lot_id);
            let reserved = car
                .parking_reservation
                .is_some_and(|(_, lot, _)| lot == event.lot_id);
            if homed || reserved {
                car.home_lot = None;
                car.parking_reservation = None;
                car.trigger_despawn();
            }
        }
    }
}

/// Remove cars whose despawn finished, and force out cars that somehow
/// left the map.
fn remove_queued_cars(
    mut commands: Commands,
    tilemap: Res<Tilemap>,
    cars: Query<(Entity, &Car)>,
) {
    let bounds = tilemap.dims().bounds();
    for (entity, car) in &cars {
        if car.state() == CarState::Queued {
            commands.entity(entity).despawn();
            continue;
        }
        let inside = car.bbox.min.x <= bounds.max.x
            && car.bbox.max.x >= bounds.min.x
            && car.bbox.min.y <= bounds.max.y
            && car.bbox.max.y >= bounds.min.y;
        if !inside {
            warn!("car {entity} left the world bounds, despawning");
            commands.entity(entity).despawn();
        }
    }
}

pub struct CarsPlugin;

impl Plugin for CarsPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<CarStateChangedEvent>()
            .add_systems(
                FixedUpdate,
                process_world_events
                    .after(crate::event_queue::tick_environment_timer)
                    .in_set(SimulationSet::PreSim)
                    .run_if(in_state(AppState::Playing)),
            )
            .add_systems(
                FixedUpdate,
                despawn_cars_of_removed_lots
                    .after(crate::lots::remove_lots)
                    .in_set(SimulationSet::PreSim),
            )
            .add_systems(
                FixedUpdate,
                (reroute_finished_cars, update_car_fsms)
                    .chain()
                    .after(crate::movement::move_cars)
                    .in_set(SimulationSet::Simulation)
                    .run_if(in_state(AppState::Playing)),
            )
            .add_systems(
                FixedUpdate,
                remove_queued_cars.in_set(SimulationSet::PostSim),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splines::{CubicSpline, Path, SplineMeta};

    fn dummy_path() -> Path {
        let spline = CubicSpline::from_endpoints(
            Vec2::ZERO,
            Vec2::X,
            Vec2::new(30.0, 0.0),
            Vec2::X,
            0.5,
        );
        Path::from_splines(vec![SplineMeta::new(spline, None)]).unwrap()
    }

    fn routed() -> Route {
        Route::Routed {
            start_node_position: Vec2::ZERO,
            start_node: crate::road_network::NodeId(0),
            end_node: crate::road_network::NodeId(1),
            path: dummy_path(),
            generation: 1,
        }
    }

    #[test]
    fn test_parked_car_unparks_when_routed() {
        let mut car = Car::new(CarMakeId(0), CarState::Parked, Vec2::new(2.0, 0.0), 0.0);
        assert!(car.fsm.update(0.1, &car.context()).is_empty());
        assert_eq!(car.state(), CarState::Parked);

        car.route = routed();
        let ctx = car.context();
        let actions = car.fsm.update(0.1, &ctx);
        assert_eq!(car.state(), CarState::Unparking);
        assert!(actions.contains(&CarAction::UnparkingStarted));

        // Within 4.5 m of the route start, unparking completes.
        let ctx = car.context();
        assert!(ctx.distance_to_route_start <= UNPARKING_COMPLETION_RADIUS);
        let actions = car.fsm.update(0.1, &ctx);
        assert_eq!(car.state(), CarState::Driving);
        assert!(actions.contains(&CarAction::UnparkingComplete));
    }

    #[test]
    fn test_despawning_settles_into_queued_when_stopped() {
        let mut car = Car::new(CarMakeId(1), CarState::Driving, Vec2::ZERO, 0.0);
        car.route = routed();
        car.velocity = 8.0;
        car.trigger_despawn();
        assert_eq!(car.state(), CarState::Despawning);

        // Still rolling: stays despawning.
        let ctx = car.context();
        car.fsm.update(0.1, &ctx);
        assert_eq!(car.state(), CarState::Despawning);

        car.velocity = 0.0;
        let ctx = car.context();
        let actions = car.fsm.update(0.1, &ctx);
        assert_eq!(car.state(), CarState::Queued);
        assert!(actions.contains(&CarAction::DespawnComplete));
        assert!(actions.contains(&CarAction::EnteredQueue));
    }

    #[test]
    fn test_despawn_timeout_fires_even_while_rolling() {
        let mut car = Car::new(CarMakeId(0), CarState::Driving, Vec2::ZERO, 0.0);
        car.route = routed();
        car.velocity = 3.0;
        car.trigger_despawn();
        let ctx = car.context();
        car.fsm.update(DESPAWN_TIMEOUT_SECONDS + 0.01, &ctx);
        assert_eq!(car.state(), CarState::Queued);
    }

    #[test]
    fn test_shape_tracks_frame() {
        let mut car = Car::new(CarMakeId(2), CarState::Driving, Vec2::new(10.0, 5.0), 0.0);
        let make = car.make();
        assert!((car.bbox.width() - make.length).abs() < 1e-4);
        assert!((car.bbox.height() - make.width).abs() < 1e-4);

        car.orientation = std::f32::consts::FRAC_PI_2;
        car.refresh_shape();
        assert!((car.bbox.width() - make.width).abs() < 1e-3);
        assert!((car.bbox.height() - make.length).abs() < 1e-3);
        assert!(car.bbox.contains(car.position));
    }

    #[test]
    fn test_parking_flow_reaches_parked() {
        let mut car = Car::new(CarMakeId(0), CarState::WaitingForParkingSpot, Vec2::ZERO, 0.0);
        // No route yet: waits.
        car.fsm.update(0.1, &car.context());
        assert_eq!(car.state(), CarState::WaitingForParkingSpot);

        car.route = Route::ArrivingToDestination {
            destination: crate::route::RouteDestination::RoadNetworkNode(
                crate::road_network::NodeId(0),
            ),
            path: dummy_path(),
            generation: 1,
        };
        // A node destination is not a parking spot; still waiting.
        car.fsm.update(0.1, &car.context());
        assert_eq!(car.state(), CarState::WaitingForParkingSpot);

        car.route = Route::ArrivingToDestination {
            destination: crate::route::RouteDestination::LotParkingSpot {
                lot_entity: Entity::from_raw(9),
                lot: LotId(0),
                spot: ParkingSpotId(0),
            },
            path: dummy_path(),
            generation: 1,
        };
        car.fsm.update(0.1, &car.context());
        assert_eq!(car.state(), CarState::Parking);

        // Arrival: the route empties, parking completes.
        car.route = Route::Unrouted;
        let ctx = car.context();
        let actions = car.fsm.update(0.1, &ctx);
        assert_eq!(car.state(), CarState::Parked);
        assert!(actions.contains(&CarAction::ParkingComplete));
    }
}

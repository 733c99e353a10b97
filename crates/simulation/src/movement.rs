//! Car movement: route sampling, look-ahead steering, traffic rules, and
//! physics integration.
//!
//! Rules are evaluated in priority order — collision anticipation, then
//! intersection control, then the parking approach — each yielding a target
//! acceleration; the most restrictive wins. Velocity and acceleration are
//! clamped to the car make's limits, and position always comes from the
//! path sample, which corrects lateral drift every frame.

use std::collections::HashMap;

use bevy::math::Rect;
use bevy::prelude::*;

use crate::app_state::AppState;
use crate::cars::{Car, CarState};
use crate::config::{
    COLLISION_LOOKAHEAD_SECONDS, COLLISION_QUERY_MARGIN, MAX_TICK_DELTA, STOP_LINE_OFFSET,
    TRAFFIC_CONTROL_RANGE, YIELD_SCAN_RADIUS,
};
use crate::road_network::{RoadNetwork, TrafficControl, TrafficLightId};
use crate::route::Route;
use crate::simulation_sets::SimulationSet;
use crate::spatial_index::CarIndex;
use crate::traffic_lights::{LightPhase, TrafficLight};

/// Steering controller gain: angular velocity per radian of heading error.
const STEER_GAIN: f32 = 4.0;
/// Angular velocity clamp, rad/s.
const MAX_ANGULAR_VELOCITY: f32 = 3.0;
/// Sample times for bounding-box overlap prediction, seconds.
const PREDICTION_SAMPLES: [f32; 4] = [0.3, 0.6, 0.9, 1.2];
/// Predicted boxes closer than this margin count as a collision, meters.
const PREDICTION_MARGIN: f32 = 0.8;

/// Snapshot of every car, taken before the mutable pass so collision
/// anticipation sees a consistent frame.
struct CarSnapshot {
    entity: Entity,
    position: Vec2,
    direction: Vec2,
    velocity: f32,
    bbox: Rect,
}

pub fn move_cars(
    time: Res<Time>,
    network: Res<RoadNetwork>,
    car_index: Res<CarIndex>,
    lights: Query<&TrafficLight>,
    mut cars: Query<(Entity, &mut Car)>,
) {
    let delta = time.delta_secs().min(MAX_TICK_DELTA);
    if delta <= 0.0 {
        return;
    }

    let phases: HashMap<TrafficLightId, LightPhase> =
        lights.iter().map(|l| (l.id, l.phase())).collect();

    let snapshots: Vec<CarSnapshot> = cars
        .iter()
        .map(|(entity, car)| CarSnapshot {
            entity,
            position: car.position,
            direction: Vec2::from_angle(car.orientation),
            velocity: car.velocity,
            bbox: car.bbox,
        })
        .collect();

    for (entity, mut car) in &mut cars {
        let state = car.state();
        if !state.is_moving() {
            car.velocity = 0.0;
            continue;
        }
        let make = *car.make();

        if car.route.path().is_none() {
            // Nowhere to go: brake in place.
            car.velocity = (car.velocity - make.max_deceleration * delta).max(0.0);
            continue;
        }

        // -- rule evaluation ------------------------------------------------
        let mut accel = if state == CarState::Despawning {
            -make.max_deceleration
        } else {
            make.max_acceleration
        };

        if let Some(braking) = collision_anticipation(
            entity,
            &car,
            &snapshots,
            &car_index,
            make.max_deceleration,
        ) {
            accel = accel.min(braking);
        }

        if let Some(braking) = intersection_control(
            entity,
            &car,
            &network,
            &phases,
            &car_index,
            &snapshots,
            make.max_deceleration,
        ) {
            accel = accel.min(braking);
        }

        if car.route.is_arriving_to_spot() {
            if let Some(path) = car.route.path() {
                let remaining = path.remaining_length();
                let target = (remaining * 0.5).clamp(0.8, make.max_velocity);
                let correction = (target - car.velocity) / delta;
                accel = accel.min(correction);
            }
        }

        // -- integration ----------------------------------------------------
        accel = accel.clamp(-make.max_deceleration, make.max_acceleration);
        car.velocity = (car.velocity + accel * delta).clamp(0.0, make.max_velocity);

        let travel = car.velocity * delta;
        let (position, direction, ahead_direction, finished) = {
            let path = car.route.path_mut().expect("checked above");
            path.advance(travel);
            let (position, direction) = path.sample();
            let (_, ahead_direction) = path.sample_ahead(2.0 * make.length);
            (position, direction, ahead_direction, path.finished())
        };
        car.position = position;

        // Look-ahead steering: a proportional controller on the heading
        // difference between here and two car-lengths ahead.
        let desired = ahead_direction.to_angle();
        let error = wrap_angle(desired - car.orientation);
        car.angular_velocity = (error * STEER_GAIN).clamp(-MAX_ANGULAR_VELOCITY, MAX_ANGULAR_VELOCITY);
        car.orientation = wrap_angle(car.orientation + car.angular_velocity * delta);
        // Snap tiny residual error so straights read straight.
        if error.abs() < 0.02 {
            car.orientation = direction.to_angle();
        }
        car.refresh_shape();

        if finished {
            match state {
                CarState::Parking => {
                    // Arrived in the spot; the FSM settles to Parked.
                    car.route = Route::Unrouted;
                    car.velocity = 0.0;
                }
                CarState::Unparking => {
                    // A route short enough to finish before the completion
                    // radius check fires; treat it as completed.
                    let _ = car.fsm.transition_to(CarState::Driving);
                }
                _ => {}
            }
        }
    }
}

/// Rule 1: query nearby cars and brake when the bounding boxes are
/// predicted to overlap within the look-ahead horizon, assuming both keep
/// their current velocity.
fn collision_anticipation(
    entity: Entity,
    car: &Car,
    snapshots: &[CarSnapshot],
    car_index: &CarIndex,
    max_deceleration: f32,
) -> Option<f32> {
    let my_direction = Vec2::from_angle(car.orientation);
    let radius = car.velocity * COLLISION_LOOKAHEAD_SECONDS + COLLISION_QUERY_MARGIN;
    let nearby = car_index.tree.neighbors_within(radius, car.bbox);

    let mut braking: Option<f32> = None;
    for other_entity in nearby {
        if other_entity == entity {
            continue;
        }
        let Some(other) = snapshots.iter().find(|s| s.entity == other_entity) else {
            continue;
        };
        // Only the car behind brakes.
        let to_other = other.position - car.position;
        if my_direction.dot(to_other) <= 0.0 {
            continue;
        }

        for t in PREDICTION_SAMPLES {
            let mine = translate_rect(car.bbox, my_direction * car.velocity * t)
                .inflate(PREDICTION_MARGIN);
            let theirs = translate_rect(other.bbox, other.direction * other.velocity * t);
            if rects_overlap(mine, theirs) {
                // The sooner the predicted impact, the harder the brake.
                let urgency = (COLLISION_LOOKAHEAD_SECONDS - t) / COLLISION_LOOKAHEAD_SECONDS;
                let strength = max_deceleration * (0.4 + 0.6 * urgency);
                braking = Some(braking.map_or(-strength, |b: f32| b.min(-strength)));
                break;
            }
        }
    }
    braking
}

/// Rule 2: signals and yields at the next node along the route.
fn intersection_control(
    entity: Entity,
    car: &Car,
    network: &RoadNetwork,
    phases: &HashMap<TrafficLightId, LightPhase>,
    car_index: &CarIndex,
    snapshots: &[CarSnapshot],
    max_deceleration: f32,
) -> Option<f32> {
    // Node lookups are only meaningful against the network generation the
    // route was planned for; stale routes keep their cached geometry and
    // re-plan at the next opportunity.
    if car.route.generation() != Some(network.generation) {
        return None;
    }
    let path = car.route.path()?;
    let (node_id, distance) = path.next_node()?;
    if distance > TRAFFIC_CONTROL_RANGE {
        return None;
    }
    let node = network.node(node_id)?;

    match node.control {
        TrafficControl::None => None,
        TrafficControl::Signal(light_id) => {
            let phase = phases.get(&light_id).copied().unwrap_or(LightPhase::Red);
            if phase.allows_entry() {
                return None;
            }
            stop_at(car, distance, phase == LightPhase::Yellow, max_deceleration)
        }
        TrafficControl::Yield => {
            // Scan the priority arms for approaching traffic.
            let scan = Rect::from_center_size(
                network.node(node_id)?.position,
                Vec2::splat(YIELD_SCAN_RADIUS * 2.0),
            );
            let busy = car_index.tree.query(scan).into_iter().any(|other| {
                other != entity
                    && snapshots
                        .iter()
                        .find(|s| s.entity == other)
                        .is_some_and(|s| s.velocity > 0.5)
            });
            if busy {
                stop_at(car, distance, false, max_deceleration)
            } else {
                None
            }
        }
    }
}

/// Deceleration that stops the car `STOP_LINE_OFFSET` short of a node
/// `distance` ahead. A yellow phase the car cannot brake for is waved
/// through.
fn stop_at(
    car: &Car,
    distance: f32,
    permissive: bool,
    max_deceleration: f32,
) -> Option<f32> {
    let stop_distance = distance - STOP_LINE_OFFSET;
    if stop_distance <= 0.1 {
        // At or past the line: if nearly stopped, hold; otherwise clear
        // the intersection rather than block it.
        return if car.velocity < 1.0 {
            Some(-max_deceleration)
        } else {
            None
        };
    }
    // Approach envelope: the speed a comfortable brake can still shed over
    // the remaining distance.
    let comfortable = max_deceleration * 0.5;
    let allowed = (2.0 * comfortable * stop_distance).sqrt();
    if car.velocity > allowed {
        let needed = car.velocity * car.velocity / (2.0 * stop_distance);
        if permissive && needed > max_deceleration {
            return None;
        }
        return Some(-needed.min(max_deceleration));
    }
    // Inside the envelope: cap acceleration so velocity tracks the
    // envelope down to zero at the line instead of surging back up.
    Some((allowed - car.velocity) / 0.5)
}

fn translate_rect(rect: Rect, offset: Vec2) -> Rect {
    Rect::from_corners(rect.min + offset, rect.max + offset)
}

fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.min.x <= b.max.x && a.max.x >= b.min.x && a.min.y <= b.max.y && a.max.y >= b.min.y
}

/// Wrap an angle to `(-π, π]`.
fn wrap_angle(angle: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let wrapped = (angle + std::f32::consts::PI).rem_euclid(two_pi);
    wrapped - std::f32::consts::PI
}

pub struct MovementPlugin;

impl Plugin for MovementPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            FixedUpdate,
            move_cars
                .after(crate::traffic_lights::update_traffic_lights)
                .in_set(SimulationSet::Simulation)
                .run_if(in_state(AppState::Playing)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(0.0)).abs() < 1e-6);
        assert!((wrap_angle(std::f32::consts::TAU + 0.5) - 0.5).abs() < 1e-5);
        assert!((wrap_angle(-std::f32::consts::TAU - 0.5) + 0.5).abs() < 1e-5);
        // Always inside (-π, π].
        for i in -20..20 {
            let a = wrap_angle(i as f32 * 0.7);
            assert!(a > -std::f32::consts::PI - 1e-6);
            assert!(a <= std::f32::consts::PI + 1e-6);
        }
    }

    #[test]
    fn test_stop_at_brakes_proportionally() {
        let car_near = {
            let mut c = crate::cars::Car::new(
                crate::cars::CarMakeId(0),
                CarState::Driving,
                Vec2::ZERO,
                0.0,
            );
            c.velocity = 14.0;
            c
        };
        // 10 m out at 14 m/s is past the comfortable approach envelope:
        // braking needs v²/2d.
        let braking = stop_at(&car_near, 10.0, false, 20.0).unwrap();
        assert!((braking + 14.0 * 14.0 / (2.0 * (10.0 - STOP_LINE_OFFSET))).abs() < 1e-3);

        // Inside the envelope there is still headroom; no braking, just an
        // acceleration cap.
        let mut slow = car_near.clone();
        slow.velocity = 5.0;
        assert!(stop_at(&slow, 10.0, false, 20.0).unwrap() > 0.0);
        // Close to the line the cap turns into a gentle brake.
        slow.velocity = 4.0;
        assert!(stop_at(&slow, 2.7, false, 20.0).unwrap() < 0.0);

        // Too close to stop on yellow: waved through.
        assert!(stop_at(&car_near, 2.5, true, 5.0).is_none());

        // Standing at the line: held.
        let mut stopped = car_near.clone();
        stopped.velocity = 0.2;
        assert!(stop_at(&stopped, STOP_LINE_OFFSET, false, 20.0).unwrap() < 0.0);
    }

    #[test]
    fn test_rect_overlap_prediction_helpers() {
        let a = Rect::new(0.0, 0.0, 4.0, 2.0);
        let b = Rect::new(3.0, 1.0, 8.0, 3.0);
        assert!(rects_overlap(a, b));
        let moved = translate_rect(a, Vec2::new(10.0, 0.0));
        assert!(!rects_overlap(moved, b));
        assert_eq!(moved.min, Vec2::new(10.0, 0.0));
    }
}

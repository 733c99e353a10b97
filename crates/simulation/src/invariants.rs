//! World-consistency checks used by the test harness after every step.
//!
//! Each check mirrors a structural guarantee the engines rely on: socket
//! pairing across fixed cells, the reservation bijection between cars and
//! parking spots, cars staying inside the map, and network nodes sitting
//! on live road cells.

use bevy::prelude::*;

use crate::cars::Car;
use crate::lots::Lot;
use crate::road_network::RoadNetwork;
use crate::tilemap::Tilemap;
use crate::tileset::Tileset;

/// Run every invariant check, returning one message per violation.
pub fn check_invariants(
    tilemap: &Tilemap,
    tileset: &Tileset,
    network: &RoadNetwork,
    cars: &[(Entity, Car)],
    lots: &[(Entity, Lot)],
) -> Vec<String> {
    let mut violations = Vec::new();

    for (cell, dir) in tilemap.socket_violations(tileset) {
        violations.push(format!("socket mismatch at {cell} toward {dir:?}"));
    }

    // Reservation bijection, both directions.
    for (lot_entity, lot) in lots {
        for spot in &lot.spots {
            if let Some(holder) = spot.reserved_by {
                let held = cars.iter().find(|(entity, _)| *entity == holder);
                match held {
                    None => violations.push(format!(
                        "spot {:?} of lot {:?} reserved by a car that no longer exists",
                        spot.id, lot.id
                    )),
                    Some((_, car)) => {
                        let points_back = car
                            .parking_reservation
                            .is_some_and(|(e, l, s)| e == *lot_entity && l == lot.id && s == spot.id);
                        if !points_back {
                            violations.push(format!(
                                "spot {:?} of lot {:?} reserved by {holder} without a matching reservation",
                                spot.id, lot.id
                            ));
                        }
                    }
                }
            }
        }
    }
    for (entity, car) in cars {
        if let Some((lot_entity, lot_id, spot_id)) = car.parking_reservation {
            let holds = lots
                .iter()
                .find(|(e, _)| *e == lot_entity)
                .and_then(|(_, lot)| lot.spot(spot_id).map(|s| (lot.id, s.reserved_by)));
            match holds {
                Some((found_lot, Some(holder))) if found_lot == lot_id && holder == *entity => {}
                _ => violations.push(format!(
                    "car {entity} claims spot {spot_id:?} of lot {lot_id:?} but the spot disagrees"
                )),
            }
        }
    }

    // Cars stay on the mat.
    let bounds = tilemap.dims().bounds().inflate(1.0);
    for (entity, car) in cars {
        if !bounds.contains(car.position) {
            violations.push(format!(
                "car {entity} at {:?} is outside the tilemap bounds",
                car.position
            ));
        }
        if car.velocity < 0.0 {
            violations.push(format!("car {entity} has negative velocity"));
        }
    }

    // Every network node sits on a live road cell.
    for node in network.nodes() {
        if !tilemap.tile(node.cell).is_active_road() {
            violations.push(format!(
                "network node {:?} sits on non-road cell {}",
                node.id, node.cell
            ));
        }
    }

    violations
}

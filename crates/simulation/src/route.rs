//! Routes: where a car is going and the spline path that takes it there.
//!
//! Node-to-node planning is A* over the road-network graph with spline arc
//! length as the edge cost. Paths cache their spline geometry, so a network
//! rebuild does not bend a car mid-curve; routes carry the network
//! generation they were planned against, and stale routes are re-planned
//! when the car next needs the graph.

use bevy::prelude::*;
use pathfinding::prelude::astar;

use crate::lots::{Lot, LotId, ParkingSpotId};
use crate::road_network::{NodeId, RoadNetwork};
use crate::splines::{Path, SplineMeta};

/// What an arriving car is about to reach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteDestination {
    LotParkingSpot {
        lot_entity: Entity,
        lot: LotId,
        spot: ParkingSpotId,
    },
    RoadNetworkNode(NodeId),
}

#[derive(Debug, Clone)]
pub enum Route {
    /// No destination; the car stands still.
    Unrouted,
    /// On the way from a start node to an end node.
    Routed {
        start_node_position: Vec2,
        start_node: NodeId,
        end_node: NodeId,
        path: Path,
        generation: u64,
    },
    /// On the final approach to a concrete destination.
    ArrivingToDestination {
        destination: RouteDestination,
        path: Path,
        generation: u64,
    },
}

impl Route {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Route::Unrouted => None,
            Route::Routed { path, .. } | Route::ArrivingToDestination { path, .. } => Some(path),
        }
    }

    pub fn path_mut(&mut self) -> Option<&mut Path> {
        match self {
            Route::Unrouted => None,
            Route::Routed { path, .. } | Route::ArrivingToDestination { path, .. } => Some(path),
        }
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, Route::Routed { .. })
    }

    pub fn is_arriving_to_spot(&self) -> bool {
        matches!(
            self,
            Route::ArrivingToDestination {
                destination: RouteDestination::LotParkingSpot { .. },
                ..
            }
        )
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            Route::Unrouted => None,
            Route::Routed { generation, .. }
            | Route::ArrivingToDestination { generation, .. } => Some(*generation),
        }
    }
}

/// Shortest node sequence from `from` to `to`, or `None` when the graph
/// does not connect them.
pub fn find_node_path(network: &RoadNetwork, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
    let goal = network.node(to)?.position;
    let (nodes, _cost) = astar(
        &from,
        |node| network.successors(*node),
        |node| {
            network
                .node(*node)
                .map(|n| (n.position.distance(goal) * 100.0) as u32)
                .unwrap_or(u32::MAX)
        },
        |node| *node == to,
    )?;
    Some(nodes)
}

/// Spline metadata for a node sequence, each spline tagged with the node
/// it runs toward.
pub fn splines_for_node_path(network: &RoadNetwork, nodes: &[NodeId]) -> Vec<SplineMeta> {
    nodes
        .windows(2)
        .filter_map(|pair| {
            network
                .spline_between(pair[0], pair[1])
                .map(|spline| SplineMeta::new(spline, Some(pair[1])))
        })
        .collect()
}

/// Route along the road network between two nodes.
pub fn route_between_nodes(network: &RoadNetwork, from: NodeId, to: NodeId) -> Option<Route> {
    if from == to {
        return None;
    }
    let nodes = find_node_path(network, from, to)?;
    let splines = splines_for_node_path(network, &nodes);
    let path = Path::from_splines(splines)?;
    let start = network.node(from)?;
    Some(Route::Routed {
        start_node_position: start.position,
        start_node: from,
        end_node: to,
        path,
        generation: network.generation,
    })
}

/// Route out of a parking spot: the spot's exit driveway splines, then the
/// network from the lot's exit node to `destination`.
pub fn route_from_parking_spot(
    network: &RoadNetwork,
    lot: &Lot,
    spot: ParkingSpotId,
    destination: NodeId,
) -> Option<Route> {
    let spot_data = lot.spot(spot)?;
    let exit_node = network.lot_exit(lot.id)?;
    let nodes = find_node_path(network, exit_node.id, destination)?;

    let mut splines: Vec<SplineMeta> = spot_data
        .to_exit
        .iter()
        .cloned()
        .map(|s| SplineMeta::new(s, None))
        .collect();
    if let Some(last) = splines.last_mut() {
        last.end_node = Some(exit_node.id);
    }
    splines.extend(splines_for_node_path(network, &nodes));

    let path = Path::from_splines(splines)?;
    Some(Route::Routed {
        start_node_position: exit_node.position,
        start_node: exit_node.id,
        end_node: destination,
        path,
        generation: network.generation,
    })
}

/// Route into a reserved parking spot: the network from `from` to the
/// lot's entry node, then the spot's entry driveway splines.
pub fn route_to_parking_spot(
    network: &RoadNetwork,
    from: NodeId,
    lot_entity: Entity,
    lot: &Lot,
    spot: ParkingSpotId,
) -> Option<Route> {
    let spot_data = lot.spot(spot)?;
    let entry_node = network.lot_entry(lot.id)?;
    let nodes = find_node_path(network, from, entry_node.id)?;

    let mut splines = splines_for_node_path(network, &nodes);
    splines.extend(
        spot_data
            .from_entry
            .iter()
            .cloned()
            .map(|s| SplineMeta::new(s, None)),
    );

    let path = Path::from_splines(splines)?;
    Some(Route::ArrivingToDestination {
        destination: RouteDestination::LotParkingSpot {
            lot_entity,
            lot: lot.id,
            spot,
        },
        path,
        generation: network.generation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TilemapDims;
    use crate::tilemap::Tilemap;
    use crate::tiles::TileId;

    fn straight_network() -> RoadNetwork {
        let mut tilemap = Tilemap::new(TilemapDims::new(4, 1));
        for x in 1..=4 {
            let cell = tilemap.dims().cell(x, 1).unwrap();
            tilemap.fix_tile(cell, TileId(6), None);
        }
        RoadNetwork::build(&tilemap, &[], 1).0
    }

    #[test]
    fn test_astar_connects_ends_of_a_straight_road() {
        let network = straight_network();
        // Pick the two lane connectors furthest apart.
        let connectors: Vec<_> = network.lane_connectors().collect();
        let (a, b) = connectors
            .iter()
            .flat_map(|a| connectors.iter().map(move |b| (*a, *b)))
            .max_by(|(a1, b1), (a2, b2)| {
                a1.position
                    .distance(b1.position)
                    .total_cmp(&a2.position.distance(b2.position))
            })
            .unwrap();

        let nodes = find_node_path(&network, a.id, b.id).expect("ends are connected");
        assert!(nodes.len() >= 2);
        assert_eq!(nodes[0], a.id);
        assert_eq!(*nodes.last().unwrap(), b.id);

        let route = route_between_nodes(&network, a.id, b.id).unwrap();
        let path = route.path().unwrap();
        // The path's geometry runs from a to b.
        assert!(path.start_point().distance(a.position) < 0.1);
        assert!(path.end_point().distance(b.position) < 0.1);
        assert!(path.remaining_length() >= a.position.distance(b.position) - 1.0);
    }

    #[test]
    fn test_route_carries_generation() {
        let network = straight_network();
        let connectors: Vec<_> = network.lane_connectors().collect();
        let route = route_between_nodes(&network, connectors[0].id, connectors[1].id);
        if let Some(route) = route {
            assert_eq!(route.generation(), Some(network.generation));
        }
        assert!(route_between_nodes(&network, connectors[0].id, connectors[0].id).is_none());
    }

    #[test]
    fn test_spline_metas_tag_target_nodes() {
        let network = straight_network();
        let connectors: Vec<_> = network.lane_connectors().collect();
        let a = connectors[0].id;
        if let Some(nodes) = network
            .outgoing(a)
            .next()
            .and_then(|b| find_node_path(&network, a, b))
        {
            let splines = splines_for_node_path(&network, &nodes);
            assert_eq!(splines.len(), nodes.len() - 1);
            for (meta, target) in splines.iter().zip(nodes.iter().skip(1)) {
                assert_eq!(meta.end_node, Some(*target));
            }
        };
    }
}

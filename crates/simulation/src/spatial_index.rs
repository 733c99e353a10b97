//! Quadtree spatial indices over the tilemap bounding box.
//!
//! Three indices are maintained — cars, lots, and road-network nodes — and
//! refreshed at the end of each tick so every system inside the tick
//! observes a consistent snapshot. Leaf capacity is 4, which keeps
//! neighbor queries logarithmic on the grid sizes the game uses.

use bevy::math::Rect;
use bevy::prelude::*;

use crate::cars::Car;
use crate::lots::Lot;
use crate::road_network::{NodeId, RoadNetwork};
use crate::simulation_sets::SimulationSet;
use crate::tilemap::Tilemap;

/// Items per leaf before a split.
const LEAF_CAPACITY: usize = 4;
/// Split depth bound; beyond it leaves grow past capacity.
const MAX_DEPTH: u8 = 8;

#[derive(Debug, Clone)]
struct QuadNode<T> {
    bounds: Rect,
    items: Vec<(T, Rect)>,
    children: Option<Box<[QuadNode<T>; 4]>>,
    depth: u8,
}

impl<T: Copy> QuadNode<T> {
    fn new(bounds: Rect, depth: u8) -> Self {
        Self {
            bounds,
            items: Vec::new(),
            children: None,
            depth,
        }
    }

    fn quadrants(bounds: Rect) -> [Rect; 4] {
        let center = bounds.center();
        [
            Rect::from_corners(bounds.min, center),
            Rect::from_corners(Vec2::new(center.x, bounds.min.y), Vec2::new(bounds.max.x, center.y)),
            Rect::from_corners(Vec2::new(bounds.min.x, center.y), Vec2::new(center.x, bounds.max.y)),
            Rect::from_corners(center, bounds.max),
        ]
    }

    fn insert(&mut self, item: T, bbox: Rect) {
        if let Some(children) = &mut self.children {
            for child in children.iter_mut() {
                if contains_rect(child.bounds, bbox) {
                    child.insert(item, bbox);
                    return;
                }
            }
            self.items.push((item, bbox));
            return;
        }

        self.items.push((item, bbox));
        if self.items.len() > LEAF_CAPACITY && self.depth < MAX_DEPTH {
            self.split();
        }
    }

    fn split(&mut self) {
        let depth = self.depth + 1;
        let quadrants = Self::quadrants(self.bounds);
        let mut children = Box::new([
            QuadNode::new(quadrants[0], depth),
            QuadNode::new(quadrants[1], depth),
            QuadNode::new(quadrants[2], depth),
            QuadNode::new(quadrants[3], depth),
        ]);

        let items = std::mem::take(&mut self.items);
        for (item, bbox) in items {
            let mut placed = false;
            for child in children.iter_mut() {
                if contains_rect(child.bounds, bbox) {
                    child.insert(item, bbox);
                    placed = true;
                    break;
                }
            }
            if !placed {
                self.items.push((item, bbox));
            }
        }
        self.children = Some(children);
    }

    fn query(&self, region: Rect, out: &mut Vec<T>) {
        for (item, bbox) in &self.items {
            if intersects(*bbox, region) {
                out.push(*item);
            }
        }
        if let Some(children) = &self.children {
            for child in children.iter() {
                if intersects(child.bounds, region) {
                    child.query(region, out);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
            + self
                .children
                .as_ref()
                .map_or(0, |c| c.iter().map(QuadNode::len).sum())
    }
}

fn contains_rect(outer: Rect, inner: Rect) -> bool {
    outer.min.x <= inner.min.x
        && outer.min.y <= inner.min.y
        && outer.max.x >= inner.max.x
        && outer.max.y >= inner.max.y
}

fn intersects(a: Rect, b: Rect) -> bool {
    a.min.x <= b.max.x && a.max.x >= b.min.x && a.min.y <= b.max.y && a.max.y >= b.min.y
}

/// A point-region quadtree over axis-aligned bounding boxes.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    root: QuadNode<T>,
}

impl<T: Copy> Default for QuadTree<T> {
    fn default() -> Self {
        Self::new(Rect::new(0.0, 0.0, 0.0, 0.0))
    }
}

impl<T: Copy> QuadTree<T> {
    pub fn new(bounds: Rect) -> Self {
        Self {
            root: QuadNode::new(bounds, 0),
        }
    }

    /// Items whose bbox falls outside the root bounds are kept at the root
    /// so they still show up in queries.
    pub fn insert(&mut self, item: T, bbox: Rect) {
        self.root.insert(item, bbox);
    }

    /// Every item whose bbox intersects `region`.
    pub fn query(&self, region: Rect) -> Vec<T> {
        let mut out = Vec::new();
        self.root.query(region, &mut out);
        out
    }

    /// Items whose bbox is within `radius` of the query bbox.
    pub fn neighbors_within(&self, radius: f32, bbox: Rect) -> Vec<T> {
        self.query(bbox.inflate(radius))
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Quadtree over car entities, rebuilt every tick.
#[derive(Resource, Default)]
pub struct CarIndex {
    pub tree: QuadTree<Entity>,
}

/// Quadtree over lot entities, rebuilt every tick.
#[derive(Resource, Default)]
pub struct LotIndex {
    pub tree: QuadTree<Entity>,
}

/// Quadtree over road-network nodes, rebuilt when the network changes.
#[derive(Resource, Default)]
pub struct NodeIndex {
    pub tree: QuadTree<NodeId>,
}

fn refresh_car_index(
    tilemap: Res<Tilemap>,
    cars: Query<(Entity, &Car)>,
    mut index: ResMut<CarIndex>,
) {
    let mut tree = QuadTree::new(tilemap.dims().bounds());
    for (entity, car) in &cars {
        tree.insert(entity, car.bbox);
    }
    index.tree = tree;
}

fn refresh_lot_index(
    tilemap: Res<Tilemap>,
    lots: Query<(Entity, &Lot)>,
    mut index: ResMut<LotIndex>,
) {
    let mut tree = QuadTree::new(tilemap.dims().bounds());
    for (entity, lot) in &lots {
        tree.insert(entity, lot.bounds);
    }
    index.tree = tree;
}

fn refresh_node_index(
    tilemap: Res<Tilemap>,
    network: Res<RoadNetwork>,
    mut index: ResMut<NodeIndex>,
) {
    if !network.is_changed() {
        return;
    }
    let mut tree = QuadTree::new(tilemap.dims().bounds());
    for node in network.nodes() {
        tree.insert(node.id, Rect::from_center_size(node.position, Vec2::splat(0.5)));
    }
    index.tree = tree;
}

pub struct SpatialIndexPlugin;

impl Plugin for SpatialIndexPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CarIndex>()
            .init_resource::<LotIndex>()
            .init_resource::<NodeIndex>()
            .add_systems(
                FixedUpdate,
                (refresh_car_index, refresh_lot_index, refresh_node_index)
                    .in_set(SimulationSet::PostSim),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32, y: f32) -> Rect {
        Rect::from_center_size(Vec2::new(x, y), Vec2::splat(2.0))
    }

    #[test]
    fn test_insert_query() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 160.0, 160.0));
        tree.insert(1u32, unit_box(10.0, 10.0));
        tree.insert(2u32, unit_box(50.0, 50.0));
        tree.insert(3u32, unit_box(150.0, 150.0));

        let near_origin = tree.query(Rect::new(0.0, 0.0, 60.0, 60.0));
        assert!(near_origin.contains(&1));
        assert!(near_origin.contains(&2));
        assert!(!near_origin.contains(&3));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_splits_keep_all_items_reachable() {
        let bounds = Rect::new(0.0, 0.0, 160.0, 160.0);
        let mut tree = QuadTree::new(bounds);
        // Well past the leaf capacity, spread over the area.
        let mut expected = Vec::new();
        for i in 0..40u32 {
            let x = 4.0 + (i % 8) as f32 * 19.0;
            let y = 4.0 + (i / 8) as f32 * 30.0;
            tree.insert(i, unit_box(x, y));
            expected.push(i);
        }
        let mut all = tree.query(bounds);
        all.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_neighbors_within_radius() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert('a', unit_box(10.0, 10.0));
        tree.insert('b', unit_box(30.0, 10.0));
        tree.insert('c', unit_box(90.0, 90.0));

        let near = tree.neighbors_within(15.0, unit_box(12.0, 10.0));
        assert!(near.contains(&'a'));
        assert!(near.contains(&'b'));
        assert!(!near.contains(&'c'));

        let tight = tree.neighbors_within(2.0, unit_box(12.0, 10.0));
        assert!(tight.contains(&'a'));
        assert!(!tight.contains(&'b'));
    }

    #[test]
    fn test_out_of_bounds_items_still_found() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 32.0, 32.0));
        tree.insert(7u32, unit_box(100.0, 100.0));
        let found = tree.query(Rect::new(90.0, 90.0, 110.0, 110.0));
        assert_eq!(found, vec![7]);
    }
}

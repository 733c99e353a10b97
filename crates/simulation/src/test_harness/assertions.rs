//! Assertion helpers for `TestWorld`.

use crate::invariants::check_invariants;
use crate::tileset::Tileset;

use super::TestWorld;

impl TestWorld {
    /// Fail the test if any world invariant is violated.
    pub fn assert_invariants(&mut self) {
        let cars = self.cars();
        let lots = self.lots();
        let world = self.app.world();
        let violations = check_invariants(
            world.resource::<crate::tilemap::Tilemap>(),
            world.resource::<Tileset>(),
            world.resource::<crate::road_network::RoadNetwork>(),
            &cars,
            &lots,
        );
        assert!(
            violations.is_empty(),
            "world invariants violated:\n{}",
            violations.join("\n")
        );
    }

    /// Every fixed cell of the tilemap pairs its sockets with its
    /// neighbors.
    pub fn assert_sockets_consistent(&self) {
        let world = self.app.world();
        let violations = world
            .resource::<crate::tilemap::Tilemap>()
            .socket_violations(world.resource::<Tileset>());
        assert!(violations.is_empty(), "socket violations: {violations:?}");
    }
}

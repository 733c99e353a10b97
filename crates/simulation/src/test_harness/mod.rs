//! # TestWorld — headless integration test harness
//!
//! Wraps `bevy::app::App` + [`SimulationPlugin`](crate::SimulationPlugin)
//! for running integration tests without a window or renderer. Ticks drive
//! the `FixedUpdate` schedule directly with a hand-advanced clock, so test
//! time is exact and independent of wall time.

mod assertions;
mod queries;
mod setup;

use std::time::Duration;

use bevy::app::App;
use bevy::prelude::*;
use bevy::state::app::StatesPlugin;

use crate::app_state::AppState;
use crate::config::PHYSICS_TIMESTEP;
use crate::world_init::WorldConfig;
use crate::SimulationPlugin;

pub struct TestWorld {
    pub app: App,
}

impl TestWorld {
    /// A world with the default grid and seed.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_config(WorldConfig {
            initial_seed: seed,
            ..Default::default()
        })
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(StatesPlugin);
        app.insert_resource(config);
        // Start live so simulation systems run during tests.
        app.insert_state(AppState::Playing);
        app.add_plugins(SimulationPlugin);
        // One update so Startup systems execute and resources exist.
        app.update();
        Self { app }
    }

    /// Run `n` fixed-update ticks, advancing the clock by exactly one
    /// physics step each time.
    pub fn tick(&mut self, n: u32) {
        let step = Duration::from_secs_f32(PHYSICS_TIMESTEP);
        for _ in 0..n {
            {
                let mut time = self.app.world_mut().resource_mut::<Time>();
                time.advance_by(step);
            }
            self.app.world_mut().run_schedule(FixedUpdate);
            // Structural commands (spawns, despawns) apply between ticks.
            self.app.world_mut().flush();
        }
    }

    /// Run ticks covering `seconds` of simulated time.
    pub fn tick_seconds(&mut self, seconds: f32) {
        self.tick((seconds / PHYSICS_TIMESTEP).round().max(1.0) as u32);
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.app.world_mut()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

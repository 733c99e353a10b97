//! Game-level state machine, expressed as a Bevy `States` enum.
//!
//! Simulation systems are gated on `AppState::Playing`; pausing therefore
//! freezes car physics *and* traffic-light timers together — lights freeze
//! with the world rather than drifting while it stands still.

use bevy::prelude::*;

/// Top-level game state.
///
/// Defaults to `MainMenu`. The app binary and the test harness call
/// `app.insert_state(AppState::Playing)` before adding `SimulationPlugin`
/// so the world starts live.
#[derive(States, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppState {
    #[default]
    MainMenu,
    Playing,
    Paused,
}

impl AppState {
    /// True while the world should advance.
    pub fn is_running(self) -> bool {
        matches!(self, AppState::Playing)
    }
}

pub struct AppStatePlugin;

impl Plugin for AppStatePlugin {
    fn build(&self, app: &mut App) {
        app.init_state::<AppState>();
    }
}

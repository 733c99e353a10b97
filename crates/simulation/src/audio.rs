//! Outbound audio cues.
//!
//! The core never plays sound itself; state machines emit [`PlayAudioEvent`]
//! and the host (app binary, eventual frontend) maps each [`Sound`] to an
//! asset. Consumers drain the event stream each frame.

use bevy::prelude::*;

/// Sound cues the simulation can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    /// Tile construction started.
    BuildRoadStart,
    /// Tile construction finished.
    BuildRoadEnd,
    /// A road or lot was bulldozed.
    DestroyRoad,
    /// A traffic light switched phase.
    TrafficLightChange,
}

/// Event sent by simulation systems to request a sound effect.
#[derive(Event, Debug, Clone, Copy)]
pub struct PlayAudioEvent {
    pub sound: Sound,
}

impl PlayAudioEvent {
    pub fn new(sound: Sound) -> Self {
        Self { sound }
    }
}

pub struct AudioEventPlugin;

impl Plugin for AudioEventPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<PlayAudioEvent>();
    }
}

//! Signalized-intersection traffic lights.
//!
//! Each light runs a fixed Green → Yellow → Red cycle (12 s / 4 s / 16 s),
//! advanced by the 1 s environment tick, so opposing approaches that start
//! in opposite phases stay synchronized. Lights are created with the road
//! network and destroyed when it is rebuilt; surviving intersections keep
//! their light ids and phases.

use bevy::prelude::*;

use crate::app_state::AppState;
use crate::audio::{PlayAudioEvent, Sound};
use crate::config::{LIGHT_GREEN_SECONDS, LIGHT_RED_SECONDS, LIGHT_YELLOW_SECONDS};
use crate::event_queue::EnvironmentTimer;
use crate::fsm::{Fsm, FsmState, Transition};
use crate::grid::{Cell, OrthogonalDirection};
use crate::road_network::{TrafficLightId, TrafficLightSpec};
use crate::simulation_sets::SimulationSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPhase {
    Green,
    Yellow,
    Red,
}

impl LightPhase {
    /// May traffic enter on this phase?
    pub fn allows_entry(self) -> bool {
        matches!(self, LightPhase::Green)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    PhaseChanged,
}

impl FsmState for LightPhase {
    type Context = ();
    type Action = LightAction;

    fn transitions(&self) -> Vec<Transition<Self, (), LightAction>> {
        match self {
            LightPhase::Green => {
                vec![Transition::timed(LightPhase::Yellow, LIGHT_GREEN_SECONDS)]
            }
            LightPhase::Yellow => {
                vec![Transition::timed(LightPhase::Red, LIGHT_YELLOW_SECONDS)]
            }
            LightPhase::Red => vec![Transition::timed(LightPhase::Green, LIGHT_RED_SECONDS)],
        }
    }

    fn entry_actions(&self) -> Vec<LightAction> {
        vec![LightAction::PhaseChanged]
    }
}

/// A signal head governing one intersection approach.
#[derive(Component, Debug, Clone)]
pub struct TrafficLight {
    pub id: TrafficLightId,
    pub fsm: Fsm<LightPhase>,
    pub position: Vec2,
    pub facing: OrthogonalDirection,
    pub cell: Cell,
}

impl TrafficLight {
    pub fn from_spec(spec: &TrafficLightSpec) -> Self {
        Self {
            id: spec.id,
            fsm: Fsm::resume(spec.initial_phase, spec.phase_elapsed),
            position: spec.position,
            facing: spec.facing,
            cell: spec.cell,
        }
    }

    pub fn phase(&self) -> LightPhase {
        *self.fsm.current()
    }
}

/// Snapshot of a live light, handed to the network builder so rebuilt
/// intersections keep their identities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExistingLight {
    pub id: TrafficLightId,
    pub cell: Cell,
    pub facing: OrthogonalDirection,
    pub phase: LightPhase,
    pub elapsed: f32,
}

pub fn snapshot_lights(query: &Query<&TrafficLight>) -> Vec<ExistingLight> {
    query
        .iter()
        .map(|light| ExistingLight {
            id: light.id,
            cell: light.cell,
            facing: light.facing,
            phase: light.phase(),
            elapsed: light.fsm.time_in_state(),
        })
        .collect()
}

/// Advance every light by one environment tick.
pub fn update_traffic_lights(
    timer: Res<EnvironmentTimer>,
    mut lights: Query<&mut TrafficLight>,
    mut audio: EventWriter<PlayAudioEvent>,
) {
    if !timer.just_ticked() {
        return;
    }
    for mut light in &mut lights {
        let actions = light.fsm.update(EnvironmentTimer::INTERVAL, &());
        for action in actions {
            match action {
                LightAction::PhaseChanged => {
                    audio.send(PlayAudioEvent::new(Sound::TrafficLightChange));
                }
            }
        }
    }
}

pub struct TrafficLightPlugin;

impl Plugin for TrafficLightPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            FixedUpdate,
            update_traffic_lights
                .in_set(SimulationSet::Simulation)
                .run_if(in_state(AppState::Playing)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_durations() {
        let (mut fsm, _) = Fsm::new(LightPhase::Green);
        // 12 one-second environment ticks reach the end of green.
        for _ in 0..11 {
            fsm.update(1.0, &());
        }
        assert_eq!(*fsm.current(), LightPhase::Green);
        fsm.update(1.0, &());
        assert_eq!(*fsm.current(), LightPhase::Yellow);
        for _ in 0..4 {
            fsm.update(1.0, &());
        }
        assert_eq!(*fsm.current(), LightPhase::Red);
        for _ in 0..16 {
            fsm.update(1.0, &());
        }
        assert_eq!(*fsm.current(), LightPhase::Green);
    }

    #[test]
    fn test_opposed_phases_stay_disjoint() {
        // A full cycle is 32 s. One light starts Green, the other Red;
        // at no tick may both show green.
        let (mut green, _) = Fsm::new(LightPhase::Green);
        let (mut red, _) = Fsm::new(LightPhase::Red);
        for _ in 0..96 {
            green.update(1.0, &());
            red.update(1.0, &());
            assert!(
                !(*green.current() == LightPhase::Green && *red.current() == LightPhase::Green),
                "opposing approaches must never both be green"
            );
        }
    }

    #[test]
    fn test_resume_preserves_phase_position() {
        let spec = TrafficLightSpec {
            id: TrafficLightId(3),
            cell: crate::grid::TilemapDims::new(4, 4).cell(2, 2).unwrap(),
            facing: OrthogonalDirection::Left,
            position: Vec2::ZERO,
            initial_phase: LightPhase::Red,
            phase_elapsed: 15.0,
        };
        let mut light = TrafficLight::from_spec(&spec);
        assert_eq!(light.phase(), LightPhase::Red);
        light.fsm.update(1.0, &());
        assert_eq!(light.phase(), LightPhase::Green);
    }
}

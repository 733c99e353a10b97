//! Future-timed world events, the environment tick, and the debounced
//! tilemap-change slot.
//!
//! The scheduled-event queue is the only deferred-mutation channel in the
//! core: everything that wants to happen "later" goes through it. Events
//! that are not ready when they fire are re-enqueued with exponential
//! backoff until a retry cap drops them.

use std::collections::BTreeSet;

use bevy::prelude::*;

use crate::app_state::AppState;
use crate::config::{
    ENVIRONMENT_TICK_SECONDS, EVENT_RETRY_BASE_SECONDS, EVENT_RETRY_LIMIT,
    TILEMAP_CHANGE_DEBOUNCE,
};
use crate::cars::CarMakeId;
use crate::grid::Cell;
use crate::lots::LotId;
use crate::simulation_sets::SimulationSet;

/// Deferred world mutations, processed when their trigger time arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldEvent {
    /// Spawn the resident car of a lot. `None` picks a make at random.
    SpawnResident {
        lot: LotId,
        make: Option<CarMakeId>,
    },
    /// Spawn a roaming test car between two random network nodes.
    SpawnTestCar,
    /// Route a parked car out of its spot toward a random node.
    CreateRouteFromParkingSpot { car: Entity },
    /// Re-route a driving car from its current node to a random node.
    CreateRouteFromNode { car: Entity },
    /// Find and reserve a parking spot for the car at its home lot.
    BeginCarParking { car: Entity, lot: LotId },
    /// No-op placeholder kept so handlers can swallow an event.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub event: WorldEvent,
    pub trigger_at: f64,
    pub retries: u8,
    seq: u64,
}

/// Queue of future-timed events, ordered by trigger time with insertion
/// order breaking ties.
#[derive(Resource, Debug, Default)]
pub struct ScheduledEvents {
    events: Vec<ScheduledEvent>,
    next_seq: u64,
}

impl ScheduledEvents {
    pub fn schedule(&mut self, event: WorldEvent, trigger_at: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(ScheduledEvent {
            event,
            trigger_at,
            retries: 0,
            seq,
        });
    }

    /// Pop every event due at `now`, ordered by `(trigger_at, insertion)`.
    pub fn drain_due(&mut self, now: f64) -> Vec<ScheduledEvent> {
        let mut due: Vec<ScheduledEvent> = Vec::new();
        let mut remaining: Vec<ScheduledEvent> = Vec::new();
        for event in self.events.drain(..) {
            if event.trigger_at <= now {
                due.push(event);
            } else {
                remaining.push(event);
            }
        }
        self.events = remaining;
        due.sort_by(|a, b| {
            a.trigger_at
                .total_cmp(&b.trigger_at)
                .then(a.seq.cmp(&b.seq))
        });
        due
    }

    /// Put an event that was not ready back on the queue with backoff.
    /// Returns false (dropping the event) once the retry cap is reached.
    pub fn retry(&mut self, mut event: ScheduledEvent, now: f64) -> bool {
        if event.retries >= EVENT_RETRY_LIMIT {
            return false;
        }
        event.retries += 1;
        event.trigger_at = now + EVENT_RETRY_BASE_SECONDS * f64::from(1u32 << event.retries);
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(event);
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Simulated world clock, seconds since world creation. Only advances
/// while the game is playing.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct SimTime(pub f64);

pub fn advance_sim_time(time: Res<Time>, mut sim_time: ResMut<SimTime>) {
    sim_time.0 += time.delta_secs_f64();
}

/// Shared 1 s interval driving the event-queue drain and traffic-light
/// phases.
#[derive(Resource, Debug)]
pub struct EnvironmentTimer {
    timer: Timer,
    just_ticked: bool,
}

impl Default for EnvironmentTimer {
    fn default() -> Self {
        Self {
            timer: Timer::from_seconds(ENVIRONMENT_TICK_SECONDS, TimerMode::Repeating),
            just_ticked: false,
        }
    }
}

impl EnvironmentTimer {
    pub const INTERVAL: f32 = ENVIRONMENT_TICK_SECONDS;

    pub fn just_ticked(&self) -> bool {
        self.just_ticked
    }
}

pub fn tick_environment_timer(time: Res<Time>, mut env: ResMut<EnvironmentTimer>) {
    env.timer.tick(time.delta());
    env.just_ticked = env.timer.just_finished();
}

/// Editor-originated tilemap changes, debounced before triggering the
/// solver and the road-network rebuild.
#[derive(Resource, Debug, Default)]
pub struct PendingTilemapChange {
    remaining: Option<f32>,
    cells: BTreeSet<Cell>,
}

impl PendingTilemapChange {
    /// Accumulate changed cells; the countdown resets to the debounce
    /// floor on every registration.
    pub fn register<I: IntoIterator<Item = Cell>>(&mut self, cells: I) {
        self.cells.extend(cells);
        self.remaining = Some(TILEMAP_CHANGE_DEBOUNCE);
    }

    pub fn is_pending(&self) -> bool {
        self.remaining.is_some()
    }

    /// Count down; when the debounce expires, the accumulated cell set is
    /// returned exactly once.
    pub fn tick(&mut self, delta: f32) -> Option<BTreeSet<Cell>> {
        let remaining = self.remaining.as_mut()?;
        *remaining -= delta;
        if *remaining > 0.0 {
            return None;
        }
        self.remaining = None;
        Some(std::mem::take(&mut self.cells))
    }
}

/// Fired when the debounce expires: the tilemap changed and downstream
/// caches must refresh.
#[derive(Event, Debug, Clone)]
pub struct TilemapChangedEvent {
    pub cells: Vec<Cell>,
}

pub struct EventQueuePlugin;

impl Plugin for EventQueuePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ScheduledEvents>()
            .init_resource::<SimTime>()
            .init_resource::<EnvironmentTimer>()
            .init_resource::<PendingTilemapChange>()
            .add_event::<TilemapChangedEvent>()
            .add_systems(
                FixedUpdate,
                (advance_sim_time, tick_environment_timer)
                    .chain()
                    .in_set(SimulationSet::PreSim)
                    .run_if(in_state(AppState::Playing)),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_respects_trigger_time_and_insertion_order() {
        let mut queue = ScheduledEvents::default();
        queue.schedule(WorldEvent::SpawnTestCar, 2.0);
        queue.schedule(WorldEvent::None, 1.0);
        queue.schedule(WorldEvent::SpawnTestCar, 1.0);

        let due = queue.drain_due(1.5);
        assert_eq!(due.len(), 2);
        // Same trigger time dispatches in insertion order.
        assert_eq!(due[0].event, WorldEvent::None);
        assert_eq!(due[1].event, WorldEvent::SpawnTestCar);
        assert_eq!(queue.len(), 1);

        let rest = queue.drain_due(10.0);
        assert_eq!(rest.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retry_backs_off_and_caps() {
        let mut queue = ScheduledEvents::default();
        queue.schedule(WorldEvent::SpawnTestCar, 0.0);
        let mut event = queue.drain_due(0.0).pop().unwrap();

        let mut delays = Vec::new();
        loop {
            let now = 100.0;
            if !queue.retry(event.clone(), now) {
                break;
            }
            event = queue.drain_due(f64::MAX).pop().unwrap();
            delays.push(event.trigger_at - now);
        }
        assert_eq!(delays.len() as u8, EVENT_RETRY_LIMIT);
        // Exponential backoff: each delay doubles.
        for pair in delays.windows(2) {
            assert!((pair[1] / pair[0] - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_debounce_accumulates_and_fires_once() {
        let dims = crate::grid::TilemapDims::new(4, 4);
        let mut pending = PendingTilemapChange::default();
        assert!(!pending.is_pending());

        pending.register([dims.cell(1, 1).unwrap()]);
        assert!(pending.is_pending());
        assert!(pending.tick(0.5).is_none());

        // A second edit resets the countdown to the floor.
        pending.register([dims.cell(2, 2).unwrap()]);
        assert!(pending.tick(0.5).is_none());
        let fired = pending.tick(0.3).unwrap();
        assert_eq!(fired.len(), 2);
        assert!(!pending.is_pending());
        assert!(pending.tick(1.0).is_none());
    }
}

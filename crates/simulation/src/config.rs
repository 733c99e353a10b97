//! World-scale constants shared across the simulation crates.

/// Edge length of one grid cell in meters.
pub const CELL_SIZE: f32 = 16.0;

/// Default playable grid width in cells (`horizontalCellsAmount`).
pub const DEFAULT_GRID_WIDTH: usize = 12;
/// Default playable grid height in cells (`verticalCellsAmount`).
pub const DEFAULT_GRID_HEIGHT: usize = 10;

/// Fixed physics timestep. 60 Hz keeps the per-tick delta far below the
/// 100 ms tunneling clamp.
pub const PHYSICS_TIMESTEP: f32 = 1.0 / 60.0;

/// Upper bound on a single physics delta, seconds.
pub const MAX_TICK_DELTA: f32 = 0.1;

/// Interval of the environment tick that drives the event-queue drain and
/// traffic-light phases, seconds.
pub const ENVIRONMENT_TICK_SECONDS: f32 = 1.0;

/// Solver steps performed per frame while a solve is in progress. Bounded so
/// the caller's frame loop never stalls on a large propagation wave.
pub const WFC_STEP_BUDGET_PER_FRAME: usize = 64;

/// How long edits accumulate before the tilemap-changed trigger fires,
/// seconds. Further edits reset the countdown back to this floor.
pub const TILEMAP_CHANGE_DEBOUNCE: f32 = 0.75;

/// Base delay for re-enqueued events that were not ready yet, seconds.
/// The actual delay doubles per retry.
pub const EVENT_RETRY_BASE_SECONDS: f64 = 0.5;
/// Events that still aren't ready after this many retries are dropped.
pub const EVENT_RETRY_LIMIT: u8 = 5;

/// Lateral offset of a lane connector from the cell-boundary midpoint,
/// meters. Two-lane right-hand traffic.
pub const LANE_OFFSET: f32 = 2.8;

/// Longitudinal inset of a deadend turnaround from the tile center, meters.
pub const DEADEND_INSET: f32 = 3.0;

/// Traffic-light phase durations, seconds.
pub const LIGHT_GREEN_SECONDS: f32 = 12.0;
pub const LIGHT_YELLOW_SECONDS: f32 = 4.0;
pub const LIGHT_RED_SECONDS: f32 = 16.0;

/// A car counts as having reached the route start node when it is within
/// this distance of it, meters. Ends the unparking maneuver.
pub const UNPARKING_COMPLETION_RADIUS: f32 = 4.5;

/// Look-ahead horizon for collision anticipation, seconds.
pub const COLLISION_LOOKAHEAD_SECONDS: f32 = 1.2;
/// Safety margin added to the collision query radius, meters.
pub const COLLISION_QUERY_MARGIN: f32 = 8.0;

/// Distance short of a controlled node at which cars aim to stop, meters.
pub const STOP_LINE_OFFSET: f32 = 2.0;
/// Cars begin reacting to signals and yields within this distance of the
/// controlling node, meters.
pub const TRAFFIC_CONTROL_RANGE: f32 = 24.0;
/// Radius scanned for priority traffic when deciding whether to yield,
/// meters.
pub const YIELD_SCAN_RADIUS: f32 = 20.0;

/// Fallback time after which a despawning car is recycled even if it never
/// quite reached zero velocity, seconds.
pub const DESPAWN_TIMEOUT_SECONDS: f32 = 1.0;

/// Delay before a freshly constructed residential lot produces its
/// resident, seconds.
pub const RESIDENT_SPAWN_DELAY: f64 = 2.0;
/// How long a parked resident stays home before driving out again, seconds.
pub const RESIDENT_IDLE_SECONDS: f64 = 8.0;

/// Construction animation time for a freshly fixed tile, seconds.
pub const TILE_BUILD_SECONDS: f32 = 0.5;
/// Demolition animation time for a bulldozed tile, seconds.
pub const TILE_REMOVE_SECONDS: f32 = 0.25;

//! Headless runner: builds a world from CLI options, drives the fixed-step
//! loop for a number of ticks, and prints an end-of-run summary. Useful
//! for soak runs, savegame round trips, and driving the core without a
//! frontend.

use std::path::PathBuf;
use std::time::Duration;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::state::app::StatesPlugin;

use simulation::cars::{schedule_test_cars, Car};
use simulation::config::PHYSICS_TIMESTEP;
use simulation::editor::ActionQueue;
use simulation::event_queue::{ScheduledEvents, SimTime};
use simulation::lots::Lot;
use simulation::road_network::RoadNetwork;
use simulation::tilemap::Tilemap;
use simulation::traffic_lights::TrafficLight;
use simulation::world_init::{demo_actions, WorldConfig};
use simulation::{AppState, SimulationPlugin, TickCounter};

use save::{LoadRequest, SavePlugin, SaveRequest};

struct Options {
    config: WorldConfig,
    ticks: u32,
    demo: bool,
    spawn_cars: usize,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
}

const USAGE: &str = "trafficmat [--seed N] [--size WxH] [--ticks N] [--demo] \
[--spawn-cars N] [--load PATH] [--save PATH]";

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        config: WorldConfig::default(),
        ticks: 1800,
        demo: false,
        spawn_cars: 0,
        load: None,
        save: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| -> Result<&String, String> {
            args.get(i + 1)
                .ok_or_else(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--seed" => {
                options.config.initial_seed = value(i)?
                    .parse()
                    .map_err(|e| format!("bad --seed: {e}"))?;
                i += 2;
            }
            "--size" => {
                let raw = value(i)?;
                let (w, h) = raw
                    .split_once('x')
                    .ok_or_else(|| format!("bad --size {raw}, expected WxH"))?;
                options.config.horizontal_cells =
                    w.parse().map_err(|e| format!("bad --size width: {e}"))?;
                options.config.vertical_cells =
                    h.parse().map_err(|e| format!("bad --size height: {e}"))?;
                if options.config.horizontal_cells == 0 || options.config.vertical_cells == 0 {
                    return Err("--size needs positive dimensions".into());
                }
                i += 2;
            }
            "--ticks" => {
                options.ticks = value(i)?
                    .parse()
                    .map_err(|e| format!("bad --ticks: {e}"))?;
                i += 2;
            }
            "--spawn-cars" => {
                options.spawn_cars = value(i)?
                    .parse()
                    .map_err(|e| format!("bad --spawn-cars: {e}"))?;
                i += 2;
            }
            "--demo" => {
                options.demo = true;
                i += 1;
            }
            "--load" => {
                options.load = Some(PathBuf::from(value(i)?));
                i += 2;
            }
            "--save" => {
                options.save = Some(PathBuf::from(value(i)?));
                i += 2;
            }
            "--help" | "-h" => return Err(USAGE.into()),
            other => return Err(format!("unknown option {other}\n{USAGE}")),
        }
    }
    Ok(options)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let options = match parse_options(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(LogPlugin::default());
    app.add_plugins(StatesPlugin);
    app.insert_resource(options.config);
    app.insert_state(AppState::Playing);
    app.add_plugins(SimulationPlugin);
    app.add_plugins(SavePlugin);
    // Run Startup so the world resources exist.
    app.update();

    if options.demo {
        let dims = options.config.dims();
        let mut queue = app.world_mut().resource_mut::<ActionQueue>();
        for action in demo_actions(dims) {
            queue.push(action);
        }
    }
    if let Some(path) = options.load {
        app.world_mut().send_event(LoadRequest { path });
    }
    if options.spawn_cars > 0 {
        let now = app.world().resource::<SimTime>().0;
        let mut scheduled = app.world_mut().resource_mut::<ScheduledEvents>();
        // Give the initial solve and network build a moment to land.
        schedule_test_cars(&mut scheduled, now + 2.0, options.spawn_cars);
    }

    // Fixed-step loop, hand-clocked so runs are reproducible regardless of
    // host speed.
    let step = Duration::from_secs_f32(PHYSICS_TIMESTEP);
    for _ in 0..options.ticks {
        {
            let mut time = app.world_mut().resource_mut::<Time>();
            time.advance_by(step);
        }
        app.world_mut().run_schedule(FixedUpdate);
        app.world_mut().flush();
    }

    if let Some(path) = options.save {
        // One more tick so the save system observes the request.
        app.world_mut().send_event(SaveRequest { path });
        {
            let mut time = app.world_mut().resource_mut::<Time>();
            time.advance_by(step);
        }
        app.world_mut().run_schedule(FixedUpdate);
        app.world_mut().flush();
    }

    print_summary(&mut app);
}

fn print_summary(app: &mut App) {
    let world = app.world_mut();
    let mut car_query = world.query::<&Car>();
    let cars = car_query.iter(world).count();
    let parked = car_query
        .iter(world)
        .filter(|c| c.state() == simulation::cars::CarState::Parked)
        .count();
    let mut lot_query = world.query::<&Lot>();
    let lots = lot_query.iter(world).count();
    let mut light_query = world.query::<&TrafficLight>();
    let lights = light_query.iter(world).count();

    let roads = world.resource::<Tilemap>().road_cells().count();
    let network = world.resource::<RoadNetwork>();
    let ticks = world.resource::<TickCounter>().0;
    let sim_time = world.resource::<SimTime>().0;

    println!(
        "ran {ticks} ticks ({sim_time:.1}s simulated): {roads} road cells, \
{} network nodes, {} edges, {lights} lights, {lots} lots, {cars} cars ({parked} parked)",
        network.nodes().len(),
        network.edge_count(),
    );
}

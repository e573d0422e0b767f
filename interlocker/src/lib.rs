extern crate failure;
#[macro_use] extern crate failure_derive;

pub mod input;
pub mod output;
pub mod railway;


use input::interlocking_table::InterlockingTable;
use input::scenario::{Scenario, ScenarioAction};
use log::{info, warn};
use output::history::{recorder, History};
use railway::controller::{Config, Controller, ControllerError};
use railway::interlocking::InterlockingError;
use railway::registry::RouteRegistry;
use railway::track::{SimulatedTrack, TrackState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Plays a scenario against a simulated track and returns everything that
/// happened. Refused grants are part of the history and do not stop the
/// scenario; unknown names and adapter failures do.
pub fn run_scenario(table: InterlockingTable, scenario: &Scenario, config: Config) -> AppResult<History> {
    let (logger, history) = recorder();
    let registry = Arc::new(RouteRegistry::new(table)?);
    let track = Arc::new(SimulatedTrack::new(registry.topology(), logger.clone()));
    let controller = Controller::new(registry, track.clone(), config, logger)?;

    for action in &scenario.actions {
        use ScenarioAction::*;
        match *action {
            Wait(t) => thread::sleep(Duration::from_millis((t * 1000.0) as u64)),
            Grab(ref train) => {
                controller.grab_train(train)?;
            }
            Ungrab(ref train) => match controller.grabs().grab_id_of(train) {
                Some(id) => {
                    controller.release_train(id);
                }
                None => warn!("Train {} is not grabbed", train),
            },
            Place(ref train, ref segments) => {
                if segments.is_empty() {
                    track.remove_train(train);
                } else {
                    track.place_train(train, segments.clone());
                }
            }
            Occupy(ref segment, occupied) => track.set_occupied(segment, occupied),
            SetAspect(ref signal, aspect) => track.set_signal_aspect(signal, aspect)?,
            Grant(ref train, ref route) => match controller.grant_route(train, route) {
                Ok(granted) => {
                    for fault in granted.faults {
                        warn!("Route {} granted with fault: {}", granted.route_id, fault);
                    }
                }
                Err(ControllerError::Interlocking(InterlockingError::NotGrantable(_))) |
                Err(ControllerError::Interlocking(InterlockingError::NotClear(_))) => {}
                Err(e) => return Err(e.into()),
            },
            Request(ref train, ref source, ref destination) => {
                let status = controller.request_route(train, source, destination)?;
                info!("Request {} {} -> {}: {:?}", train, source, destination, status);
            }
            Release(ref route) => controller.release_route(route)?,
            Drive(ref train, ref route, mode) => controller.start_drive(train, route, mode)?,
            Await(ref train, timeout) => {
                let timeout = timeout.map(|t| Duration::from_millis((t * 1000.0) as u64));
                for outcome in controller.await_drives(train, timeout) {
                    info!("Drive of {} ended: {:?}", train, outcome);
                }
            }
        }
    }

    controller.shutdown()?;
    let mut h = history.lock().unwrap_or_else(|e| e.into_inner());
    Ok(History { events: std::mem::replace(&mut h.events, Vec::new()) })
}

use std::path::Path;
pub type AppResult<T> = Result<T, failure::Error>;

pub fn read_file(f: &Path) -> AppResult<String> {
    use std::fs::File;
    use std::io::prelude::*;
    use std::io::BufReader;

    let file = File::open(f)?;
    let mut file = BufReader::new(&file);
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

pub fn get_table(s: &Path) -> AppResult<InterlockingTable> {
    let contents = read_file(s)?;
    get_table_string(&contents)
}

pub fn get_table_string(s: &str) -> AppResult<InterlockingTable> {
    use input::table_parser::{lexer, parse};
    let lex = lexer(s.chars())?;
    let table = parse(&lex)?;
    Ok(table)
}

pub fn get_scenario(s: &Path) -> AppResult<Scenario> {
    let contents = read_file(s)?;
    let scenario = input::scenario::parse_scenario(&contents)?;
    Ok(scenario)
}

use crate::input::interlocking_table::{Aspect, PointPosition, RouteId, SegmentId, SignalId, TrainId};
use crate::railway::drive::DriveState;
use std::sync::{Arc, Mutex};

/// Receives every observable change made by the interlocker or the track.
pub type EventLogger = Arc<dyn Fn(InterlockingLogEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum RouteStatus {
    Granted(TrainId),
    NotGrantable,
    NotClear,
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterlockingLogEvent {
    Route(RouteId, RouteStatus),
    Aspect(SignalId, Aspect),
    Point(String, PointPosition),
    Occupied(SegmentId, bool),
    Position(TrainId, Vec<SegmentId>),
    Grab(TrainId, bool),
    Drive(TrainId, RouteId, DriveState),
}

#[derive(Debug, Default)]
pub struct History {
    pub events: Vec<InterlockingLogEvent>,
}

impl History {
    pub fn routes<'a>(&'a self) -> impl Iterator<Item = (&'a str, &'a RouteStatus)> + 'a {
        self.events.iter().filter_map(|e| match *e {
            InterlockingLogEvent::Route(ref r, ref s) => Some((r.as_str(), s)),
            _ => None,
        })
    }
}

/// A logger which appends to a shared history, and the handle to read it back.
pub fn recorder() -> (EventLogger, Arc<Mutex<History>>) {
    let history = Arc::new(Mutex::new(History::default()));
    let log = history.clone();
    let logger: EventLogger = Arc::new(move |ev| {
        if let Ok(mut h) = log.lock() {
            h.events.push(ev);
        }
    });
    (logger, history)
}

pub fn null_logger() -> EventLogger {
    Arc::new(|_| {})
}

use crate::input::interlocking_table::*;
use crate::output::history::{EventLogger, InterlockingLogEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum AdapterError {
    #[fail(display = "unknown signal \"{}\"", _0)]
    UnknownSignal(String),
    #[fail(display = "unknown point \"{}\"", _0)]
    UnknownPoint(String),
    #[fail(display = "{} refused the command: {}", id, reason)]
    Refused { id: String, reason: String },
}

/// Poll-only view of the physical track. Implemented by the hardware layer;
/// every call may be made from any thread.
pub trait TrackState: Send + Sync {
    /// `None` when the aspect is unknown.
    fn signal_aspect(&self, signal: &str) -> Option<Aspect>;
    fn set_signal_aspect(&self, signal: &str, aspect: Aspect) -> Result<(), AdapterError>;
    fn segment_occupied(&self, segment: &str) -> bool;
    /// Segments the train is detected on. Empty when the train is off track.
    fn train_position(&self, train: &str) -> Vec<SegmentId>;
    fn set_point_position(&self, point: &str, position: PointPosition) -> Result<(), AdapterError>;
}

#[derive(Debug)]
struct SimState {
    aspects: HashMap<SignalId, Aspect>,
    points: HashMap<PointId, PointPosition>,
    occupied: HashSet<SegmentId>,
    trains: HashMap<TrainId, Vec<SegmentId>>,
    jammed: HashSet<String>,
}

/// In-memory track used by the scenario runner and the tests. Occupancy is
/// the union of manually occupied segments and the segments under trains.
pub struct SimulatedTrack {
    state: Mutex<SimState>,
    logger: EventLogger,
}

impl SimulatedTrack {
    /// All signals start at stop and all points in the normal position.
    pub fn new(topology: &Topology, logger: EventLogger) -> SimulatedTrack {
        let aspects = topology.signals.keys().map(|s| (s.clone(), Aspect::Stop)).collect();
        let points = topology.points.iter().map(|p| (p.clone(), PointPosition::Normal)).collect();
        SimulatedTrack {
            state: Mutex::new(SimState {
                aspects,
                points,
                occupied: HashSet::new(),
                trains: HashMap::new(),
                jammed: HashSet::new(),
            }),
            logger,
        }
    }

    fn lock(&self) -> MutexGuard<SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn place_train(&self, train: &str, segments: Vec<SegmentId>) {
        self.lock().trains.insert(train.to_string(), segments.clone());
        (self.logger)(InterlockingLogEvent::Position(train.to_string(), segments));
    }

    pub fn remove_train(&self, train: &str) {
        self.lock().trains.remove(train);
        (self.logger)(InterlockingLogEvent::Position(train.to_string(), Vec::new()));
    }

    pub fn set_occupied(&self, segment: &str, occupied: bool) {
        {
            let mut state = self.lock();
            if occupied {
                state.occupied.insert(segment.to_string());
            } else {
                state.occupied.remove(segment);
            }
        }
        (self.logger)(InterlockingLogEvent::Occupied(segment.to_string(), occupied));
    }

    /// Makes every further command to this signal or point fail.
    pub fn jam(&self, id: &str) {
        self.lock().jammed.insert(id.to_string());
    }

    pub fn point_position(&self, point: &str) -> Option<PointPosition> {
        self.lock().points.get(point).cloned()
    }

    /// Forgets the aspect of a signal, as if the hardware stopped reporting it.
    pub fn lose_signal(&self, signal: &str) {
        self.lock().aspects.remove(signal);
    }
}

impl TrackState for SimulatedTrack {
    fn signal_aspect(&self, signal: &str) -> Option<Aspect> {
        self.lock().aspects.get(signal).cloned()
    }

    fn set_signal_aspect(&self, signal: &str, aspect: Aspect) -> Result<(), AdapterError> {
        {
            let mut state = self.lock();
            if state.jammed.contains(signal) {
                return Err(AdapterError::Refused { id: signal.to_string(),
                                                   reason: "signal jammed".to_string() });
            }
            match state.aspects.get_mut(signal) {
                Some(a) => *a = aspect,
                None => return Err(AdapterError::UnknownSignal(signal.to_string())),
            }
        }
        (self.logger)(InterlockingLogEvent::Aspect(signal.to_string(), aspect));
        Ok(())
    }

    fn segment_occupied(&self, segment: &str) -> bool {
        let state = self.lock();
        state.occupied.contains(segment)
            || state.trains.values().any(|segs| segs.iter().any(|s| s == segment))
    }

    fn train_position(&self, train: &str) -> Vec<SegmentId> {
        self.lock().trains.get(train).cloned().unwrap_or_default()
    }

    fn set_point_position(&self, point: &str, position: PointPosition) -> Result<(), AdapterError> {
        {
            let mut state = self.lock();
            if state.jammed.contains(point) {
                return Err(AdapterError::Refused { id: point.to_string(),
                                                   reason: "point jammed".to_string() });
            }
            match state.points.get_mut(point) {
                Some(p) => *p = position,
                None => return Err(AdapterError::UnknownPoint(point.to_string())),
            }
        }
        (self.logger)(InterlockingLogEvent::Point(point.to_string(), position));
        Ok(())
    }
}

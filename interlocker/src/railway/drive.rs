use crate::input::interlocking_table::*;
use crate::output::history::{EventLogger, InterlockingLogEvent};
use crate::railway::cancel::CancelToken;
use crate::railway::interlocking::{Interlocker, InterlockingError};
use crate::railway::track::AdapterError;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Signal progression only. The route stays granted until released.
    Manual,
    /// Releases the route once the train stands on its last segment.
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Initializing,
    Progressing,
    Completed,
    Aborted,
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum AbortReason {
    #[fail(display = "unknown route \"{}\"", _0)]
    UnknownRoute(RouteId),
    #[fail(display = "route {} has fewer than two signals", _0)]
    TooFewSignals(RouteId),
    #[fail(display = "route {} is not granted to the train", _0)]
    NotGranted(RouteId),
    #[fail(display = "cancelled")]
    Cancelled,
    #[fail(display = "drive task panicked")]
    Panicked,
}

#[derive(Debug)]
struct SignalRecord {
    signal: SignalId,
    path_index: usize,
    stopped: bool,
}

/// Which route signals a train has passed, and which of them are at stop.
#[derive(Debug)]
pub struct SignalProgression {
    records: Vec<SignalRecord>,
    /// Path position of each segment occurring exactly once in the path.
    positions: HashMap<SegmentId, usize>,
    position: Option<usize>,
}

impl SignalProgression {
    /// `repeated` flags the path elements whose segment occurs more than
    /// once; those never move the train's position.
    pub fn new(route: &Route, repeated: &[bool]) -> Result<SignalProgression, AbortReason> {
        if route.signals.len() < 2 {
            return Err(AbortReason::TooFewSignals(route.id.clone()));
        }
        let records = route.signals
            .iter()
            .map(|s| {
                let path_index = route.path_index_of(s).unwrap_or_else(|| {
                    // Usually the source signal, which sits before the first segment.
                    debug!("Signal {} is not on the path of route {}", s, route.id);
                    0
                });
                SignalRecord { signal: s.clone(), path_index, stopped: false }
            })
            .collect();

        let mut positions = HashMap::new();
        for (i, element) in route.path.iter().enumerate() {
            if let Some(seg) = element.segment() {
                if !repeated.get(i).cloned().unwrap_or(false) {
                    positions.insert(seg.to_string(), i);
                }
            }
        }

        Ok(SignalProgression { records, positions, position: None })
    }

    /// Furthest path position among the occupied segments.
    pub fn position_of(&self, occupied: &[SegmentId]) -> Option<usize> {
        occupied.iter().filter_map(|s| self.positions.get(s)).cloned().max()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Moves the train forward to where it is detected, and returns the
    /// signals it has passed which still need to be set to stop. The
    /// position never moves backwards.
    pub fn advance(&mut self, occupied: &[SegmentId]) -> Vec<SignalId> {
        if let Some(p) = self.position_of(occupied) {
            if self.position.map(|q| p > q).unwrap_or(true) {
                self.position = Some(p);
            }
        }
        let position = match self.position {
            Some(p) => p,
            None => return Vec::new(),
        };
        self.eligible()
            .filter(|r| !r.stopped && r.path_index <= position)
            .map(|r| r.signal.clone())
            .collect()
    }

    pub fn mark_stopped(&mut self, signal: &str) {
        for r in self.records.iter_mut() {
            if r.signal == signal {
                r.stopped = true;
            }
        }
    }

    pub fn stopped(&self) -> Vec<SignalId> {
        self.records.iter().filter(|r| r.stopped).map(|r| r.signal.clone()).collect()
    }

    /// Every signal except the destination is at stop.
    pub fn is_complete(&self) -> bool {
        self.eligible().all(|r| r.stopped)
    }

    fn eligible<'a>(&'a self) -> impl Iterator<Item = &'a SignalRecord> + 'a {
        let n = self.records.len().saturating_sub(1);
        self.records.iter().take(n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveOutcome {
    pub state: DriveState,
    pub reason: Option<AbortReason>,
    pub stopped: Vec<SignalId>,
    pub released: bool,
    /// Adapter failures met on the way, at most one per signal.
    pub faults: Vec<AdapterError>,
}

impl DriveOutcome {
    fn aborted(reason: AbortReason, stopped: Vec<SignalId>, faults: Vec<AdapterError>) -> DriveOutcome {
        DriveOutcome { state: DriveState::Aborted, reason: Some(reason), stopped, released: false, faults }
    }
}

pub struct DriveHandle {
    train: TrainId,
    route_id: RouteId,
    token: CancelToken,
    state: Arc<Mutex<DriveState>>,
    thread: JoinHandle<DriveOutcome>,
}

impl DriveHandle {
    pub fn train(&self) -> &str {
        &self.train
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn state(&self) -> DriveState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_finished(&self) -> bool {
        match self.state() {
            DriveState::Completed | DriveState::Aborted => true,
            _ => false,
        }
    }

    /// Stops the drive at its next poll. Signals are left as they are.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn join(self) -> DriveOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Drive of {} on {} panicked", self.train, self.route_id);
                DriveOutcome::aborted(AbortReason::Panicked, Vec::new(), Vec::new())
            }
        }
    }
}

struct Drive {
    interlocker: Arc<Interlocker>,
    train: TrainId,
    route_id: RouteId,
    mode: DriveMode,
    poll_step: Duration,
    token: CancelToken,
    state: Arc<Mutex<DriveState>>,
    logger: EventLogger,
}

/// Starts the signal progression for `train` on the granted route
/// `route_id` in a background thread. `token` is normally a child of the
/// controller's running token.
pub fn start_drive(interlocker: Arc<Interlocker>,
                   train: &str,
                   route_id: &str,
                   mode: DriveMode,
                   poll_step: Duration,
                   token: CancelToken,
                   logger: EventLogger)
                   -> std::io::Result<DriveHandle> {
    let state = Arc::new(Mutex::new(DriveState::Initializing));
    let drive = Drive {
        interlocker,
        train: train.to_string(),
        route_id: route_id.to_string(),
        mode,
        poll_step,
        token: token.clone(),
        state: state.clone(),
        logger,
    };
    let thread = thread::Builder::new()
        .name(format!("drive-{}-{}", train, route_id))
        .spawn(move || drive.run())?;
    Ok(DriveHandle {
        train: train.to_string(),
        route_id: route_id.to_string(),
        token,
        state,
        thread,
    })
}

impl Drive {
    fn set_state(&self, state: DriveState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        (self.logger)(InterlockingLogEvent::Drive(self.train.clone(), self.route_id.clone(), state));
    }

    fn abort(&self, reason: AbortReason, stopped: Vec<SignalId>, faults: Vec<AdapterError>) -> DriveOutcome {
        match reason {
            AbortReason::Cancelled => info!("Drive of {} on {} cancelled", self.train, self.route_id),
            ref r => warn!("Drive of {} on {} aborted: {}", self.train, self.route_id, r),
        }
        self.set_state(DriveState::Aborted);
        DriveOutcome::aborted(reason, stopped, faults)
    }

    fn still_granted(&self) -> bool {
        self.interlocker.is_granted_to(&self.route_id, &self.train)
    }

    fn run(self) -> DriveOutcome {
        self.set_state(DriveState::Initializing);
        let registry = self.interlocker.registry().clone();
        let track = self.interlocker.track().clone();

        let idx = match registry.index_of(&self.route_id) {
            Some(idx) => idx,
            None => return self.abort(AbortReason::UnknownRoute(self.route_id.clone()), Vec::new(), Vec::new()),
        };
        let route = match registry.route(idx) {
            Some(r) => r,
            None => return self.abort(AbortReason::UnknownRoute(self.route_id.clone()), Vec::new(), Vec::new()),
        };
        let mut progression = match SignalProgression::new(route, registry.repeated_segments(idx)) {
            Ok(p) => p,
            Err(reason) => return self.abort(reason, Vec::new(), Vec::new()),
        };

        self.set_state(DriveState::Progressing);
        info!("Drive of {} on {} started ({:?})", self.train, self.route_id, self.mode);
        let mut faults = Vec::new();
        let mut failing = HashSet::new();
        loop {
            if self.token.is_cancelled() {
                return self.abort(AbortReason::Cancelled, progression.stopped(), faults);
            }
            if !self.still_granted() {
                return self.abort(AbortReason::NotGranted(self.route_id.clone()), progression.stopped(), faults);
            }

            let occupied = track.train_position(&self.train);
            for signal in progression.advance(&occupied) {
                match track.set_signal_aspect(&signal, Aspect::Stop) {
                    Ok(()) => {
                        debug!("{} passed {}, set to stop", self.train, signal);
                        progression.mark_stopped(&signal);
                    }
                    // Retried at every poll, reported once.
                    Err(e) => {
                        if failing.insert(signal.clone()) {
                            error!("Drive of {}: unable to set {} to stop: {}", self.train, signal, e);
                            faults.push(e);
                        }
                    }
                }
            }
            if progression.is_complete() {
                break;
            }
            if self.token.wait(self.poll_step) {
                return self.abort(AbortReason::Cancelled, progression.stopped(), faults);
            }
        }

        let mut released = false;
        if self.mode == DriveMode::Automatic {
            if let Some(last) = route.last_segment() {
                loop {
                    if !self.still_granted() {
                        return self.abort(AbortReason::NotGranted(self.route_id.clone()),
                                          progression.stopped(),
                                          faults);
                    }
                    if track.segment_occupied(last) {
                        break;
                    }
                    if self.token.wait(self.poll_step) {
                        return self.abort(AbortReason::Cancelled, progression.stopped(), faults);
                    }
                }
            }
            // The route may have changed hands since the last check.
            match self.interlocker.release_route_if_granted_to(&self.route_id, &self.train) {
                Ok(true) => released = true,
                Ok(false) => {
                    return self.abort(AbortReason::NotGranted(self.route_id.clone()), progression.stopped(), faults)
                }
                Err(InterlockingError::AdapterFailure(e)) => {
                    error!("Drive of {}: releasing {} failed: {}", self.train, self.route_id, e);
                    released = true;
                    faults.push(e);
                }
                Err(e) => error!("Drive of {}: releasing {} failed: {}", self.train, self.route_id, e),
            }
        }

        info!("Drive of {} on {} completed", self.train, self.route_id);
        self.set_state(DriveState::Completed);
        DriveOutcome {
            state: DriveState::Completed,
            reason: None,
            stopped: progression.stopped(),
            released,
            faults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_table_string;
    use crate::output::history::{null_logger, recorder};
    use crate::railway::algorithm;
    use crate::railway::registry::RouteRegistry;
    use crate::railway::track::{AdapterError, SimulatedTrack, TrackState};

    const TABLE: &str = "
        segments [segA, segB, segC, segX, segD]
        signals [signalA, signalB, signalC, signalD]
        route R0 { source signalA destination signalB orientation clockwise length 30
                   path [segA, segB, signalC, segC] signals [signalA, signalC, signalB] }
        route loop { source signalA destination signalB orientation clockwise length 40
                     path [segA, segX, signalC, segB, segX, signalD, segD]
                     signals [signalA, signalC, signalD, signalB] }
        route stub { source signalA destination signalA orientation clockwise length 1
                     path [segA, segB] signals [signalA] }
        route spur { source signalA destination signalB orientation clockwise length 30
                     path [segA, signalC, segB, segC] signals [signalA, signalC, signalB] }
    ";

    fn route(id: &str) -> (RouteRegistry, usize) {
        let reg = RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap();
        let idx = reg.index_of(id).unwrap();
        (reg, idx)
    }

    fn segs(s: &[&str]) -> Vec<SegmentId> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn progression_stops_passed_signals() {
        let (reg, idx) = route("R0");
        let mut p = SignalProgression::new(reg.route(idx).unwrap(), reg.repeated_segments(idx)).unwrap();
        assert!(p.advance(&segs(&[])).is_empty());
        assert_eq!(p.advance(&segs(&["segA"])), segs(&["signalA"]));
        p.mark_stopped("signalA");
        assert!(!p.is_complete());
        assert!(p.advance(&segs(&["segB"])).is_empty());
        assert_eq!(p.advance(&segs(&["segB", "segC"])), segs(&["signalC"]));
        p.mark_stopped("signalC");
        assert!(p.is_complete());
        assert_eq!(p.stopped(), segs(&["signalA", "signalC"]));
    }

    #[test]
    fn repeated_segment_does_not_jump_ahead() {
        let (reg, idx) = route("loop");
        let mut p = SignalProgression::new(reg.route(idx).unwrap(), reg.repeated_segments(idx)).unwrap();
        // segX occurs twice; a train on it has no known position.
        assert_eq!(p.position_of(&segs(&["segX"])), None);
        assert_eq!(p.advance(&segs(&["segA", "segX"])), segs(&["signalA"]));
        assert_eq!(p.position(), Some(0));
        p.mark_stopped("signalA");
        assert_eq!(p.advance(&segs(&["segX", "segB"])), segs(&["signalC"]));
        p.mark_stopped("signalC");
        // Falling back onto only the repeated segment keeps the position.
        assert!(p.advance(&segs(&["segX"])).is_empty());
        assert_eq!(p.position(), Some(3));
        assert_eq!(p.advance(&segs(&["segD"])), segs(&["signalD"]));
        p.mark_stopped("signalD");
        assert!(p.is_complete());
    }

    #[test]
    fn too_few_signals() {
        let (reg, idx) = route("stub");
        assert_eq!(SignalProgression::new(reg.route(idx).unwrap(), reg.repeated_segments(idx)).err(),
                   Some(AbortReason::TooFewSignals("stub".to_string())));
    }

    fn interlocker() -> (Arc<Interlocker>, Arc<SimulatedTrack>) {
        let reg = Arc::new(RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap());
        let track = Arc::new(SimulatedTrack::new(reg.topology(), null_logger()));
        let il = Interlocker::new(reg, track.clone(), algorithm::by_name("default").unwrap(), null_logger());
        (Arc::new(il), track)
    }

    #[test]
    fn automatic_drive_releases_on_arrival() {
        let (il, track) = interlocker();
        il.grant_route("T1", "R0").unwrap();
        let (logger, history) = recorder();
        let handle = start_drive(il.clone(), "T1", "R0", DriveMode::Automatic,
                                 Duration::from_millis(1), CancelToken::new(), logger).unwrap();
        track.place_train("T1", segs(&["segA"]));
        thread::sleep(Duration::from_millis(20));
        track.place_train("T1", segs(&["segC"]));
        let outcome = handle.join();
        assert_eq!(outcome.state, DriveState::Completed);
        assert!(outcome.released);
        assert_eq!(il.assigned_train("R0").unwrap(), None);
        assert_eq!(track.signal_aspect("signalC"), Some(Aspect::Stop));
        let states: Vec<_> = history.lock().unwrap().events.iter().filter_map(|e| match *e {
            InterlockingLogEvent::Drive(_, _, s) => Some(s),
            _ => None,
        }).collect();
        assert_eq!(states, vec![DriveState::Initializing, DriveState::Progressing, DriveState::Completed]);
    }

    #[test]
    fn drive_aborts_when_released_or_cancelled() {
        let (il, _track) = interlocker();
        il.grant_route("T1", "R0").unwrap();
        let handle = start_drive(il.clone(), "T1", "R0", DriveMode::Manual,
                                 Duration::from_millis(1), CancelToken::new(), null_logger()).unwrap();
        il.release_route("R0").unwrap();
        let outcome = handle.join();
        assert_eq!(outcome.reason, Some(AbortReason::NotGranted("R0".to_string())));

        il.grant_route("T1", "R0").unwrap();
        let running = CancelToken::new();
        let handle = start_drive(il.clone(), "T1", "R0", DriveMode::Manual,
                                 Duration::from_millis(1), running.child(), null_logger()).unwrap();
        running.cancel();
        let outcome = handle.join();
        assert_eq!(outcome.state, DriveState::Aborted);
        assert_eq!(outcome.reason, Some(AbortReason::Cancelled));
        // Cancellation leaves the route and its signals alone.
        assert_eq!(il.assigned_train("R0").unwrap(), Some("T1".to_string()));
    }

    #[test]
    fn leftover_drive_does_not_release_a_regranted_route() {
        let (il, track) = interlocker();
        il.grant_route("T1", "spur").unwrap();
        // Past signalC, short of the last segment.
        track.place_train("T1", segs(&["segB"]));
        let handle = start_drive(il.clone(), "T1", "spur", DriveMode::Automatic,
                                 Duration::from_millis(300), CancelToken::new(), null_logger()).unwrap();
        thread::sleep(Duration::from_millis(50));

        il.release_route("spur").unwrap();
        track.remove_train("T1");
        il.grant_route("T2", "spur").unwrap();
        track.place_train("T2", segs(&["segC"]));

        let outcome = handle.join();
        assert_eq!(outcome.state, DriveState::Aborted);
        assert_eq!(outcome.reason, Some(AbortReason::NotGranted("spur".to_string())));
        assert!(!outcome.released);
        assert_eq!(il.assigned_train("spur").unwrap(), Some("T2".to_string()));
        assert_eq!(track.signal_aspect("signalA"), Some(Aspect::Go));
    }

    #[test]
    fn jammed_signal_is_reported_once() {
        let (il, track) = interlocker();
        il.grant_route("T1", "R0").unwrap();
        track.jam("signalC");
        track.place_train("T1", segs(&["segC"]));
        let handle = start_drive(il.clone(), "T1", "R0", DriveMode::Manual,
                                 Duration::from_millis(1), CancelToken::new(), null_logger()).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        assert_eq!(track.signal_aspect("signalA"), Some(Aspect::Stop));
        assert_eq!(track.signal_aspect("signalC"), Some(Aspect::Go));

        handle.cancel();
        let outcome = handle.join();
        assert_eq!(outcome.reason, Some(AbortReason::Cancelled));
        assert_eq!(outcome.stopped, segs(&["signalA"]));
        assert_eq!(outcome.faults.len(), 1);
        match outcome.faults[0] {
            AdapterError::Refused { ref id, .. } => assert_eq!(id, "signalC"),
            ref x => panic!("unexpected {:?}", x),
        }
    }
}

use crate::input::interlocking_table::{RouteId, TrainId};
use crate::output::history::{EventLogger, InterlockingLogEvent};
use crate::railway::algorithm::{self, RequestStatus};
use crate::railway::cancel::CancelToken;
use crate::railway::drive::{self, DriveHandle, DriveMode, DriveOutcome, DriveState};
use crate::railway::grab::{GrabError, GrabId, GrabTable};
use crate::railway::interlocking::{Granted, Interlocker, InterlockingError};
use crate::railway::registry::RouteRegistry;
use crate::railway::track::TrackState;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the interlocking algorithm, see `algorithm::ALGORITHMS`.
    pub algorithm: String,
    pub poll_step: Duration,
    pub max_grabbed_trains: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            algorithm: "default".to_string(),
            poll_step: Duration::from_millis(10),
            max_grabbed_trains: 32,
        }
    }
}

#[derive(Debug, Fail)]
pub enum ControllerError {
    #[fail(display = "train {} is not grabbed", _0)]
    NotGrabbed(TrainId),
    #[fail(display = "controller is shutting down")]
    ShuttingDown,
    #[fail(display = "unable to start drive: {}", _0)]
    Spawn(String),
    #[fail(display = "{}", _0)]
    Grab(#[fail(cause)] GrabError),
    #[fail(display = "{}", _0)]
    Interlocking(#[fail(cause)] InterlockingError),
}

impl From<GrabError> for ControllerError {
    fn from(e: GrabError) -> ControllerError {
        ControllerError::Grab(e)
    }
}

impl From<InterlockingError> for ControllerError {
    fn from(e: InterlockingError) -> ControllerError {
        ControllerError::Interlocking(e)
    }
}

/// Ties the interlocker, the grab table and the running drives together.
/// The interlocker, the grab table and the drive list each have their own
/// lock, and no method holds two of them at once.
pub struct Controller {
    interlocker: Arc<Interlocker>,
    grabs: GrabTable,
    drives: Mutex<Vec<DriveHandle>>,
    running: CancelToken,
    config: Config,
    logger: EventLogger,
}

impl Controller {
    pub fn new(registry: Arc<RouteRegistry>,
               track: Arc<dyn TrackState>,
               config: Config,
               logger: EventLogger)
               -> Result<Controller, ControllerError> {
        let algorithm = algorithm::by_name(&config.algorithm).ok_or_else(|| {
            InterlockingError::InvalidParameter(format!("unknown algorithm \"{}\"", config.algorithm))
        })?;
        let interlocker = Arc::new(Interlocker::new(registry, track, algorithm, logger.clone()));
        info!("Controller started with algorithm {}, {} grab slots",
              config.algorithm,
              config.max_grabbed_trains);
        Ok(Controller {
            interlocker,
            grabs: GrabTable::new(config.max_grabbed_trains),
            drives: Mutex::new(Vec::new()),
            running: CancelToken::new(),
            config,
            logger,
        })
    }

    pub fn interlocker(&self) -> &Arc<Interlocker> {
        &self.interlocker
    }

    pub fn grabs(&self) -> &GrabTable {
        &self.grabs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn drives(&self) -> MutexGuard<Vec<DriveHandle>> {
        self.drives.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Joins and drops the drives that have ended. Their outcomes are only
    /// logged; `await_drives` sees just the drives still in the list.
    fn reap_finished(&self) {
        let finished: Vec<DriveHandle> = {
            let mut drives = self.drives();
            let (done, running): (Vec<_>, Vec<_>) = drives.drain(..).partition(|d| d.is_finished());
            *drives = running;
            done
        };
        for d in finished {
            let (train, route_id) = (d.train().to_string(), d.route_id().to_string());
            let outcome = d.join();
            debug!("Drive of {} on {} reaped: {:?}", train, route_id, outcome);
        }
    }

    fn require_running(&self) -> Result<(), ControllerError> {
        if self.running.is_cancelled() {
            Err(ControllerError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn require_grabbed(&self, train: &str) -> Result<(), ControllerError> {
        if self.grabs.is_grabbed(train) {
            Ok(())
        } else {
            warn!("Train {} is not grabbed", train);
            Err(ControllerError::NotGrabbed(train.to_string()))
        }
    }

    pub fn grab_train(&self, train: &str) -> Result<GrabId, ControllerError> {
        self.require_running()?;
        let id = self.grabs.grab_train(train)?;
        (self.logger)(InterlockingLogEvent::Grab(train.to_string(), true));
        Ok(id)
    }

    /// Frees the grab slot and cancels the train's drives.
    pub fn release_train(&self, id: GrabId) -> Option<TrainId> {
        let train = self.grabs.release_train(id)?;
        for d in self.drives().iter().filter(|d| d.train() == train) {
            d.cancel();
        }
        (self.logger)(InterlockingLogEvent::Grab(train.clone(), false));
        Some(train)
    }

    pub fn grant_route(&self, train: &str, route_id: &str) -> Result<Granted, ControllerError> {
        self.require_running()?;
        Ok(self.interlocker.grant_route(train, route_id)?)
    }

    pub fn request_route(&self, train: &str, source: &str, destination: &str)
                         -> Result<RequestStatus, ControllerError> {
        self.require_running()?;
        self.require_grabbed(train)?;
        Ok(self.interlocker.request_route(train, source, destination)?)
    }

    pub fn release_route(&self, route_id: &str) -> Result<(), ControllerError> {
        Ok(self.interlocker.release_route(route_id)?)
    }

    pub fn start_drive(&self, train: &str, route_id: &str, mode: DriveMode) -> Result<(), ControllerError> {
        self.require_running()?;
        self.require_grabbed(train)?;
        if self.interlocker.registry().index_of(route_id).is_none() {
            return Err(InterlockingError::InvalidParameter(format!("unknown route \"{}\"", route_id)).into());
        }
        let handle = drive::start_drive(self.interlocker.clone(),
                                        train,
                                        route_id,
                                        mode,
                                        self.config.poll_step,
                                        self.running.child(),
                                        self.logger.clone())
            .map_err(|e| ControllerError::Spawn(e.to_string()))?;
        self.reap_finished();
        self.drives().push(handle);
        Ok(())
    }

    pub fn active_drives(&self) -> Vec<(TrainId, RouteId, DriveState)> {
        self.reap_finished();
        self.drives()
            .iter()
            .map(|d| (d.train().to_string(), d.route_id().to_string(), d.state()))
            .collect()
    }

    /// Waits for every drive of `train` to end. Drives still running when
    /// the timeout expires are cancelled.
    pub fn await_drives(&self, train: &str, timeout: Option<Duration>) -> Vec<DriveOutcome> {
        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            while self.drives().iter().any(|d| d.train() == train && !d.is_finished()) {
                if Instant::now() >= deadline || self.running.wait(self.config.poll_step) {
                    warn!("Cancelling unfinished drives of {}", train);
                    for d in self.drives().iter().filter(|d| d.train() == train) {
                        d.cancel();
                    }
                    break;
                }
            }
        }
        let handles: Vec<DriveHandle> = {
            let mut drives = self.drives();
            let (mine, rest): (Vec<_>, Vec<_>) = drives.drain(..).partition(|d| d.train() == train);
            *drives = rest;
            mine
        };
        handles.into_iter().map(|d| d.join()).collect()
    }

    /// Cancels all drives, waits for them, and releases every granted route
    /// and grabbed train.
    pub fn shutdown(&self) -> Result<(), ControllerError> {
        info!("Controller shutting down");
        self.running.cancel();
        let handles: Vec<DriveHandle> = self.drives().drain(..).collect();
        for d in handles {
            let outcome = d.join();
            info!("Drive ended in state {:?}", outcome.state);
        }
        let released = self.interlocker.release_all();
        for (id, _) in self.grabs.grabbed() {
            self.release_train(id);
        }
        Ok(released?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_table_string;
    use crate::output::history::null_logger;
    use crate::railway::track::SimulatedTrack;

    const TABLE: &str = "
        segments [s1, s2]
        signals [a, b]
        route r { source a destination b orientation clockwise length 10 path [s1, s2] signals [a, b] }
    ";

    fn controller() -> (Controller, Arc<SimulatedTrack>) {
        let reg = Arc::new(RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap());
        let track = Arc::new(SimulatedTrack::new(reg.topology(), null_logger()));
        let config = Config { poll_step: Duration::from_millis(1), ..Config::default() };
        (Controller::new(reg, track.clone(), config, null_logger()).unwrap(), track)
    }

    #[test]
    fn drives_and_requests_need_a_grab() {
        let (c, _track) = controller();
        match c.request_route("T1", "a", "b") {
            Err(ControllerError::NotGrabbed(t)) => assert_eq!(t, "T1"),
            x => panic!("unexpected {:?}", x),
        }
        match c.start_drive("T1", "r", DriveMode::Manual) {
            Err(ControllerError::NotGrabbed(_)) => (),
            x => panic!("unexpected {:?}", x),
        }
        c.grab_train("T1").unwrap();
        assert_eq!(c.request_route("T1", "a", "b").unwrap(), RequestStatus::Granted("r".to_string()));
        match c.start_drive("T1", "nope", DriveMode::Manual) {
            Err(ControllerError::Interlocking(InterlockingError::InvalidParameter(_))) => (),
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn shutdown_cancels_and_releases() {
        let (c, _track) = controller();
        c.grab_train("T1").unwrap();
        c.grant_route("T1", "r").unwrap();
        c.start_drive("T1", "r", DriveMode::Manual).unwrap();
        assert_eq!(c.active_drives().len(), 1);
        c.shutdown().unwrap();
        assert!(c.active_drives().is_empty());
        assert!(c.interlocker().granted_routes().is_empty());
        assert!(!c.grabs().is_grabbed("T1"));
        match c.grab_train("T2") {
            Err(ControllerError::ShuttingDown) => (),
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn finished_drives_are_dropped() {
        let (c, track) = controller();
        c.grab_train("T1").unwrap();
        c.grant_route("T1", "r").unwrap();
        c.start_drive("T1", "r", DriveMode::Automatic).unwrap();
        track.place_train("T1", vec!["s2".to_string()]);
        let mut waited = 0;
        while c.interlocker().assigned_train("r").unwrap().is_some() && waited < 500 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(c.active_drives().is_empty());
        assert_eq!(c.drives().len(), 0);

        // A later drive does not bring the old one back.
        track.remove_train("T1");
        c.grant_route("T1", "r").unwrap();
        c.start_drive("T1", "r", DriveMode::Manual).unwrap();
        assert_eq!(c.drives().len(), 1);
        c.shutdown().unwrap();
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let reg = Arc::new(RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap());
        let track = Arc::new(SimulatedTrack::new(reg.topology(), null_logger()));
        let config = Config { algorithm: "bahndsl".to_string(), ..Config::default() };
        assert!(Controller::new(reg, track, config, null_logger()).is_err());
    }
}

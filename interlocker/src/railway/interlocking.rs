use crate::input::interlocking_table::*;
use crate::output::history::{EventLogger, InterlockingLogEvent, RouteStatus};
use crate::railway::algorithm::{self, InterlockingAlgorithm, RequestStatus, RouteRequest};
use crate::railway::registry::{RouteIdx, RouteRegistry};
use crate::railway::sectional;
use crate::railway::track::{AdapterError, TrackState};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum InterlockingError {
    #[fail(display = "route {} is not grantable", _0)]
    NotGrantable(RouteId),
    #[fail(display = "route {} is not clear", _0)]
    NotClear(RouteId),
    #[fail(display = "invalid parameter: {}", _0)]
    InvalidParameter(String),
    #[fail(display = "track adapter failure: {}", _0)]
    AdapterFailure(#[fail(cause)] AdapterError),
}

/// How a granted conflicting route affects a new grant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Grantable when every granted conflict passes the sectional check.
    Sectional,
    /// Any granted conflict blocks.
    Blocking,
}

/// A committed grant. Actuation faults are reported here; the grant itself
/// is not undone by them.
#[derive(Debug, Clone, PartialEq)]
pub struct Granted {
    pub route_id: RouteId,
    pub faults: Vec<AdapterError>,
}

impl Granted {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

struct InterlockerState {
    assigned: Vec<Option<TrainId>>,
    algorithm: Box<dyn InterlockingAlgorithm>,
}

/// Owns the mutable part of the route set: which train holds which route.
/// Grant, release and the algorithm ticks all run under one lock.
pub struct Interlocker {
    registry: Arc<RouteRegistry>,
    track: Arc<dyn TrackState>,
    state: Mutex<InterlockerState>,
    logger: EventLogger,
}

/// The route set as seen from inside the interlocker lock.
pub struct Interlocking<'a> {
    registry: &'a RouteRegistry,
    track: &'a dyn TrackState,
    assigned: &'a mut Vec<Option<TrainId>>,
    policy: ConflictPolicy,
    logger: &'a EventLogger,
}

impl<'a> Interlocking<'a> {
    pub fn registry(&self) -> &RouteRegistry {
        self.registry
    }

    pub fn assigned_train(&self, idx: RouteIdx) -> Option<&str> {
        self.assigned.get(idx).and_then(|t| t.as_ref()).map(|t| t.as_str())
    }

    /// Conflicting routes of `idx` that are currently held by some train.
    pub fn granted_conflicts(&self, idx: RouteIdx) -> Vec<RouteIdx> {
        self.registry
            .conflicts(idx)
            .iter()
            .cloned()
            .filter(|c| *c != idx && self.assigned_train(*c).is_some())
            .collect()
    }

    /// Free, and every held conflict is admissible under the policy.
    pub fn is_grantable(&self, idx: RouteIdx) -> bool {
        if self.assigned_train(idx).is_some() {
            return false;
        }
        let conflicts = self.granted_conflicts(idx);
        match self.policy {
            ConflictPolicy::Blocking => conflicts.is_empty(),
            ConflictPolicy::Sectional => conflicts.iter().all(|c| {
                sectional::is_route_conflict_safe(self.registry, self.track, *c, idx)
            }),
        }
    }

    /// Every route signal at stop and every path segment unoccupied.
    pub fn is_clear(&self, idx: RouteIdx) -> bool {
        match self.registry.route(idx) {
            Some(route) => route_is_clear(route, self.track),
            None => false,
        }
    }

    pub fn grant(&mut self, train: &str, idx: RouteIdx) -> Result<Granted, InterlockingError> {
        let route = match self.registry.route(idx) {
            Some(r) => r,
            None => return Err(InterlockingError::InvalidParameter(format!("route index {}", idx))),
        };
        if train.is_empty() {
            return Err(InterlockingError::InvalidParameter("empty train id".to_string()));
        }

        if !self.is_grantable(idx) {
            info!("Route {} is not grantable for train {}", route.id, train);
            (self.logger)(InterlockingLogEvent::Route(route.id.clone(), RouteStatus::NotGrantable));
            return Err(InterlockingError::NotGrantable(route.id.clone()));
        }
        if !self.is_clear(idx) {
            info!("Route {} is not clear for train {}", route.id, train);
            (self.logger)(InterlockingLogEvent::Route(route.id.clone(), RouteStatus::NotClear));
            return Err(InterlockingError::NotClear(route.id.clone()));
        }

        self.assigned[idx] = Some(train.to_string());
        (self.logger)(InterlockingLogEvent::Route(route.id.clone(), RouteStatus::Granted(train.to_string())));
        info!("Route {} granted to train {}", route.id, train);

        let mut faults = Vec::new();
        for &(ref point, position) in route.points.iter() {
            if let Err(e) = self.track.set_point_position(point, position) {
                error!("Route {}: unable to set point {} to {}: {}", route.id, point, position.name(), e);
                faults.push(e);
            }
        }
        let topology = self.registry.topology();
        let proceeding = route.signals.len().saturating_sub(1);
        for signal in route.signals.iter().take(proceeding) {
            let aspect = topology.signal_kind(signal).unwrap_or(SignalKind::Main).proceed_aspect();
            if let Err(e) = self.track.set_signal_aspect(signal, aspect) {
                error!("Route {}: unable to set signal {} to {}: {}", route.id, signal, aspect.name(), e);
                faults.push(e);
            }
        }

        Ok(Granted { route_id: route.id.clone(), faults })
    }

    /// Returns whether the route was held. Every route signal is commanded
    /// to stop even if one of them fails; the first failure is returned
    /// after the assignment has been cleared.
    pub fn release(&mut self, idx: RouteIdx) -> Result<bool, InterlockingError> {
        let route = match self.registry.route(idx) {
            Some(r) => r,
            None => return Err(InterlockingError::InvalidParameter(format!("route index {}", idx))),
        };
        if self.assigned[idx].is_none() {
            debug!("Route {} released while not granted", route.id);
            return Ok(false);
        }

        let mut fault = None;
        for signal in route.signals.iter() {
            if let Err(e) = self.track.set_signal_aspect(signal, Aspect::Stop) {
                error!("Route {}: unable to set signal {} to stop: {}", route.id, signal, e);
                if fault.is_none() {
                    fault = Some(e);
                }
            }
        }

        self.assigned[idx] = None;
        (self.logger)(InterlockingLogEvent::Route(route.id.clone(), RouteStatus::Released));
        info!("Route {} released", route.id);

        match fault {
            Some(e) => Err(InterlockingError::AdapterFailure(e)),
            None => Ok(true),
        }
    }
}

pub fn route_is_clear(route: &Route, track: &dyn TrackState) -> bool {
    for signal in route.signals.iter() {
        if track.signal_aspect(signal) != Some(Aspect::Stop) {
            debug!("Route {}: signal {} is not at stop", route.id, signal);
            return false;
        }
    }
    for segment in route.segments() {
        if track.segment_occupied(segment) {
            debug!("Route {}: segment {} is occupied", route.id, segment);
            return false;
        }
    }
    true
}

impl Interlocker {
    pub fn new(registry: Arc<RouteRegistry>,
               track: Arc<dyn TrackState>,
               algorithm: Box<dyn InterlockingAlgorithm>,
               logger: EventLogger)
               -> Interlocker {
        let assigned = vec![None; registry.len()];
        Interlocker {
            registry,
            track,
            state: Mutex::new(InterlockerState { assigned, algorithm }),
            logger,
        }
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    pub fn track(&self) -> &Arc<dyn TrackState> {
        &self.track
    }

    fn lock(&self) -> MutexGuard<InterlockerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn index(&self, route_id: &str) -> Result<RouteIdx, InterlockingError> {
        self.registry.index_of(route_id).ok_or_else(|| {
            warn!("Unknown route id \"{}\"", route_id);
            InterlockingError::InvalidParameter(format!("unknown route \"{}\"", route_id))
        })
    }

    /// Runs `f` on the locked route set, with the conflict policy of the
    /// selected algorithm.
    fn with_interlocking<T, F>(&self, f: F) -> T
        where F: FnOnce(&mut Interlocking, &mut dyn InterlockingAlgorithm) -> T
    {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut view = Interlocking {
            registry: &self.registry,
            track: &*self.track,
            assigned: &mut state.assigned,
            policy: state.algorithm.conflict_policy(),
            logger: &self.logger,
        };
        f(&mut view, &mut *state.algorithm)
    }

    pub fn grant_route(&self, train: &str, route_id: &str) -> Result<Granted, InterlockingError> {
        let idx = self.index(route_id)?;
        self.with_interlocking(|il, _| il.grant(train, idx))
    }

    /// Releasing a route that is not granted does nothing.
    pub fn release_route(&self, route_id: &str) -> Result<(), InterlockingError> {
        let idx = self.index(route_id)?;
        self.with_interlocking(|il, _| il.release(idx)).map(|_| ())
    }

    /// Releases `route_id` only while it is held by `train`, deciding and
    /// releasing under the same lock. Returns whether it was released.
    pub fn release_route_if_granted_to(&self, route_id: &str, train: &str) -> Result<bool, InterlockingError> {
        let idx = self.index(route_id)?;
        self.with_interlocking(|il, _| {
            if il.assigned_train(idx) != Some(train) {
                debug!("Route {} is not held by {}, not released", route_id, train);
                return Ok(false);
            }
            il.release(idx)
        })
    }

    pub fn get_route_is_clear(&self, route_id: &str) -> Result<bool, InterlockingError> {
        let idx = self.index(route_id)?;
        match self.registry.route(idx) {
            Some(route) => Ok(route_is_clear(route, &*self.track)),
            None => Err(InterlockingError::InvalidParameter(route_id.to_string())),
        }
    }

    pub fn assigned_train(&self, route_id: &str) -> Result<Option<TrainId>, InterlockingError> {
        let idx = self.index(route_id)?;
        Ok(self.lock().assigned[idx].clone())
    }

    /// Whether `route_id` is currently held by `train`.
    pub fn is_granted_to(&self, route_id: &str, train: &str) -> bool {
        match self.registry.index_of(route_id) {
            Some(idx) => self.lock().assigned[idx].as_ref().map(|t| t == train).unwrap_or(false),
            None => false,
        }
    }

    /// All held routes with their trains, in table order.
    pub fn granted_routes(&self) -> Vec<(RouteId, TrainId)> {
        let state = self.lock();
        state.assigned
            .iter()
            .enumerate()
            .filter_map(|(idx, t)| {
                let train = t.as_ref()?;
                let route = self.registry.route(idx)?;
                Some((route.id.clone(), train.clone()))
            })
            .collect()
    }

    /// Held routes conflicting with `route_id`, with the trains holding them.
    pub fn granted_conflicts(&self, route_id: &str) -> Result<Vec<(RouteId, TrainId)>, InterlockingError> {
        let idx = self.index(route_id)?;
        Ok(self.with_interlocking(|il, _| {
            il.granted_conflicts(idx)
                .into_iter()
                .filter_map(|c| {
                    let route = il.registry().route(c)?;
                    let train = il.assigned_train(c)?;
                    Some((route.id.clone(), train.to_string()))
                })
                .collect()
        }))
    }

    /// Asks the selected algorithm for any route from `source` to
    /// `destination`, ticking it until it terminates.
    pub fn request_route(&self, train: &str, source: &str, destination: &str)
                         -> Result<RequestStatus, InterlockingError> {
        if train.is_empty() {
            return Err(InterlockingError::InvalidParameter("empty train id".to_string()));
        }
        let topology = self.registry.topology();
        for signal in &[source, destination] {
            if !topology.is_signal(signal) {
                warn!("Route request with unknown signal \"{}\"", signal);
                return Err(InterlockingError::InvalidParameter(format!("unknown signal \"{}\"", signal)));
            }
        }

        let request = RouteRequest {
            train: train.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
        };
        let status = self.with_interlocking(|il, algorithm| {
            algorithm.reset(Some(request));
            loop {
                let status = algorithm.tick(il);
                if status != RequestStatus::Pending {
                    algorithm.reset(None);
                    return status;
                }
            }
        });
        match status {
            RequestStatus::Granted(ref r) => info!("Request {} -> {} granted {} to {}", source, destination, r, train),
            ref s => info!("Request {} -> {} for {}: {:?}", source, destination, train, s),
        }
        Ok(status)
    }

    pub fn set_algorithm(&self, name: &str) -> Result<(), InterlockingError> {
        let algorithm = algorithm::by_name(name).ok_or_else(|| {
            warn!("Unknown interlocking algorithm \"{}\"", name);
            InterlockingError::InvalidParameter(format!("unknown algorithm \"{}\"", name))
        })?;
        self.lock().algorithm = algorithm;
        info!("Interlocking algorithm set to {}", name);
        Ok(())
    }

    pub fn algorithm_name(&self) -> String {
        self.lock().algorithm.name().to_string()
    }

    /// Releases every held route. All routes are released even if the
    /// adapter fails on some of them; the first failure is returned.
    pub fn release_all(&self) -> Result<(), InterlockingError> {
        self.with_interlocking(|il, _| {
            let mut first = Ok(());
            for idx in 0..il.registry().len() {
                if let Err(e) = il.release(idx) {
                    if first.is_ok() {
                        first = Err(e);
                    }
                }
            }
            first
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_table_string;
    use crate::output::history::{null_logger, recorder};
    use crate::railway::track::SimulatedTrack;

    const TABLE: &str = "
        segments [segA, segB, segC, segD]
        signals [signalA, signalB, signalC, signalD]
        shunting [signalS]
        points [point1]
        section blockC { segments [segC] entry [signalC, signalD] }
        route R0 { source signalA destination signalB orientation clockwise length 30
                   path [segA, segB, signalC, segC] points [point1 reverse]
                   signals [signalA, signalC, signalB] conflicts [R1] }
        route R1 { source signalD destination signalB orientation anticlockwise length 20
                   path [segD, signalD, segC] signals [signalD, signalB] conflicts [R0] }
        route R2 { source signalS destination signalD orientation clockwise length 5
                   path [segD, signalD] signals [signalS, signalD] }
    ";

    fn setup(algorithm: &str) -> (Interlocker, Arc<SimulatedTrack>) {
        let reg = Arc::new(RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap());
        let track = Arc::new(SimulatedTrack::new(reg.topology(), null_logger()));
        let il = Interlocker::new(reg,
                                  track.clone(),
                                  algorithm::by_name(algorithm).unwrap(),
                                  null_logger());
        (il, track)
    }

    #[test]
    fn grant_sets_points_and_signals() {
        let (il, track) = setup("default");
        let g = il.grant_route("T1", "R0").unwrap();
        assert_eq!(g.route_id, "R0");
        assert!(g.is_clean());
        assert_eq!(il.assigned_train("R0").unwrap(), Some("T1".to_string()));
        assert_eq!(track.point_position("point1"), Some(PointPosition::Reverse));
        assert_eq!(track.signal_aspect("signalA"), Some(Aspect::Go));
        assert_eq!(track.signal_aspect("signalC"), Some(Aspect::Go));
        assert_eq!(track.signal_aspect("signalB"), Some(Aspect::Stop));

        il.grant_route("T2", "R2").unwrap();
        assert_eq!(track.signal_aspect("signalS"), Some(Aspect::Shunt));
    }

    #[test]
    fn duplicate_grant_does_not_mutate() {
        let (il, _track) = setup("default");
        il.grant_route("T1", "R0").unwrap();
        assert_eq!(il.grant_route("T1", "R0"), Err(InterlockingError::NotGrantable("R0".to_string())));
        assert_eq!(il.grant_route("T2", "R0"), Err(InterlockingError::NotGrantable("R0".to_string())));
        assert_eq!(il.granted_routes(), vec![("R0".to_string(), "T1".to_string())]);
    }

    #[test]
    fn not_clear_when_occupied_or_not_stopped() {
        let (il, track) = setup("default");
        track.set_occupied("segB", true);
        assert_eq!(il.get_route_is_clear("R0"), Ok(false));
        assert_eq!(il.grant_route("T1", "R0"), Err(InterlockingError::NotClear("R0".to_string())));
        track.set_occupied("segB", false);
        track.set_signal_aspect("signalB", Aspect::Caution).unwrap();
        assert_eq!(il.grant_route("T1", "R0"), Err(InterlockingError::NotClear("R0".to_string())));
        assert_eq!(il.assigned_train("R0").unwrap(), None);
    }

    #[test]
    fn release_round_trip() {
        let (il, track) = setup("default");
        il.grant_route("T1", "R0").unwrap();
        il.release_route("R0").unwrap();
        assert_eq!(il.assigned_train("R0").unwrap(), None);
        for s in &["signalA", "signalC", "signalB"] {
            assert_eq!(track.signal_aspect(s), Some(Aspect::Stop));
        }
        assert_eq!(il.get_route_is_clear("R0"), Ok(true));
        // Idempotent.
        il.release_route("R0").unwrap();
        il.grant_route("T2", "R0").unwrap();
    }

    #[test]
    fn release_by_holder_only() {
        let (il, track) = setup("default");
        il.grant_route("T2", "R0").unwrap();
        assert_eq!(il.release_route_if_granted_to("R0", "T1"), Ok(false));
        assert_eq!(il.assigned_train("R0").unwrap(), Some("T2".to_string()));
        assert_eq!(track.signal_aspect("signalA"), Some(Aspect::Go));

        assert_eq!(il.release_route_if_granted_to("R0", "T2"), Ok(true));
        assert_eq!(il.assigned_train("R0").unwrap(), None);
        assert_eq!(il.release_route_if_granted_to("R0", "T2"), Ok(false));
        assert!(il.release_route_if_granted_to("R9", "T2").is_err());
    }

    #[test]
    fn invalid_parameters() {
        let (il, _track) = setup("default");
        match il.grant_route("T1", "R9") {
            Err(InterlockingError::InvalidParameter(_)) => (),
            x => panic!("unexpected {:?}", x),
        }
        match il.grant_route("", "R0") {
            Err(InterlockingError::InvalidParameter(_)) => (),
            x => panic!("unexpected {:?}", x),
        }
        assert!(il.release_route("R9").is_err());
        assert!(il.set_algorithm("bogus").is_err());
        assert_eq!(il.algorithm_name(), "default");
    }

    #[test]
    fn actuation_faults_do_not_roll_back() {
        let (il, track) = setup("default");
        track.jam("point1");
        let g = il.grant_route("T1", "R0").unwrap();
        assert_eq!(g.faults.len(), 1);
        assert_eq!(il.assigned_train("R0").unwrap(), Some("T1".to_string()));

        track.jam("signalC");
        match il.release_route("R0") {
            Err(InterlockingError::AdapterFailure(AdapterError::Refused { id, .. })) => assert_eq!(id, "signalC"),
            x => panic!("unexpected {:?}", x),
        }
        assert_eq!(il.assigned_train("R0").unwrap(), None);
        assert_eq!(track.signal_aspect("signalA"), Some(Aspect::Stop));
    }

    #[test]
    fn conflicts_under_both_policies() {
        let (il, track) = setup("default");
        il.grant_route("T1", "R0").unwrap();
        assert_eq!(il.granted_conflicts("R1").unwrap(), vec![("R0".to_string(), "T1".to_string())]);
        assert_eq!(il.grant_route("T2", "R1"), Err(InterlockingError::NotGrantable("R1".to_string())));

        // T1 has passed signalC and left segC.
        track.set_signal_aspect("signalA", Aspect::Stop).unwrap();
        track.set_signal_aspect("signalC", Aspect::Stop).unwrap();
        il.set_algorithm("blocking").unwrap();
        assert_eq!(il.grant_route("T2", "R1"), Err(InterlockingError::NotGrantable("R1".to_string())));
        il.set_algorithm("default").unwrap();
        il.grant_route("T2", "R1").unwrap();
        assert_eq!(il.granted_routes().len(), 2);

        il.release_all().unwrap();
        assert!(il.granted_routes().is_empty());
    }

    #[test]
    fn events_are_logged() {
        let reg = Arc::new(RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap());
        let track = Arc::new(SimulatedTrack::new(reg.topology(), null_logger()));
        let (logger, history) = recorder();
        let il = Interlocker::new(reg, track, algorithm::by_name("default").unwrap(), logger);
        il.grant_route("T1", "R0").unwrap();
        let _ = il.grant_route("T1", "R0");
        il.release_route("R0").unwrap();
        let h = history.lock().unwrap();
        let routes: Vec<_> = h.routes().map(|(r, s)| (r.to_string(), s.clone())).collect();
        assert_eq!(routes,
                   vec![("R0".to_string(), RouteStatus::Granted("T1".to_string())),
                        ("R0".to_string(), RouteStatus::NotGrantable),
                        ("R0".to_string(), RouteStatus::Released)]);
    }
}

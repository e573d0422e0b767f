use crate::input::interlocking_table::{SignalId, TrainId, RouteId};
use crate::railway::interlocking::{ConflictPolicy, Interlocking};
use crate::railway::registry::RouteIdx;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub train: TrainId,
    pub source: SignalId,
    pub destination: SignalId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    /// Not terminated yet; tick again.
    Pending,
    Granted(RouteId),
    NoRoutes,
    NotGrantable,
    NotClear,
}

/// An interlocking algorithm driven by reset/tick. After `reset` with a
/// request, `tick` is called under the interlocker lock until it returns
/// anything other than `Pending`.
pub trait InterlockingAlgorithm: Send {
    fn name(&self) -> &str;
    fn conflict_policy(&self) -> ConflictPolicy;
    fn reset(&mut self, request: Option<RouteRequest>);
    fn tick(&mut self, il: &mut Interlocking) -> RequestStatus;
}

pub const ALGORITHMS: &[&str] = &["default", "blocking"];

pub fn by_name(name: &str) -> Option<Box<dyn InterlockingAlgorithm>> {
    match name {
        "default" | "sectional" => Some(Box::new(RouteSearch::new("default", ConflictPolicy::Sectional))),
        "blocking" => Some(Box::new(RouteSearch::new("blocking", ConflictPolicy::Blocking))),
        _ => None,
    }
}

#[derive(Debug)]
enum SearchState {
    Idle,
    Lookup(RouteRequest),
    Check {
        request: RouteRequest,
        candidates: Vec<RouteIdx>,
        next: usize,
        unclear: bool,
    },
    Done(RequestStatus),
}

/// Looks up the routes between the requested signals and grants the first
/// one that is both grantable and clear. One phase per tick.
pub struct RouteSearch {
    name: &'static str,
    policy: ConflictPolicy,
    state: SearchState,
}

impl RouteSearch {
    pub fn new(name: &'static str, policy: ConflictPolicy) -> RouteSearch {
        RouteSearch { name, policy, state: SearchState::Idle }
    }
}

impl InterlockingAlgorithm for RouteSearch {
    fn name(&self) -> &str {
        self.name
    }

    fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    fn reset(&mut self, request: Option<RouteRequest>) {
        self.state = match request {
            Some(r) => SearchState::Lookup(r),
            None => SearchState::Idle,
        };
    }

    fn tick(&mut self, il: &mut Interlocking) -> RequestStatus {
        let state = std::mem::replace(&mut self.state, SearchState::Idle);
        let (next_state, status) = match state {
            SearchState::Idle => (SearchState::Idle, RequestStatus::NoRoutes),
            SearchState::Done(status) => (SearchState::Done(status.clone()), status),
            SearchState::Lookup(request) => {
                let candidates = il.registry()
                    .indices_by_endpoints(&request.source, &request.destination)
                    .to_vec();
                debug!("{} candidate routes from {} to {}",
                       candidates.len(),
                       request.source,
                       request.destination);
                if candidates.is_empty() {
                    (SearchState::Done(RequestStatus::NoRoutes), RequestStatus::NoRoutes)
                } else {
                    (SearchState::Check { request, candidates, next: 0, unclear: false }, RequestStatus::Pending)
                }
            }
            SearchState::Check { request, candidates, next, mut unclear } => {
                if next >= candidates.len() {
                    let status = if unclear {
                        RequestStatus::NotClear
                    } else {
                        RequestStatus::NotGrantable
                    };
                    (SearchState::Done(status.clone()), status)
                } else {
                    let idx = candidates[next];
                    if il.is_grantable(idx) {
                        if il.is_clear(idx) {
                            match il.grant(&request.train, idx) {
                                Ok(granted) => {
                                    let status = RequestStatus::Granted(granted.route_id);
                                    (SearchState::Done(status.clone()), status)
                                }
                                Err(_) => (SearchState::Check { request, candidates, next: next + 1, unclear },
                                           RequestStatus::Pending),
                            }
                        } else {
                            unclear = true;
                            (SearchState::Check { request, candidates, next: next + 1, unclear },
                             RequestStatus::Pending)
                        }
                    } else {
                        (SearchState::Check { request, candidates, next: next + 1, unclear }, RequestStatus::Pending)
                    }
                }
            }
        };
        self.state = next_state;
        status
    }
}

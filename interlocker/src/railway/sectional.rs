use crate::input::interlocking_table::*;
use crate::railway::registry::{RouteIdx, RouteRegistry};
use crate::railway::track::TrackState;
use log::{debug, warn};

/// Whether `requested` may be granted while the conflicting route `granted`
/// is still held by a train.
///
/// The granted path is walked backwards. Every segment shared with the
/// requested path is checked on its own: the section enclosing it must have
/// no entry signal showing a permissive aspect, and for the first shared
/// segment after each signal, the granted path from that segment back to
/// the preceding signal must be vacated.
///
/// Anything that cannot be established is answered with `false`.
pub fn is_route_conflict_safe(registry: &RouteRegistry,
                              track: &dyn TrackState,
                              granted: RouteIdx,
                              requested: RouteIdx)
                              -> bool {
    let (granted_route, requested_route) = match (registry.route(granted), registry.route(requested)) {
        (Some(g), Some(r)) => (g, r),
        _ => {
            warn!("Sectional check on unknown route index ({}, {})", granted, requested);
            return false;
        }
    };
    if granted_route.path.len() < 2 || requested_route.path.is_empty() {
        warn!("Sectional check on route with a degenerate path ({}, {})",
              granted_route.id,
              requested_route.id);
        return false;
    }

    let entry = &registry.topology().entry_signals;
    let mut encountered_signal = true;
    for (i, element) in granted_route.path.iter().enumerate().rev() {
        let segment = match *element {
            PathElement::Signal(_) => {
                encountered_signal = true;
                continue;
            }
            PathElement::Segment(ref s) => s.as_str(),
        };
        if !requested_route.contains_segment(segment) {
            continue;
        }
        if is_any_entry_signal_permissive(entry, track, segment) {
            debug!("Route {} blocked by {}: entry into {} is permitted",
                   requested_route.id,
                   granted_route.id,
                   segment);
            return false;
        }
        if encountered_signal {
            encountered_signal = false;
            if is_occupied_back_to_preceding_signal(granted_route, track, i) {
                debug!("Route {} blocked by {}: occupied behind {}",
                       requested_route.id,
                       granted_route.id,
                       segment);
                return false;
            }
        }
    }
    true
}

/// By-id form of [`is_route_conflict_safe`]. Unknown ids are never safe.
pub fn is_route_conflict_safe_sectional(registry: &RouteRegistry,
                                        track: &dyn TrackState,
                                        granted: &str,
                                        requested: &str)
                                        -> bool {
    match (registry.index_of(granted), registry.index_of(requested)) {
        (Some(g), Some(r)) => is_route_conflict_safe(registry, track, g, r),
        _ => {
            warn!("Sectional check on unknown route id (\"{}\", \"{}\")", granted, requested);
            false
        }
    }
}

/// A segment outside the entry-signal table, or an entry signal whose
/// aspect is unknown, counts as permissive.
pub fn is_any_entry_signal_permissive(entry: &EntrySignals, track: &dyn TrackState, segment: &str) -> bool {
    match entry.for_segment(segment) {
        None => {
            warn!("No entry signals known for segment {}", segment);
            true
        }
        Some(signals) => signals.iter().any(|s| match track.signal_aspect(s) {
            Some(aspect) => aspect.is_permissive(),
            None => {
                warn!("Aspect of entry signal {} is unknown", s);
                true
            }
        }),
    }
}

/// Occupancy of the segments from `path[index]` back to the nearest signal
/// before it.
pub fn is_occupied_back_to_preceding_signal(route: &Route, track: &dyn TrackState, index: usize) -> bool {
    if index >= route.path.len() {
        return true;
    }
    for element in route.path[..=index].iter().rev() {
        match *element {
            PathElement::Signal(_) => return false,
            PathElement::Segment(ref s) => {
                if track.segment_occupied(s) {
                    return true;
                }
            }
        }
    }
    false
}

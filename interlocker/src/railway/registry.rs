use crate::input::interlocking_table::*;
use log::{debug, info};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Index of a route in the registry. Stable for the registry's lifetime.
pub type RouteIdx = usize;

#[derive(Debug, Fail, PartialEq)]
pub enum TableError {
    #[fail(display = "route id \"{}\" is defined twice", _0)]
    DuplicateRoute(RouteId),
    #[fail(display = "route {} has a path shorter than two elements", _0)]
    ShortPath(RouteId),
    #[fail(display = "route {} conflicts with unknown route {}", _0, _1)]
    UnknownConflict(RouteId, RouteId),
    #[fail(display = "route {} lists signals not starting at its source or not ending at its destination", _0)]
    SignalEndpoints(RouteId),
}

struct RouteEntry {
    route: Route,
    conflicts: SmallVec<[RouteIdx; 8]>,
    /// For each path element: a segment occurring more than once in the path.
    repeated: Vec<bool>,
}

/// Immutable graph of the precomputed routes. Built once from the loaded
/// table; all references between routes are indices into the arena.
pub struct RouteRegistry {
    topology: Topology,
    entries: Vec<RouteEntry>,
    by_id: HashMap<RouteId, RouteIdx>,
    by_endpoints: HashMap<(SignalId, SignalId), SmallVec<[RouteIdx; 2]>>,
}

fn repeated_mask(path: &[PathElement]) -> Vec<bool> {
    let mut count: HashMap<&str, usize> = HashMap::new();
    for seg in path.iter().filter_map(|e| e.segment()) {
        *count.entry(seg).or_insert(0) += 1;
    }
    path.iter()
        .map(|e| match e.segment() {
            Some(seg) => count[seg] > 1,
            None => false,
        })
        .collect()
}

impl RouteRegistry {
    pub fn new(table: InterlockingTable) -> Result<RouteRegistry, TableError> {
        let InterlockingTable { topology, routes } = table;

        let mut by_id = HashMap::new();
        for (idx, route) in routes.iter().enumerate() {
            if by_id.insert(route.id.clone(), idx).is_some() {
                return Err(TableError::DuplicateRoute(route.id.clone()));
            }
        }

        let mut entries = Vec::with_capacity(routes.len());
        let mut by_endpoints: HashMap<_, SmallVec<[RouteIdx; 2]>> = HashMap::new();
        for (idx, route) in routes.into_iter().enumerate() {
            if route.path.len() < 2 {
                return Err(TableError::ShortPath(route.id));
            }
            if let (Some(first), Some(last)) = (route.signals.first(), route.signals.last()) {
                if *first != route.source || *last != route.destination {
                    return Err(TableError::SignalEndpoints(route.id));
                }
            }

            let mut conflicts = SmallVec::new();
            for c in route.conflicts.iter() {
                match by_id.get(c) {
                    Some(cidx) => conflicts.push(*cidx),
                    None => return Err(TableError::UnknownConflict(route.id.clone(), c.clone())),
                }
            }

            let repeated = repeated_mask(&route.path);
            if repeated.iter().any(|r| *r) {
                debug!("Route {} passes the same segment more than once", route.id);
            }

            by_endpoints.entry((route.source.clone(), route.destination.clone()))
                .or_insert_with(SmallVec::new)
                .push(idx);
            entries.push(RouteEntry { route, conflicts, repeated });
        }

        info!("Route registry loaded with {} routes", entries.len());
        Ok(RouteRegistry { topology, entries, by_id, by_endpoints })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<RouteIdx> {
        self.by_id.get(id).cloned()
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<&Route> {
        self.index_of(id).map(|idx| &self.entries[idx].route)
    }

    pub fn route(&self, idx: RouteIdx) -> Option<&Route> {
        self.entries.get(idx).map(|e| &e.route)
    }

    /// Routes from `source` to `destination`, in table order.
    pub fn lookup_by_endpoints(&self, source: &str, destination: &str) -> Vec<&str> {
        self.indices_by_endpoints(source, destination)
            .iter()
            .map(|idx| self.entries[*idx].route.id.as_str())
            .collect()
    }

    pub fn indices_by_endpoints(&self, source: &str, destination: &str) -> &[RouteIdx] {
        match self.by_endpoints.get(&(source.to_string(), destination.to_string())) {
            Some(v) => &v[..],
            None => &[],
        }
    }

    pub fn all_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.route.id.as_str()).collect()
    }

    pub fn conflicts(&self, idx: RouteIdx) -> &[RouteIdx] {
        match self.entries.get(idx) {
            Some(e) => &e.conflicts[..],
            None => &[],
        }
    }

    pub fn repeated_segments(&self, idx: RouteIdx) -> &[bool] {
        match self.entries.get(idx) {
            Some(e) => &e.repeated[..],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_table_string;

    const TABLE: &str = "
        segments [seg1, seg2, seg3]
        signals [sig1, sig2, sig3]
        route a { source sig1 destination sig2 orientation clockwise length 10
                  path [seg1, seg2, seg3, seg2] signals [sig1, sig2] conflicts [c] }
        route b { source sig1 destination sig2 orientation clockwise length 12
                  path [seg1, seg3] signals [sig1, sig2] }
        route c { source sig2 destination sig3 orientation anticlockwise length 5
                  path [seg2, seg3] signals [sig2, sig3] conflicts [a] }
    ";

    fn registry() -> RouteRegistry {
        RouteRegistry::new(get_table_string(TABLE).unwrap()).unwrap()
    }

    #[test]
    fn lookups() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.all_ids(), vec!["a", "b", "c"]);
        assert_eq!(reg.lookup_by_id("c").map(|r| r.length), Some(5.0));
        assert!(reg.lookup_by_id("nope").is_none());
        assert_eq!(reg.lookup_by_endpoints("sig1", "sig2"), vec!["a", "b"]);
        assert!(reg.lookup_by_endpoints("sig3", "sig1").is_empty());
        assert_eq!(reg.conflicts(0), &[2]);
        assert!(reg.conflicts(99).is_empty());
    }

    #[test]
    fn repeated_segments_are_masked() {
        let reg = registry();
        assert_eq!(reg.repeated_segments(0), &[false, true, false, true]);
        assert_eq!(reg.repeated_segments(1), &[false, false]);
    }

    #[test]
    fn rejects_broken_tables() {
        let mut table = get_table_string(TABLE).unwrap();
        table.routes[2].conflicts.push("zzz".to_string());
        assert_eq!(RouteRegistry::new(table).err(),
                   Some(TableError::UnknownConflict("c".to_string(), "zzz".to_string())));

        let mut table = get_table_string(TABLE).unwrap();
        table.routes[1].id = "a".to_string();
        assert_eq!(RouteRegistry::new(table).err(), Some(TableError::DuplicateRoute("a".to_string())));

        let mut table = get_table_string(TABLE).unwrap();
        table.routes[1].path.truncate(1);
        assert_eq!(RouteRegistry::new(table).err(), Some(TableError::ShortPath("b".to_string())));
    }
}

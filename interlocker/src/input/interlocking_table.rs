use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

pub type RouteId = String;
pub type TrainId = String;
pub type SignalId = String;
pub type SegmentId = String;
pub type PointId = String;

/// Everything the loader hands over: the track topology the routes refer to
/// and the precomputed routes themselves.
#[derive(Debug, Clone, Default)]
pub struct InterlockingTable {
    pub topology: Topology,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub segments: HashSet<SegmentId>,
    pub signals: HashMap<SignalId, SignalKind>,
    pub points: HashSet<PointId>,
    pub entry_signals: EntrySignals,
}

impl Topology {
    pub fn is_segment(&self, id: &str) -> bool {
        self.segments.contains(id)
    }

    pub fn is_signal(&self, id: &str) -> bool {
        self.signals.contains_key(id)
    }

    pub fn signal_kind(&self, id: &str) -> Option<SignalKind> {
        self.signals.get(id).cloned()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Main,
    Shunting,
}

impl SignalKind {
    /// The aspect a granted route shows on signals of this kind.
    pub fn proceed_aspect(self) -> Aspect {
        match self {
            SignalKind::Main => Aspect::Go,
            SignalKind::Shunting => Aspect::Shunt,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Aspect {
    Stop,
    Go,
    Caution,
    Shunt,
}

impl Aspect {
    /// Permissive aspects admit a train past the signal.
    pub fn is_permissive(self) -> bool {
        match self {
            Aspect::Go | Aspect::Shunt => true,
            Aspect::Stop | Aspect::Caution => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Aspect::Stop => "stop",
            Aspect::Go => "go",
            Aspect::Caution => "caution",
            Aspect::Shunt => "shunt",
        }
    }

    pub fn from_name(s: &str) -> Option<Aspect> {
        match s {
            "stop" => Some(Aspect::Stop),
            "go" => Some(Aspect::Go),
            "caution" => Some(Aspect::Caution),
            "shunt" => Some(Aspect::Shunt),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointPosition {
    Normal,
    Reverse,
}

impl PointPosition {
    pub fn name(self) -> &'static str {
        match self {
            PointPosition::Normal => "normal",
            PointPosition::Reverse => "reverse",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Orientation {
    Clockwise,
    Anticlockwise,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathElement {
    Segment(SegmentId),
    Signal(SignalId),
}

impl PathElement {
    pub fn segment(&self) -> Option<&str> {
        match *self {
            PathElement::Segment(ref s) => Some(s),
            PathElement::Signal(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub id: RouteId,
    pub source: SignalId,
    pub destination: SignalId,
    pub orientation: Orientation,
    pub length: f64,
    pub path: Vec<PathElement>,
    pub sections: SmallVec<[String; 2]>,
    pub points: SmallVec<[(PointId, PointPosition); 4]>,
    pub signals: SmallVec<[SignalId; 4]>,
    pub conflicts: SmallVec<[RouteId; 8]>,
}

impl Route {
    pub fn segments<'a>(&'a self) -> impl Iterator<Item = &'a str> + 'a {
        self.path.iter().filter_map(|e| e.segment())
    }

    pub fn contains_segment(&self, segment: &str) -> bool {
        self.segments().any(|s| s == segment)
    }

    /// The segment a train stands on when it has arrived at the destination.
    pub fn last_segment(&self) -> Option<&str> {
        self.path.iter().rev().filter_map(|e| e.segment()).next()
    }

    /// Index of a signal within the path. Source and destination signals
    /// may be absent from the path.
    pub fn path_index_of(&self, signal: &str) -> Option<usize> {
        self.path.iter().position(|e| match *e {
            PathElement::Signal(ref s) => s == signal,
            _ => false,
        })
    }
}

/// Network sections and the signals which can admit traffic into them.
#[derive(Debug, Clone, Default)]
pub struct EntrySignals {
    pub sections: Vec<NetworkSection>,
    section_of: HashMap<SegmentId, usize>,
}

#[derive(Debug, Clone)]
pub struct NetworkSection {
    pub name: String,
    pub segments: SmallVec<[SegmentId; 4]>,
    pub entry: SmallVec<[SignalId; 8]>,
}

impl EntrySignals {
    pub fn add_section(&mut self, section: NetworkSection) {
        let idx = self.sections.len();
        for seg in section.segments.iter() {
            self.section_of.insert(seg.clone(), idx);
        }
        self.sections.push(section);
    }

    pub fn section_of(&self, segment: &str) -> Option<&NetworkSection> {
        self.section_of.get(segment).map(|i| &self.sections[*i])
    }

    /// Signals gating entry into the section enclosing `segment`, or `None`
    /// if the segment is not covered by the table.
    pub fn for_segment(&self, segment: &str) -> Option<&[SignalId]> {
        self.section_of(segment).map(|s| &s.entry[..])
    }
}

//! Route interlocking.

pub mod registry;
pub mod track;
pub mod sectional;
pub mod interlocking;
pub mod algorithm;
pub mod cancel;
pub mod drive;
pub mod grab;
pub mod controller;

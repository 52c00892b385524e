//! Path planning over the road map.

mod astar;

pub use astar::{PlannedPath, plan};

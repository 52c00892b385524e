//! Occupancy mapping: the binary world grid and the probabilistic road
//! map built on top of it.

mod grid;
mod roadmap;

pub use grid::OccupancyGrid;
pub use roadmap::{MapNode, RoadMap};

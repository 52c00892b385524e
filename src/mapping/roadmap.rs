//! Probabilistic road map over the occupancy grid.
//!
//! Nodes are the fixed anchor points (initial robot poses, then
//! destinations) followed by uniformly sampled free points. Edges are
//! collision-free straight lines recorded in a symmetric adjacency
//! matrix. Construction retries sampling until every consecutive anchor
//! pair is connected.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::PlannerConfig;
use crate::error::{MargaError, Result};
use crate::geom::{GridCoord, WorldPoint};
use crate::mapping::OccupancyGrid;

/// Sampling restarts allowed before construction gives up. The retry
/// loop only triggers when the map disconnects the anchors, so hitting
/// this limit means the world itself does not admit the required paths.
const MAX_BUILD_ATTEMPTS: usize = 100;

/// A road-map node. Nodes are append-only and their index is stable.
#[derive(Clone, Copy, Debug)]
pub struct MapNode {
    pub index: u32,
    pub col: u32,
    pub row: u32,
    pub world_x: f32,
    pub world_y: f32,
}

/// Road map: node table plus symmetric adjacency matrix.
pub struct RoadMap {
    grid: OccupancyGrid,
    nodes: Vec<MapNode>,
    adj: Vec<Vec<u8>>,
    num_anchors: usize,
    point_buffer: i32,
    path_buffer: i32,
    path_check_interval: f32,
}

impl RoadMap {
    /// Build a road map over `grid`.
    ///
    /// `anchors` are world coordinates seeded as nodes 0..anchors.len()
    /// in order (initial robot poses first, then destinations).
    /// `num_points` additional nodes are sampled uniformly from free
    /// space. Sampling restarts until A* connects every consecutive
    /// anchor pair.
    pub fn build(
        grid: OccupancyGrid,
        config: &PlannerConfig,
        anchors: &[WorldPoint],
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let mut map = Self {
            grid,
            nodes: Vec::new(),
            adj: Vec::new(),
            num_anchors: anchors.len(),
            point_buffer: config.point_buffer,
            path_buffer: config.path_buffer,
            path_check_interval: config.path_check_interval,
        };

        for attempt in 1..=MAX_BUILD_ATTEMPTS {
            info!("Computing probabilistic road map (attempt {})...", attempt);
            map.gen_all_points(config.num_points, anchors, rng);
            map.regenerate_edges();
            if map.check_reachability() {
                info!(
                    "Road map ready: {} nodes ({} anchors), attempt {}",
                    map.nodes.len(),
                    map.num_anchors,
                    attempt
                );
                return Ok(map);
            }
            warn!("Road map left anchors disconnected, resampling");
            map.nodes.clear();
            map.adj.clear();
        }

        Err(MargaError::Planning(
            "road map construction never connected all anchors".to_string(),
        ))
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &MapNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn num_anchors(&self) -> usize {
        self.num_anchors
    }

    /// Whether an edge exists between two nodes.
    #[inline]
    pub fn adjacent(&self, i: usize, j: usize) -> bool {
        self.adj[i][j] != 0
    }

    /// Write a discovered obstacle into the underlying grid. Edges are
    /// not touched; call [`RoadMap::regenerate_edges`] once the updates
    /// for the current discovery are in.
    pub fn mark_obstacle(&mut self, world_x: f32, world_y: f32) {
        self.grid.mark_blocked(world_x, world_y);
    }

    /// Append a node at a world coordinate and grow the adjacency matrix
    /// by one row and column (no edges). Returns the new node's index.
    /// The caller is expected to invoke [`RoadMap::regenerate_edges`]
    /// before planning through the new node.
    pub fn add_point(&mut self, world_x: f32, world_y: f32) -> usize {
        let index = self.nodes.len();
        self.push_node(world_x, world_y);

        for row in &mut self.adj {
            row.push(0);
        }
        self.adj.push(vec![0; index + 1]);

        debug!(
            "Added road-map node {} at ({:.2}, {:.2})",
            index, world_x, world_y
        );
        index
    }

    /// Recompute every edge from the current grid. Existing edges that
    /// a discovered obstacle now crosses disappear; new nodes gain
    /// their edges here.
    pub fn regenerate_edges(&mut self) {
        let n = self.nodes.len();
        self.adj = vec![vec![0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let a = GridCoord::new(self.nodes[i].col as i32, self.nodes[i].row as i32);
                let b = GridCoord::new(self.nodes[j].col as i32, self.nodes[j].row as i32);
                if self
                    .grid
                    .line_clear(a, b, self.path_buffer, self.path_check_interval)
                {
                    self.adj[i][j] = 1;
                    self.adj[j][i] = 1;
                }
            }
        }
    }

    /// Seed anchors and sample `num_points` random free nodes.
    fn gen_all_points(&mut self, num_points: usize, anchors: &[WorldPoint], rng: &mut impl Rng) {
        self.nodes.clear();
        for anchor in anchors {
            self.push_node(anchor.x, anchor.y);
        }

        let width = self.grid.width() as i32;
        let height = self.grid.height() as i32;
        let mut accepted = 0usize;
        while accepted < num_points {
            let col = rng.random_range(0..width);
            let row = rng.random_range(0..height);
            if self.grid.is_free_with_buffer(col, row, self.point_buffer) {
                let world = self.grid.world_of(GridCoord::new(col, row));
                let index = self.nodes.len() as u32;
                self.nodes.push(MapNode {
                    index,
                    col: col as u32,
                    row: row as u32,
                    world_x: world.x,
                    world_y: world.y,
                });
                accepted += 1;
            }
        }
    }

    /// Check that A* connects every consecutive anchor pair. Anchors
    /// occupy the front of the node table, so pairwise chaining covers
    /// start-to-start and start-to-destination connectivity in one pass.
    fn check_reachability(&self) -> bool {
        for i in 1..self.num_anchors {
            if crate::planning::plan(self, i - 1, i).is_none() {
                debug!("No path between anchors {} and {}", i - 1, i);
                return false;
            }
        }
        true
    }

    fn push_node(&mut self, world_x: f32, world_y: f32) {
        let coord = self.grid.map_of(world_x, world_y);
        let col = coord.col.clamp(0, self.grid.width() as i32 - 1);
        let row = coord.row.clamp(0, self.grid.height() as i32 - 1);
        // World coordinates are re-derived from the cell so waypoints
        // agree with the map no matter what was passed in.
        let world = self.grid.world_of(GridCoord::new(col, row));
        let index = self.nodes.len() as u32;
        self.nodes.push(MapNode {
            index,
            col: col as u32,
            row: row as u32,
            world_x: world.x,
            world_y: world.y,
        });
    }
}

#[cfg(test)]
impl RoadMap {
    /// Test scaffolding: a road map with nodes at the given cells and no
    /// random sampling. Edges are generated immediately; reachability is
    /// not enforced.
    pub(crate) fn from_cells(
        grid: OccupancyGrid,
        anchor_cells: &[(i32, i32)],
        path_buffer: i32,
    ) -> Self {
        let mut map = Self {
            grid,
            nodes: Vec::new(),
            adj: Vec::new(),
            num_anchors: anchor_cells.len(),
            point_buffer: 0,
            path_buffer,
            path_check_interval: 1.0,
        };
        for &(col, row) in anchor_cells {
            let world = map.grid.world_of(GridCoord::new(col, row));
            map.push_node(world.x, world.y);
        }
        map.regenerate_edges();
        map
    }
}

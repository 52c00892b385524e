//! A* search over the road-map adjacency matrix.
//!
//! Node identity is the road-map index; all search bookkeeping lives in
//! flat per-search vectors indexed by node, with parent back-references
//! as `prev: Vec<Option<usize>>`. The open set is kept sorted ascending
//! by f-score with ties broken by node index.

use std::cmp::Ordering;

use crate::geom::{GridCoord, WorldPoint};
use crate::mapping::RoadMap;

/// A planned path from start to goal.
#[derive(Clone, Debug)]
pub struct PlannedPath {
    /// Road-map node indices, first node = start, last = goal.
    pub node_indices: Vec<usize>,
    /// World coordinates of the path nodes, same order.
    pub waypoints: Vec<WorldPoint>,
    /// Total path length in meters.
    pub length: f32,
}

/// Plan a path between two road-map nodes with A*.
///
/// Returns `None` when the adjacency matrix does not connect the two
/// nodes. `start == goal` yields a single-node path.
pub fn plan(map: &RoadMap, start: usize, goal: usize) -> Option<PlannedPath> {
    let n = map.len();
    debug_assert!(start < n && goal < n);

    let goal_cell = cell_of(map, goal);

    let mut g = vec![f32::INFINITY; n];
    let mut f = vec![f32::INFINITY; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut in_open = vec![false; n];
    let mut closed = vec![false; n];

    g[start] = 0.0;
    f[start] = cell_of(map, start).distance(&goal_cell);
    let mut open = vec![start];
    in_open[start] = true;

    while let Some(&x) = open.first() {
        if x == goal {
            return Some(extract_path(map, &prev, start, goal));
        }

        open.remove(0);
        in_open[x] = false;
        closed[x] = true;

        let x_cell = cell_of(map, x);
        let mut touched = false;
        for y in 0..n {
            if !map.adjacent(x, y) || closed[y] {
                continue;
            }

            let tmp_g = g[x] + x_cell.distance(&cell_of(map, y));

            let better = if !in_open[y] {
                open.push(y);
                in_open[y] = true;
                true
            } else {
                tmp_g < g[y]
            };

            if better {
                prev[y] = Some(x);
                g[y] = tmp_g;
                f[y] = tmp_g + cell_of(map, y).distance(&goal_cell);
                touched = true;
            }
        }

        if touched {
            open.sort_by(|&a, &b| {
                f[a].partial_cmp(&f[b])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });
        }
    }

    None
}

#[inline]
fn cell_of(map: &RoadMap, index: usize) -> GridCoord {
    let node = map.node(index);
    GridCoord::new(node.col as i32, node.row as i32)
}

/// Walk the back-references from the goal and emit the path in
/// start-to-goal order with world coordinates from the node table.
fn extract_path(map: &RoadMap, prev: &[Option<usize>], start: usize, goal: usize) -> PlannedPath {
    let mut node_indices = vec![goal];
    let mut current = goal;
    while current != start {
        // prev chains are only followed for nodes A* actually reached.
        current = prev[current].expect("broken back-reference chain");
        node_indices.push(current);
    }
    node_indices.reverse();

    let waypoints: Vec<WorldPoint> = node_indices
        .iter()
        .map(|&i| {
            let node = map.node(i);
            WorldPoint::new(node.world_x, node.world_y)
        })
        .collect();

    let length = waypoints
        .windows(2)
        .map(|w| w[0].distance(&w[1]))
        .sum();

    PlannedPath {
        node_indices,
        waypoints,
        length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::OccupancyGrid;

    fn open_map(cells: &[(i32, i32)]) -> RoadMap {
        RoadMap::from_cells(OccupancyGrid::new_free(11, 11, 1.0), cells, 0)
    }

    #[test]
    fn direct_edge_wins() {
        let map = open_map(&[(2, 2), (8, 8), (2, 8)]);
        let path = plan(&map, 0, 1).unwrap();
        assert_eq!(path.node_indices, vec![0, 1]);
        assert_eq!(path.waypoints.len(), 2);
        assert!((path.length - 72.0f32.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn start_equals_goal_is_single_node() {
        let map = open_map(&[(2, 2), (8, 8)]);
        let path = plan(&map, 1, 1).unwrap();
        assert_eq!(path.node_indices, vec![1]);
        assert_eq!(path.length, 0.0);
    }

    #[test]
    fn disconnected_graph_returns_none() {
        let mut grid = OccupancyGrid::new_free(11, 11, 1.0);
        for row in 0..11 {
            grid.set_cell(5, row, false);
        }
        let map = RoadMap::from_cells(grid, &[(2, 5), (8, 5)], 0);
        assert!(!map.adjacent(0, 1));
        assert!(plan(&map, 0, 1).is_none());
    }

    #[test]
    fn detour_taken_around_wall() {
        // Wall with a gap at the top; a relay node sits in the gap.
        let mut grid = OccupancyGrid::new_free(11, 11, 1.0);
        for row in 3..11 {
            grid.set_cell(5, row, false);
        }
        let map = RoadMap::from_cells(grid, &[(2, 8), (8, 8), (5, 1)], 0);
        let path = plan(&map, 0, 1).unwrap();
        assert_eq!(path.node_indices, vec![0, 2, 1]);

        // Simple-path property: consecutive nodes share an edge.
        for pair in path.node_indices.windows(2) {
            assert!(map.adjacent(pair[0], pair[1]));
        }
    }

    #[test]
    fn equal_cost_tie_breaks_by_lower_index() {
        // Diamond around a center obstacle: two mirror-image routes with
        // identical cost. The route through the lower-indexed relay wins.
        let mut grid = OccupancyGrid::new_free(11, 11, 1.0);
        grid.set_cell(5, 5, false);
        let map = RoadMap::from_cells(grid, &[(2, 5), (5, 2), (5, 8), (8, 5)], 0);

        assert!(!map.adjacent(0, 3)); // direct line blocked by the center
        let path = plan(&map, 0, 3).unwrap();
        assert_eq!(path.node_indices, vec![0, 1, 3]);
    }

    #[test]
    fn cheapest_route_is_chosen() {
        // A long relay exists, but the direct edge is shorter.
        let map = open_map(&[(1, 1), (9, 1), (5, 9)]);
        let path = plan(&map, 0, 1).unwrap();
        assert_eq!(path.node_indices, vec![0, 1]);
        assert!((path.length - 8.0).abs() < 1e-4);
    }
}

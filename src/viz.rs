//! SVG snapshot of the road map.
//!
//! Renders a read-only view of the occupancy grid, the road-map nodes
//! and edges, and optionally the current planned path. The snapshot is
//! an audit artifact; it holds no live map state.

use std::fmt::Write as FmtWrite;
use std::path::Path;

use crate::error::{MargaError, Result};
use crate::geom::WorldPoint;
use crate::mapping::RoadMap;

const BACKGROUND_COLOR: &str = "#FFFFFF";
const BLOCKED_COLOR: &str = "#333333";
const EDGE_COLOR: &str = "#2222AA";
const NODE_COLOR: &str = "#AA2222";
const ANCHOR_COLOR: &str = "#22AA22";
const PATH_COLOR: &str = "#22AA22";

/// Write the road map (and optionally a planned path) as an SVG file,
/// one SVG unit per map pixel. Parent directories are created.
pub fn save_svg(path: &Path, map: &RoadMap, plan: Option<&[WorldPoint]>) -> Result<()> {
    let svg = render(map, plan);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MargaError::Config(format!("Failed to create output directory: {}", e))
        })?;
    }
    std::fs::write(path, svg)
        .map_err(|e| MargaError::Config(format!("Failed to write SVG {:?}: {}", path, e)))?;
    Ok(())
}

fn render(map: &RoadMap, plan: Option<&[WorldPoint]>) -> String {
    let grid = map.grid();
    let (w, h) = (grid.width(), grid.height());

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
    );
    let _ = writeln!(
        svg,
        r#"<rect width="{w}" height="{h}" fill="{BACKGROUND_COLOR}"/>"#
    );

    // Blocked cells
    for row in 0..h as i32 {
        for col in 0..w as i32 {
            if !grid.is_free(col, row) {
                let _ = writeln!(
                    svg,
                    r#"<rect x="{col}" y="{row}" width="1" height="1" fill="{BLOCKED_COLOR}"/>"#
                );
            }
        }
    }

    // Edges
    let _ = writeln!(
        svg,
        r#"<g stroke="{EDGE_COLOR}" stroke-width="0.5" opacity="0.6">"#
    );
    for i in 0..map.len() {
        for j in (i + 1)..map.len() {
            if map.adjacent(i, j) {
                let a = map.node(i);
                let b = map.node(j);
                let _ = writeln!(
                    svg,
                    r#"<line x1="{}" y1="{}" x2="{}" y2="{}"/>"#,
                    a.col, a.row, b.col, b.row
                );
            }
        }
    }
    let _ = writeln!(svg, "</g>");

    // Nodes; anchors drawn larger in their own color
    for node in map.nodes() {
        let (color, radius) = if (node.index as usize) < map.num_anchors() {
            (ANCHOR_COLOR, 3.0)
        } else {
            (NODE_COLOR, 1.5)
        };
        let _ = writeln!(
            svg,
            r#"<circle cx="{}" cy="{}" r="{}" fill="{}"/>"#,
            node.col, node.row, radius, color
        );
    }

    // Planned path as a polyline over the waypoint cells
    if let Some(waypoints) = plan {
        let points: Vec<String> = waypoints
            .iter()
            .map(|wp| {
                let cell = grid.map_of(wp.x, wp.y);
                format!("{},{}", cell.col, cell.row)
            })
            .collect();
        let _ = writeln!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{PATH_COLOR}" stroke-width="1.5"/>"#,
            points.join(" ")
        );
    }

    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::OccupancyGrid;

    #[test]
    fn renders_grid_nodes_edges_and_path() {
        let mut grid = OccupancyGrid::new_free(20, 20, 1.0);
        grid.set_cell(10, 3, false);
        let map = RoadMap::from_cells(grid, &[(2, 5), (17, 5)], 0);

        let path = [
            map.grid().world_of(crate::geom::GridCoord::new(2, 5)),
            map.grid().world_of(crate::geom::GridCoord::new(17, 5)),
        ];

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("roadmap.svg");
        save_svg(&out, &map, Some(&path)).unwrap();

        let svg = std::fs::read_to_string(&out).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<circle"));
        assert!(svg.contains("<line"));
        assert!(svg.contains("<polyline"));
        // The single blocked cell shows up.
        assert!(svg.contains(r#"<rect x="10" y="3""#));
    }
}

//! Binary occupancy grid loaded from a raw byte bitmap.
//!
//! Cells hold 1 (free) or 0 (blocked). The grid is immutable once loaded
//! except for point writes when the controller discovers an obstacle the
//! bitmap did not know about.

use std::f32::consts::FRAC_PI_2;
use std::path::Path;

use crate::error::{MargaError, Result};
use crate::geom::{GridCoord, WorldPoint};

/// 2-D binary occupancy grid at a fixed meters-per-pixel scale.
#[derive(Clone, Debug)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    mpp: f32,
    /// Row-major cells; 1 = free, 0 = blocked.
    cells: Vec<u8>,
}

impl OccupancyGrid {
    /// Load a raw bitmap: one byte per cell, row-major, 255 = free,
    /// 0 = blocked. Any other value is treated as blocked.
    pub fn from_raw_file(path: &Path, width: usize, height: usize, mpp: f32) -> Result<Self> {
        let buf = std::fs::read(path)
            .map_err(|e| MargaError::Map(format!("Failed to read bitmap {:?}: {}", path, e)))?;
        if buf.len() < width * height {
            return Err(MargaError::Map(format!(
                "Bitmap {:?} too short: {} bytes, expected {}",
                path,
                buf.len(),
                width * height
            )));
        }

        let cells = buf[..width * height]
            .iter()
            .map(|&b| if b == 255 { 1 } else { 0 })
            .collect();

        Ok(Self {
            width,
            height,
            mpp,
            cells,
        })
    }

    /// An all-free grid of the given dimensions.
    pub fn new_free(width: usize, height: usize, mpp: f32) -> Self {
        Self {
            width,
            height,
            mpp,
            cells: vec![1; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn mpp(&self) -> f32 {
        self.mpp
    }

    /// Set a single cell directly. Out-of-range writes are ignored.
    pub fn set_cell(&mut self, col: i32, row: i32, free: bool) {
        if col >= 0 && row >= 0 && (col as usize) < self.width && (row as usize) < self.height {
            self.cells[row as usize * self.width + col as usize] = free as u8;
        }
    }

    /// Whether a cell is free. Out-of-range cells read as blocked.
    #[inline]
    pub fn is_free(&self, col: i32, row: i32) -> bool {
        if col < 0 || row < 0 || col as usize >= self.width || row as usize >= self.height {
            return false;
        }
        self.cells[row as usize * self.width + col as usize] != 0
    }

    /// Whether every cell in the axis-aligned square of half-side `r`
    /// around (col, row) is free. The square is clipped to the grid.
    pub fn is_free_with_buffer(&self, col: i32, row: i32, r: i32) -> bool {
        let min_col = (col - r).max(0);
        let max_col = (col + r).min(self.width as i32 - 1);
        let min_row = (row - r).max(0);
        let max_row = (row + r).min(self.height as i32 - 1);

        for c in min_col..=max_col {
            for r in min_row..=max_row {
                if !self.is_free(c, r) {
                    return false;
                }
            }
        }
        true
    }

    /// Write a discovered obstacle at a world coordinate. Coordinates
    /// outside the map are silently clipped away.
    pub fn mark_blocked(&mut self, world_x: f32, world_y: f32) {
        let coord = self.map_of(world_x, world_y);
        self.set_cell(coord.col, coord.row, false);
    }

    /// Whether the straight segment from `from` to `to` stays clear,
    /// requiring free cells at perpendicular offsets 0..`lateral_buffer`
    /// on both sides of every sample. Samples advance `step` pixels at a
    /// time and the check fails on the first blocked cell.
    pub fn line_clear(&self, from: GridCoord, to: GridCoord, lateral_buffer: i32, step: f32) -> bool {
        let mut curr_x = from.col as f32;
        let mut curr_y = from.row as f32;
        let end_x = to.col as f32;
        let end_y = to.row as f32;

        let total_dist = from.distance(&to);
        let theta = (end_y - curr_y).atan2(end_x - curr_x);
        let (dy, dx) = (theta.sin() * step, theta.cos() * step);
        let mut dist = 0.0f32;

        while dist < total_dist {
            curr_x += dx;
            curr_y += dy;
            dist += step;

            let x = curr_x.round() as i32;
            let y = curr_y.round() as i32;

            // Perpendicular offsets; index 0 on the left covers the
            // sample point itself.
            let ltheta = theta + FRAC_PI_2;
            for l in 0..lateral_buffer.max(1) {
                let lx = (ltheta.cos() * l as f32 + x as f32).round() as i32;
                let ly = (ltheta.sin() * l as f32 + y as f32).round() as i32;
                if !self.is_free(lx, ly) {
                    return false;
                }
            }
            let rtheta = theta - FRAC_PI_2;
            for r in 1..lateral_buffer {
                let rx = (rtheta.cos() * r as f32 + x as f32).round() as i32;
                let ry = (rtheta.sin() * r as f32 + y as f32).round() as i32;
                if !self.is_free(rx, ry) {
                    return false;
                }
            }
        }
        true
    }

    /// World coordinate to map cell: col = ⌊(x + W·s/2)/s⌋,
    /// row = ⌊(H·s/2 − y)/s⌋.
    pub fn map_of(&self, world_x: f32, world_y: f32) -> GridCoord {
        let half_w = self.width as f32 * self.mpp / 2.0;
        let half_h = self.height as f32 * self.mpp / 2.0;
        GridCoord::new(
            ((world_x + half_w) / self.mpp).floor() as i32,
            ((half_h - world_y) / self.mpp).floor() as i32,
        )
    }

    /// Map cell to world coordinate of its top-left sample point.
    pub fn world_of(&self, coord: GridCoord) -> WorldPoint {
        WorldPoint::new(
            (coord.col - self.width as i32 / 2) as f32 * self.mpp,
            (self.height as i32 / 2 - coord.row) as f32 * self.mpp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn raw_load_maps_bytes_to_occupancy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // 4x2 bitmap: free, blocked, garbage, free / blocked x4
        file.write_all(&[255, 0, 17, 255, 0, 0, 0, 0]).unwrap();

        let grid = OccupancyGrid::from_raw_file(file.path(), 4, 2, 0.1).unwrap();
        assert!(grid.is_free(0, 0));
        assert!(!grid.is_free(1, 0));
        assert!(!grid.is_free(2, 0)); // defensive: neither 0 nor 255
        assert!(grid.is_free(3, 0));
        assert!(!grid.is_free(0, 1));
    }

    #[test]
    fn short_bitmap_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[255, 255]).unwrap();
        assert!(OccupancyGrid::from_raw_file(file.path(), 4, 2, 0.1).is_err());
    }

    #[test]
    fn out_of_range_reads_as_blocked() {
        let grid = OccupancyGrid::new_free(10, 10, 0.1);
        assert!(!grid.is_free(-1, 0));
        assert!(!grid.is_free(0, 10));
        assert!(grid.is_free(9, 9));
    }

    #[test]
    fn buffer_query_clips_at_edges() {
        let mut grid = OccupancyGrid::new_free(10, 10, 0.1);
        // A corner point with the buffer square hanging off the map is
        // still free; only in-range cells count.
        assert!(grid.is_free_with_buffer(0, 0, 3));

        grid.set_cell(2, 2, false);
        assert!(!grid.is_free_with_buffer(0, 0, 3));
        assert!(grid.is_free_with_buffer(6, 6, 3));
    }

    #[test]
    fn world_map_round_trip() {
        // Full-size world: 1600x500 at 0.082 m/px.
        let grid = OccupancyGrid::new_free(1600, 500, 0.082);

        let origin = grid.map_of(0.0, 0.0);
        assert_eq!(origin, GridCoord::new(800, 250));

        let pt = grid.map_of(-15.5, 12.0);
        assert!((pt.col - 611).abs() <= 1);
        assert!((pt.row - 104).abs() <= 1);

        // Round-trip error stays under half a pixel per axis.
        for &(x, y) in &[(0.0f32, 0.0f32), (-15.5, 12.0), (7.5, -5.0), (60.0, 20.0)] {
            let back = grid.world_of(grid.map_of(x, y));
            assert!((back.x - x).abs() <= 0.082, "x {} -> {}", x, back.x);
            assert!((back.y - y).abs() <= 0.082, "y {} -> {}", y, back.y);
        }
    }

    #[test]
    fn mark_blocked_writes_world_cell() {
        let mut grid = OccupancyGrid::new_free(1600, 500, 0.082);
        grid.mark_blocked(0.0, 0.0);
        assert!(!grid.is_free(800, 250));

        // Off-map writes are clipped away without panicking.
        grid.mark_blocked(1e6, 1e6);
    }

    #[test]
    fn line_clear_detects_wall() {
        let mut grid = OccupancyGrid::new_free(20, 20, 0.1);
        for row in 0..20 {
            grid.set_cell(10, row, false);
        }

        let a = GridCoord::new(2, 10);
        let b = GridCoord::new(18, 10);
        assert!(!grid.line_clear(a, b, 0, 1.0));
        assert!(grid.line_clear(a, GridCoord::new(8, 10), 0, 1.0));
    }

    #[test]
    fn line_clear_honors_lateral_buffer() {
        let mut grid = OccupancyGrid::new_free(20, 20, 0.1);
        // Obstacle two cells to the side of the segment.
        grid.set_cell(10, 8, false);

        let a = GridCoord::new(2, 10);
        let b = GridCoord::new(18, 10);
        assert!(grid.line_clear(a, b, 1, 1.0));
        assert!(!grid.line_clear(a, b, 4, 1.0));
    }
}

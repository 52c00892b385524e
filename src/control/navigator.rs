//! Goal-visiting orchestrator.
//!
//! Owns the road map and the sensor bridge, and runs the top-level
//! loop: plan a path to the next destination, follow it, and on a
//! blocked path insert the robot's current position as a new map node,
//! regenerate edges against the updated grid, and plan again.

use std::io::{self, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::config::MargaConfig;
use crate::control::motion::{MotionController, WaypointOutcome};
use crate::error::{MargaError, Result};
use crate::geom::WorldPoint;
use crate::mapping::{OccupancyGrid, RoadMap};
use crate::planning::{self, PlannedPath};
use crate::position_queue::PositionQueue;
use crate::viz;

/// Initial robot positions in world coordinates [x, y, theta_deg], one
/// per simulation port. These seed the first road-map anchors.
pub const INITIAL_POSITIONS: [(f32, f32, f32); 8] = [
    (-15.5, 12.0, 0.0),   // red     (port 6665)
    (-16.5, 12.0, 180.0), // green   (port 6666)
    (-5.0, -10.5, 0.0),   // cyan    (port 6667)
    (7.5, 1.0, 90.0),     // magenta (port 6668)
    (-48.0, 12.0, 90.0),  // yellow  (port 6669)
    (-48.0, -10.5, 270.0), // grey   (port 6670)
    (7.5, -5.0, 90.0),    // blue    (port 6671)
    (0.0, -7.0, 270.0),   // white   (port 6672)
];

/// Top-level navigation driver.
pub struct Navigator {
    config: MargaConfig,
    queue: PositionQueue,
    map: RoadMap,
    num_destinations: usize,
    interactive: bool,
    /// Odometry is pinned to the first waypoint once, on the first
    /// follow. Stand-in for localization.
    seeded: bool,
}

impl Navigator {
    /// Build the road map over `grid` with the configured start poses
    /// and the given destinations as anchors.
    pub fn new(
        config: MargaConfig,
        queue: PositionQueue,
        grid: OccupancyGrid,
        destinations: &[WorldPoint],
        interactive: bool,
    ) -> Result<Self> {
        if config.robot.anchor_index >= INITIAL_POSITIONS.len() {
            return Err(MargaError::Config(format!(
                "anchor_index {} out of range",
                config.robot.anchor_index
            )));
        }

        let mut anchors: Vec<WorldPoint> = INITIAL_POSITIONS
            .iter()
            .map(|&(x, y, _)| WorldPoint::new(x, y))
            .collect();
        anchors.extend_from_slice(destinations);

        let mut rng = rand::rng();
        let map = RoadMap::build(grid, &config.planner, &anchors, &mut rng)?;

        Ok(Self {
            config,
            queue,
            map,
            num_destinations: destinations.len(),
            interactive,
            seeded: false,
        })
    }

    /// Visit every destination in order. Returns once all are reached;
    /// any error that surfaces here is fatal.
    pub fn run(&mut self) -> Result<()> {
        let num_initial = INITIAL_POSITIONS.len();
        let mut start = self.config.robot.anchor_index;

        for d in 0..self.num_destinations {
            let dest_index = num_initial + d;
            loop {
                let path = planning::plan(&self.map, start, dest_index).ok_or_else(|| {
                    MargaError::Planning(format!(
                        "no path from node {} to destination {}",
                        start, d
                    ))
                })?;
                info!(
                    "Planned path to destination {}: {} waypoints, {:.1}m",
                    d,
                    path.waypoints.len(),
                    path.length
                );
                self.snapshot(&path);
                if self.interactive {
                    pause();
                }

                if self.follow_path(&path)? {
                    info!("Destination {} reached", d);
                    break;
                }

                // Blocked en route. The controller already wrote the
                // discovered obstacles; grow the road map from where the
                // robot stopped and plan again.
                let pose = self.queue.pose();
                warn!(
                    "Path blocked at ({:.2}, {:.2}), replanning",
                    pose.x, pose.y
                );
                start = self.map.add_point(pose.x, pose.y);
                self.map.regenerate_edges();
            }
            start = dest_index;
        }
        Ok(())
    }

    /// Drive along a planned path. Returns Ok(false) when a waypoint is
    /// unreachable and the caller should replan.
    fn follow_path(&mut self, path: &PlannedPath) -> Result<bool> {
        if !self.seeded {
            // Trust the configured start anchor and pin odometry to the
            // first waypoint.
            let w0 = path.waypoints[0];
            self.queue.set_odometry(
                w0.x,
                w0.y,
                self.config.robot.seed_heading_deg.to_radians(),
            )?;
            self.seeded = true;
        }

        for target in &path.waypoints[1..] {
            let controller =
                MotionController::new(&self.queue, &self.config.robot, &self.config.control);
            match controller.potential_field_motion(&mut self.map, *target)? {
                WaypointOutcome::Reached => {}
                WaypointOutcome::Blocked => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Write the road-map SVG snapshot, if configured. Snapshot failures
    /// never interrupt navigation.
    fn snapshot(&self, path: &PlannedPath) {
        if self.config.output.svg_path.is_empty() {
            return;
        }
        let svg_path = Path::new(&self.config.output.svg_path);
        if let Err(e) = viz::save_svg(svg_path, &self.map, Some(&path.waypoints)) {
            warn!("Failed to write road-map snapshot: {}", e);
        }
    }
}

/// Interactive pause between plan display and execution.
fn pause() {
    print!("\nPress enter to continue ... ");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockRobot;

    #[test]
    fn visits_destination_on_open_map() {
        let (robot, state) = MockRobot::new();
        state.lock().unwrap().simulate = true;
        let queue = PositionQueue::spawn(Box::new(robot), 5.0).unwrap();

        let mut config = MargaConfig::default();
        config.output.svg_path = String::new(); // no snapshot from tests
        config.planner.num_points = 10;

        let grid = OccupancyGrid::new_free(1600, 500, 0.082);
        // 1.5m east of the configured start anchor.
        let destinations = [WorldPoint::new(-14.0, 12.0)];

        let mut navigator =
            Navigator::new(config, queue.clone(), grid, &destinations, false).unwrap();
        navigator.run().unwrap();

        let pose = queue.pose();
        assert!(pose.position().distance(&destinations[0]) < 0.5);
    }

    #[test]
    fn rejects_out_of_range_anchor_index() {
        let (robot, _state) = MockRobot::new();
        let queue = PositionQueue::spawn(Box::new(robot), 5.0).unwrap();

        let mut config = MargaConfig::default();
        config.robot.anchor_index = 99;

        let grid = OccupancyGrid::new_free(100, 100, 0.082);
        let result = Navigator::new(config, queue, grid, &[WorldPoint::new(0.0, 0.0)], false);
        assert!(result.is_err());
    }
}

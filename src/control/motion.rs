//! Reactive motion between waypoints.
//!
//! The controller drives the robot toward a waypoint with an artificial
//! potential field (attractive pull to the goal, repulsive push from
//! every sonar return). Turn-saturation bookkeeping detects local
//! minima; the escape behavior is wall following, which hands control
//! back to the potential field once the non-wall side opens up.
//!
//! Potential field formulation after Siegwart and Nourbakhsh,
//! "Autonomous Mobile Robots", pp. 267-270.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::SONAR_COUNT;
use crate::config::{ControlConfig, RobotConfig};
use crate::control::SONAR_MOUNTS;
use crate::error::Result;
use crate::geom::{Pose2D, WorldPoint};
use crate::mapping::RoadMap;
use crate::position_queue::PositionQueue;
use crate::utils::{angular_diff, float_eq, normalize_angle};

/// Result of driving toward one waypoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaypointOutcome {
    /// Close-in finished inside the goal tolerance.
    Reached,
    /// Persistent blockage; the caller should update the map and replan.
    Blocked,
}

/// Which side the followed wall is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallSide {
    Left,
    Right,
}

/// Result of a wall-following episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallOutcome {
    /// The waypoint came inside the goal tolerance while following.
    GoalReached,
    /// The non-wall side opened up; resume potential-field motion.
    Resumed,
}

/// Waypoint-to-waypoint motion controller. Transient: one instance per
/// goal is constructed by the navigator.
pub struct MotionController<'a> {
    queue: &'a PositionQueue,
    robot: &'a RobotConfig,
    control: &'a ControlConfig,
}

impl<'a> MotionController<'a> {
    pub fn new(
        queue: &'a PositionQueue,
        robot: &'a RobotConfig,
        control: &'a ControlConfig,
    ) -> Self {
        Self {
            queue,
            robot,
            control,
        }
    }

    /// Drive from the current pose to `target` under the potential
    /// field, escaping local minima by wall following.
    pub fn potential_field_motion(
        &self,
        map: &mut RoadMap,
        target: WorldPoint,
    ) -> Result<WaypointOutcome> {
        info!("Heading for waypoint ({:.2}, {:.2})", target.x, target.y);

        // Face the goal before moving off.
        let pose = self.queue.pose();
        self.rotate_to((target.y - pose.y).atan2(target.x - pose.x))?;

        let mut stuck: u32 = 0;
        let mut last_saturation: i32 = 0;
        let mut escapes: u32 = 0;

        loop {
            let pose = self.next_tick();
            let ranges = self.queue.ranges()?;

            let (f_att_x, f_att_y) = self.attractive(pose, target);
            let (f_rep_x, f_rep_y) = self.repulsive(pose, &ranges);
            let fx = f_att_x + f_rep_x;
            let fy = f_att_y + f_rep_y;

            // Local-minimum bookkeeping on the turn the combined force
            // would command.
            let turn = normalize_angle(fy.atan2(fx) - pose.theta);
            if turn.abs() >= self.robot.max_turnrate {
                let sign = if turn > 0.0 { 1 } else { -1 };
                stuck += 1;
                if last_saturation != 0 && sign != last_saturation {
                    stuck += self.control.oscillation_penalty;
                }
                last_saturation = sign;
            } else {
                last_saturation = 0;
            }

            // Unsafe: the attractive pull alone would leave the robot
            // turning in place while something sits right in front.
            let att_turn = normalize_angle(f_att_y.atan2(f_att_x) - pose.theta);
            let unsafe_motion = att_turn.abs() >= self.robot.max_turnrate
                && (ranges[3].min(ranges[4]) < 0.2 || ranges[2].min(ranges[5]) < 0.1);

            if stuck > self.control.stuck_limit || unsafe_motion {
                debug!(stuck, unsafe_motion, "local minimum, switching behavior");
                self.queue.set_speed(0.0, 0.0)?;
                self.found_obstacle(map, pose, &ranges);

                escapes += 1;
                if escapes > self.control.max_wall_escapes {
                    info!(
                        "Waypoint ({:.2}, {:.2}) blocked after {} escapes",
                        target.x,
                        target.y,
                        escapes - 1
                    );
                    return Ok(WaypointOutcome::Blocked);
                }

                let pose = self.queue.pose();
                self.rotate_to((target.y - pose.y).atan2(target.x - pose.x))?;
                let ranges = self.queue.ranges()?;
                let side = Self::closest_wall_side(&ranges);
                match self.wall_follow(target, side)? {
                    WallOutcome::GoalReached => return Ok(WaypointOutcome::Reached),
                    WallOutcome::Resumed => {}
                }
                stuck = 0;
                last_saturation = 0;
                continue;
            }

            self.command_force(fx, fy, pose)?;

            if pose.position().distance(&target) < self.robot.goal_tolerance {
                self.close_in(target)?;
                self.queue.set_speed(0.0, 0.0)?;
                return Ok(WaypointOutcome::Reached);
            }
        }
    }

    /// Follow the wall on `side` until the opposite side opens up or the
    /// waypoint is reached.
    pub(crate) fn wall_follow(&self, target: WorldPoint, side: WallSide) -> Result<WallOutcome> {
        info!("Wall following, wall on the {:?}", side);

        let ddtw = self.control.wall_distance;
        loop {
            let pose = self.next_tick();
            if pose.position().distance(&target) < self.robot.goal_tolerance {
                self.queue.set_speed(0.0, 0.0)?;
                return Ok(WallOutcome::GoalReached);
            }

            let ranges = self.queue.ranges()?;

            // Done once the non-wall side sees open space.
            let open_side: [usize; 3] = match side {
                WallSide::Right => [0, 1, 2],
                WallSide::Left => [5, 6, 7],
            };
            if open_side
                .iter()
                .any(|&i| ranges[i] > self.control.wall_exit_clearance)
            {
                debug!("Non-wall side open, resuming potential field");
                return Ok(WallOutcome::Resumed);
            }

            let (dtw, d40, d60, d80, d110) = match side {
                WallSide::Right => (ranges[7], ranges[6], ranges[5], ranges[4], ranges[3]),
                WallSide::Left => (ranges[0], ranges[1], ranges[2], ranges[3], ranges[4]),
            };
            let toward_wall: f32 = match side {
                WallSide::Right => -1.0,
                WallSide::Left => 1.0,
            };

            // Track the closest return; an angled sensor seeing the wall
            // sooner takes over with a setpoint stretched by its angle.
            let (mut d, mut setpoint) = (dtw, ddtw);
            if d40 < d {
                d = d40;
                setpoint = ddtw / (40.0f32).to_radians().cos();
            }
            if d60 < d {
                d = d60;
                setpoint = ddtw / (60.0f32).to_radians().cos();
            }

            let mut turnrate = toward_wall * self.control.wall_gain * (d - setpoint);

            // Wall ahead: turn hard away from it.
            if d80 < self.control.front_block_distance || d110 < self.control.front_block_distance {
                turnrate = -toward_wall * self.robot.max_turnrate;
            }

            turnrate = turnrate.clamp(-self.robot.max_turnrate, self.robot.max_turnrate);
            let speed = self.robot.forward_speed * (1.0 - turnrate.abs() / self.robot.max_turnrate);
            self.queue.set_speed(speed, turnrate)?;
        }
    }

    /// Mark every close sonar return into the occupancy grid: a ±7.5°
    /// fan around the beam at three radial offsets one pixel apart.
    pub(crate) fn found_obstacle(
        &self,
        map: &mut RoadMap,
        pose: Pose2D,
        ranges: &[f32; SONAR_COUNT],
    ) {
        let mpp = map.grid().mpp();
        let mut marked = 0u32;
        for (i, mount) in SONAR_MOUNTS.iter().enumerate() {
            if ranges[i] >= self.control.obstacle_mark_range {
                continue;
            }
            let base = ranges[i] + mount.offset();
            let mut sweep = -7.5f32;
            while sweep < 7.5 {
                let beam = sweep.to_radians() + mount.angle();
                for j in 0..3 {
                    let dist = base + j as f32 * mpp;
                    let world_theta = pose.theta + beam;
                    map.mark_obstacle(
                        world_theta.cos() * dist + pose.x,
                        world_theta.sin() * dist + pose.y,
                    );
                    marked += 1;
                }
                sweep += 1.0;
            }
        }
        if marked > 0 {
            info!("Recorded {} obstacle cells", marked);
        }
    }

    /// Rotate in place to an absolute bearing, integrating the measured
    /// heading change each tick.
    pub(crate) fn rotate_to(&self, bearing: f32) -> Result<()> {
        let mut pose = self.queue.pose();
        let total = normalize_angle(bearing - pose.theta);
        let mut angle = 0.0f32;

        while !float_eq(angle, total) {
            let mut turnrate = total - angle;
            if turnrate.abs() > self.robot.max_turnrate {
                turnrate = turnrate.signum() * self.robot.max_turnrate;
            }
            self.queue.set_speed(0.0, turnrate)?;

            let old = pose;
            pose = self.next_tick();
            angle += turnrate.signum() * angular_diff(pose.theta, old.theta);
        }
        Ok(())
    }

    /// Shape a force vector into a velocity command and issue it.
    /// Returns (speed, turnrate) as commanded.
    pub(crate) fn command_force(&self, fx: f32, fy: f32, pose: Pose2D) -> Result<(f32, f32)> {
        let total_angle = normalize_angle(fy.atan2(fx) - pose.theta);

        let mut turnrate = total_angle;
        if turnrate.abs() > self.robot.max_turnrate {
            turnrate = turnrate.signum() * self.robot.max_turnrate;
        }

        let mut speed = (fx * fx + fy * fy).sqrt();
        if speed > self.robot.forward_speed {
            speed = self.robot.forward_speed;
        }
        // The more we need to turn, the slower we go.
        speed *= 1.0 - turnrate.abs() / self.robot.max_turnrate;

        self.queue.set_speed(speed, turnrate)?;
        Ok((speed, turnrate))
    }

    /// Attractive pull toward the goal, capped in magnitude while
    /// preserving direction.
    fn attractive(&self, pose: Pose2D, target: WorldPoint) -> (f32, f32) {
        let mut fx = -self.control.k_att * (pose.x - target.x);
        let mut fy = -self.control.k_att * (pose.y - target.y);
        let magnitude = (fx * fx + fy * fy).sqrt();
        if magnitude > self.control.force_cap {
            let scale = self.control.force_cap / magnitude;
            fx *= scale;
            fy *= scale;
        }
        (fx, fy)
    }

    /// Sum of repulsive pushes from every sonar return inside its
    /// distance of influence. Ranges are corrected by the mount offset
    /// so force magnitudes are measured from the robot center.
    fn repulsive(&self, pose: Pose2D, ranges: &[f32; SONAR_COUNT]) -> (f32, f32) {
        let mut fx = 0.0f32;
        let mut fy = 0.0f32;
        for (i, mount) in SONAR_MOUNTS.iter().enumerate() {
            if ranges[i] >= self.control.rho0 {
                continue;
            }
            let r = ranges[i] + mount.offset();
            let f = self.control.k_rep * (1.0 / r - 1.0 / self.control.rho0) * (1.0 / (r * r));
            let beam = pose.theta + mount.angle();
            fx -= f * beam.cos();
            fy -= f * beam.sin();
        }
        (fx, fy)
    }

    /// Keep commanding toward the goal while the distance strictly
    /// decreases; stop at the first non-decrease.
    fn close_in(&self, target: WorldPoint) -> Result<()> {
        let mut prev_dist = self.queue.pose().position().distance(&target);
        loop {
            let pose = self.queue.pose();
            self.command_force(target.x - pose.x, target.y - pose.y, pose)?;

            let next = self.next_tick();
            let dist = next.position().distance(&target);
            if dist >= prev_dist {
                break;
            }
            prev_dist = dist;
        }
        Ok(())
    }

    /// Pick the wall to follow from the angled sonars. A closest return
    /// on the left half means right-hand following, and vice versa.
    fn closest_wall_side(ranges: &[f32; SONAR_COUNT]) -> WallSide {
        let candidates = [1usize, 2, 5, 6];
        let mut min_index = candidates[0];
        for &i in &candidates[1..] {
            if ranges[i] < ranges[min_index] {
                min_index = i;
            }
        }
        if min_index <= 2 {
            WallSide::Right
        } else {
            WallSide::Left
        }
    }

    /// Wait for the sensor thread to publish a fresh tick.
    fn next_tick(&self) -> Pose2D {
        let start = self.queue.steps();
        while self.queue.steps() <= start {
            thread::sleep(Duration::from_millis(1));
        }
        self.queue.pose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{MockRobot, MockState};
    use crate::config::PlannerConfig;
    use crate::mapping::OccupancyGrid;
    use std::f32::consts::FRAC_PI_4;
    use std::sync::{Arc, Mutex};

    struct Harness {
        queue: PositionQueue,
        state: Arc<Mutex<MockState>>,
        robot: RobotConfig,
        control: ControlConfig,
    }

    fn harness(simulate: bool) -> Harness {
        let (robot, state) = MockRobot::new();
        state.lock().unwrap().simulate = simulate;
        let queue = PositionQueue::spawn(Box::new(robot), 5.0).unwrap();
        Harness {
            queue,
            state,
            robot: RobotConfig::default(),
            control: ControlConfig::default(),
        }
    }

    impl Harness {
        fn controller(&self) -> MotionController<'_> {
            MotionController::new(&self.queue, &self.robot, &self.control)
        }
    }

    fn test_map() -> RoadMap {
        let grid = OccupancyGrid::new_free(1600, 500, 0.082);
        let anchors = [grid.world_of(crate::geom::GridCoord::new(800, 250))];
        let mut rng = rand::rng();
        RoadMap::build(
            grid,
            &PlannerConfig {
                num_points: 0,
                point_buffer: 0,
                path_buffer: 0,
                path_check_interval: 1.0,
            },
            &anchors,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn potential_field_reaches_clear_goal() {
        let h = harness(true);
        let mut map = test_map();
        let target = WorldPoint::new(1.5, 0.0);

        let outcome = h.controller().potential_field_motion(&mut map, target).unwrap();
        assert_eq!(outcome, WaypointOutcome::Reached);

        // Goal acceptance: success implies we stopped inside 0.5m.
        let pose = h.queue.pose();
        assert!(pose.position().distance(&target) < 0.5);
    }

    #[test]
    fn wall_follow_resumes_once_open_side_appears() {
        let h = harness(true);
        // Wall close on the right, everything open on the left.
        h.state.lock().unwrap().ranges = [5.0, 5.0, 5.0, 5.0, 0.4, 0.4, 0.4, 0.4];

        let outcome = h
            .controller()
            .wall_follow(WorldPoint::new(1.0, 1.0), WallSide::Right)
            .unwrap();
        assert_eq!(outcome, WallOutcome::Resumed);
    }

    #[test]
    fn wall_follow_returns_goal_when_already_there() {
        let h = harness(true);
        h.state.lock().unwrap().ranges = [0.4; SONAR_COUNT];

        let outcome = h
            .controller()
            .wall_follow(WorldPoint::new(0.1, 0.0), WallSide::Right)
            .unwrap();
        assert_eq!(outcome, WallOutcome::GoalReached);
    }

    #[test]
    fn wall_follow_turns_away_from_front_block() {
        let h = harness(true);
        // Right-hand wall, boxed in on the left (no exit), wall dead
        // ahead: the commanded turn must saturate away from the wall.
        h.state.lock().unwrap().ranges = [0.8, 0.8, 0.8, 0.2, 0.2, 0.4, 0.4, 0.3];

        // Free the robot shortly after the first commands go out.
        let state = Arc::clone(&h.state);
        let watcher = std::thread::spawn(move || {
            loop {
                {
                    let mut s = state.lock().unwrap();
                    if !s.speed_log.is_empty() {
                        s.ranges[0] = 5.0;
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let outcome = h
            .controller()
            .wall_follow(WorldPoint::new(5.0, 5.0), WallSide::Right)
            .unwrap();
        watcher.join().unwrap();
        assert_eq!(outcome, WallOutcome::Resumed);

        let state = h.state.lock().unwrap();
        let (speed, turn) = state.speed_log[0];
        assert!((turn - FRAC_PI_4).abs() < 1e-5, "turn was {}", turn);
        assert!(speed.abs() < 1e-5);
    }

    #[test]
    fn command_force_scales_speed_down_with_turn() {
        let h = harness(false);

        // Force straight ahead: full speed, no turn.
        let (speed, turn) = h
            .controller()
            .command_force(10.0, 0.0, Pose2D::new(0.0, 0.0, 0.0))
            .unwrap();
        assert!(turn.abs() < 1e-6);
        assert!((speed - 1.0).abs() < 1e-6);

        // Force straight left: saturated turn, zero forward speed.
        let (speed, turn) = h
            .controller()
            .command_force(0.0, 10.0, Pose2D::new(0.0, 0.0, 0.0))
            .unwrap();
        assert!((turn - FRAC_PI_4).abs() < 1e-6);
        assert!(speed.abs() < 1e-6);
    }

    #[test]
    fn found_obstacle_marks_cells_ahead() {
        let h = harness(false);
        let mut map = test_map();

        let mut ranges = [5.0f32; SONAR_COUNT];
        ranges[3] = 0.5; // return on the +10° sensor
        let pose = Pose2D::new(0.0, 0.0, 0.0);
        h.controller().found_obstacle(&mut map, pose, &ranges);

        // The beam center lands roughly 0.67m out at ~+10°.
        let mount = &SONAR_MOUNTS[3];
        let dist = 0.5 + mount.offset();
        let wx = mount.angle().cos() * dist;
        let wy = mount.angle().sin() * dist;
        let cell = map.grid().map_of(wx, wy);
        assert!(!map.grid().is_free(cell.col, cell.row));

        // Far returns leave the map untouched elsewhere.
        let behind = map.grid().map_of(-1.0, 0.0);
        assert!(map.grid().is_free(behind.col, behind.row));
    }

    #[test]
    fn rotate_to_converges_in_simulation() {
        let h = harness(true);
        let ctrl = h.controller();
        ctrl.rotate_to(FRAC_PI_4).unwrap();
        let pose = h.queue.pose();
        assert!(
            angular_diff(pose.theta, FRAC_PI_4) < 0.05,
            "theta was {}",
            pose.theta
        );
    }
}

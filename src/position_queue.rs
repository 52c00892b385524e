//! Concurrent sensor bridge between the robot link and the control loop.
//!
//! A background thread repeatedly issues the blocking `read_all` and
//! refreshes a pose cache; the control loop takes non-blocking snapshots
//! of pose, step counter, cumulative odometric distance, and stall.
//!
//! Sonar is deliberately NOT polled by the background loop: continuous
//! sonar requests while other work executes overrun the bridge transport
//! buffer. Ranges are fetched only when a snapshot is requested, through
//! the same lock.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::client::{RobotLink, SONAR_COUNT};
use crate::error::{MargaError, Result};
use crate::geom::Pose2D;
use crate::utils::float_eq;

/// Everything behind the queue's single lock: the robot link itself and
/// the cached readings. Holding the link inside the lock serializes
/// commands against refreshes, so a pose snapshot is always consistent
/// with one sensor tick.
struct Inner {
    link: Box<dyn RobotLink>,
    pose: Pose2D,
    total_dist: f32,
    steps: u64,
    stall: bool,
    sonar_max_range: f32,
}

impl Inner {
    /// One blocking sensor tick: refresh pose, stall, odometric distance.
    fn refresh(&mut self) -> Result<()> {
        let reading = self.link.read_all()?;
        let old = self.pose;
        self.pose = reading.pose;
        self.stall = reading.stall;
        self.total_dist += old.position().distance(&self.pose.position());
        self.steps += 1;
        Ok(())
    }
}

/// Shared sensor cache plus the only handle to the robot link.
#[derive(Clone)]
pub struct PositionQueue {
    inner: Arc<Mutex<Inner>>,
}

impl PositionQueue {
    /// Warm up the link and start the background refresh thread.
    ///
    /// Warmup drains initial stale reads until the bridge marks a sonar
    /// frame ready, so the first snapshot served is a live one.
    pub fn spawn(mut link: Box<dyn RobotLink>, sonar_max_range: f32) -> Result<Self> {
        let mut first = link.read_all()?;
        loop {
            if link.read_sonar()?.ready {
                break;
            }
            first = link.read_all()?;
        }
        debug!("Sensor warmup complete at ({:.2}, {:.2})", first.pose.x, first.pose.y);

        let inner = Arc::new(Mutex::new(Inner {
            link,
            pose: first.pose,
            total_dist: 0.0,
            steps: 0,
            stall: first.stall,
            sonar_max_range,
        }));

        let thread_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("sensor".into())
            .spawn(move || {
                info!("Sensor thread started");
                loop {
                    {
                        let mut guard = match thread_inner.lock() {
                            Ok(g) => g,
                            Err(_) => break, // a reader panicked; nothing left to serve
                        };
                        if let Err(e) = guard.refresh() {
                            error!("Sensor refresh failed: {}", e);
                            break;
                        }
                    }
                    // Release the lock between ticks so snapshot readers
                    // and command writers get a turn.
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .map_err(|e| MargaError::Config(format!("Failed to spawn sensor thread: {}", e)))?;

        Ok(Self { inner })
    }

    /// Latest pose snapshot; x, y, and theta come from the same tick.
    pub fn pose(&self) -> Pose2D {
        self.lock().pose
    }

    /// Number of sensor ticks since spawn.
    pub fn steps(&self) -> u64 {
        self.lock().steps
    }

    /// Cumulative odometric distance since the last `set_odometry`.
    pub fn total_dist(&self) -> f32 {
        self.lock().total_dist
    }

    /// Robot-reported stall flag from the latest tick.
    pub fn stalled(&self) -> bool {
        self.lock().stall
    }

    /// Fetch a sonar frame from the robot. This is the only place sonar
    /// is polled; NaN or infinite readings clip to the sensor maximum.
    pub fn ranges(&self) -> Result<[f32; SONAR_COUNT]> {
        let mut guard = self.lock();
        let max = guard.sonar_max_range;
        let reading = guard.link.read_sonar()?;
        let mut ranges = [0.0f32; SONAR_COUNT];
        for (out, &r) in ranges.iter_mut().zip(reading.ranges.iter()) {
            *out = if r.is_finite() { r.clamp(0.0, max) } else { max };
        }
        Ok(ranges)
    }

    /// Issue a velocity command. Stall aborts the motion: the cached
    /// flag is checked before every command.
    pub fn set_speed(&self, linear: f32, angular: f32) -> Result<()> {
        let mut guard = self.lock();
        if guard.stall {
            return Err(MargaError::Stalled);
        }
        guard.link.set_speed(linear, angular)
    }

    /// Overwrite the robot's odometry, re-reading until the cached pose
    /// matches the command on all three components. Resets the
    /// cumulative distance.
    pub fn set_odometry(&self, x: f32, y: f32, theta: f32) -> Result<()> {
        let target = Pose2D::new(x, y, theta);
        info!(
            "Setting odometry to ({:.2}, {:.2}, {:.1}°)...",
            target.x,
            target.y,
            target.theta.to_degrees()
        );

        let mut guard = self.lock();
        loop {
            guard.link.set_odometry(target.x, target.y, target.theta)?;
            guard.refresh()?;
            if float_eq(guard.pose.x, target.x)
                && float_eq(guard.pose.y, target.y)
                && float_eq(guard.pose.theta, target.theta)
            {
                break;
            }
        }
        guard.total_dist = 0.0;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The sensor thread exits on a poisoned lock rather than write
        // through it, so recovering the guard here is sound.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

//! Configuration loading for MargaNav

use crate::error::{MargaError, Result};
use serde::Deserialize;
use std::f32::consts::PI;
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct MargaConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Network connection settings for the robot bridge
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Bridge host (default: localhost)
    #[serde(default = "default_host")]
    pub host: String,

    /// Bridge TCP port (default: 6665)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// Robot motion parameters
#[derive(Clone, Debug, Deserialize)]
pub struct RobotConfig {
    /// Forward speed cap in m/s (default: 1.0)
    #[serde(default = "default_forward_speed")]
    pub forward_speed: f32,

    /// Turn rate cap in rad/s (default: π/4)
    #[serde(default = "default_max_turnrate")]
    pub max_turnrate: f32,

    /// Distance at which a goal counts as visited (meters, default: 0.5)
    #[serde(default = "default_goal_tolerance")]
    pub goal_tolerance: f32,

    /// Which of the eight configured start poses this robot occupies
    #[serde(default)]
    pub anchor_index: usize,

    /// Heading seeded into odometry at the first waypoint (degrees)
    #[serde(default)]
    pub seed_heading_deg: f32,

    /// Sonar maximum range in meters; NaN/infinite readings clip here
    #[serde(default = "default_sonar_max_range")]
    pub sonar_max_range: f32,
}

/// Occupancy bitmap parameters
#[derive(Clone, Debug, Deserialize)]
pub struct MapConfig {
    /// Path to the raw occupancy bitmap
    #[serde(default = "default_bitmap_path")]
    pub bitmap_path: String,

    /// Bitmap width in pixels (default: 1600)
    #[serde(default = "default_map_width")]
    pub width: usize,

    /// Bitmap height in pixels (default: 500)
    #[serde(default = "default_map_height")]
    pub height: usize,

    /// Meters per map pixel (default: 0.082)
    #[serde(default = "default_mpp")]
    pub mpp: f32,
}

/// Road map construction parameters
#[derive(Clone, Debug, Deserialize)]
pub struct PlannerConfig {
    /// Number of random points to sample (default: 500)
    #[serde(default = "default_num_points")]
    pub num_points: usize,

    /// Obstacle-free Chebyshev radius required around a sampled point (px)
    #[serde(default = "default_point_buffer")]
    pub point_buffer: i32,

    /// Lateral obstacle-free corridor required along an edge (px)
    #[serde(default = "default_path_buffer")]
    pub path_buffer: i32,

    /// Sampling step along a candidate edge (px); must stay below the
    /// minimum obstacle width
    #[serde(default = "default_path_check_interval")]
    pub path_check_interval: f32,
}

/// Reactive motion parameters
#[derive(Clone, Debug, Deserialize)]
pub struct ControlConfig {
    /// Attractive force gain
    #[serde(default = "default_k_att")]
    pub k_att: f32,

    /// Attractive force magnitude cap
    #[serde(default = "default_force_cap")]
    pub force_cap: f32,

    /// Repulsive force gain (per sonar)
    #[serde(default = "default_k_rep")]
    pub k_rep: f32,

    /// Obstacle distance of influence in meters (per sonar)
    #[serde(default = "default_rho0")]
    pub rho0: f32,

    /// Saturated-turn count that declares a local minimum
    #[serde(default = "default_stuck_limit")]
    pub stuck_limit: u32,

    /// Extra stuck counts charged when saturation flips sign
    #[serde(default = "default_oscillation_penalty")]
    pub oscillation_penalty: u32,

    /// Wall-follow escapes allowed per waypoint before the path is
    /// declared blocked and handed back for a replan
    #[serde(default = "default_max_wall_escapes")]
    pub max_wall_escapes: u32,

    /// Desired distance to the followed wall (meters)
    #[serde(default = "default_wall_distance")]
    pub wall_distance: f32,

    /// Proportional gain for wall following
    #[serde(default = "default_wall_gain")]
    pub wall_gain: f32,

    /// Open range on the non-wall side that ends wall following (meters)
    #[serde(default = "default_wall_exit_clearance")]
    pub wall_exit_clearance: f32,

    /// Front sonar range that forces a max-rate turn away from the wall
    #[serde(default = "default_front_block_distance")]
    pub front_block_distance: f32,

    /// Sonar range below which obstacle cells are written into the map
    #[serde(default = "default_obstacle_mark_range")]
    pub obstacle_mark_range: f32,
}

/// Output configuration
#[derive(Clone, Debug, Deserialize)]
pub struct OutputConfig {
    /// Path for the SVG road-map snapshot; empty disables the snapshot
    #[serde(default = "default_svg_path")]
    pub svg_path: String,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    6665
}
fn default_timeout() -> u64 {
    5000
}
fn default_forward_speed() -> f32 {
    1.0
}
fn default_max_turnrate() -> f32 {
    PI / 4.0
}
fn default_goal_tolerance() -> f32 {
    0.5
}
fn default_sonar_max_range() -> f32 {
    5.0
}
fn default_bitmap_path() -> String {
    "maps/world.raw".to_string()
}
fn default_map_width() -> usize {
    1600
}
fn default_map_height() -> usize {
    500
}
fn default_mpp() -> f32 {
    0.082
}
fn default_num_points() -> usize {
    500
}
fn default_point_buffer() -> i32 {
    5
}
fn default_path_buffer() -> i32 {
    4
}
fn default_path_check_interval() -> f32 {
    1.0
}
fn default_k_att() -> f32 {
    20.0
}
fn default_force_cap() -> f32 {
    20.0
}
fn default_k_rep() -> f32 {
    8.2
}
fn default_rho0() -> f32 {
    2.5
}
fn default_stuck_limit() -> u32 {
    30
}
fn default_oscillation_penalty() -> u32 {
    10
}
fn default_max_wall_escapes() -> u32 {
    3
}
fn default_wall_distance() -> f32 {
    0.3
}
fn default_wall_gain() -> f32 {
    5.0
}
fn default_wall_exit_clearance() -> f32 {
    1.0
}
fn default_front_block_distance() -> f32 {
    0.3
}
fn default_obstacle_mark_range() -> f32 {
    0.75
}
fn default_svg_path() -> String {
    "output/roadmap.svg".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            forward_speed: default_forward_speed(),
            max_turnrate: default_max_turnrate(),
            goal_tolerance: default_goal_tolerance(),
            anchor_index: 0,
            seed_heading_deg: 0.0,
            sonar_max_range: default_sonar_max_range(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            bitmap_path: default_bitmap_path(),
            width: default_map_width(),
            height: default_map_height(),
            mpp: default_mpp(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            num_points: default_num_points(),
            point_buffer: default_point_buffer(),
            path_buffer: default_path_buffer(),
            path_check_interval: default_path_check_interval(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            k_att: default_k_att(),
            force_cap: default_force_cap(),
            k_rep: default_k_rep(),
            rho0: default_rho0(),
            stuck_limit: default_stuck_limit(),
            oscillation_penalty: default_oscillation_penalty(),
            max_wall_escapes: default_max_wall_escapes(),
            wall_distance: default_wall_distance(),
            wall_gain: default_wall_gain(),
            wall_exit_clearance: default_wall_exit_clearance(),
            front_block_distance: default_front_block_distance(),
            obstacle_mark_range: default_obstacle_mark_range(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            svg_path: default_svg_path(),
        }
    }
}

impl Default for MargaConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            robot: RobotConfig::default(),
            map: MapConfig::default(),
            planner: PlannerConfig::default(),
            control: ControlConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl MargaConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MargaError::Config(format!("Failed to read config file: {}", e)))?;
        let config: MargaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the full address string for connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.connection.host, self.connection.port)
    }
}

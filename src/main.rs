//! MargaNav - PRM navigation controller for a sonar-equipped robot
//!
//! Given a static occupancy bitmap, the robot's configured start pose,
//! and a list of destination coordinates, MargaNav builds a
//! probabilistic road map, plans waypoint paths with A*, and drives the
//! robot between waypoints with a potential-field controller that falls
//! back to wall following in local minima. Obstacles discovered by the
//! forward sonar ring are written back into the map and trigger a
//! replan.
//!
//! ## Threads
//!
//! - **Sensor thread**: blocks on the robot bridge, refreshing the pose
//!   cache (sonar is fetched on demand only)
//! - **Control thread** (main): planning plus the reactive motion loop

mod client;
mod config;
mod control;
mod destinations;
mod error;
mod geom;
mod mapping;
mod planning;
mod position_queue;
mod utils;
mod viz;

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use client::BridgeClient;
use config::MargaConfig;
use control::Navigator;
use error::{MargaError, Result};
use mapping::OccupancyGrid;
use position_queue::PositionQueue;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("marga_nav=info".parse().unwrap()),
        )
        .init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse command line arguments: [-i] [host port] points_file
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut interactive = false;
    let mut positional = Vec::new();
    for arg in args {
        if arg == "-i" {
            interactive = true;
        } else {
            positional.push(arg);
        }
    }

    let (endpoint, points_file) = match positional.len() {
        1 => (None, positional[0].clone()),
        3 => (
            Some((positional[0].clone(), positional[1].clone())),
            positional[2].clone(),
        ),
        _ => {
            eprintln!("Usage: marga-nav [-i] points_file");
            eprintln!("Usage: marga-nav [-i] host port points_file");
            return Err(MargaError::Config("invalid arguments".to_string()));
        }
    };

    let mut config = if Path::new("marga.toml").exists() {
        info!("Loading configuration from marga.toml");
        MargaConfig::load(Path::new("marga.toml"))?
    } else {
        MargaConfig::default()
    };

    if let Some((host, port)) = endpoint {
        config.connection.host = host;
        config.connection.port = port
            .parse()
            .map_err(|e| MargaError::Config(format!("Invalid port: {}", e)))?;
    }

    info!("MargaNav v{}", env!("CARGO_PKG_VERSION"));

    let points = destinations::read_pts(Path::new(&points_file))?;
    info!("World destination points:");
    for (i, p) in points.iter().enumerate() {
        info!("  point {}: [{:.2}, {:.2}]", i, p.x, p.y);
    }

    let grid = OccupancyGrid::from_raw_file(
        Path::new(&config.map.bitmap_path),
        config.map.width,
        config.map.height,
        config.map.mpp,
    )?;
    info!(
        "Loaded {}x{} occupancy bitmap ({:.1}m x {:.1}m)",
        config.map.width,
        config.map.height,
        config.map.width as f32 * config.map.mpp,
        config.map.height as f32 * config.map.mpp
    );

    info!("Connecting to robot bridge at {}", config.address());
    let link = BridgeClient::connect_timeout(
        &config.address(),
        Duration::from_millis(config.connection.timeout_ms),
    )?;
    let queue = PositionQueue::spawn(Box::new(link), config.robot.sonar_max_range)?;

    let mut navigator = Navigator::new(config, queue, grid, &points, interactive)?;
    navigator.run()?;

    info!("All destinations reached");
    Ok(())
}

//! Headless flythrough over streamed terrain.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. The viewpoint circles the domain at a fixed height above the ground
//! while the engine refines the quadtree around it; statistics are logged
//! periodically.
//!
//! Run with `cargo run -p terra-demo -- --frames 300 --max-level 6`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;
use terra_config::{CliArgs, Config, DemoConfig};
use terra_lod::{EngineError, EngineStats, TerrainEngine};
use terra_render::HostBackend;
use terra_terrain::{Heightmap, HeightmapParams, HeightmapSampler};
use tracing::{error, info};

/// Closed flight path around the middle of the domain.
struct FlightPath {
    center: Vec3,
    radius: f32,
    angular_speed: f32,
    altitude: f32,
}

impl FlightPath {
    fn new(root_size: f64, demo: &DemoConfig) -> Self {
        let half = (root_size / 2.0) as f32;
        let radius = half * 0.6;
        Self {
            center: Vec3::new(half, 0.0, half),
            radius,
            angular_speed: demo.speed / radius,
            altitude: demo.altitude,
        }
    }

    fn viewpoint(&self, elapsed: f32, heightmap: &dyn Heightmap) -> Vec3 {
        let angle = elapsed * self.angular_speed;
        let x = self.center.x + self.radius * angle.cos();
        // Half-speed wobble in z turns the circle into a rosette.
        let z = self.center.z + self.radius * angle.sin() * (0.5 * angle).cos();
        let ground = heightmap.height(f64::from(x), f64::from(z)) as f32;
        Vec3::new(x, ground + self.altitude, z)
    }
}

fn log_stats(frame: u32, stats: &EngineStats) {
    info!(
        frame,
        nodes = stats.nodes,
        resident = stats.resident_chunks,
        visible = stats.visible_chunks,
        pending = stats.pending_requests,
        buffers_in_use = stats.buffers_in_use,
        buffers_free = stats.buffers_free,
        integrated = stats.totals.integrated,
        stale = stats.totals.stale_discarded,
        rejected = stats.totals.rejected,
        seam_writes = stats.totals.seam_writes,
        "Terrain stats"
    );
}

fn run(config: &Config) -> Result<(), EngineError> {
    let heightmap: Arc<dyn Heightmap> =
        Arc::new(HeightmapSampler::new(HeightmapParams::from(&config.heightmap)));
    let backend = HostBackend::new(config.pools.staging_capacity);
    let mut engine = TerrainEngine::new(config, backend, Arc::clone(&heightmap))?;

    let demo = &config.demo;
    let path = FlightPath::new(config.terrain.root_size, demo);
    let frame_time = Duration::from_millis(demo.frame_ms);
    let interval = config.debug.stats_interval.max(1);
    let start = Instant::now();

    for frame in 0..demo.frames {
        let frame_start = Instant::now();
        let elapsed = frame as f32 * frame_time.as_secs_f32();
        engine.set_viewpoint(path.viewpoint(elapsed, heightmap.as_ref()));
        engine.update()?;

        if frame % interval == 0 {
            log_stats(frame, &engine.stats());
        }
        if let Some(rest) = frame_time.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let stats = engine.stats();
    log_stats(demo.frames, &stats);
    info!(
        "Flew {} frames in {:.2}s, {} chunks generated",
        stats.frames,
        start.elapsed().as_secs_f64(),
        stats.totals.integrated + stats.totals.stale_discarded
    );

    let backend = engine.shutdown()?;
    info!("Shut down with {} buffers left", backend.buffer_count());
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        terra_config::default_config_dir().unwrap_or_else(|| std::path::PathBuf::from("."))
    });

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    terra_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    info!(
        "Terrastream demo: root {}, {} levels, tessellation {}",
        config.terrain.root_size, config.terrain.max_level, config.terrain.tessellation
    );

    if let Err(e) = run(&config) {
        error!("Terrain demo failed: {e}");
        std::process::exit(1);
    }
}

//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Terrain streamer command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "terrastream", about = "Quadtree terrain streaming flythrough")]
pub struct CliArgs {
    /// Side length of the terrain root square.
    #[arg(long)]
    pub root_size: Option<f64>,

    /// Deepest quadtree level.
    #[arg(long)]
    pub max_level: Option<u32>,

    /// Per-chunk tessellation exponent.
    #[arg(long)]
    pub tessellation: Option<u32>,

    /// Generation worker threads (0 = auto).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Frames to simulate.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Heightmap seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(size) = args.root_size {
            self.terrain.root_size = size;
        }
        if let Some(level) = args.max_level {
            self.terrain.max_level = level;
        }
        if let Some(t) = args.tessellation {
            self.terrain.tessellation = t;
        }
        if let Some(workers) = args.workers {
            self.generation.worker_count = workers;
        }
        if let Some(frames) = args.frames {
            self.demo.frames = frames;
        }
        if let Some(seed) = args.seed {
            self.heightmap.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

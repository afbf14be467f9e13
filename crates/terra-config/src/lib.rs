//! Configuration for the terrain streamer.
//!
//! Settings persist to disk as a RON file, every section falls back to its
//! defaults when missing, and CLI flags override individual values.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, DemoConfig, GenerationConfig, HeightmapConfig, PoolConfig, TerrainConfig,
    default_config_dir,
};
pub use error::ConfigError;

//! Configuration structs with defaults, validation, and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest supported quadtree depth.
const MAX_LEVEL_LIMIT: u32 = 24;
/// Largest supported per-chunk tessellation exponent.
const MAX_TESSELLATION: u32 = 8;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Quadtree domain and level-of-detail policy.
    pub terrain: TerrainConfig,
    /// Background generation.
    pub generation: GenerationConfig,
    /// Preallocated pool sizes.
    pub pools: PoolConfig,
    /// Height function parameters.
    pub heightmap: HeightmapConfig,
    /// Headless flythrough settings.
    pub demo: DemoConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Quadtree domain and level-of-detail policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainConfig {
    /// Side length of the root square in world units.
    pub root_size: f64,
    /// Distance below which the root subdivides. Each level halves it.
    pub min_distance: f64,
    /// Deepest quadtree level.
    pub max_level: u32,
    /// Each chunk is a grid of `2^tessellation` quads per side.
    pub tessellation: u32,
}

/// Background generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Worker threads (0 = one per core, minus two).
    pub worker_count: usize,
    /// Requests that can be in flight at once.
    pub request_slots: usize,
    /// Finished requests collected per frame.
    pub collect_budget: usize,
    /// Longest an idle worker sleeps before rechecking, in milliseconds.
    pub idle_wait_ms: u64,
}

/// Preallocated pool sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Quadtree nodes.
    pub node_capacity: usize,
    /// Chunk GPU buffers. Every chunk uses two.
    pub gpu_buffer_capacity: usize,
    /// Host staging blocks for mapped buffers.
    pub staging_capacity: usize,
}

/// Height function parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeightmapConfig {
    pub seed: u64,
    pub octaves: u32,
    pub lacunarity: f64,
    pub persistence: f64,
    pub base_frequency: f64,
    pub amplitude: f64,
    /// Scale of the ridged layer (0 disables it).
    pub ridged_weight: f64,
    pub ridged_frequency: f64,
    pub ridged_octaves: u32,
    /// Constant offset added to every height.
    pub base_height: f64,
}

/// Headless flythrough settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Frames to simulate.
    pub frames: u32,
    /// Simulated frame time in milliseconds.
    pub frame_ms: u64,
    /// Viewpoint speed in world units per second.
    pub speed: f32,
    /// Viewpoint height above zero.
    pub altitude: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log engine statistics every this many frames (0 = never).
    pub stats_interval: u32,
}

// --- Default implementations ---

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            root_size: 10_000.0,
            min_distance: 15_000.0,
            max_level: 7,
            tessellation: 4,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            request_slots: 50,
            collect_budget: 8,
            idle_wait_ms: 5,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            node_capacity: 3000,
            gpu_buffer_capacity: 500,
            staging_capacity: 128,
        }
    }
}

impl Default for HeightmapConfig {
    fn default() -> Self {
        Self {
            seed: 45_645_656,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 0.0005,
            amplitude: 400.0,
            ridged_weight: 16.0,
            ridged_frequency: 1.0 / 128.0,
            ridged_octaves: 6,
            base_height: -300.0,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            frame_ms: 16,
            speed: 400.0,
            altitude: 150.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval: 60,
        }
    }
}

/// Platform config directory for the terrain streamer, if one exists.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("terrastream"))
}

// --- Validation ---

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let terrain = &self.terrain;
        if !(terrain.root_size.is_finite() && terrain.root_size > 0.0) {
            return Err(invalid("terrain.root_size", "must be positive"));
        }
        if !(terrain.min_distance.is_finite() && terrain.min_distance > 0.0) {
            return Err(invalid("terrain.min_distance", "must be positive"));
        }
        if terrain.max_level > MAX_LEVEL_LIMIT {
            return Err(invalid(
                "terrain.max_level",
                format!("must be at most {MAX_LEVEL_LIMIT}"),
            ));
        }
        if terrain.tessellation > MAX_TESSELLATION {
            return Err(invalid(
                "terrain.tessellation",
                format!("must be at most {MAX_TESSELLATION}"),
            ));
        }
        if self.generation.request_slots == 0 {
            return Err(invalid("generation.request_slots", "must be at least 1"));
        }
        if self.generation.collect_budget == 0 {
            return Err(invalid("generation.collect_budget", "must be at least 1"));
        }
        if self.pools.gpu_buffer_capacity < 2 {
            return Err(invalid("pools.gpu_buffer_capacity", "must be at least 2"));
        }
        if self.pools.staging_capacity < 2 * self.generation.request_slots {
            return Err(invalid(
                "pools.staging_capacity",
                "must cover two buffers per request slot",
            ));
        }
        // The root plus one subdivision.
        if self.pools.node_capacity < 5 {
            return Err(invalid("pools.node_capacity", "must be at least 5"));
        }
        Ok(())
    }
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}

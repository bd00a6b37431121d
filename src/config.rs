//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::{CacheSettings, GeometryBudget, IndexOptions, OptimizerSettings};
use crate::storage::{ByteOrder, Compression, Filters};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for newly created indexes
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_optlevel")]
    pub optlevel: u8,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default = "default_byte_order")]
    pub byte_order: String,

    #[serde(default = "default_chunks_per_slice")]
    pub chunks_per_slice: u64,

    #[serde(default = "default_slices_per_block")]
    pub slices_per_block: u64,

    #[serde(default = "default_blocks_per_superblock")]
    pub blocks_per_superblock: u64,
}

fn default_optlevel() -> u8 {
    6
}

fn default_byte_order() -> String {
    "native".to_string()
}

fn default_chunks_per_slice() -> u64 {
    GeometryBudget::default().chunks_per_slice
}

fn default_slices_per_block() -> u64 {
    GeometryBudget::default().slices_per_block
}

fn default_blocks_per_superblock() -> u64 {
    GeometryBudget::default().blocks_per_superblock
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            optlevel: default_optlevel(),
            compression: Compression::default(),
            byte_order: default_byte_order(),
            chunks_per_slice: default_chunks_per_slice(),
            slices_per_block: default_slices_per_block(),
            blocks_per_superblock: default_blocks_per_superblock(),
        }
    }
}

/// Search result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_slots")]
    pub slots: usize,

    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,

    #[serde(default)]
    pub min_hit_ratio: f64,

    #[serde(default = "default_probe_window")]
    pub probe_window: u64,
}

fn default_cache_slots() -> usize {
    CacheSettings::default().slots
}

fn default_cache_bytes() -> usize {
    CacheSettings::default().max_bytes
}

fn default_probe_window() -> u64 {
    CacheSettings::default().probe_window
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slots: default_cache_slots(),
            max_bytes: default_cache_bytes(),
            min_hit_ratio: 0.0,
            probe_window: default_probe_window(),
        }
    }
}

/// Optimizer thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_min_moved_chunks")]
    pub min_moved_chunks: f64,

    #[serde(default = "default_min_moved_slices")]
    pub min_moved_slices: f64,

    #[serde(default = "default_min_overlaps")]
    pub min_overlaps: u64,

    #[serde(default = "default_min_overlap_ratio")]
    pub min_overlap_ratio: f64,

    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,

    #[serde(default = "default_full_passes")]
    pub full_passes: u32,
}

fn default_min_moved_chunks() -> f64 {
    OptimizerSettings::default().min_moved_chunks
}

fn default_min_moved_slices() -> f64 {
    OptimizerSettings::default().min_moved_slices
}

fn default_min_overlaps() -> u64 {
    OptimizerSettings::default().min_overlaps
}

fn default_min_overlap_ratio() -> f64 {
    OptimizerSettings::default().min_overlap_ratio
}

fn default_min_improvement() -> f64 {
    OptimizerSettings::default().min_improvement
}

fn default_full_passes() -> u32 {
    OptimizerSettings::default().full_passes
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_moved_chunks: default_min_moved_chunks(),
            min_moved_slices: default_min_moved_slices(),
            min_overlaps: default_min_overlaps(),
            min_overlap_ratio: default_min_overlap_ratio(),
            min_improvement: default_min_improvement(),
            full_passes: default_full_passes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("colindex").join("config.toml")),
            Some(PathBuf::from("./colindex.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Index overrides
        if let Ok(level) = std::env::var("COLINDEX_OPTLEVEL") {
            if let Ok(l) = level.parse() {
                self.index.optlevel = l;
            }
        }
        if let Ok(compression) = std::env::var("COLINDEX_COMPRESSION") {
            if let Ok(c) = compression.parse() {
                self.index.compression = c;
            }
        }

        // Cache overrides
        if let Ok(slots) = std::env::var("COLINDEX_CACHE_SLOTS") {
            if let Ok(s) = slots.parse() {
                self.cache.slots = s;
            }
        }
        if let Ok(bytes) = std::env::var("COLINDEX_CACHE_BYTES") {
            if let Ok(b) = bytes.parse() {
                self.cache.max_bytes = b;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("COLINDEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("COLINDEX_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            slots: self.cache.slots,
            max_bytes: self.cache.max_bytes,
            min_hit_ratio: self.cache.min_hit_ratio,
            probe_window: self.cache.probe_window,
        }
    }

    pub fn optimizer_settings(&self) -> OptimizerSettings {
        OptimizerSettings {
            min_moved_chunks: self.optimizer.min_moved_chunks,
            min_moved_slices: self.optimizer.min_moved_slices,
            min_overlaps: self.optimizer.min_overlaps,
            min_overlap_ratio: self.optimizer.min_overlap_ratio,
            min_improvement: self.optimizer.min_improvement,
            full_passes: self.optimizer.full_passes,
        }
    }

    /// Index options for creating or opening an index with this configuration
    pub fn index_options(&self) -> Result<IndexOptions, ConfigError> {
        if self.index.optlevel > 9 {
            return Err(ConfigError::Invalid(format!(
                "index.optlevel must be 0-9, got {}",
                self.index.optlevel
            )));
        }
        let byte_order: ByteOrder = self
            .index
            .byte_order
            .parse()
            .map_err(|e: crate::storage::IndexError| ConfigError::Invalid(e.to_string()))?;

        Ok(IndexOptions {
            optlevel: self.index.optlevel,
            filters: Filters::new(self.index.compression),
            byte_order,
            budget: GeometryBudget {
                chunks_per_slice: self.index.chunks_per_slice,
                slices_per_block: self.index.slices_per_block,
                blocks_per_superblock: self.index.blocks_per_superblock,
            },
            cache: self.cache_settings(),
            optimizer: self.optimizer_settings(),
            ..IndexOptions::default()
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Colindex Configuration
#
# Environment variables override these settings:
# - COLINDEX_OPTLEVEL
# - COLINDEX_COMPRESSION
# - COLINDEX_CACHE_SLOTS
# - COLINDEX_CACHE_BYTES
# - COLINDEX_LOG_LEVEL
# - COLINDEX_LOG_FORMAT

[index]
# Default optimization level for new indexes (0-9)
optlevel = 6

# Chunk compression: none or lz4
compression = "lz4"

# Byte order of stored values: native, little or big
byte_order = "native"

# Geometry fan-outs (powers of two)
chunks_per_slice = 16
slices_per_block = 16
blocks_per_superblock = 8

[cache]
# Maximum number of cached search results
slots = 128

# Maximum total size of cached results (bytes)
max_bytes = 262144

# Disable the cache when its hit ratio drops below this
min_hit_ratio = 0.0

# Lookups between hit ratio checks
probe_window = 256

[optimizer]
# Minimum fraction of chunks that must move for a chunk pass to continue
min_moved_chunks = 0.01

# Minimum fraction of slices that must move within a superblock
min_moved_slices = 0.025

# Stop when fewer slice pairs than this overlap
min_overlaps = 4

# Stop when the overlap width ratio falls below this
min_overlap_ratio = 0.001

# Stop chunk passes improving less than this fraction
min_improvement = 0.05

# Passes at optimization level 9
full_passes = 2

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

//! Tunables for archive loading and compression
//!
//! Every field has a default, so a TOML document only needs the keys it
//! changes:
//!
//! ```toml
//! [growth]
//! min_increment = 4096
//!
//! [compression]
//! codec = "lz4"
//! ```

use crate::archive::Codec;
use crate::error::{MapFileError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Smallest over-fetch applied to a partial load (2 KiB)
pub const DEFAULT_MIN_INCREMENT: usize = 1 << 11;

/// Largest over-fetch applied to a partial load (32 KiB)
pub const DEFAULT_MAX_INCREMENT: usize = 1 << 15;

/// Geometric growth factor for partial loads
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

/// Default compression level (Zstd level 6, same as balanced archive writes)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 6;

/// Full configuration shared by both backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub growth: GrowthPolicy,
    pub compression: CompressionConfig,
}

impl ArchiveConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ArchiveConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        self.growth.validate()?;
        self.compression.validate()
    }
}

/// Over-fetch policy for partial loads
///
/// A load requested up to `until` bytes actually fills up to
/// `clamp(until * factor, until + min_increment, until + max_increment)`,
/// so scanning an archive one element at a time costs a geometric number of
/// reads instead of one read per element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthPolicy {
    pub min_increment: usize,
    pub max_increment: usize,
    pub factor: f64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            min_increment: DEFAULT_MIN_INCREMENT,
            max_increment: DEFAULT_MAX_INCREMENT,
            factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl GrowthPolicy {
    /// Number of bytes a load for `until` bytes should try to make resident
    pub fn stop_at(&self, until: usize) -> usize {
        let scaled = (until as f64 * self.factor) as usize;
        scaled
            .min(until.saturating_add(self.max_increment))
            .max(until.saturating_add(self.min_increment))
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_increment == 0 {
            return Err(MapFileError::Config(
                "growth.min_increment must be at least 1".to_string(),
            ));
        }
        if self.min_increment > self.max_increment {
            return Err(MapFileError::Config(format!(
                "growth.min_increment ({}) exceeds growth.max_increment ({})",
                self.min_increment, self.max_increment
            )));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(MapFileError::Config(format!(
                "growth.factor must be a finite number >= 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// Encoder settings used when a compressed archive is written
///
/// Readers never consult this: the container header records what the
/// decoder needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub codec: Codec,
    pub level: i32,
    /// Zstd window log, 0 keeps the codec default
    pub window_log: u8,
    pub checksum: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Zstd,
            level: DEFAULT_COMPRESSION_LEVEL,
            window_log: 0,
            checksum: true,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if i8::try_from(self.level).is_err() {
            return Err(MapFileError::Config(format!(
                "compression.level out of range: {}",
                self.level
            )));
        }
        if self.window_log != 0 && !(10..=31).contains(&self.window_log) {
            return Err(MapFileError::Config(format!(
                "compression.window_log must be 0 or within 10..=31, got {}",
                self.window_log
            )));
        }
        Ok(())
    }
}

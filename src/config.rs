//! Studio configuration: project audio layout and engine tuning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Project-wide settings. Every field has a default, so a partial TOML
/// file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Canonical project sample rate; every buffer is converted to it.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Canonical channel count.
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Maximum undo (and redo) depth.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// Start offset applied by the phase-shifter duplicate.
    #[serde(default = "default_phase_offset")]
    pub phase_offset_secs: f64,
    /// Length of the scrub preview burst.
    #[serde(default = "default_scrub_preview")]
    pub scrub_preview_secs: f64,
    /// Block size of the offline render loop.
    #[serde(default = "default_render_block")]
    pub render_block_frames: usize,
    /// Frames encoded per export step before control returns to the caller.
    #[serde(default = "default_export_chunk")]
    pub export_chunk_frames: usize,
    /// Capacity of the control → audio command queue.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            history_depth: default_history_depth(),
            phase_offset_secs: default_phase_offset(),
            scrub_preview_secs: default_scrub_preview(),
            render_block_frames: default_render_block(),
            export_chunk_frames: default_export_chunk(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl StudioConfig {
    /// Config with a custom layout and defaults for everything else.
    /// A zero rate or channel count is replaced by the default.
    pub fn with_layout(sample_rate: u32, channels: usize) -> Self {
        let mut config = Self {
            sample_rate,
            channels,
            ..Self::default()
        };
        config.ensure_nonzero();
        config
    }

    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let mut config: StudioConfig = toml::from_str(source)?;
        config.sanitize();
        Ok(config)
    }

    /// Keep values inside the ranges the engine can work with.
    fn sanitize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.channels = self.channels.clamp(1, 8);
        self.history_depth = self.history_depth.max(1);
        self.phase_offset_secs = self.phase_offset_secs.clamp(0.0, 1.0);
        self.scrub_preview_secs = self.scrub_preview_secs.clamp(0.01, 1.0);
        self.render_block_frames = self.render_block_frames.clamp(16, 8192);
        self.export_chunk_frames = self.export_chunk_frames.max(1);
        self.command_capacity = self.command_capacity.max(4);
    }

    /// Replace zero sizes and rates the engine would divide by. Unlike
    /// `sanitize` this keeps unusual but workable values.
    pub(crate) fn ensure_nonzero(&mut self) {
        if self.sample_rate == 0 {
            self.sample_rate = default_sample_rate();
        }
        if self.channels == 0 {
            self.channels = default_channels();
        }
        self.history_depth = self.history_depth.max(1);
        self.render_block_frames = self.render_block_frames.max(1);
        self.export_chunk_frames = self.export_chunk_frames.max(1);
        self.command_capacity = self.command_capacity.max(4);
    }
}

fn default_sample_rate() -> u32 { 44_100 }
fn default_channels() -> usize { 2 }
fn default_history_depth() -> usize { 20 }
fn default_phase_offset() -> f64 { 0.05 }
fn default_scrub_preview() -> f64 { 0.1 }
fn default_render_block() -> usize { 128 }
fn default_export_chunk() -> usize { 16_384 }
fn default_command_capacity() -> usize { 64 }

/// Load a config file from disk.
pub fn load_config(path: &Path) -> Result<StudioConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    StudioConfig::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = StudioConfig::from_toml("").unwrap();
        assert_eq!(config, StudioConfig::default());
        assert_eq!(config.history_depth, 20);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = StudioConfig::from_toml("sample_rate = 48000\nchannels = 1\n").unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.export_chunk_frames, 16_384);
    }

    #[test]
    fn out_of_range_values_are_sanitized() {
        let config = StudioConfig::from_toml("channels = 0\nhistory_depth = 0\n").unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.history_depth, 1);
    }

    #[test]
    fn zero_layout_falls_back_to_defaults() {
        let config = StudioConfig::with_layout(0, 0);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);

        // Small rates are kept as long as they are usable.
        let config = StudioConfig::with_layout(1000, 1);
        assert_eq!(config.sample_rate, 1000);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(StudioConfig::from_toml("sample_rate = \"fast\"").is_err());
    }
}

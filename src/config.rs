//! Player configuration
//!
//! `OpenOptions` are per-stream playback switches passed to `open()`.
//! `PlayerConfig` tunes the engine itself and can be loaded from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::watermark::DEFAULT_THRESHOLD;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Options supplied with each `open()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Start playing as soon as the stream is opened
    pub autoplay: bool,
    pub audio_enabled: bool,
    /// Restart from the first segment instead of ending the stream
    pub autoloop: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            autoplay: false,
            audio_enabled: true,
            autoloop: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeBackendKind {
    Gpu,
    Parallel,
    Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkLayoutKind {
    /// 16 blocks left to right along the first image row
    Strip,
    /// 4x4 grid of blocks in the top-left corner, row-major
    Grid4x4,
}

/// How a video segment is forced to buffer without visible playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadStrategy {
    /// Wait for decodable data, then play and immediately pause
    PlayOnLoadedData,
    /// Play-then-pause right after loading starts
    ForcedPlay,
    /// Trust the decoder's own ready signal
    PassiveReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    Hls,
    Dash,
    Mp4,
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub video_pool_size: usize,
    pub readback_depth: usize,
    pub min_update_interval_ms: u64,
    pub watermark_threshold: u8,
    pub watermark_layout: WatermarkLayoutKind,
    pub decode_backend: DecodeBackendKind,
    pub preload_strategy: PreloadStrategy,
    /// Video source formats in order of preference
    pub preferred_formats: Vec<VideoFormat>,
    pub audio_volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_pool_size: 2,
            readback_depth: 3,
            min_update_interval_ms: 20,
            watermark_threshold: DEFAULT_THRESHOLD,
            watermark_layout: WatermarkLayoutKind::Strip,
            decode_backend: DecodeBackendKind::Parallel,
            preload_strategy: PreloadStrategy::PlayOnLoadedData,
            preferred_formats: vec![VideoFormat::Mp4],
            audio_volume: 1.0,
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PlayerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[Config] Loaded player config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "video_pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.readback_depth < 2 {
            return Err(ConfigError::Invalid {
                field: "readback_depth",
                reason: format!("{} is below the minimum of 2", self.readback_depth),
            });
        }
        if self.preferred_formats.is_empty() {
            return Err(ConfigError::Invalid {
                field: "preferred_formats",
                reason: "at least one format is required".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio_volume) {
            return Err(ConfigError::Invalid {
                field: "audio_volume",
                reason: format!("{} is outside 0..=1", self.audio_volume),
            });
        }
        Ok(())
    }

    /// Number of video slots actually allocated for a timeline of `segments`.
    ///
    /// Never fewer than the open threshold needs, never more than there are
    /// segments to fill them.
    pub fn effective_video_pool_size(&self, segments: usize) -> usize {
        let needed = segments.min(crate::constants::pools::MIN_OPEN_SEGMENTS);
        self.video_pool_size.max(needed).min(segments.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = OpenOptions::default();
        assert!(options.audio_enabled);
        assert!(!options.autoplay && !options.autoloop);

        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.watermark_threshold, 128);
    }

    #[test]
    fn test_partial_toml() {
        let config = PlayerConfig::from_toml_str(
            r#"
            readback_depth = 2
            decode_backend = "scalar"
            watermark_layout = "grid4x4"
            preferred_formats = ["hls", "mp4"]
            "#,
        )
        .unwrap();
        assert_eq!(config.readback_depth, 2);
        assert_eq!(config.decode_backend, DecodeBackendKind::Scalar);
        assert_eq!(config.watermark_layout, WatermarkLayoutKind::Grid4x4);
        assert_eq!(config.preferred_formats, vec![VideoFormat::Hls, VideoFormat::Mp4]);
        assert_eq!(config.min_update_interval_ms, 20);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            PlayerConfig::from_toml_str("readback_depth = 1"),
            Err(ConfigError::Invalid { field: "readback_depth", .. })
        ));
        assert!(matches!(
            PlayerConfig::from_toml_str("video_pool_size = 0"),
            Err(ConfigError::Invalid { field: "video_pool_size", .. })
        ));
        assert!(matches!(
            PlayerConfig::from_toml_str("readback_depth = \"three\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_effective_video_pool_size() {
        let mut config = PlayerConfig::default();
        config.video_pool_size = 1;
        assert_eq!(config.effective_video_pool_size(1), 1);
        assert_eq!(config.effective_video_pool_size(5), 2);
        config.video_pool_size = 4;
        assert_eq!(config.effective_video_pool_size(3), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_update_interval_ms = 0").unwrap();
        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.min_update_interval_ms, 0);
    }
}

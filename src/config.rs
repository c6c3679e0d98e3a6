//! Configuration management for WarpCam
//!
//! Only device, server and overlay settings live here. Control point
//! positions are not stored; every run starts from the
//! frame corners.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::overlay::OverlayStyle;

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A V4L2 capture device
    #[default]
    V4l,
    /// Built-in moving test pattern, for running without a camera
    Pattern,
}

/// Preferred capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureFormat {
    /// Prefer MJPEG (lower bandwidth, decoded with turbojpeg)
    #[default]
    Mjpeg,
    /// Prefer YUYV (higher bandwidth, no decode step)
    Yuyv,
}

/// Video configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    #[serde(default)]
    pub source: SourceKind,
    pub input_device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Preferred capture format (MJPEG or YUYV)
    #[serde(default)]
    pub format: CaptureFormat,
    /// Stop the test pattern after this many frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_frames: Option<u64>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            input_device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            format: CaptureFormat::default(),
            pattern_frames: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JPEG quality of the viewer streams
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    75
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8092,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub overlay: OverlayStyle,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.video.source, SourceKind::V4l);
        assert_eq!((config.video.width, config.video.height), (640, 480));
        assert_eq!(config.overlay.point_radius, 10);
        assert_eq!(config.overlay.hit_radius, 15.0);
    }

    #[test]
    fn test_load_or_create_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [video]
            source = "pattern"
            input_device = "/dev/video2"
            width = 320
            height = 240
            fps = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.video.source, SourceKind::Pattern);
        assert_eq!(config.video.format, CaptureFormat::Mjpeg);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.overlay, OverlayStyle::default());
    }
}

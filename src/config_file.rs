//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{DelayConfig, FragmentConfig, MediaConfig, ServerConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Media settings
    pub media: Option<MediaSettings>,
    /// Slot rotation settings
    pub fragment: Option<FragmentSettings>,
    /// Spectator delay settings
    pub delay: Option<DelaySettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSettings {
    /// Path to the upstream playlist written by the transcoder
    pub playlist_path: String,
    /// Segment duration in seconds (matches the transcoder)
    pub segment_duration_secs: Option<u64>,
    /// Derived playlist window size in segments
    pub window_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentSettings {
    /// Slot duration in seconds
    pub slot_duration_secs: u64,
    /// Overlap between consecutive slots in seconds
    pub overlap_duration_secs: u64,
    /// Grace percentage extending the submit deadline
    pub grace_percent: Option<u64>,
    /// Lead time for slot notices in seconds
    pub notify_before_secs: Option<u64>,
    /// Required number of subtitlers
    pub required_subtitlers: usize,
    /// Settle delay before finalization in milliseconds
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelaySettings {
    /// Spectator delay in seconds
    pub delay_secs: u64,
    /// Maximum delay accepted from the admin
    pub max_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
            },
            media: Some(MediaSettings {
                playlist_path: defaults.media.playlist_path,
                segment_duration_secs: Some(defaults.media.segment_duration_secs),
                window_size: Some(defaults.media.window_size),
            }),
            fragment: Some(FragmentSettings {
                slot_duration_secs: defaults.fragment.slot_duration_secs,
                overlap_duration_secs: defaults.fragment.overlap_duration_secs,
                grace_percent: Some(defaults.fragment.grace_percent),
                notify_before_secs: Some(defaults.fragment.notify_before_secs),
                required_subtitlers: defaults.fragment.required_subtitlers,
                settle_ms: Some(defaults.fragment.settle_ms),
            }),
            delay: Some(DelaySettings {
                delay_secs: defaults.delay.delay_secs,
                max_delay_secs: Some(defaults.delay.max_delay_secs),
            }),
            logging: Some(LoggingSettings {
                level: defaults.log_level,
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level: self
                .logging
                .map(|l| l.level)
                .unwrap_or_else(|| "info".to_string()),
            media: self
                .media
                .map(|m| MediaConfig {
                    playlist_path: m.playlist_path,
                    segment_duration_secs: m
                        .segment_duration_secs
                        .unwrap_or(defaults.media.segment_duration_secs),
                    window_size: m.window_size.unwrap_or(defaults.media.window_size),
                })
                .unwrap_or(defaults.media),
            fragment: self
                .fragment
                .map(|f| FragmentConfig {
                    slot_duration_secs: f.slot_duration_secs,
                    overlap_duration_secs: f.overlap_duration_secs,
                    grace_percent: f.grace_percent.unwrap_or(defaults.fragment.grace_percent),
                    notify_before_secs: f
                        .notify_before_secs
                        .unwrap_or(defaults.fragment.notify_before_secs),
                    required_subtitlers: f.required_subtitlers,
                    settle_ms: f.settle_ms.unwrap_or(defaults.fragment.settle_ms),
                })
                .unwrap_or(defaults.fragment),
            delay: self
                .delay
                .map(|d| DelayConfig {
                    delay_secs: d.delay_secs,
                    max_delay_secs: d.max_delay_secs.unwrap_or(defaults.delay.max_delay_secs),
                })
                .unwrap_or(defaults.delay),
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

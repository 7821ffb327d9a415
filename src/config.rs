//! Server configuration

use serde::{Deserialize, Serialize};

use crate::error::{CaptionError, Result};

/// Upstream media configuration
///
/// The transcoder (an external process) writes the segmented playlist and
/// the segment files; the server only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to the upstream playlist written by the transcoder
    pub playlist_path: String,

    /// Segment duration in seconds (must match the transcoder setting)
    pub segment_duration_secs: u64,

    /// Number of segments kept in the derived live/delayed windows
    pub window_size: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            playlist_path: "media/live/stream.m3u8".to_string(),
            segment_duration_secs: 4,
            window_size: 6,
        }
    }
}

/// Spectator delay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Spectator delay in seconds
    pub delay_secs: u64,

    /// Upper bound accepted by POST /delay
    pub max_delay_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            delay_secs: 60,
            max_delay_secs: 300,
        }
    }
}

/// Slot rotation configuration
///
/// Validated before a run starts; a copy is captured into the session so
/// that admin edits never change a slot mid-flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// Slot duration D in seconds
    pub slot_duration_secs: u64,

    /// Overlap O between consecutive slots in seconds
    pub overlap_duration_secs: u64,

    /// Grace percentage g (0..=100) extending the submit deadline
    pub grace_percent: u64,

    /// Lead time for the "slot ending" / "prepare" notices, seconds
    pub notify_before_secs: u64,

    /// Number of subtitlers R required for rotation
    pub required_subtitlers: usize,

    /// Settle delay between grace end and finalization, milliseconds.
    /// Absorbs auto-send captions still in flight from the client.
    pub settle_ms: u64,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            slot_duration_secs: 10,
            overlap_duration_secs: 4,
            grace_percent: 20,
            notify_before_secs: 3,
            required_subtitlers: 3,
            settle_ms: 800,
        }
    }
}

impl FragmentConfig {
    /// Stride S = D - O: the offset between consecutive slot starts
    pub fn stride_secs(&self) -> u64 {
        self.slot_duration_secs
            .saturating_sub(self.overlap_duration_secs)
    }

    /// Grace G = floor(D * g / 100) in seconds
    pub fn grace_secs(&self) -> u64 {
        self.slot_duration_secs * self.grace_percent / 100
    }

    /// Submit deadline D + G, seconds after slot start
    pub fn submit_deadline_secs(&self) -> u64 {
        self.slot_duration_secs + self.grace_secs()
    }

    /// Minimum roster size so that a subtitler's next slot never starts
    /// before their previous slot's submit deadline: ceil((D + G) / S)
    pub fn min_required(&self) -> usize {
        let stride = self.stride_secs();
        if stride == 0 {
            return usize::MAX;
        }
        (self.submit_deadline_secs().div_ceil(stride)) as usize
    }

    /// Minimum spectator delay for this configuration
    pub fn min_delay_secs(&self, segment_duration_secs: u64) -> u64 {
        self.submit_deadline_secs().max(segment_duration_secs)
    }

    /// Validate the configuration ahead of a run
    pub fn validate(&self) -> Result<()> {
        if self.slot_duration_secs == 0 {
            return Err(CaptionError::Config(
                "slot duration must be positive".to_string(),
            ));
        }
        if self.overlap_duration_secs >= self.slot_duration_secs {
            return Err(CaptionError::Config(format!(
                "overlap ({}s) must be shorter than the slot ({}s)",
                self.overlap_duration_secs, self.slot_duration_secs
            )));
        }
        if self.grace_percent > 100 {
            return Err(CaptionError::Config(format!(
                "grace percent must be within 0..=100, got {}",
                self.grace_percent
            )));
        }
        if self.required_subtitlers == 0 {
            return Err(CaptionError::Config(
                "at least one subtitler is required".to_string(),
            ));
        }
        let min_required = self.min_required();
        if self.required_subtitlers < min_required {
            return Err(CaptionError::Config(format!(
                "requiredSubtitlers={} is too low: a {}s slot with {}s overlap and {}% grace \
                 needs minRequired={} so no subtitler is reassigned before their deadline",
                self.required_subtitlers,
                self.slot_duration_secs,
                self.overlap_duration_secs,
                self.grace_percent,
                min_required
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Upstream media configuration
    pub media: MediaConfig,

    /// Default slot rotation configuration
    pub fragment: FragmentConfig,

    /// Spectator delay configuration
    pub delay: DelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
            log_level: "info".to_string(),
            media: MediaConfig::default(),
            fragment: FragmentConfig::default(),
            delay: DelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.media.segment_duration_secs, 4);
        config.fragment.validate().unwrap();
    }

    #[test]
    fn test_derived_quantities() {
        let fragment = FragmentConfig {
            slot_duration_secs: 10,
            overlap_duration_secs: 4,
            grace_percent: 20,
            ..Default::default()
        };
        assert_eq!(fragment.stride_secs(), 6);
        assert_eq!(fragment.grace_secs(), 2);
        assert_eq!(fragment.submit_deadline_secs(), 12);
        assert_eq!(fragment.min_required(), 2);
        assert_eq!(fragment.min_delay_secs(4), 12);
        assert_eq!(fragment.min_delay_secs(30), 30);
    }

    #[test]
    fn test_grace_floors() {
        let fragment = FragmentConfig {
            slot_duration_secs: 7,
            overlap_duration_secs: 2,
            grace_percent: 25,
            ..Default::default()
        };
        // floor(7 * 25 / 100) = 1
        assert_eq!(fragment.grace_secs(), 1);
    }

    #[test]
    fn test_refuses_too_few_subtitlers() {
        // D=10, O=5, g=40 -> G=4, S=5, minRequired=ceil(14/5)=3
        let fragment = FragmentConfig {
            slot_duration_secs: 10,
            overlap_duration_secs: 5,
            grace_percent: 40,
            required_subtitlers: 2,
            ..Default::default()
        };
        assert_eq!(fragment.min_required(), 3);
        let err = fragment.validate().unwrap_err();
        assert!(err.to_string().contains("minRequired=3"), "{}", err);
    }

    #[test]
    fn test_single_subtitler_needs_no_overlap_no_grace() {
        // D=6, O=0, g=0 -> minRequired = ceil(6/6) = 1
        let fragment = FragmentConfig {
            slot_duration_secs: 6,
            overlap_duration_secs: 0,
            grace_percent: 0,
            required_subtitlers: 1,
            ..Default::default()
        };
        assert_eq!(fragment.min_required(), 1);
        fragment.validate().unwrap();
    }

    #[test]
    fn test_refuses_overlap_not_below_duration() {
        let fragment = FragmentConfig {
            slot_duration_secs: 5,
            overlap_duration_secs: 5,
            ..Default::default()
        };
        assert!(fragment.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }
}

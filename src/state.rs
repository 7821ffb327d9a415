//! Application state
//!
//! `AppState` is shared with every handler and timer callback. The mutable
//! session sits behind a single mutex so that all engine invariants are
//! enforced by one logical writer; the hub and the timer service are
//! internally synchronized and may be used without it.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::TimerService;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::ClientHub;
use crate::playlist::{PlaylistStatus, SourcePlaylist};
use crate::session::SessionState;

/// Application state shared across all handlers
pub struct AppState {
    /// Static server configuration
    pub config: ServerConfig,

    /// Single-writer session state
    pub session: Mutex<SessionState>,

    /// Connected clients
    pub hub: ClientHub,

    /// Monotonic clock and scheduled callbacks
    pub timers: TimerService,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let session = SessionState::new(config.fragment.clone(), config.delay.delay_secs);
        Self {
            config,
            session: Mutex::new(session),
            hub: ClientHub::new(),
            timers: TimerService::new(),
        }
    }

    /// Create AppState with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Wall-clock now, epoch milliseconds. Only used for user-visible
    /// timestamps; every deadline derives from the monotonic timer service.
    pub fn wall_now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Read and parse the upstream playlist
    pub fn load_playlist(&self) -> Result<SourcePlaylist> {
        SourcePlaylist::load(&self.config.media.playlist_path)
    }

    /// Upstream playlist status for the admin surface. A parse failure
    /// reads as "no manifest": the transcoder may be mid-write.
    pub fn playlist_status(&self) -> PlaylistStatus {
        match self.load_playlist() {
            Ok(playlist) => PlaylistStatus {
                has_manifest: true,
                segment_count: playlist.segment_count(),
            },
            Err(_) => PlaylistStatus {
                has_manifest: false,
                segment_count: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_creation() {
        let state = AppState::with_defaults();
        assert!(state.hub.is_empty());
        assert!(!state.session.lock().running);
        assert_eq!(state.timers.pending(), 0);
    }

    #[test]
    fn test_playlist_status_absent_upstream() {
        let mut config = ServerConfig::default();
        config.media.playlist_path = "/nonexistent/stream.m3u8".to_string();
        let state = AppState::new(config);
        let status = state.playlist_status();
        assert!(!status.has_manifest);
        assert_eq!(status.segment_count, 0);
    }
}

//! Live and delayed playlist views
//!
//! Derives sliding windows over the upstream playlist and renders them as
//! m3u8 documents. The live view tracks the newest segments; the delayed
//! view ends `floor(delay / targetDuration)` segments before the live edge
//! so that spectators see picture matching the fused captions.

use crate::error::{CaptionError, Result};

use super::source::{SegmentEntry, SourcePlaylist};

/// A derived window over the upstream playlist
#[derive(Debug, Clone)]
pub struct PlaylistView {
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<SegmentEntry>,
}

impl PlaylistView {
    /// Render as an m3u8 document.
    ///
    /// No EXT-X-ENDLIST: both views are sliding live windows.
    pub fn render(&self) -> String {
        let mut output = String::new();
        output.push_str("#EXTM3U\n");
        output.push_str("#EXT-X-VERSION:3\n");
        output.push_str(&format!(
            "#EXT-X-TARGETDURATION:{}\n",
            self.target_duration
        ));
        output.push_str(&format!(
            "#EXT-X-MEDIA-SEQUENCE:{}\n",
            self.media_sequence
        ));
        for segment in &self.segments {
            output.push_str(&format!("#EXTINF:{:.3},\n", segment.duration));
            output.push_str(&segment.uri);
            output.push('\n');
        }
        output
    }
}

/// Upstream playlist status for the admin surface
#[derive(Debug, Clone, Copy)]
pub struct PlaylistStatus {
    pub has_manifest: bool,
    pub segment_count: usize,
}

/// Build the live-edge view: the last `min(window, total)` segments, with
/// the media sequence advanced by the number of dropped segments.
pub fn live_view(source: &SourcePlaylist, window: usize) -> PlaylistView {
    let total = source.segments.len();
    let kept = window.min(total);
    let skipped = total - kept;
    PlaylistView {
        target_duration: source.target_duration,
        media_sequence: source.media_sequence + skipped as u64,
        segments: source.segments[skipped..].to_vec(),
    }
}

/// Build the delayed view: a window of up to `window` segments ending
/// `floor(delay_secs / targetDuration)` segments before the live edge.
///
/// Fails with `NotEnoughSegments` while the stream is younger than the
/// requested delay.
pub fn delayed_view(
    source: &SourcePlaylist,
    delay_secs: u64,
    window: usize,
) -> Result<PlaylistView> {
    if source.target_duration == 0 {
        return Err(CaptionError::PlaylistParse(
            "target duration is zero".to_string(),
        ));
    }
    let total = source.segments.len();
    let delay_segments = (delay_secs / source.target_duration) as usize;
    if delay_segments >= total {
        return Err(CaptionError::NotEnoughSegments);
    }
    let end = total - delay_segments;
    let start = end.saturating_sub(window);
    Ok(PlaylistView {
        target_duration: source.target_duration,
        media_sequence: source.media_sequence + start as u64,
        segments: source.segments[start..end].to_vec(),
    })
}

//! Upstream playlist parser
//!
//! Parses the segmented playlist the transcoder maintains: target duration,
//! media-sequence base, and the ordered segment entries. Unknown tags are
//! ignored so transcoder upgrades don't break the reader.

use std::path::Path;

use crate::error::{CaptionError, Result};

/// One segment reference from the upstream playlist
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Segment duration in seconds, from EXTINF
    pub duration: f64,
    /// Segment URI as written by the transcoder
    pub uri: String,
}

/// Parsed upstream playlist
#[derive(Debug, Clone)]
pub struct SourcePlaylist {
    /// EXT-X-TARGETDURATION value
    pub target_duration: u64,
    /// EXT-X-MEDIA-SEQUENCE base (0 when absent)
    pub media_sequence: u64,
    /// Ordered segment entries
    pub segments: Vec<SegmentEntry>,
}

impl SourcePlaylist {
    /// Parse a playlist document
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines().map(str::trim);

        if lines.next() != Some("#EXTM3U") {
            return Err(CaptionError::PlaylistParse(
                "missing #EXTM3U header".to_string(),
            ));
        }

        let mut target_duration = None;
        let mut media_sequence = 0;
        let mut segments = Vec::new();
        let mut pending_duration: Option<f64> = None;

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                target_duration = Some(value.parse::<u64>().map_err(|_| {
                    CaptionError::PlaylistParse(format!("invalid target duration: {}", value))
                })?);
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                media_sequence = value.parse::<u64>().map_err(|_| {
                    CaptionError::PlaylistParse(format!("invalid media sequence: {}", value))
                })?;
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration_part = value.split(',').next().unwrap_or("");
                pending_duration = Some(duration_part.parse::<f64>().map_err(|_| {
                    CaptionError::PlaylistParse(format!("invalid EXTINF duration: {}", value))
                })?);
            } else if line.starts_with('#') {
                // Unknown or irrelevant tag
                continue;
            } else if let Some(duration) = pending_duration.take() {
                segments.push(SegmentEntry {
                    duration,
                    uri: line.to_string(),
                });
            }
        }

        let target_duration = target_duration.ok_or_else(|| {
            CaptionError::PlaylistParse("missing #EXT-X-TARGETDURATION".to_string())
        })?;

        Ok(Self {
            target_duration,
            media_sequence,
            segments,
        })
    }

    /// Read and parse the upstream playlist file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CaptionError::PlaylistMissing(
                path.to_string_lossy().to_string(),
            ));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Number of segments currently listed
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

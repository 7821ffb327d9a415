//! Playlist view builder
//!
//! The transcoder writes one segmented playlist on disk; this module
//! derives the two views the server exposes:
//! - the *live* view (last N segments) served to subtitlers at the edge,
//! - the *delayed* view (window shifted back by the spectator delay).
//!
//! The upstream file is never mutated and is re-read per request; reads are
//! small and cheap.

pub mod source;
pub mod view;

pub use source::{SegmentEntry, SourcePlaylist};
pub use view::{delayed_view, live_view, PlaylistStatus, PlaylistView};

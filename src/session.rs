//! Session state store
//!
//! Holds the whole mutable state of one live run: mode, delay, the captured
//! fragment configuration, the slot history, the open-slot map, the
//! subtitler roster, and the fused caption history. All access is
//! serialized behind a single mutex owned by `AppState`; timer callbacks
//! and inbound messages are the only writers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::FragmentConfig;

/// Connection identifier (uuid v4, assigned by the hub)
pub type ConnId = String;

/// Live run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Captions flow through the slot scheduler and fusion engine
    Fragmentation,
    /// Captions bypass the gate and reach spectators with a display delay
    Direct,
}

/// A subtitler currently on the roster
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitlerRecord {
    pub id: ConnId,
    pub name: String,
    /// Monotonic join time; the rotation order is ascending `joined_at_ms`
    #[serde(skip)]
    pub joined_at_ms: u64,
}

/// One caption as received from a subtitler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCaption {
    pub text: String,
    pub video_timestamp_ms: u64,
    pub received_at_ms: u64,
    pub auto_sent: bool,
}

/// One started slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub index: u64,
    pub subtitler_id: ConnId,
    pub subtitler_name: String,
    /// Wall-clock start, epoch milliseconds (user visible)
    pub start_at_ms: u64,
    /// Monotonic start; every deadline derives from this
    #[serde(skip)]
    pub started_mono_ms: u64,
    pub start_video_offset_ms: u64,
    pub end_at_ms: Option<u64>,
    pub end_video_offset_ms: Option<u64>,
    pub captions: Vec<RawCaption>,
    /// Tokens shared with the previous slot's tail; assigned by the
    /// finalization of THIS slot, consumed when this slot is emitted
    pub overlap_from_prev: Option<usize>,
    /// Text actually emitted to spectators
    pub final_text: Option<String>,
    pub sent: bool,
}

impl Slot {
    /// Concatenation of all received caption texts in arrival order
    pub fn raw_text(&self) -> String {
        self.captions
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A fused caption as appended to the emission history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedCaption {
    pub id: String,
    pub text: String,
    pub created_at_ms: u64,
    pub video_timestamp_ms: u64,
    pub slot_index: u64,
    pub next_slot_index: Option<u64>,
    pub overlap_count: usize,
}

/// Mutable state of one run
#[derive(Debug)]
pub struct SessionState {
    pub mode: Mode,
    pub running: bool,
    /// Wall-clock run start, epoch milliseconds
    pub live_started_at_ms: Option<u64>,
    /// Monotonic run start; video offsets are measured from here
    pub live_started_mono_ms: Option<u64>,
    pub delay_secs: u64,
    /// Fragment configuration captured when the run started
    pub fragment: FragmentConfig,
    pub fragment_active: bool,
    /// True once the stride interval is registered (false while the
    /// scheduler is parked waiting for subtitlers)
    pub rotation_started: bool,
    /// Index the NEXT slot will take; advanced by exactly one per start
    pub current_slot_index: u64,
    /// Monotonic start time of the most recently started slot
    pub last_slot_started_mono_ms: Option<u64>,
    pub slots: Vec<Slot>,
    /// subtitlerId -> index of their currently-submittable slot
    pub open_slots: HashMap<ConnId, u64>,
    /// Roster ordered by ascending join time
    pub subtitlers: Vec<SubtitlerRecord>,
    pub fused: Vec<FusedCaption>,
}

impl SessionState {
    pub fn new(fragment: FragmentConfig, delay_secs: u64) -> Self {
        Self {
            mode: Mode::Fragmentation,
            running: false,
            live_started_at_ms: None,
            live_started_mono_ms: None,
            delay_secs,
            fragment,
            fragment_active: false,
            rotation_started: false,
            current_slot_index: 0,
            last_slot_started_mono_ms: None,
            slots: Vec::new(),
            open_slots: HashMap::new(),
            fused: Vec::new(),
            subtitlers: Vec::new(),
        }
    }

    /// The ordered active roster
    pub fn active_subtitlers(&self) -> &[SubtitlerRecord] {
        &self.subtitlers
    }

    /// Rotation assignment for a slot index, computed against the current
    /// ordered roster
    pub fn subtitler_for_slot(&self, index: u64) -> Option<&SubtitlerRecord> {
        if self.subtitlers.is_empty() {
            return None;
        }
        let pos = (index % self.subtitlers.len() as u64) as usize;
        self.subtitlers.get(pos)
    }

    /// Assignee of the most recently started slot, if still on the roster
    pub fn current_subtitler(&self) -> Option<&SubtitlerRecord> {
        let latest = self.slots.last()?;
        self.subtitlers
            .iter()
            .find(|s| s.id == latest.subtitler_id)
    }

    /// Add a subtitler to the roster; no-op when the id is already present.
    /// `joined_at_ms` must come from the monotonic clock so the ordering
    /// invariant holds.
    pub fn add_subtitler(&mut self, id: ConnId, name: String, joined_at_ms: u64) -> bool {
        if self.subtitlers.iter().any(|s| s.id == id) {
            return false;
        }
        self.subtitlers.push(SubtitlerRecord {
            id,
            name,
            joined_at_ms,
        });
        self.subtitlers.sort_by_key(|s| s.joined_at_ms);
        true
    }

    /// Remove a subtitler from the roster. Their open slot (if any) stays
    /// in the map: the slot is never reassigned and still runs to its
    /// deadline.
    pub fn remove_subtitler(&mut self, id: &str) -> bool {
        let before = self.subtitlers.len();
        self.subtitlers.retain(|s| s.id != id);
        self.subtitlers.len() != before
    }

    pub fn slot(&self, index: u64) -> Option<&Slot> {
        self.slots.iter().find(|s| s.index == index)
    }

    pub fn slot_mut(&mut self, index: u64) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.index == index)
    }

    /// Total raw captions received across all slots
    pub fn raw_caption_count(&self) -> usize {
        self.slots.iter().map(|s| s.captions.len()).sum()
    }

    /// Clear all per-rotation state (slot history, open slots, fused
    /// history). The roster survives: subtitlers stay connected across
    /// fragment restarts.
    pub fn reset_rotation(&mut self) {
        self.fragment_active = false;
        self.rotation_started = false;
        self.current_slot_index = 0;
        self.last_slot_started_mono_ms = None;
        self.slots.clear();
        self.open_slots.clear();
        self.fused.clear();
    }

    /// Full reset at run stop
    pub fn reset_run(&mut self) {
        self.reset_rotation();
        self.running = false;
        self.live_started_at_ms = None;
        self.live_started_mono_ms = None;
        self.mode = Mode::Fragmentation;
    }
}

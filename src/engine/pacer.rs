//! Delivery pacer
//!
//! Turns a finalized slot's text into timed word events for spectators.
//! The first word lands at `slot.start + delay` so the caption meets the
//! delayed picture; the rest are spread across the slot duration. Word
//! timers belong to the pacer group and carry the run generation, so a
//! stopped run silently swallows any stragglers.

use std::sync::Arc;
use uuid::Uuid;

use crate::clock::TimerGroup;
use crate::messages::ServerMessage;
use crate::state::AppState;

/// Everything the pacer needs to know about the emitting slot
#[derive(Debug, Clone)]
pub struct Emission {
    pub slot_index: u64,
    pub started_mono_ms: u64,
    pub video_timestamp_ms: u64,
    pub subtitler_name: String,
    pub slot_duration_ms: u64,
    pub delay_secs: u64,
    /// Catch-up flush: every word fires now, order preserved
    pub immediate: bool,
}

/// One planned word event, offset from the emission base
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWord {
    pub fire_at_ms: u64,
    pub word: String,
    pub word_index: usize,
    pub total_words: usize,
    pub is_last: bool,
}

/// Split the final text into words and spread them across the slot
/// duration: word k fires at `base + k * floor(slotMs / wordCount)`.
pub fn plan_words(final_text: &str, slot_duration_ms: u64, base_delay_ms: u64) -> Vec<PlannedWord> {
    let words: Vec<&str> = final_text.split_whitespace().collect();
    let total = words.len();
    if total == 0 {
        return Vec::new();
    }
    let interval_ms = slot_duration_ms / total as u64;
    words
        .into_iter()
        .enumerate()
        .map(|(k, word)| PlannedWord {
            fire_at_ms: base_delay_ms + k as u64 * interval_ms,
            word: word.to_string(),
            word_index: k,
            total_words: total,
            is_last: k + 1 == total,
        })
        .collect()
}

/// Schedule the spectator broadcasts for one slot emission
pub fn schedule_emission(state: &Arc<AppState>, emission: Emission, final_text: &str) {
    let base_delay_ms = if emission.immediate {
        0
    } else {
        let base_display_at = emission.started_mono_ms + emission.delay_secs * 1000;
        base_display_at.saturating_sub(state.timers.now_ms())
    };
    let plan = if emission.immediate {
        plan_words(final_text, 0, 0)
    } else {
        plan_words(final_text, emission.slot_duration_ms, base_delay_ms)
    };
    if plan.is_empty() {
        return;
    }

    let caption_id = Uuid::new_v4().to_string();
    tracing::debug!(
        slot = emission.slot_index,
        words = plan.len(),
        delay_ms = base_delay_ms,
        "scheduling word delivery"
    );

    for planned in plan {
        let message = ServerMessage::CaptionWord {
            id: caption_id.clone(),
            word: planned.word,
            word_index: planned.word_index,
            total_words: planned.total_words,
            is_last: planned.is_last,
            video_timestamp: emission.video_timestamp_ms,
            slot_index: emission.slot_index,
            subtitler_name: emission.subtitler_name.clone(),
            slot_duration_ms: emission.slot_duration_ms,
        };
        let recipient_state = Arc::clone(state);
        state
            .timers
            .schedule(planned.fire_at_ms, TimerGroup::Pacer, move || {
                recipient_state.hub.to_spectators(&message);
            });
    }
}

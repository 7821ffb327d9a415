//! Fusion engine
//!
//! Consecutive slots overlap in time, so their texts repeat words at the
//! seam. On finalization the engine measures how many tokens at the head of
//! a slot repeat the tail of its predecessor and trims them from the *next*
//! slot, never the previous: each slot's emitted text stays anchored to its
//! own start timestamp.
//!
//! Token matching is fuzzy: two tokens count as equal when their
//! char-level Levenshtein similarity reaches 0.8, and a candidate overlap
//! of k tokens is accepted when at least 70% of its positions match.

use std::sync::Arc;
use uuid::Uuid;

use crate::messages::ServerMessage;
use crate::session::{FusedCaption, SessionState};
use crate::state::AppState;

use super::pacer;

/// Upper bound on the overlap search, in tokens
const MAX_OVERLAP_TOKENS: usize = 15;
/// Per-token similarity threshold
const TOKEN_SIMILARITY: f64 = 0.8;
/// Fraction of matching positions required to accept a candidate overlap
const MATCH_RATIO: f64 = 0.7;

/// Punctuation treated as standalone tokens
const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '…', '»', '«', '"', '\''];
/// Tokens that absorb the space before them when detokenizing
const CLOSING: &[char] = &['.', ',', '!', '?', ';', ':', '…', '»', '"', '\''];
/// Tokens that absorb the space after them when detokenizing
const OPENING: &[char] = &['«', '"', '\''];

/// Split text into word and punctuation tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let mut spaced = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        if PUNCTUATION.contains(&c) {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced.split_whitespace().map(str::to_string).collect()
}

/// Join tokens back into display text, restoring French-style spacing
/// around punctuation and quotes
pub fn detokenize(tokens: &[String]) -> String {
    let mut text = tokens.join(" ");
    for p in CLOSING {
        text = text.replace(&format!(" {}", p), &p.to_string());
    }
    for p in OPENING {
        text = text.replace(&format!("{} ", p), &p.to_string());
    }
    text.trim().to_string()
}

/// Whitespace-normalize raw caption text: `detokenize(tokenize(text))`
pub fn normalize(text: &str) -> String {
    detokenize(&tokenize(text))
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Edit-distance similarity of two words, case-insensitive.
/// Two empty words compare as dissimilar.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let max = a.len().max(b.len());
    if max == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max as f64
}

/// Length of the best fuzzy match between the tail of `prev` and the head
/// of `next`, capped at [`MAX_OVERLAP_TOKENS`]. Ties on match ratio go to
/// the longer candidate.
pub fn find_overlap(prev: &[String], next: &[String]) -> usize {
    let max_k = prev.len().min(next.len()).min(MAX_OVERLAP_TOKENS);
    let mut best = 0;
    for k in 1..=max_k {
        let offset = prev.len() - k;
        let matches = (0..k)
            .filter(|&i| word_similarity(&prev[offset + i], &next[i]) >= TOKEN_SIMILARITY)
            .count();
        if matches as f64 / k as f64 >= MATCH_RATIO && k > best {
            best = k;
        }
    }
    best
}

/// Finalize a slot after its grace end has settled.
///
/// Slot 0 emits itself in full; every later slot records how much of its
/// head repeats its predecessor's tail, then emits the predecessor (whose
/// own head trim was assigned by the finalization before this one).
pub fn finalize_slot(state: &Arc<AppState>, index: u64) {
    let mut session = state.session.lock();
    if !session.fragment_active {
        return;
    }
    if session.slot(index).is_none() {
        return;
    }

    if index == 0 {
        emit_slot(state, &mut session, 0, None, false);
        return;
    }

    let prev_index = index - 1;
    let cur_tokens = match session.slot(index) {
        Some(slot) => tokenize(&slot.raw_text()),
        None => return,
    };
    let prev_tokens = session
        .slot(prev_index)
        .map(|slot| tokenize(&slot.raw_text()))
        .unwrap_or_default();

    let overlap = find_overlap(&prev_tokens, &cur_tokens);
    if let Some(slot) = session.slot_mut(index) {
        slot.overlap_from_prev = Some(overlap);
    }
    tracing::debug!(slot = index, overlap, "slot finalized");

    let already_sent = match session.slot(prev_index) {
        Some(prev) => prev.sent,
        None => return,
    };
    if already_sent {
        return;
    }
    emit_slot(state, &mut session, prev_index, Some(index), false);
}

/// Flush every unsent slot, oldest first, with already-assigned overlaps
/// applied. Used at fragment stop for best-effort catch-up.
pub fn send_remaining_slots(state: &Arc<AppState>, session: &mut SessionState) {
    let unsent: Vec<u64> = session
        .slots
        .iter()
        .filter(|s| !s.sent)
        .map(|s| s.index)
        .collect();
    for index in unsent {
        emit_slot(state, session, index, None, true);
    }
}

/// Compute a slot's final text, mark it sent, and hand it to the pacer.
/// Empty results still flip `sent` so every slot is emitted exactly once.
fn emit_slot(
    state: &Arc<AppState>,
    session: &mut SessionState,
    index: u64,
    next_slot_index: Option<u64>,
    immediate: bool,
) {
    let delay_secs = session.delay_secs;
    let slot_duration_ms = session.fragment.slot_duration_secs * 1000;
    let created_at_ms = state.wall_now_ms();

    let Some(slot) = session.slot_mut(index) else {
        return;
    };
    if slot.sent {
        return;
    }

    let tokens = tokenize(&normalize(&slot.raw_text()));
    let dropped = slot.overlap_from_prev.unwrap_or(0).min(tokens.len());
    let final_text = detokenize(&tokens[dropped..]);
    slot.final_text = Some(final_text.clone());
    slot.sent = true;

    if final_text.is_empty() {
        return;
    }

    let started_mono_ms = slot.started_mono_ms;
    let video_timestamp_ms = slot.start_video_offset_ms;
    let subtitler_name = slot.subtitler_name.clone();

    let fused = FusedCaption {
        id: Uuid::new_v4().to_string(),
        text: final_text.clone(),
        created_at_ms,
        video_timestamp_ms,
        slot_index: index,
        next_slot_index,
        overlap_count: dropped,
    };
    session.fused.push(fused.clone());
    state.hub.to_admins(&ServerMessage::FragmentFusedCaption {
        caption: fused,
        overlap_count: dropped,
    });

    pacer::schedule_emission(
        state,
        pacer::Emission {
            slot_index: index,
            started_mono_ms,
            video_timestamp_ms,
            subtitler_name,
            slot_duration_ms,
            delay_secs,
            immediate,
        },
        &final_text,
    );
}

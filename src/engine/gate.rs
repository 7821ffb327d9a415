//! Submission gate
//!
//! Validates every incoming caption against the open-slot map and attaches
//! it to the right slot. Grace end removes a subtitler's open-slot entry
//! before their auto-send may have arrived; the history fallback covers
//! that race. Outside fragment mode the gate steps aside and captions go
//! straight to spectators with a display delay.

use std::sync::Arc;
use thiserror::Error;

use crate::messages::{CaptionPayload, ServerMessage};
use crate::session::RawCaption;
use crate::state::AppState;

/// Longest caption accepted, in characters
const MAX_CAPTION_CHARS: usize = 500;

/// Structured rejection reasons. None of these are surfaced to admins:
/// a late manual caption is not actionable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("no-open-slot")]
    NoOpenSlot,

    #[error("past-deadline")]
    PastDeadline,

    #[error("no-run")]
    NotRunning,
}

/// Process a caption from a subtitler connection
pub fn submit_caption(
    state: &Arc<AppState>,
    sender_id: &str,
    text: &str,
    auto_sent: bool,
) -> Result<(), GateRejection> {
    submit_caption_at(state, sender_id, text, auto_sent, state.timers.now_ms())
}

/// Gate logic with an explicit monotonic timestamp
pub(crate) fn submit_caption_at(
    state: &Arc<AppState>,
    sender_id: &str,
    text: &str,
    auto_sent: bool,
    now_ms: u64,
) -> Result<(), GateRejection> {
    let mut session = state.session.lock();

    let trimmed: String = text.trim().chars().take(MAX_CAPTION_CHARS).collect();
    let sender_name = session
        .subtitlers
        .iter()
        .find(|s| s.id == sender_id)
        .map(|s| s.name.clone())
        .or_else(|| state.hub.name_of(sender_id));

    // Outside fragment mode the caption goes straight to spectators,
    // stamped with the moment it should be displayed.
    if !session.fragment_active {
        if !session.running {
            return Err(GateRejection::NotRunning);
        }
        let display_at = state.wall_now_ms() + session.delay_secs * 1000;
        state.hub.to_spectators(&ServerMessage::Caption {
            caption: CaptionPayload {
                text: trimmed,
                subtitler_name: sender_name,
                auto_sent,
            },
            display_at: Some(display_at),
        });
        return Ok(());
    }

    let slot_duration_ms = session.fragment.slot_duration_secs * 1000;
    let deadline_ms = session.fragment.submit_deadline_secs() * 1000;

    // Open-slot lookup, then the close-race fallback: grace end may have
    // cleared the mapping while this frame was in flight.
    let slot_index = session
        .open_slots
        .get(sender_id)
        .copied()
        .or_else(|| {
            session
                .slots
                .iter()
                .rev()
                .find(|s| s.subtitler_id == sender_id)
                .map(|s| s.index)
        })
        .ok_or(GateRejection::NoOpenSlot)?;

    let started_mono_ms = session
        .slot(slot_index)
        .map(|s| s.started_mono_ms)
        .ok_or(GateRejection::NoOpenSlot)?;

    // Manual captions respect the submit deadline; auto-sends are accepted
    // however late they land.
    if !auto_sent && now_ms > started_mono_ms + deadline_ms {
        return Err(GateRejection::PastDeadline);
    }

    // Timestamp against the slot body, not the grace tail
    let offset_in_slot = now_ms.saturating_sub(started_mono_ms).min(slot_duration_ms);
    let caption = {
        let Some(slot) = session.slot_mut(slot_index) else {
            return Err(GateRejection::NoOpenSlot);
        };
        let caption = RawCaption {
            text: trimmed,
            video_timestamp_ms: slot.start_video_offset_ms + offset_in_slot,
            received_at_ms: now_ms,
            auto_sent,
        };
        slot.captions.push(caption.clone());
        caption
    };

    tracing::debug!(
        slot = slot_index,
        auto_sent,
        chars = caption.text.len(),
        "caption accepted"
    );

    state.hub.to_admins(&ServerMessage::FragmentRawCaption {
        caption: caption.clone(),
        slot_index,
    });

    // Echo to the other subtitlers so their view keeps up with the seam
    let sender = sender_id.to_string();
    state.hub.broadcast(
        &ServerMessage::Caption {
            caption: CaptionPayload {
                text: caption.text,
                subtitler_name: sender_name,
                auto_sent,
            },
            display_at: None,
        },
        move |c| c.role == crate::hub::Role::Subtitler && c.id != sender,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::hub::Role;
    use crate::session::Slot;
    use tokio::sync::mpsc;

    fn slot(index: u64, subtitler: &str, started_mono_ms: u64) -> Slot {
        Slot {
            index,
            subtitler_id: subtitler.to_string(),
            subtitler_name: subtitler.to_string(),
            start_at_ms: started_mono_ms,
            started_mono_ms,
            start_video_offset_ms: started_mono_ms,
            end_at_ms: None,
            end_video_offset_ms: None,
            captions: Vec::new(),
            overlap_from_prev: None,
            final_text: None,
            sent: false,
        }
    }

    /// D=10, O=4, g=20 -> G=2, deadline 12s
    fn fragment_state() -> Arc<AppState> {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        {
            let mut session = state.session.lock();
            session.running = true;
            session.fragment_active = true;
            session.rotation_started = true;
            session.add_subtitler("s1".into(), "Ada".into(), 1);
            session.add_subtitler("s2".into(), "Bea".into(), 2);
            session.add_subtitler("s3".into(), "Cyd".into(), 3);
        }
        state
    }

    fn connect(state: &AppState, id: &str, role: Role) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.hub.add(id.to_string(), tx);
        state.hub.set_identity(id, role, Some(id.to_string()));
        rx
    }

    #[tokio::test]
    async fn test_caption_lands_in_open_slot() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.open_slots.insert("s1".into(), 0);
        }

        submit_caption_at(&state, "s1", " Bonjour tout le monde ", false, 3_000).unwrap();

        let session = state.session.lock();
        let captions = &session.slot(0).unwrap().captions;
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].text, "Bonjour tout le monde");
        assert_eq!(captions[0].video_timestamp_ms, 3_000);
        assert!(!captions[0].auto_sent);
    }

    #[tokio::test]
    async fn test_video_timestamp_caps_at_slot_body() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.open_slots.insert("s1".into(), 0);
        }

        // received during grace, 11s in: capped at D = 10s
        submit_caption_at(&state, "s1", "fin", false, 11_000).unwrap();

        let session = state.session.lock();
        assert_eq!(session.slot(0).unwrap().captions[0].video_timestamp_ms, 10_000);
    }

    #[tokio::test]
    async fn test_no_slot_rejected() {
        let state = fragment_state();
        let err = submit_caption_at(&state, "s2", "rien", false, 1_000).unwrap_err();
        assert_eq!(err, GateRejection::NoOpenSlot);
    }

    #[tokio::test]
    async fn test_late_manual_caption_rejected() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.open_slots.insert("s1".into(), 0);
        }

        // deadline is 12s; 12.3s is too late for a manual caption
        let err = submit_caption_at(&state, "s1", "tard", false, 12_300).unwrap_err();
        assert_eq!(err, GateRejection::PastDeadline);
        assert!(state.session.lock().slot(0).unwrap().captions.is_empty());
    }

    #[tokio::test]
    async fn test_late_auto_send_falls_back_to_closed_slot() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            // grace end already cleared the mapping
        }

        submit_caption_at(&state, "s1", "dernier mot", true, 12_300).unwrap();

        let session = state.session.lock();
        let captions = &session.slot(0).unwrap().captions;
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].text, "dernier mot");
        assert!(captions[0].auto_sent);
    }

    #[tokio::test]
    async fn test_fallback_targets_most_recent_slot_of_sender() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.slots.push(slot(1, "s2", 6_000));
            session.slots.push(slot(2, "s3", 12_000));
            session.slots.push(slot(3, "s1", 18_000));
        }

        submit_caption_at(&state, "s1", "suite", true, 31_000).unwrap();

        let session = state.session.lock();
        assert!(session.slot(0).unwrap().captions.is_empty());
        assert_eq!(session.slot(3).unwrap().captions.len(), 1);
    }

    #[tokio::test]
    async fn test_text_truncated_to_limit() {
        let state = fragment_state();
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.open_slots.insert("s1".into(), 0);
        }

        let long = "é".repeat(800);
        submit_caption_at(&state, "s1", &long, false, 1_000).unwrap();

        let session = state.session.lock();
        let text = &session.slot(0).unwrap().captions[0].text;
        assert_eq!(text.chars().count(), 500);
    }

    #[tokio::test]
    async fn test_accepted_caption_reaches_admins_and_peers_not_sender() {
        let state = fragment_state();
        let mut admin_rx = connect(&state, "adm", Role::Admin);
        let mut sender_rx = connect(&state, "s1", Role::Subtitler);
        let mut peer_rx = connect(&state, "s2", Role::Subtitler);
        {
            let mut session = state.session.lock();
            session.slots.push(slot(0, "s1", 0));
            session.open_slots.insert("s1".into(), 0);
        }

        submit_caption_at(&state, "s1", "Bonjour.", false, 1_000).unwrap();

        let admin_frame = admin_rx.try_recv().unwrap();
        assert!(admin_frame.contains("fragment:raw-caption"));
        let peer_frame = peer_rx.try_recv().unwrap();
        assert!(peer_frame.contains("\"type\":\"caption\""));
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_mode_bypasses_gate() {
        let state = Arc::new(AppState::with_defaults());
        {
            let mut session = state.session.lock();
            session.running = true;
            session.delay_secs = 30;
        }
        let mut spectator_rx = connect(&state, "v1", Role::Spectator);

        submit_caption_at(&state, "s1", "direct", false, 1_000).unwrap();

        let frame = spectator_rx.try_recv().unwrap();
        assert!(frame.contains("\"displayAt\""));
        assert!(frame.contains("direct"));
    }

    #[tokio::test]
    async fn test_no_run_rejects_direct_caption() {
        let state = Arc::new(AppState::with_defaults());
        let err = submit_caption_at(&state, "s1", "vide", false, 0).unwrap_err();
        assert_eq!(err, GateRejection::NotRunning);
    }
}

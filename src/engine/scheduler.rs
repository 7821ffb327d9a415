//! Slot scheduler
//!
//! Advances the rotation every stride while individual slots live
//! `D + G` seconds, so consecutive slots overlap. Each started slot pins
//! its assignee and carries four timers: the ending notice, the prepare
//! notice for the next assignee, grace start, and grace end. Grace end
//! closes the submission window and hands the slot to the fusion engine
//! after a short settle.
//!
//! Rotation requires the configured roster size; when subtitlers are
//! missing the scheduler parks (or skips slot starts) without advancing
//! the slot index, so indices stay contiguous.

use std::sync::Arc;

use crate::clock::TimerGroup;
use crate::error::{CaptionError, Result};
use crate::messages::ServerMessage;
use crate::session::{SessionState, Slot};
use crate::state::AppState;

use super::fusion;

/// Activate fragment mode. Requires a running live session; parks in the
/// waiting state when fewer than R subtitlers have joined.
pub(crate) fn start_fragment(state: &Arc<AppState>, session: &mut SessionState) -> Result<()> {
    if session.fragment_active {
        return Err(CaptionError::FragmentActive);
    }
    if !session.running {
        return Err(CaptionError::NotRunning);
    }
    session.fragment.validate()?;

    state.timers.cancel_all();
    session.reset_rotation();
    session.fragment_active = true;

    state.hub.broadcast_all(&ServerMessage::FragmentStarted);
    tracing::info!(
        slot_duration = session.fragment.slot_duration_secs,
        overlap = session.fragment.overlap_duration_secs,
        grace_percent = session.fragment.grace_percent,
        required = session.fragment.required_subtitlers,
        "fragment mode started"
    );

    // Status heartbeat, at least once per second while fragment is active
    let heartbeat = Arc::clone(state);
    state.timers.schedule_every(1_000, TimerGroup::Status, move || {
        super::broadcast_status(&heartbeat);
    });

    if session.subtitlers.len() >= session.fragment.required_subtitlers {
        begin_rotation(state, session);
    } else {
        tracing::info!(
            joined = session.subtitlers.len(),
            required = session.fragment.required_subtitlers,
            "waiting for subtitlers before starting rotation"
        );
    }
    super::broadcast_status_with(state, session);
    Ok(())
}

/// Deactivate fragment mode: cancel everything, flush unsent slots, clear
/// the open-slot map.
pub(crate) fn stop_fragment(state: &Arc<AppState>, session: &mut SessionState) -> Result<()> {
    if !session.fragment_active {
        return Err(CaptionError::FragmentInactive);
    }
    // Cancel first so the catch-up emission below schedules under the new
    // run generation and survives.
    state.timers.cancel_all();
    fusion::send_remaining_slots(state, session);

    session.fragment_active = false;
    session.rotation_started = false;
    session.open_slots.clear();

    state.hub.broadcast_all(&ServerMessage::FragmentStopped);
    tracing::info!(slots = session.slots.len(), "fragment mode stopped");
    Ok(())
}

/// Start the first slot and register the stride interval
fn begin_rotation(state: &Arc<AppState>, session: &mut SessionState) {
    session.rotation_started = true;
    start_next_slot_locked(state, session);

    let stride_ms = session.fragment.stride_secs() * 1000;
    let tick_state = Arc::clone(state);
    state.timers.schedule_every(stride_ms, TimerGroup::Stride, move || {
        start_next_slot(&tick_state);
    });
}

/// Stride tick entry point
pub fn start_next_slot(state: &Arc<AppState>) {
    let mut session = state.session.lock();
    start_next_slot_locked(state, &mut session);
}

pub(crate) fn start_next_slot_locked(state: &Arc<AppState>, session: &mut SessionState) {
    if !session.fragment_active || !session.rotation_started {
        return;
    }
    if session.subtitlers.len() < session.fragment.required_subtitlers {
        tracing::warn!(
            joined = session.subtitlers.len(),
            required = session.fragment.required_subtitlers,
            "not enough subtitlers, skipping slot start"
        );
        super::broadcast_status_with(state, session);
        return;
    }

    let index = session.current_slot_index;
    if session.slot(index).is_some() {
        // Slot indices are never reused; a collision means the run state
        // is corrupt and the rotation must not continue.
        tracing::error!(slot = index, "slot index collision, stopping rotation");
        let _ = stop_fragment(state, session);
        return;
    }
    let (current, next) = match (
        session.subtitler_for_slot(index).cloned(),
        session.subtitler_for_slot(index + 1).cloned(),
    ) {
        (Some(current), Some(next)) => (current, next),
        _ => return,
    };

    let now_mono = state.timers.now_ms();
    let video_offset = now_mono.saturating_sub(session.live_started_mono_ms.unwrap_or(now_mono));
    session.slots.push(Slot {
        index,
        subtitler_id: current.id.clone(),
        subtitler_name: current.name.clone(),
        start_at_ms: state.wall_now_ms(),
        started_mono_ms: now_mono,
        start_video_offset_ms: video_offset,
        end_at_ms: None,
        end_video_offset_ms: None,
        captions: Vec::new(),
        overlap_from_prev: None,
        final_text: None,
        sent: false,
    });
    session.open_slots.insert(current.id.clone(), index);
    session.last_slot_started_mono_ms = Some(now_mono);

    tracing::info!(slot = index, subtitler = %current.name, "slot started");

    let cfg = &session.fragment;
    let notify_secs = cfg.notify_before_secs;
    let slot_ms = cfg.slot_duration_secs * 1000;
    let stride_ms = cfg.stride_secs() * 1000;
    let grace_end_ms = cfg.submit_deadline_secs() * 1000;
    let grace_percent = cfg.grace_percent;
    let group = TimerGroup::Slot(index);

    // Ending notice to the slot's own subtitler
    {
        let notify_state = Arc::clone(state);
        let target = current.id.clone();
        state
            .timers
            .schedule(slot_ms.saturating_sub(notify_secs * 1000), group, move || {
                notify_state
                    .hub
                    .send_to(&target, &ServerMessage::FragmentEnding {
                        seconds_left: notify_secs,
                    });
                super::broadcast_status(&notify_state);
            });
    }

    // Prepare notice to the next assignee, skipped when the lead time does
    // not fit inside the stride
    if stride_ms > notify_secs * 1000 {
        let notify_state = Arc::clone(state);
        let target = next.id.clone();
        state
            .timers
            .schedule(stride_ms - notify_secs * 1000, group, move || {
                notify_state
                    .hub
                    .send_to(&target, &ServerMessage::FragmentPrepare {
                        seconds_left: notify_secs,
                    });
                super::broadcast_status(&notify_state);
            });
    }

    // Grace start
    {
        let notify_state = Arc::clone(state);
        let target = current.id.clone();
        state.timers.schedule(slot_ms, group, move || {
            notify_state
                .hub
                .send_to(&target, &ServerMessage::FragmentGraceStart {
                    grace_period_percent: grace_percent,
                });
            super::broadcast_status(&notify_state);
        });
    }

    // Grace end closes the submission window
    {
        let end_state = Arc::clone(state);
        state.timers.schedule(grace_end_ms, group, move || {
            on_grace_end(&end_state, index);
        });
    }

    session.current_slot_index = index + 1;
    super::broadcast_status_with(state, session);
}

/// Grace end: request the auto-send, stamp the slot end, close the
/// submission window, and queue finalization after the settle delay.
pub(crate) fn on_grace_end(state: &Arc<AppState>, index: u64) {
    let settle_ms = {
        let mut session = state.session.lock();
        if !session.fragment_active {
            return;
        }
        let now_mono = state.timers.now_ms();
        let wall_now = state.wall_now_ms();
        let live_start = session.live_started_mono_ms;

        let subtitler_id = {
            let Some(slot) = session.slot_mut(index) else {
                return;
            };
            slot.end_at_ms = Some(wall_now);
            slot.end_video_offset_ms =
                Some(now_mono.saturating_sub(live_start.unwrap_or(now_mono)));
            slot.subtitler_id.clone()
        };

        // The same subtitler may already own a newer slot; only clear the
        // mapping when it still points here.
        if session.open_slots.get(&subtitler_id).copied() == Some(index) {
            session.open_slots.remove(&subtitler_id);
        }

        state
            .hub
            .send_to(&subtitler_id, &ServerMessage::FragmentAutoSend);
        super::broadcast_status_with(state, &session);
        session.fragment.settle_ms
    };

    // Settle before finalizing so an in-flight auto-send can still land
    let settle_state = Arc::clone(state);
    state
        .timers
        .schedule(settle_ms, TimerGroup::Slot(index), move || {
            fusion::finalize_slot(&settle_state, index);
        });
}

/// A subtitler joined the rotation roster
pub fn subtitler_join(state: &Arc<AppState>, conn_id: &str, name: Option<String>) {
    let mut session = state.session.lock();
    let display_name = name
        .or_else(|| state.hub.name_of(conn_id))
        .unwrap_or_else(|| format!("subtitler-{}", conn_id.get(..8).unwrap_or(conn_id)));
    session.add_subtitler(conn_id.to_string(), display_name, state.timers.now_ms());

    state.hub.send_to(conn_id, &ServerMessage::FragmentJoined {
        conn_id: conn_id.to_string(),
        active: session.fragment_active,
    });

    // A parked scheduler starts rotating the moment the roster is complete
    if session.fragment_active
        && !session.rotation_started
        && session.subtitlers.len() >= session.fragment.required_subtitlers
    {
        begin_rotation(state, &mut session);
    }
    super::broadcast_status_with(state, &session);
}

/// A subtitler left (explicitly or by disconnect). Their open slot is not
/// reassigned; it runs to its deadline with whatever text it holds.
pub fn subtitler_leave(state: &Arc<AppState>, conn_id: &str) {
    let mut session = state.session.lock();
    if session.remove_subtitler(conn_id) {
        tracing::info!(conn = conn_id, "subtitler left the roster");
        super::broadcast_status_with(state, &session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn running_state() -> Arc<AppState> {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        {
            let mut session = state.session.lock();
            session.running = true;
            session.live_started_mono_ms = Some(0);
            session.live_started_at_ms = Some(0);
        }
        state
    }

    fn join_n(state: &Arc<AppState>, n: usize) {
        for i in 0..n {
            subtitler_join(state, &format!("s{}", i), Some(format!("sub-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_start_requires_running_session() {
        let state = Arc::new(AppState::with_defaults());
        let mut session = state.session.lock();
        let err = start_fragment(&state, &mut session).unwrap_err();
        assert!(matches!(err, CaptionError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_parks_until_roster_complete() {
        let state = running_state();
        join_n(&state, 2); // default requires 3
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
            assert!(session.fragment_active);
            assert!(!session.rotation_started);
            assert!(session.slots.is_empty());
        }

        // Third join completes the roster and starts slot 0 immediately
        subtitler_join(&state, "s2", Some("sub-2".into()));
        let session = state.session.lock();
        assert!(session.rotation_started);
        assert_eq!(session.slots.len(), 1);
        assert_eq!(session.slots[0].index, 0);
        assert_eq!(session.current_slot_index, 1);
        assert_eq!(session.open_slots.get("s0").copied(), Some(0));
    }

    #[tokio::test]
    async fn test_rotation_starts_immediately_with_full_roster() {
        let state = running_state();
        join_n(&state, 3);
        let mut session = state.session.lock();
        start_fragment(&state, &mut session).unwrap();
        assert!(session.rotation_started);
        assert_eq!(session.slots.len(), 1);
        // slot 0 goes to the earliest joiner
        assert_eq!(session.slots[0].subtitler_id, "s0");
    }

    #[tokio::test]
    async fn test_start_refuses_invalid_config() {
        let state = running_state();
        {
            let mut session = state.session.lock();
            session.fragment.overlap_duration_secs = session.fragment.slot_duration_secs;
        }
        let mut session = state.session.lock();
        let err = start_fragment(&state, &mut session).unwrap_err();
        assert!(matches!(err, CaptionError::Config(_)));
        assert!(!session.fragment_active);
    }

    #[tokio::test]
    async fn test_short_roster_does_not_advance_slot_index() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }
        subtitler_leave(&state, "s1");
        subtitler_leave(&state, "s2");

        start_next_slot(&state);

        let session = state.session.lock();
        assert_eq!(session.current_slot_index, 1);
        assert_eq!(session.slots.len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_starts_rotate_assignees() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }
        start_next_slot(&state);
        start_next_slot(&state);
        start_next_slot(&state);

        let session = state.session.lock();
        let assignees: Vec<&str> = session
            .slots
            .iter()
            .map(|s| s.subtitler_id.as_str())
            .collect();
        assert_eq!(assignees, vec!["s0", "s1", "s2", "s0"]);
        // indices are contiguous from zero
        let indices: Vec<u64> = session.slots.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        // s0's open slot was remapped to their newest slot
        assert_eq!(session.open_slots.get("s0").copied(), Some(3));
    }

    #[tokio::test]
    async fn test_grace_end_clears_only_matching_mapping() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }
        start_next_slot(&state);
        start_next_slot(&state);
        start_next_slot(&state); // slot 3 remaps s0's entry to 3

        on_grace_end(&state, 0);

        let session = state.session.lock();
        // slot 0's grace end fired after s0 got slot 3: mapping untouched
        assert_eq!(session.open_slots.get("s0").copied(), Some(3));
        let slot0 = session.slot(0).unwrap();
        assert!(slot0.end_at_ms.is_some());
        assert!(slot0.end_video_offset_ms.is_some());
    }

    #[tokio::test]
    async fn test_grace_end_clears_current_mapping() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }

        on_grace_end(&state, 0);

        let session = state.session.lock();
        assert!(session.open_slots.get("s0").is_none());
    }

    #[tokio::test]
    async fn test_disconnect_does_not_reassign_open_slot() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }
        subtitler_leave(&state, "s0");

        let session = state.session.lock();
        // the slot still belongs to s0 and stays submittable
        assert_eq!(session.slots[0].subtitler_id, "s0");
        assert_eq!(session.open_slots.get("s0").copied(), Some(0));
        // rotation for the next slot is computed over the remaining roster
        assert_eq!(session.subtitler_for_slot(1).unwrap().id, "s2");
    }

    #[tokio::test]
    async fn test_stop_flushes_unsent_slots_and_clears_map() {
        let state = running_state();
        join_n(&state, 3);
        {
            let mut session = state.session.lock();
            start_fragment(&state, &mut session).unwrap();
        }
        {
            let mut session = state.session.lock();
            if let Some(slot) = session.slot_mut(0) {
                slot.captions.push(crate::session::RawCaption {
                    text: "au revoir".into(),
                    video_timestamp_ms: 0,
                    received_at_ms: 0,
                    auto_sent: false,
                });
            }
            stop_fragment(&state, &mut session).unwrap();
            assert!(!session.fragment_active);
            assert!(session.open_slots.is_empty());
            assert!(session.slots.iter().all(|s| s.sent));
            assert_eq!(
                session.slot(0).unwrap().final_text.as_deref(),
                Some("au revoir")
            );
        }
        let err = {
            let mut session = state.session.lock();
            stop_fragment(&state, &mut session).unwrap_err()
        };
        assert!(matches!(err, CaptionError::FragmentInactive));
    }
}

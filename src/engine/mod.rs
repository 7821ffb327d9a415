//! Subtitling coordination engine
//!
//! Ties the slot scheduler, submission gate, fusion engine, and delivery
//! pacer together over the shared session state. Everything here mutates
//! state under the single session mutex; fan-out sends are non-blocking
//! and may happen while it is held.

pub mod fusion;
pub mod gate;
pub mod pacer;
pub mod scheduler;

use std::sync::Arc;

use crate::config::FragmentConfig;
use crate::error::{CaptionError, Result};
use crate::hub::Role;
use crate::messages::{LiveStatus, ServerMessage, StatusCommon, SubtitlerBrief};
use crate::session::{Mode, SessionState};
use crate::state::AppState;

/// Optional per-request overrides for run and fragment configuration
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub mode: Option<Mode>,
    pub delay_secs: Option<u64>,
    pub slot_duration_secs: Option<u64>,
    pub overlap_duration_secs: Option<u64>,
    pub grace_percent: Option<u64>,
    pub notify_before_secs: Option<u64>,
    pub required_subtitlers: Option<usize>,
}

impl RunOverrides {
    fn apply_to(&self, fragment: &mut FragmentConfig) {
        if let Some(v) = self.slot_duration_secs {
            fragment.slot_duration_secs = v;
        }
        if let Some(v) = self.overlap_duration_secs {
            fragment.overlap_duration_secs = v;
        }
        if let Some(v) = self.grace_percent {
            fragment.grace_percent = v;
        }
        if let Some(v) = self.notify_before_secs {
            fragment.notify_before_secs = v;
        }
        if let Some(v) = self.required_subtitlers {
            fragment.required_subtitlers = v;
        }
    }
}

/// Start a live run. In fragmentation mode this also activates the slot
/// scheduler and therefore requires the full roster up front.
pub fn start_run(state: &Arc<AppState>, overrides: RunOverrides) -> Result<()> {
    let mut session = state.session.lock();
    if session.running {
        return Err(CaptionError::AlreadyRunning);
    }

    let mode = overrides.mode.unwrap_or(Mode::Fragmentation);
    let mut fragment = state.config.fragment.clone();
    overrides.apply_to(&mut fragment);
    fragment.validate()?;

    let delay_secs = overrides.delay_secs.unwrap_or(session.delay_secs);
    check_delay_bounds(state, &fragment, delay_secs)?;

    if mode == Mode::Fragmentation {
        let required = fragment.required_subtitlers;
        let joined = session.subtitlers.len();
        if joined < required {
            return Err(CaptionError::NotEnoughSubtitlers { joined, required });
        }
    }

    state.hub.broadcast_all(&ServerMessage::Live {
        status: LiveStatus::Starting,
        delay_secs,
        live_started_at: None,
    });

    session.fragment = fragment;
    session.delay_secs = delay_secs;
    session.mode = mode;
    session.running = true;
    session.live_started_at_ms = Some(state.wall_now_ms());
    session.live_started_mono_ms = Some(state.timers.now_ms());

    state.hub.broadcast_all(&ServerMessage::Live {
        status: LiveStatus::Started,
        delay_secs,
        live_started_at: session.live_started_at_ms,
    });
    tracing::info!(?mode, delay_secs, "live run started");

    if mode == Mode::Fragmentation {
        scheduler::start_fragment(state, &mut session)?;
    }
    Ok(())
}

/// Stop the live run. Idempotent: stopping an idle server is a no-op.
pub fn stop_run(state: &Arc<AppState>) {
    let mut session = state.session.lock();
    if !session.running {
        return;
    }
    if session.fragment_active {
        let _ = scheduler::stop_fragment(state, &mut session);
    }
    state.timers.cancel_all();
    let delay_secs = session.delay_secs;
    session.reset_run();

    state.hub.broadcast_all(&ServerMessage::Live {
        status: LiveStatus::Stopped,
        delay_secs,
        live_started_at: None,
    });
    tracing::info!("live run stopped");
}

/// Change the spectator delay. The floor tracks the current fragment
/// configuration, so the delay can never dip below the submit deadline of
/// a slot already in flight.
pub fn set_delay(state: &Arc<AppState>, delay_secs: u64) -> Result<u64> {
    let mut session = state.session.lock();
    let fragment = session.fragment.clone();
    check_delay_bounds(state, &fragment, delay_secs)?;
    session.delay_secs = delay_secs;
    state
        .hub
        .broadcast_all(&ServerMessage::Config { delay_secs });
    tracing::info!(delay_secs, "spectator delay updated");
    Ok(delay_secs)
}

/// Replace the fragment configuration. Refused while a rotation is active;
/// slots in flight were scheduled under the old timing.
pub fn set_fragment_config(
    state: &Arc<AppState>,
    overrides: RunOverrides,
) -> Result<FragmentConfig> {
    let mut session = state.session.lock();
    if session.fragment_active {
        return Err(CaptionError::FragmentActive);
    }
    let mut fragment = session.fragment.clone();
    overrides.apply_to(&mut fragment);
    fragment.validate()?;
    check_delay_bounds(state, &fragment, session.delay_secs)?;
    session.fragment = fragment.clone();
    tracing::info!(
        slot_duration = fragment.slot_duration_secs,
        overlap = fragment.overlap_duration_secs,
        "fragment configuration updated"
    );
    Ok(fragment)
}

fn check_delay_bounds(
    state: &AppState,
    fragment: &FragmentConfig,
    delay_secs: u64,
) -> Result<()> {
    let minimum = fragment.min_delay_secs(state.config.media.segment_duration_secs);
    if delay_secs < minimum {
        return Err(CaptionError::DelayTooLow {
            requested: delay_secs,
            minimum,
        });
    }
    let maximum = state.config.delay.max_delay_secs;
    if delay_secs > maximum {
        return Err(CaptionError::DelayTooHigh {
            requested: delay_secs,
            maximum,
        });
    }
    Ok(())
}

/// Broadcast individualized status frames (entry point for timers)
pub fn broadcast_status(state: &Arc<AppState>) {
    let session = state.session.lock();
    broadcast_status_with(state, &session);
}

/// Broadcast individualized status frames with the lock already held.
///
/// Subtitlers each get their own countdown: the deadline of their open
/// slot, or the start of their next assigned slot. Admins get the
/// aggregate view. Frames are at-least-once; receivers compare
/// `currentSlotIndex` against staleness.
pub(crate) fn broadcast_status_with(state: &AppState, session: &SessionState) {
    let latest = session.slots.last();
    let common = StatusCommon {
        active: session.fragment_active,
        slot_duration: session.fragment.slot_duration_secs,
        grace_period_percent: session.fragment.grace_percent,
        required_subtitlers: session.fragment.required_subtitlers,
        overlap_duration: session.fragment.overlap_duration_secs,
        current_slot_index: latest.map(|s| s.index),
        current_subtitler_id: latest.map(|s| s.subtitler_id.clone()),
        current_subtitler_name: latest.map(|s| s.subtitler_name.clone()),
        subtitler_count: session.subtitlers.len(),
        subtitlers: session
            .subtitlers
            .iter()
            .map(|s| SubtitlerBrief {
                id: s.id.clone(),
                name: s.name.clone(),
            })
            .collect(),
    };

    let now_ms = state.timers.now_ms();
    for client in state.hub.snapshot() {
        match client.role {
            Role::Admin => {
                state.hub.send_to(&client.id, &ServerMessage::FragmentAdminStatus {
                    common: common.clone(),
                    raw_captions_count: session.raw_caption_count(),
                    fused_captions_count: session.fused.len(),
                    slots_count: session.slots.len(),
                });
            }
            Role::Subtitler => {
                let (seconds_remaining, in_grace_period) =
                    subtitler_countdown(session, &client.id, now_ms);
                let is_my_turn =
                    common.current_subtitler_id.as_deref() == Some(client.id.as_str());
                state.hub.send_to(&client.id, &ServerMessage::FragmentStatus {
                    common: common.clone(),
                    seconds_remaining,
                    is_my_turn,
                    in_grace_period,
                });
            }
            Role::Spectator => {}
        }
    }
}

/// Seconds until this subtitler's next obligation: their open-slot
/// deadline, or the start of their next assigned slot.
fn subtitler_countdown(session: &SessionState, id: &str, now_ms: u64) -> (Option<u64>, bool) {
    let slot_ms = session.fragment.slot_duration_secs * 1000;
    let deadline_ms = session.fragment.submit_deadline_secs() * 1000;

    if let Some(slot_index) = session.open_slots.get(id).copied() {
        if let Some(slot) = session.slot(slot_index) {
            let deadline = slot.started_mono_ms + deadline_ms;
            let in_grace = now_ms > slot.started_mono_ms + slot_ms;
            return (Some(deadline.saturating_sub(now_ms) / 1000), in_grace);
        }
    }

    if session.rotation_started {
        if let Some(last_start) = session.last_slot_started_mono_ms {
            let stride_ms = session.fragment.stride_secs() * 1000;
            // The slot at current_slot_index starts one stride after the
            // latest start; scan one full rotation ahead.
            for k in 0..session.subtitlers.len() as u64 {
                let candidate = session.current_slot_index + k;
                if session
                    .subtitler_for_slot(candidate)
                    .map(|s| s.id == id)
                    .unwrap_or(false)
                {
                    let start = last_start + (k + 1) * stride_ms;
                    return (Some(start.saturating_sub(now_ms) / 1000), false);
                }
            }
        }
    }
    (None, false)
}

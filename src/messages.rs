//! Realtime message taxonomy
//!
//! All frames on the realtime channel are JSON objects tagged by `type`.
//! Client frames deserialize into [`ClientMessage`]; everything the server
//! emits is a [`ServerMessage`] built by the engine and serialized once per
//! recipient (statuses are individualized, so sharing a serialization
//! buffer would not help).

use serde::{Deserialize, Serialize};

use crate::hub::Role;
use crate::session::{FusedCaption, Mode, RawCaption};

/// Frames received from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "identify", rename_all = "camelCase")]
    Identify {
        client_type: Role,
        #[serde(default)]
        name: Option<String>,
    },

    #[serde(rename = "fragment:join", rename_all = "camelCase")]
    FragmentJoin {
        #[serde(default)]
        name: Option<String>,
    },

    #[serde(rename = "fragment:leave")]
    FragmentLeave,

    #[serde(rename = "caption", rename_all = "camelCase")]
    Caption {
        text: String,
        #[serde(default)]
        subtitler_name: Option<String>,
        #[serde(default)]
        auto_sent: Option<bool>,
    },
}

/// Roster entry as exposed in status frames
#[derive(Debug, Clone, Serialize)]
pub struct SubtitlerBrief {
    pub id: String,
    pub name: String,
}

/// Fields shared by subtitler and admin status frames
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCommon {
    pub active: bool,
    pub slot_duration: u64,
    pub grace_period_percent: u64,
    pub required_subtitlers: usize,
    pub overlap_duration: u64,
    pub current_slot_index: Option<u64>,
    pub current_subtitler_id: Option<String>,
    pub current_subtitler_name: Option<String>,
    pub subtitler_count: usize,
    pub subtitlers: Vec<SubtitlerBrief>,
}

/// Caption payload for direct-mode delivery and subtitler echoes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitler_name: Option<String>,
    pub auto_sent: bool,
}

/// Frames sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "init", rename_all = "camelCase")]
    Init {
        conn_id: String,
        running: bool,
        #[serde(rename = "delaySec")]
        delay_secs: u64,
        mode: Mode,
        fragment_mode: bool,
    },

    #[serde(rename = "live", rename_all = "camelCase")]
    Live {
        status: LiveStatus,
        #[serde(rename = "delaySec")]
        delay_secs: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        live_started_at: Option<u64>,
    },

    #[serde(rename = "config")]
    Config {
        #[serde(rename = "delaySec")]
        delay_secs: u64,
    },

    #[serde(rename = "fragment:started")]
    FragmentStarted,

    #[serde(rename = "fragment:stopped")]
    FragmentStopped,

    #[serde(rename = "fragment:status", rename_all = "camelCase")]
    FragmentStatus {
        #[serde(flatten)]
        common: StatusCommon,
        seconds_remaining: Option<u64>,
        is_my_turn: bool,
        in_grace_period: bool,
    },

    #[serde(rename = "fragment:admin-status", rename_all = "camelCase")]
    FragmentAdminStatus {
        #[serde(flatten)]
        common: StatusCommon,
        raw_captions_count: usize,
        fused_captions_count: usize,
        slots_count: usize,
    },

    #[serde(rename = "fragment:joined", rename_all = "camelCase")]
    FragmentJoined { conn_id: String, active: bool },

    #[serde(rename = "fragment:prepare", rename_all = "camelCase")]
    FragmentPrepare { seconds_left: u64 },

    #[serde(rename = "fragment:ending", rename_all = "camelCase")]
    FragmentEnding { seconds_left: u64 },

    #[serde(rename = "fragment:grace-start", rename_all = "camelCase")]
    FragmentGraceStart { grace_period_percent: u64 },

    #[serde(rename = "fragment:auto-send")]
    FragmentAutoSend,

    #[serde(rename = "fragment:raw-caption", rename_all = "camelCase")]
    FragmentRawCaption { caption: RawCaption, slot_index: u64 },

    #[serde(rename = "fragment:fused-caption", rename_all = "camelCase")]
    FragmentFusedCaption {
        caption: FusedCaption,
        overlap_count: usize,
    },

    #[serde(rename = "caption", rename_all = "camelCase")]
    Caption {
        caption: CaptionPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_at: Option<u64>,
    },

    #[serde(rename = "caption:word", rename_all = "camelCase")]
    CaptionWord {
        id: String,
        word: String,
        word_index: usize,
        total_words: usize,
        is_last: bool,
        video_timestamp: u64,
        slot_index: u64,
        subtitler_name: String,
        slot_duration_ms: u64,
    },
}

/// Live run lifecycle announced to all clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Starting,
    Started,
    Stopped,
}

impl ServerMessage {
    /// Serialize for the wire. These types cannot fail to serialize; an
    /// empty frame is dropped by the hub.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_roundtrip() {
        let frame = r#"{"type":"identify","clientType":"subtitler","name":"Ada"}"#;
        let msg: ClientMessage = serde_json::from_str(frame).unwrap();
        match msg {
            ClientMessage::Identify { client_type, name } => {
                assert_eq!(client_type, Role::Subtitler);
                assert_eq!(name.as_deref(), Some("Ada"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_caption_defaults() {
        let frame = r#"{"type":"caption","text":"Bonjour."}"#;
        let msg: ClientMessage = serde_json::from_str(frame).unwrap();
        match msg {
            ClientMessage::Caption {
                text,
                subtitler_name,
                auto_sent,
            } => {
                assert_eq!(text, "Bonjour.");
                assert!(subtitler_name.is_none());
                assert!(auto_sent.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_fragment_leave_parses_without_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"fragment:leave"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::FragmentLeave));
    }

    #[test]
    fn test_init_wire_shape() {
        let msg = ServerMessage::Init {
            conn_id: "c1".into(),
            running: true,
            delay_secs: 30,
            mode: Mode::Fragmentation,
            fragment_mode: true,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "init");
        assert_eq!(value["connId"], "c1");
        assert_eq!(value["delaySec"], 30);
        assert_eq!(value["mode"], "fragmentation");
        assert_eq!(value["fragmentMode"], true);
    }

    #[test]
    fn test_status_flattens_common_fields() {
        let msg = ServerMessage::FragmentStatus {
            common: StatusCommon {
                active: true,
                slot_duration: 10,
                grace_period_percent: 20,
                required_subtitlers: 3,
                overlap_duration: 4,
                current_slot_index: Some(2),
                current_subtitler_id: Some("c2".into()),
                current_subtitler_name: Some("Bea".into()),
                subtitler_count: 3,
                subtitlers: vec![SubtitlerBrief {
                    id: "c2".into(),
                    name: "Bea".into(),
                }],
            },
            seconds_remaining: Some(7),
            is_my_turn: true,
            in_grace_period: false,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "fragment:status");
        assert_eq!(value["slotDuration"], 10);
        assert_eq!(value["currentSlotIndex"], 2);
        assert_eq!(value["secondsRemaining"], 7);
        assert_eq!(value["isMyTurn"], true);
        assert_eq!(value["subtitlers"][0]["name"], "Bea");
    }

    #[test]
    fn test_caption_word_wire_shape() {
        let msg = ServerMessage::CaptionWord {
            id: "em1".into(),
            word: "villes".into(),
            word_index: 2,
            total_words: 5,
            is_last: false,
            video_timestamp: 6000,
            slot_index: 0,
            subtitler_name: "Ada".into(),
            slot_duration_ms: 10_000,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "caption:word");
        assert_eq!(value["wordIndex"], 2);
        assert_eq!(value["isLast"], false);
        assert_eq!(value["slotDurationMs"], 10_000);
    }
}

//! Payload types for the MQTT topic tree and the WebSocket console.

use serde::Serialize;

/// Station context attached to alerts.
#[derive(Debug, Clone, Serialize)]
pub struct StationRef {
    pub pi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ps: Option<String>,
    pub frequency: String,
}

/// The single end-of-lifecycle alert published on `<prefix>/alert`.
///
/// Held back until transcription reaches a terminal status or the hold
/// timeout elapses; exactly one is published per ended event.
#[derive(Debug, Clone, Serialize)]
pub struct EndAlert {
    /// `traffic_announcement`, `emergency_broadcast` or `eon_traffic`.
    pub event_type: String,
    pub state: String,
    pub event_id: i64,
    pub station: StationRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
    pub radiotext: Vec<String>,
    pub transcribed_text: Option<String>,
    /// `done`, `error`, `timeout` or `none`.
    pub transcription_status: String,
    pub audio_available: bool,
    pub timestamp: String,
}

impl EndAlert {
    /// Wire name of an event type as stored in the database.
    pub fn wire_event_type(db_type: &str) -> String {
        match db_type {
            "traffic" => "traffic_announcement".to_string(),
            "emergency" => "emergency_broadcast".to_string(),
            other => other.to_string(),
        }
    }
}

/// Retained per-station transcription message on
/// `<prefix>/<pi>/<type>/transcription`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionMessage {
    pub event_id: i64,
    pub station: StationRef,
    pub transcription: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
    pub radiotext: Vec<String>,
    pub timestamp: String,
}

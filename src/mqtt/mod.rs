//! MQTT publishing: the broker client, the typed payloads, and the alert
//! gate that holds end-of-event alerts until transcription settles.

pub mod alerts;
pub mod client;
pub mod messages;

pub use alerts::{AlertPublisher, TranscriptionOutcome};
pub use client::MqttPublisher;
pub use messages::{EndAlert, StationRef, TranscriptionMessage};

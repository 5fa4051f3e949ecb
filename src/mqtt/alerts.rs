//! Alert publication and the end-of-event hold gate.
//!
//! Lifecycle messages (`state=start`, `state=update`) go out immediately on
//! `<prefix>/alert` and the console. When an event ends, the end alert is
//! held until its transcription reaches a terminal status or
//! `alert_hold_timeout` elapses, then published exactly once with
//! `transcribed_text` and `transcription_status` filled in.
//!
//! The hold is a per-event oneshot: the transcriber worker signals, the
//! publisher awaits with a timeout. No shared flags.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::http::ws::{console_send, ConsoleBus};
use crate::mqtt::client::MqttPublisher;
use crate::mqtt::messages::EndAlert;

/// Terminal transcription result delivered to a waiting end alert.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub text: Option<String>,
    /// `done`, `error` or `none`.
    pub status: &'static str,
}

pub struct AlertPublisher {
    mqtt: Arc<MqttPublisher>,
    console: ConsoleBus,
    pending: Mutex<HashMap<i64, oneshot::Sender<TranscriptionOutcome>>>,
    hold_timeout: Duration,
}

impl AlertPublisher {
    pub fn new(mqtt: Arc<MqttPublisher>, console: ConsoleBus, hold_timeout: Duration) -> Self {
        Self {
            mqtt,
            console,
            pending: Mutex::new(HashMap::new()),
            hold_timeout,
        }
    }

    /// Publish a `start`/`update` lifecycle message immediately.
    pub fn publish_lifecycle(&self, payload: Value) {
        self.mqtt.publish("alert", &payload, 1, false);
        console_send(&self.console, "alert", payload);
    }

    /// Hold the end alert for `alert.event_id` and publish it once.
    ///
    /// With `expect_transcription = false` (no audio was captured, or the
    /// event type never records) the alert goes out immediately with
    /// status `none`.
    pub fn hold_end_alert(self: &Arc<Self>, mut alert: EndAlert, expect_transcription: bool) {
        if !expect_transcription {
            alert.transcribed_text = None;
            alert.transcription_status = "none".to_string();
            self.publish_end(alert);
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(alert.event_id, tx);

        let publisher = Arc::clone(self);
        let timeout = self.hold_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => {
                    alert.transcribed_text = outcome.text;
                    alert.transcription_status = outcome.status.to_string();
                }
                Ok(Err(_)) => {
                    // Sender dropped without a result (shutdown mid-job).
                    alert.transcribed_text = None;
                    alert.transcription_status = "error".to_string();
                }
                Err(_) => {
                    warn!(
                        "alert hold for event {} timed out after {:?}",
                        alert.event_id, timeout
                    );
                    alert.transcribed_text = None;
                    alert.transcription_status = "timeout".to_string();
                }
            }
            publisher.pending.lock().unwrap().remove(&alert.event_id);
            publisher.publish_end(alert);
        });
    }

    /// Deliver a transcription outcome to a waiting end alert, if any.
    ///
    /// Late results (after the hold timed out) are dropped: the alert that
    /// already went out is never amended.
    pub fn release(&self, event_id: i64, outcome: TranscriptionOutcome) {
        let sender = self.pending.lock().unwrap().remove(&event_id);
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }

    /// Number of alerts currently being held (status/debugging).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn publish_end(&self, alert: EndAlert) {
        info!(
            "alert: {} end for event {} ({})",
            alert.event_type, alert.event_id, alert.transcription_status
        );
        self.mqtt.publish("alert", &alert, 1, false);
        if let Ok(value) = serde_json::to_value(&alert) {
            console_send(&self.console, "alert", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ws::console_bus;
    use crate::mqtt::messages::StationRef;
    use crate::store::now_ts;

    fn end_alert(id: i64) -> EndAlert {
        EndAlert {
            event_type: "traffic_announcement".into(),
            state: "end".into(),
            event_id: id,
            station: StationRef {
                pi: "0x9E04".into(),
                ps: None,
                frequency: "103.5M".into(),
            },
            duration_sec: Some(30),
            radiotext: vec![],
            transcribed_text: None,
            transcription_status: "saving".into(),
            audio_available: true,
            timestamp: now_ts(),
        }
    }

    fn publisher(hold: Duration) -> (Arc<AlertPublisher>, tokio::sync::broadcast::Receiver<String>) {
        let bus = console_bus();
        let rx = bus.subscribe();
        let p = Arc::new(AlertPublisher::new(
            Arc::new(MqttPublisher::disabled()),
            bus,
            hold,
        ));
        (p, rx)
    }

    #[tokio::test]
    async fn released_alert_carries_transcription() {
        let (p, mut rx) = publisher(Duration::from_secs(5));
        p.hold_end_alert(end_alert(1), true);
        assert_eq!(p.pending_count(), 1);
        p.release(
            1,
            TranscriptionOutcome {
                text: Some("Olycka på E4".into()),
                status: "done",
            },
        );
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let v: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["payload"]["transcription_status"], "done");
        assert_eq!(v["payload"]["transcribed_text"], "Olycka på E4");
        assert_eq!(p.pending_count(), 0);
    }

    #[tokio::test]
    async fn hold_times_out_with_null_text() {
        let (p, mut rx) = publisher(Duration::from_millis(50));
        p.hold_end_alert(end_alert(2), true);
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let v: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["payload"]["transcription_status"], "timeout");
        assert!(v["payload"]["transcribed_text"].is_null());
    }

    #[tokio::test]
    async fn no_transcription_publishes_immediately() {
        let (p, mut rx) = publisher(Duration::from_secs(30));
        p.hold_end_alert(end_alert(3), false);
        let msg = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let v: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["payload"]["transcription_status"], "none");
    }

    #[tokio::test]
    async fn late_release_is_dropped() {
        let (p, mut rx) = publisher(Duration::from_millis(20));
        p.hold_end_alert(end_alert(4), true);
        let _ = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        // The hold already timed out; this must not publish a second alert.
        p.release(
            4,
            TranscriptionOutcome {
                text: Some("late".into()),
                status: "done",
            },
        );
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err());
    }
}

// Rules engine scenarios: decoded groups in, event lifecycles and alerts
// out. Recordings here stay under the minimum duration, so every end
// alert publishes immediately with transcription status "none".

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rds_guard::audio::Recorder;
use rds_guard::http::ws::console_bus;
use rds_guard::mqtt::{AlertPublisher, MqttPublisher};
use rds_guard::rds::rules::{EngineDeps, RulesEngine};
use rds_guard::rds::{DecodedGroup, Station};
use rds_guard::store::EventStore;
use rds_guard::transcribe::TranscriberHandle;
use serde_json::Value;
use tokio::sync::broadcast;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<EventStore>,
    engine: RulesEngine,
    console: broadcast::Receiver<String>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap(),
    );
    let console = console_bus();
    let console_rx = console.subscribe();
    let mqtt = Arc::new(MqttPublisher::disabled());
    let alerts = Arc::new(AlertPublisher::new(
        mqtt.clone(),
        console.clone(),
        Duration::from_secs(5),
    ));
    let transcriber = TranscriberHandle::new(16, store.clone());
    let (recorder, _cap_rx) = Recorder::new(
        dir.path().join("audio"),
        2,
        600,
        store.clone(),
        transcriber,
    );
    let station = Arc::new(Mutex::new(Station::new("103.5M".into(), 103_500_000)));
    let engine = RulesEngine::new(
        station,
        EngineDeps {
            store: store.clone(),
            recorder,
            alerts,
            mqtt,
            console: console.clone(),
            record_types: vec!["traffic".into(), "emergency".into()],
            publish_all: false,
            publish_raw: false,
        },
    );
    Harness {
        _dir: dir,
        store,
        engine,
        console: console_rx,
    }
}

fn group(json: &str) -> DecodedGroup {
    DecodedGroup::parse(json).unwrap().unwrap()
}

/// Drain the console and return the payloads of gated end alerts (the
/// ones carrying `event_type`).
fn drain_end_alerts(rx: &mut broadcast::Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        let msg: Value = serde_json::from_str(&text).unwrap();
        if msg["topic"] == "alert" && msg["payload"]["event_type"].is_string() {
            out.push(msg["payload"].clone());
        }
    }
    out
}

#[tokio::test]
async fn happy_traffic_lifecycle() {
    let mut h = harness();

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","ta":true,"tp":true,"ps":"P4 Sthlm","timestamp":"2026-08-01T10:00:00"}"#,
    ));

    let active = h.store.active_events().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].event_type, "traffic");
    assert_eq!(active[0].severity, "warning");
    assert_eq!(active[0].state, "start");
    assert_eq!(active[0].station_ps.as_deref(), Some("P4 Sthlm"));
    assert_eq!(
        active[0].transcription_status.as_deref(),
        Some("recording")
    );

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","ta":false,"tp":true,"timestamp":"2026-08-01T10:00:30"}"#,
    ));

    assert!(h.store.active_events().unwrap().is_empty());
    let ev = h.store.get_event(active[0].id).unwrap().unwrap();
    assert_eq!(ev.state, "end");
    assert_eq!(ev.duration_sec, Some(30));
    assert_eq!(ev.ended_at.as_deref(), Some("2026-08-01T10:00:30"));

    // Exactly one end-of-lifecycle alert; the clip was too short for
    // audio, so it carries status "none".
    let alerts = drain_end_alerts(&mut h.console);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["event_type"], "traffic_announcement");
    assert_eq!(alerts[0]["state"], "end");
    assert_eq!(alerts[0]["duration_sec"], 30);
    assert_eq!(alerts[0]["transcription_status"], "none");
    assert_eq!(alerts[0]["station"]["pi"], "0x9E04");
}

#[tokio::test]
async fn repeated_ta_true_does_not_open_twice() {
    let mut h = harness();
    h.engine.on_group(&group(r#"{"pi":"0x9E04","group":"0A","ta":true}"#));
    h.engine.on_group(&group(r#"{"pi":"0x9E04","group":"0A","ta":true}"#));
    assert_eq!(h.store.active_events().unwrap().len(), 1);
    let _ = drain_end_alerts(&mut h.console);
}

#[tokio::test]
async fn emergency_takes_over_traffic() {
    let mut h = harness();

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","ta":true,"timestamp":"2026-08-01T10:00:00"}"#,
    ));
    // Alarm during the announcement: traffic ends, emergency opens.
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","prog_type":"Alarm","timestamp":"2026-08-01T10:00:10"}"#,
    ));

    let active = h.store.active_events().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].event_type, "emergency");
    assert_eq!(active[0].severity, "critical");

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","prog_type":"Pop music","timestamp":"2026-08-01T10:00:40"}"#,
    ));
    assert!(h.store.active_events().unwrap().is_empty());

    let alerts = drain_end_alerts(&mut h.console);
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0]["event_type"], "traffic_announcement");
    assert_eq!(alerts[1]["event_type"], "emergency_broadcast");
    assert_eq!(alerts[0]["duration_sec"], 10);
    assert_eq!(alerts[1]["duration_sec"], 30);
}

#[tokio::test]
async fn eon_traffic_event_for_linked_station() {
    let mut h = harness();

    // First observation seeds state only: a startup snapshot of a linked
    // station is not a transition.
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0xC502","ta":true,"ps":"P4 Gbg","kilohertz":101900}}"#,
    ));
    assert!(h.store.active_events().unwrap().is_empty());

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0xC502","ta":false}}"#,
    ));
    // Genuine transition: event opens.
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0xC502","ta":true,"ps":"P4 Gbg","kilohertz":101900},"timestamp":"2026-08-01T11:00:00"}"#,
    ));
    let active = h.store.active_events().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].event_type, "eon_traffic");
    assert_eq!(active[0].severity, "info");
    assert_eq!(active[0].data["linked_station"]["pi"], "0xC502");

    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0xC502","ta":false},"timestamp":"2026-08-01T11:00:50"}"#,
    ));
    assert!(h.store.active_events().unwrap().is_empty());

    let alerts = drain_end_alerts(&mut h.console);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["event_type"], "eon_traffic");
    assert_eq!(alerts[0]["transcription_status"], "none");
    assert_eq!(alerts[0]["audio_available"], false);
}

#[tokio::test]
async fn own_station_eon_reference_is_ignored() {
    let mut h = harness();
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0x9E04","ta":true}}"#,
    ));
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0x9E04","ta":false}}"#,
    ));
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0x9E04","ta":true}}"#,
    ));
    assert!(h.store.active_events().unwrap().is_empty());
}

#[tokio::test]
async fn radiotext_snapshots_dedupe_and_cap() {
    let mut h = harness();
    h.engine.on_group(&group(r#"{"pi":"0x9E04","group":"0A","ta":true}"#));
    let id = h.store.active_events().unwrap()[0].id;

    // Duplicate complete texts collapse to one entry.
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"2A","radiotext":"Kö på E4 norrut"}"#,
    ));
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"2A","radiotext":"Kö på E4 norrut"}"#,
    ));
    // Partial RadioText never reaches the event.
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"2A","partial_radiotext":"Olycka vid Nor"}"#,
    ));
    let ev = h.store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.radiotext, vec!["Kö på E4 norrut"]);

    // At most eight snapshots are kept.
    for i in 0..10 {
        h.engine.on_group(&group(&format!(
            r#"{{"pi":"0x9E04","group":"2A","radiotext":"Meddelande {i}"}}"#
        )));
    }
    let ev = h.store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.radiotext.len(), 8);
}

#[tokio::test]
async fn pi_glitch_ends_event_and_blocks_new_ones() {
    let mut h = harness();
    h.engine.on_group(&group(
        r#"{"pi":"0x9E04","group":"0A","ta":true,"timestamp":"2026-08-01T10:00:00"}"#,
    ));
    assert_eq!(h.store.active_events().unwrap().len(), 1);

    // PI flips mid-event: the open event is closed.
    h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A"}"#));
    assert!(h.store.active_events().unwrap().is_empty());

    // TA transitions on the new PI are ignored until it has been stable
    // for five groups.
    h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A","ta":false}"#));
    h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A","ta":true}"#));
    assert!(h.store.active_events().unwrap().is_empty());

    for _ in 0..5 {
        h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A"}"#));
    }
    h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A","ta":false}"#));
    h.engine.on_group(&group(r#"{"pi":"0xBEEF","group":"0A","ta":true}"#));
    let active = h.store.active_events().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].pi, "0xBEEF");
}

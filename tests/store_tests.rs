// Event store integration: persistence across reopen and startup
// recovery.

use rds_guard::store::{now_ts, EventFilter, EventStore};
use serde_json::json;

#[test]
fn stale_active_events_are_closed_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("events.db");
    let audio_dir = dir.path().join("audio");

    // First run: an event is opened and the process "dies".
    let id = {
        let store = EventStore::open(&db_path, &audio_dir).unwrap();
        store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                Some("P4 Sthlm"),
                Some("103.5M"),
                &json!({}),
                &now_ts(),
            )
            .unwrap()
    };

    // Second run: startup recovery closes the leftover.
    let store = EventStore::open(&db_path, &audio_dir).unwrap();
    let closed = store.close_stale_active_on_startup().unwrap();
    assert_eq!(closed, 1);

    let ev = store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.state, "end");
    assert!(ev.ended_at.is_some());
    assert_eq!(ev.transcription_status.as_deref(), Some("none"));

    // No event with a null ended_at survives a restart.
    assert!(store.active_events().unwrap().is_empty());
}

#[test]
fn schema_migration_is_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("events.db");
    let audio_dir = dir.path().join("audio");

    let id = {
        let store = EventStore::open(&db_path, &audio_dir).unwrap();
        let id = store
            .insert_event(
                "emergency",
                "critical",
                "0x9E04",
                None,
                None,
                &json!({"prog_type": "Alarm"}),
                &now_ts(),
            )
            .unwrap();
        store.end_event(id, &now_ts()).unwrap();
        store
            .update_transcription(id, Some("VMA test"), "done", Some(2.5))
            .unwrap();
        id
    };

    // Reopening runs the column migrations again; data survives.
    let store = EventStore::open(&db_path, &audio_dir).unwrap();
    let ev = store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.transcription.as_deref(), Some("VMA test"));
    assert_eq!(ev.state, "transcribed");
}

#[test]
fn audio_url_is_derived_from_audio_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap();
    let id = store
        .insert_event(
            "traffic",
            "warning",
            "0x9E04",
            None,
            None,
            &json!({}),
            &now_ts(),
        )
        .unwrap();
    store.update_audio(id, &format!("{id}.ogg")).unwrap();

    let (rows, total) = store.events(&EventFilter { limit: 10, ..Default::default() }).unwrap();
    assert_eq!(total, 1);
    assert_eq!(
        rows[0].audio_url.as_deref(),
        Some(format!("/api/audio/{id}.ogg").as_str())
    );
}

#[test]
fn transcription_verbatim_roundtrip() {
    // A backend result appears verbatim as the event's transcription -
    // including the empty string, which is a legal transcription.
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap();
    let id = store
        .insert_event(
            "traffic",
            "warning",
            "0x9E04",
            None,
            None,
            &json!({}),
            &now_ts(),
        )
        .unwrap();
    store.end_event(id, &now_ts()).unwrap();

    store.update_transcription(id, Some(""), "done", Some(0.3)).unwrap();
    let ev = store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.transcription.as_deref(), Some(""));
    assert_eq!(ev.transcription_status.as_deref(), Some("done"));

    store
        .update_transcription(id, Some("Olycka på E4 vid Norrtull"), "done", Some(4.0))
        .unwrap();
    let ev = store.get_event(id).unwrap().unwrap();
    assert_eq!(ev.transcription.as_deref(), Some("Olycka på E4 vid Norrtull"));
}

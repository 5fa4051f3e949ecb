//! SQLite event store.
//!
//! Single `rusqlite` connection behind a mutex; the mutex is the
//! single-writer serialization point and reads are snapshot-consistent.
//! Events are tracked as one row through their lifecycle
//! (`start → end → transcribed | transcription_failed`).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{RdsError, Result};

/// Timestamp format used throughout the store and the wire payloads.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current UTC timestamp in store format.
pub fn now_ts() -> String {
    Utc::now().format(TS_FORMAT).to_string()
}

/// Maximum RadioText snapshots kept per event.
pub const MAX_RADIOTEXT: usize = 8;

/// One event row, as served by the API and used in alert payloads.
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: String,
    pub state: String,
    pub pi: String,
    pub station_ps: Option<String>,
    pub frequency: Option<String>,
    pub radiotext: Vec<String>,
    pub data: Value,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_sec: Option<i64>,
    pub created_at: String,
    pub audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub transcription: Option<String>,
    pub transcription_status: Option<String>,
    pub transcription_duration_sec: Option<f64>,
}

/// Query filter for `events()`.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    /// Comma-separated list of event types.
    pub event_type: Option<String>,
    /// Only events created after this timestamp.
    pub since: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

pub struct EventStore {
    conn: Mutex<Connection>,
    audio_dir: PathBuf,
}

impl EventStore {
    /// Open (or create) the database and run schema setup + migrations.
    pub fn open(db_path: &Path, audio_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RdsError::Config(format!("cannot create data dir: {e}")))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                type         TEXT NOT NULL,
                severity     TEXT NOT NULL,
                state        TEXT NOT NULL,
                pi           TEXT NOT NULL,
                station_ps   TEXT,
                frequency    TEXT,
                radiotext    TEXT NOT NULL DEFAULT '[]',
                data         TEXT NOT NULL DEFAULT '{}',
                started_at   TEXT,
                ended_at     TEXT,
                duration_sec INTEGER,
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%S','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_events_type    ON events(type);
            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_pi      ON events(pi);
            CREATE INDEX IF NOT EXISTS idx_events_state   ON events(state);",
        )?;

        // Idempotent migrations for columns added after the first release.
        for (name, kind) in [
            ("audio_path", "TEXT"),
            ("transcription", "TEXT"),
            ("transcription_status", "TEXT"),
            ("transcription_duration_sec", "REAL"),
        ] {
            migrate_add_column(&conn, name, kind)?;
        }

        info!("event store initialized at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            audio_dir: audio_dir.to_path_buf(),
        })
    }

    /// Insert a new event in `start` state. Returns the row id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_event(
        &self,
        event_type: &str,
        severity: &str,
        pi: &str,
        station_ps: Option<&str>,
        frequency: Option<&str>,
        data: &Value,
        started_at: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (type, severity, state, pi, station_ps, frequency, data, started_at)
             VALUES (?1, ?2, 'start', ?3, ?4, ?5, ?6, ?7)",
            params![
                event_type,
                severity,
                pi,
                station_ps,
                frequency,
                data.to_string(),
                started_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one RadioText snapshot. Idempotent: feeding the same text
    /// twice keeps a single entry. The list is capped at [`MAX_RADIOTEXT`].
    pub fn append_radiotext(&self, id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row("SELECT radiotext FROM events WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(current) = current else {
            return Ok(());
        };
        let mut list: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
        if list.iter().any(|t| t == text) || list.len() >= MAX_RADIOTEXT {
            return Ok(());
        }
        list.push(text.to_string());
        conn.execute(
            "UPDATE events SET radiotext = ?1 WHERE id = ?2",
            params![serde_json::to_string(&list).unwrap_or_else(|_| "[]".into()), id],
        )?;
        Ok(())
    }

    /// Close the lifecycle of an event. Duration is derived from the stored
    /// `started_at`.
    pub fn end_event(&self, id: i64, ended_at: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let started: Option<Option<String>> = conn
            .query_row("SELECT started_at FROM events WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .optional()?;
        let duration = started
            .flatten()
            .and_then(|s| duration_between(&s, ended_at));
        conn.execute(
            "UPDATE events SET state = 'end', ended_at = ?1, duration_sec = ?2 WHERE id = ?3",
            params![ended_at, duration, id],
        )?;
        Ok(())
    }

    pub fn update_audio(&self, id: i64, audio_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET audio_path = ?1 WHERE id = ?2",
            params![audio_path, id],
        )?;
        Ok(())
    }

    /// Record the transcription result. `done` moves the row to
    /// `transcribed`, `error` to `transcription_failed`; other statuses
    /// leave the lifecycle state alone.
    pub fn update_transcription(
        &self,
        id: i64,
        text: Option<&str>,
        status: &str,
        duration_sec: Option<f64>,
    ) -> Result<()> {
        let state = match status {
            "done" => Some("transcribed"),
            "error" => Some("transcription_failed"),
            _ => None,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET transcription = ?1, transcription_status = ?2,
             transcription_duration_sec = ?3 WHERE id = ?4",
            params![text, status, duration_sec, id],
        )?;
        if let Some(state) = state {
            // Lifecycle state only advances once the event itself has ended.
            conn.execute(
                "UPDATE events SET state = ?1 WHERE id = ?2 AND state != 'start'",
                params![state, id],
            )?;
        }
        Ok(())
    }

    pub fn update_transcription_status(&self, id: i64, status: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET transcription_status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(())
    }

    /// Events still in progress.
    pub fn active_events(&self) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE state = 'start' AND ended_at IS NULL
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Filtered, paginated query. Returns `(rows, total)`.
    pub fn events(&self, filter: &EventFilter) -> Result<(Vec<EventRow>, i64)> {
        let mut where_parts: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(types) = &filter.event_type {
            let types: Vec<&str> = types.split(',').map(|t| t.trim()).collect();
            let placeholders = vec!["?"; types.len()].join(",");
            where_parts.push(format!("type IN ({placeholders})"));
            for t in types {
                args.push(Box::new(t.to_string()));
            }
        }
        if let Some(since) = &filter.since {
            where_parts.push("created_at > ?".to_string());
            args.push(Box::new(since.clone()));
        }
        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };

        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM events{where_clause}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |r| r.get(0),
        )?;

        let limit = filter.limit.clamp(1, 200) as i64;
        args.push(Box::new(limit));
        args.push(Box::new(filter.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM events{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_event,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((rows, total))
    }

    pub fn get_event(&self, id: i64) -> Result<Option<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row("SELECT * FROM events WHERE id = ?1", [id], row_to_event)
            .optional()?;
        Ok(row)
    }

    /// Mark leftover active events from a previous run as ended.
    ///
    /// Pure function of database state; safe to run any number of times.
    pub fn close_stale_active_on_startup(&self) -> Result<usize> {
        let now = now_ts();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE events SET state = 'end', ended_at = ?1, transcription_status = 'none'
             WHERE state = 'start' AND ended_at IS NULL",
            params![now],
        )?;
        if n > 0 {
            info!("closed {n} stale active events from a previous run");
        }
        Ok(n)
    }

    /// Delete events that ended before the retention window, together with
    /// their audio files, then sweep orphan audio files one day older.
    pub fn purge_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(days))
            .format(TS_FORMAT)
            .to_string();

        let audio_paths: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT audio_path FROM events
                 WHERE ended_at IS NOT NULL AND ended_at < ?1 AND audio_path IS NOT NULL",
            )?;
            let paths = stmt
                .query_map([&cutoff], |r| r.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            conn.execute(
                "DELETE FROM events WHERE ended_at IS NOT NULL AND ended_at < ?1",
                [&cutoff],
            )?;
            paths
        };

        let deleted = audio_paths.len();
        for rel in &audio_paths {
            let base = rel.rsplit_once('.').map(|(b, _)| b).unwrap_or(rel);
            for ext in ["ogg", "wav"] {
                let path = self.audio_dir.join(format!("{base}.{ext}"));
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("retention: could not remove {}: {e}", path.display());
                    }
                }
            }
        }

        self.sweep_orphan_audio(days + 1)?;
        Ok(deleted)
    }

    /// Remove audio files older than `days` that no event row points at.
    fn sweep_orphan_audio(&self, days: i64) -> Result<usize> {
        let Ok(entries) = std::fs::read_dir(&self.audio_dir) else {
            return Ok(0);
        };
        let max_age = std::time::Duration::from_secs(days.max(0) as u64 * 86_400);
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_audio = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("wav") | Some("ogg")
            );
            if !is_audio {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok())
            else {
                continue;
            };
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .map(|age| age > max_age)
                .unwrap_or(false);
            if !old_enough {
                continue;
            }
            let has_row: bool = {
                let conn = self.conn.lock().unwrap();
                conn.query_row(
                    "SELECT 1 FROM events WHERE id = ?1 AND audio_path IS NOT NULL",
                    [id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some()
            };
            if !has_row {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("retention: swept {removed} orphan audio files");
        }
        Ok(removed)
    }

    /// Clear all events. Returns the number of deleted rows.
    pub fn delete_all(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM events", [])?;
        info!("deleted all {n} events");
        Ok(n)
    }
}

fn migrate_add_column(conn: &Connection, name: &str, kind: &str) -> Result<()> {
    match conn.execute(&format!("ALTER TABLE events ADD COLUMN {name} {kind}"), []) {
        Ok(_) => {
            info!("migrated: added column '{name}' to events table");
            Ok(())
        }
        Err(e) if e.to_string().to_lowercase().contains("duplicate column") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let radiotext: String = row.get("radiotext")?;
    let data: String = row.get("data")?;
    let audio_path: Option<String> = row.get("audio_path")?;
    Ok(EventRow {
        id: row.get("id")?,
        event_type: row.get("type")?,
        severity: row.get("severity")?,
        state: row.get("state")?,
        pi: row.get("pi")?,
        station_ps: row.get("station_ps")?,
        frequency: row.get("frequency")?,
        radiotext: serde_json::from_str(&radiotext).unwrap_or_default(),
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_sec: row.get("duration_sec")?,
        created_at: row.get("created_at")?,
        audio_url: audio_path.as_ref().map(|p| format!("/api/audio/{p}")),
        audio_path,
        transcription: row.get("transcription")?,
        transcription_status: row.get("transcription_status")?,
        transcription_duration_sec: row.get("transcription_duration_sec")?,
    })
}

/// Whole seconds between two store-format timestamps, clamped at zero.
pub fn duration_between(start: &str, end: &str) -> Option<i64> {
    let s = chrono::NaiveDateTime::parse_from_str(&start[..19.min(start.len())], TS_FORMAT).ok()?;
    let e = chrono::NaiveDateTime::parse_from_str(&end[..19.min(end.len())], TS_FORMAT).ok()?;
    Some((e - s).num_seconds().max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap();
        (dir, store)
    }

    #[test]
    fn lifecycle_start_to_end() {
        let (_dir, store) = store();
        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                Some("P4 Sthlm"),
                Some("103.5M"),
                &serde_json::json!({}),
                "2026-08-01T10:00:00",
            )
            .unwrap();
        store.end_event(id, "2026-08-01T10:00:30").unwrap();
        let ev = store.get_event(id).unwrap().unwrap();
        assert_eq!(ev.state, "end");
        assert_eq!(ev.duration_sec, Some(30));
        assert_eq!(ev.ended_at.as_deref(), Some("2026-08-01T10:00:30"));
    }

    #[test]
    fn radiotext_append_is_idempotent() {
        let (_dir, store) = store();
        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                None,
                None,
                &serde_json::json!({}),
                &now_ts(),
            )
            .unwrap();
        store.append_radiotext(id, "Kö på E4 norrut").unwrap();
        store.append_radiotext(id, "Kö på E4 norrut").unwrap();
        store.append_radiotext(id, "Olycka vid Norrtull").unwrap();
        let ev = store.get_event(id).unwrap().unwrap();
        assert_eq!(ev.radiotext.len(), 2);
    }

    #[test]
    fn radiotext_is_capped() {
        let (_dir, store) = store();
        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                None,
                None,
                &serde_json::json!({}),
                &now_ts(),
            )
            .unwrap();
        for i in 0..12 {
            store.append_radiotext(id, &format!("RT {i}")).unwrap();
        }
        let ev = store.get_event(id).unwrap().unwrap();
        assert_eq!(ev.radiotext.len(), MAX_RADIOTEXT);
    }

    #[test]
    fn startup_closes_stale_active_events() {
        let (_dir, store) = store();
        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                None,
                None,
                &serde_json::json!({}),
                &now_ts(),
            )
            .unwrap();
        assert_eq!(store.active_events().unwrap().len(), 1);
        let closed = store.close_stale_active_on_startup().unwrap();
        assert_eq!(closed, 1);
        assert!(store.active_events().unwrap().is_empty());
        let ev = store.get_event(id).unwrap().unwrap();
        assert_eq!(ev.state, "end");
        assert!(ev.ended_at.is_some());
        assert_eq!(ev.transcription_status.as_deref(), Some("none"));
        // Running it again is harmless.
        assert_eq!(store.close_stale_active_on_startup().unwrap(), 0);
    }

    #[test]
    fn transcription_done_moves_state() {
        let (_dir, store) = store();
        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                None,
                None,
                &serde_json::json!({}),
                &now_ts(),
            )
            .unwrap();
        store.end_event(id, &now_ts()).unwrap();
        store
            .update_transcription(id, Some("Trafikmeddelande"), "done", Some(3.2))
            .unwrap();
        let ev = store.get_event(id).unwrap().unwrap();
        assert_eq!(ev.state, "transcribed");
        assert_eq!(ev.transcription.as_deref(), Some("Trafikmeddelande"));
        assert_eq!(ev.transcription_status.as_deref(), Some("done"));
    }

    #[test]
    fn filter_by_type_and_pagination() {
        let (_dir, store) = store();
        for i in 0..5 {
            let ty = if i % 2 == 0 { "traffic" } else { "emergency" };
            store
                .insert_event(ty, "warning", "0x9E04", None, None, &serde_json::json!({}), &now_ts())
                .unwrap();
        }
        let (rows, total) = store
            .events(&EventFilter {
                event_type: Some("traffic".into()),
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.event_type == "traffic"));
    }

    #[test]
    fn purge_removes_old_rows_and_audio() {
        let (dir, store) = store();
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();

        let id = store
            .insert_event(
                "traffic",
                "warning",
                "0x9E04",
                None,
                None,
                &serde_json::json!({}),
                "2020-01-01T00:00:00",
            )
            .unwrap();
        store.end_event(id, "2020-01-01T00:01:00").unwrap();
        store.update_audio(id, &format!("{id}.ogg")).unwrap();
        std::fs::write(audio_dir.join(format!("{id}.ogg")), b"ogg").unwrap();
        std::fs::write(audio_dir.join(format!("{id}.wav")), b"wav").unwrap();

        let deleted = store.purge_older_than(30).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_event(id).unwrap().is_none());
        assert!(!audio_dir.join(format!("{id}.ogg")).exists());
        assert!(!audio_dir.join(format!("{id}.wav")).exists());
    }

    #[test]
    fn duration_between_clamps_negative() {
        assert_eq!(
            duration_between("2026-08-01T10:00:30", "2026-08-01T10:00:00"),
            Some(0)
        );
        assert_eq!(duration_between("bogus", "2026-08-01T10:00:00"), None);
    }
}

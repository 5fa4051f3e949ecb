use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tracing::{error, info};

use super::state::AppState;
use super::ws::serve_console;
use crate::store::{now_ts, EventFilter};

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// GET /: the dashboard page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub since: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /api/events: query events with optional filters.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let filter = EventFilter {
        event_type: query.event_type,
        since: query.since,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    match state.store.events(&filter) {
        Ok((events, total)) => Json(json!({ "events": events, "total": total })).into_response(),
        Err(e) => {
            error!("event query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/events/active: events still in progress.
pub async fn active_events(State(state): State<AppState>) -> Response {
    match state.store.active_events() {
        Ok(events) => Json(json!({ "events": events })).into_response(),
        Err(e) => {
            error!("active event query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/status: supervisor and station health.
pub async fn status(State(state): State<AppState>) -> Response {
    let stations: Vec<_> = state
        .stations
        .iter()
        .map(|s| s.lock().unwrap().snapshot())
        .collect();
    let groups_total: u64 = stations.iter().map(|s| s.groups_total).sum();
    let groups_per_sec: f64 = stations.iter().map(|s| s.groups_per_sec).sum();

    let mut pipeline = serde_json::to_value(state.status.snapshot()).unwrap_or(json!({}));
    let drops = state.channel_stats.total_drops();
    if drops > 0 {
        pipeline["drops"] = json!(drops);
        pipeline["drops_per_station"] = json!(state.channel_stats.drops());
    }

    let mut body = json!({
        "uptime_sec": state.started.elapsed().as_secs(),
        "groups_total": groups_total,
        "groups_per_sec": (groups_per_sec * 10.0).round() / 10.0,
        "decode_errors": state.decode_errors.load(Ordering::Relaxed),
        "mqtt_connected": state.mqtt.is_connected(),
        "pipeline": pipeline,
        "version": state.version,
        "timestamp": now_ts(),
    });
    if state.multi_station {
        body["stations"] = json!(stations);
    } else {
        body["frequency"] = json!(state.frequency);
        body["station"] = stations
            .first()
            .map(|s| json!(s))
            .unwrap_or(serde_json::Value::Null);
    }
    Json(body).into_response()
}

/// DELETE /api/events: clear all events and their audio.
pub async fn delete_events(State(state): State<AppState>) -> Response {
    let deleted = match state.store.delete_all() {
        Ok(n) => n,
        Err(e) => {
            error!("delete all failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };
    let mut removed_files = 0usize;
    if let Ok(mut entries) = tokio::fs::read_dir(&state.audio_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_audio = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("wav") | Some("ogg")
            );
            if is_audio && tokio::fs::remove_file(&path).await.is_ok() {
                removed_files += 1;
            }
        }
    }
    info!("cleared {deleted} events and {removed_files} audio files");
    Json(json!({ "deleted": deleted, "audio_files_removed": removed_files })).into_response()
}

/// GET /api/audio/:filename: serve a recorded clip.
pub async fn audio(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    // No path components: audio files live flat under the audio dir.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    }
    let path = state.audio_dir.join(&filename);
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("opus") => "audio/opus",
        _ => "application/octet-stream",
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "audio file not found").into_response(),
    }
}

/// WS /ws/console: live decoded message stream.
pub async fn ws_console(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let bus = state.console.clone();
    ws.on_upgrade(move |socket| serve_console(socket, bus))
}

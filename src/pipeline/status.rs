//! Thread-safe pipeline health, exposed via `/api/status` and the
//! periodic MQTT status message.

use std::sync::Mutex;

use serde::Serialize;

use crate::store::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub restarts: u32,
}

#[derive(Debug)]
struct Inner {
    state: &'static str,
    error: Option<String>,
    started_at: Option<String>,
    restarts: u32,
}

/// Pipeline state: `not_started | starting | running | error | stopped`.
#[derive(Debug)]
pub struct PipelineStatus {
    inner: Mutex<Inner>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: "not_started",
                error: None,
                started_at: None,
                restarts: 0,
            }),
        }
    }
}

impl PipelineStatus {
    pub fn set_starting(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = "starting";
        inner.error = None;
    }

    pub fn set_running(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = "running";
        inner.error = None;
        inner.started_at = Some(now_ts());
    }

    pub fn set_stopped(&self, message: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = "stopped";
        inner.error = message.map(|m| m.to_string());
    }

    pub fn set_error(&self, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = "error";
        inner.error = Some(message.to_string());
        inner.restarts += 1;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap();
        StatusSnapshot {
            state: inner.state.to_string(),
            error: inner.error.clone(),
            started_at: inner.started_at.clone(),
            restarts: inner.restarts,
        }
    }
}

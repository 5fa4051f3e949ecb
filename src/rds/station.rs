//! Live per-station state, mutated by the rules engine and read by the
//! web facade through snapshot copies.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::rds::group::DecodedGroup;

/// Window for the exponentially weighted groups-per-second estimate.
const RATE_WINDOW_SEC: f64 = 10.0;

/// Exponentially weighted moving average of group arrival rate.
#[derive(Debug, Default)]
struct Ewma {
    rate: f64,
    last: Option<Instant>,
}

impl Ewma {
    fn tick(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt = now.duration_since(last).as_secs_f64().max(1e-3);
            let inst = 1.0 / dt;
            let alpha = 1.0 - (-dt / RATE_WINDOW_SEC).exp();
            self.rate += alpha * (inst - self.rate);
        }
        self.last = Some(now);
    }
}

/// Mutable state of one monitored FM frequency.
///
/// Owned by the station's pipeline task; everyone else sees
/// [`StationSnapshot`] copies.
#[derive(Debug)]
pub struct Station {
    pub frequency_label: String,
    pub frequency_hz: i64,
    pub pi: Option<String>,
    pub ps: Option<String>,
    pub long_ps: Option<String>,
    pub prog_type: Option<String>,
    pub tp: Option<bool>,
    pub ta: Option<bool>,
    pub is_music: Option<bool>,
    pub country: Option<String>,
    pub radiotext: Option<String>,
    pub now_artist: Option<String>,
    pub now_title: Option<String>,
    pub groups_total: u64,
    rate: Ewma,
    started: Instant,
    ps_logged: bool,
    pi_logged: bool,
}

/// Read-only copy of the scalar station fields.
#[derive(Debug, Clone, Serialize)]
pub struct StationSnapshot {
    pub frequency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_ps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prog_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radiotext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_title: Option<String>,
    pub groups_per_sec: f64,
    pub groups_total: u64,
    pub uptime_sec: u64,
}

impl Station {
    pub fn new(frequency_label: String, frequency_hz: i64) -> Self {
        Self {
            frequency_label,
            frequency_hz,
            pi: None,
            ps: None,
            long_ps: None,
            prog_type: None,
            tp: None,
            ta: None,
            is_music: None,
            country: None,
            radiotext: None,
            now_artist: None,
            now_title: None,
            groups_total: 0,
            rate: Ewma::default(),
            started: Instant::now(),
            ps_logged: false,
            pi_logged: false,
        }
    }

    /// Fold one decoded group into the station state.
    pub fn update(&mut self, g: &DecodedGroup) {
        self.groups_total += 1;
        self.rate.tick(Instant::now());

        if !self.pi_logged {
            self.pi_logged = true;
            info!(
                "new PI code detected: {} on {}",
                g.pi, self.frequency_label
            );
        }
        self.pi = Some(g.pi.clone());

        if let Some(ps) = &g.ps {
            self.ps = Some(ps.trim().to_string());
        } else if let Some(partial) = &g.partial_ps {
            if self.ps.is_none() {
                self.ps = Some(partial.trim().to_string());
            }
        }
        if let Some(lps) = &g.long_ps {
            self.long_ps = Some(lps.trim().to_string());
        }
        if let Some(pty) = &g.prog_type {
            self.prog_type = Some(pty.clone());
        }
        if let Some(tp) = g.tp {
            self.tp = Some(tp);
        }
        if let Some(ta) = g.ta {
            self.ta = Some(ta);
        }
        if let Some(m) = g.is_music {
            self.is_music = Some(m);
        }
        if let Some(c) = &g.country {
            self.country = Some(c.clone());
        }
        if let Some(rt) = &g.radiotext {
            self.radiotext = Some(rt.trim().to_string());
        }
        if let Some(rtp) = &g.radiotext_plus {
            for tag in &rtp.tags {
                match (tag.content_type.as_deref(), &tag.data) {
                    (Some("item.title"), Some(data)) => self.now_title = Some(data.clone()),
                    (Some("item.artist"), Some(data)) => self.now_artist = Some(data.clone()),
                    _ => {}
                }
            }
        }

        if !self.ps_logged {
            if let Some(ps) = &self.ps {
                self.ps_logged = true;
                info!(
                    "locked on to: {} (PI {}) on {}",
                    ps, g.pi, self.frequency_label
                );
            }
        }
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            frequency: self.frequency_label.clone(),
            pi: self.pi.clone(),
            ps: self.ps.clone(),
            long_ps: self.long_ps.clone(),
            prog_type: self.prog_type.clone(),
            tp: self.tp,
            ta: self.ta,
            country: self.country.clone(),
            radiotext: self.radiotext.clone(),
            now_artist: self.now_artist.clone(),
            now_title: self.now_title.clone(),
            groups_per_sec: (self.rate.rate * 10.0).round() / 10.0,
            groups_total: self.groups_total,
            uptime_sec: self.started.elapsed().as_secs(),
        }
    }
}

/// Tracks the last published value per key to suppress duplicates.
///
/// Rule edges (TA, PTY, EON) and per-field MQTT topics only fire when a
/// value actually changes.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    state: HashMap<String, Value>,
}

impl ChangeTracker {
    /// Record `value` under `key`; true if it differs from the last one.
    pub fn changed(&mut self, key: &str, value: Value) -> bool {
        if self.state.get(key) == Some(&value) {
            return false;
        }
        self.state.insert(key.to_string(), value);
        true
    }

    /// True if any value has been recorded for this key.
    pub fn is_known(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_edges_only() {
        let mut t = ChangeTracker::default();
        assert!(t.changed("traffic/ta", Value::Bool(true)));
        assert!(!t.changed("traffic/ta", Value::Bool(true)));
        assert!(t.changed("traffic/ta", Value::Bool(false)));
        assert!(t.is_known("traffic/ta"));
        assert!(!t.is_known("traffic/tp"));
    }

    #[test]
    fn partial_ps_never_overrides_full_ps() {
        let mut st = Station::new("103.5M".into(), 103_500_000);
        let full = DecodedGroup::parse(r#"{"pi":"0x9E04","group":"0A","ps":"P4 Sthlm"}"#)
            .unwrap()
            .unwrap();
        let partial =
            DecodedGroup::parse(r#"{"pi":"0x9E04","group":"0A","partial_ps":"P4 S   "}"#)
                .unwrap()
                .unwrap();
        st.update(&full);
        st.update(&partial);
        assert_eq!(st.ps.as_deref(), Some("P4 Sthlm"));
        assert_eq!(st.groups_total, 2);
    }
}

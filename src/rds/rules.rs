//! Rules engine: decoded groups in, event lifecycles out.
//!
//! One engine instance per station, owned by that station's pipeline task.
//! Rules fire on value *changes* (tracked per key), in a fixed order per
//! group: TA, TP, RadioText, PTY, EON. A TA change and a PTY alarm in the
//! same group both take effect, with the emergency opening after the
//! traffic transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::audio::Recorder;
use crate::http::ws::{console_send, ConsoleBus};
use crate::mqtt::alerts::AlertPublisher;
use crate::mqtt::client::MqttPublisher;
use crate::mqtt::messages::{EndAlert, StationRef};
use crate::rds::group::{DecodedGroup, GroupType};
use crate::rds::station::{ChangeTracker, Station};
use crate::store::{duration_between, now_ts, EventStore, MAX_RADIOTEXT};

/// PTY labels that mark an emergency broadcast.
const ALARM_PTY: [&str; 2] = ["Alarm", "Alarm - Loss of radio"];

/// Synthesized end for EON traffic events that never see a false flip.
const EON_TIMEOUT: Duration = Duration::from_secs(120);

/// Consecutive groups with one PI before events may open again after a
/// PI glitch.
const PI_STABLE_GROUPS: u32 = 5;

/// Shared collaborators handed to every engine.
pub struct EngineDeps {
    pub store: Arc<EventStore>,
    pub recorder: Arc<Recorder>,
    pub alerts: Arc<AlertPublisher>,
    pub mqtt: Arc<MqttPublisher>,
    pub console: ConsoleBus,
    pub record_types: Vec<String>,
    pub publish_all: bool,
    pub publish_raw: bool,
}

struct ActiveEvent {
    event_id: i64,
    since: String,
    radiotext: Vec<String>,
    recording: bool,
    /// Recording already finalized by the duration cap.
    capped: bool,
}

struct EonActive {
    event_id: i64,
    since: String,
    opened_at: Instant,
}

/// Guards against PI glitches: a mid-event PI change ends the event and
/// blocks new ones until the PI has been stable for a few groups.
#[derive(Default)]
struct PiGuard {
    current: Option<String>,
    stable: u32,
    blocked: bool,
}

impl PiGuard {
    /// Returns true when the PI changed against the previous group.
    fn observe(&mut self, pi: &str) -> bool {
        match self.current.as_deref() {
            Some(current) if current == pi => {
                self.stable += 1;
                if self.blocked && self.stable >= PI_STABLE_GROUPS {
                    self.blocked = false;
                }
                false
            }
            Some(_) => {
                self.current = Some(pi.to_string());
                self.stable = 1;
                self.blocked = true;
                true
            }
            None => {
                self.current = Some(pi.to_string());
                self.stable = 1;
                false
            }
        }
    }
}

pub struct RulesEngine {
    station: Arc<Mutex<Station>>,
    tracker: ChangeTracker,
    active_traffic: Option<ActiveEvent>,
    active_emergency: Option<ActiveEvent>,
    active_eon: HashMap<String, EonActive>,
    pi_guard: PiGuard,
    last_ts: String,
    deps: EngineDeps,
}

impl RulesEngine {
    pub fn new(station: Arc<Mutex<Station>>, deps: EngineDeps) -> Self {
        Self {
            station,
            tracker: ChangeTracker::default(),
            active_traffic: None,
            active_emergency: None,
            active_eon: HashMap::new(),
            pi_guard: PiGuard::default(),
            last_ts: now_ts(),
            deps,
        }
    }

    /// Process one decoded group.
    pub fn on_group(&mut self, g: &DecodedGroup) {
        let ts = g.timestamp.clone().unwrap_or_else(now_ts);

        let prev_pi = self.pi_guard.current.clone();
        if self.pi_guard.observe(&g.pi) {
            warn!("PI changed mid-stream to {}, closing open events", g.pi);
            let last = self.last_ts.clone();
            let old_pi = prev_pi.unwrap_or_else(|| g.pi.clone());
            self.end_traffic(&last, &old_pi);
            self.end_emergency(&last, &old_pi);
        }

        {
            let mut station = self.station.lock().unwrap();
            station.update(g);
        }

        // Raw group to the live console.
        let topic_hint = if g.group_label.is_empty() {
            "unknown".to_string()
        } else {
            g.group_label.to_lowercase()
        };
        console_send(
            &self.deps.console,
            &format!("{}/{}", g.pi, topic_hint),
            g.raw.clone(),
        );

        // Rule 1-2: traffic announcement flag.
        if let Some(ta) = g.ta {
            if self.tracker.changed("traffic/ta", Value::Bool(ta)) {
                self.on_ta_change(g, ta, &ts);
                self.deps.mqtt.publish(
                    &format!("{}/traffic/ta", g.pi),
                    &json!({
                        "active": ta,
                        "since": ts,
                        "prog_type": g.prog_type.clone().unwrap_or_default(),
                    }),
                    1,
                    self.deps.mqtt.retain_state,
                );
            }
        }

        if let Some(tp) = g.tp {
            if self.tracker.changed("traffic/tp", Value::Bool(tp)) {
                self.deps.mqtt.publish(
                    &format!("{}/traffic/tp", g.pi),
                    &json!({ "tp": tp, "timestamp": ts }),
                    1,
                    self.deps.mqtt.retain_state,
                );
            }
        }

        // Rule 3: RadioText during an open traffic event. Partial text is
        // published for live display but never folded into events.
        if g.group == GroupType::RadioText {
            let full = g.radiotext.as_deref();
            let rt = full.or(g.partial_radiotext.as_deref());
            if let Some(rt) = rt {
                let trimmed = rt.trim().to_string();
                if self
                    .tracker
                    .changed("programme/rt", Value::String(trimmed.clone()))
                {
                    self.deps.mqtt.publish(
                        &format!("{}/programme/rt", g.pi),
                        &json!({
                            "radiotext": trimmed,
                            "partial": full.is_none(),
                            "timestamp": ts,
                        }),
                        1,
                        self.deps.mqtt.retain_state,
                    );
                    if full.is_some() {
                        self.on_radiotext(g, &trimmed, &ts);
                    }
                }
            }
        }

        // Rule 4: programme type alarm.
        if let Some(pty) = g.prog_type.clone() {
            if self
                .tracker
                .changed("station/pty", Value::String(pty.clone()))
            {
                self.deps.mqtt.publish(
                    &format!("{}/station/pty", g.pi),
                    &json!({ "prog_type": pty, "timestamp": ts }),
                    1,
                    self.deps.mqtt.retain_state,
                );
                if ALARM_PTY.contains(&pty.as_str()) {
                    self.on_alarm_pty(g, &pty, &ts);
                } else if self.active_emergency.is_some() {
                    info!("emergency ended on {} (PTY -> {pty})", g.pi);
                    self.end_emergency(&ts, &g.pi);
                }
            }
        }

        // Rule 5: EON linked-station traffic.
        if g.group == GroupType::Eon {
            self.on_eon(g, &ts);
        }

        if self.deps.publish_all {
            self.publish_extended(g, &ts);
        }
        if self.deps.publish_raw {
            self.deps
                .mqtt
                .publish(&format!("{}/system/raw", g.pi), &g.raw, 0, false);
        }

        self.expire_eon(&ts);
        self.last_ts = ts;
    }

    /// The recorder hit its duration cap for `event_id`.
    ///
    /// A capped emergency ends outright; a capped traffic event stays open
    /// (the TA flag still rules its lifecycle) but remembers that its
    /// audio was already finalized.
    pub fn on_recording_cap(&mut self, event_id: i64) {
        let ts = now_ts();
        if let Some(em) = self.active_emergency.as_mut() {
            if em.event_id == event_id {
                em.capped = true;
                let pi = self.pi_guard.current.clone().unwrap_or_default();
                info!("emergency event {event_id} ended by recording cap");
                self.end_emergency(&ts, &pi);
                return;
            }
        }
        if let Some(tr) = self.active_traffic.as_mut() {
            if tr.event_id == event_id {
                tr.capped = true;
            }
        }
    }

    /// Periodic housekeeping (EON expiry) when no groups arrive.
    pub fn tick(&mut self) {
        let ts = now_ts();
        self.expire_eon(&ts);
    }

    fn station_ref(&self, pi: &str) -> StationRef {
        let station = self.station.lock().unwrap();
        StationRef {
            pi: pi.to_string(),
            ps: station.ps.clone(),
            frequency: station.frequency_label.clone(),
        }
    }

    fn want_recording(&self, event_type: &str) -> bool {
        self.deps.record_types.iter().any(|t| t == event_type)
    }

    fn on_ta_change(&mut self, g: &DecodedGroup, ta: bool, ts: &str) {
        if ta {
            if self.pi_guard.blocked {
                warn!("TA raised on {} while PI is unstable, ignoring", g.pi);
                return;
            }
            if self.active_traffic.is_some() {
                return;
            }
            let ctx = self.station_ref(&g.pi);
            let data = json!({
                "prog_type": g.prog_type.clone().unwrap_or_default(),
            });
            let event_id = match self.deps.store.insert_event(
                "traffic",
                "warning",
                &g.pi,
                ctx.ps.as_deref(),
                Some(&ctx.frequency),
                &data,
                ts,
            ) {
                Ok(id) => id,
                Err(e) => {
                    error!("cannot insert traffic event: {e}");
                    return;
                }
            };

            let recording = self.start_recording("traffic", event_id);
            self.active_traffic = Some(ActiveEvent {
                event_id,
                since: ts.to_string(),
                radiotext: Vec::new(),
                recording,
                capped: false,
            });

            info!("EVENT traffic start on {} (event #{event_id})", g.pi);
            self.deps.alerts.publish_lifecycle(json!({
                "type": "traffic",
                "state": "start",
                "event_id": event_id,
                "station": serde_json::to_value(&ctx).unwrap_or(Value::Null),
                "frequency": ctx.frequency,
                "prog_type": g.prog_type.clone().unwrap_or_default(),
                "timestamp": ts,
            }));
        } else {
            self.end_traffic(ts, &g.pi);
        }
    }

    fn on_radiotext(&mut self, g: &DecodedGroup, rt: &str, ts: &str) {
        let Some(active) = self.active_traffic.as_mut() else {
            return;
        };
        if active.radiotext.iter().any(|t| t == rt) || active.radiotext.len() >= MAX_RADIOTEXT {
            return;
        }
        active.radiotext.push(rt.to_string());
        let event_id = active.event_id;
        let collected = active.radiotext.clone();
        let since = active.since.clone();
        if let Err(e) = self.deps.store.append_radiotext(event_id, rt) {
            error!("cannot append radiotext to event {event_id}: {e}");
        }

        let ctx = self.station_ref(&g.pi);
        let head: String = rt.chars().take(80).collect();
        info!("EVENT traffic update on {}: {head}", g.pi);
        self.deps.alerts.publish_lifecycle(json!({
            "type": "traffic",
            "state": "update",
            "event_id": event_id,
            "station": serde_json::to_value(&ctx).unwrap_or(Value::Null),
            "frequency": ctx.frequency,
            "radiotext": rt,
            "all_radiotext": collected,
            "started": since,
            "timestamp": ts,
        }));
    }

    fn end_traffic(&mut self, ts: &str, pi: &str) {
        let Some(active) = self.active_traffic.take() else {
            return;
        };
        // A capped recording was already finalized; the recorder may since
        // have been claimed by another event.
        let has_audio = if active.capped {
            true
        } else {
            active.recording && self.deps.recorder.stop()
        };
        self.finish_event(active, "traffic", has_audio, ts, pi);
    }

    fn on_alarm_pty(&mut self, g: &DecodedGroup, pty: &str, ts: &str) {
        // An alarm during a traffic announcement takes over: the traffic
        // event is closed first, then the emergency records.
        if self.active_traffic.is_some() {
            info!("PTY alarm during traffic announcement on {}, ending traffic", g.pi);
            self.end_traffic(ts, &g.pi);
        }
        if self.pi_guard.blocked {
            warn!("PTY alarm on {} while PI is unstable, ignoring", g.pi);
            return;
        }
        if self.active_emergency.is_some() {
            return;
        }

        let ctx = self.station_ref(&g.pi);
        let data = json!({ "prog_type": pty });
        let event_id = match self.deps.store.insert_event(
            "emergency",
            "critical",
            &g.pi,
            ctx.ps.as_deref(),
            Some(&ctx.frequency),
            &data,
            ts,
        ) {
            Ok(id) => id,
            Err(e) => {
                error!("cannot insert emergency event: {e}");
                return;
            }
        };

        let recording = self.start_recording("emergency", event_id);
        self.active_emergency = Some(ActiveEvent {
            event_id,
            since: ts.to_string(),
            radiotext: Vec::new(),
            recording,
            capped: false,
        });

        warn!("EVENT emergency PTY alarm on {}: {pty}", g.pi);
        self.deps.alerts.publish_lifecycle(json!({
            "type": "emergency",
            "state": "start",
            "event_id": event_id,
            "station": serde_json::to_value(&ctx).unwrap_or(Value::Null),
            "frequency": ctx.frequency,
            "prog_type": pty,
            "timestamp": ts,
        }));
    }

    fn end_emergency(&mut self, ts: &str, pi: &str) {
        let Some(active) = self.active_emergency.take() else {
            return;
        };
        let has_audio = if active.capped {
            true
        } else {
            active.recording && self.deps.recorder.stop()
        };
        self.finish_event(active, "emergency", has_audio, ts, pi);
    }

    /// Shared end path: store update, console broadcast, gated end alert.
    fn finish_event(&mut self, active: ActiveEvent, event_type: &str, has_audio: bool, ts: &str, pi: &str) {
        let event_id = active.event_id;
        let settled_status = if has_audio {
            Some("saving")
        } else if active.recording {
            // A recording was attempted but the clip was discarded.
            Some("none")
        } else {
            None
        };
        if let Some(status) = settled_status {
            if let Err(e) = self.deps.store.update_transcription_status(event_id, status) {
                error!("cannot mark event {event_id} {status}: {e}");
            }
        }
        if let Err(e) = self.deps.store.end_event(event_id, ts) {
            error!("cannot end event {event_id}: {e}");
        }
        let duration = duration_between(&active.since, ts);
        info!(
            "EVENT {event_type} end on {pi} (event #{event_id}, {}s, audio: {has_audio})",
            duration.unwrap_or(0)
        );

        let ctx = self.station_ref(pi);
        console_send(
            &self.deps.console,
            "alert",
            json!({
                "type": event_type,
                "state": "end",
                "event_id": event_id,
                "station": serde_json::to_value(&ctx).unwrap_or(Value::Null),
                "started": active.since,
                "ended": ts,
                "duration_sec": duration,
                "radiotext": active.radiotext,
                "audio_available": has_audio,
                "timestamp": ts,
            }),
        );

        let alert = EndAlert {
            event_type: EndAlert::wire_event_type(event_type),
            state: "end".to_string(),
            event_id,
            station: ctx,
            duration_sec: duration,
            radiotext: active.radiotext,
            transcribed_text: None,
            transcription_status: if has_audio { "saving" } else { "none" }.to_string(),
            audio_available: has_audio,
            timestamp: ts.to_string(),
        };
        self.deps.alerts.hold_end_alert(alert, has_audio);
    }

    fn start_recording(&self, event_type: &str, event_id: i64) -> bool {
        if !self.want_recording(event_type) {
            return false;
        }
        match self.deps.recorder.start(event_id) {
            Ok(()) => {
                if let Err(e) = self
                    .deps
                    .store
                    .update_transcription_status(event_id, "recording")
                {
                    error!("cannot mark event {event_id} recording: {e}");
                }
                true
            }
            Err(e) => {
                // The one-event-per-station invariant should make this
                // unreachable.
                error!("recorder busy, skipping recording for event {event_id}: {e}");
                false
            }
        }
    }

    fn on_eon(&mut self, g: &DecodedGroup, ts: &str) {
        let Some(on) = &g.other_network else {
            return;
        };
        let Some(ta) = on.ta else {
            return;
        };
        let other_pi = on.pi.clone().unwrap_or_else(|| "unknown".to_string());
        if other_pi == g.pi {
            return;
        }

        let key = format!("eon/{other_pi}/ta");
        // The first observation only seeds the tracker; a startup snapshot
        // of a linked station is not a transition.
        let was_known = self.tracker.is_known(&key);
        if !self.tracker.changed(&key, Value::Bool(ta)) {
            return;
        }
        self.deps.mqtt.publish(
            &format!("{}/eon/{other_pi}/ta", g.pi),
            &json!({ "active": ta, "timestamp": ts }),
            1,
            self.deps.mqtt.retain_state,
        );
        if !was_known {
            return;
        }

        if ta {
            if self.pi_guard.blocked || self.active_eon.contains_key(&other_pi) {
                return;
            }
            let ctx = self.station_ref(&g.pi);
            let data = json!({
                "linked_station": {
                    "pi": other_pi,
                    "ps": on.ps.as_deref().unwrap_or("").trim(),
                    "kilohertz": on.kilohertz,
                },
                "ta_active": true,
            });
            let event_id = match self.deps.store.insert_event(
                "eon_traffic",
                "info",
                &g.pi,
                ctx.ps.as_deref(),
                Some(&ctx.frequency),
                &data,
                ts,
            ) {
                Ok(id) => id,
                Err(e) => {
                    error!("cannot insert eon_traffic event: {e}");
                    return;
                }
            };
            info!("EON traffic active on linked {other_pi} via {}", g.pi);
            self.active_eon.insert(
                other_pi.clone(),
                EonActive {
                    event_id,
                    since: ts.to_string(),
                    opened_at: Instant::now(),
                },
            );
            self.deps.alerts.publish_lifecycle(json!({
                "type": "eon_traffic",
                "state": "start",
                "event_id": event_id,
                "station": serde_json::to_value(&ctx).unwrap_or(Value::Null),
                "linked_station": data["linked_station"].clone(),
                "timestamp": ts,
            }));
        } else if let Some(eon) = self.active_eon.remove(&other_pi) {
            info!("EON traffic ended on linked {other_pi} via {}", g.pi);
            self.close_eon(eon, &other_pi, ts);
        }
    }

    fn expire_eon(&mut self, ts: &str) {
        let expired: Vec<String> = self
            .active_eon
            .iter()
            .filter(|(_, e)| e.opened_at.elapsed() >= EON_TIMEOUT)
            .map(|(pi, _)| pi.clone())
            .collect();
        for other_pi in expired {
            if let Some(eon) = self.active_eon.remove(&other_pi) {
                info!("EON traffic on linked {other_pi} expired without end flag");
                self.close_eon(eon, &other_pi, ts);
            }
        }
    }

    fn close_eon(&mut self, eon: EonActive, other_pi: &str, ts: &str) {
        if let Err(e) = self.deps.store.end_event(eon.event_id, ts) {
            error!("cannot end eon event {}: {e}", eon.event_id);
        }
        let pi = self.pi_guard.current.clone().unwrap_or_default();
        let mut ctx = self.station_ref(&pi);
        if ctx.pi.is_empty() {
            ctx.pi = other_pi.to_string();
        }
        let alert = EndAlert {
            event_type: "eon_traffic".to_string(),
            state: "end".to_string(),
            event_id: eon.event_id,
            station: ctx,
            duration_sec: duration_between(&eon.since, ts),
            radiotext: Vec::new(),
            transcribed_text: None,
            transcription_status: "none".to_string(),
            audio_available: false,
            timestamp: ts.to_string(),
        };
        self.deps.alerts.hold_end_alert(alert, false);
    }

    /// Extended per-field topics, "all" publish mode only.
    fn publish_extended(&mut self, g: &DecodedGroup, ts: &str) {
        let pi = &g.pi;
        let retain = self.deps.mqtt.retain_state;

        if let Some(ps) = g.ps.as_deref().or(g.partial_ps.as_deref()) {
            let ps = ps.trim().to_string();
            if self
                .tracker
                .changed("station/ps", Value::String(ps.clone()))
            {
                self.deps.mqtt.publish(
                    &format!("{pi}/station/ps"),
                    &json!({ "ps": ps, "timestamp": ts }),
                    1,
                    retain,
                );
            }
        }
        if self
            .tracker
            .changed("station/pi", Value::String(pi.clone()))
        {
            self.deps.mqtt.publish(
                &format!("{pi}/station/pi"),
                &json!({ "pi": pi, "timestamp": ts }),
                1,
                retain,
            );
        }
        if let Some(m) = g.is_music {
            if self.tracker.changed("programme/music", Value::Bool(m)) {
                self.deps.mqtt.publish(
                    &format!("{pi}/programme/music"),
                    &json!({ "is_music": m, "timestamp": ts }),
                    0,
                    retain,
                );
            }
        }
        if let Some(di) = &g.di {
            if self.tracker.changed("programme/di", di.clone()) {
                self.deps.mqtt.publish(
                    &format!("{pi}/programme/di"),
                    &json!({ "di": di, "timestamp": ts }),
                    0,
                    retain,
                );
            }
        }
        if let Some(af) = &g.alt_frequencies {
            if self.tracker.changed("station/af", af.clone()) {
                self.deps.mqtt.publish(
                    &format!("{pi}/station/af"),
                    &json!({ "frequencies_khz": af, "timestamp": ts }),
                    0,
                    retain,
                );
            }
        }
        if let Some(bler) = g.bler {
            self.deps.mqtt.publish(
                &format!("{pi}/system/bler"),
                &json!({ "bler_pct": bler, "timestamp": ts }),
                0,
                false,
            );
        }

        match g.group {
            GroupType::ProgrammeItem => {
                let mut payload = serde_json::Map::new();
                if let Some(n) = g.prog_item_number {
                    payload.insert("prog_item_number".into(), json!(n));
                }
                if let Some(s) = &g.prog_item_started {
                    payload.insert("prog_item_started".into(), s.clone());
                }
                if !payload.is_empty()
                    && self
                        .tracker
                        .changed("programme/pin", Value::Object(payload.clone()))
                {
                    payload.insert("timestamp".into(), json!(ts));
                    self.deps.mqtt.publish(
                        &format!("{pi}/programme/pin"),
                        &Value::Object(payload),
                        0,
                        false,
                    );
                }
                if let Some(country) = &g.country {
                    if self
                        .tracker
                        .changed("system/country", Value::String(country.clone()))
                    {
                        self.deps.mqtt.publish(
                            &format!("{pi}/system/country"),
                            &json!({
                                "country": country,
                                "language": g.language.clone().unwrap_or_default(),
                                "timestamp": ts,
                            }),
                            0,
                            retain,
                        );
                    }
                }
            }
            GroupType::Oda => {
                if let Some(oda) = &g.open_data_app {
                    if self.tracker.changed("system/oda", oda.clone()) {
                        self.deps.mqtt.publish(
                            &format!("{pi}/system/oda"),
                            &json!({ "open_data_app": oda, "timestamp": ts }),
                            0,
                            retain,
                        );
                    }
                }
            }
            GroupType::Clock => {
                if let Some(ct) = &g.clock_time {
                    self.deps.mqtt.publish(
                        &format!("{pi}/clock"),
                        &json!({ "clock_time": ct, "timestamp": ts }),
                        0,
                        false,
                    );
                }
            }
            GroupType::Eon => {
                if let Some(on) = &g.other_network {
                    let other_pi = on.pi.clone().unwrap_or_else(|| "unknown".into());
                    let payload = json!({
                        "pi": other_pi,
                        "ps": on.ps.as_deref().unwrap_or("").trim(),
                        "tp": on.tp,
                        "ta": on.ta,
                        "kilohertz": on.kilohertz,
                    });
                    if self
                        .tracker
                        .changed(&format!("eon/{other_pi}"), payload.clone())
                    {
                        let mut with_ts = payload;
                        with_ts["timestamp"] = json!(ts);
                        self.deps.mqtt.publish(
                            &format!("{pi}/eon/{other_pi}"),
                            &with_ts,
                            0,
                            retain,
                        );
                    }
                }
            }
            GroupType::LongPs => {
                if let Some(lps) = &g.long_ps {
                    let lps = lps.trim().to_string();
                    if self
                        .tracker
                        .changed("station/long_ps", Value::String(lps.clone()))
                    {
                        self.deps.mqtt.publish(
                            &format!("{pi}/station/long_ps"),
                            &json!({ "long_ps": lps, "timestamp": ts }),
                            1,
                            retain,
                        );
                    }
                }
            }
            _ => {}
        }

        if let Some(rtp) = &g.radiotext_plus {
            let tags: Vec<Value> = rtp
                .tags
                .iter()
                .map(|t| json!({ "content-type": t.content_type, "data": t.data }))
                .collect();
            let payload = json!({ "item_running": rtp.item_running, "tags": tags });
            if self.tracker.changed("programme/rt_plus", payload.clone()) {
                let mut with_ts = payload;
                with_ts["timestamp"] = json!(ts);
                self.deps
                    .mqtt
                    .publish(&format!("{pi}/programme/rt_plus"), &with_ts, 1, false);
            }
        }
        if let Some(ert) = &g.enhanced_radiotext {
            let ert = ert.trim().to_string();
            if self
                .tracker
                .changed("programme/ert", Value::String(ert.clone()))
            {
                self.deps.mqtt.publish(
                    &format!("{pi}/programme/ert"),
                    &json!({ "enhanced_radiotext": ert, "timestamp": ts }),
                    1,
                    false,
                );
            }
        }
    }
}

use std::path::PathBuf;

use crate::error::RdsError;

/// RTL-SDR sample rate for wideband multi-station capture.
///
/// 2 400 000 / 14 = 171 428 Hz per station, within the 1% tolerance the
/// RDS decoder accepts around its nominal 171 kHz input rate.
pub const RTL_SAMPLE_RATE: u32 = 2_400_000;

/// Decimation factor from the wideband rate to the per-station PCM rate.
pub const DECIMATION: u32 = 14;

/// Nominal PCM rate the RDS decoder consumes.
pub const PCM_RATE: u32 = 171_000;

/// Widest usable slice of the 2.4 MS/s capture window.
pub const MAX_SPAN_HZ: i64 = 2_000_000;

/// Speech-to-text backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionEngine {
    Local,
    Remote,
    None,
}

/// Frozen run plan, resolved from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested station frequencies in Hz, in configuration order.
    pub frequencies_hz: Vec<i64>,
    /// Display strings as configured, e.g. "103.5M".
    pub frequency_labels: Vec<String>,
    /// Capture center frequency (multi-station only).
    pub center_freq_hz: i64,
    pub rtl_gain: String,
    pub ppm_correction: String,
    pub rtl_device_index: String,
    pub rtl_device_serial: String,
    pub redsea_show_partial: bool,
    pub redsea_show_raw: bool,

    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: String,
    pub mqtt_qos: u8,
    pub mqtt_retain_state: bool,

    /// "essential" = alerts only; "all" = every decoded field gets a topic.
    pub publish_all: bool,
    pub publish_raw: bool,
    pub status_interval_sec: u64,

    pub web_ui_port: u16,
    pub retention_days: i64,
    pub db_path: PathBuf,
    pub audio_dir: PathBuf,
    pub record_event_types: Vec<String>,
    pub max_recording_sec: u64,
    pub min_recording_sec: u64,

    pub transcription_engine: TranscriptionEngine,
    pub transcription_language: String,
    pub transcription_model: String,
    pub whisper_remote_url: String,
    pub whisper_remote_timeout_sec: u64,
    pub transcribe_queue_max: usize,
    pub alert_hold_timeout_sec: u64,

    /// 0 = restart forever.
    pub restart_max_attempts: u32,
    pub shutdown_grace_sec: u64,
}

impl Config {
    /// True when 2+ stations are configured: activates the wideband IQ path.
    pub fn multi_station(&self) -> bool {
        self.frequencies_hz.len() > 1
    }

    /// Resolve the run plan from the process environment.
    pub fn from_env() -> Result<Self, RdsError> {
        let env = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| RdsError::Config(e.to_string()))?;

        let get = |key: &str, default: &str| -> String {
            env.get_string(key).unwrap_or_else(|_| default.to_string())
        };
        let get_bool = |key: &str, default: bool| -> bool {
            match env.get_string(key) {
                Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
                Err(_) => default,
            }
        };
        let get_u64 = |key: &str, default: u64| -> u64 {
            env.get_string(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        let single = get("fm_frequency", "103.5M");
        let multi_raw = get("fm_frequencies", "");
        let frequency_labels: Vec<String> = if multi_raw.trim().is_empty() {
            vec![single.clone()]
        } else {
            multi_raw
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        };

        if frequency_labels.len() > 4 {
            return Err(RdsError::Config(format!(
                "FM_FREQUENCIES contains {} frequencies, maximum is 4",
                frequency_labels.len()
            )));
        }

        let mut frequencies_hz = Vec::with_capacity(frequency_labels.len());
        for label in &frequency_labels {
            frequencies_hz.push(parse_freq_hz(label)?);
        }

        if frequencies_hz.len() > 1 {
            let min = *frequencies_hz.iter().min().unwrap_or(&0);
            let max = *frequencies_hz.iter().max().unwrap_or(&0);
            let span = max - min;
            if span > MAX_SPAN_HZ {
                return Err(RdsError::Config(format!(
                    "FM_FREQUENCIES span {:.2} MHz exceeds the 2.0 MHz usable bandwidth",
                    span as f64 / 1e6
                )));
            }
        }

        let center_raw = get("rtl_center_freq", "");
        let center_freq_hz = if !center_raw.trim().is_empty() {
            parse_freq_hz(center_raw.trim())?
        } else if frequencies_hz.len() > 1 {
            let min = *frequencies_hz.iter().min().unwrap_or(&0);
            let max = *frequencies_hz.iter().max().unwrap_or(&0);
            min + (max - min) / 2
        } else {
            frequencies_hz[0]
        };

        let engine = match get("transcription_engine", "local").to_lowercase().as_str() {
            "remote" => TranscriptionEngine::Remote,
            "none" => TranscriptionEngine::None,
            _ => TranscriptionEngine::Local,
        };

        let data_dir = PathBuf::from(get("data_dir", "/data"));

        Ok(Self {
            frequencies_hz,
            frequency_labels,
            center_freq_hz,
            rtl_gain: get("rtl_gain", "8"),
            ppm_correction: get("ppm_correction", "0"),
            rtl_device_index: get("rtl_device_index", "0"),
            rtl_device_serial: get("rtl_device_serial", ""),
            redsea_show_partial: get_bool("redsea_show_partial", true),
            redsea_show_raw: get_bool("redsea_show_raw", false),

            mqtt_enabled: get_bool("mqtt_enabled", false),
            mqtt_host: get("mqtt_host", ""),
            mqtt_port: get_u64("mqtt_port", 1883) as u16,
            mqtt_user: get("mqtt_user", ""),
            mqtt_password: get("mqtt_password", ""),
            mqtt_topic_prefix: get("mqtt_topic_prefix", "rds"),
            mqtt_client_id: get("mqtt_client_id", "rds-guard"),
            mqtt_qos: get_u64("mqtt_qos", 1).min(2) as u8,
            mqtt_retain_state: get_bool("mqtt_retain_state", true),

            publish_all: get("publish_mode", "essential").to_lowercase() == "all",
            publish_raw: get_bool("publish_raw", false),
            status_interval_sec: get_u64("status_interval", 30),

            web_ui_port: get_u64("web_ui_port", 8022) as u16,
            retention_days: get_u64("event_retention_days", 30) as i64,
            db_path: data_dir.join("events.db"),
            audio_dir: PathBuf::from(get("audio_dir", "/data/audio")),
            record_event_types: get("record_event_types", "traffic,emergency")
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            max_recording_sec: get_u64("max_recording_sec", 600),
            min_recording_sec: get_u64("min_recording_sec", 2),

            transcription_engine: engine,
            transcription_language: get("transcription_language", "sv"),
            transcription_model: get("transcription_model", "small"),
            whisper_remote_url: get("whisper_remote_url", ""),
            whisper_remote_timeout_sec: get_u64("whisper_remote_timeout", 120),
            transcribe_queue_max: get_u64("transcribe_queue_max", 16) as usize,
            alert_hold_timeout_sec: get_u64("alert_hold_timeout", 120),

            restart_max_attempts: get_u64("restart_max_attempts", 0) as u32,
            shutdown_grace_sec: get_u64("shutdown_grace", 10),
        })
    }
}

/// Convert a frequency string like "103.5M", "97400K" or "103500000" to Hz.
pub fn parse_freq_hz(s: &str) -> Result<i64, RdsError> {
    let s = s.trim().to_uppercase();
    let (num, mult) = if let Some(stripped) = s.strip_suffix('M') {
        (stripped, 1_000_000.0)
    } else if let Some(stripped) = s.strip_suffix('K') {
        (stripped, 1_000.0)
    } else {
        (s.as_str(), 1.0)
    };
    num.parse::<f64>()
        .map(|v| (v * mult) as i64)
        .map_err(|_| RdsError::Config(format!("invalid frequency: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_frequencies() {
        assert_eq!(parse_freq_hz("103.5M").unwrap(), 103_500_000);
        assert_eq!(parse_freq_hz("97400K").unwrap(), 97_400_000);
        assert_eq!(parse_freq_hz("103500000").unwrap(), 103_500_000);
        assert!(parse_freq_hz("fm").is_err());
    }
}

use thiserror::Error;

/// Error taxonomy for the monitor.
///
/// Fatal startup problems (`Config`, `Device`) abort the process with exit
/// code 1. `Pipeline` errors feed the supervisor's restart loop. Everything
/// else is handled locally and surfaced as status, never unwound across
/// threads.
#[derive(Debug, Error)]
pub enum RdsError {
    /// Invalid configuration: bad frequency, too many stations, span > 2 MHz.
    #[error("config error: {0}")]
    Config(String),

    /// Tuner not found or not accessible.
    #[error("device error: {0}")]
    Device(String),

    /// A child process died or the pipeline cannot run.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Recorder asked to start while already recording.
    #[error("recorder busy: event {active} still recording")]
    RecorderBusy { active: i64 },

    /// Speech-to-text backend failed.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Database or filesystem problem; writes may be lost, process continues.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, RdsError>;

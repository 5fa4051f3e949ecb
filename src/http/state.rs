use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::dsp::ChannelizerStats;
use crate::http::ws::ConsoleBus;
use crate::mqtt::MqttPublisher;
use crate::pipeline::PipelineStatus;
use crate::rds::Station;
use crate::store::EventStore;

/// Shared application state for HTTP handlers.
///
/// Everything here is either immutable or read through snapshot copies;
/// handlers never hold live references into pipeline state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub status: Arc<PipelineStatus>,
    pub stations: Vec<Arc<Mutex<Station>>>,
    pub channel_stats: Arc<ChannelizerStats>,
    pub console: ConsoleBus,
    pub mqtt: Arc<MqttPublisher>,
    pub audio_dir: PathBuf,
    pub multi_station: bool,
    pub frequency: String,
    pub decode_errors: Arc<AtomicU64>,
    pub started: Instant,
    pub version: String,
}

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod pipeline;
pub mod rds;
pub mod store;
pub mod transcribe;

pub use audio::Recorder;
pub use config::Config;
pub use error::{RdsError, Result};
pub use http::{create_router, AppState};
pub use mqtt::{AlertPublisher, MqttPublisher};
pub use pipeline::{PipelineStatus, Supervisor};
pub use rds::{DecodedGroup, RulesEngine, Station};
pub use store::{EventFilter, EventRow, EventStore};

//! Speech-to-text: pluggable backend, bounded job queue, single worker.
//!
//! Backends implement [`TranscribeBackend`]; the engine is selected once at
//! startup. The local engine is compiled in behind the `local-whisper`
//! feature so the default build carries no native inference stack.

pub mod remote;
pub mod worker;

#[cfg(feature = "local-whisper")]
pub mod local;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, TranscriptionEngine};
use crate::error::Result;

pub use worker::{TranscriberHandle, TranscriptionJob};

/// A speech-to-text backend: WAV file in, transcript out.
#[async_trait::async_trait]
pub trait TranscribeBackend: Send + Sync {
    async fn transcribe(&self, wav_path: &Path) -> Result<String>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Select and construct the backend for the configured engine.
///
/// Returns `None` when transcription is disabled; jobs are then drained
/// with status `none`.
pub fn create_backend(cfg: &Config) -> Result<Option<Arc<dyn TranscribeBackend>>> {
    match cfg.transcription_engine {
        TranscriptionEngine::None => {
            info!("transcription disabled (TRANSCRIPTION_ENGINE=none)");
            Ok(None)
        }
        TranscriptionEngine::Remote => {
            if cfg.whisper_remote_url.is_empty() {
                warn!(
                    "TRANSCRIPTION_ENGINE=remote but WHISPER_REMOTE_URL is empty, \
                     transcription will fail"
                );
            } else {
                info!("transcription engine: remote ({})", cfg.whisper_remote_url);
            }
            Ok(Some(Arc::new(remote::RemoteBackend::new(
                cfg.whisper_remote_url.clone(),
                cfg.transcription_language.clone(),
                cfg.whisper_remote_timeout_sec,
            )?)))
        }
        TranscriptionEngine::Local => {
            #[cfg(feature = "local-whisper")]
            {
                info!(
                    "transcription engine: local (model={})",
                    cfg.transcription_model
                );
                Ok(Some(Arc::new(local::LocalBackend::new(
                    &cfg.transcription_model,
                    cfg.transcription_language.clone(),
                ))))
            }
            #[cfg(not(feature = "local-whisper"))]
            {
                warn!(
                    "TRANSCRIPTION_ENGINE=local but this build has no local-whisper \
                     feature, transcription disabled"
                );
                Ok(None)
            }
        }
    }
}

//! Local Whisper backend (`local-whisper` feature).
//!
//! The GGML model is loaded lazily on the first job; loading can take tens
//! of seconds. Inference is not reentrant, so the model sits behind a
//! mutex and the single transcriber worker is the only caller. The
//! blocking inference runs on the tokio blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::{RdsError, Result};
use crate::transcribe::TranscribeBackend;

pub struct LocalBackend {
    model_path: PathBuf,
    language: String,
    context: Arc<Mutex<Option<WhisperContext>>>,
}

impl LocalBackend {
    /// `model` is either a path to a GGML file or a bare size name that is
    /// resolved under `/data/models/`.
    pub fn new(model: &str, language: String) -> Self {
        let model_path = if model.contains('/') {
            PathBuf::from(model)
        } else {
            PathBuf::from(format!("/data/models/ggml-{model}.bin"))
        };
        Self {
            model_path,
            language,
            context: Arc::new(Mutex::new(None)),
        }
    }
}

fn read_wav_mono_f32(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| RdsError::Transcription(format!("cannot open {path:?}: {e}")))?;
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| RdsError::Transcription(format!("bad wav: {e}")))?;
    Ok(samples)
}

#[async_trait::async_trait]
impl TranscribeBackend for LocalBackend {
    async fn transcribe(&self, wav_path: &Path) -> Result<String> {
        let context = Arc::clone(&self.context);
        let model_path = self.model_path.clone();
        let language = self.language.clone();
        let wav_path = wav_path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let samples = read_wav_mono_f32(&wav_path)?;

            let mut guard = context.lock().unwrap();
            if guard.is_none() {
                info!(
                    "loading whisper model {} (first load may take a while)...",
                    model_path.display()
                );
                let ctx = WhisperContext::new_with_params(
                    model_path
                        .to_str()
                        .ok_or_else(|| RdsError::Transcription("bad model path".into()))?,
                    WhisperContextParameters::default(),
                )
                .map_err(|e| RdsError::Transcription(format!("model load failed: {e}")))?;
                info!("whisper model loaded");
                *guard = Some(ctx);
            }
            let ctx = guard.as_ref().expect("model loaded above");

            let mut state = ctx
                .create_state()
                .map_err(|e| RdsError::Transcription(format!("whisper state: {e}")))?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some(&language));
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            state
                .full(params, &samples)
                .map_err(|e| RdsError::Transcription(format!("inference failed: {e}")))?;

            let segments = state
                .full_n_segments()
                .map_err(|e| RdsError::Transcription(format!("segments: {e}")))?;
            let mut parts = Vec::new();
            for i in 0..segments {
                if let Ok(text) = state.full_get_segment_text(i) {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
            }
            Ok(parts.join(" "))
        })
        .await
        .map_err(|e| RdsError::Transcription(format!("inference task panicked: {e}")))?
    }

    fn name(&self) -> &str {
        "local"
    }
}

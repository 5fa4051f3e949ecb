//! Remote Whisper ASR backend.
//!
//! POSTs the WAV as multipart form data to the server's `/asr` endpoint
//! and expects `{"text": "..."}` back. Connection errors and 5xx get one
//! retry after a short backoff; 4xx means the request itself is wrong and
//! is never retried.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{RdsError, Result};
use crate::transcribe::TranscribeBackend;

/// Backoff before the single retry.
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct RemoteBackend {
    url: String,
    language: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(url: String, language: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .map_err(|e| RdsError::Transcription(format!("http client: {e}")))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            language,
            client,
        })
    }

    async fn post_once(&self, wav_bytes: Vec<u8>, file_name: String) -> Result<RemoteResult> {
        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| RdsError::Transcription(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new().part("audio_file", part);

        let resp = match self
            .client
            .post(format!("{}/asr", self.url))
            .query(&[
                ("encode", "true"),
                ("task", "transcribe"),
                ("language", self.language.as_str()),
                ("output", "json"),
            ])
            .multipart(form)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Ok(RemoteResult::Retry(format!("request failed: {e}"))),
        };

        let status = resp.status();
        if status.is_server_error() {
            return Ok(RemoteResult::Retry(format!("server returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RdsError::Transcription(format!(
                "ASR server returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RdsError::Transcription(format!("bad ASR response: {e}")))?;
        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(RemoteResult::Done(text))
    }
}

enum RemoteResult {
    Done(String),
    Retry(String),
}

#[async_trait::async_trait]
impl TranscribeBackend for RemoteBackend {
    async fn transcribe(&self, wav_path: &Path) -> Result<String> {
        if self.url.is_empty() {
            return Err(RdsError::Transcription(
                "WHISPER_REMOTE_URL is not configured".into(),
            ));
        }
        let wav_bytes = tokio::fs::read(wav_path)
            .await
            .map_err(|e| RdsError::Transcription(format!("cannot read {wav_path:?}: {e}")))?;
        let file_name = wav_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        for attempt in 0..2 {
            match self.post_once(wav_bytes.clone(), file_name.clone()).await? {
                RemoteResult::Done(text) => {
                    if attempt > 0 {
                        info!("remote ASR succeeded on retry");
                    }
                    return Ok(text);
                }
                RemoteResult::Retry(reason) if attempt == 0 => {
                    warn!("remote ASR: {reason}, retrying in {RETRY_DELAY:?}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                RemoteResult::Retry(reason) => {
                    return Err(RdsError::Transcription(reason));
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    fn name(&self) -> &str {
        "remote"
    }
}

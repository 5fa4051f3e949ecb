//! Event audio recorder.
//!
//! Buffers raw PCM in memory while an event is open. On stop, the clip is
//! resampled to 16 kHz, written as WAV, encoded to OGG/Opus via ffmpeg,
//! and queued for transcription: all in a spawned finalize task so the
//! tee never waits on disk or the encoder.
//!
//! `feed()` is called from the tee task; `start()`/`stop()` from the rules
//! engine. At most one recording exists per station.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::dsp::resample_to_16k;
use crate::error::{RdsError, Result};
use crate::store::EventStore;
use crate::transcribe::{TranscriberHandle, TranscriptionJob};

/// Sample rate written to disk for the speech models.
const OUTPUT_RATE: u32 = 16_000;

/// Hard ceiling on the encoder subprocess.
const ENCODE_TIMEOUT: Duration = Duration::from_secs(60);

struct ActiveRecording {
    event_id: i64,
    started_at: Instant,
    buf: Vec<u8>,
}

pub struct Recorder {
    audio_dir: PathBuf,
    min_duration: Duration,
    max_duration: Duration,
    recording: AtomicBool,
    active: Mutex<Option<ActiveRecording>>,
    store: Arc<EventStore>,
    transcriber: TranscriberHandle,
    /// Notifies the rules engine when a recording hit the duration cap.
    cap_tx: mpsc::UnboundedSender<i64>,
}

impl Recorder {
    pub fn new(
        audio_dir: PathBuf,
        min_duration_sec: u64,
        max_duration_sec: u64,
        store: Arc<EventStore>,
        transcriber: TranscriberHandle,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<i64>) {
        let (cap_tx, cap_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            audio_dir,
            min_duration: Duration::from_secs(min_duration_sec),
            max_duration: Duration::from_secs(max_duration_sec),
            recording: AtomicBool::new(false),
            active: Mutex::new(None),
            store,
            transcriber,
            cap_tx,
        });
        (recorder, cap_rx)
    }

    /// Cheap check for the tee's hot path.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Begin recording for an event.
    pub fn start(&self, event_id: i64) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        if let Some(current) = active.as_ref() {
            return Err(RdsError::RecorderBusy {
                active: current.event_id,
            });
        }
        *active = Some(ActiveRecording {
            event_id,
            started_at: Instant::now(),
            buf: Vec::new(),
        });
        self.recording.store(true, Ordering::Relaxed);
        info!("recording started for event {event_id}");
        Ok(())
    }

    /// Append a PCM chunk (tee thread). Enforces the duration cap.
    pub fn feed(&self, chunk: &[u8]) {
        let capped = {
            let mut active = self.active.lock().unwrap();
            let Some(rec) = active.as_mut() else {
                return;
            };
            if rec.started_at.elapsed() > self.max_duration {
                active.take()
            } else {
                rec.buf.extend_from_slice(chunk);
                None
            }
        };
        if let Some(rec) = capped {
            self.recording.store(false, Ordering::Relaxed);
            warn!(
                "recording for event {} hit the {}s cap, finalizing",
                rec.event_id,
                self.max_duration.as_secs()
            );
            let event_id = rec.event_id;
            if !rec.buf.is_empty() {
                self.finalize(rec);
            }
            let _ = self.cap_tx.send(event_id);
        }
    }

    /// Stop and finalize the current recording.
    ///
    /// Returns true when a clip was captured and will be saved; false when
    /// nothing was recording or the clip was discarded as too short.
    pub fn stop(&self) -> bool {
        let rec = {
            let mut active = self.active.lock().unwrap();
            active.take()
        };
        self.recording.store(false, Ordering::Relaxed);
        let Some(rec) = rec else {
            return false;
        };
        let elapsed = rec.started_at.elapsed();
        if elapsed < self.min_duration || rec.buf.is_empty() {
            info!(
                "recording for event {} too short ({:.1}s), discarding",
                rec.event_id,
                elapsed.as_secs_f64()
            );
            return false;
        }
        info!(
            "recording stopped for event {} ({:.1}s, {} bytes)",
            rec.event_id,
            elapsed.as_secs_f64(),
            rec.buf.len()
        );
        self.finalize(rec);
        true
    }

    fn finalize(&self, rec: ActiveRecording) {
        let audio_dir = self.audio_dir.clone();
        let store = self.store.clone();
        let transcriber = self.transcriber.clone();
        tokio::spawn(async move {
            let event_id = rec.event_id;
            if let Err(e) = save_and_enqueue(audio_dir, store.clone(), transcriber, rec).await {
                error!("failed to save audio for event {event_id}: {e}");
                if let Err(e) = store.update_transcription(event_id, None, "error", None) {
                    error!("cannot mark event {event_id} failed: {e}");
                }
            }
        });
    }
}

async fn save_and_enqueue(
    audio_dir: PathBuf,
    store: Arc<EventStore>,
    transcriber: TranscriberHandle,
    rec: ActiveRecording,
) -> Result<()> {
    let event_id = rec.event_id;
    tokio::fs::create_dir_all(&audio_dir)
        .await
        .map_err(|e| RdsError::Transcription(format!("cannot create audio dir: {e}")))?;

    let wav_path = audio_dir.join(format!("{event_id}.wav"));
    let ogg_path = audio_dir.join(format!("{event_id}.ogg"));

    // Resample + WAV write are CPU/disk bound.
    let wav_for_task = wav_path.clone();
    let pcm = rec.buf;
    tokio::task::spawn_blocking(move || write_wav_16k(&wav_for_task, &pcm))
        .await
        .map_err(|e| RdsError::Transcription(format!("finalize task panicked: {e}")))??;

    encode_ogg(&wav_path, &ogg_path).await?;

    store.update_audio(event_id, &format!("{event_id}.ogg"))?;
    store.update_transcription_status(event_id, "transcribing")?;

    info!(
        "audio saved for event {event_id}: {} + {}",
        wav_path.display(),
        ogg_path.display()
    );

    transcriber.enqueue(TranscriptionJob {
        event_id,
        wav_path,
        enqueued_at: Instant::now(),
        attempt: 0,
    });
    Ok(())
}

fn write_wav_16k(path: &std::path::Path, pcm: &[u8]) -> Result<()> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    let resampled = resample_to_16k(&samples);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: OUTPUT_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| RdsError::Transcription(format!("cannot create {path:?}: {e}")))?;
    for s in resampled {
        writer
            .write_sample(s)
            .map_err(|e| RdsError::Transcription(format!("wav write: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| RdsError::Transcription(format!("wav finalize: {e}")))?;
    Ok(())
}

async fn encode_ogg(wav_path: &std::path::Path, ogg_path: &std::path::Path) -> Result<()> {
    let child = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(wav_path)
        .args(["-c:a", "libopus", "-b:a", "48k"])
        .arg(ogg_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RdsError::Transcription(format!("cannot spawn ffmpeg: {e}")))?;

    let output = tokio::time::timeout(ENCODE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| RdsError::Transcription("ffmpeg timed out".into()))?
        .map_err(|e| RdsError::Transcription(format!("ffmpeg failed: {e}")))?;
    if !output.status.success() {
        return Err(RdsError::Transcription(format!(
            "ffmpeg exited with {}",
            output.status
        )));
    }
    Ok(())
}

//! Bounded transcription queue and its single worker.
//!
//! Jobs arrive from the recorder's finalize step. The queue holds at most
//! `TRANSCRIBE_QUEUE_MAX` jobs; on overflow the oldest pending job is
//! dropped and its event is marked failed. Completion effects (store
//! write, alert release, retained topic, console broadcast) run inline in
//! the worker.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::http::ws::{console_send, ConsoleBus};
use crate::mqtt::alerts::{AlertPublisher, TranscriptionOutcome};
use crate::mqtt::client::MqttPublisher;
use crate::mqtt::messages::{StationRef, TranscriptionMessage};
use crate::store::{now_ts, EventStore};
use crate::transcribe::TranscribeBackend;

/// One queued clip.
#[derive(Debug)]
pub struct TranscriptionJob {
    pub event_id: i64,
    pub wav_path: PathBuf,
    pub enqueued_at: Instant,
    pub attempt: u32,
}

struct QueueInner {
    jobs: Mutex<VecDeque<TranscriptionJob>>,
    notify: Notify,
    stopping: AtomicBool,
    max: usize,
}

/// Cloneable handle for enqueueing jobs.
#[derive(Clone)]
pub struct TranscriberHandle {
    inner: Arc<QueueInner>,
    store: Arc<EventStore>,
}

impl TranscriberHandle {
    pub fn new(max: usize, store: Arc<EventStore>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stopping: AtomicBool::new(false),
                max: max.max(1),
            }),
            store,
        }
    }

    /// Queue a clip for transcription.
    ///
    /// On overflow the oldest pending job is dropped and its event marked
    /// `error`; the newest clip is the one most likely to still matter.
    pub fn enqueue(&self, job: TranscriptionJob) {
        let dropped = {
            let mut jobs = self.inner.jobs.lock().unwrap();
            jobs.push_back(job);
            if jobs.len() > self.inner.max {
                jobs.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = dropped {
            warn!(
                "transcription queue full, dropping job for event {}",
                old.event_id
            );
            if let Err(e) = self
                .store
                .update_transcription(old.event_id, None, "error", None)
            {
                error!("cannot mark dropped job {}: {e}", old.event_id);
            }
        }
        self.inner.notify.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.jobs.lock().unwrap().len()
    }

    /// Ask the worker to exit after draining.
    pub fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

/// Everything the worker touches when a job completes.
pub struct WorkerContext {
    pub store: Arc<EventStore>,
    pub alerts: Arc<AlertPublisher>,
    pub mqtt: Arc<MqttPublisher>,
    pub console: ConsoleBus,
    pub language: String,
}

/// Spawn the single transcriber worker.
pub fn spawn_worker(
    handle: TranscriberHandle,
    backend: Option<Arc<dyn TranscribeBackend>>,
    ctx: WorkerContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "transcriber worker started (engine: {})",
            backend.as_ref().map(|b| b.name()).unwrap_or("none")
        );
        loop {
            let job = {
                let mut jobs = handle.inner.jobs.lock().unwrap();
                jobs.pop_front()
            };
            let Some(job) = job else {
                if handle.inner.stopping.load(Ordering::SeqCst) {
                    break;
                }
                handle.inner.notify.notified().await;
                continue;
            };
            process_job(job, backend.as_deref(), &ctx).await;
        }
        info!("transcriber worker stopped");
    })
}

async fn process_job(job: TranscriptionJob, backend: Option<&dyn TranscribeBackend>, ctx: &WorkerContext) {
    let event_id = job.event_id;

    let Some(backend) = backend else {
        // Transcription disabled: drain the queue without work.
        if let Err(e) = ctx.store.update_transcription_status(event_id, "none") {
            error!("store update for event {event_id} failed: {e}");
        }
        ctx.alerts.release(
            event_id,
            TranscriptionOutcome {
                text: None,
                status: "none",
            },
        );
        return;
    };

    let t0 = Instant::now();
    match backend.transcribe(&job.wav_path).await {
        Ok(text) => {
            let duration = (t0.elapsed().as_secs_f64() * 10.0).round() / 10.0;
            info!(
                "transcription complete for event {event_id} ({} chars, {duration:.1}s)",
                text.len()
            );
            if let Err(e) =
                ctx.store
                    .update_transcription(event_id, Some(&text), "done", Some(duration))
            {
                error!("store update for event {event_id} failed: {e}");
            }
            publish_success(ctx, event_id, &text, duration);
            ctx.alerts.release(
                event_id,
                TranscriptionOutcome {
                    text: Some(text),
                    status: "done",
                },
            );
        }
        Err(e) => {
            error!("transcription failed for event {event_id}: {e}");
            if let Err(e) = ctx.store.update_transcription(event_id, None, "error", None) {
                error!("store update for event {event_id} failed: {e}");
            }
            console_send(
                &ctx.console,
                "transcription_error",
                json!({ "event_id": event_id, "error": e.to_string() }),
            );
            ctx.alerts.release(
                event_id,
                TranscriptionOutcome {
                    text: None,
                    status: "error",
                },
            );
        }
    }
}

fn publish_success(ctx: &WorkerContext, event_id: i64, text: &str, duration: f64) {
    // The retained per-station topic and the console need the event's
    // station context.
    let event = match ctx.store.get_event(event_id) {
        Ok(Some(event)) => event,
        Ok(None) => {
            warn!("transcribed event {event_id} vanished from the store");
            return;
        }
        Err(e) => {
            error!("cannot load event {event_id}: {e}");
            return;
        }
    };

    let message = TranscriptionMessage {
        event_id,
        station: StationRef {
            pi: event.pi.clone(),
            ps: event.station_ps.clone(),
            frequency: event.frequency.clone().unwrap_or_default(),
        },
        transcription: text.to_string(),
        language: ctx.language.clone(),
        duration_sec: event.duration_sec,
        radiotext: event.radiotext.clone(),
        timestamp: now_ts(),
    };
    ctx.mqtt.publish(
        &format!("{}/{}/transcription", event.pi, event.event_type),
        &message,
        1,
        true,
    );

    console_send(
        &ctx.console,
        "transcription",
        json!({
            "event_id": event_id,
            "transcription": text,
            "transcription_status": "done",
            "transcription_duration_sec": duration,
        }),
    );
}

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rds_guard::audio::Recorder;
use rds_guard::config::Config;
use rds_guard::dsp::ChannelizerStats;
use rds_guard::error::RdsError;
use rds_guard::http::ws::console_bus;
use rds_guard::http::{create_router, AppState};
use rds_guard::mqtt::{AlertPublisher, MqttPublisher};
use rds_guard::pipeline::supervisor::StationRuntime;
use rds_guard::pipeline::{PipelineStatus, Supervisor};
use rds_guard::rds::rules::{EngineDeps, RulesEngine};
use rds_guard::rds::Station;
use rds_guard::store::{now_ts, EventStore};
use rds_guard::transcribe::{self, worker, TranscriberHandle};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    info!("RDS Guard starting");
    info!("  frequencies: {}", cfg.frequency_labels.join(", "));
    info!(
        "  mode:        {}",
        if cfg.multi_station() {
            "multi-station (wideband IQ)"
        } else {
            "single station"
        }
    );
    info!("  web ui:      port {}", cfg.web_ui_port);
    info!("  retention:   {} days", cfg.retention_days);
    info!(
        "  mqtt:        {}",
        if cfg.mqtt_enabled { "enabled" } else { "disabled" }
    );
    info!("  recording:   -> {}", cfg.audio_dir.display());

    match run(cfg).await {
        Ok(()) => info!("RDS Guard stopped"),
        Err(e @ (RdsError::Config(_) | RdsError::Device(_))) => {
            error!("fatal: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("unrecoverable pipeline failure: {e}");
            std::process::exit(2);
        }
    }
}

async fn run(cfg: Config) -> Result<(), RdsError> {
    // Event store first: recover any events left open by a previous run.
    let store = Arc::new(EventStore::open(&cfg.db_path, &cfg.audio_dir)?);
    store.close_stale_active_on_startup()?;

    let console = console_bus();
    let mqtt = Arc::new(MqttPublisher::connect(&cfg));
    let alerts = Arc::new(AlertPublisher::new(
        mqtt.clone(),
        console.clone(),
        Duration::from_secs(cfg.alert_hold_timeout_sec),
    ));

    // Transcription worker.
    let backend = transcribe::create_backend(&cfg)?;
    let transcriber = TranscriberHandle::new(cfg.transcribe_queue_max, store.clone());
    let worker_handle = worker::spawn_worker(
        transcriber.clone(),
        backend,
        worker::WorkerContext {
            store: store.clone(),
            alerts: alerts.clone(),
            mqtt: mqtt.clone(),
            console: console.clone(),
            language: cfg.transcription_language.clone(),
        },
    );

    // Per-station state, recorder and rules engine. These outlive pipeline
    // restarts.
    let mut stations = Vec::new();
    let mut runtimes = Vec::new();
    for (label, &freq_hz) in cfg.frequency_labels.iter().zip(&cfg.frequencies_hz) {
        let station = Arc::new(Mutex::new(Station::new(label.clone(), freq_hz)));
        let (recorder, cap_rx) = Recorder::new(
            cfg.audio_dir.clone(),
            cfg.min_recording_sec,
            cfg.max_recording_sec,
            store.clone(),
            transcriber.clone(),
        );
        let engine = RulesEngine::new(
            station.clone(),
            EngineDeps {
                store: store.clone(),
                recorder: recorder.clone(),
                alerts: alerts.clone(),
                mqtt: mqtt.clone(),
                console: console.clone(),
                record_types: cfg.record_event_types.clone(),
                publish_all: cfg.publish_all,
                publish_raw: cfg.publish_raw,
            },
        );
        stations.push(station.clone());
        runtimes.push(StationRuntime::spawn(station, recorder, cap_rx, engine));
    }

    let status = Arc::new(PipelineStatus::default());
    let channel_stats = Arc::new(ChannelizerStats::new(cfg.frequencies_hz.len()));
    let decode_errors = Arc::new(AtomicU64::new(0));

    // Web facade: up before the radio pipeline so the dashboard is
    // reachable even while the tuner is missing.
    let app_state = AppState {
        store: store.clone(),
        status: status.clone(),
        stations: stations.clone(),
        channel_stats: channel_stats.clone(),
        console: console.clone(),
        mqtt: mqtt.clone(),
        audio_dir: cfg.audio_dir.clone(),
        multi_station: cfg.multi_station(),
        frequency: cfg.frequency_labels[0].clone(),
        decode_errors: decode_errors.clone(),
        started: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let router = create_router(app_state);
    let addr = format!("0.0.0.0:{}", cfg.web_ui_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RdsError::Config(format!("cannot bind {addr}: {e}")))?;
    info!("web ui ready at http://{addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("web server failed: {e}");
        }
    });

    // Shutdown: signal handler sets the flag, everything else cascades.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Periodic MQTT status.
    if cfg.mqtt_enabled {
        spawn_status_publisher(
            mqtt.clone(),
            status.clone(),
            stations.clone(),
            channel_stats.clone(),
            Duration::from_secs(cfg.status_interval_sec),
        );
    }

    // Daily retention sweep.
    {
        let store = store.clone();
        let days = cfg.retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(86_400));
            loop {
                interval.tick().await;
                match store.purge_older_than(days) {
                    Ok(0) => {}
                    Ok(n) => info!("retention: purged {n} events older than {days} days"),
                    Err(e) => error!("retention purge failed: {e}"),
                }
            }
        });
    }

    let supervisor = Supervisor::new(
        cfg,
        status,
        runtimes,
        channel_stats,
        decode_errors,
        shutdown_rx,
    );
    let result = supervisor.run().await;

    transcriber.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), worker_handle).await;
    result
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

fn spawn_status_publisher(
    mqtt: Arc<MqttPublisher>,
    status: Arc<PipelineStatus>,
    stations: Vec<Arc<Mutex<Station>>>,
    channel_stats: Arc<ChannelizerStats>,
    interval: Duration,
) {
    let started = Instant::now();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // fire after the first full interval
        loop {
            tick.tick().await;
            let snaps: Vec<_> = stations.iter().map(|s| s.lock().unwrap().snapshot()).collect();
            let groups_total: u64 = snaps.iter().map(|s| s.groups_total).sum();
            let groups_per_sec: f64 = snaps.iter().map(|s| s.groups_per_sec).sum();
            let mut payload = json!({
                "uptime_sec": started.elapsed().as_secs(),
                "groups_total": groups_total,
                "groups_per_sec": (groups_per_sec * 10.0).round() / 10.0,
                "mqtt_connected": mqtt.is_connected(),
                "pipeline": status.snapshot(),
                "station": snaps.first(),
                "timestamp": now_ts(),
            });
            let drops = channel_stats.total_drops();
            if drops > 0 {
                payload["drops"] = json!(drops);
            }
            mqtt.publish("system/status", &payload, 0, mqtt.retain_state);
        }
    });
}

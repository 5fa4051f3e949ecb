//! Radio pipeline supervisor.
//!
//! Owns every child process and worker task. Single-station:
//! `rtl_fm → tee → redsea`. Multi-station: `rtl_sdr → channelizer →
//! N × (tee → redsea)`. Each child's stderr is drained into the log with
//! a prefix so device and decoder output shows up in the service log.
//!
//! Restart policy: a dead child fails the whole run, and the pipeline
//! restarts after a capped exponential backoff. The state shared across
//! children is too coupled to restart them piecewise. The per-station
//! rules engines live *outside* the restart loop, so station state and
//! open events survive a pipeline bounce.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::audio::{tee, Recorder};
use crate::config::{Config, RTL_SAMPLE_RATE};
use crate::dsp::{Channelizer, ChannelizerStats};
use crate::error::RdsError;
use crate::pipeline::status::PipelineStatus;
use crate::rds::group::DecodedGroup;
use crate::rds::rules::RulesEngine;
use crate::rds::station::Station;

/// Capped exponential restart backoff, in seconds.
const RESTART_BACKOFF: [u64; 5] = [1, 2, 4, 8, 30];

/// A run longer than this resets the consecutive-failure counter.
const STABLE_RUN: Duration = Duration::from_secs(60);

/// Capacity of the channelizer → tee PCM channels.
const PCM_CHANNEL: usize = 32;

/// One monitored station: shared state plus the channel feeding its
/// rules-engine task.
pub struct StationRuntime {
    pub station: Arc<Mutex<Station>>,
    pub recorder: Arc<Recorder>,
    group_tx: mpsc::Sender<DecodedGroup>,
}

impl StationRuntime {
    /// Create the runtime and spawn the long-lived rules-engine task.
    ///
    /// The task owns the engine and serializes decoded groups, recording
    /// cap notifications and periodic housekeeping for this station.
    pub fn spawn(
        station: Arc<Mutex<Station>>,
        recorder: Arc<Recorder>,
        mut cap_rx: mpsc::UnboundedReceiver<i64>,
        mut engine: RulesEngine,
    ) -> Self {
        let (group_tx, mut group_rx) = mpsc::channel::<DecodedGroup>(1024);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    group = group_rx.recv() => match group {
                        Some(group) => engine.on_group(&group),
                        None => break,
                    },
                    capped = cap_rx.recv() => {
                        if let Some(event_id) = capped {
                            engine.on_recording_cap(event_id);
                        }
                    }
                    _ = tick.tick() => engine.tick(),
                }
            }
        });
        Self {
            station,
            recorder,
            group_tx,
        }
    }
}

enum RunExit {
    Shutdown,
    FatalStartup(RdsError),
    Failed(String),
}

pub struct Supervisor {
    cfg: Config,
    status: Arc<PipelineStatus>,
    stations: Vec<StationRuntime>,
    channel_stats: Arc<ChannelizerStats>,
    decode_errors: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        cfg: Config,
        status: Arc<PipelineStatus>,
        stations: Vec<StationRuntime>,
        channel_stats: Arc<ChannelizerStats>,
        decode_errors: Arc<AtomicU64>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            status,
            stations,
            channel_stats,
            decode_errors,
            shutdown,
        }
    }

    /// Run the pipeline until shutdown, restarting on failure.
    ///
    /// `Err(Device…)` means a fatal startup problem (exit 1);
    /// `Err(Pipeline…)` means too many consecutive restarts (exit 2).
    pub async fn run(mut self) -> Result<(), RdsError> {
        let mut attempts: u32 = 0;
        let mut first_run = true;
        loop {
            let started = Instant::now();
            let exit = self.run_once(first_run).await;
            first_run = false;
            match exit {
                RunExit::Shutdown => {
                    self.status.set_stopped(Some("shutdown requested"));
                    info!("pipeline stopped (shutdown requested)");
                    return Ok(());
                }
                RunExit::FatalStartup(e) => {
                    self.status.set_error(&e.to_string());
                    return Err(e);
                }
                RunExit::Failed(msg) => {
                    error!("pipeline failed: {msg}");
                    self.status.set_error(&msg);
                    if started.elapsed() > STABLE_RUN {
                        attempts = 0;
                    }
                    attempts += 1;
                    let max = self.cfg.restart_max_attempts;
                    if max > 0 && attempts >= max {
                        return Err(RdsError::Pipeline(format!(
                            "giving up after {attempts} restart attempts: {msg}"
                        )));
                    }
                    let delay =
                        RESTART_BACKOFF[(attempts as usize - 1).min(RESTART_BACKOFF.len() - 1)];
                    info!("restarting pipeline in {delay}s (attempt {attempts})");
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = shutdown.changed() => {
                            self.status.set_stopped(Some("shutdown requested"));
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn run_once(&mut self, first_run: bool) -> RunExit {
        if *self.shutdown.borrow() {
            return RunExit::Shutdown;
        }
        self.status.set_starting();
        let (exit_tx, mut exit_rx) = mpsc::channel::<(String, Option<i32>)>(8);
        let mut pids: Vec<(String, u32)> = Vec::new();

        let spawn_result = if self.cfg.multi_station() {
            self.spawn_multi(&exit_tx, &mut pids).await
        } else {
            self.spawn_single(&exit_tx, &mut pids).await
        };
        if let Err(e) = spawn_result {
            if first_run {
                return RunExit::FatalStartup(e);
            }
            return RunExit::Failed(e.to_string());
        }
        drop(exit_tx);

        self.status.set_running();
        info!("pipeline running: reading RDS data");

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested: terminating pipeline children");
                    self.terminate_all(&pids).await;
                    return RunExit::Shutdown;
                }
                exited = exit_rx.recv() => match exited {
                    Some((name, code)) => {
                        let msg = match code {
                            Some(0) => format!("{name} exited unexpectedly"),
                            Some(code) => format!("{name} exited with code {code}"),
                            None => format!("{name} was killed by a signal"),
                        };
                        self.terminate_all(&pids).await;
                        return RunExit::Failed(msg);
                    }
                    None => {
                        self.terminate_all(&pids).await;
                        return RunExit::Failed("all pipeline children gone".into());
                    }
                },
            }
        }
    }

    /// `rtl_fm → tee → redsea`.
    async fn spawn_single(
        &mut self,
        exit_tx: &mpsc::Sender<(String, Option<i32>)>,
        pids: &mut Vec<(String, u32)>,
    ) -> Result<(), RdsError> {
        let device = resolve_device_index(&self.cfg).await;
        let freq = &self.cfg.frequency_labels[0];

        let mut rtl = spawn_child(
            Command::new("rtl_fm")
                .args(["-M", "fm", "-l", "0", "-A", "std"])
                .args(["-p", &self.cfg.ppm_correction])
                .args(["-s", "171k"])
                .args(["-g", &self.cfg.rtl_gain])
                .args(["-F", "9"])
                .args(["-d", &device])
                .args(["-f", freq])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
            "rtl_fm",
        )?;
        let mut redsea = spawn_child(
            self.redsea_command().stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()),
            "redsea",
        )?;

        let rtl_out = rtl.stdout.take().ok_or_else(no_pipe)?;
        let redsea_in = redsea.stdin.take().ok_or_else(no_pipe)?;
        let redsea_out = redsea.stdout.take().ok_or_else(no_pipe)?;
        drain_stderr(&mut rtl, "rtl_fm");
        drain_stderr(&mut redsea, "redsea");

        let runtime = &self.stations[0];
        tokio::spawn(tee::run_reader(rtl_out, redsea_in, runtime.recorder.clone()));
        spawn_line_reader(
            redsea_out,
            runtime.group_tx.clone(),
            self.decode_errors.clone(),
            freq.clone(),
        );

        monitor_child(rtl, "rtl_fm", exit_tx.clone(), pids);
        monitor_child(redsea, "redsea", exit_tx.clone(), pids);
        info!("pipeline started: rtl_fm @ {freq} | redsea");
        Ok(())
    }

    /// `rtl_sdr → channelizer → N × (tee → redsea)`.
    async fn spawn_multi(
        &mut self,
        exit_tx: &mpsc::Sender<(String, Option<i32>)>,
        pids: &mut Vec<(String, u32)>,
    ) -> Result<(), RdsError> {
        let device = resolve_device_index(&self.cfg).await;

        let mut rtl = spawn_child(
            Command::new("rtl_sdr")
                .args(["-f", &self.cfg.center_freq_hz.to_string()])
                .args(["-s", &RTL_SAMPLE_RATE.to_string()])
                .args(["-g", &self.cfg.rtl_gain])
                .args(["-p", &self.cfg.ppm_correction])
                .args(["-d", &device])
                .arg("-")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
            "rtl_sdr",
        )?;
        let rtl_out = rtl.stdout.take().ok_or_else(no_pipe)?;
        drain_stderr(&mut rtl, "rtl_sdr");

        let mut sinks = Vec::with_capacity(self.stations.len());
        for (i, runtime) in self.stations.iter().enumerate() {
            let label = self.cfg.frequency_labels[i].clone();
            let name = format!("redsea[{label}]");
            let mut redsea = spawn_child(
                self.redsea_command().stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()),
                &name,
            )?;
            let redsea_in = redsea.stdin.take().ok_or_else(no_pipe)?;
            let redsea_out = redsea.stdout.take().ok_or_else(no_pipe)?;
            drain_stderr(&mut redsea, &name);

            let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<u8>>(PCM_CHANNEL);
            sinks.push(pcm_tx);
            tokio::spawn(tee::run_channel(pcm_rx, redsea_in, runtime.recorder.clone()));
            spawn_line_reader(
                redsea_out,
                runtime.group_tx.clone(),
                self.decode_errors.clone(),
                label,
            );
            monitor_child(redsea, &name, exit_tx.clone(), pids);
        }

        let channelizer = Channelizer::new(
            &self.cfg.frequencies_hz,
            self.cfg.center_freq_hz,
            sinks,
            self.channel_stats.clone(),
        );
        tokio::spawn(channelizer.run(rtl_out));
        monitor_child(rtl, "rtl_sdr", exit_tx.clone(), pids);

        info!(
            "multi-station pipeline started: {} stations around {} Hz",
            self.stations.len(),
            self.cfg.center_freq_hz
        );
        Ok(())
    }

    fn redsea_command(&self) -> Command {
        let mut cmd = Command::new("redsea");
        cmd.args(["-r", "171k"]);
        cmd.args(["-t", "%Y-%m-%dT%H:%M:%S%f"]);
        if self.cfg.redsea_show_partial {
            cmd.arg("-p");
        }
        if self.cfg.redsea_show_raw {
            cmd.arg("-R");
        }
        cmd.arg("-E");
        cmd
    }

    /// SIGTERM every child, SIGKILL stragglers after the grace period.
    async fn terminate_all(&self, pids: &[(String, u32)]) {
        for (name, pid) in pids {
            info!("terminating {name} (pid {pid})");
            signal_pid(*pid, "-TERM").await;
        }
        let grace = Duration::from_secs(self.cfg.shutdown_grace_sec);
        let pids: Vec<(String, u32)> = pids.to_vec();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for (_, pid) in pids {
                signal_pid(pid, "-KILL").await;
            }
        });
    }
}

fn no_pipe() -> RdsError {
    RdsError::Pipeline("child process pipe missing".into())
}

fn spawn_child(cmd: &mut Command, name: &str) -> Result<Child, RdsError> {
    // If a spawn later in the startup sequence fails, dropping this child
    // must not leave it running.
    match cmd.kill_on_drop(true).spawn() {
        Ok(child) => {
            info!("{name} started (pid {:?})", child.id());
            Ok(child)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RdsError::Device(format!(
            "{name} binary not found: is it installed?"
        ))),
        Err(e) => Err(RdsError::Pipeline(format!("cannot spawn {name}: {e}"))),
    }
}

/// Drain a child's stderr into the log with a `[name]` prefix.
fn drain_stderr(child: &mut Child, name: &str) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() {
                info!("[{name}] {line}");
            }
        }
    });
}

/// Own the child in a task and report its exit.
fn monitor_child(
    mut child: Child,
    name: &str,
    exit_tx: mpsc::Sender<(String, Option<i32>)>,
    pids: &mut Vec<(String, u32)>,
) {
    if let Some(pid) = child.id() {
        pids.push((name.to_string(), pid));
    }
    let name = name.to_string();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                let _ = exit_tx.send((name, status.code())).await;
            }
            Err(e) => {
                warn!("waiting on {name} failed: {e}");
                let _ = exit_tx.send((name, None)).await;
            }
        }
    });
}

async fn signal_pid(pid: u32, sig: &str) {
    let _ = Command::new("kill")
        .arg(sig)
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

/// Per-station decoder stdout reader: one JSON object per line.
fn spawn_line_reader(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<DecodedGroup>,
    errors: Arc<AtomicU64>,
    label: String,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut first = true;
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match DecodedGroup::parse(line) {
                Ok(Some(group)) => {
                    if first {
                        info!(
                            "first RDS group received on {label} (PI {}): decoder is running",
                            group.pi
                        );
                        first = false;
                    }
                    if tx.send(group).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let n = errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if n <= 10 {
                        let head: String = line.chars().take(100).collect();
                        warn!("invalid decoder JSON on {label}: {e} ({head})");
                    } else if n == 11 {
                        warn!("suppressing further decoder JSON errors on {label}");
                    }
                }
            }
        }
        info!("decoder output ended on {label}");
    });
}

/// Resolve a configured device serial to an index via `rtl_test`.
///
/// Falls back to the configured index when no serial is set or the lookup
/// fails.
pub async fn resolve_device_index(cfg: &Config) -> String {
    let serial = cfg.rtl_device_serial.trim();
    if serial.is_empty() {
        return cfg.rtl_device_index.clone();
    }
    info!("resolving RTL-SDR serial '{serial}' to a device index...");
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("rtl_test")
            .stdin(Stdio::null())
            .output(),
    )
    .await;
    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!("rtl_test failed ({e}): falling back to device index");
            return cfg.rtl_device_index.clone();
        }
        Err(_) => {
            error!("rtl_test timed out: falling back to device index");
            return cfg.rtl_device_index.clone();
        }
    };
    // rtl_test lists devices on stderr:  "0:  Realtek, RTL2838, SN: 00000001"
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    for line in text.lines() {
        let Some((index, rest)) = line.trim().split_once(':') else {
            continue;
        };
        if !index.chars().all(|c| c.is_ascii_digit()) || index.is_empty() {
            continue;
        }
        if let Some(sn) = rest.rsplit("SN:").next() {
            if rest.contains("SN:") && sn.trim().eq_ignore_ascii_case(serial) {
                info!("resolved serial '{serial}' to device index {index}");
                return index.to_string();
            }
        }
    }
    error!("no RTL-SDR device found with serial '{serial}', using index {}", cfg.rtl_device_index);
    cfg.rtl_device_index.clone()
}

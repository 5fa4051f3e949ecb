//! Wideband IQ channelizer.
//!
//! Reads interleaved unsigned-8-bit IQ at 2.4 MS/s from the capture
//! process, extracts each configured station to baseband, and emits
//! signed-16-bit little-endian mono PCM at 171 428 Hz per station.
//!
//! Per-station chain, run block by block:
//!
//! ```text
//! u8 IQ → complex → frequency shift → 129-tap Kaiser LPF (±100 kHz)
//!       → decimate 14 → FM discriminator → s16le → bounded channel
//! ```
//!
//! The low-pass filter is only evaluated at the decimated output points,
//! which is the polyphase identity for a decimating FIR.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_complex::Complex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{DECIMATION, RTL_SAMPLE_RATE};
use crate::dsp::filter::{fir_complex, lowpass};

/// Complex samples per processing block (~109 ms at 2.4 MS/s).
const BLOCK: usize = 262_144;

/// Low-pass filter length.
const NTAPS: usize = 129;

/// Single-sided channel bandwidth passed to the filter design.
const LPF_CUTOFF_HZ: f64 = 100_000.0;

/// Nominal FM deviation; ±75 kHz maps to roughly ±20 000 in the output.
const FM_DEVIATION_HZ: f64 = 75_000.0;

/// Per-station drop counters, shared with the status endpoint.
#[derive(Debug, Default)]
pub struct ChannelizerStats {
    drops: Vec<AtomicU64>,
}

impl ChannelizerStats {
    pub fn new(stations: usize) -> Self {
        Self {
            drops: (0..stations).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn drops(&self) -> Vec<u64> {
        self.drops.iter().map(|d| d.load(Ordering::Relaxed)).collect()
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.iter().map(|d| d.load(Ordering::Relaxed)).sum()
    }
}

/// Per-station DSP state: oscillator, filter history, discriminator carry.
struct StationChannel {
    /// Current oscillator phasor and per-sample rotation for the shift to
    /// baseband.
    phasor: Complex<f32>,
    step: Complex<f32>,
    /// Last `NTAPS - 1` shifted samples of the previous block.
    history: Vec<Complex<f32>>,
    /// Offset of the next output point within the incoming block.
    decim_offset: usize,
    /// Previous decimated sample for the phase-difference discriminator.
    prev: Complex<f32>,
    /// Output gain mapping nominal deviation near ±20 000.
    gain: f32,
    sink: mpsc::Sender<Vec<u8>>,
    closed: bool,
}

impl StationChannel {
    fn new(delta_f_hz: f64, sink: mpsc::Sender<Vec<u8>>) -> Self {
        let inc = -2.0 * std::f64::consts::PI * delta_f_hz / RTL_SAMPLE_RATE as f64;
        let out_rate = RTL_SAMPLE_RATE as f64 / DECIMATION as f64;
        let peak_phase = 2.0 * std::f64::consts::PI * FM_DEVIATION_HZ / out_rate;
        Self {
            phasor: Complex::new(1.0, 0.0),
            step: Complex::new(inc.cos() as f32, inc.sin() as f32),
            history: vec![Complex::new(0.0, 0.0); NTAPS - 1],
            decim_offset: 0,
            prev: Complex::new(0.0, 0.0),
            gain: (20_000.0 / peak_phase) as f32,
            sink,
            closed: false,
        }
    }

    /// Run the chain on one block and hand the PCM to the sink.
    ///
    /// Returns the number of output samples produced, whether delivered or
    /// dropped.
    fn process(&mut self, block: &[Complex<f32>], taps: &[f32], drops: &AtomicU64) -> usize {
        if self.closed {
            return 0;
        }

        // Frequency shift with an incremental phasor; renormalize once per
        // block to stop amplitude drift.
        let mut shifted = Vec::with_capacity(self.history.len() + block.len());
        shifted.extend_from_slice(&self.history);
        for &z in block {
            shifted.push(z * self.phasor);
            self.phasor *= self.step;
        }
        let norm = self.phasor.norm();
        if norm > 0.0 {
            self.phasor /= norm;
        }

        // Filter + decimate: evaluate the FIR only at the output points.
        // shifted[NTAPS-1 + t] is input sample t of this block.
        let mut pcm = Vec::with_capacity(block.len() / DECIMATION as usize + 1);
        let mut t = self.decim_offset;
        while t < block.len() {
            let end = NTAPS + t;
            let z = fir_complex(taps, &shifted[..end]);
            // FM discriminator: instantaneous phase difference.
            let d = (z * self.prev.conj()).arg() * self.gain;
            self.prev = z;
            let s = d.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            pcm.extend_from_slice(&s.to_le_bytes());
            t += DECIMATION as usize;
        }
        self.decim_offset = t - block.len();
        let produced = pcm.len() / 2;

        // Keep the filter tail for the next block.
        self.history.clear();
        self.history
            .extend_from_slice(&shifted[shifted.len() - (NTAPS - 1)..]);

        if produced == 0 {
            return 0;
        }
        match self.sink.try_send(pcm) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Slow consumer: this station loses the block, the others
                // are unaffected.
                drops.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed = true;
            }
        }
        produced
    }
}

/// Splits one wideband IQ stream into per-station PCM streams.
pub struct Channelizer {
    stations: Vec<StationChannel>,
    taps: Vec<f32>,
    stats: Arc<ChannelizerStats>,
}

impl Channelizer {
    /// `sinks[i]` receives the PCM for `frequencies_hz[i]`.
    pub fn new(
        frequencies_hz: &[i64],
        center_freq_hz: i64,
        sinks: Vec<mpsc::Sender<Vec<u8>>>,
        stats: Arc<ChannelizerStats>,
    ) -> Self {
        let stations = frequencies_hz
            .iter()
            .zip(sinks)
            .map(|(&f, sink)| StationChannel::new((f - center_freq_hz) as f64, sink))
            .collect();
        Self {
            stations,
            taps: lowpass(LPF_CUTOFF_HZ, RTL_SAMPLE_RATE as f64, NTAPS, 6.0),
            stats,
        }
    }

    /// Read IQ from `src` until EOF, feeding every station.
    ///
    /// A read returning an odd number of bytes means the I/Q byte pairing
    /// slipped; one byte is discarded to resync.
    pub async fn run<R: AsyncRead + Unpin>(mut self, mut src: R) {
        info!("channelizer started ({} stations)", self.stations.len());
        let mut pending: Vec<u8> = Vec::with_capacity(BLOCK * 4);
        let mut buf = vec![0u8; BLOCK * 2];
        let mut last_resync_log: Option<Instant> = None;

        loop {
            let n = match src.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("channelizer: IQ read failed: {e}");
                    break;
                }
            };
            let mut chunk = &buf[..n];
            if n % 2 != 0 {
                chunk = &chunk[1..];
                let now = Instant::now();
                if last_resync_log
                    .map(|t| now.duration_since(t) > Duration::from_secs(60))
                    .unwrap_or(true)
                {
                    warn!("channelizer: odd-length IQ read, dropping one byte to resync");
                    last_resync_log = Some(now);
                }
            }
            pending.extend_from_slice(chunk);

            while pending.len() >= BLOCK * 2 {
                let raw: Vec<u8> = pending.drain(..BLOCK * 2).collect();
                let block: Vec<Complex<f32>> = raw
                    .chunks_exact(2)
                    .map(|iq| {
                        Complex::new(
                            (iq[0] as f32 - 127.5) / 127.5,
                            (iq[1] as f32 - 127.5) / 127.5,
                        )
                    })
                    .collect();
                for (i, st) in self.stations.iter_mut().enumerate() {
                    st.process(&block, &self.taps, &self.stats.drops[i]);
                }
            }
        }

        // EOF: dropping the senders closes every per-station stream.
        info!("channelizer stopped (IQ source closed)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_iq(freq_hz: f64, samples: usize) -> Vec<u8> {
        // Unsigned-8-bit IQ of a complex tone at `freq_hz` off center.
        let mut out = Vec::with_capacity(samples * 2);
        for n in 0..samples {
            let ph = 2.0 * std::f64::consts::PI * freq_hz * n as f64 / RTL_SAMPLE_RATE as f64;
            out.push((ph.cos() * 100.0 + 127.5) as u8);
            out.push((ph.sin() * 100.0 + 127.5) as u8);
        }
        out
    }

    #[tokio::test]
    async fn output_sample_count_matches_decimation() {
        let (tx, mut rx) = mpsc::channel(64);
        let stats = Arc::new(ChannelizerStats::new(1));
        let ch = Channelizer::new(&[100_000_000], 100_000_000, vec![tx], stats);

        let blocks = 3usize;
        let iq = tone_iq(50_000.0, BLOCK * blocks);
        ch.run(std::io::Cursor::new(iq)).await;

        let mut samples = 0usize;
        while let Ok(pcm) = rx.try_recv() {
            assert_eq!(pcm.len() % 2, 0);
            samples += pcm.len() / 2;
        }
        let expected = (BLOCK * blocks) / DECIMATION as usize;
        assert!(
            (samples as i64 - expected as i64).abs() <= 1,
            "got {samples}, expected ~{expected}"
        );
    }

    #[tokio::test]
    async fn constant_offset_tone_demodulates_near_dc_value() {
        // A tone offset by delta_f demodulates to a constant proportional to
        // the offset; a station centered on the tone sees (near) zero.
        let (tx, mut rx) = mpsc::channel(64);
        let stats = Arc::new(ChannelizerStats::new(1));
        let ch = Channelizer::new(&[100_050_000], 100_000_000, vec![tx], stats);

        let iq = tone_iq(50_000.0, BLOCK * 2);
        ch.run(std::io::Cursor::new(iq)).await;

        let mut all: Vec<i16> = Vec::new();
        while let Ok(pcm) = rx.try_recv() {
            all.extend(
                pcm.chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
        }
        assert!(!all.is_empty());
        // Skip the filter warm-up, then expect near-zero output.
        let tail = &all[all.len() / 2..];
        let mean: f64 =
            tail.iter().map(|&s| s as f64).sum::<f64>() / tail.len() as f64;
        assert!(mean.abs() < 500.0, "mean {mean}");
    }

    #[tokio::test]
    async fn slow_station_drops_blocks_without_stalling() {
        // Capacity-1 sink that is never drained: later blocks are dropped
        // and counted.
        let (tx, _rx) = mpsc::channel(1);
        let stats = Arc::new(ChannelizerStats::new(1));
        let ch = Channelizer::new(&[100_000_000], 100_000_000, vec![tx], stats.clone());

        let iq = tone_iq(10_000.0, BLOCK * 4);
        ch.run(std::io::Cursor::new(iq)).await;

        assert!(stats.total_drops() >= 2);
    }

    #[tokio::test]
    async fn odd_read_resyncs() {
        // An odd-length stream still produces output; one byte is discarded.
        let (tx, mut rx) = mpsc::channel(64);
        let stats = Arc::new(ChannelizerStats::new(1));
        let ch = Channelizer::new(&[100_000_000], 100_000_000, vec![tx], stats);

        let mut iq = tone_iq(10_000.0, BLOCK + 8);
        iq.remove(0);
        ch.run(std::io::Cursor::new(iq)).await;

        let mut samples = 0usize;
        while let Ok(pcm) = rx.try_recv() {
            samples += pcm.len() / 2;
        }
        assert!(samples > 0);
    }
}

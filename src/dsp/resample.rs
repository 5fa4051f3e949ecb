//! Polyphase resampler: 171 kHz capture PCM → 16 kHz for speech-to-text.
//!
//! 16 000 / 171 000 reduces to L/M = 16/171, an exact integer ratio for the
//! nominal capture rate. One Kaiser-windowed sinc prototype is split into
//! L phases; each output sample is a single phase dot product.

use crate::dsp::filter::kaiser_window;

/// Interpolation factor.
const UP: usize = 16;

/// Decimation factor.
const DOWN: usize = 171;

/// Prototype taps per polyphase branch.
const TAPS_PER_PHASE: usize = 32;

fn prototype() -> Vec<f32> {
    let ntaps = UP * TAPS_PER_PHASE;
    // Cutoff just inside the 8 kHz output Nyquist, in the upsampled domain.
    let fc = 0.45 / DOWN as f64;
    let mid = (ntaps - 1) as f64 / 2.0;
    let window = kaiser_window(ntaps, 8.0);
    let mut taps: Vec<f64> = (0..ntaps)
        .map(|n| {
            let t = n as f64 - mid;
            let s = if t == 0.0 {
                2.0 * fc
            } else {
                (2.0 * std::f64::consts::PI * fc * t).sin() / (std::f64::consts::PI * t)
            };
            s * window[n]
        })
        .collect();
    // Unity DC gain after interpolation.
    let sum: f64 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t *= UP as f64 / sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Resample signed-16-bit mono PCM from the capture rate down to 16 kHz.
pub fn resample_to_16k(input: &[i16]) -> Vec<i16> {
    if input.is_empty() {
        return Vec::new();
    }
    let taps = prototype();
    let out_len = input.len() * UP / DOWN;
    let mut out = Vec::with_capacity(out_len);

    for k in 0..out_len {
        // Position of output sample k in the upsampled stream.
        let u = k * DOWN;
        let phase = u % UP;
        let base = u / UP;
        let mut acc = 0.0f32;
        for j in 0..TAPS_PER_PHASE {
            let Some(idx) = base.checked_sub(j) else {
                break;
            };
            acc += taps[phase + j * UP] * input[idx] as f32;
        }
        out.push(acc.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_follows_ratio() {
        let input = vec![0i16; 171_000]; // one second
        let out = resample_to_16k(&input);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample_to_16k(&[]).is_empty());
    }

    #[test]
    fn dc_level_is_preserved() {
        let input = vec![10_000i16; 171_000];
        let out = resample_to_16k(&input);
        // Ignore the filter warm-up at the start.
        let tail = &out[out.len() / 2..];
        let mean: f64 = tail.iter().map(|&s| s as f64).sum::<f64>() / tail.len() as f64;
        assert!((mean - 10_000.0).abs() < 150.0, "mean {mean}");
    }

    #[test]
    fn low_tone_survives_resampling() {
        // A 1 kHz tone is far below the new Nyquist and keeps its amplitude.
        let input: Vec<i16> = (0..171_000)
            .map(|n| {
                let ph = 2.0 * std::f64::consts::PI * 1000.0 * n as f64 / 171_000.0;
                (ph.sin() * 10_000.0) as i16
            })
            .collect();
        let out = resample_to_16k(&input);
        let tail = &out[out.len() / 2..];
        let peak = tail.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
        assert!(peak > 8_000 && peak < 12_000, "peak {peak}");
    }
}

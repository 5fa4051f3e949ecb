//! FIR low-pass design and the multiply-accumulate primitive.
//!
//! Filters are designed once at startup (Kaiser-windowed sinc) and applied
//! with a plain dot product against a sample history slice. The taps are
//! symmetric, so no reversal is needed for convolution.

use num_complex::Complex;

/// Zeroth-order modified Bessel function of the first kind.
///
/// Power series; converges in a handful of terms for the beta values used
/// here.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..32 {
        term *= (half_x / k as f64) * (half_x / k as f64);
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }
    sum
}

/// Kaiser window of length `ntaps` with shape parameter `beta`.
pub fn kaiser_window(ntaps: usize, beta: f64) -> Vec<f64> {
    let denom = bessel_i0(beta);
    let m = (ntaps - 1) as f64;
    (0..ntaps)
        .map(|n| {
            let r = 2.0 * n as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - r * r).sqrt()) / denom
        })
        .collect()
}

/// Kaiser-windowed sinc low-pass filter, normalized to unity DC gain.
///
/// `cutoff_hz` is the single-sided passband edge at sample rate `fs`.
pub fn lowpass(cutoff_hz: f64, fs: f64, ntaps: usize, beta: f64) -> Vec<f32> {
    let fc = cutoff_hz / fs;
    let mid = (ntaps - 1) as f64 / 2.0;
    let window = kaiser_window(ntaps, beta);
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
    let sum: f64 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Dot product of real taps against a complex sample history.
///
/// `history` must be at least `taps.len()` long; the last element of the
/// slice is the most recent sample.
#[inline]
pub fn fir_complex(taps: &[f32], history: &[Complex<f32>]) -> Complex<f32> {
    debug_assert!(history.len() >= taps.len());
    let start = history.len() - taps.len();
    let mut acc = Complex::new(0.0f32, 0.0);
    for (h, x) in taps.iter().rev().zip(history[start..].iter()) {
        acc += *x * *h;
    }
    acc
}

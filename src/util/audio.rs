// Default sample rate (Hz) used throughout the pipeline.
// capture adapters report the real rate with every chunk, this exists
// mainly as a default during init and a fallback.
pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;

// decibel conversion constants/utils

// Floor value (dB) below which magnitudes are clamped.
pub const DB_FLOOR: f32 = -140.0;

// Minimum power value to avoid log(0) in dB conversions.
const POWER_EPSILON: f32 = 1.0e-20;

// Natural log to decibel conversion factor: 10 / ln(10) ~= 4.342944819.
const LN_TO_DB: f32 = 4.342_944_8;

// Convert power (magnitude squared) to decibels with a custom floor.
#[inline(always)]
pub fn power_to_db(power: f32, floor: f32) -> f32 {
    if power > POWER_EPSILON {
        (power.ln() * LN_TO_DB).max(floor)
    } else {
        floor
    }
}

// Convert frequency in Hz to mel scale.
#[inline(always)]
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

// Convert mel scale to frequency in Hz.
#[inline(always)]
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Average interleaved frames down to a single channel.
pub fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 0 || samples.is_empty() {
        return Vec::new();
    }

    if channels == 1 {
        return samples.to_vec();
    }

    let inv = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * inv)
        .collect()
}

#[inline]
pub fn apply_window(dst: &mut [f32], frame: &[f32], window: &[f32]) {
    debug_assert_eq!(dst.len(), window.len());
    debug_assert_eq!(frame.len(), window.len());
    for ((out, sample), coeff) in dst.iter_mut().zip(frame).zip(window) {
        *out = sample * coeff;
    }
}

// Per-bin power normalisation so a full-scale sine reads as unit power
// regardless of window shape. DC and Nyquist are not doubled.
pub fn compute_fft_bin_normalization(window: &[f32], fft_size: usize) -> Vec<f32> {
    let bins = fft_size / 2 + 1;
    if fft_size == 0 {
        return Vec::new();
    }

    let window_sum: f32 = window.iter().sum();
    let inv_sum = if window_sum.abs() > f32::EPSILON {
        1.0 / window_sum
    } else {
        1.0 / fft_size as f32
    };

    let dc_scale = inv_sum * inv_sum;
    let ac_scale = 4.0 * dc_scale;
    let mut norms = vec![ac_scale; bins];
    norms[0] = dc_scale;
    if bins > 1 {
        norms[bins - 1] = dc_scale;
    }
    norms
}

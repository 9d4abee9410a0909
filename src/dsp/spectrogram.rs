//! Spectrogram DSP implementation built on a short-time Fourier transform.
//!
//! A chunk of `length` samples starting at `start` is cut into frames of
//! `window_size` samples spaced `window_step_size` apart. Each frame is
//! windowed, transformed with a real FFT and reduced to the first
//! `window_size / 2` bins, which become one column of the output.
//!
//! Samples past the last full frame are left untouched: the caller keeps
//! them and prepends them to the next chunk (see [`trailing_samples`]).

use crate::error::{PipelineError, Result};
use crate::util::audio::{
    DB_FLOOR, DEFAULT_SAMPLE_RATE, apply_window, compute_fft_bin_normalization, power_to_db,
};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

pub const DEFAULT_WINDOW_SIZE: usize = 4096;
pub const DEFAULT_WINDOW_STEP_SIZE: usize = 1024;

/// Analysis parameters. Echoed back unchanged with every result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramOptions {
    pub window_size: usize,
    /// Hop between successive frames; overlap is `window_size - window_step_size`.
    pub window_step_size: usize,
    pub sample_rate: f32,
    pub is_start: bool,
    pub window: WindowKind,
    pub transfer: TransferFunction,
}

impl Default for SpectrogramOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            window_step_size: DEFAULT_WINDOW_STEP_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            is_start: false,
            window: WindowKind::Hann,
            transfer: TransferFunction::default(),
        }
    }
}

impl SpectrogramOptions {
    /// Bins per column.
    pub fn column_len(&self) -> usize {
        self.window_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        let size = self.window_size;
        let step = self.window_step_size;
        if size < 2 || size % 2 != 0 {
            return Err(PipelineError::invalid(format!(
                "window size {size} must be even and at least 2"
            )));
        }
        if step == 0 || step > size {
            return Err(PipelineError::invalid(format!(
                "window step {step} must be within 1..={size}"
            )));
        }
        if size % step != 0 {
            return Err(PipelineError::invalid(format!(
                "window step {step} does not evenly divide window size {size}"
            )));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(PipelineError::invalid(format!(
                "sample rate {} must be positive",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        let phase = |n: usize| (n as f32) * core::f32::consts::TAU / (len as f32);
        match self {
            WindowKind::Rectangular => vec![1.0; len],
            WindowKind::Hann => (0..len).map(|n| 0.5 * (1.0 - phase(n).cos())).collect(),
            WindowKind::Hamming => (0..len).map(|n| 0.54 - 0.46 * phase(n).cos()).collect(),
            WindowKind::Blackman => {
                let a0 = 0.42;
                let a1 = 0.5;
                let a2 = 0.08;
                (0..len)
                    .map(|n| {
                        let p = phase(n);
                        a0 - a1 * p.cos() + a2 * (2.0 * p).cos()
                    })
                    .collect()
            }
        }
    }
}

/// Maps normalised bin power (a full-scale sine reads as 1.0) to the value
/// stored in a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFunction {
    /// Linear amplitude, `sqrt(power)`.
    Magnitude,
    /// Linear power.
    Power,
    /// `10 * log10(power)`, clamped to `floor_db`.
    Decibel { floor_db: f32 },
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self::Decibel { floor_db: DB_FLOOR }
    }
}

impl TransferFunction {
    #[inline]
    pub fn apply(self, power: f32) -> f32 {
        match self {
            Self::Magnitude => power.sqrt(),
            Self::Power => power,
            Self::Decibel { floor_db } => power_to_db(power, floor_db),
        }
    }
}

/// Columns produced for one chunk, flattened column-major
/// (`window_count * options.column_len()` values).
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramResult {
    pub window_count: usize,
    pub options: SpectrogramOptions,
    pub columns: Vec<f32>,
}

impl SpectrogramResult {
    pub fn column_len(&self) -> usize {
        self.options.column_len()
    }

    pub fn column(&self, index: usize) -> Option<&[f32]> {
        let len = self.column_len();
        (index < self.window_count).then(|| &self.columns[index * len..(index + 1) * len])
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = &[f32]> {
        self.columns.chunks_exact(self.column_len().max(1))
    }
}

/// Number of frames that fit in `length` samples.
pub fn window_count(length: usize, window_size: usize, window_step_size: usize) -> usize {
    if window_size == 0 || window_step_size == 0 || length < window_size {
        0
    } else {
        (length - window_size) / window_step_size + 1
    }
}

/// Samples at the end of a chunk that were not covered by any frame.
pub fn trailing_samples(length: usize, window_size: usize, window_step_size: usize) -> usize {
    match window_count(length, window_size, window_step_size) {
        0 => length,
        count => length - ((count - 1) * window_step_size + window_size),
    }
}

/// One-shot analysis. Pooled workers keep a [`SpectrogramEngine`] instead so
/// the FFT plan and scratch space survive between chunks.
pub fn compute_spectrogram(
    samples: &[f32],
    start: usize,
    length: usize,
    options: SpectrogramOptions,
) -> Result<SpectrogramResult> {
    let mut engine = SpectrogramEngine::new(options.window_size, options.window)?;
    engine.compute(samples, start, length, options)
}

/// FFT plan, window and scratch buffers for one window size.
pub struct SpectrogramEngine {
    planner: RealFftPlanner<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    window_size: usize,
    window_kind: WindowKind,
    window: Vec<f32>,
    bin_norm: Vec<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for SpectrogramEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramEngine")
            .field("window_size", &self.window_size)
            .field("window_kind", &self.window_kind)
            .finish_non_exhaustive()
    }
}

impl SpectrogramEngine {
    pub fn new(window_size: usize, window_kind: WindowKind) -> Result<Self> {
        if window_size < 2 || window_size % 2 != 0 {
            return Err(PipelineError::invalid(format!(
                "window size {window_size} must be even and at least 2"
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);
        let window = window_kind.coefficients(window_size);
        Ok(Self {
            bin_norm: compute_fft_bin_normalization(&window, window_size),
            frame: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            planner,
            fft,
            window_size,
            window_kind,
            window,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn window_kind(&self) -> WindowKind {
        self.window_kind
    }

    /// Replans when the window size or shape differs from the current one.
    pub fn configure(&mut self, window_size: usize, window_kind: WindowKind) {
        if window_size != self.window_size {
            self.fft = self.planner.plan_fft_forward(window_size);
            self.frame = self.fft.make_input_vec();
            self.spectrum = self.fft.make_output_vec();
            self.scratch = self.fft.make_scratch_vec();
            self.window_size = window_size;
        } else if window_kind == self.window_kind && self.window.len() == window_size {
            return;
        }
        self.window_kind = window_kind;
        self.window = window_kind.coefficients(window_size);
        self.bin_norm = compute_fft_bin_normalization(&self.window, window_size);
    }

    pub fn compute(
        &mut self,
        samples: &[f32],
        start: usize,
        length: usize,
        options: SpectrogramOptions,
    ) -> Result<SpectrogramResult> {
        let mut columns = Vec::new();
        let window_count = self.compute_into(samples, start, length, options, &mut columns)?;
        Ok(SpectrogramResult {
            window_count,
            options,
            columns,
        })
    }

    /// Writes the columns into `columns` (resized to fit) and returns the
    /// window count. Nothing is written when validation fails.
    pub fn compute_into(
        &mut self,
        samples: &[f32],
        start: usize,
        length: usize,
        options: SpectrogramOptions,
        columns: &mut Vec<f32>,
    ) -> Result<usize> {
        let count = validate_chunk(samples.len(), start, length, &options)?;
        self.configure(options.window_size, options.window);

        let size = options.window_size;
        let step = options.window_step_size;
        let bins = options.column_len();
        trace!(
            "[engine] {count} windows from {length} samples at {start} (is_start={})",
            options.is_start
        );

        columns.clear();
        columns.resize(count * bins, 0.0);

        for (index, column) in columns.chunks_exact_mut(bins).enumerate() {
            let offset = start + index * step;
            apply_window(&mut self.frame, &samples[offset..offset + size], &self.window);
            self.fft
                .process_with_scratch(&mut self.frame, &mut self.spectrum, &mut self.scratch)
                .map_err(|err| PipelineError::invalid(format!("fft failed: {err}")))?;

            for ((value, bin), norm) in column.iter_mut().zip(&self.spectrum).zip(&self.bin_norm) {
                *value = options.transfer.apply(bin.norm_sqr() * norm);
            }
        }

        Ok(count)
    }
}

fn validate_chunk(
    available: usize,
    start: usize,
    length: usize,
    options: &SpectrogramOptions,
) -> Result<usize> {
    options.validate()?;
    if length < options.window_size {
        return Err(PipelineError::invalid(format!(
            "chunk of {length} samples is shorter than one {}-sample window",
            options.window_size
        )));
    }
    match start.checked_add(length) {
        Some(end) if end <= available => {}
        _ => {
            return Err(PipelineError::invalid(format!(
                "range {start}+{length} exceeds the {available}-sample buffer"
            )));
        }
    }
    Ok(window_count(length, options.window_size, options.window_step_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|n| (core::f32::consts::TAU * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    fn options(window_size: usize, window_step_size: usize, sample_rate: f32) -> SpectrogramOptions {
        SpectrogramOptions {
            window_size,
            window_step_size,
            sample_rate,
            ..SpectrogramOptions::default()
        }
    }

    #[test]
    fn detects_sine_frequency_peak() {
        let opts = options(1024, 512, 48_000.0);
        let freq = 1_000.0;
        let samples = sine(freq, opts.sample_rate, opts.window_size * 2);

        let result = compute_spectrogram(&samples, 0, samples.len(), opts).unwrap();
        assert_eq!(result.window_count, 3);

        let last = result.column(result.window_count - 1).unwrap();
        let bin_hz = opts.sample_rate / opts.window_size as f32;
        let max_index = last
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(idx, _)| idx)
            .unwrap();
        let peak_freq = max_index as f32 * bin_hz;
        assert!((peak_freq - freq).abs() < bin_hz * 1.5);
    }

    #[test]
    fn one_second_voice_chunk_yields_twelve_columns() {
        let opts = SpectrogramOptions {
            is_start: true,
            ..options(4096, 1024, 16_000.0)
        };
        let samples = sine(220.0, 16_000.0, 16_000);

        let result = compute_spectrogram(&samples, 0, samples.len(), opts).unwrap();
        assert_eq!(result.window_count, 12);
        assert_eq!(result.column_len(), 2048);
        assert_eq!(result.columns.len(), 12 * 2048);
        assert_eq!(result.options, opts);
        assert_eq!(result.iter_columns().count(), 12);
    }

    #[test]
    fn column_count_follows_hop_formula() {
        let opts = options(64, 16, 8_000.0);
        let samples = vec![0.25; 400];
        for length in [64, 65, 79, 80, 81, 200, 400] {
            let result = compute_spectrogram(&samples, 0, length, opts).unwrap();
            assert_eq!(result.window_count, (length - 64) / 16 + 1, "length {length}");
        }
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let opts = options(512, 128, 16_000.0);
        let samples: Vec<f32> = (0..3_000)
            .map(|n| ((n * 7919) % 1000) as f32 / 500.0 - 1.0)
            .collect();
        let mut engine = SpectrogramEngine::new(512, WindowKind::Hann).unwrap();
        let first = engine.compute(&samples, 100, 2_000, opts).unwrap();
        let second = engine.compute(&samples, 100, 2_000, opts).unwrap();
        let fresh = compute_spectrogram(&samples, 100, 2_000, opts).unwrap();

        let bits = |r: &SpectrogramResult| r.columns.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
        assert_eq!(bits(&first), bits(&fresh));
    }

    #[test]
    fn start_offset_selects_the_analysed_range() {
        let opts = options(256, 64, 16_000.0);
        let mut samples = vec![0.0; 256];
        samples.extend(sine(1_000.0, 16_000.0, 256));
        let offset = compute_spectrogram(&samples, 256, 256, opts).unwrap();
        let standalone = compute_spectrogram(&samples[256..], 0, 256, opts).unwrap();
        assert_eq!(offset.columns, standalone.columns);
    }

    #[test]
    fn short_chunk_is_rejected_without_columns() {
        let opts = options(4096, 1024, 16_000.0);
        let samples = vec![0.0; 4095];
        let mut engine = SpectrogramEngine::new(4096, WindowKind::Hann).unwrap();
        let mut columns = vec![1.0; 8];
        let err = engine
            .compute_into(&samples, 0, samples.len(), opts, &mut columns)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(columns, vec![1.0; 8]);
    }

    #[test]
    fn non_dividing_step_is_rejected() {
        let samples = vec![0.0; 8192];
        let err = compute_spectrogram(&samples, 0, 8192, options(4096, 1000, 16_000.0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let err = compute_spectrogram(&samples, 0, 8192, options(4096, 0, 16_000.0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn range_past_buffer_end_is_rejected() {
        let samples = vec![0.0; 1024];
        let err = compute_spectrogram(&samples, 512, 1024, options(256, 64, 16_000.0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn transfer_functions_scale_a_full_scale_sine() {
        let sample_rate = 8_000.0;
        let size = 256;
        // Bin-centred tone so the peak lands on a single bin.
        let freq = sample_rate * 16.0 / size as f32;
        let samples = sine(freq, sample_rate, size);

        let run = |transfer| {
            let opts = SpectrogramOptions {
                window: WindowKind::Rectangular,
                transfer,
                ..options(size, size, sample_rate)
            };
            compute_spectrogram(&samples, 0, size, opts).unwrap().columns[16]
        };

        assert!((run(TransferFunction::Power) - 1.0).abs() < 1.0e-3);
        assert!((run(TransferFunction::Magnitude) - 1.0).abs() < 1.0e-3);
        assert!(run(TransferFunction::Decibel { floor_db: -120.0 }).abs() < 0.01);
    }

    #[test]
    fn silence_sits_on_the_decibel_floor() {
        let opts = SpectrogramOptions {
            transfer: TransferFunction::Decibel { floor_db: -96.0 },
            ..options(128, 32, 16_000.0)
        };
        let result = compute_spectrogram(&[0.0; 256], 0, 256, opts).unwrap();
        assert!(result.columns.iter().all(|&v| v == -96.0));
    }

    #[test]
    fn engine_replans_for_new_window_size() {
        let mut engine = SpectrogramEngine::new(256, WindowKind::Hann).unwrap();
        let samples = vec![0.1; 2048];
        let result = engine.compute(&samples, 0, 2048, options(1024, 256, 16_000.0)).unwrap();
        assert_eq!(engine.window_size(), 1024);
        assert_eq!(result.column_len(), 512);
        assert_eq!(result.window_count, 5);
    }

    #[test]
    fn trailing_samples_counts_uncovered_tail() {
        assert_eq!(trailing_samples(16_000, 4096, 1024), 16_000 - (11 * 1024 + 4096));
        assert_eq!(trailing_samples(4096, 4096, 1024), 0);
        assert_eq!(trailing_samples(100, 4096, 1024), 100);
        assert_eq!(window_count(100, 4096, 1024), 0);
    }

    #[test]
    fn window_shapes_are_symmetric_about_centre() {
        for kind in [WindowKind::Hann, WindowKind::Hamming, WindowKind::Blackman] {
            let w = kind.coefficients(64);
            for n in 1..32 {
                assert!((w[n] - w[64 - n]).abs() < 1.0e-5, "{kind:?} at {n}");
            }
        }
    }
}

//! Contract between a spectrogram pane and whatever draws it.
//!
//! The pane pushes parameter changes and linearised buffer snapshots; the
//! renderer owns all texture and shader state. [`RecordingRenderer`] is a
//! headless implementation that keeps the last upload in memory.

use super::column_buffer::{ColumnBuffer, ColumnView};
use super::viewport::DEFAULT_ZOOM;
use crate::dsp::spectrogram::DEFAULT_WINDOW_SIZE;
use crate::util::audio::{DEFAULT_SAMPLE_RATE, hz_to_mel, mel_to_hz};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SPECTROGRAM_PALETTE_SIZE: usize = 5;
pub const DEFAULT_MIN_FREQUENCY_HZ: f32 = 50.0;
pub const DEFAULT_MAX_FREQUENCY_HZ: f32 = 800.0;

const GRID_STEPS_HZ: [u32; 7] = [10, 25, 50, 100, 200, 500, 1000];
const MAX_GRID_LINES: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gradient {
    #[default]
    Heated,
    Grayscale,
    Ocean,
}

impl Gradient {
    /// RGBA stops, quietest first.
    pub fn stops(self) -> [[f32; 4]; SPECTROGRAM_PALETTE_SIZE] {
        match self {
            Gradient::Heated => [
                [0.000, 0.000, 0.000, 0.0],
                [0.218, 0.106, 0.332, 1.0],
                [0.609, 0.000, 0.000, 1.0],
                [1.000, 0.737, 0.353, 1.0],
                [1.000, 1.000, 1.000, 1.0],
            ],
            Gradient::Grayscale => [
                [0.00, 0.00, 0.00, 0.0],
                [0.25, 0.25, 0.25, 1.0],
                [0.50, 0.50, 0.50, 1.0],
                [0.75, 0.75, 0.75, 1.0],
                [1.00, 1.00, 1.00, 1.0],
            ],
            Gradient::Ocean => [
                [0.000, 0.000, 0.000, 0.0],
                [0.020, 0.110, 0.300, 1.0],
                [0.000, 0.380, 0.600, 1.0],
                [0.300, 0.780, 0.800, 1.0],
                [0.900, 1.000, 0.950, 1.0],
            ],
        }
    }
}

/// Vertical frequency axis mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyScale {
    #[default]
    Linear,
    Logarithmic,
    Mel,
}

impl FrequencyScale {
    /// Frequency at normalised height `t` (0 = `min_hz`, 1 = `max_hz`).
    pub fn freq_at(self, min_hz: f32, max_hz: f32, t: f32) -> f32 {
        match self {
            FrequencyScale::Linear => min_hz + (max_hz - min_hz) * t,
            FrequencyScale::Logarithmic => {
                let (lo, hi) = (min_hz.max(1.0).log10(), max_hz.max(1.0).log10());
                10f32.powf(lo + (hi - lo) * t)
            }
            FrequencyScale::Mel => {
                let (lo, hi) = (hz_to_mel(min_hz), hz_to_mel(max_hz));
                mel_to_hz(lo + (hi - lo) * t)
            }
        }
    }

    /// Normalised height of `hz`, clamped to `[0, 1]`.
    pub fn pos_of(self, min_hz: f32, max_hz: f32, hz: f32) -> f32 {
        let hz = hz.clamp(min_hz, max_hz);
        let ratio = |lo: f32, hi: f32, v: f32| (v - lo) / (hi - lo).max(f32::EPSILON);
        match self {
            FrequencyScale::Linear => ratio(min_hz, max_hz, hz),
            FrequencyScale::Logarithmic => ratio(
                min_hz.max(1.0).log10(),
                max_hz.max(1.0).log10(),
                hz.max(1.0).log10(),
            ),
            FrequencyScale::Mel => ratio(hz_to_mel(min_hz), hz_to_mel(max_hz), hz_to_mel(hz)),
        }
        .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParameters {
    pub window_size: usize,
    pub sample_rate: f32,
    pub view_offset: f32,
    pub zoom: f32,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,
    pub gradient: Gradient,
    pub scale: FrequencyScale,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            view_offset: 0.0,
            zoom: DEFAULT_ZOOM,
            min_frequency_hz: DEFAULT_MIN_FREQUENCY_HZ,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
            gradient: Gradient::default(),
            scale: FrequencyScale::default(),
        }
    }
}

impl RenderParameters {
    /// Applies the keys present in `update`; returns whether anything changed.
    pub fn apply(&mut self, update: &RenderParametersUpdate) -> bool {
        let before = *self;
        macro_rules! take {
            ($($field:ident),+) => {
                $(if let Some(value) = update.$field { self.$field = value; })+
            };
        }
        take!(
            window_size,
            sample_rate,
            view_offset,
            zoom,
            min_frequency_hz,
            max_frequency_hz,
            gradient,
            scale
        );
        *self != before
    }

    /// Rows of the column that fall inside the displayed frequency range.
    pub fn visible_bins(&self) -> std::ops::Range<usize> {
        let bins = self.window_size / 2;
        if bins == 0 || self.sample_rate <= 0.0 {
            return 0..0;
        }
        let bin_hz = self.sample_rate / self.window_size as f32;
        let lo = ((self.min_frequency_hz / bin_hz).floor().max(0.0) as usize).min(bins);
        let hi = ((self.max_frequency_hz / bin_hz).ceil().max(0.0) as usize + 1).min(bins);
        lo..hi.max(lo)
    }
}

/// Partial parameter update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParametersUpdate {
    pub window_size: Option<usize>,
    pub sample_rate: Option<f32>,
    pub view_offset: Option<f32>,
    pub zoom: Option<f32>,
    pub min_frequency_hz: Option<f32>,
    pub max_frequency_hz: Option<f32>,
    pub gradient: Option<Gradient>,
    pub scale: Option<FrequencyScale>,
}

impl RenderParametersUpdate {
    pub fn view_offset(offset: f32) -> Self {
        Self {
            view_offset: Some(offset),
            ..Self::default()
        }
    }

    pub fn touches_frequency_range(&self) -> bool {
        self.min_frequency_hz.is_some() || self.max_frequency_hz.is_some()
    }
}

/// Immutable, time-ordered view of a pane's buffer for one upload.
#[derive(Debug, Clone, Copy)]
pub struct BufferSnapshot<'a> {
    pub columns: ColumnView<'a>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub total_written: u64,
}

impl<'a> BufferSnapshot<'a> {
    pub fn of(buffer: &'a ColumnBuffer) -> Self {
        Self {
            columns: buffer.linearize(),
            width: buffer.width(),
            height: buffer.height(),
            channels: buffer.channels(),
            total_written: buffer.total_written(),
        }
    }
}

pub trait SpectrogramRenderer {
    fn update_parameters(&mut self, update: &RenderParametersUpdate);

    /// Pushes buffer contents. `force_full_upload` asks the renderer to drop
    /// any incremental state, e.g. after a clear.
    fn update_spectrogram(&mut self, snapshot: &BufferSnapshot<'_>, force_full_upload: bool);

    fn render(&mut self);

    fn resize(&mut self, _width: f32, _height: f32) {}
}

/// Headless renderer that records what it was given.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    pub parameters: RenderParameters,
    pub texture: Vec<f32>,
    pub texture_columns: usize,
    pub uploads: usize,
    pub full_uploads: usize,
    pub frames: usize,
    pub size: (f32, f32),
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpectrogramRenderer for RecordingRenderer {
    fn update_parameters(&mut self, update: &RenderParametersUpdate) {
        self.parameters.apply(update);
    }

    fn update_spectrogram(&mut self, snapshot: &BufferSnapshot<'_>, force_full_upload: bool) {
        self.texture.clear();
        self.texture.extend_from_slice(snapshot.columns.segments().0);
        self.texture.extend_from_slice(snapshot.columns.segments().1);
        self.texture_columns = snapshot.columns.len();
        self.uploads += 1;
        if force_full_upload {
            self.full_uploads += 1;
        }
        debug!(
            "[render] upload {} columns of {} (full={force_full_upload})",
            self.texture_columns, snapshot.width
        );
    }

    fn render(&mut self) {
        self.frames += 1;
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.size = (width, height);
    }
}

/// Horizontal guide line for the frequency overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub hz: u32,
    /// Height from the bottom edge, `0..1`.
    pub fraction: f32,
    pub label: String,
}

/// Guide lines at a round step chosen so at most ten fit in the range.
pub fn frequency_grid(min_hz: f32, max_hz: f32, scale: FrequencyScale) -> Vec<GridLine> {
    let range = max_hz - min_hz;
    if !range.is_finite() || range <= 0.0 {
        return Vec::new();
    }

    // Past the table, fall back to whole kHz steps.
    let step = GRID_STEPS_HZ
        .iter()
        .copied()
        .find(|&s| range / s as f32 <= MAX_GRID_LINES)
        .unwrap_or_else(|| ((range / MAX_GRID_LINES / 1000.0).ceil() as u32).saturating_mul(1000));

    let Some(first) = ((min_hz / step as f32).ceil().max(0.0) as u32).checked_mul(step) else {
        return Vec::new();
    };
    (0u32..)
        .map_while(|i| i.checked_mul(step).and_then(|offset| first.checked_add(offset)))
        .take_while(|&hz| (hz as f32) < max_hz)
        .map(|hz| GridLine {
            hz,
            fraction: scale.pos_of(min_hz, max_hz, hz as f32),
            label: format!("{hz} Hz"),
        })
        .collect()
}

//! Persisted pipeline configuration.
//!
//! Stored as pretty JSON under `$XDG_CONFIG_HOME/shengpu/settings.json`.
//! Missing keys take their defaults; out-of-range values are pulled back
//! into range on load and before every save.

use crate::dsp::spectrogram::{
    DEFAULT_WINDOW_SIZE, DEFAULT_WINDOW_STEP_SIZE, SpectrogramOptions, TransferFunction, WindowKind,
};
use crate::ui::pane::PaneGeometry;
use crate::ui::render::{
    DEFAULT_MAX_FREQUENCY_HZ, DEFAULT_MIN_FREQUENCY_HZ, FrequencyScale, Gradient,
    RenderParametersUpdate,
};
use crate::ui::viewport::{DEFAULT_ZOOM, MAX_ZOOM, MIN_ZOOM};
use crate::worker::pool::MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const MAX_WINDOW_SIZE: usize = 1 << 16;
const MAX_BUFFER_WIDTH_MULTIPLIER: usize = 16;
const MIN_TEXTURE_SIZE: usize = 256;
const MAX_TEXTURE_SIZE: usize = 16_384;
/// Nyquist of a 96 kHz stream.
const MAX_DISPLAY_FREQUENCY_HZ: f32 = 48_000.0;

pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shengpu")
}

pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub window_size: usize,
    pub window_step_size: usize,
    pub window: WindowKind,
    pub transfer: TransferFunction,
    pub max_workers: usize,
    pub buffer_width_multiplier: usize,
    pub max_texture_size: usize,
    pub canvas_width: f32,
    pub canvas_height: f32,
    pub zoom: f32,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,
    pub gradient: Gradient,
    pub scale: FrequencyScale,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            window_step_size: DEFAULT_WINDOW_STEP_SIZE,
            window: WindowKind::default(),
            transfer: TransferFunction::default(),
            max_workers: MAX_WORKERS,
            buffer_width_multiplier: 4,
            max_texture_size: 4096,
            canvas_width: 800.0,
            canvas_height: 400.0,
            zoom: DEFAULT_ZOOM,
            min_frequency_hz: DEFAULT_MIN_FREQUENCY_HZ,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
            gradient: Gradient::default(),
            scale: FrequencyScale::default(),
        }
    }
}

impl PipelineSettings {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.window_size < 2 || self.window_size % 2 != 0 || self.window_size > MAX_WINDOW_SIZE {
            self.window_size = defaults.window_size;
        }
        let step = self.window_step_size;
        if step == 0 || step > self.window_size || self.window_size % step != 0 {
            self.window_step_size = if self.window_size % 4 == 0 {
                self.window_size / 4
            } else {
                self.window_size / 2
            };
        }
        if let TransferFunction::Decibel { floor_db } = &mut self.transfer {
            if !floor_db.is_finite() || *floor_db >= 0.0 {
                *floor_db = crate::util::audio::DB_FLOOR;
            }
        }

        self.max_workers = self.max_workers.clamp(1, MAX_WORKERS);
        self.buffer_width_multiplier = self
            .buffer_width_multiplier
            .clamp(1, MAX_BUFFER_WIDTH_MULTIPLIER);
        self.max_texture_size = self
            .max_texture_size
            .clamp(MIN_TEXTURE_SIZE, MAX_TEXTURE_SIZE);

        for (value, default) in [
            (&mut self.canvas_width, defaults.canvas_width),
            (&mut self.canvas_height, defaults.canvas_height),
        ] {
            if !value.is_finite() || *value < 1.0 {
                *value = default;
            }
        }
        self.zoom = if self.zoom.is_finite() {
            self.zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            defaults.zoom
        };

        let (min, max) = (
            self.min_frequency_hz,
            self.max_frequency_hz.min(MAX_DISPLAY_FREQUENCY_HZ),
        );
        self.max_frequency_hz = max;
        if !(min.is_finite() && max.is_finite() && min >= 0.0 && max > min) {
            self.min_frequency_hz = defaults.min_frequency_hz;
            self.max_frequency_hz = defaults.max_frequency_hz;
        }
    }

    pub fn analysis_options(&self, sample_rate: f32) -> SpectrogramOptions {
        SpectrogramOptions {
            window_size: self.window_size,
            window_step_size: self.window_step_size,
            sample_rate,
            is_start: false,
            window: self.window,
            transfer: self.transfer,
        }
    }

    pub fn pane_geometry(&self) -> PaneGeometry {
        PaneGeometry {
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            buffer_width_multiplier: self.buffer_width_multiplier,
            max_texture_size: self.max_texture_size,
            zoom: self.zoom,
        }
    }

    /// Display keys that are not owned by the pane geometry.
    pub fn display_update(&self) -> RenderParametersUpdate {
        RenderParametersUpdate {
            min_frequency_hz: Some(self.min_frequency_hz),
            max_frequency_hz: Some(self.max_frequency_hz),
            gradient: Some(self.gradient),
            scale: Some(self.scale),
            ..RenderParametersUpdate::default()
        }
    }
}

#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    pub data: PipelineSettings,
}

impl SettingsManager {
    /// Reads `path`, falling back to defaults when it is missing or malformed.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data: PipelineSettings = fs::read_to_string(&path)
            .ok()
            .and_then(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        data.sanitize();
        debug!("[settings] loaded {path:?}");
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.data
    }

    pub fn update<F: FnOnce(&mut PipelineSettings) -> R, R>(&mut self, mutate: F) -> R {
        let result = mutate(&mut self.data);
        self.data.sanitize();
        result
    }

    /// Writes through a temporary file so a crash never leaves a torn file.
    pub fn save(&mut self) -> io::Result<()> {
        self.data.sanitize();
        let json = serde_json::to_string_pretty(&self.data).map_err(io::Error::other)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;
        debug!("[settings] saved {:?}", self.path);
        Ok(())
    }
}

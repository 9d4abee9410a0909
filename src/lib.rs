//! Streaming spectrogram pipeline.
//!
//! Capture adapters ([`audio`]) cut mono audio into overlapping chunks and
//! hand them to a bounded worker pool ([`worker::pool`]) that runs the STFT
//! engine ([`dsp::spectrogram`]). Results land in a fixed-width ring of
//! columns per pane ([`ui::pane`]), which a renderer draws through a
//! scrollable, zoomable viewport.

pub mod audio;
pub mod dsp;
pub mod error;
pub mod settings;
pub mod ui;
pub mod util;
pub mod worker;

pub use error::{PipelineError, Result};

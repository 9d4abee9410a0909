//! Messages exchanged with pooled analysis workers and the kernel they run.
//!
//! Buffers travel by value: a request moves the caller's sample allocation
//! into the worker and a successful response moves it back alongside the
//! freshly produced column buffer.

pub mod pool;

use crate::dsp::SampleChunk;
use crate::dsp::spectrogram::{SpectrogramEngine, SpectrogramOptions};
use crate::error::PipelineError;

pub const ACTION_COMPUTE_SPECTROGRAM: &str = "computeSpectrogram";

#[derive(Debug)]
pub enum WorkerRequest {
    ComputeSpectrogram(ComputePayload),
}

impl WorkerRequest {
    pub fn compute(chunk: SampleChunk, options: SpectrogramOptions) -> Self {
        let options = chunk.options_from(options);
        Self::ComputeSpectrogram(ComputePayload {
            samples: chunk.samples,
            samples_start: chunk.start,
            samples_length: chunk.length,
            options,
        })
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::ComputeSpectrogram(_) => ACTION_COMPUTE_SPECTROGRAM,
        }
    }
}

#[derive(Debug)]
pub struct ComputePayload {
    pub samples: Vec<f32>,
    pub samples_start: usize,
    pub samples_length: usize,
    pub options: SpectrogramOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeOutput {
    pub window_count: usize,
    pub options: SpectrogramOptions,
    pub columns: Vec<f32>,
    /// The request's sample buffer, returned for reuse.
    pub input: Vec<f32>,
}

pub type WorkerResponse = Result<ComputeOutput, PipelineError>;

/// Work executed inside one pooled worker. Each worker owns its kernel
/// exclusively and runs at most one request at a time.
pub trait Kernel: Send + 'static {
    fn handle(&mut self, request: WorkerRequest) -> WorkerResponse;

    /// Called after `handle` panicked, before the worker takes new work.
    fn recover(&mut self) {}
}

/// Production kernel: one spectrogram engine whose FFT plan and scratch
/// buffers persist across requests.
#[derive(Debug, Default)]
pub struct SpectrogramKernel {
    engine: Option<SpectrogramEngine>,
}

impl SpectrogramKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans ahead of the first request so the allocation happens at pool start.
    pub fn preloaded(options: &SpectrogramOptions) -> Self {
        Self {
            engine: SpectrogramEngine::new(options.window_size, options.window).ok(),
        }
    }

    fn engine_for(&mut self, options: &SpectrogramOptions) -> Result<&mut SpectrogramEngine, PipelineError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => SpectrogramEngine::new(options.window_size, options.window)?,
        };
        Ok(self.engine.insert(engine))
    }
}

impl Kernel for SpectrogramKernel {
    fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::ComputeSpectrogram(payload) => {
                let ComputePayload {
                    samples,
                    samples_start,
                    samples_length,
                    options,
                } = payload;
                options.validate()?;
                let mut columns = Vec::new();
                let window_count = self.engine_for(&options)?.compute_into(
                    &samples,
                    samples_start,
                    samples_length,
                    options,
                    &mut columns,
                )?;
                Ok(ComputeOutput {
                    window_count,
                    options,
                    columns,
                    input: samples,
                })
            }
        }
    }

    fn recover(&mut self) {
        self.engine = None;
    }
}

pub mod spectrogram;

use spectrogram::SpectrogramOptions;

/// A run of mono samples handed from a capture adapter to the analysis pipeline.
///
/// The chunk owns its sample storage. Submitting it to a worker moves the
/// allocation; the worker hands the same allocation back with its result.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    pub samples: Vec<f32>,
    /// Offset into `samples` where analysis begins.
    pub start: usize,
    /// Number of samples to analyse from `start`.
    pub length: usize,
    pub sample_rate: f32,
    /// First chunk of a capture session.
    pub is_start: bool,
}

impl SampleChunk {
    pub fn new(samples: Vec<f32>, start: usize, length: usize, sample_rate: f32, is_start: bool) -> Self {
        Self {
            samples,
            start,
            length,
            sample_rate,
            is_start,
        }
    }

    /// Chunk covering the whole buffer.
    pub fn whole(samples: Vec<f32>, sample_rate: f32, is_start: bool) -> Self {
        let length = samples.len();
        Self::new(samples, 0, length, sample_rate, is_start)
    }

    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    /// Options for analysing this chunk: the chunk's own rate and start flag
    /// override whatever the template carries.
    pub fn options_from(&self, template: SpectrogramOptions) -> SpectrogramOptions {
        SpectrogramOptions {
            sample_rate: self.sample_rate,
            is_start: self.is_start,
            ..template
        }
    }
}

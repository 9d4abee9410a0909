//! Paced analysis of a decoded clip while it plays.
//!
//! Every tick analyses whatever audio the playhead has passed since the last
//! chunk, rounded up to whole windows. The clip's sample buffer itself is
//! handed to the worker and handed back with the result, so there is never
//! more than one chunk in flight.

use super::CaptureState;
use super::session::SessionToken;
use crate::dsp::SampleChunk;
use crate::dsp::spectrogram::SpectrogramOptions;
use crate::error::{PipelineError, Result};
use crate::ui::pane::{Completion, InFlight, SpectrogramPane};
use crate::ui::render::SpectrogramRenderer;
use crate::worker::pool::Dispatcher;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct FilePlayback {
    samples: Option<Vec<f32>>,
    total: usize,
    sample_rate: f32,
    window_size: usize,
    step: usize,
    interval: Duration,
    started_at: Option<Instant>,
    next_tick: Option<Instant>,
    next_sample: usize,
    session: Option<SessionToken>,
    in_flight: Option<InFlight>,
    /// Chunk still with a worker after `stop`; holds the clip buffer.
    reclaim: Option<InFlight>,
    submitted_any: bool,
    state: CaptureState,
}

impl FilePlayback {
    pub fn new(samples: Vec<f32>, sample_rate: f32, options: &SpectrogramOptions) -> Result<Self> {
        let options = SpectrogramOptions {
            sample_rate,
            ..*options
        };
        options.validate()?;
        let interval =
            Duration::from_secs_f64(options.window_step_size as f64 / sample_rate as f64 / 2.0);
        Ok(Self {
            total: samples.len(),
            samples: Some(samples),
            sample_rate,
            window_size: options.window_size,
            step: options.window_step_size,
            interval,
            started_at: None,
            next_tick: None,
            next_sample: 0,
            session: None,
            in_flight: None,
            reclaim: None,
            submitted_any: false,
            state: CaptureState::Idle,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total as f64 / self.sample_rate as f64)
    }

    /// Time between analysis ticks: half a hop.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start of the first window not yet analysed.
    pub fn next_sample(&self) -> usize {
        self.next_sample
    }

    pub fn is_awaiting_analysis(&self) -> bool {
        self.in_flight.is_some()
    }

    /// When the next tick should run. `None` while a result is outstanding
    /// or playback is not running.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        self.next_tick.filter(|_| self.state.is_running())
    }

    /// Hands the clip back, waiting for a chunk left with a worker by `stop`.
    /// `None` if a worker failed while holding it.
    pub fn into_samples(mut self) -> Option<Vec<f32>> {
        self.reclaim_clip(true);
        self.samples
    }

    /// Recovers the clip from a chunk abandoned by `stop`. Results are never
    /// applied to a pane from here.
    fn reclaim_clip(&mut self, block: bool) {
        let Some(pending) = self.reclaim.take() else {
            return;
        };
        let response = if block {
            pending.wait()
        } else {
            match pending.try_take() {
                Some(response) => response,
                None => {
                    self.reclaim = Some(pending);
                    return;
                }
            }
        };
        match response {
            Ok(output) => self.samples = Some(output.input),
            Err(err) => warn!("[playback] clip buffer lost with abandoned chunk: {err}"),
        }
    }

    pub fn start<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
        now: Instant,
    ) -> Result<SessionToken> {
        if let (CaptureState::Running, Some(token)) = (self.state, self.session) {
            return Ok(token);
        }
        self.reclaim_clip(true);
        if self.samples.is_none() {
            return Err(PipelineError::invalid("clip buffer was lost to a failed analysis"));
        }
        let token = pane.begin_session();
        self.session = Some(token);
        self.started_at = Some(now);
        self.next_tick = Some(now);
        self.next_sample = 0;
        self.submitted_any = false;
        self.state = CaptureState::Running;
        info!(
            "[playback] {:.2}s at {} Hz into {}",
            self.duration().as_secs_f64(),
            self.sample_rate,
            pane.label()
        );
        Ok(token)
    }

    /// Advances playback to `now`: collects a finished chunk or, when the
    /// tick is due, submits the audio played since the last one.
    ///
    /// On error playback stops itself before returning.
    pub fn tick<R: SpectrogramRenderer>(
        &mut self,
        now: Instant,
        pane: &mut SpectrogramPane<R>,
        dispatcher: &Dispatcher,
    ) -> Result<CaptureState> {
        if !self.state.is_running() {
            self.reclaim_clip(false);
            return Ok(self.state);
        }

        if let Some(in_flight) = &self.in_flight {
            let Some(result) = pane.poll(in_flight) else {
                return Ok(self.state);
            };
            self.in_flight = None;
            match result {
                Ok(completion) => {
                    if let Completion::Applied { columns, .. } = &completion {
                        debug!("[playback] +{columns} columns");
                    }
                    self.samples = completion.into_input();
                }
                Err(err) => return Err(self.fail(pane, err)),
            }
            return Ok(self.schedule(now));
        }

        if self.next_tick.is_some_and(|due| now < due) {
            return Ok(self.state);
        }

        let elapsed = self.elapsed(now);
        let played = elapsed.as_secs_f64() * self.sample_rate as f64;
        let windows = ((played - self.next_sample as f64) / self.window_size as f64).ceil();
        if windows > 0.0 {
            let wanted = windows as usize * self.window_size;
            let length = wanted.min(self.total.saturating_sub(self.next_sample));
            if length >= self.window_size {
                self.submit(length, pane, dispatcher)?;
                return Ok(self.state);
            }
        }
        Ok(self.schedule(now))
    }

    fn submit<R: SpectrogramRenderer>(
        &mut self,
        length: usize,
        pane: &mut SpectrogramPane<R>,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        let Some(token) = self.adopt_session(pane) else {
            return Ok(());
        };
        let Some(samples) = self.samples.take() else {
            let err = PipelineError::invalid("clip buffer was not returned by the worker");
            return Err(self.fail(pane, err));
        };
        let start = self.next_sample;
        let chunk = SampleChunk::new(samples, start, length, self.sample_rate, !self.submitted_any);
        match pane.submit(dispatcher, chunk, token) {
            Ok(in_flight) => {
                self.in_flight = Some(in_flight);
                self.submitted_any = true;
                self.next_sample = start + length - self.window_size + self.step;
                Ok(())
            }
            Err(err) => Err(self.fail(pane, err)),
        }
    }

    /// Follows the pane onto its current session after a clear, flagging the
    /// next chunk as a start. Stops quietly if another capture took the pane.
    fn adopt_session<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
    ) -> Option<SessionToken> {
        let token = self.session?;
        match pane.resume_session(token) {
            Some(current) if current == token => Some(token),
            Some(current) => {
                debug!(
                    "[playback] {} was cleared; continuing as session {} from sample {}",
                    pane.label(),
                    current.id(),
                    self.next_sample
                );
                self.session = Some(current);
                self.submitted_any = false;
                Some(current)
            }
            None => {
                debug!("[playback] session {} was superseded", token.id());
                self.stop(pane);
                None
            }
        }
    }

    /// Finishes once the playhead passed the end, else arms the next tick.
    fn schedule(&mut self, now: Instant) -> CaptureState {
        if self.elapsed(now) >= self.duration() {
            self.state = CaptureState::Finished;
            self.next_tick = None;
            self.session = None;
            info!("[playback] finished at sample {}", self.next_sample);
        } else {
            self.next_tick = Some(now + self.interval);
        }
        self.state
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Stops playback without waiting for an outstanding chunk. No chunk is
    /// applied after this returns; the clip buffer comes back on a later
    /// `tick` or `start`.
    pub fn stop<R: SpectrogramRenderer>(&mut self, pane: &mut SpectrogramPane<R>) {
        if !self.state.is_running() {
            return;
        }
        if let Some(token) = self.session.take() {
            pane.end_session(token);
        }
        self.reclaim = self.in_flight.take();
        self.next_tick = None;
        self.state = CaptureState::Stopped;
        info!("[playback] stopped at sample {}", self.next_sample);
    }

    fn fail<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
        err: PipelineError,
    ) -> PipelineError {
        warn!("[playback] analysis failed, stopping: {err}");
        self.stop(pane);
        err
    }
}

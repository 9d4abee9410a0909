//! Live capture adapter.
//!
//! The capture callback delivers blocks of arbitrary size. They are cut into
//! hop-sized blocks; once a full window's worth is buffered and nothing is
//! in flight, the blocks are merged into one chunk and all but the last
//! `window / hop - 1` are dropped, so the next chunk's first frame follows
//! the previous chunk's last frame by exactly one hop.

use super::CaptureState;
use super::session::SessionToken;
use crate::dsp::SampleChunk;
use crate::dsp::spectrogram::SpectrogramOptions;
use crate::error::{PipelineError, Result};
use crate::ui::pane::{Completion, InFlight, SpectrogramPane};
use crate::ui::render::SpectrogramRenderer;
use crate::worker::pool::Dispatcher;
use std::collections::VecDeque;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
pub struct MicrophoneAdapter {
    window_size: usize,
    step: usize,
    sample_rate: f32,
    partial: Vec<f32>,
    blocks: VecDeque<Vec<f32>>,
    spare: Option<Vec<f32>>,
    session: Option<SessionToken>,
    in_flight: Option<InFlight>,
    submitted_any: bool,
    state: CaptureState,
}

impl MicrophoneAdapter {
    pub fn new(options: &SpectrogramOptions, sample_rate: f32) -> Result<Self> {
        let options = SpectrogramOptions {
            sample_rate,
            ..*options
        };
        options.validate()?;
        Ok(Self {
            window_size: options.window_size,
            step: options.window_step_size,
            sample_rate,
            partial: Vec::with_capacity(options.window_step_size),
            blocks: VecDeque::new(),
            spare: None,
            session: None,
            in_flight: None,
            submitted_any: false,
            state: CaptureState::Idle,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn is_awaiting_analysis(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hop-sized blocks waiting to be merged.
    pub fn buffered_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn blocks_per_window(&self) -> usize {
        self.window_size / self.step
    }

    /// Opens a session on `pane`. Calling it while running keeps the
    /// current session.
    pub fn start<R: SpectrogramRenderer>(&mut self, pane: &mut SpectrogramPane<R>) -> SessionToken {
        if let (CaptureState::Running, Some(token)) = (self.state, self.session) {
            return token;
        }
        self.partial.clear();
        self.blocks.clear();
        self.in_flight = None;
        self.submitted_any = false;
        let token = pane.begin_session();
        self.session = Some(token);
        self.state = CaptureState::Running;
        info!(
            "[microphone] recording at {} Hz into {}",
            self.sample_rate,
            pane.label()
        );
        token
    }

    /// Accepts captured mono samples. Ignored unless running.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.state.is_running() {
            trace!("[microphone] dropping {} samples while stopped", samples.len());
            return;
        }
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.step - self.partial.len()).min(rest.len());
            self.partial.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.partial.len() == self.step {
                let block = std::mem::replace(&mut self.partial, Vec::with_capacity(self.step));
                self.blocks.push_back(block);
            }
        }
    }

    /// Collects a finished analysis and submits the next chunk if enough
    /// blocks are buffered. Returns the number of columns appended.
    ///
    /// On error the adapter stops itself before returning.
    pub fn pump<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
        dispatcher: &Dispatcher,
    ) -> Result<usize> {
        if !self.state.is_running() {
            return Ok(0);
        }

        let mut appended = 0;
        if let Some(in_flight) = &self.in_flight {
            let Some(result) = pane.poll(in_flight) else {
                return Ok(0);
            };
            self.in_flight = None;
            match result {
                Ok(completion) => {
                    if let Completion::Applied { columns, .. } = &completion {
                        appended = *columns;
                    }
                    self.spare = completion.into_input();
                }
                Err(err) => return Err(self.fail(pane, err)),
            }
        }

        if self.blocks.len() >= self.blocks_per_window() {
            self.submit(pane, dispatcher)?;
        }
        Ok(appended)
    }

    fn submit<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        let Some(token) = self.adopt_session(pane) else {
            return Ok(());
        };

        let mut merged = self.spare.take().unwrap_or_default();
        merged.clear();
        for block in &self.blocks {
            merged.extend_from_slice(block);
        }
        let keep = self.blocks_per_window() - 1;
        let spent = self.blocks.len() - keep;
        self.blocks.drain(..spent);

        let chunk = SampleChunk::whole(merged, self.sample_rate, !self.submitted_any);
        debug!(
            "[microphone] chunk of {} samples, keeping {keep} blocks",
            chunk.length
        );
        match pane.submit(dispatcher, chunk, token) {
            Ok(in_flight) => {
                self.in_flight = Some(in_flight);
                self.submitted_any = true;
                Ok(())
            }
            Err(err) => Err(self.fail(pane, err)),
        }
    }

    /// Follows the pane onto its current session after a clear. The first
    /// chunk of the new session is flagged as a start. Stops quietly when the
    /// pane has been handed to another capture.
    fn adopt_session<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
    ) -> Option<SessionToken> {
        let token = self.session?;
        match pane.resume_session(token) {
            Some(current) if current == token => Some(token),
            Some(current) => {
                debug!(
                    "[microphone] {} was cleared; continuing as session {}",
                    pane.label(),
                    current.id()
                );
                self.session = Some(current);
                self.submitted_any = false;
                Some(current)
            }
            None => {
                debug!("[microphone] session {} was superseded", token.id());
                self.stop(pane);
                None
            }
        }
    }

    /// Stops capture. Safe to call repeatedly; an outstanding result is
    /// never applied.
    pub fn stop<R: SpectrogramRenderer>(&mut self, pane: &mut SpectrogramPane<R>) {
        if !self.state.is_running() {
            return;
        }
        if let Some(token) = self.session.take() {
            pane.end_session(token);
        }
        self.in_flight = None;
        self.blocks.clear();
        self.partial.clear();
        self.state = CaptureState::Stopped;
        info!("[microphone] stopped");
    }

    fn fail<R: SpectrogramRenderer>(
        &mut self,
        pane: &mut SpectrogramPane<R>,
        err: PipelineError,
    ) -> PipelineError {
        warn!("[microphone] analysis failed, stopping: {err}");
        self.stop(pane);
        err
    }
}

//! One spectrogram pane: column history, viewport and renderer, plus the
//! session bookkeeping that keeps late results out of a cleared pane.

use super::column_buffer::{ColumnBuffer, buffer_width_for};
use super::render::{BufferSnapshot, RenderParametersUpdate, SpectrogramRenderer};
use super::viewport::{DEFAULT_ZOOM, Viewport};
use crate::audio::session::{Freshness, SessionCounter, SessionToken};
use crate::dsp::SampleChunk;
use crate::dsp::spectrogram::SpectrogramOptions;
use crate::error::Result;
use crate::worker::WorkerResponse;
use crate::worker::pool::{Dispatcher, PendingAnalysis};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaneGeometry {
    pub canvas_width: f32,
    pub canvas_height: f32,
    pub buffer_width_multiplier: usize,
    pub max_texture_size: usize,
    pub zoom: f32,
}

impl Default for PaneGeometry {
    fn default() -> Self {
        Self {
            canvas_width: 800.0,
            canvas_height: 400.0,
            buffer_width_multiplier: 4,
            max_texture_size: 4096,
            zoom: DEFAULT_ZOOM,
        }
    }
}

/// Input events a pane understands. Positions are canvas pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Wheel { delta_x: f32, delta_y: f32 },
    DragStart { x: f32 },
    DragMove { x: f32 },
    DragEnd,
    TouchStart(Vec<f32>),
    TouchMove(Vec<f32>),
    TouchEnd,
}

/// Analysis submitted on behalf of a session.
#[derive(Debug)]
pub struct InFlight {
    token: SessionToken,
    pending: PendingAnalysis,
}

impl InFlight {
    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn sequence(&self) -> u64 {
        self.pending.sequence()
    }

    pub fn try_take(&self) -> Option<WorkerResponse> {
        self.pending.try_take()
    }

    pub fn wait(self) -> WorkerResponse {
        self.pending.wait()
    }
}

#[derive(Debug, PartialEq)]
pub enum Completion {
    /// Columns were appended. `input` is the submitted sample buffer.
    Applied { columns: usize, input: Vec<f32> },
    /// The result belonged to a superseded session and was dropped.
    Discarded { input: Option<Vec<f32>> },
}

impl Completion {
    pub fn into_input(self) -> Option<Vec<f32>> {
        match self {
            Completion::Applied { input, .. } => Some(input),
            Completion::Discarded { input } => input,
        }
    }
}

#[derive(Debug)]
pub struct SpectrogramPane<R> {
    label: String,
    options: SpectrogramOptions,
    buffer: ColumnBuffer,
    viewport: Viewport,
    renderer: R,
    sessions: SessionCounter,
    /// Session opened by the capture currently feeding the pane. Clears keep it.
    capture_origin: Option<SessionToken>,
    sample_rate: f32,
    image_dirty: bool,
}

impl<R: SpectrogramRenderer> SpectrogramPane<R> {
    pub fn new(
        label: impl Into<String>,
        geometry: PaneGeometry,
        options: SpectrogramOptions,
        mut renderer: R,
    ) -> Result<Self> {
        options.validate()?;
        let width = buffer_width_for(
            geometry.canvas_width.max(1.0) as usize,
            geometry.buffer_width_multiplier,
            geometry.max_texture_size,
        );
        let buffer = ColumnBuffer::new(width, options.column_len(), 1)?;
        let viewport = Viewport::new(geometry.canvas_width, geometry.zoom);

        renderer.resize(geometry.canvas_width, geometry.canvas_height);
        renderer.update_parameters(&RenderParametersUpdate {
            window_size: Some(options.window_size),
            sample_rate: Some(options.sample_rate),
            view_offset: Some(viewport.offset()),
            zoom: Some(viewport.zoom()),
            ..RenderParametersUpdate::default()
        });

        let label = label.into();
        debug!(
            "[pane] {label}: {width} columns x {} bins, zoom {}",
            options.column_len(),
            viewport.zoom()
        );

        Ok(Self {
            label,
            sample_rate: options.sample_rate,
            options,
            buffer,
            viewport,
            renderer,
            sessions: SessionCounter::new(),
            capture_origin: None,
            image_dirty: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn options(&self) -> &SpectrogramOptions {
        &self.options
    }

    pub fn buffer(&self) -> &ColumnBuffer {
        &self.buffer
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn is_dirty(&self) -> bool {
        self.image_dirty
    }

    pub fn current_session(&self) -> SessionToken {
        self.sessions.current()
    }

    pub fn ensure_current(&self, token: SessionToken) -> Result<()> {
        self.sessions.ensure_current(token)
    }

    /// Starts a capture session and pins the view to the live edge.
    pub fn begin_session(&mut self) -> SessionToken {
        let token = self.sessions.begin();
        self.capture_origin = Some(token);
        self.viewport.set_auto_scroll(true);
        self.push_offset();
        debug!("[pane] {}: session {} started", self.label, token.id());
        token
    }

    /// Token the capture holding `token` should submit with from now on.
    ///
    /// A clear supersedes the session without ending the capture, so a token
    /// issued to the same capture maps onto the pane's current session.
    /// `None` once the capture was ended or another one took the pane over.
    pub fn resume_session(&self, token: SessionToken) -> Option<SessionToken> {
        match self.capture_origin {
            Some(origin) if token >= origin => Some(self.sessions.current()),
            _ => None,
        }
    }

    /// Ends `token`'s capture; results it still has in flight become stale.
    pub fn end_session(&mut self, token: SessionToken) {
        if self.resume_session(token).is_some() {
            self.sessions.begin();
            self.capture_origin = None;
            debug!("[pane] {}: session {} ended", self.label, token.id());
        }
    }

    /// Hands a chunk to the pool on behalf of `token`'s session.
    pub fn submit(
        &mut self,
        dispatcher: &Dispatcher,
        chunk: SampleChunk,
        token: SessionToken,
    ) -> Result<InFlight> {
        self.ensure_current(token)?;
        if chunk.sample_rate != self.sample_rate {
            self.sample_rate = chunk.sample_rate;
            self.renderer.update_parameters(&RenderParametersUpdate {
                window_size: Some(self.options.window_size),
                sample_rate: Some(chunk.sample_rate),
                ..RenderParametersUpdate::default()
            });
        }
        trace!(
            "[pane] {}: submitting {} samples at {}",
            self.label, chunk.length, chunk.start
        );
        let pending = dispatcher.submit(chunk, self.options);
        Ok(InFlight { token, pending })
    }

    /// Completes `in_flight` if its result has arrived.
    pub fn poll(&mut self, in_flight: &InFlight) -> Option<Result<Completion>> {
        let response = in_flight.try_take()?;
        Some(self.complete(in_flight.token, response))
    }

    /// Appends a worker result unless its session has been superseded.
    pub fn complete(&mut self, token: SessionToken, response: WorkerResponse) -> Result<Completion> {
        if self.sessions.freshness(token) == Freshness::Stale {
            debug!(
                "[pane] {}: discarding result from session {} (current {})",
                self.label,
                token.id(),
                self.sessions.current().id()
            );
            return Ok(Completion::Discarded {
                input: response.ok().map(|output| output.input),
            });
        }

        let output = response?;
        let columns = self.buffer.enqueue(&output.columns)?;
        self.image_dirty = true;
        self.viewport.on_columns_enqueued(self.buffer.fill_ratio());
        self.push_offset();
        trace!(
            "[pane] {}: +{columns} columns ({} total)",
            self.label,
            self.buffer.total_written()
        );
        Ok(Completion::Applied {
            columns,
            input: output.input,
        })
    }

    /// Uploads pending columns, then draws.
    pub fn frame(&mut self) {
        if self.image_dirty {
            self.renderer
                .update_spectrogram(&BufferSnapshot::of(&self.buffer), false);
            self.image_dirty = false;
        }
        self.renderer.render();
    }

    /// Empties the pane. Results still in flight are discarded on arrival.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.viewport.reset();
        self.sessions.begin();
        self.image_dirty = false;
        self.renderer
            .update_spectrogram(&BufferSnapshot::of(&self.buffer), true);
        self.push_offset();
        debug!("[pane] {}: cleared", self.label);
    }

    /// Swaps analysis options. A different column height rebuilds the buffer.
    pub fn reconfigure(&mut self, options: SpectrogramOptions) -> Result<()> {
        options.validate()?;
        if options.column_len() != self.buffer.height() {
            self.buffer = ColumnBuffer::new(self.buffer.width(), options.column_len(), 1)?;
        }
        self.options = options;
        self.renderer.update_parameters(&RenderParametersUpdate {
            window_size: Some(options.window_size),
            ..RenderParametersUpdate::default()
        });
        self.clear();
        Ok(())
    }

    /// Applies an input event; returns the offset change to broadcast.
    pub fn handle_gesture(&mut self, gesture: &Gesture) -> f32 {
        let applied = match gesture {
            Gesture::Wheel { delta_x, delta_y } => self.viewport.wheel(*delta_x, *delta_y),
            Gesture::DragStart { x } => {
                self.viewport.drag_start(*x);
                0.0
            }
            Gesture::DragMove { x } => self.viewport.drag_move(*x).unwrap_or(0.0),
            Gesture::DragEnd => {
                self.viewport.drag_end();
                0.0
            }
            Gesture::TouchStart(touches) => {
                self.viewport.touch_start(touches);
                0.0
            }
            Gesture::TouchMove(touches) => self.viewport.touch_move(touches).unwrap_or(0.0),
            Gesture::TouchEnd => {
                self.viewport.touch_end();
                0.0
            }
        };
        if applied != 0.0 {
            self.push_offset();
        }
        applied
    }

    /// Scrolls by a delta received from a linked pane.
    pub fn scroll_by(&mut self, delta: f32) -> f32 {
        let applied = self.viewport.scroll_by(delta);
        if applied != 0.0 {
            self.push_offset();
        }
        applied
    }

    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.viewport.set_auto_scroll(enabled);
        self.push_offset();
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.update_render_parameters(RenderParametersUpdate {
            zoom: Some(zoom),
            ..RenderParametersUpdate::default()
        });
    }

    /// Forwards a parameter change. Zoom goes through the viewport first so
    /// the renderer sees the clamped value and offset.
    pub fn update_render_parameters(&mut self, mut update: RenderParametersUpdate) {
        if let Some(zoom) = update.zoom {
            self.viewport.set_zoom(zoom);
            update.zoom = Some(self.viewport.zoom());
            update.view_offset = Some(self.viewport.offset());
        }
        self.renderer.update_parameters(&update);
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport.resize(width);
        self.renderer.resize(width, height);
        self.push_offset();
        self.renderer
            .update_spectrogram(&BufferSnapshot::of(&self.buffer), true);
        self.image_dirty = false;
    }

    fn push_offset(&mut self) {
        self.renderer
            .update_parameters(&RenderParametersUpdate::view_offset(self.viewport.offset()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneRole {
    Primary,
    Secondary,
}

/// Two panes sharing a time axis. Scrolling the primary pane drags the
/// secondary along; the secondary scrolls on its own.
#[derive(Debug)]
pub struct LinkedPanes<R> {
    primary: SpectrogramPane<R>,
    secondary: SpectrogramPane<R>,
}

impl<R: SpectrogramRenderer> LinkedPanes<R> {
    pub fn new(primary: SpectrogramPane<R>, secondary: SpectrogramPane<R>) -> Self {
        Self { primary, secondary }
    }

    pub fn pane(&self, role: PaneRole) -> &SpectrogramPane<R> {
        match role {
            PaneRole::Primary => &self.primary,
            PaneRole::Secondary => &self.secondary,
        }
    }

    pub fn pane_mut(&mut self, role: PaneRole) -> &mut SpectrogramPane<R> {
        match role {
            PaneRole::Primary => &mut self.primary,
            PaneRole::Secondary => &mut self.secondary,
        }
    }

    pub fn handle_gesture(&mut self, role: PaneRole, gesture: &Gesture) -> f32 {
        let applied = self.pane_mut(role).handle_gesture(gesture);
        if role == PaneRole::Primary && applied != 0.0 {
            self.secondary.scroll_by(applied);
        }
        applied
    }

    /// Display parameters are shared, so updates reach both panes.
    pub fn update_render_parameters(&mut self, update: RenderParametersUpdate) {
        self.primary.update_render_parameters(update);
        self.secondary.update_render_parameters(update);
    }

    pub fn frame(&mut self) {
        self.primary.frame();
        self.secondary.frame();
    }

    pub fn into_inner(self) -> (SpectrogramPane<R>, SpectrogramPane<R>) {
        (self.primary, self.secondary)
    }
}

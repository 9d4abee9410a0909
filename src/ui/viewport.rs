//! Scroll and zoom state for one spectrogram pane.
//!
//! Offsets are measured in buffer widths back from the live edge: `0.0`
//! shows the newest column at the right edge, positive values look into
//! the past. One viewport spans `1 / zoom` of that unit. Pixel deltas from
//! wheel, drag and touch gestures are converted with
//! `px / (canvas_width * zoom)`; dragging right moves content right and so
//! decreases the offset.

/// Offsets closer to zero than this snap to the live edge.
pub const SNAP_EPSILON: f32 = 1.0e-3;
pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 64.0;
pub const DEFAULT_ZOOM: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct GestureAnchor {
    origin_x: f32,
    start_offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    offset: f32,
    zoom: f32,
    auto_scroll: bool,
    canvas_width: f32,
    content_length: f32,
    drag: Option<GestureAnchor>,
    touch: Option<GestureAnchor>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1.0, DEFAULT_ZOOM)
    }
}

impl Viewport {
    pub fn new(canvas_width: f32, zoom: f32) -> Self {
        Self {
            offset: 0.0,
            zoom: sanitize_zoom(zoom),
            auto_scroll: true,
            canvas_width: canvas_width.max(1.0),
            content_length: 0.0,
            drag: None,
            touch: None,
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    pub fn canvas_width(&self) -> f32 {
        self.canvas_width
    }

    pub fn content_length(&self) -> f32 {
        self.content_length
    }

    /// Width of the visible window in offset units.
    pub fn viewport_width(&self) -> f32 {
        1.0 / self.zoom
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Allowed offset range. Overscroll past the live edge by one viewport is
    /// permitted once there is content to align.
    pub fn bounds(&self) -> (f32, f32) {
        let width = self.viewport_width();
        let lower = if self.content_length > 0.0 { -width } else { 0.0 };
        (lower, self.content_length.max(width))
    }

    pub fn pixels_to_normalized(&self, px: f32) -> f32 {
        px / (self.canvas_width * self.zoom)
    }

    /// Moves by `delta` offset units. Returns the change actually applied
    /// after clamping and snapping.
    pub fn scroll_by(&mut self, delta: f32) -> f32 {
        self.scroll_to(self.offset + delta)
    }

    /// Non-finite targets are ignored.
    pub fn scroll_to(&mut self, target: f32) -> f32 {
        if !target.is_finite() {
            return 0.0;
        }
        let before = self.offset;
        self.offset = target;
        self.settle();
        self.offset - before
    }

    /// Wheel input; the dominant axis wins.
    pub fn wheel(&mut self, delta_x: f32, delta_y: f32) -> f32 {
        let delta = if delta_x.abs() > delta_y.abs() {
            delta_x
        } else {
            delta_y
        };
        self.scroll_by(self.pixels_to_normalized(delta))
    }

    pub fn drag_start(&mut self, x: f32) {
        self.drag = Some(self.anchor(x));
    }

    /// Returns the applied offset change, or `None` when no drag is active.
    pub fn drag_move(&mut self, x: f32) -> Option<f32> {
        let anchor = self.drag?;
        Some(self.follow(anchor, x))
    }

    pub fn drag_end(&mut self) {
        self.drag = None;
    }

    /// Touch gestures only pan with a single finger.
    pub fn touch_start(&mut self, touches: &[f32]) {
        if let [x] = touches {
            self.touch = Some(self.anchor(*x));
        }
    }

    pub fn touch_move(&mut self, touches: &[f32]) -> Option<f32> {
        let [x] = touches else {
            return None;
        };
        let anchor = self.touch?;
        Some(self.follow(anchor, *x))
    }

    pub fn touch_end(&mut self) {
        self.touch = None;
    }

    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.auto_scroll = enabled;
        if enabled {
            self.offset = 0.0;
        }
    }

    /// Called after columns were enqueued. `content_length` is the occupied
    /// fraction of the buffer.
    pub fn on_columns_enqueued(&mut self, content_length: f32) {
        self.content_length = content_length.max(0.0);
        if self.auto_scroll {
            self.offset = 0.0;
        } else {
            self.clamp();
        }
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = sanitize_zoom(zoom);
        self.settle();
    }

    pub fn resize(&mut self, canvas_width: f32) {
        self.canvas_width = canvas_width.max(1.0);
        self.settle();
    }

    /// Back to the live edge with no content and no gesture in progress.
    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.auto_scroll = true;
        self.content_length = 0.0;
        self.drag = None;
        self.touch = None;
    }

    fn anchor(&self, x: f32) -> GestureAnchor {
        GestureAnchor {
            origin_x: x,
            start_offset: self.offset,
        }
    }

    fn follow(&mut self, anchor: GestureAnchor, x: f32) -> f32 {
        let target = anchor.start_offset + self.pixels_to_normalized(anchor.origin_x - x);
        self.scroll_to(target)
    }

    fn clamp(&mut self) {
        let (lower, upper) = self.bounds();
        self.offset = self.offset.clamp(lower, upper);
    }

    fn settle(&mut self) {
        self.clamp();
        if self.offset.abs() <= SNAP_EPSILON {
            self.offset = 0.0;
            self.auto_scroll = true;
        } else {
            self.auto_scroll = false;
        }
    }
}

fn sanitize_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        DEFAULT_ZOOM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_content(zoom: f32, content: f32) -> Viewport {
        let mut viewport = Viewport::new(800.0, zoom);
        viewport.on_columns_enqueued(content);
        viewport
    }

    #[test]
    fn scroll_round_trip_restores_offset() {
        let mut viewport = with_content(4.0, 1.0);
        viewport.scroll_by(0.3);
        let start = viewport.offset();
        viewport.scroll_by(0.2);
        viewport.scroll_by(-0.2);
        assert!((viewport.offset() - start).abs() < 1.0e-6);
        assert!(!viewport.auto_scroll());

        viewport.scroll_by(-0.3);
        assert_eq!(viewport.offset(), 0.0);
        assert!(viewport.auto_scroll());
    }

    #[test]
    fn offset_clamps_to_content_and_overscroll() {
        let mut viewport = with_content(4.0, 0.5);
        assert_eq!(viewport.bounds(), (-0.25, 0.5));
        viewport.scroll_by(10.0);
        assert_eq!(viewport.offset(), 0.5);
        viewport.scroll_by(-10.0);
        assert_eq!(viewport.offset(), -0.25);
        assert!(!viewport.auto_scroll());
    }

    #[test]
    fn empty_content_allows_no_negative_offset() {
        let mut viewport = Viewport::new(800.0, 2.0);
        assert_eq!(viewport.bounds(), (0.0, 0.5));
        viewport.scroll_by(-0.2);
        assert_eq!(viewport.offset(), 0.0);
        assert!(viewport.auto_scroll());
    }

    #[test]
    fn residue_near_zero_snaps_back_to_live_edge() {
        let mut viewport = with_content(1.0, 1.0);
        viewport.scroll_by(0.1);
        assert!(!viewport.auto_scroll());
        viewport.scroll_by(-0.1 + SNAP_EPSILON / 2.0);
        assert_eq!(viewport.offset(), 0.0);
        assert!(viewport.auto_scroll());
    }

    #[test]
    fn auto_pin_holds_until_manual_scroll() {
        let mut viewport = with_content(4.0, 0.2);
        viewport.on_columns_enqueued(0.4);
        assert_eq!(viewport.offset(), 0.0);

        viewport.scroll_by(0.1);
        viewport.on_columns_enqueued(0.6);
        assert!((viewport.offset() - 0.1).abs() < 1.0e-6);

        viewport.set_auto_scroll(true);
        assert_eq!(viewport.offset(), 0.0);
        viewport.on_columns_enqueued(0.8);
        assert_eq!(viewport.offset(), 0.0);
    }

    #[test]
    fn dragging_right_moves_towards_live_edge() {
        let mut viewport = with_content(2.0, 1.0);
        viewport.scroll_by(0.5);
        viewport.drag_start(100.0);
        // 160px at 800px * zoom 2 = 0.1 offset units.
        let applied = viewport.drag_move(260.0).unwrap();
        assert!((applied + 0.1).abs() < 1.0e-6);
        assert!((viewport.offset() - 0.4).abs() < 1.0e-6);

        viewport.drag_move(-60.0);
        assert!((viewport.offset() - 0.6).abs() < 1.0e-6);
        viewport.drag_end();
        assert!(viewport.drag_move(0.0).is_none());
    }

    #[test]
    fn non_finite_input_leaves_offset_alone() {
        let mut viewport = with_content(1.0, 1.0);
        viewport.scroll_by(0.2);
        assert_eq!(viewport.scroll_by(f32::NAN), 0.0);
        assert_eq!(viewport.wheel(0.0, f32::INFINITY), 0.0);
        viewport.drag_start(f32::NAN);
        assert_eq!(viewport.drag_move(10.0), Some(0.0));
        viewport.drag_end();
        assert!((viewport.offset() - 0.2).abs() < 1.0e-6);
        assert!(!viewport.auto_scroll());

        viewport.scroll_by(-0.2);
        assert!(viewport.auto_scroll());
    }

    #[test]
    fn wheel_uses_dominant_axis() {
        let mut viewport = with_content(1.0, 1.0);
        viewport.wheel(80.0, 8.0);
        assert!((viewport.offset() - 0.1).abs() < 1.0e-6);
        viewport.wheel(4.0, -40.0);
        assert!((viewport.offset() - 0.05).abs() < 1.0e-6);
    }

    #[test]
    fn multi_touch_is_ignored() {
        let mut viewport = with_content(1.0, 1.0);
        viewport.touch_start(&[10.0, 50.0]);
        assert!(viewport.touch_move(&[0.0]).is_none());

        viewport.touch_start(&[400.0]);
        assert!(viewport.touch_move(&[10.0, 20.0]).is_none());
        let applied = viewport.touch_move(&[320.0]).unwrap();
        assert!((applied - 0.1).abs() < 1.0e-6);
    }

    #[test]
    fn zoom_and_resize_reclamp_immediately() {
        let mut viewport = with_content(1.0, 0.25);
        viewport.scroll_by(-0.9);
        assert!((viewport.offset() + 0.9).abs() < 1.0e-6);

        viewport.set_zoom(8.0);
        assert_eq!(viewport.offset(), -0.125);

        viewport.set_zoom(1.0);
        viewport.scroll_by(0.9 + 0.125 + 0.5);
        assert_eq!(viewport.offset(), 1.0);
        viewport.set_zoom(4.0);
        assert_eq!(viewport.offset(), 0.25);

        viewport.resize(0.0);
        assert_eq!(viewport.canvas_width(), 1.0);
        assert!(viewport.offset() <= viewport.bounds().1);
    }

    #[test]
    fn zoom_is_sanitized() {
        let mut viewport = Viewport::new(100.0, f32::NAN);
        assert_eq!(viewport.zoom(), DEFAULT_ZOOM);
        viewport.set_zoom(1_000.0);
        assert_eq!(viewport.zoom(), MAX_ZOOM);
        viewport.set_zoom(0.0);
        assert_eq!(viewport.zoom(), MIN_ZOOM);
    }

    #[test]
    fn reset_returns_to_pinned_state() {
        let mut viewport = with_content(2.0, 1.0);
        viewport.scroll_by(0.3);
        viewport.drag_start(5.0);
        viewport.reset();
        assert_eq!(viewport.offset(), 0.0);
        assert!(viewport.auto_scroll());
        assert!(!viewport.is_dragging());
        assert_eq!(viewport.content_length(), 0.0);
    }
}

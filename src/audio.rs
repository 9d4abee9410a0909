//! Capture adapters that turn sample sources into analysis chunks for a
//! [`SpectrogramPane`](crate::ui::pane::SpectrogramPane).
//!
//! Adapters are driven cooperatively from the control loop and never have
//! more than one chunk outstanding, which keeps results in capture order.

pub mod microphone;
pub mod playback;
pub mod session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Running,
    /// Playback reached the end of its clip.
    Finished,
    Stopped,
}

impl CaptureState {
    pub fn is_running(self) -> bool {
        self == CaptureState::Running
    }
}

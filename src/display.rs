//! Display/input collaborator boundary.
//!
//! The core never touches widgets; it talks to whatever renders through
//! [`DisplaySurface`] and receives gestures as an event stream. The binary
//! wires a tracing-backed headless surface; tests substitute recorders.

use std::time::Duration;

use tracing::{debug, info};

use crate::frame::FrameView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMode {
    Image,
    Video,
}

pub trait DisplaySurface: Send + Sync {
    fn set_mode(&self, mode: UiMode);
    fn show_image(&self, frame: FrameView<'_>);
    fn show_video_frame(&self, frame: FrameView<'_>);
    fn show_loading(&self);
    fn hide_loading(&self);
    /// Progress text: zero-based position out of total.
    fn update_progress(&self, position: usize, total: usize);
    /// Transient volume indicator.
    fn show_volume(&self, volume: i32);
    fn show_settings(&self, current_interval: Duration);
    fn hide_settings(&self);
    /// Explicit empty-collection state instead of a blank screen.
    fn show_no_media(&self);
}

/// Headless surface that narrates everything through tracing.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl LogDisplay {
    pub fn new() -> Self {
        Self
    }
}

impl DisplaySurface for LogDisplay {
    fn set_mode(&self, mode: UiMode) {
        debug!(?mode, "display mode");
    }

    fn show_image(&self, frame: FrameView<'_>) {
        info!(width = frame.width, height = frame.height, "image frame");
    }

    fn show_video_frame(&self, frame: FrameView<'_>) {
        debug!(width = frame.width, height = frame.height, "video frame");
    }

    fn show_loading(&self) {
        debug!("loading indicator on");
    }

    fn hide_loading(&self) {
        debug!("loading indicator off");
    }

    fn update_progress(&self, position: usize, total: usize) {
        info!(position = position + 1, total, "progress");
    }

    fn show_volume(&self, volume: i32) {
        info!(volume, "volume indicator");
    }

    fn show_settings(&self, current_interval: Duration) {
        info!(?current_interval, "settings panel shown");
    }

    fn hide_settings(&self) {
        debug!("settings panel hidden");
    }

    fn show_no_media(&self) {
        info!("no media available");
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Everything a surface was asked to do, in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DisplayCall {
        Mode(UiMode),
        Image(u32, u32),
        VideoFrame(u32, u32),
        Loading(bool),
        Progress(usize, usize),
        Volume(i32),
        Settings(bool),
        NoMedia,
    }

    #[derive(Debug, Default)]
    pub struct RecordingDisplay {
        calls: Mutex<Vec<DisplayCall>>,
    }

    impl RecordingDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<DisplayCall> {
            self.calls.lock().clone()
        }

        pub fn count(&self, pred: impl Fn(&DisplayCall) -> bool) -> usize {
            self.calls.lock().iter().filter(|c| pred(c)).count()
        }

        pub fn last_image(&self) -> Option<(u32, u32)> {
            self.calls.lock().iter().rev().find_map(|c| match c {
                DisplayCall::Image(w, h) => Some((*w, *h)),
                _ => None,
            })
        }

        fn push(&self, call: DisplayCall) {
            self.calls.lock().push(call);
        }
    }

    impl DisplaySurface for RecordingDisplay {
        fn set_mode(&self, mode: UiMode) {
            self.push(DisplayCall::Mode(mode));
        }

        fn show_image(&self, frame: FrameView<'_>) {
            self.push(DisplayCall::Image(frame.width, frame.height));
        }

        fn show_video_frame(&self, frame: FrameView<'_>) {
            self.push(DisplayCall::VideoFrame(frame.width, frame.height));
        }

        fn show_loading(&self) {
            self.push(DisplayCall::Loading(true));
        }

        fn hide_loading(&self) {
            self.push(DisplayCall::Loading(false));
        }

        fn update_progress(&self, position: usize, total: usize) {
            self.push(DisplayCall::Progress(position, total));
        }

        fn show_volume(&self, volume: i32) {
            self.push(DisplayCall::Volume(volume));
        }

        fn show_settings(&self, _current_interval: Duration) {
            self.push(DisplayCall::Settings(true));
        }

        fn hide_settings(&self) {
            self.push(DisplayCall::Settings(false));
        }

        fn show_no_media(&self) {
            self.push(DisplayCall::NoMedia);
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// Touch gesture stream delivered by the display/input collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureEvent {
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
    Tap,
    LongPress,
    SettingsConfirmed(Duration),
    SettingsCancelled,
}

/// File-system mutation notification funneled through the mutation queue.
///
/// Every variant collapses to one collection refresh in the worker; the
/// sub-type exists for logging and for producers that know what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    FileAdded(PathBuf),
    FileRemoved,
    Refresh,
}

/// USB mass-storage link status as reported by the device-mode stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbLinkStatus {
    Disconnected,
    Connected,
    MountedByHost,
    Ejected,
    Error,
}

/// Requests emitted by timer callbacks and gesture handlers toward the
/// controller driver. Timer contexts never mutate playback state directly;
/// they enqueue one of these instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerRequest {
    /// Periodic slideshow advance.
    Advance,
    /// A playing video reached its reported duration.
    VideoFinished,
    Gesture(GestureEvent),
}

//! USB mass-storage coordination.
//!
//! The device-mode stack offers no push notification, so one poller watches
//! the link status and diffs it into an event stream; everything else in the
//! system consumes the stream instead of polling on its own. The reaction
//! task implements the takeover protocol: a connected host pauses playback
//! with no auto-resume, and an eject refreshes the collection before
//! resuming whatever was interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::album::Album;
use crate::collection::MediaKind;
use crate::display::{DisplaySurface, UiMode};
use crate::events::UsbLinkStatus;
use crate::tasks::mutation::MutationQueue;
use crate::video::{VideoPlayer, VideoState};

/// Poll-based status source for the USB device-mode link.
pub trait UsbPort: Send + Sync {
    fn status(&self) -> UsbLinkStatus;
}

/// Reads the UDC gadget state file exposed by the kernel (e.g.
/// `/sys/class/udc/<name>/state`).
pub struct SysfsUsbPort {
    state_path: PathBuf,
}

impl SysfsUsbPort {
    pub fn new(state_path: PathBuf) -> Self {
        Self { state_path }
    }
}

impl UsbPort for SysfsUsbPort {
    fn status(&self) -> UsbLinkStatus {
        match std::fs::read_to_string(&self.state_path) {
            Ok(state) => match state.trim() {
                "not attached" => UsbLinkStatus::Disconnected,
                "configured" => UsbLinkStatus::MountedByHost,
                "suspended" => UsbLinkStatus::Ejected,
                "attached" | "powered" | "default" | "addressed" => UsbLinkStatus::Connected,
                other => {
                    debug!(state = other, "unrecognized udc state");
                    UsbLinkStatus::Error
                }
            },
            Err(_) => UsbLinkStatus::Error,
        }
    }
}

/// Poll-and-diff: emits a status only when it changes.
pub async fn poll(
    port: Arc<dyn UsbPort>,
    period: Duration,
    events: mpsc::Sender<UsbLinkStatus>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut last: Option<UsbLinkStatus> = None;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let status = port.status();
                if last != Some(status) {
                    debug!(?status, "usb link status changed");
                    last = Some(status);
                    if events.send(status).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

struct TakeoverState {
    active: bool,
    was_video: bool,
    video_was_playing: bool,
}

/// Applies USB link transitions to playback.
pub async fn run(
    mut events: mpsc::Receiver<UsbLinkStatus>,
    album: Arc<Album>,
    video: VideoPlayer,
    mutations: MutationQueue,
    display: Arc<dyn DisplaySurface>,
    library: PathBuf,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut takeover = TakeoverState {
        active: false,
        was_video: false,
        video_was_playing: false,
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            status = events.recv() => {
                let Some(status) = status else { break };
                match status {
                    UsbLinkStatus::Connected | UsbLinkStatus::MountedByHost => {
                        if takeover.active {
                            debug!(?status, "host still attached");
                            continue;
                        }
                        on_host_connected(&album, &video, &display, &library, &mut takeover)
                            .await;
                    }
                    UsbLinkStatus::Disconnected | UsbLinkStatus::Ejected => {
                        if !takeover.active {
                            continue;
                        }
                        on_host_gone(&album, &video, &mutations, &display, &mut takeover)
                            .await;
                    }
                    UsbLinkStatus::Error => warn!("usb link error"),
                }
            }
        }
    }
    Ok(())
}

async fn on_host_connected(
    album: &Arc<Album>,
    video: &VideoPlayer,
    display: &Arc<dyn DisplaySurface>,
    library: &Path,
    takeover: &mut TakeoverState,
) {
    info!("usb host connected, stopping media playback");
    takeover.active = true;
    takeover.was_video = album.current_media_kind() == MediaKind::Video;
    takeover.video_was_playing = false;

    if takeover.was_video {
        if video.state() == VideoState::Playing {
            takeover.video_was_playing = true;
            let _ = video.pause();
        }
        display.set_mode(UiMode::Image);
    }

    let album = Arc::clone(album);
    let _ = tokio::task::spawn_blocking(move || album.pause_for_usb()).await;

    match storage_summary(library) {
        Ok(summary) => info!(
            files = summary.total_files,
            used_mib = summary.used_bytes / (1024 * 1024),
            "storage exposed to host"
        ),
        Err(err) => debug!("storage summary unavailable: {err}"),
    }
}

async fn on_host_gone(
    album: &Arc<Album>,
    video: &VideoPlayer,
    mutations: &MutationQueue,
    display: &Arc<dyn DisplaySurface>,
    takeover: &mut TakeoverState,
) {
    info!("usb host gone, resuming media playback");
    // The host may have added or deleted files; rescan through the
    // serializer like every other mutation source.
    mutations.request_refresh();

    if takeover.was_video && takeover.video_was_playing {
        display.set_mode(UiMode::Video);
        if video.has_error() {
            warn!("video errored during takeover, restarting");
            restart_or_advance(album, video).await;
        } else if video.resume().is_err() {
            warn!("video resume failed, restarting");
            restart_or_advance(album, video).await;
        }
    } else if takeover.was_video {
        // Paused before the takeover; keep it paused, but recover from a
        // sticky error.
        display.set_mode(UiMode::Video);
        if video.has_error() {
            let worker = video.clone();
            let restarted =
                tokio::task::spawn_blocking(move || worker.restart_current()).await;
            match restarted {
                Ok(Ok(())) => {
                    let _ = video.pause();
                }
                _ => {
                    warn!("restart failed, advancing to next media");
                    advance(album).await;
                }
            }
        }
    } else {
        let album = Arc::clone(album);
        let _ = tokio::task::spawn_blocking(move || album.resume()).await;
    }

    takeover.active = false;
    takeover.was_video = false;
    takeover.video_was_playing = false;
}

async fn restart_or_advance(album: &Arc<Album>, video: &VideoPlayer) {
    let restarted = {
        let video = video.clone();
        tokio::task::spawn_blocking(move || video.restart_current()).await
    };
    if !matches!(restarted, Ok(Ok(()))) {
        warn!("video restart failed, advancing to next media");
        advance(album).await;
    }
}

async fn advance(album: &Arc<Album>) {
    let album = Arc::clone(album);
    let _ = tokio::task::spawn_blocking(move || album.next()).await;
}

/// Volume usage shown on the takeover panel.
#[derive(Debug, Clone, Copy)]
pub struct StorageSummary {
    pub total_files: usize,
    pub used_bytes: u64,
}

pub fn storage_summary(library: &Path) -> Result<StorageSummary, std::io::Error> {
    let mut total_files = 0;
    let mut used_bytes = 0;
    for entry in walkdir::WalkDir::new(library)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        total_files += 1;
        used_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }
    Ok(StorageSummary {
        total_files,
        used_bytes,
    })
}

//! The playback controller: owns the collection, the scratch pool, the
//! pause-reason protocol, and the single mutex serializing every playback
//! transition.
//!
//! Timer callbacks and gestures reach this type only as requests funneled
//! through the driver task; the mutation worker calls [`Album::refresh`]
//! directly. Both paths serialize on the same transition mutex, so no two
//! transitions ever interleave.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::collection::{MediaCollection, MediaEntry, MediaKind};
use crate::config::Configuration;
use crate::decode::{DecodeLimits, SharedJpegDecoder};
use crate::display::{DisplaySurface, UiMode};
use crate::error::Error;
use crate::events::{ControllerRequest, GestureEvent};
use crate::loader::MediaLoader;
use crate::pool::ScratchPool;
use crate::tasks::slideshow::Slideshow;
use crate::video::{VideoPlayer, VideoState};

/// Why playback is paused; governs resume semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    None,
    /// Transient user pause; the idle timer self-heals it.
    UserInteraction,
    /// A USB host owns the storage; resume must be explicit.
    ExternalTakeover,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

struct AlbumState {
    collection: MediaCollection,
    pause_reason: PauseReason,
}

pub struct Album {
    state: Mutex<AlbumState>,
    loader: MediaLoader,
    video: VideoPlayer,
    slideshow: Slideshow,
    display: Arc<dyn DisplaySurface>,
    library: PathBuf,
    cfg: Configuration,
    limits: DecodeLimits,
    volume_step: i32,
}

impl Album {
    pub fn new(
        cfg: Configuration,
        engine: SharedJpegDecoder,
        pool: Arc<ScratchPool>,
        video: VideoPlayer,
        slideshow: Slideshow,
        display: Arc<dyn DisplaySurface>,
    ) -> Self {
        let loader = MediaLoader::new(engine.clone(), pool, cfg.display, &cfg.scan);
        let limits = engine.limits();
        Self {
            state: Mutex::new(AlbumState {
                collection: MediaCollection::new(),
                pause_reason: PauseReason::None,
            }),
            loader,
            video,
            slideshow,
            display,
            library: cfg.media_library_path.clone(),
            volume_step: cfg.video.volume_step,
            limits,
            cfg,
        }
    }

    /// Initial scan and first display. An empty library is surfaced as
    /// `NoMedia` with the explicit no-media display state.
    pub fn start(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        state
            .collection
            .scan(&self.library, &self.cfg.scan, &self.limits)?;
        let count = state.collection.len();
        if count == 0 {
            warn!(library = %self.library.display(), "no media found");
            self.display.show_no_media();
            return Err(Error::NoMedia);
        }
        info!(count, "media collection ready");
        self.load_media_at(&mut state, 0, Direction::Forward)?;
        // A video at index 0 owns its own advance via the finish timer; the
        // slideshow only paces images.
        if !matches!(
            self.video.state(),
            VideoState::Playing | VideoState::Paused
        ) {
            self.slideshow.start();
        }
        Ok(())
    }

    pub fn total_count(&self) -> usize {
        self.state.lock().collection.len()
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().collection.current_index()
    }

    pub fn current_media_kind(&self) -> MediaKind {
        self.state
            .lock()
            .collection
            .current_entry()
            .map_or(MediaKind::Unknown, |e| e.kind)
    }

    pub fn pause_reason(&self) -> PauseReason {
        self.state.lock().pause_reason
    }

    /// Advance with wraparound, skipping unloadable entries.
    pub fn next(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.stop_video_before_navigation();
        let count = state.collection.len();
        if count == 0 {
            return Err(Error::NoMedia);
        }
        let target = (state.collection.current_index() + 1) % count;
        self.load_media_at(&mut state, target, Direction::Forward)
    }

    /// Retreat with wraparound, skipping backward over unloadable entries.
    pub fn prev(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.stop_video_before_navigation();
        let count = state.collection.len();
        if count == 0 {
            return Err(Error::NoMedia);
        }
        let target = (state.collection.current_index() + count - 1) % count;
        self.load_media_at(&mut state, target, Direction::Backward)
    }

    /// Direct jump: range-checked, single attempt, no skip-on-failure.
    pub fn goto(&self, index: usize) -> Result<(), Error> {
        let mut state = self.state.lock();
        let count = state.collection.len();
        if index >= count {
            return Err(Error::IndexOutOfRange { index, count });
        }
        self.load_single(&mut state, index)
    }

    /// Full rescan, relocating the previously-current file by name.
    pub fn refresh(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        info!("refreshing media collection");

        let previous_name = state
            .collection
            .current_entry()
            .map(|e| e.file_name.clone());
        let old_index = state.collection.current_index();

        state
            .collection
            .scan(&self.library, &self.cfg.scan, &self.limits)?;

        if state.collection.is_empty() {
            warn!("collection empty after refresh");
            self.display.show_no_media();
            return Ok(());
        }

        let new_index = previous_name
            .as_deref()
            .and_then(|name| state.collection.find_by_name(name))
            .unwrap_or(0);
        state.collection.set_current(new_index)?;
        info!(
            count = state.collection.len(),
            old_index, new_index, "collection refreshed"
        );

        // Reload the display only while playback is active; a takeover pause
        // keeps the screen as-is.
        if !self.is_paused() {
            self.load_media_at(&mut state, new_index, Direction::Forward)?;
        }
        Ok(())
    }

    /// User-interaction pause: the slideshow self-heals via its idle timer.
    pub fn pause(&self) {
        self.state.lock().pause_reason = PauseReason::UserInteraction;
        self.slideshow.pause();
    }

    /// External-device takeover: fully stop the timer, no auto-resume while
    /// the host may still be writing to storage.
    pub fn pause_for_usb(&self) {
        self.state.lock().pause_reason = PauseReason::ExternalTakeover;
        self.slideshow.stop();
        info!("playback paused for external device takeover");
    }

    /// Resume semantics branch on why we paused: a takeover restarts the
    /// periodic timer outright, a user pause falls back to the timer's own
    /// resume path.
    pub fn resume(&self) {
        let reason = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.pause_reason, PauseReason::None)
        };
        match reason {
            PauseReason::ExternalTakeover => {
                self.slideshow.start();
                info!("playback resumed after external device takeover");
            }
            _ => {
                self.slideshow.resume();
                info!("playback resumed");
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        !self.slideshow.is_running()
    }

    pub fn set_interval(&self, interval: std::time::Duration) {
        self.slideshow.set_interval(interval);
    }

    /// Entry point for the driver task.
    pub fn handle_request(&self, request: ControllerRequest) -> Result<(), Error> {
        match request {
            ControllerRequest::Advance => self.next(),
            ControllerRequest::VideoFinished => {
                // The video's finish timer supersedes slideshow advance while
                // a video plays; restart the timer before moving on.
                self.slideshow.start();
                self.next()
            }
            ControllerRequest::Gesture(gesture) => self.handle_gesture(gesture),
        }
    }

    fn handle_gesture(&self, gesture: GestureEvent) -> Result<(), Error> {
        let current_kind = self.current_media_kind();
        match gesture {
            GestureEvent::SwipeLeft => {
                let _ = self.slideshow.manual_trigger();
                self.next()
            }
            GestureEvent::SwipeRight => {
                let _ = self.slideshow.manual_trigger();
                self.prev()
            }
            GestureEvent::SwipeUp => {
                if current_kind == MediaKind::Video {
                    let volume = self.video.set_volume(self.video.volume() + self.volume_step);
                    self.display.show_volume(volume);
                }
                Ok(())
            }
            GestureEvent::SwipeDown => {
                if current_kind == MediaKind::Video {
                    let volume = self.video.set_volume(self.video.volume() - self.volume_step);
                    self.display.show_volume(volume);
                }
                Ok(())
            }
            GestureEvent::Tap => {
                if current_kind == MediaKind::Video {
                    match self.video.state() {
                        VideoState::Playing => {
                            self.video.pause()?;
                            self.slideshow.pause();
                        }
                        VideoState::Paused => self.video.resume()?,
                        _ => {}
                    }
                }
                Ok(())
            }
            GestureEvent::LongPress => {
                // Stop the timer while the settings panel is open so nothing
                // advances underneath it.
                self.display.show_settings(self.slideshow.interval());
                self.slideshow.stop();
                Ok(())
            }
            GestureEvent::SettingsConfirmed(interval) => {
                if interval != self.slideshow.interval() {
                    self.slideshow.set_interval(interval);
                    debug!(?interval, "slideshow interval updated");
                }
                self.display.hide_settings();
                self.slideshow.start();
                Ok(())
            }
            GestureEvent::SettingsCancelled => {
                self.display.hide_settings();
                self.slideshow.start();
                Ok(())
            }
        }
    }

    /// Any navigation away from a live video releases its resources before
    /// the new index is even computed; the next item might be a video too.
    fn stop_video_before_navigation(&self) {
        if matches!(
            self.video.state(),
            VideoState::Playing | VideoState::Paused
        ) {
            self.display.show_loading();
            self.display.set_mode(UiMode::Image);
            let _ = self.video.stop();
            self.display.hide_loading();
        }
    }

    /// Loads the entry at `index`, skipping in `direction` on per-entry
    /// failures. Bounded to one full pass so an all-corrupt collection
    /// terminates with `NoMedia` instead of looping.
    fn load_media_at(
        &self,
        state: &mut AlbumState,
        index: usize,
        direction: Direction,
    ) -> Result<(), Error> {
        let count = state.collection.len();
        if count == 0 {
            return Err(Error::NoMedia);
        }

        let was_video = matches!(
            self.video.state(),
            VideoState::Playing | VideoState::Paused
        );
        let mut index = index;

        for _ in 0..count {
            match self.load_single_inner(state, index, was_video) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_skippable() => {
                    warn!(index, "skipping unloadable entry: {err}");
                    index = match direction {
                        Direction::Forward => (index + 1) % count,
                        Direction::Backward => (index + count - 1) % count,
                    };
                }
                Err(err) => return Err(err),
            }
        }

        error!(count, "no loadable media after trying every entry");
        self.display.show_no_media();
        Err(Error::NoMedia)
    }

    fn load_single(&self, state: &mut AlbumState, index: usize) -> Result<(), Error> {
        let was_video = matches!(
            self.video.state(),
            VideoState::Playing | VideoState::Paused
        );
        self.load_single_inner(state, index, was_video)
    }

    fn load_single_inner(
        &self,
        state: &mut AlbumState,
        index: usize,
        currently_video: bool,
    ) -> Result<(), Error> {
        let entry = state
            .collection
            .entry(index)
            .ok_or(Error::IndexOutOfRange {
                index,
                count: state.collection.len(),
            })?
            .clone();

        match entry.kind {
            MediaKind::Video => self.show_video(state, index, &entry, currently_video),
            MediaKind::Image => self.show_image(state, index, &entry),
            MediaKind::Unknown => Err(Error::UnsupportedFormat(format!(
                "{} has unknown media kind",
                entry.path.display()
            ))),
        }
    }

    fn show_video(
        &self,
        state: &mut AlbumState,
        index: usize,
        entry: &MediaEntry,
        currently_video: bool,
    ) -> Result<(), Error> {
        let result = if currently_video {
            // Soft switch: no mode flip, no loading screen, adapter reused.
            info!(file = %entry.file_name, "soft video switch");
            self.video.switch_file(&entry.path)
        } else {
            self.display.show_loading();
            self.display.set_mode(UiMode::Video);
            // The video's own finish timer paces advance from here on.
            self.slideshow.stop();
            let result = self.video.play(&entry.path);
            self.display.hide_loading();
            result
        };

        match result {
            Ok(()) => {
                state.collection.set_current(index)?;
                self.display
                    .update_progress(index, state.collection.len());
                debug!(file = %entry.file_name, index, "video started");
                Ok(())
            }
            Err(err) => {
                if !currently_video {
                    self.display.set_mode(UiMode::Image);
                }
                Err(err)
            }
        }
    }

    fn show_image(
        &self,
        state: &mut AlbumState,
        index: usize,
        entry: &MediaEntry,
    ) -> Result<(), Error> {
        self.display.set_mode(UiMode::Image);
        self.display.show_loading();

        let result = self.loader.load_and_decode(entry);
        self.display.hide_loading();
        let loaded = result?;

        self.display.show_image(loaded.display_view());

        // The timer may have been stopped for a video; re-arm it unless a
        // pause is in force.
        if !self.slideshow.is_running() && state.pause_reason == PauseReason::None {
            self.slideshow.start();
        }

        state.collection.set_current(index)?;
        self.display.update_progress(index, state.collection.len());
        debug!(
            file = %entry.file_name,
            index,
            total = state.collection.len(),
            "image displayed"
        );
        Ok(())
    }
}

impl crate::tasks::mutation::RefreshTarget for Album {
    fn refresh(&self) -> Result<(), Error> {
        Album::refresh(self)
    }
}

//! Video playback engine.
//!
//! A dedicated extraction thread pulls packets from the container adapter,
//! decodes video frames through the shared JPEG unit into one of two
//! rotating buffers, and hands each to the display callback. The thread is
//! driven by control messages, never suspended: a context stopped
//! mid-decode would abandon the shared unit in an acquired state. Stop is
//! request-and-acknowledge with a bounded wait and a forced-cleanup fallback
//! for an unresponsive context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::VideoOptions;
use crate::decode::SharedJpegDecoder;
use crate::demux::{AdapterFactory, AudioSink, ContainerAdapter, Packet, StreamInfo};
use crate::display::DisplaySurface;
use crate::error::Error;
use crate::events::ControllerRequest;
use crate::frame::{BYTES_PER_PIXEL, FrameView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoState {
    Stopped,
    Playing,
    Paused,
    Error,
}

const MIN_VOLUME: i32 = 0;
const MAX_VOLUME: i32 = 100;

enum ExtractControl {
    Pause,
    Resume,
    Stop,
}

/// Two rotating output buffers plus the index currently on screen. Decoding
/// into the next buffer and delivering it happen under one lock so no query
/// ever observes a frame mid-write.
struct FrameRing {
    buffers: [Vec<u8>; 2],
    live: usize,
    dims: Option<(u32, u32)>,
}

impl FrameRing {
    fn new(buffer_size: usize) -> Self {
        Self {
            buffers: [vec![0; buffer_size], vec![0; buffer_size]],
            live: 0,
            dims: None,
        }
    }
}

struct ExtractionContext {
    control_tx: Sender<ExtractControl>,
    stopped_rx: Receiver<()>,
    thread: thread::JoinHandle<()>,
}

struct PlayerState {
    state: VideoState,
    current_file: Option<PathBuf>,
    volume: i32,
    info: Option<StreamInfo>,
    extraction: Option<ExtractionContext>,
    finish_cancel: Option<CancellationToken>,
}

struct PlayerInner {
    state: Mutex<PlayerState>,
    /// Replaceable so a forced cleanup can walk away from a mutex held by a
    /// stuck extraction context.
    ring: Mutex<Arc<Mutex<FrameRing>>>,
    adapter: Arc<Mutex<Option<Box<dyn ContainerAdapter>>>>,
    adapter_factory: AdapterFactory,
    engine: SharedJpegDecoder,
    display: Arc<dyn DisplaySurface>,
    audio: Option<Arc<dyn AudioSink>>,
    has_error: Arc<AtomicBool>,
    requests: tokio::sync::mpsc::Sender<ControllerRequest>,
    runtime: Handle,
    opts: VideoOptions,
}

/// Handle to the playback engine; clones share one underlying session.
#[derive(Clone)]
pub struct VideoPlayer {
    inner: Arc<PlayerInner>,
}

impl VideoPlayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opts: VideoOptions,
        engine: SharedJpegDecoder,
        display: Arc<dyn DisplaySurface>,
        audio: Option<Arc<dyn AudioSink>>,
        adapter_factory: AdapterFactory,
        requests: tokio::sync::mpsc::Sender<ControllerRequest>,
        runtime: Handle,
    ) -> Self {
        let buffer_size = engine.limits().max_frame_bytes();
        let volume = opts.default_volume;
        info!(
            buffer_size,
            audio = audio.is_some(),
            "video player initialized"
        );
        Self {
            inner: Arc::new(PlayerInner {
                state: Mutex::new(PlayerState {
                    state: VideoState::Stopped,
                    current_file: None,
                    volume,
                    info: None,
                    extraction: None,
                    finish_cancel: None,
                }),
                ring: Mutex::new(Arc::new(Mutex::new(FrameRing::new(buffer_size)))),
                adapter: Arc::new(Mutex::new(Some((adapter_factory)()))),
                adapter_factory,
                engine,
                display,
                audio,
                has_error: Arc::new(AtomicBool::new(false)),
                requests,
                runtime,
                opts,
            }),
        }
    }

    pub fn state(&self) -> VideoState {
        self.inner.state.lock().state
    }

    pub fn has_error(&self) -> bool {
        self.inner.has_error.load(Ordering::SeqCst)
            || self.inner.state.lock().state == VideoState::Error
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.inner.state.lock().current_file.clone()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.inner.state.lock().info
    }

    /// Dimensions of the most recently delivered frame, if any.
    pub fn last_frame_dims(&self) -> Option<(u32, u32)> {
        self.inner.ring.lock().lock().dims
    }

    pub fn volume(&self) -> i32 {
        self.inner.state.lock().volume
    }

    pub fn set_volume(&self, volume: i32) -> i32 {
        let volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        self.inner.state.lock().volume = volume;
        if let Some(audio) = &self.inner.audio {
            audio.set_volume(volume);
        }
        info!(volume, "volume set");
        volume
    }

    /// Starts playback of `path` from a cold or stopped state.
    pub fn play(&self, path: &Path) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        state.current_file = Some(path.to_path_buf());
        self.inner.has_error.store(false, Ordering::SeqCst);
        self.cancel_finish_timer(&mut state);
        self.stop_extraction(&mut state);

        match self.start_extraction(&mut state, path) {
            Ok(info) => {
                state.state = VideoState::Playing;
                info!(path = %path.display(), "video playing");
                self.arm_finish_timer(&mut state, info);
                Ok(())
            }
            Err(err) => {
                error!(path = %path.display(), "failed to start video: {err}");
                self.inner.has_error.store(true, Ordering::SeqCst);
                state.state = VideoState::Error;
                Err(err)
            }
        }
    }

    /// Valid only while playing; signals the extraction context instead of
    /// stopping it so resume is immediate.
    pub fn pause(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        if state.state != VideoState::Playing {
            return Ok(());
        }
        if let Some(ctx) = &state.extraction {
            if ctx.control_tx.send(ExtractControl::Pause).is_err() {
                self.inner.has_error.store(true, Ordering::SeqCst);
                state.state = VideoState::Error;
                return Err(Error::InvalidState("extraction context gone on pause"));
            }
        }
        state.state = VideoState::Paused;
        debug!("video paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        if state.state != VideoState::Paused {
            return Ok(());
        }
        if let Some(ctx) = &state.extraction {
            if ctx.control_tx.send(ExtractControl::Resume).is_err() {
                self.inner.has_error.store(true, Ordering::SeqCst);
                state.state = VideoState::Error;
                return Err(Error::InvalidState("extraction context gone on resume"));
            }
        }
        state.state = VideoState::Playing;
        debug!("video resumed");
        Ok(())
    }

    /// Always valid; halts extraction and clears state back to stopped.
    pub fn stop(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        if state.state == VideoState::Stopped {
            return Ok(());
        }
        state.state = VideoState::Stopped;
        self.inner.has_error.store(false, Ordering::SeqCst);
        self.cancel_finish_timer(&mut state);
        self.stop_extraction(&mut state);
        debug!("video stopped");
        Ok(())
    }

    /// Soft switch for video-to-video transitions: stops extraction without
    /// tearing down buffers or the adapter, swaps the source, restarts.
    pub fn switch_file(&self, path: &Path) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        info!(path = %path.display(), "switching video");

        state.current_file = Some(path.to_path_buf());
        self.cancel_finish_timer(&mut state);
        if state.state != VideoState::Stopped {
            self.stop_extraction(&mut state);
        }
        self.inner.has_error.store(false, Ordering::SeqCst);

        match self.start_extraction(&mut state, path) {
            Ok(info) => {
                state.state = VideoState::Playing;
                self.arm_finish_timer(&mut state, info);
                Ok(())
            }
            Err(err) => {
                error!(path = %path.display(), "failed to switch video: {err}");
                self.inner.has_error.store(true, Ordering::SeqCst);
                state.state = VideoState::Error;
                Err(err)
            }
        }
    }

    /// Replays the last file set on the engine.
    pub fn restart_current(&self) -> Result<(), Error> {
        let path = self
            .inner
            .state
            .lock()
            .current_file
            .clone()
            .ok_or(Error::NoCurrentFile)?;
        info!(path = %path.display(), "restarting current video");
        self.stop()?;
        self.play(&path)
    }

    fn start_extraction(
        &self,
        state: &mut PlayerState,
        path: &Path,
    ) -> Result<StreamInfo, Error> {
        let mut adapter = self
            .inner
            .adapter
            .lock()
            .take()
            .unwrap_or_else(|| (self.inner.adapter_factory)());

        let extract_audio = self.inner.audio.is_some();
        let info = match adapter.open(path, extract_audio) {
            Ok(info) => info,
            Err(err) => {
                *self.inner.adapter.lock() = Some(adapter);
                return Err(err);
            }
        };
        state.info = Some(info);

        if let (Some(audio), Some(params)) = (&self.inner.audio, info.audio) {
            audio.configure(params.sample_rate, params.channels, params.bits_per_sample);
            audio.set_volume(state.volume);
        }

        let (control_tx, control_rx) = bounded::<ExtractControl>(4);
        let (stopped_tx, stopped_rx) = bounded::<()>(1);
        let ring = Arc::clone(&self.inner.ring.lock());
        let worker = ExtractionWorker {
            adapter: Some(adapter),
            adapter_slot: Arc::clone(&self.inner.adapter),
            ring,
            engine: self.inner.engine.clone(),
            display: Arc::clone(&self.inner.display),
            audio: self.inner.audio.clone(),
            error_flag: ErrorFlag(Arc::clone(&self.inner.has_error)),
            control_rx,
            stopped_tx,
            frame_interval: frame_interval(info.fps),
        };
        let thread = thread::Builder::new()
            .name("video-extract".into())
            .spawn(move || worker.run())
            .map_err(Error::Io)?;

        state.extraction = Some(ExtractionContext {
            control_tx,
            stopped_rx,
            thread,
        });
        Ok(info)
    }

    /// Cooperative stop with bounded acknowledgment wait. An unresponsive
    /// context is abandoned: the frame ring gets a fresh mutex and the
    /// adapter is recreated, trading a potential leak for liveness.
    fn stop_extraction(&self, state: &mut PlayerState) {
        let Some(ctx) = state.extraction.take() else {
            return;
        };
        let _ = ctx.control_tx.send(ExtractControl::Stop);
        match ctx.stopped_rx.recv_timeout(self.inner.opts.stop_timeout) {
            Ok(()) => {
                let _ = ctx.thread.join();
            }
            Err(_) => {
                warn!(
                    "{}; forcing cleanup",
                    Error::ExtractionStall(self.inner.opts.stop_timeout)
                );
                let buffer_size = self.inner.engine.limits().max_frame_bytes();
                *self.inner.ring.lock() = Arc::new(Mutex::new(FrameRing::new(buffer_size)));
                *self.inner.adapter.lock() = Some((self.inner.adapter_factory)());
                // The thread handle is dropped without joining; the stuck
                // context can no longer touch live playback state.
            }
        }
    }

    fn arm_finish_timer(&self, state: &mut PlayerState, info: StreamInfo) {
        let Some(duration) = info.duration else {
            debug!("no duration reported, finish timer not armed");
            return;
        };
        let token = CancellationToken::new();
        state.finish_cancel = Some(token.clone());
        let deadline = duration + self.inner.opts.finish_margin;
        let requests = self.inner.requests.clone();
        self.inner.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    debug!(?deadline, "video finish timer fired");
                    if requests.send(ControllerRequest::VideoFinished).await.is_err() {
                        warn!("controller request channel closed, finish dropped");
                    }
                }
            }
        });
        info!(?deadline, "finish timer armed");
    }

    fn cancel_finish_timer(&self, state: &mut PlayerState) {
        if let Some(token) = state.finish_cancel.take() {
            token.cancel();
        }
    }
}

/// Sticky error flag shared with the extraction thread.
struct ErrorFlag(Arc<AtomicBool>);

fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(1_000_000 / u64::from(fps))
    }
}

struct ExtractionWorker {
    adapter: Option<Box<dyn ContainerAdapter>>,
    adapter_slot: Arc<Mutex<Option<Box<dyn ContainerAdapter>>>>,
    ring: Arc<Mutex<FrameRing>>,
    engine: SharedJpegDecoder,
    display: Arc<dyn DisplaySurface>,
    audio: Option<Arc<dyn AudioSink>>,
    error_flag: ErrorFlag,
    control_rx: Receiver<ExtractControl>,
    stopped_tx: Sender<()>,
    frame_interval: Duration,
}

impl ExtractionWorker {
    fn run(mut self) {
        let mut adapter = self.adapter.take().expect("worker built with adapter");
        let mut paused = false;

        loop {
            match self.control_rx.try_recv() {
                Ok(ExtractControl::Stop) => break,
                Ok(ExtractControl::Pause) => paused = true,
                Ok(ExtractControl::Resume) => paused = false,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            if paused {
                // Block on the next control message instead of spinning.
                match self.control_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(ExtractControl::Stop) => break,
                    Ok(ExtractControl::Resume) => paused = false,
                    Ok(ExtractControl::Pause) => {}
                    Err(_) => {}
                }
                continue;
            }

            match adapter.next_packet() {
                Ok(Some(Packet::Video(bytes))) => {
                    if let Err(err) = self.decode_and_deliver(&bytes) {
                        error!("frame decode failed: {err}");
                        self.error_flag.0.store(true, Ordering::SeqCst);
                        break;
                    }
                    if !self.frame_interval.is_zero() {
                        thread::sleep(self.frame_interval);
                    }
                }
                Ok(Some(Packet::Audio(samples))) => {
                    if let Some(audio) = &self.audio {
                        audio.push(&samples);
                    }
                }
                Ok(None) => {
                    debug!("end of stream");
                    break;
                }
                Err(err) => {
                    error!("packet read failed: {err}");
                    self.error_flag.0.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }

        adapter.close();
        *self.adapter_slot.lock() = Some(adapter);
        let _ = self.stopped_tx.send(());
    }

    fn decode_and_deliver(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut handle = self.engine.acquire()?;
        let mut ring = self.ring.lock();
        let next = (ring.live + 1) % ring.buffers.len();
        let dims = {
            let buffer = &mut ring.buffers[next];
            handle.decode(bytes, buffer)?
        };
        drop(handle);
        ring.live = next;
        ring.dims = Some((dims.width, dims.height));

        let frame = FrameView {
            width: dims.width,
            height: dims.height,
            pixels: &ring.buffers[ring.live]
                [..dims.width as usize * dims.height as usize * BYTES_PER_PIXEL],
        };
        self.display.show_video_frame(frame);
        Ok(())
    }
}

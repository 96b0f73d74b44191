//! Shared fixtures: real encoded media files and a recording display.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use media_frame::album::Album;
use media_frame::config::{
    Configuration, DisplayGeometry, FitPolicy, ScanOptions, SlideshowOptions, VideoOptions,
};
use media_frame::decode::{DecodeLimits, SharedJpegDecoder};
use media_frame::demux::{AviMotionJpeg, build_mjpeg_avi};
use media_frame::display::{DisplaySurface, UiMode};
use media_frame::events::ControllerRequest;
use media_frame::frame::FrameView;
use media_frame::pool::ScratchPool;
use media_frame::tasks::slideshow::Slideshow;
use media_frame::video::VideoPlayer;

pub fn write_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(width, height, image::Rgb([60, 90, 30]))
        .save_with_format(&path, image::ImageFormat::Jpeg)
        .unwrap();
    path
}

/// PNG with a valid signature and IHDR but corrupt data: passes the scan's
/// header validation, fails at decode.
pub fn write_corrupt_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0u8; 256]);
    std::fs::write(&path, &bytes).unwrap();
    path
}

pub fn write_avi(dir: &Path, name: &str, frame_count: usize, fps: u32) -> PathBuf {
    let img = image::RgbImage::from_pixel(32, 32, image::Rgb([0, 40, 200]));
    let mut jpeg = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut jpeg),
        image::ImageFormat::Jpeg,
    )
    .unwrap();
    let frames: Vec<Vec<u8>> = (0..frame_count).map(|_| jpeg.clone()).collect();
    let avi = build_mjpeg_avi(&frames, 32, 32, fps, &[]);
    let path = dir.join(name);
    std::fs::write(&path, &avi).unwrap();
    path
}

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

    pub fn saw(&self, call: &DisplayCall) -> bool {
        self.calls.lock().iter().any(|c| c == call)
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

pub struct Stack {
    pub album: Arc<Album>,
    pub display: Arc<RecordingDisplay>,
    pub video: VideoPlayer,
    pub slideshow: Slideshow,
    pub requests_rx: mpsc::Receiver<ControllerRequest>,
    pub cancel: CancellationToken,
}

pub fn test_config(library: &Path) -> Configuration {
    Configuration {
        media_library_path: library.to_path_buf(),
        display: DisplayGeometry {
            width: 1024,
            height: 600,
            fit: FitPolicy::Auto,
        },
        slideshow: SlideshowOptions::default(),
        scan: ScanOptions::default(),
        decode: Default::default(),
        video: VideoOptions::default(),
        mutation_queue_capacity: 8,
        watch_library: false,
        usb: None,
    }
}

/// Builds the full playback stack around a recording display. Must run
/// inside a tokio runtime (the slideshow task and finish timers spawn onto
/// it).
pub fn build_stack(library: &Path) -> Stack {
    let cfg = test_config(library);
    let engine = SharedJpegDecoder::new(
        DecodeLimits::from_options(&cfg.decode),
        cfg.decode.acquire_timeout,
    );
    let pool = Arc::new(ScratchPool::new(cfg.scan.max_file_bytes as usize));
    let display = Arc::new(RecordingDisplay::new());
    let (requests_tx, requests_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let (slideshow, _task) = Slideshow::spawn(
        cfg.slideshow.interval,
        cfg.slideshow.idle_timeout,
        requests_tx.clone(),
        cancel.clone(),
    );

    let surface: Arc<dyn DisplaySurface> = display.clone();
    let video = VideoPlayer::new(
        cfg.video.clone(),
        engine.clone(),
        Arc::clone(&surface),
        None,
        Box::new(|| Box::new(AviMotionJpeg::new())),
        requests_tx,
        tokio::runtime::Handle::current(),
    );

    let album = Arc::new(Album::new(
        cfg,
        engine,
        pool,
        video.clone(),
        slideshow.clone(),
        surface,
    ));

    Stack {
        album,
        display,
        video,
        slideshow,
        requests_rx,
        cancel,
    }
}

/// Let the slideshow task drain its command queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

/// Polls `pred` until it holds or the timeout elapses.
pub async fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

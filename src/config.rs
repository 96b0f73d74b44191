use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Top-level appliance configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Root of the media tree on the storage volume.
    pub media_library_path: PathBuf,
    #[serde(default)]
    pub display: DisplayGeometry,
    #[serde(default)]
    pub slideshow: SlideshowOptions,
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub decode: DecodeOptions,
    #[serde(default)]
    pub video: VideoOptions,
    /// Capacity of the mutation queue; producers drop (with a warning) when full.
    #[serde(default = "Configuration::default_mutation_queue_capacity")]
    pub mutation_queue_capacity: usize,
    /// Watch the library with a filesystem watcher and refresh on changes.
    #[serde(default = "Configuration::default_watch_library")]
    pub watch_library: bool,
    /// USB device-mode integration; omit to run slideshow-only.
    #[serde(default)]
    pub usb: Option<UsbOptions>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DisplayGeometry {
    #[serde(default = "DisplayGeometry::default_width")]
    pub width: u32,
    #[serde(default = "DisplayGeometry::default_height")]
    pub height: u32,
    /// How oversized images are mapped onto the panel. `auto` picks between
    /// letterboxing and center-cropping based on source orientation.
    #[serde(default)]
    pub fit: FitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitPolicy {
    #[default]
    Auto,
    Fit,
    Fill,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SlideshowOptions {
    /// Per-item dwell time for automatic advance.
    #[serde(with = "humantime_serde", default = "SlideshowOptions::default_interval")]
    pub interval: Duration,
    /// Preset menu offered by the settings panel.
    #[serde(
        default = "SlideshowOptions::default_presets",
        deserialize_with = "deserialize_duration_vec"
    )]
    pub interval_presets: Vec<Duration>,
    /// How long after the last manual gesture automatic advance re-arms.
    #[serde(with = "humantime_serde", default = "SlideshowOptions::default_idle_timeout")]
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScanOptions {
    #[serde(default = "ScanOptions::default_recursive")]
    pub recursive: bool,
    /// Files below this are rejected as implausible before any decode attempt.
    #[serde(default = "ScanOptions::default_min_file_bytes")]
    pub min_file_bytes: u64,
    /// Files above this are rejected as implausible.
    #[serde(default = "ScanOptions::default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Hard ceiling on collection size; the scan stops once reached.
    #[serde(default = "ScanOptions::default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub sort: SortMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    #[default]
    ByName,
    ByModified,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DecodeOptions {
    /// Bounded wait for the shared decode unit. Exceeding it is a logic
    /// error surfaced as `Error::DecoderBusy`, never a hang.
    #[serde(with = "humantime_serde", default = "DecodeOptions::default_acquire_timeout")]
    pub acquire_timeout: Duration,
    /// Largest frame the decode buffers are sized for.
    #[serde(default = "DecodeOptions::default_max_width")]
    pub max_width: u32,
    #[serde(default = "DecodeOptions::default_max_height")]
    pub max_height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VideoOptions {
    /// Bounded wait for the extraction context to acknowledge a stop.
    #[serde(with = "humantime_serde", default = "VideoOptions::default_stop_timeout")]
    pub stop_timeout: Duration,
    /// Margin added to the reported duration before the finish timer fires.
    #[serde(with = "humantime_serde", default = "VideoOptions::default_finish_margin")]
    pub finish_margin: Duration,
    #[serde(default = "VideoOptions::default_volume")]
    pub default_volume: i32,
    #[serde(default = "VideoOptions::default_volume_step")]
    pub volume_step: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UsbOptions {
    /// Sysfs state file of the USB device controller (e.g.
    /// `/sys/class/udc/<name>/state`).
    pub state_path: PathBuf,
    #[serde(with = "humantime_serde", default = "UsbOptions::default_poll_interval")]
    pub poll_interval: Duration,
}

impl Configuration {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        let cfg: Configuration = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.display.width > 0 && self.display.height > 0,
            "display dimensions must be positive"
        );
        ensure!(
            self.slideshow.interval >= Duration::from_millis(500),
            "slideshow interval below 500ms would thrash the loader"
        );
        ensure!(
            !self.slideshow.interval_presets.is_empty(),
            "slideshow interval preset menu must not be empty"
        );
        ensure!(
            self.scan.min_file_bytes < self.scan.max_file_bytes,
            "scan.min-file-bytes must be below scan.max-file-bytes"
        );
        ensure!(self.scan.max_entries > 0, "scan.max-entries must be positive");
        ensure!(
            self.decode.max_width >= self.display.width
                && self.decode.max_height >= self.display.height,
            "decode ceiling must cover the display"
        );
        ensure!(
            self.video.volume_step > 0,
            "video.volume-step must be positive"
        );
        Ok(self)
    }

    fn default_mutation_queue_capacity() -> usize {
        8
    }

    fn default_watch_library() -> bool {
        true
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            fit: FitPolicy::Auto,
        }
    }
}

impl DisplayGeometry {
    fn default_width() -> u32 {
        1024
    }

    fn default_height() -> u32 {
        600
    }
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
            interval_presets: Self::default_presets(),
            idle_timeout: Self::default_idle_timeout(),
        }
    }
}

impl SlideshowOptions {
    fn default_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_presets() -> Vec<Duration> {
        [2, 3, 5, 10, 15, 30, 60]
            .into_iter()
            .map(Duration::from_secs)
            .collect()
    }

    fn default_idle_timeout() -> Duration {
        Duration::from_secs(3)
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: Self::default_recursive(),
            min_file_bytes: Self::default_min_file_bytes(),
            max_file_bytes: Self::default_max_file_bytes(),
            max_entries: Self::default_max_entries(),
            sort: SortMode::ByName,
        }
    }
}

impl ScanOptions {
    fn default_recursive() -> bool {
        true
    }

    fn default_min_file_bytes() -> u64 {
        100
    }

    fn default_max_file_bytes() -> u64 {
        10 * 1024 * 1024
    }

    fn default_max_entries() -> usize {
        1000
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Self::default_acquire_timeout(),
            max_width: Self::default_max_width(),
            max_height: Self::default_max_height(),
        }
    }
}

impl DecodeOptions {
    fn default_acquire_timeout() -> Duration {
        Duration::from_secs(1)
    }

    fn default_max_width() -> u32 {
        1920
    }

    fn default_max_height() -> u32 {
        1080
    }
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Self::default_stop_timeout(),
            finish_margin: Self::default_finish_margin(),
            default_volume: Self::default_volume(),
            volume_step: Self::default_volume_step(),
        }
    }
}

impl VideoOptions {
    fn default_stop_timeout() -> Duration {
        Duration::from_secs(1)
    }

    fn default_finish_margin() -> Duration {
        Duration::from_millis(500)
    }

    fn default_volume() -> i32 {
        50
    }

    fn default_volume_step() -> i32 {
        10
    }
}

impl UsbOptions {
    fn default_poll_interval() -> Duration {
        Duration::from_secs(2)
    }
}

fn deserialize_duration_vec<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<humantime_serde::Serde<Duration>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(humantime_serde::Serde::into_inner).collect())
}

use std::path::PathBuf;
use std::time::Duration;

use media_frame::config::{Configuration, FitPolicy, SortMode};

#[test]
fn parse_minimal_kebab_case_config() {
    let yaml = r#"
media-library-path: "/media/photos"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.media_library_path, PathBuf::from("/media/photos"));
    assert_eq!(cfg.display.width, 1024);
    assert_eq!(cfg.display.height, 600);
    assert_eq!(cfg.slideshow.interval, Duration::from_secs(5));
    assert_eq!(cfg.slideshow.idle_timeout, Duration::from_secs(3));
    assert_eq!(cfg.scan.max_entries, 1000);
    assert_eq!(cfg.scan.sort, SortMode::ByName);
    assert_eq!(cfg.decode.max_width, 1920);
    assert_eq!(cfg.decode.max_height, 1080);
    assert!(cfg.watch_library);
    assert!(cfg.usb.is_none());
    assert!(cfg.validated().is_ok());
}

#[test]
fn parse_full_config_with_durations() {
    let yaml = r#"
media-library-path: "/media/photos"
display:
  width: 800
  height: 480
  fit: fill
slideshow:
  interval: 10s
  interval-presets: [2s, 5s, 10s, 30s]
  idle-timeout: 5s
scan:
  recursive: false
  min-file-bytes: 200
  max-file-bytes: 5242880
  max-entries: 100
  sort: by-modified
decode:
  acquire-timeout: 2s
  max-width: 1280
  max-height: 720
video:
  stop-timeout: 500ms
  finish-margin: 250ms
  default-volume: 30
  volume-step: 5
mutation-queue-capacity: 4
watch-library: false
usb:
  state-path: "/sys/class/udc/fe980000.usb/state"
  poll-interval: 1s
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.display.fit, FitPolicy::Fill);
    assert_eq!(cfg.slideshow.interval, Duration::from_secs(10));
    assert_eq!(cfg.slideshow.interval_presets.len(), 4);
    assert!(!cfg.scan.recursive);
    assert_eq!(cfg.scan.sort, SortMode::ByModified);
    assert_eq!(cfg.video.stop_timeout, Duration::from_millis(500));
    assert_eq!(cfg.video.default_volume, 30);
    assert_eq!(cfg.mutation_queue_capacity, 4);
    let usb = cfg.usb.as_ref().unwrap();
    assert_eq!(usb.poll_interval, Duration::from_secs(1));
    assert!(cfg.validated().is_ok());
}

#[test]
fn validation_rejects_inverted_size_bounds() {
    let yaml = r#"
media-library-path: "/media/photos"
scan:
  min-file-bytes: 1000
  max-file-bytes: 100
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn validation_rejects_decode_ceiling_below_display() {
    let yaml = r#"
media-library-path: "/media/photos"
display:
  width: 1920
  height: 1080
decode:
  max-width: 1024
  max-height: 600
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn validation_rejects_empty_preset_menu() {
    let yaml = r#"
media-library-path: "/media/photos"
slideshow:
  interval-presets: []
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn unknown_fields_are_rejected() {
    let yaml = r#"
media-library-path: "/media/photos"
unexpected-knob: true
"#;
    let parsed: Result<Configuration, _> = serde_yaml::from_str(yaml);
    assert!(parsed.is_err());
}

//! Still-image path: read file bytes, decode, map onto the panel.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use crate::collection::{ImageContainer, MediaEntry};
use crate::config::{DisplayGeometry, ScanOptions};
use crate::decode::{self, SharedJpegDecoder};
use crate::error::Error;
use crate::frame::{BYTES_PER_PIXEL, DecodedFrame, FrameView};
use crate::pool::ScratchPool;
use crate::processing;

/// Chunk size tuned for the storage medium's optimal transfer size.
const READ_CHUNK: usize = 32 * 1024;

/// A loaded image: the decoded source plus, when the source exceeded the
/// panel, the processed rendition. With no processing the display view
/// aliases the decoded buffer; nothing is copied or double-owned.
#[derive(Debug)]
pub struct LoadedImage {
    pub decoded: DecodedFrame,
    pub processed: Option<DecodedFrame>,
}

impl LoadedImage {
    pub fn display_view(&self) -> FrameView<'_> {
        self.processed.as_ref().unwrap_or(&self.decoded).view()
    }
}

pub struct MediaLoader {
    engine: SharedJpegDecoder,
    pool: Arc<ScratchPool>,
    display: DisplayGeometry,
    min_file_bytes: u64,
    max_file_bytes: u64,
}

impl MediaLoader {
    pub fn new(
        engine: SharedJpegDecoder,
        pool: Arc<ScratchPool>,
        display: DisplayGeometry,
        scan: &ScanOptions,
    ) -> Self {
        Self {
            engine,
            pool,
            display,
            min_file_bytes: scan.min_file_bytes,
            max_file_bytes: scan.max_file_bytes,
        }
    }

    /// Reads, decodes, orients and (when needed) rescales one image entry.
    pub fn load_and_decode(&self, entry: &MediaEntry) -> Result<LoadedImage, Error> {
        let meta = std::fs::metadata(&entry.path)?;
        // Cheap plausibility pre-check before any read or decode work.
        if meta.len() < self.min_file_bytes || meta.len() > self.max_file_bytes {
            return Err(Error::ImplausibleSize {
                path: entry.path.clone(),
                size: meta.len(),
            });
        }

        let mut scratch = self.pool.checkout(meta.len() as usize)?;
        read_chunked(&entry.path, scratch.as_mut_slice())?;
        let bytes = scratch.as_slice();

        let container = entry.container.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{} has no image container", entry.path.display()))
        })?;

        let mut decoded = match container {
            ImageContainer::Jpeg => self.decode_jpeg(entry, bytes)?,
            ImageContainer::Png => self.decode_png(entry, bytes)?,
        };

        if let Some(orientation) = read_orientation(bytes) {
            decoded = apply_orientation(decoded, orientation);
        }

        let processed = if processing::needs_processing(
            decoded.width(),
            decoded.height(),
            &self.display,
        ) {
            let mode = processing::select_mode(decoded.width(), decoded.height(), &self.display);
            let plan = processing::plan(
                decoded.width(),
                decoded.height(),
                self.display.width,
                self.display.height,
                mode,
            );
            let out = processing::apply(&decoded, &plan)?;
            debug!(
                from = format!("{}x{}", decoded.width(), decoded.height()),
                to = format!("{}x{}", out.width(), out.height()),
                ?mode,
                "image processed for display"
            );
            Some(out)
        } else {
            None
        };

        Ok(LoadedImage { decoded, processed })
    }

    fn decode_jpeg(&self, entry: &MediaEntry, bytes: &[u8]) -> Result<DecodedFrame, Error> {
        let (width, height) = decode::jpeg_header_dimensions(bytes).map_err(|err| {
            Error::DecodeFailed {
                path: entry.path.clone(),
                reason: err.to_string(),
            }
        })?;
        decode::check_dimensions(width, height, &self.engine.limits())?;
        decode::check_alignment(width, height)?;

        let mut out = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        // The handle is held only for the decode call itself.
        let mut handle = self.engine.acquire()?;
        let dims = handle.decode(bytes, &mut out).map_err(|err| match err {
            Error::JpegDecode(reason) => Error::DecodeFailed {
                path: entry.path.clone(),
                reason,
            },
            other => other,
        })?;
        drop(handle);

        DecodedFrame::from_rgba8(dims.width, dims.height, out).ok_or_else(|| Error::DecodeFailed {
            path: entry.path.clone(),
            reason: "decoded length mismatch".into(),
        })
    }

    fn decode_png(&self, entry: &MediaEntry, bytes: &[u8]) -> Result<DecodedFrame, Error> {
        let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|err| Error::DecodeFailed {
                path: entry.path.clone(),
                reason: err.to_string(),
            })?
            .to_rgba8();
        decode::check_dimensions(img.width(), img.height(), &self.engine.limits())?;
        let (width, height) = img.dimensions();
        DecodedFrame::from_rgba8(width, height, img.into_raw()).ok_or_else(|| {
            Error::DecodeFailed {
                path: entry.path.clone(),
                reason: "decoded length mismatch".into(),
            }
        })
    }
}

fn read_chunked(path: &std::path::Path, out: &mut [u8]) -> Result<(), Error> {
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < out.len() {
        let end = (filled + READ_CHUNK).min(out.len());
        let n = file.read(&mut out[filled..end])?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read at {filled} of {} bytes", out.len()),
            )));
        }
        filled += n;
    }
    Ok(())
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let mut reader = BufReader::new(Cursor::new(bytes));
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).map(|v| v as u16)
}

// EXIF orientation mapping; unsupported values pass the image through.
fn apply_orientation(frame: DecodedFrame, orientation: u16) -> DecodedFrame {
    if orientation <= 1 || orientation > 8 {
        return frame;
    }
    let (width, height) = (frame.width(), frame.height());
    let img =
        RgbaImage::from_raw(width, height, frame.into_raw()).expect("frame length invariant");
    let img = match orientation {
        2 => image::imageops::flip_horizontal(&img),
        3 => image::imageops::rotate180(&img),
        4 => image::imageops::flip_vertical(&img),
        5 => image::imageops::flip_horizontal(&image::imageops::rotate90(&img)),
        6 => image::imageops::rotate90(&img),
        7 => image::imageops::flip_horizontal(&image::imageops::rotate270(&img)),
        8 => image::imageops::rotate270(&img),
        _ => img,
    };
    let (width, height) = img.dimensions();
    DecodedFrame::from_rgba8(width, height, img.into_raw()).expect("orientation output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitPolicy;
    use crate::decode::DecodeLimits;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn loader_for(display: DisplayGeometry) -> MediaLoader {
        let engine = SharedJpegDecoder::new(
            DecodeLimits {
                max_width: 1920,
                max_height: 1080,
            },
            Duration::from_millis(200),
        );
        let pool = Arc::new(ScratchPool::new(10 * 1024 * 1024));
        MediaLoader::new(engine, pool, display, &ScanOptions::default())
    }

    fn entry_for(path: &Path, container: ImageContainer) -> MediaEntry {
        MediaEntry {
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            kind: crate::collection::MediaKind::Image,
            container: Some(container),
            byte_len: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            modified: SystemTime::now(),
        }
    }

    fn display(width: u32, height: u32) -> DisplayGeometry {
        DisplayGeometry {
            width,
            height,
            fit: FitPolicy::Auto,
        }
    }

    #[test]
    fn small_image_is_displayed_unprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.jpg");
        image::RgbImage::from_pixel(64, 48, image::Rgb([1, 2, 3]))
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .unwrap();

        let loader = loader_for(display(1024, 600));
        let loaded = loader
            .load_and_decode(&entry_for(&path, ImageContainer::Jpeg))
            .unwrap();
        assert!(loaded.processed.is_none());
        let view = loaded.display_view();
        assert_eq!((view.width, view.height), (64, 48));
        // the display view aliases the decoded buffer
        assert_eq!(view.pixels.as_ptr(), loaded.decoded.pixels().as_ptr());
    }

    #[test]
    fn oversized_landscape_is_center_cropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.jpg");
        image::RgbImage::from_pixel(256, 128, image::Rgb([9, 9, 9]))
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .unwrap();

        let loader = loader_for(display(100, 60));
        let loaded = loader
            .load_and_decode(&entry_for(&path, ImageContainer::Jpeg))
            .unwrap();
        let view = loaded.display_view();
        assert_eq!((view.width, view.height), (100, 60));
        assert!(loaded.processed.is_some());
    }

    #[test]
    fn implausible_size_fails_before_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.jpg");
        std::fs::write(&path, b"short").unwrap();

        let loader = loader_for(display(1024, 600));
        let err = loader
            .load_and_decode(&entry_for(&path, ImageContainer::Jpeg))
            .unwrap_err();
        assert!(matches!(err, Error::ImplausibleSize { .. }));
    }

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    #[test]
    fn exif_orientation_is_read_and_applied() {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        assert_eq!(read_orientation(&bytes), Some(6));

        // rotate 90 CW turns a 2x1 frame into 1x2
        let frame = DecodedFrame::from_rgba8(2, 1, vec![0; 8]).unwrap();
        let rotated = apply_orientation(frame, 6);
        assert_eq!((rotated.width(), rotated.height()), (1, 2));

        // unsupported values pass through untouched
        let frame = DecodedFrame::from_rgba8(2, 1, vec![0; 8]).unwrap();
        let same = apply_orientation(frame, 9);
        assert_eq!((same.width(), same.height()), (2, 1));
    }

    #[test]
    fn corrupt_png_reports_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        // Valid signature + IHDR dimensions, garbage after.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&64u32.to_be_bytes());
        bytes.extend_from_slice(&64u32.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes.extend_from_slice(&[0u8; 200]);
        std::fs::write(&path, &bytes).unwrap();

        let loader = loader_for(display(1024, 600));
        let err = loader
            .load_and_decode(&entry_for(&path, ImageContainer::Png))
            .unwrap_err();
        assert!(matches!(err, Error::DecodeFailed { .. }));
        assert!(err.is_skippable());
    }
}

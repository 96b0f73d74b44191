//! In-memory listing of the media tree: scan, validate, sort, index.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use image::ImageFormat;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ScanOptions, SortMode};
use crate::decode::{self, DecodeLimits};
use crate::error::Error;

/// How far into a file we look for magic numbers and header dimensions.
const HEADER_PROBE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageContainer {
    Jpeg,
    Png,
}

/// One scanned file. Immutable until the next rescan; owned by the collection.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Actual container format for images, as sniffed from the magic number.
    pub container: Option<ImageContainer>,
    pub byte_len: u64,
    pub modified: SystemTime,
}

/// Ordered media listing with a bounded capacity. Rescans repopulate the
/// same backing storage in place; the collection never grows past the
/// configured entry ceiling.
pub struct MediaCollection {
    entries: Vec<MediaEntry>,
    current: usize,
}

/// Media kind as claimed by the file extension.
pub fn classify(path: &Path) -> MediaKind {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return MediaKind::Unknown;
    };
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" => MediaKind::Image,
        "mp4" | "avi" | "mjpeg" => MediaKind::Video,
        _ => MediaKind::Unknown,
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

impl MediaCollection {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&MediaEntry> {
        self.entries.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_entry(&self) -> Option<&MediaEntry> {
        self.entries.get(self.current)
    }

    /// Moves the cursor; only meaningful while the collection is non-empty.
    pub fn set_current(&mut self, index: usize) -> Result<(), Error> {
        if index >= self.entries.len() {
            return Err(Error::IndexOutOfRange {
                index,
                count: self.entries.len(),
            });
        }
        self.current = index;
        Ok(())
    }

    pub fn find_by_name(&self, file_name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.file_name == file_name)
    }

    /// Walks `dir` and repopulates the listing in place.
    ///
    /// Fails fast when the directory is missing (storage unmounted) and on
    /// any directory open failure mid-walk; never partially populates on
    /// error. Individual files that fail validation are excluded silently
    /// (logged) rather than failing the scan.
    pub fn scan(
        &mut self,
        dir: &Path,
        opts: &ScanOptions,
        limits: &DecodeLimits,
    ) -> Result<(), Error> {
        if !dir.is_dir() {
            return Err(Error::StorageUnavailable(dir.to_path_buf()));
        }

        let mut walker = WalkDir::new(dir).follow_links(true);
        if !opts.recursive {
            walker = walker.max_depth(1);
        }

        let mut fresh: Vec<MediaEntry> = Vec::new();
        for entry in walker.into_iter().filter_entry(|e| {
            e.depth() == 0 || e.file_name().to_str().is_none_or(|n| !is_hidden(n))
        }) {
            if fresh.len() >= opts.max_entries {
                info!(limit = opts.max_entries, "entry ceiling reached, stopping scan");
                break;
            }
            let entry = entry.map_err(|err| {
                warn!("scan aborted: {err}");
                Error::StorageUnavailable(dir.to_path_buf())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let kind = classify(path);
            if kind == MediaKind::Unknown {
                continue;
            }
            let meta = entry.metadata().map_err(|err| {
                warn!(path = %path.display(), "scan aborted on metadata: {err}");
                Error::StorageUnavailable(dir.to_path_buf())
            })?;

            let container = match kind {
                MediaKind::Image => match validate_image(path, meta.len(), opts, limits) {
                    Some(container) => Some(container),
                    None => continue,
                },
                _ => None,
            };

            fresh.push(MediaEntry {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path: path.to_path_buf(),
                kind,
                container,
                byte_len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Self::sort_entries(&mut fresh, opts.sort);

        // Reuse the backing storage; the ceiling bounds growth across rescans.
        self.entries.clear();
        self.entries.extend(fresh);
        if self.current >= self.entries.len() {
            self.current = 0;
        }
        debug!(count = self.entries.len(), "collection scan complete");
        Ok(())
    }

    pub fn sort_entries(entries: &mut [MediaEntry], mode: SortMode) {
        match mode {
            SortMode::ByName => {
                entries.sort_by(|a, b| {
                    a.file_name
                        .to_lowercase()
                        .cmp(&b.file_name.to_lowercase())
                });
            }
            SortMode::ByModified => {
                // Most recently modified last. Equal timestamps keep whatever
                // order the unstable sort produces.
                entries.sort_unstable_by(|a, b| a.modified.cmp(&b.modified));
            }
        }
    }
}

impl Default for MediaCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Header-level validation for an image candidate. Returns the actual
/// container (which may differ from the extension's claim) or `None` when
/// the file is excluded.
fn validate_image(
    path: &Path,
    byte_len: u64,
    opts: &ScanOptions,
    limits: &DecodeLimits,
) -> Option<ImageContainer> {
    if byte_len < opts.min_file_bytes {
        warn!(path = %path.display(), byte_len, "skip: file too small");
        return None;
    }
    if byte_len > opts.max_file_bytes {
        warn!(path = %path.display(), byte_len, "skip: file too large");
        return None;
    }

    let header = match read_header(path) {
        Ok(header) => header,
        Err(err) => {
            warn!(path = %path.display(), "skip: cannot read header: {err}");
            return None;
        }
    };

    // Sniff the magic number; a spoofed extension re-classifies the entry
    // when the true format is one we support.
    let container = match image::guess_format(&header) {
        Ok(ImageFormat::Jpeg) => ImageContainer::Jpeg,
        Ok(ImageFormat::Png) => ImageContainer::Png,
        Ok(other) => {
            warn!(path = %path.display(), format = ?other, "skip: unsupported image format");
            return None;
        }
        Err(_) => {
            warn!(path = %path.display(), "skip: unrecognized magic number");
            return None;
        }
    };
    if container_claimed_by_extension(path) != Some(container) {
        debug!(path = %path.display(), actual = ?container, "extension mismatch, re-classified");
    }

    let (width, height) = match container {
        ImageContainer::Jpeg => match decode::jpeg_header_dimensions(&header) {
            Ok(dims) => dims,
            Err(err) => {
                warn!(path = %path.display(), "skip: jpeg header parse failed: {err}");
                return None;
            }
        },
        ImageContainer::Png => match png_header_dimensions(&header) {
            Some(dims) => dims,
            None => {
                warn!(path = %path.display(), "skip: png header truncated");
                return None;
            }
        },
    };

    if let Err(err) = decode::check_dimensions(width, height, limits) {
        warn!(path = %path.display(), "skip: {err}");
        return None;
    }
    if container == ImageContainer::Jpeg {
        if let Err(err) = decode::check_alignment(width, height) {
            warn!(path = %path.display(), "skip: {err}");
            return None;
        }
    }

    Some(container)
}

fn container_claimed_by_extension(path: &Path) -> Option<ImageContainer> {
    match path
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase()
        .as_str()
    {
        "jpg" | "jpeg" => Some(ImageContainer::Jpeg),
        "png" => Some(ImageContainer::Png),
        _ => None,
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut header = vec![0u8; HEADER_PROBE_BYTES];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);
    Ok(header)
}

/// Width/height straight out of the PNG IHDR chunk.
fn png_header_dimensions(header: &[u8]) -> Option<(u32, u32)> {
    if header.len() < 24 {
        return None;
    }
    let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits() -> DecodeLimits {
        DecodeLimits {
            max_width: 1920,
            max_height: 1080,
        }
    }

    fn write_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 40]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();
        path
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 40, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    fn entry_named(name: &str, modified: SystemTime) -> MediaEntry {
        MediaEntry {
            file_name: name.to_string(),
            path: PathBuf::from(name),
            kind: MediaKind::Image,
            container: Some(ImageContainer::Jpeg),
            byte_len: 1000,
            modified,
        }
    }

    #[test]
    fn scan_classifies_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        write_jpeg(dir.path(), "a.jpg", 64, 64);
        write_png(dir.path(), "b.png", 10, 10); // png needs no block alignment
        std::fs::write(dir.path().join("clip.avi"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not media").unwrap();
        std::fs::write(dir.path().join(".hidden.jpg"), b"hidden").unwrap();

        let mut collection = MediaCollection::new();
        collection
            .scan(dir.path(), &ScanOptions::default(), &limits())
            .unwrap();

        let names: Vec<_> = (0..collection.len())
            .map(|i| collection.entry(i).unwrap().file_name.clone())
            .collect();
        assert_eq!(names, ["a.jpg", "b.png", "clip.avi"]);
        assert_eq!(collection.entry(0).unwrap().kind, MediaKind::Image);
        assert_eq!(collection.entry(2).unwrap().kind, MediaKind::Video);
    }

    #[test]
    fn scan_rejects_invalid_images() {
        let dir = tempfile::tempdir().unwrap();
        write_jpeg(dir.path(), "unaligned.jpg", 10, 10); // fails block alignment
        std::fs::write(dir.path().join("tiny.jpg"), b"x").unwrap(); // below min size
        std::fs::write(dir.path().join("junk.png"), vec![0xAAu8; 512]).unwrap(); // bad magic
        write_jpeg(dir.path(), "ok.jpg", 64, 64);

        let mut collection = MediaCollection::new();
        collection
            .scan(dir.path(), &ScanOptions::default(), &limits())
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.entry(0).unwrap().file_name, "ok.jpg");
    }

    #[test]
    fn spoofed_extension_is_reclassified_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // JPEG bytes wearing a .png extension
        let jpeg = write_jpeg(dir.path(), "tmp.jpg", 64, 64);
        let spoofed = dir.path().join("actually-jpeg.png");
        std::fs::rename(&jpeg, &spoofed).unwrap();

        let mut collection = MediaCollection::new();
        collection
            .scan(dir.path(), &ScanOptions::default(), &limits())
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.entry(0).unwrap().container,
            Some(ImageContainer::Jpeg)
        );
    }

    #[test]
    fn scan_stops_at_entry_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write_jpeg(dir.path(), &format!("img-{i}.jpg"), 16, 16);
        }
        let opts = ScanOptions {
            max_entries: 2,
            ..ScanOptions::default()
        };
        let mut collection = MediaCollection::new();
        collection.scan(dir.path(), &opts, &limits()).unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn scan_fails_fast_when_storage_is_missing() {
        let mut collection = MediaCollection::new();
        let err = collection
            .scan(
                Path::new("/definitely/not/mounted"),
                &ScanOptions::default(),
                &limits(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn sort_by_name_is_case_insensitive() {
        let now = SystemTime::now();
        let mut entries = vec![
            entry_named("Zebra.jpg", now),
            entry_named("apple.jpg", now),
            entry_named("Mango.jpg", now),
        ];
        MediaCollection::sort_entries(&mut entries, SortMode::ByName);
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["apple.jpg", "Mango.jpg", "Zebra.jpg"]);
    }

    #[test]
    fn sort_by_modified_puts_newest_last() {
        let base = SystemTime::UNIX_EPOCH;
        let mut entries = vec![
            entry_named("new.jpg", base + Duration::from_secs(300)),
            entry_named("old.jpg", base + Duration::from_secs(100)),
            entry_named("mid.jpg", base + Duration::from_secs(200)),
        ];
        MediaCollection::sort_entries(&mut entries, SortMode::ByModified);
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["old.jpg", "mid.jpg", "new.jpg"]);
    }

    #[test]
    fn find_by_name_locates_entry_after_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write_jpeg(dir.path(), "a.jpg", 16, 16);
        write_jpeg(dir.path(), "b.jpg", 16, 16);

        let mut collection = MediaCollection::new();
        collection
            .scan(dir.path(), &ScanOptions::default(), &limits())
            .unwrap();
        assert_eq!(collection.find_by_name("b.jpg"), Some(1));
        assert_eq!(collection.find_by_name("missing.jpg"), None);
    }
}

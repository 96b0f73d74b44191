//! The single shared hardware JPEG decode unit.
//!
//! Exactly one decode context exists per engine; both the still-image path
//! and the video frame path borrow it through [`SharedJpegDecoder::acquire`].
//! Holding the returned [`DecodeHandle`] IS holding the unit: the handle is
//! an owned lock guard, so two callers can never overlap, and release is
//! `Drop`. Acquisition waits a bounded time and then fails instead of
//! hanging the display.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::debug;

use crate::config::DecodeOptions;
use crate::error::Error;
use crate::frame::BYTES_PER_PIXEL;

/// The decode hardware consumes whole MCU blocks; dimensions must divide by this.
pub const BLOCK_ALIGNMENT: u32 = 8;

/// No single axis may exceed this regardless of total pixel count.
pub const AXIS_CEILING: u32 = 2560;

/// Size/shape ceilings the decode buffers are provisioned for.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl DecodeLimits {
    pub fn from_options(opts: &DecodeOptions) -> Self {
        Self {
            max_width: opts.max_width,
            max_height: opts.max_height,
        }
    }

    pub fn pixel_budget(&self) -> u64 {
        u64::from(self.max_width) * u64::from(self.max_height)
    }

    /// Output buffer size needed for the largest supported frame.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_width as usize * self.max_height as usize * BYTES_PER_PIXEL
    }
}

/// Rejects shapes the decode unit cannot produce a frame for.
pub fn check_dimensions(width: u32, height: u32, limits: &DecodeLimits) -> Result<(), Error> {
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "zero dimension",
        });
    }
    if width > AXIS_CEILING || height > AXIS_CEILING {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "exceeds per-axis ceiling",
        });
    }
    if u64::from(width) * u64::from(height) > limits.pixel_budget() {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "exceeds pixel budget",
        });
    }
    Ok(())
}

/// JPEG-only: the hardware requires block-aligned dimensions.
pub fn check_alignment(width: u32, height: u32) -> Result<(), Error> {
    if width % BLOCK_ALIGNMENT != 0 || height % BLOCK_ALIGNMENT != 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "not aligned to decode blocks",
        });
    }
    Ok(())
}

/// Parses just the JPEG header for true pixel dimensions.
pub fn jpeg_header_dimensions(bytes: &[u8]) -> Result<(u32, u32), Error> {
    let mut decoder = JpegDecoder::new(Cursor::new(bytes));
    decoder
        .read_info()
        .map_err(|err| Error::JpegDecode(err.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::JpegDecode("missing header info".into()))?;
    Ok((u32::from(info.width), u32::from(info.height)))
}

/// Decode result: true dimensions plus bytes written to the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedDims {
    pub width: u32,
    pub height: u32,
    pub bytes_written: usize,
}

// The one decode context. State lives here so a future hardware-backed unit
// can keep scratch tables across jobs without changing the callers.
struct DecodeUnit {
    jobs: u64,
}

/// Handle to the shared decode unit plus the reference-count bookkeeping.
#[derive(Clone)]
pub struct SharedJpegDecoder {
    unit: Arc<Mutex<DecodeUnit>>,
    refs: Arc<AtomicUsize>,
    acquire_timeout: Duration,
    limits: DecodeLimits,
}

/// Exclusive borrow of the decode unit for one or more decode jobs.
pub struct DecodeHandle {
    guard: ArcMutexGuard<RawMutex, DecodeUnit>,
    refs: Arc<AtomicUsize>,
    limits: DecodeLimits,
}

impl SharedJpegDecoder {
    pub fn new(limits: DecodeLimits, acquire_timeout: Duration) -> Self {
        debug!(
            max_width = limits.max_width,
            max_height = limits.max_height,
            "shared jpeg decoder initialized"
        );
        Self {
            unit: Arc::new(Mutex::new(DecodeUnit { jobs: 0 })),
            refs: Arc::new(AtomicUsize::new(0)),
            acquire_timeout,
            limits,
        }
    }

    /// Blocks up to the configured bound for exclusive use of the unit.
    ///
    /// Callers are expected to hold the handle only transiently; hitting the
    /// timeout means some caller is sitting on the unit and is surfaced as an
    /// error rather than a hang.
    pub fn acquire(&self) -> Result<DecodeHandle, Error> {
        let guard = self
            .unit
            .try_lock_arc_for(self.acquire_timeout)
            .ok_or(Error::DecoderBusy(self.acquire_timeout))?;
        let count = self.refs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(ref_count = count, "decode unit acquired");
        Ok(DecodeHandle {
            guard,
            refs: Arc::clone(&self.refs),
            limits: self.limits,
        })
    }

    /// Current number of live handles (observability; at most one by
    /// construction, except in the instant between drop and fetch).
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn limits(&self) -> DecodeLimits {
        self.limits
    }
}

impl DecodeHandle {
    /// Decodes a baseline JPEG into the caller-supplied RGBA8 buffer, which
    /// must be sized for the maximum supported frame.
    pub fn decode(&mut self, bytes: &[u8], out: &mut [u8]) -> Result<DecodedDims, Error> {
        let mut decoder = JpegDecoder::new(Cursor::new(bytes));
        decoder
            .read_info()
            .map_err(|err| Error::JpegDecode(err.to_string()))?;
        let info = decoder
            .info()
            .ok_or_else(|| Error::JpegDecode("missing header info".into()))?;
        let width = u32::from(info.width);
        let height = u32::from(info.height);

        check_dimensions(width, height, &self.limits)?;
        check_alignment(width, height)?;

        let needed = width as usize * height as usize * BYTES_PER_PIXEL;
        if out.len() < needed {
            return Err(Error::UnsupportedDimensions {
                width,
                height,
                reason: "exceeds output buffer",
            });
        }

        let pixels = decoder
            .decode()
            .map_err(|err| Error::JpegDecode(err.to_string()))?;
        expand_to_rgba8(&pixels, info.pixel_format, &mut out[..needed])?;

        self.guard.jobs += 1;
        debug!(
            width,
            height,
            job = self.guard.jobs,
            "jpeg decoded"
        );
        Ok(DecodedDims {
            width,
            height,
            bytes_written: needed,
        })
    }
}

impl Drop for DecodeHandle {
    fn drop(&mut self) {
        let count = self.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(ref_count = count, "decode unit released");
    }
}

fn expand_to_rgba8(pixels: &[u8], format: PixelFormat, out: &mut [u8]) -> Result<(), Error> {
    match format {
        PixelFormat::RGB24 => {
            for (src, dst) in pixels.chunks_exact(3).zip(out.chunks_exact_mut(4)) {
                dst[..3].copy_from_slice(src);
                dst[3] = 255;
            }
        }
        PixelFormat::L8 => {
            for (&v, dst) in pixels.iter().zip(out.chunks_exact_mut(4)) {
                dst[0] = v;
                dst[1] = v;
                dst[2] = v;
                dst[3] = 255;
            }
        }
        PixelFormat::CMYK32 => {
            for (src, dst) in pixels.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
                let k = f32::from(src[3]) / 255.0;
                for c in 0..3 {
                    let v = f32::from(src[c]) / 255.0;
                    let v = v * (1.0 - k) + k;
                    dst[c] = ((1.0 - v) * 255.0).round().clamp(0.0, 255.0) as u8;
                }
                dst[3] = 255;
            }
        }
        PixelFormat::L16 => {
            return Err(Error::JpegDecode(
                "16-bit grayscale output is not supported".into(),
            ));
        }
    }
    Ok(())
}

//! Maps decoded frames onto the fixed panel: crop/scale planning and apply.

use fast_image_resize as fir;

use crate::config::{DisplayGeometry, FitPolicy};
use crate::error::Error;
use crate::frame::DecodedFrame;

/// How an oversized source is mapped onto the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Preserve full content, letterbox.
    Fit,
    /// Crop to cover the whole panel.
    Fill,
    /// Already fits; show as-is.
    Center,
    /// Landscape content larger than the panel: center-crop, no rescale.
    CropOnly,
}

/// Source crop rectangle plus output dimensions for one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformPlan {
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_w: u32,
    pub crop_h: u32,
    pub out_w: u32,
    pub out_h: u32,
}

pub fn needs_processing(width: u32, height: u32, display: &DisplayGeometry) -> bool {
    width > display.width || height > display.height
}

/// Picks the transform from source shape vs panel shape.
///
/// Landscape sources that exceed the panel are center-cropped without
/// rescaling; portrait sources are letterboxed so nothing is lost. A
/// configured fit policy overrides the orientation heuristic.
pub fn select_mode(width: u32, height: u32, display: &DisplayGeometry) -> ScaleMode {
    let fits = width <= display.width && height <= display.height;
    if fits {
        return ScaleMode::Center;
    }
    match display.fit {
        FitPolicy::Fit => ScaleMode::Fit,
        FitPolicy::Fill => ScaleMode::Fill,
        FitPolicy::Auto => {
            if width >= height {
                ScaleMode::CropOnly
            } else {
                ScaleMode::Fit
            }
        }
    }
}

pub fn plan(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32, mode: ScaleMode) -> TransformPlan {
    let full = TransformPlan {
        crop_x: 0,
        crop_y: 0,
        crop_w: src_w,
        crop_h: src_h,
        out_w: src_w,
        out_h: src_h,
    };
    match mode {
        ScaleMode::Center => full,
        ScaleMode::Fit => {
            let scale = f64::min(
                f64::from(dst_w) / f64::from(src_w),
                f64::from(dst_h) / f64::from(src_h),
            );
            TransformPlan {
                out_w: ((f64::from(src_w) * scale) as u32).clamp(1, dst_w),
                out_h: ((f64::from(src_h) * scale) as u32).clamp(1, dst_h),
                ..full
            }
        }
        ScaleMode::Fill => {
            let scale = f64::max(
                f64::from(dst_w) / f64::from(src_w),
                f64::from(dst_h) / f64::from(src_h),
            );
            let crop_w = ((f64::from(dst_w) / scale) as u32).min(src_w).max(1);
            let crop_h = ((f64::from(dst_h) / scale) as u32).min(src_h).max(1);
            TransformPlan {
                crop_x: (src_w - crop_w) / 2,
                crop_y: (src_h - crop_h) / 2,
                crop_w,
                crop_h,
                out_w: dst_w,
                out_h: dst_h,
            }
        }
        ScaleMode::CropOnly => {
            let crop_w = src_w.min(dst_w);
            let crop_h = src_h.min(dst_h);
            TransformPlan {
                crop_x: (src_w - crop_w) / 2,
                crop_y: (src_h - crop_h) / 2,
                crop_w,
                crop_h,
                out_w: crop_w,
                out_h: crop_h,
            }
        }
    }
}

/// Executes a plan over an RGBA8 frame, producing a new owned frame.
pub fn apply(frame: &DecodedFrame, plan: &TransformPlan) -> Result<DecodedFrame, Error> {
    let src = fir::images::ImageRef::new(
        frame.width(),
        frame.height(),
        frame.pixels(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| Error::DecodeFailed {
        path: Default::default(),
        reason: format!("resize source view: {err}"),
    })?;

    let mut dst = fir::images::Image::new(plan.out_w, plan.out_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom))
        .crop(
            f64::from(plan.crop_x),
            f64::from(plan.crop_y),
            f64::from(plan.crop_w),
            f64::from(plan.crop_h),
        );
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src, &mut dst, Some(&options))
        .map_err(|err| Error::DecodeFailed {
            path: Default::default(),
            reason: format!("resize failed: {err}"),
        })?;

    DecodedFrame::from_rgba8(plan.out_w, plan.out_h, dst.into_vec()).ok_or_else(|| {
        Error::DecodeFailed {
            path: Default::default(),
            reason: "resize output length mismatch".into(),
        }
    })
}

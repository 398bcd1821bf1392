use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use super::types::{PlaneLayout, RawMask};
use crate::error::{PipelineError, Result};
use crate::imaging::{box_blur_alpha, resample_with, Mask};

/// Softening applied to every reconciled mask.
pub const MASK_BLUR_RADIUS: u32 = 1;

/// Turns whatever the backend produced into a frame-sized, softened alpha mask.
#[derive(Debug, Clone)]
pub struct MaskReconciler {
    filter: FilterType,
}

impl Default for MaskReconciler {
    fn default() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }
}

impl MaskReconciler {
    /// Reconcile `raw` against a `width` x `height` frame.
    ///
    /// Resampling is skipped when the mask already matches the frame; the
    /// radius-1 blur always runs.
    pub fn reconcile(&self, raw: Option<RawMask>, width: u32, height: u32) -> Result<Mask> {
        let _span = tracing::debug_span!("reconcile").entered();

        if width == 0 || height == 0 {
            return Err(PipelineError::MaskUnavailable(format!(
                "target frame is {width}x{height}"
            )));
        }
        let raw = raw.ok_or_else(|| PipelineError::MaskUnavailable("model returned no mask".into()))?;
        let mask = canonicalize(raw)?;

        let mask = if mask.dimensions() == (width, height) {
            mask
        } else {
            resample_with(&mask, width, height, self.filter)
        };

        Ok(box_blur_alpha(&mask, MASK_BLUR_RADIUS))
    }
}

fn alpha_mask(width: u32, height: u32, alpha: impl Fn(usize) -> u8) -> Mask {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([0, 0, 0, alpha((y * width + x) as usize)])
    })
}

fn probability_to_alpha(p: f32) -> u8 {
    if p.is_nan() {
        return 0;
    }
    (p.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Resolve any [`RawMask`] shape into the canonical alpha mask.
pub fn canonicalize(raw: RawMask) -> Result<Mask> {
    let (width, height) = raw.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::MaskUnavailable(format!(
            "mask has zero dimensions {width}x{height}"
        )));
    }
    let too_large = || PipelineError::MaskUnavailable(format!("mask of {width}x{height} is too large"));
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(too_large)?;

    match raw {
        RawMask::Alpha(gray) => {
            let raw = gray.as_raw();
            Ok(alpha_mask(width, height, |i| raw[i]))
        }
        RawMask::Rgba(mut image) => {
            for pixel in image.pixels_mut() {
                let a = pixel.0[3];
                *pixel = Rgba([0, 0, 0, a]);
            }
            Ok(image)
        }
        RawMask::Probabilities { values, .. } => {
            if values.len() != pixels {
                return Err(PipelineError::MaskUnavailable(format!(
                    "expected {pixels} matte values, got {}",
                    values.len()
                )));
            }
            Ok(alpha_mask(width, height, |i| probability_to_alpha(values[i])))
        }
        RawMask::ClassPlanes {
            classes,
            foreground,
            layout,
            values,
            ..
        } => {
            if foreground >= classes {
                return Err(PipelineError::MaskUnavailable(format!(
                    "foreground class {foreground} out of range for {classes} classes"
                )));
            }
            let expected = pixels.checked_mul(classes).ok_or_else(too_large)?;
            if values.len() != expected {
                return Err(PipelineError::MaskUnavailable(format!(
                    "expected {expected} class scores, got {}",
                    values.len()
                )));
            }
            let index = |i: usize| match layout {
                PlaneLayout::Planar => foreground * pixels + i,
                PlaneLayout::Interleaved => i * classes + foreground,
            };
            Ok(alpha_mask(width, height, |i| probability_to_alpha(values[index(i)])))
        }
    }
}

//! Pixel buffer utilities shared by the reconciler and the compositor.
//!
//! All buffers are 8-bit RGBA, row-major, without row padding.

mod blur;
mod gamma;
mod resample;

pub use blur::box_blur_alpha;
pub use gamma::{apply_gamma, gamma_corrected, gamma_lut};
pub use resample::{resample, resample_with};

use image::RgbaImage;

/// A captured camera frame. Also the type of every composited output frame.
pub type Frame = RgbaImage;

/// Foreground probability mask: alpha 0 = background, 255 = foreground.
/// Colour channels carry no meaning and are kept at zero.
pub type Mask = RgbaImage;

/// A decoded backdrop image, sized independently of the frame.
pub type Background = RgbaImage;

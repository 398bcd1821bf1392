use anyhow::Result;
use image::{GrayImage, RgbaImage};

use crate::imaging::Frame;

/// Memory order of a multi-class mask tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// `[classes, height, width]`: one full plane per class.
    Planar,
    /// `[height, width, classes]`: class scores interleaved per pixel.
    Interleaved,
}

/// Mask shapes a backend may hand back.
///
/// Resolved into the canonical alpha [`Mask`](crate::imaging::Mask) by the
/// reconciler; nothing downstream of it looks at these variants.
#[derive(Debug, Clone)]
pub enum RawMask {
    /// Single 8-bit channel, 255 = foreground.
    Alpha(GrayImage),
    /// RGBA image whose alpha channel carries the probability.
    Rgba(RgbaImage),
    /// Row-major float matte in `[0, 1]`.
    Probabilities {
        width: u32,
        height: u32,
        values: Vec<f32>,
    },
    /// Per-class scores; `foreground` selects the class to keep.
    ClassPlanes {
        width: u32,
        height: u32,
        classes: usize,
        foreground: usize,
        layout: PlaneLayout,
        values: Vec<f32>,
    },
}

impl RawMask {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Alpha(image) => image.dimensions(),
            Self::Rgba(image) => image.dimensions(),
            Self::Probabilities { width, height, .. } | Self::ClassPlanes { width, height, .. } => {
                (*width, *height)
            }
        }
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, passthrough, test doubles)
pub trait SegmentationModel: Send {
    /// Segment one frame.
    ///
    /// `Ok(None)` means the backend ran but produced nothing usable for this
    /// frame; the cycle is skipped.
    fn segment(&mut self, frame: &Frame) -> Result<Option<RawMask>>;

    /// Release per-cycle scratch state (input tensors, device buffers).
    ///
    /// Called once after every `segment` call, whether it succeeded, failed
    /// or panicked.
    fn release_scratch(&mut self) {}

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Called when the camera stream restarts.
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// The model's preferred input dimensions, if it has any.
    fn input_size(&self) -> Option<(u32, u32)>;
}

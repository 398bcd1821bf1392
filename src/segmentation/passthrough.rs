use anyhow::Result;
use image::{GrayImage, Luma};

use super::types::{RawMask, SegmentationModel};
use crate::imaging::Frame;

/// Treats the whole frame as foreground.
///
/// Used when no model file is configured. Emits a 1x1 mask and lets the
/// reconciler scale it to the frame.
#[derive(Debug, Default)]
pub struct Passthrough;

impl SegmentationModel for Passthrough {
    fn segment(&mut self, _frame: &Frame) -> Result<Option<RawMask>> {
        Ok(Some(RawMask::Alpha(GrayImage::from_pixel(1, 1, Luma([255])))))
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }
}

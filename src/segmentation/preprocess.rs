use anyhow::{ensure, Result};
use image::imageops;
use ndarray::Array4;

use crate::imaging::Frame;

/// Converts RGBA frames into normalized model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess a frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Drop alpha, convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &Frame) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();
        ensure!(
            frame.width() > 0 && frame.height() > 0,
            "cannot preprocess an empty frame"
        );

        let resized;
        let source = if frame.dimensions() != self.target_size() {
            resized = imageops::resize(
                frame,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = pixel[channel] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn produces_normalized_nchw_tensor() {
        let frame = RgbaImage::from_pixel(8, 4, Rgba([255, 0, 51, 10]));
        let tensor = Preprocessor::new(8, 4).preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 8]);
        assert_eq!(tensor[[0, 0, 3, 7]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 1, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_model_input() {
        let frame = RgbaImage::from_pixel(64, 48, Rgba([10, 20, 30, 255]));
        let tensor = Preprocessor::new(16, 16).preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
    }
}

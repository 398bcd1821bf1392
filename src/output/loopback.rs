use super::OutputSink;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use crate::imaging::{resample, Frame};

/// Writes composited frames to a v4l2loopback device as packed YUYV.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the frame format before any data is written
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        let negotiated = Output::set_format(&device, &format)
            .context("Failed to set v4l2loopback output format")?;
        tracing::debug!("v4l2loopback format: {}", negotiated);

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            file,
            width,
            height,
            packed: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// BT.601 conversion in 8.8 fixed point.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let clamp = |v: i32| v.clamp(0, 255) as u8;

    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp(y), clamp(u), clamp(v))
}

/// Pack `frame` as YUYV into `out`, two pixels per `Y0 U Y1 V` quad with
/// chroma averaged over the pair. An odd last column pairs with itself.
/// Alpha is dropped.
fn pack_yuyv(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    for row in frame.rows() {
        let pixels: Vec<_> = row.collect();
        for pair in pixels.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            let (y0, u0, v0) = rgb_to_yuv(left[0], left[1], left[2]);
            let (y1, u1, v1) = rgb_to_yuv(right[0], right[1], right[2]);
            let u = ((u0 as u16 + u1 as u16 + 1) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16 + 1) / 2) as u8;
            out.extend_from_slice(&[y0, u, y1, v]);
        }
    }
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = resample(frame, self.width, self.height);
            &resized
        } else {
            frame
        };

        pack_yuyv(frame, &mut self.packed);
        self.file
            .write_all(&self.packed)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn primaries_convert_to_expected_yuv() {
        assert_eq!(rgb_to_yuv(0, 0, 0), (0, 128, 128));
        assert_eq!(rgb_to_yuv(255, 255, 255), (255, 128, 128));

        let (y, u, v) = rgb_to_yuv(255, 0, 0);
        assert_eq!(y, 77);
        assert!(u < 128);
        assert_eq!(v, 240);
    }

    #[test]
    fn packs_two_pixels_per_quad() {
        let frame = RgbaImage::from_pixel(4, 2, Rgba([255, 255, 255, 0]));
        let mut packed = Vec::new();
        pack_yuyv(&frame, &mut packed);
        assert_eq!(packed.len(), 4 * 2 * 2);
        assert!(packed.chunks(4).all(|quad| quad == [255, 128, 255, 128]));
    }

    #[test]
    fn odd_width_repeats_last_pixel() {
        let mut frame = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 255]));
        frame.put_pixel(2, 0, Rgba([255, 255, 255, 255]));
        let mut packed = vec![9; 3];
        pack_yuyv(&frame, &mut packed);
        assert_eq!(packed, vec![0, 128, 0, 128, 255, 128, 255, 128]);
    }
}

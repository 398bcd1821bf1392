//! Alpha compositing of the camera foreground over the selected backdrop.

use std::borrow::Cow;
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};

use crate::config::Enhancement;
use crate::imaging::{gamma_corrected, resample, Background, Frame, Mask};

/// Canvas fill used when no background is available (light grey).
pub const FALLBACK_COLOR: [u8; 3] = [0xD3, 0xD3, 0xD3];

/// Scale `background` to cover a `width` x `height` canvas and crop the
/// overflow evenly from both sides.
///
/// The visible window is cut from the source first, so only canvas-sized
/// buffers are ever resampled.
pub fn cover_scale(background: &Background, width: u32, height: u32) -> RgbaImage {
    let (bg_width, bg_height) = background.dimensions();
    if width == 0 || height == 0 || bg_width == 0 || bg_height == 0 {
        return RgbaImage::new(width, height);
    }
    let scale = f64::max(
        width as f64 / bg_width as f64,
        height as f64 / bg_height as f64,
    );
    let crop_width = ((width as f64 / scale).round() as u32).clamp(1, bg_width);
    let crop_height = ((height as f64 / scale).round() as u32).clamp(1, bg_height);
    let x = (bg_width - crop_width) / 2;
    let y = (bg_height - crop_height) / 2;

    let visible = imageops::crop_imm(background, x, y, crop_width, crop_height).to_image();
    resample(&visible, width, height)
}

fn fallback_plate(width: u32, height: u32) -> RgbaImage {
    let [r, g, b] = FALLBACK_COLOR;
    RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))
}

fn usable(background: &Background) -> bool {
    background.width() > 0 && background.height() > 0
}

fn enhanced(frame: &Frame, enhancement: Enhancement) -> Cow<'_, Frame> {
    match enhancement {
        Enhancement::None => Cow::Borrowed(frame),
        Enhancement::Gamma { gamma } => Cow::Owned(gamma_corrected(frame, gamma)),
    }
}

/// `out = fg * a / 255 + bg * (255 - a) / 255` per RGB channel, rounded,
/// with an opaque result.
fn blend(foreground: &Frame, plate: &RgbaImage, mask: &Mask) -> Frame {
    debug_assert_eq!(foreground.dimensions(), plate.dimensions());
    debug_assert_eq!(foreground.dimensions(), mask.dimensions());

    let (width, height) = foreground.dimensions();
    let mut out = RgbaImage::new(width, height);
    let pixels = out
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(plate.pixels())
        .zip(mask.pixels());
    for (((out, fg), bg), m) in pixels {
        let a = m.0[3] as u32;
        let mix = |f: u8, b: u8| ((f as u32 * a + b as u32 * (255 - a) + 127) / 255) as u8;
        *out = Rgba([mix(fg.0[0], bg.0[0]), mix(fg.0[1], bg.0[1]), mix(fg.0[2], bg.0[2]), 255]);
    }
    out
}

/// Composite `frame` over `background` through `mask`.
///
/// `frame` and `mask` must share dimensions; the output has those dimensions
/// and is fully opaque. The captured frame is never modified.
pub fn compose(
    frame: &Frame,
    background: Option<&Background>,
    mask: &Mask,
    enhancement: Enhancement,
) -> Frame {
    let (width, height) = frame.dimensions();
    let plate = match background.filter(|bg| usable(bg)) {
        Some(bg) => cover_scale(bg, width, height),
        None => fallback_plate(width, height),
    };
    blend(&enhanced(frame, enhancement), &plate, mask)
}

/// Grayscale, opaque rendering of a mask for visual inspection.
pub fn matte_view(mask: &Mask) -> Frame {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        let a = mask.get_pixel(x, y).0[3];
        Rgba([a, a, a, 255])
    })
}

struct Plate {
    source: Option<Arc<Background>>,
    image: RgbaImage,
}

/// [`compose`] with the cover-scaled background kept between frames.
///
/// The plate is rebuilt only when the background snapshot or the canvas size
/// changes.
#[derive(Default)]
pub struct Compositor {
    plate: Option<Plate>,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    fn plate(&mut self, background: Option<&Arc<Background>>, width: u32, height: u32) -> &RgbaImage {
        let background = background.filter(|bg| usable(bg));
        let stale = match &self.plate {
            None => true,
            Some(plate) => {
                plate.image.dimensions() != (width, height)
                    || match (&plate.source, background) {
                        (Some(cached), Some(current)) => !Arc::ptr_eq(cached, current),
                        (None, None) => false,
                        _ => true,
                    }
            }
        };

        if stale {
            let _span = tracing::debug_span!("cover_scale").entered();
            let image = match background {
                Some(bg) => cover_scale(bg, width, height),
                None => fallback_plate(width, height),
            };
            self.plate = Some(Plate {
                source: background.cloned(),
                image,
            });
        }

        &self
            .plate
            .get_or_insert_with(|| Plate {
                source: None,
                image: fallback_plate(width, height),
            })
            .image
    }

    pub fn compose(
        &mut self,
        frame: &Frame,
        background: Option<&Arc<Background>>,
        mask: &Mask,
        enhancement: Enhancement,
    ) -> Frame {
        let _span = tracing::debug_span!("compose").entered();
        let (width, height) = frame.dimensions();
        let foreground = enhanced(frame, enhancement);
        let plate = self.plate(background, width, height);
        blend(&foreground, plate, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(width: u32, height: u32, alpha: u8) -> Mask {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, alpha]))
    }

    #[test]
    fn output_is_opaque_and_frame_sized() {
        let frame = RgbaImage::from_pixel(5, 3, Rgba([10, 20, 30, 0]));
        let background = RgbaImage::from_pixel(17, 2, Rgba([200, 100, 50, 0]));
        for alpha in [0, 77, 255] {
            let out = compose(&frame, Some(&background), &mask(5, 3, alpha), Enhancement::None);
            assert_eq!(out.dimensions(), (5, 3));
            assert!(out.pixels().all(|p| p.0[3] == 255));
        }
    }

    #[test]
    fn full_mask_keeps_enhanced_foreground() {
        let frame = RgbaImage::from_pixel(4, 4, Rgba([128, 64, 32, 255]));
        let background = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let enhancement = Enhancement::Gamma { gamma: 1.5 };
        let out = compose(&frame, Some(&background), &mask(4, 4, 255), enhancement);
        let expected = gamma_corrected(&frame, 1.5);
        for (o, e) in out.pixels().zip(expected.pixels()) {
            assert_eq!(o.0[..3], e.0[..3]);
        }
        // captured frame untouched
        assert!(frame.pixels().all(|p| p.0 == [128, 64, 32, 255]));
    }

    #[test]
    fn empty_mask_shows_cropped_background() {
        // 4x2 backdrop: left half red, right half blue; canvas 2x2 keeps the middle columns
        let background = RgbaImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let frame = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        let out = compose(&frame, Some(&background), &mask(2, 2, 0), Enhancement::None);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 255, 255]);
    }

    #[test]
    fn missing_background_uses_fallback() {
        let frame = RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 255]));
        let out = compose(&frame, None, &mask(3, 3, 0), Enhancement::None);
        let [r, g, b] = FALLBACK_COLOR;
        assert!(out.pixels().all(|p| p.0 == [r, g, b, 255]));

        let empty = RgbaImage::new(0, 0);
        let out = compose(&frame, Some(&empty), &mask(3, 3, 0), Enhancement::None);
        assert!(out.pixels().all(|p| p.0 == [r, g, b, 255]));
    }

    #[test]
    fn partial_alpha_interpolates() {
        let frame = RgbaImage::from_pixel(1, 1, Rgba([200, 0, 255, 255]));
        let background = RgbaImage::from_pixel(1, 1, Rgba([100, 255, 0, 255]));
        let out = compose(&frame, Some(&background), &mask(1, 1, 128), Enhancement::None);
        // (200*128 + 100*127 + 127) / 255 = 150
        assert_eq!(out.get_pixel(0, 0).0, [150, 127, 128, 255]);
    }

    #[test]
    fn cover_scale_fills_canvas_for_tall_and_wide_sources() {
        let wide = RgbaImage::from_pixel(40, 10, Rgba([5, 5, 5, 255]));
        let tall = RgbaImage::from_pixel(7, 90, Rgba([5, 5, 5, 255]));
        assert_eq!(cover_scale(&wide, 16, 9).dimensions(), (16, 9));
        assert_eq!(cover_scale(&tall, 16, 9).dimensions(), (16, 9));
    }

    #[test]
    fn extreme_aspect_backdrop_crops_before_scaling() {
        // 2x1000 strip: red above, a green band across the middle, blue below
        let strip = RgbaImage::from_fn(2, 1000, |_, y| match y {
            0..=489 => Rgba([255, 0, 0, 255]),
            490..=509 => Rgba([0, 255, 0, 255]),
            _ => Rgba([0, 0, 255, 255]),
        });
        let started = std::time::Instant::now();
        let plate = cover_scale(&strip, 320, 180);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(plate.dimensions(), (320, 180));
        assert!(plate.pixels().all(|p| p.0 == [0, 255, 0, 255]));

        let wide = RgbaImage::from_pixel(4000, 1, Rgba([7, 8, 9, 255]));
        assert_eq!(cover_scale(&wide, 64, 48).dimensions(), (64, 48));
    }

    #[test]
    fn cached_plate_follows_background_changes() {
        let frame = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let red = Arc::new(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])));
        let green = Arc::new(RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255])));
        let mut compositor = Compositor::new();
        let m = mask(2, 2, 0);

        let out = compositor.compose(&frame, Some(&red), &m, Enhancement::None);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        let out = compositor.compose(&frame, Some(&green), &m, Enhancement::None);
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 0, 255]);
        let out = compositor.compose(&frame, None, &m, Enhancement::None);
        let [r, g, b] = FALLBACK_COLOR;
        assert_eq!(out.get_pixel(0, 0).0, [r, g, b, 255]);
    }

    #[test]
    fn cached_and_uncached_paths_agree() {
        let frame = RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 90, 255]));
        let background = Arc::new(RgbaImage::from_fn(9, 9, |x, y| Rgba([x as u8 * 20, 10, y as u8 * 25, 255])));
        let m = RgbaImage::from_fn(6, 4, |x, _| Rgba([0, 0, 0, x as u8 * 50]));
        let direct = compose(&frame, Some(&*background), &m, Enhancement::None);
        let cached = Compositor::new().compose(&frame, Some(&background), &m, Enhancement::None);
        assert_eq!(direct, cached);
    }

    #[test]
    fn matte_view_is_grayscale_of_alpha() {
        let m = RgbaImage::from_fn(2, 1, |x, _| Rgba([0, 0, 0, if x == 0 { 30 } else { 240 }]));
        let view = matte_view(&m);
        assert_eq!(view.get_pixel(0, 0).0, [30, 30, 30, 255]);
        assert_eq!(view.get_pixel(1, 0).0, [240, 240, 240, 255]);
    }
}

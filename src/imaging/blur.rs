use image::{Rgba, RgbaImage};

/// Mean of the alpha values in the `(2r+1)^2` window around each pixel.
///
/// The window is clipped at the image edges and the divisor shrinks to the
/// number of in-bounds samples. Colour channels of the result are zero.
/// Runs as two separable prefix-sum passes, so cost does not grow with `radius`.
pub fn box_blur_alpha(image: &RgbaImage, radius: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let alpha: Vec<u8> = image.pixels().map(|p| p.0[3]).collect();
    let blurred = box_blur_plane(&alpha, width as usize, height as usize, radius as usize);

    let mut out = RgbaImage::new(width, height);
    for (pixel, &a) in out.pixels_mut().zip(blurred.iter()) {
        *pixel = Rgba([0, 0, 0, a]);
    }
    out
}

/// Clipped window `[i - r, i + r]` within `0..len`.
fn window(i: usize, radius: usize, len: usize) -> (usize, usize) {
    (i.saturating_sub(radius), (i + radius).min(len - 1))
}

fn box_blur_plane(plane: &[u8], width: usize, height: usize, radius: usize) -> Vec<u8> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    if radius == 0 {
        return plane.to_vec();
    }

    // Horizontal window sums per row.
    let mut rows = vec![0u64; width * height];
    let mut prefix = vec![0u64; width.max(height) + 1];
    for y in 0..height {
        let line = &plane[y * width..(y + 1) * width];
        for (x, &a) in line.iter().enumerate() {
            prefix[x + 1] = prefix[x] + a as u64;
        }
        for x in 0..width {
            let (x0, x1) = window(x, radius, width);
            rows[y * width + x] = prefix[x1 + 1] - prefix[x0];
        }
    }

    // Vertical window sums of the row sums, then one division by the clipped area.
    let mut out = vec![0u8; width * height];
    for x in 0..width {
        for y in 0..height {
            prefix[y + 1] = prefix[y] + rows[y * width + x];
        }
        let (x0, x1) = window(x, radius, width);
        let span_x = (x1 - x0 + 1) as u64;
        for y in 0..height {
            let (y0, y1) = window(y, radius, height);
            let count = span_x * (y1 - y0 + 1) as u64;
            let sum = prefix[y1 + 1] - prefix[y0];
            out[y * width + x] = ((sum + count / 2) / count) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha_image(width: u32, height: u32, alpha: &[u8]) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([9, 9, 9, alpha[(y * width + x) as usize]])
        })
    }

    fn alphas(image: &RgbaImage) -> Vec<u8> {
        image.pixels().map(|p| p.0[3]).collect()
    }

    #[test]
    fn radius_zero_keeps_alpha() {
        let values: Vec<u8> = (0..20).map(|v| (v * 13) as u8).collect();
        let image = alpha_image(5, 4, &values);
        let out = box_blur_alpha(&image, 0);
        assert_eq!(alphas(&out), values);
        assert!(out.pixels().all(|p| p.0[..3] == [0, 0, 0]));
    }

    #[test]
    fn edges_divide_by_in_bounds_samples() {
        let image = alpha_image(3, 1, &[0, 255, 0]);
        let out = box_blur_alpha(&image, 1);
        // (0+255)/2 rounds to 128, (0+255+0)/3 = 85
        assert_eq!(alphas(&out), vec![128, 85, 128]);
    }

    #[test]
    fn matches_direct_window_mean() {
        let (w, h) = (7usize, 5usize);
        let values: Vec<u8> = (0..w * h).map(|i| ((i * 37) % 256) as u8).collect();
        let image = alpha_image(w as u32, h as u32, &values);
        for radius in 1..=3usize {
            let out = alphas(&box_blur_alpha(&image, radius as u32));
            for y in 0..h {
                for x in 0..w {
                    let (x0, x1) = window(x, radius, w);
                    let (y0, y1) = window(y, radius, h);
                    let mut sum = 0u64;
                    let mut count = 0u64;
                    for yy in y0..=y1 {
                        for xx in x0..=x1 {
                            sum += values[yy * w + xx] as u64;
                            count += 1;
                        }
                    }
                    assert_eq!(out[y * w + x] as u64, (sum + count / 2) / count);
                }
            }
        }
    }

    #[test]
    fn uniform_alpha_is_preserved_at_any_radius() {
        let image = RgbaImage::from_pixel(6, 3, Rgba([1, 2, 3, 200]));
        let out = box_blur_alpha(&image, 5);
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0, 200]));
    }

    #[test]
    fn empty_image_stays_empty() {
        let out = box_blur_alpha(&RgbaImage::new(0, 0), 1);
        assert_eq!(out.dimensions(), (0, 0));
    }
}

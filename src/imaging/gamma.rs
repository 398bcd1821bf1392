use image::RgbaImage;

/// Channel lookup table for `out = 255 * (c / 255)^(1 / gamma)`.
pub fn gamma_lut(gamma: f32) -> [u8; 256] {
    let exponent = 1.0 / gamma;
    std::array::from_fn(|c| {
        let normalized = c as f32 / 255.0;
        (255.0 * normalized.powf(exponent)).round().clamp(0.0, 255.0) as u8
    })
}

/// Apply gamma correction to the RGB channels of `image` in place.
///
/// The alpha channel is never touched. Gamma values that are not finite and
/// positive leave the image unchanged.
pub fn apply_gamma(image: &mut RgbaImage, gamma: f32) {
    if !gamma.is_finite() || gamma <= 0.0 {
        tracing::debug!("ignoring invalid gamma {}", gamma);
        return;
    }

    let lut = gamma_lut(gamma);
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = &mut pixel.0;
        *r = lut[*r as usize];
        *g = lut[*g as usize];
        *b = lut[*b as usize];
    }
}

/// Gamma-corrected copy of `image`; the source buffer is left as captured.
pub fn gamma_corrected(image: &RgbaImage, gamma: f32) -> RgbaImage {
    let mut out = image.clone();
    apply_gamma(&mut out, gamma);
    out
}

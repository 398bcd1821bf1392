use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Resize with a bilinear filter. Same-size input is returned as a copy.
pub fn resample(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    resample_with(image, width, height, FilterType::Triangle)
}

/// Resize with an explicit filter. `Nearest` is promoted to `Triangle` so
/// mask edges never come out blocky.
pub fn resample_with(image: &RgbaImage, width: u32, height: u32, filter: FilterType) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }

    let filter = match filter {
        FilterType::Nearest => FilterType::Triangle,
        other => other,
    };

    let _span = tracing::debug_span!("resample", from = ?image.dimensions(), to = ?(width, height)).entered();
    imageops::resize(image, width, height, filter)
}

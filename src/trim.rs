use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::sanitize::ImageFormat;

/// Removes uniform-color borders from the captured image.
///
/// The top-left pixel defines the border color; each edge shrinks while a
/// full row or column matches it exactly. The trimmed image is re-encoded
/// to `dest` in the job's format. A fully uniform image is written through
/// unchanged rather than trimmed to nothing.
pub fn trim_uniform_borders(src: &Path, dest: &Path, format: ImageFormat) -> Result<()> {
    let img = image::open(src)
        .with_context(|| format!("failed to open \"{}\"", src.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let border = *img.get_pixel(0, 0);

    let mut left = 0;
    while left < width && (0..height).all(|y| *img.get_pixel(left, y) == border) {
        left += 1;
    }
    if left == width {
        return save(DynamicImage::ImageRgba8(img), dest, format);
    }

    let mut right = width;
    while right > left && (0..height).all(|y| *img.get_pixel(right - 1, y) == border) {
        right -= 1;
    }
    let mut top = 0;
    while top < height && (left..right).all(|x| *img.get_pixel(x, top) == border) {
        top += 1;
    }
    let mut bottom = height;
    while bottom > top && (left..right).all(|x| *img.get_pixel(x, bottom - 1) == border) {
        bottom -= 1;
    }

    let cropped = DynamicImage::ImageRgba8(img).crop_imm(left, top, right - left, bottom - top);
    save(cropped, dest, format)
}

fn save(img: DynamicImage, dest: &Path, format: ImageFormat) -> Result<()> {
    // The jpeg encoder rejects alpha channels.
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };
    img.save_with_format(dest, format.encoder_format())
        .with_context(|| format!("failed to write \"{}\"", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const BORDER: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const CONTENT: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn bordered_image(width: u32, height: u32, inset: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let inside = x >= inset && x < width - inset && y >= inset && y < height - inset;
            if inside { CONTENT } else { BORDER }
        })
    }

    #[test]
    fn borders_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot_tmp.png");
        let dest = dir.path().join("shot.png");
        bordered_image(40, 30, 5).save(&src).unwrap();

        trim_uniform_borders(&src, &dest, ImageFormat::Png).unwrap();

        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (30, 20));
        assert_eq!(out.to_rgba8().get_pixel(0, 0), &CONTENT);
    }

    #[test]
    fn uniform_image_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("flat_tmp.png");
        let dest = dir.path().join("flat.png");
        RgbaImage::from_pixel(16, 16, BORDER).save(&src).unwrap();

        trim_uniform_borders(&src, &dest, ImageFormat::Png).unwrap();

        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (16, 16));
    }

    #[test]
    fn jpeg_output_is_written_without_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot_tmp.png");
        let dest = dir.path().join("shot.jpeg");
        bordered_image(20, 20, 4).save(&src).unwrap();

        trim_uniform_borders(&src, &dest, ImageFormat::Jpeg).unwrap();

        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (12, 12));
    }
}

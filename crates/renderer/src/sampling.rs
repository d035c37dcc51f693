//! CPU reference rasteriser for the composed transform.
//!
//! Mirrors the GPU sampler configuration (linear min/mag filtering, clamp-to-edge
//! on both axes, texel centres at half-integers) and the upload convention that
//! `uv.y = 0` addresses the bottom row of the picture.

use image::{Rgba32FImage, RgbaImage};

use crate::distortion::{DistortionPlan, Rgba, Uv};
use crate::types::PrescriptionParameters;

fn texel(image: &RgbaImage, x: i64, y: i64) -> Rgba {
    let cx = x.clamp(0, image.width() as i64 - 1) as u32;
    let cy = y.clamp(0, image.height() as i64 - 1) as u32;
    let pixel = image.get_pixel(cx, cy);
    pixel.0.map(|channel| channel as f32 / 255.0)
}

/// Pins a texel-space coordinate to one texel beyond either edge so the
/// integer neighbours stay representable. NaN lands on the first texel.
fn clamp_coord(value: f32, size: u32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, size as f32)
    }
}

/// Bilinear sample at `uv` with clamp-to-edge addressing.
///
/// Returns transparent black for an empty image.
pub fn sample_bilinear(image: &RgbaImage, uv: Uv) -> Rgba {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return [0.0; 4];
    }

    let x = clamp_coord(uv[0] * width as f32 - 0.5, width);
    let y = clamp_coord((1.0 - uv[1]) * height as f32 - 0.5, height);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p00 = texel(image, x0, y0);
    let p10 = texel(image, x0 + 1, y0);
    let p01 = texel(image, x0, y0 + 1);
    let p11 = texel(image, x0 + 1, y0 + 1);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Colour of the output pixel at `uv` for the given parameters.
pub fn shade(image: &RgbaImage, params: &PrescriptionParameters, uv: Uv) -> Rgba {
    DistortionPlan::new(params).shade(|at| sample_bilinear(image, at), uv)
}

/// Normalised coordinate of the centre of output pixel `(x, y)`, row 0 at the top.
pub fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> Uv {
    [
        (x as f32 + 0.5) / width as f32,
        1.0 - (y as f32 + 0.5) / height as f32,
    ]
}

/// Renders a full `width` x `height` frame of `image` through the composed transform.
pub fn render(
    image: &RgbaImage,
    params: &PrescriptionParameters,
    width: u32,
    height: u32,
) -> Rgba32FImage {
    let plan = DistortionPlan::new(params);
    Rgba32FImage::from_fn(width, height, |x, y| {
        let uv = pixel_uv(x, y, width, height);
        image::Rgba(plan.shade(|at| sample_bilinear(image, at), uv))
    })
}

/// Mean per-channel variance of the RGB channels, a cheap smoothness measure.
pub fn color_variance(frame: &Rgba32FImage) -> f32 {
    let count = (frame.width() * frame.height()) as f32;
    if count == 0.0 {
        return 0.0;
    }
    let mut total = 0.0f32;
    for channel in 0..3 {
        let mean = frame.pixels().map(|p| p.0[channel]).sum::<f32>() / count;
        let variance = frame
            .pixels()
            .map(|p| {
                let delta = p.0[channel] - mean;
                delta * delta
            })
            .sum::<f32>()
            / count;
        total += variance;
    }
    total / 3.0
}

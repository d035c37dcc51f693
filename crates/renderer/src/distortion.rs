//! Closed-form coordinate transforms behind the refractive-error preview.
//!
//! Every function works on normalised texture coordinates (`uv` in `[0, 1]²`)
//! around an optical centre nudged by the eye offset. The fragment stage in
//! [`crate::compile`] evaluates exactly these formulas per pixel; the CPU copies
//! here exist so the maths can be exercised without a GPU.
//!
//! The radial term is a stylised quadratic warp, not a physical lens model:
//!
//! ```text
//!   v = uv - c        factor = 1 + k·|v|²        uv' = c + v·factor
//! ```
//!
//! with `k = -0.6 · sphere`.

use std::f32::consts::FRAC_PI_2;

use crate::types::{EyeOffset, PrescriptionParameters};

/// Normalised texture coordinate.
pub type Uv = [f32; 2];

/// RGBA colour with channels in `[0, 1]`.
pub type Rgba = [f32; 4];

/// Fraction of the frame the eye offset moves the optical centre by.
pub const EYE_OFFSET_SCALE: f32 = 0.02;
/// Radial strength per diopter of sphere.
pub const SPHERE_TO_RADIAL: f32 = -0.6;
/// Cylinder magnitudes at or below this never take the blur path.
pub const BLUR_THRESHOLD: f32 = 0.001;
/// Blur step length per diopter of cylinder.
pub const BLUR_PER_DIOPTER: f32 = 0.01;
/// Taps either side of the centre sample.
pub const BLUR_HALF_TAPS: i32 = 4;

/// Optical centre for a given eye offset.
pub fn optical_center(eye_offset: EyeOffset) -> Uv {
    [
        0.5 + eye_offset.x * EYE_OFFSET_SCALE,
        0.5 + eye_offset.y * EYE_OFFSET_SCALE,
    ]
}

/// Radial strength derived from spherical power.
pub fn radial_strength(sphere: f32) -> f32 {
    SPHERE_TO_RADIAL * sphere
}

/// Quadratic-in-radius warp about `center`.
pub fn radial_distort(uv: Uv, k: f32, center: Uv) -> Uv {
    let v = [uv[0] - center[0], uv[1] - center[1]];
    let r2 = v[0] * v[0] + v[1] * v[1];
    let factor = 1.0 + k * r2;
    [center[0] + v[0] * factor, center[1] + v[1] * factor]
}

/// Stretches the offset from `center` by `1 + cylinder` along the axis only.
pub fn anisotropic_warp(uv: Uv, cylinder: f32, axis_radians: f32, center: Uv) -> Uv {
    let v = [uv[0] - center[0], uv[1] - center[1]];

    let (sa, ca) = (-axis_radians).sin_cos();
    let mut rotated = [ca * v[0] - sa * v[1], sa * v[0] + ca * v[1]];
    rotated[0] *= 1.0 + cylinder;

    let (sb, cb) = axis_radians.sin_cos();
    let back = [
        cb * rotated[0] - sb * rotated[1],
        sb * rotated[0] + cb * rotated[1],
    ];
    [center[0] + back[0], center[1] + back[1]]
}

/// Unweighted 9-tap average of `sample` along `angle`, `amount` apart.
pub fn directional_blur<F>(sample: F, uv: Uv, amount: f32, angle: f32) -> Rgba
where
    F: Fn(Uv) -> Rgba,
{
    let dir = [angle.cos() * amount, angle.sin() * amount];
    let mut total = [0.0f32; 4];
    let mut taps = 0.0f32;
    for i in -BLUR_HALF_TAPS..=BLUR_HALF_TAPS {
        let step = i as f32;
        let color = sample([uv[0] + dir[0] * step, uv[1] + dir[1] * step]);
        for (acc, channel) in total.iter_mut().zip(color) {
            *acc += channel;
        }
        taps += 1.0;
    }
    total.map(|channel| channel / taps)
}

/// Directional blur settings engaged by a non-trivial cylinder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurPass {
    pub amount: f32,
    /// Sampling direction in radians: the astigmatic axis turned by 90°.
    pub angle: f32,
}

/// Per-frame constants for the composed transform, derived once from the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionPlan {
    pub center: Uv,
    pub radial_k: f32,
    pub cylinder: f32,
    pub axis_radians: f32,
    pub blur: Option<BlurPass>,
}

impl DistortionPlan {
    pub fn new(params: &PrescriptionParameters) -> Self {
        let axis_radians = params.axis_radians();
        let blur = (params.cylinder.abs() > BLUR_THRESHOLD).then(|| BlurPass {
            amount: params.cylinder.abs() * BLUR_PER_DIOPTER,
            angle: axis_radians + FRAC_PI_2,
        });
        Self {
            center: optical_center(params.eye_offset),
            radial_k: radial_strength(params.sphere),
            cylinder: params.cylinder,
            axis_radians,
            blur,
        }
    }

    /// Source coordinate sampled for the output pixel at `uv`: radial first, then anisotropic.
    pub fn trace(&self, uv: Uv) -> Uv {
        let radial = radial_distort(uv, self.radial_k, self.center);
        anisotropic_warp(radial, self.cylinder, self.axis_radians, self.center)
    }

    /// Colour of the output pixel at `uv` given a source sampler.
    pub fn shade<F>(&self, sample: F, uv: Uv) -> Rgba
    where
        F: Fn(Uv) -> Rgba,
    {
        let traced = self.trace(uv);
        match self.blur {
            Some(blur) => directional_blur(sample, traced, blur.amount, blur.angle),
            None => sample(traced),
        }
    }
}

use bytemuck::{Pod, Zeroable};

use crate::types::{PrescriptionParameters, TargetSize};

/// CPU mirror of the `DistortionParams` std140 block in the fragment stage.
///
/// Three scalars and a pad fill the first 16 bytes so both `vec2` members land
/// on 8-byte boundaries.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DistortionUniforms {
    pub sphere: f32,
    pub cylinder: f32,
    /// Astigmatic axis in radians.
    pub axis: f32,
    pub _padding0: f32,
    pub eye_offset: [f32; 2],
    pub resolution: [f32; 2],
}

impl DistortionUniforms {
    pub fn from_parameters(params: &PrescriptionParameters, target: TargetSize) -> Self {
        Self {
            sphere: params.sphere,
            cylinder: params.cylinder,
            axis: params.axis_radians(),
            _padding0: 0.0,
            eye_offset: params.eye_offset.as_array(),
            resolution: [target.width as f32, target.height as f32],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EyeOffset;
    use std::mem::size_of;

    #[test]
    fn distortion_uniforms_follow_std140_layout() {
        let uniforms = DistortionUniforms::from_parameters(
            &PrescriptionParameters::default(),
            TargetSize::new(640, 480),
        );
        let base = &uniforms as *const _ as usize;

        assert_eq!(size_of::<DistortionUniforms>(), 32);
        assert_eq!((&uniforms.sphere as *const _ as usize) - base, 0);
        assert_eq!((&uniforms.cylinder as *const _ as usize) - base, 4);
        assert_eq!((&uniforms.axis as *const _ as usize) - base, 8);
        assert_eq!((&uniforms.eye_offset as *const _ as usize) - base, 16);
        assert_eq!((&uniforms.resolution as *const _ as usize) - base, 24);
    }

    #[test]
    fn axis_is_uploaded_in_radians() {
        let params = PrescriptionParameters::new(-1.5, 0.75, 180.0, EyeOffset::new(0.1, -0.2));
        let uniforms = DistortionUniforms::from_parameters(&params, TargetSize::new(800, 600));
        assert!((uniforms.axis - std::f32::consts::PI).abs() < 1e-6);
        assert_eq!(uniforms.sphere, -1.5);
        assert_eq!(uniforms.cylinder, 0.75);
        assert_eq!(uniforms.eye_offset, [0.1, -0.2]);
        assert_eq!(uniforms.resolution, [800.0, 600.0]);

        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 32);
    }
}

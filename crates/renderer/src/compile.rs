use std::borrow::Cow;

use wgpu::naga::{self, ShaderStage};

use crate::error::{ShaderStageKind, StartError};

/// Compiled vertex and fragment modules of the distortion program.
pub(crate) struct ShaderModules {
    pub vertex: wgpu::ShaderModule,
    pub fragment: wgpu::ShaderModule,
}

/// Checks both stages offline, confirms their interfaces agree, then hands the
/// sources to the device.
///
/// Diagnostics from the offline pass carry line and column information, which is
/// what ends up in [`StartError::Compile`]. A device-side rejection after that is
/// reported against the stage being created.
pub(crate) fn compile_program(device: &wgpu::Device) -> Result<ShaderModules, StartError> {
    let vs = validate_stage(VERTEX_SHADER_GLSL, ShaderStageKind::Vertex)?;
    let fs = validate_stage(FRAGMENT_SHADER_GLSL, ShaderStageKind::Fragment)?;
    check_interface(&vs, &fs)?;

    let vertex = compile_stage(device, VERTEX_SHADER_GLSL, ShaderStageKind::Vertex)?;
    let fragment = compile_stage(device, FRAGMENT_SHADER_GLSL, ShaderStageKind::Fragment)?;
    tracing::debug!("distortion program compiled");
    Ok(ShaderModules { vertex, fragment })
}

fn naga_stage(stage: ShaderStageKind) -> ShaderStage {
    match stage {
        ShaderStageKind::Vertex => ShaderStage::Vertex,
        ShaderStageKind::Fragment => ShaderStage::Fragment,
    }
}

fn compile_stage(
    device: &wgpu::Device,
    source: &'static str,
    stage: ShaderStageKind,
) -> Result<wgpu::ShaderModule, StartError> {
    let label = match stage {
        ShaderStageKind::Vertex => "distortion vertex",
        ShaderStageKind::Fragment => "distortion fragment",
    };
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(source),
            stage: naga_stage(stage),
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(StartError::Compile {
            stage,
            log: err.to_string(),
        }),
        None => Ok(module),
    }
}

/// Parses and validates one GLSL stage without touching a device.
pub(crate) fn validate_stage(
    source: &str,
    stage: ShaderStageKind,
) -> Result<naga::Module, StartError> {
    let options = naga::front::glsl::Options::from(naga_stage(stage));
    let module = naga::front::glsl::Frontend::default()
        .parse(&options, source)
        .map_err(|errors| StartError::Compile {
            stage,
            log: errors.emit_to_string(source),
        })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| StartError::Compile {
        stage,
        log: err.emit_to_string(source),
    })?;

    Ok(module)
}

/// A user-defined varying: its location and scalar/vector shape.
type Varying = (u32, naga::TypeInner);

fn located(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
) -> Vec<Varying> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => {
            vec![(*location, module.types[ty].inner.clone())]
        }
        Some(naga::Binding::BuiltIn(_)) => Vec::new(),
        None => match &module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .flat_map(|member| located(module, member.binding.as_ref(), member.ty))
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn entry_point(module: &naga::Module, stage: ShaderStage) -> Option<&naga::EntryPoint> {
    module.entry_points.iter().find(|entry| entry.stage == stage)
}

/// Confirms every fragment input is written by the vertex stage with the same type.
pub(crate) fn check_interface(vs: &naga::Module, fs: &naga::Module) -> Result<(), StartError> {
    let vertex = entry_point(vs, ShaderStage::Vertex)
        .ok_or_else(|| StartError::Link("vertex stage has no entry point".into()))?;
    let fragment = entry_point(fs, ShaderStage::Fragment)
        .ok_or_else(|| StartError::Link("fragment stage has no entry point".into()))?;

    let outputs: Vec<Varying> = vertex
        .function
        .result
        .as_ref()
        .map(|result| located(vs, result.binding.as_ref(), result.ty))
        .unwrap_or_default();
    let inputs: Vec<Varying> = fragment
        .function
        .arguments
        .iter()
        .flat_map(|arg| located(fs, arg.binding.as_ref(), arg.ty))
        .collect();

    for (location, inner) in &inputs {
        match outputs.iter().find(|(out, _)| out == location) {
            None => {
                return Err(StartError::Link(format!(
                    "fragment input at location {location} is not written by the vertex stage"
                )))
            }
            Some((_, produced)) if produced != inner => {
                return Err(StartError::Link(format!(
                    "location {location} is {produced:?} in the vertex stage but {inner:?} in the fragment stage"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Pass-through vertex stage for the two-triangle quad.
pub(crate) const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_texCoord;
layout(location = 0) out vec2 v_texCoord;

void main() {
    v_texCoord = a_texCoord;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

/// Per-pixel distortion: radial warp, then anisotropic warp, then an optional
/// directional blur when the cylinder is non-trivial.
///
/// The uniform block layout must match `DistortionUniforms` in `gpu/uniforms.rs`.
/// `axis` arrives in radians. `resolution` is uploaded but nothing reads it yet.
pub(crate) const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_texCoord;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform DistortionParams {
    float sph;
    float cyl;
    float axis;
    float _padding0;
    vec2 eyeOffset;
    vec2 resolution;
} params;

layout(set = 1, binding = 0) uniform texture2D source_texture;
layout(set = 1, binding = 1) uniform sampler source_sampler;

#define u_image sampler2D(source_texture, source_sampler)

const float EYE_OFFSET_SCALE = 0.02;
const float SPHERE_TO_RADIAL = -0.6;
const float BLUR_THRESHOLD = 0.001;
const float BLUR_PER_DIOPTER = 0.01;
const float HALF_PI = 1.5707963267948966;

vec2 optical_center(vec2 eye_offset) {
    return vec2(0.5, 0.5) + eye_offset * EYE_OFFSET_SCALE;
}

vec2 radial_distort(vec2 uv, float k, vec2 center) {
    vec2 v = uv - center;
    float r2 = dot(v, v);
    return center + v * (1.0 + k * r2);
}

vec2 anisotropic_warp(vec2 uv, float cyl, float axis_rad, vec2 center) {
    vec2 v = uv - center;
    float ca = cos(-axis_rad);
    float sa = sin(-axis_rad);
    vec2 r = vec2(ca * v.x - sa * v.y, sa * v.x + ca * v.y);
    r = vec2(r.x * (1.0 + cyl), r.y);
    float cb = cos(axis_rad);
    float sb = sin(axis_rad);
    return center + vec2(cb * r.x - sb * r.y, sb * r.x + cb * r.y);
}

vec4 directional_blur(vec2 uv, float amount, float angle) {
    vec2 dir = vec2(cos(angle), sin(angle)) * amount;
    vec4 total = vec4(0.0);
    for (int i = -4; i <= 4; i++) {
        total += textureLod(u_image, uv + dir * float(i), 0.0);
    }
    return total / 9.0;
}

void main() {
    vec2 center = optical_center(params.eyeOffset);
    vec2 uv = radial_distort(v_texCoord, SPHERE_TO_RADIAL * params.sph, center);
    uv = anisotropic_warp(uv, params.cyl, params.axis, center);

    if (abs(params.cyl) > BLUR_THRESHOLD) {
        outColor = directional_blur(uv, abs(params.cyl) * BLUR_PER_DIOPTER, params.axis + HALF_PI);
    } else {
        outColor = textureLod(u_image, uv, 0.0);
    }
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_stages_validate() {
        validate_stage(VERTEX_SHADER_GLSL, ShaderStageKind::Vertex).expect("vertex stage");
        validate_stage(FRAGMENT_SHADER_GLSL, ShaderStageKind::Fragment).expect("fragment stage");
    }

    #[test]
    fn program_interface_links() {
        let vs = validate_stage(VERTEX_SHADER_GLSL, ShaderStageKind::Vertex).unwrap();
        let fs = validate_stage(FRAGMENT_SHADER_GLSL, ShaderStageKind::Fragment).unwrap();
        check_interface(&vs, &fs).expect("interfaces agree");
    }

    #[test]
    fn fragment_constants_match_cpu_model() {
        use crate::distortion::{
            BLUR_PER_DIOPTER, BLUR_THRESHOLD, EYE_OFFSET_SCALE, SPHERE_TO_RADIAL,
        };
        for (name, value) in [
            ("EYE_OFFSET_SCALE", EYE_OFFSET_SCALE),
            ("SPHERE_TO_RADIAL", SPHERE_TO_RADIAL),
            ("BLUR_THRESHOLD", BLUR_THRESHOLD),
            ("BLUR_PER_DIOPTER", BLUR_PER_DIOPTER),
        ] {
            let needle = format!("const float {name} = {value};");
            assert!(FRAGMENT_SHADER_GLSL.contains(&needle), "missing `{needle}`");
        }
        assert!(FRAGMENT_SHADER_GLSL.contains("for (int i = -4; i <= 4; i++)"));
    }

    #[test]
    fn syntax_error_reports_fragment_log() {
        let broken = FRAGMENT_SHADER_GLSL.replace("float r2 = dot(v, v);", "float r2 = dot(v, v)");
        match validate_stage(&broken, ShaderStageKind::Fragment) {
            Err(StartError::Compile { stage, log }) => {
                assert_eq!(stage, ShaderStageKind::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_identifier_fails_vertex_stage() {
        let broken =
            VERTEX_SHADER_GLSL.replace("v_texCoord = a_texCoord;", "v_texCoord = a_missing;");
        assert!(matches!(
            validate_stage(&broken, ShaderStageKind::Vertex),
            Err(StartError::Compile {
                stage: ShaderStageKind::Vertex,
                ..
            })
        ));
    }

    #[test]
    fn mismatched_varying_location_fails_to_link() {
        let vs = validate_stage(VERTEX_SHADER_GLSL, ShaderStageKind::Vertex).unwrap();
        let moved = FRAGMENT_SHADER_GLSL.replace(
            "layout(location = 0) in vec2 v_texCoord;",
            "layout(location = 3) in vec2 v_texCoord;",
        );
        let fs = validate_stage(&moved, ShaderStageKind::Fragment).unwrap();
        assert!(matches!(check_interface(&vs, &fs), Err(StartError::Link(_))));
    }

    #[test]
    fn mismatched_varying_type_fails_to_link() {
        let fs = validate_stage(FRAGMENT_SHADER_GLSL, ShaderStageKind::Fragment).unwrap();
        let widened = VERTEX_SHADER_GLSL
            .replace("out vec2 v_texCoord;", "out vec3 v_texCoord;")
            .replace("v_texCoord = a_texCoord;", "v_texCoord = vec3(a_texCoord, 0.0);");
        let vs = validate_stage(&widened, ShaderStageKind::Vertex).unwrap();
        let err = check_interface(&vs, &fs).unwrap_err();
        assert!(err.to_string().contains("location 0"));
    }
}

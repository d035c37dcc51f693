use std::time::Duration;

use anyhow::{bail, Context, Result};
use renderer::{EyeOffset, PrescriptionParameters};
use rxconfig::{Preset, PrescriptionConfig, EYE_OFFSET_LIMIT};

use crate::cli::Args;

/// Starting prescription plus the preset it came from, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrescription {
    pub parameters: PrescriptionParameters,
    pub preset: Option<String>,
}

pub fn preset_parameters(preset: &Preset) -> PrescriptionParameters {
    PrescriptionParameters::new(
        preset.sphere,
        preset.cylinder,
        preset.axis,
        EyeOffset::new(preset.eye_offset[0], preset.eye_offset[1]),
    )
}

/// Layers the prescription sources: field flags over `--rx` over the chosen
/// preset over the built-in default.
pub fn resolve_prescription(
    args: &Args,
    config: Option<&PrescriptionConfig>,
) -> Result<ResolvedPrescription> {
    let mut parameters = PrescriptionParameters::default();
    let mut preset_name = None;

    if let Some(name) = args.preset.as_deref() {
        let config = config.context("--preset requires a prescriptions file")?;
        let preset = config
            .preset(name)
            .with_context(|| format!("unknown preset '{name}'"))?;
        parameters = preset_parameters(preset);
        preset_name = Some(name.to_string());
    } else if let Some((name, preset)) = config.and_then(|config| config.default_preset()) {
        parameters = preset_parameters(preset);
        preset_name = Some(name.to_string());
    }

    if let Some(rx) = args.rx.as_deref() {
        let preset: Preset = rx.parse()?;
        parameters.sphere = preset.sphere;
        parameters.cylinder = preset.cylinder;
        parameters.axis_degrees = preset.axis;
    }

    if let Some(sphere) = args.sphere {
        parameters.sphere = sphere;
    }
    if let Some(cylinder) = args.cylinder {
        parameters.cylinder = cylinder;
    }
    if let Some(axis) = args.axis {
        parameters.axis_degrees = axis;
    }
    if let Some(x) = args.eye_x {
        parameters.eye_offset.x = x;
    }
    if let Some(y) = args.eye_y {
        parameters.eye_offset.y = y;
    }

    check_parameters(&parameters)?;
    Ok(ResolvedPrescription {
        parameters,
        preset: preset_name,
    })
}

fn check_parameters(parameters: &PrescriptionParameters) -> Result<()> {
    for (field, value) in [
        ("sphere", parameters.sphere),
        ("cylinder", parameters.cylinder),
        ("axis", parameters.axis_degrees),
    ] {
        if !value.is_finite() {
            bail!("{field} must be a finite number");
        }
    }
    for value in parameters.eye_offset.as_array() {
        if !value.is_finite() || value.abs() > EYE_OFFSET_LIMIT {
            bail!(
                "eye offset components must lie within [-{EYE_OFFSET_LIMIT}, {EYE_OFFSET_LIMIT}]"
            );
        }
    }
    Ok(())
}

/// Frame cap from the command line, else the presets file. Zero means uncapped.
pub fn resolve_fps(args: &Args, config: Option<&PrescriptionConfig>) -> Option<f32> {
    args.fps
        .or_else(|| config.and_then(|config| config.defaults.fps))
        .filter(|fps| *fps > 0.0)
}

pub fn resolve_watch(args: &Args, config: Option<&PrescriptionConfig>) -> Option<Duration> {
    args.watch
        .or_else(|| config.and_then(|config| config.defaults.watch))
        .filter(|interval| !interval.is_zero())
}

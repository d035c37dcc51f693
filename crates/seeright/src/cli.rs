use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use renderer::{GpuPowerPreference, TargetSize};

#[derive(Parser, Debug)]
#[command(
    name = "seeright",
    author,
    version,
    about = "Preview a picture through a refractive prescription"
)]
pub struct Args {
    /// Picture to view through the prescription. Without it the window stays black.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Fixed render resolution (e.g. `1280x720`).
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_surface_size,
        default_value = "640x480"
    )]
    pub size: TargetSize,

    /// Spherical power in dioptres (negative for myopia).
    #[arg(long, value_name = "DIOPTRES", allow_negative_numbers = true)]
    pub sphere: Option<f32>,

    /// Cylindrical power in dioptres.
    #[arg(long, value_name = "DIOPTRES", allow_negative_numbers = true)]
    pub cylinder: Option<f32>,

    /// Cylinder axis in degrees.
    #[arg(long, value_name = "DEGREES", allow_negative_numbers = true)]
    pub axis: Option<f32>,

    /// Horizontal eye offset, normalised to the image width.
    #[arg(long, value_name = "OFFSET", allow_negative_numbers = true)]
    pub eye_x: Option<f32>,

    /// Vertical eye offset, normalised to the image height.
    #[arg(long, value_name = "OFFSET", allow_negative_numbers = true)]
    pub eye_y: Option<f32>,

    /// Compact prescription, e.g. `SPH=-2.00 CYL=-0.75 AXIS=180`.
    #[arg(long, value_name = "PRESCRIPTION")]
    pub rx: Option<String>,

    /// Named preset from the prescriptions file.
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Prescriptions file to load instead of the one in the config directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cap the render loop to this many frames per second.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Re-read the picture whenever it changes on disk, checking at this interval.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub watch: Option<Duration>,

    /// GPU adapter preference: `low` or `high`.
    #[arg(
        long,
        value_name = "POWER",
        value_parser = parse_power,
        default_value = "low"
    )]
    pub power: GpuPowerPreference,

    /// Present as fast as possible instead of waiting for vertical sync.
    #[arg(long)]
    pub no_vsync: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_surface_size(value: &str) -> Result<TargetSize, String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 640x480".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size".to_string())?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }

    Ok(TargetSize::new(width, height))
}

pub fn parse_power(value: &str) -> Result<GpuPowerPreference, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("power preference must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "low" | "low-power" | "integrated" => Ok(GpuPowerPreference::Low),
        "high" | "high-performance" | "discrete" => Ok(GpuPowerPreference::High),
        other => Err(format!("unknown power preference '{other}'; expected low or high")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accepts_common_separators() {
        assert_eq!(parse_surface_size("640x480"), Ok(TargetSize::new(640, 480)));
        assert_eq!(parse_surface_size(" 1280X720 "), Ok(TargetSize::new(1280, 720)));
        assert_eq!(parse_surface_size("800×600"), Ok(TargetSize::new(800, 600)));
    }

    #[test]
    fn size_rejects_zero_and_garbage() {
        assert!(parse_surface_size("0x480").is_err());
        assert!(parse_surface_size("640").is_err());
        assert!(parse_surface_size("wide x tall").is_err());
    }

    #[test]
    fn power_parses_aliases() {
        assert_eq!(parse_power("HIGH"), Ok(GpuPowerPreference::High));
        assert_eq!(parse_power("integrated"), Ok(GpuPowerPreference::Low));
        assert!(parse_power("").is_err());
        assert!(parse_power("turbo").is_err());
    }

    #[test]
    fn defaults_match_preview_canvas() {
        let args = Args::try_parse_from(["seeright"]).unwrap();
        assert_eq!(args.size, TargetSize::new(640, 480));
        assert_eq!(args.power, GpuPowerPreference::Low);
        assert!(!args.no_vsync);
        assert!(args.image.is_none());
        assert!(args.watch.is_none());
    }

    #[test]
    fn negative_dioptres_and_durations_parse() {
        let args = Args::try_parse_from([
            "seeright",
            "--sphere",
            "-3.25",
            "--cylinder",
            "-0.75",
            "--eye-x",
            "-0.1",
            "--watch",
            "500ms",
        ])
        .unwrap();
        assert_eq!(args.sphere, Some(-3.25));
        assert_eq!(args.cylinder, Some(-0.75));
        assert_eq!(args.eye_x, Some(-0.1));
        assert_eq!(args.watch, Some(Duration::from_millis(500)));
    }
}

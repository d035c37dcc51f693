use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Largest accepted eye-offset component, in normalised units.
pub const EYE_OFFSET_LIMIT: f32 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid prescription '{input}': {reason}")]
    Prescription { input: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrescriptionConfig {
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Defaults {
    pub preset: Option<String>,
    pub fps: Option<f32>,
    /// How often a watched source file is checked for changes.
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing
    )]
    pub watch: Option<Duration>,
}

/// One named prescription. Axis is in degrees and deliberately unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Preset {
    pub sphere: f32,
    #[serde(default)]
    pub cylinder: f32,
    #[serde(default)]
    pub axis: f32,
    #[serde(default)]
    pub eye_offset: [f32; 2],
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl PrescriptionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PrescriptionConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn default_preset(&self) -> Option<(&str, &Preset)> {
        let name = self.defaults.preset.as_deref()?;
        self.presets
            .get_key_value(name)
            .map(|(name, preset)| (name.as_str(), preset))
    }

    /// Preset names in iteration (name) order.
    pub fn preset_names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        for (name, preset) in &self.presets {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("preset names may not be empty".into()));
            }
            preset
                .validate()
                .map_err(|reason| ConfigError::Invalid(format!("preset '{name}' {reason}")))?;
        }

        if let Some(default_preset) = &self.defaults.preset {
            if !self.presets.contains_key(default_preset) {
                return Err(ConfigError::Invalid(format!(
                    "defaults.preset references unknown preset '{default_preset}'"
                )));
            }
        }

        if let Some(fps) = self.defaults.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid("defaults.fps must be >= 0".into()));
            }
        }

        if let Some(watch) = self.defaults.watch {
            if watch.is_zero() {
                return Err(ConfigError::Invalid(
                    "defaults.watch must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}

impl Preset {
    pub fn new(sphere: f32, cylinder: f32, axis: f32) -> Self {
        Self {
            sphere,
            cylinder,
            axis,
            eye_offset: [0.0, 0.0],
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("sphere", self.sphere),
            ("cylinder", self.cylinder),
            ("axis", self.axis),
        ] {
            if !value.is_finite() {
                return Err(format!("{field} must be a finite number"));
            }
        }
        for value in self.eye_offset {
            if !value.is_finite() || value.abs() > EYE_OFFSET_LIMIT {
                return Err(format!(
                    "eye_offset components must lie within [-{EYE_OFFSET_LIMIT}, {EYE_OFFSET_LIMIT}]"
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SPH={:.2} CYL={:.2} AXIS={}",
            self.sphere, self.cylinder, self.axis
        )
    }
}

/// Parses compact prescriptions such as `SPH=-2.00 CYL=-0.75 AXIS=180`.
///
/// Keys are case-insensitive and may be separated by spaces or commas. `SPH` is
/// required; `CYL` and `AXIS` default to zero. The eye offset is always centred.
impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::Prescription {
            input: input.to_string(),
            reason,
        };

        let mut sphere = None;
        let mut cylinder = None;
        let mut axis = None;
        for token in input
            .split(|ch: char| ch.is_whitespace() || ch == ',')
            .filter(|token| !token.is_empty())
        {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected KEY=VALUE, found '{token}'")))?;
            let parsed: f32 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("'{value}' is not a number")))?;
            if !parsed.is_finite() {
                return Err(invalid(format!("'{value}' is not finite")));
            }
            let slot = match key.trim().to_ascii_uppercase().as_str() {
                "SPH" => &mut sphere,
                "CYL" => &mut cylinder,
                "AXIS" => &mut axis,
                other => return Err(invalid(format!("unknown key '{other}'"))),
            };
            if slot.replace(parsed).is_some() {
                return Err(invalid(format!("'{}' given more than once", key.trim())));
            }
        }

        let sphere = sphere.ok_or_else(|| invalid("missing SPH".into()))?;
        Ok(Preset::new(
            sphere,
            cylinder.unwrap_or(0.0),
            axis.unwrap_or(0.0),
        ))
    }
}

/// Walks preset names in order, wrapping at both ends.
#[derive(Debug, Clone)]
pub struct PresetCycle {
    names: Vec<String>,
    index: Option<usize>,
}

impl PresetCycle {
    /// Starts at `start` when it names a preset, otherwise before the first one.
    pub fn new(config: &PrescriptionConfig, start: Option<&str>) -> Self {
        let names: Vec<String> = config.presets.keys().cloned().collect();
        let index = start.and_then(|name| names.iter().position(|n| n == name));
        Self { names, index }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn current(&self) -> Option<&str> {
        self.index.map(|i| self.names[i].as_str())
    }

    pub fn next(&mut self) -> Option<&str> {
        if self.names.is_empty() {
            return None;
        }
        let next = match self.index {
            Some(i) => (i + 1) % self.names.len(),
            None => 0,
        };
        self.index = Some(next);
        self.current()
    }

    pub fn prev(&mut self) -> Option<&str> {
        if self.names.is_empty() {
            return None;
        }
        let len = self.names.len();
        let prev = match self.index {
            Some(i) => (i + len - 1) % len,
            None => len - 1,
        };
        self.index = Some(prev);
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[defaults]
preset = "myopia"
fps = 0
watch = "2s"

[presets.myopia]
sphere = -2.0
axis = 90

[presets.astigmatism]
sphere = -0.5
cylinder = -1.25
axis = 180
eye_offset = [0.1, -0.05]

[presets.hyperopia]
sphere = 1.5
"#;

    #[test]
    fn parses_sample_config() {
        let config = PrescriptionConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.version, 1);
        let (name, preset) = config.default_preset().unwrap();
        assert_eq!(name, "myopia");
        assert_eq!(*preset, Preset::new(-2.0, 0.0, 90.0));
        assert_eq!(config.defaults.watch, Some(Duration::from_secs(2)));
        assert_eq!(
            config.preset("astigmatism").map(|p| p.eye_offset),
            Some([0.1, -0.05])
        );
        let names: Vec<&str> = config.preset_names().collect();
        assert_eq!(names, ["astigmatism", "hyperopia", "myopia"]);
    }

    #[test]
    fn rejects_unknown_default_preset() {
        let config = r#"
version = 1

[defaults]
preset = "missing"

[presets.main]
sphere = -1.0
"#;
        let err = PrescriptionConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_eye_offset() {
        let config = r#"
version = 1

[presets.main]
sphere = -1.0
eye_offset = [0.0, 0.75]
"#;
        let err = PrescriptionConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("eye_offset"));
    }

    #[test]
    fn rejects_wrong_version_and_negative_fps() {
        let err = PrescriptionConfig::from_toml_str("version = 2").unwrap_err();
        assert!(err.to_string().contains("version 2"));

        let err =
            PrescriptionConfig::from_toml_str("version = 1\n[defaults]\nfps = -1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn axis_is_not_range_checked() {
        let config = r#"
version = 1

[presets.odd]
sphere = 0.0
cylinder = -1.0
axis = 540
"#;
        let config = PrescriptionConfig::from_toml_str(config).unwrap();
        assert_eq!(config.preset("odd").unwrap().axis, 540.0);
    }

    #[test]
    fn parses_compact_prescription() {
        let preset: Preset = "SPH=-2.00 CYL=-0.75 AXIS=180".parse().unwrap();
        assert_eq!(preset, Preset::new(-2.0, -0.75, 180.0));

        let preset: Preset = "sph=+1.25, axis=45".parse().unwrap();
        assert_eq!(preset, Preset::new(1.25, 0.0, 45.0));
        assert_eq!(preset.to_string(), "SPH=1.25 CYL=0.00 AXIS=45");
    }

    #[test]
    fn rejects_malformed_compact_prescription() {
        for input in ["", "CYL=-1", "SPH=abc", "SPH=-1 SPH=-2", "SPH=-1 ADD=2", "SPH -1"] {
            let err = input.parse::<Preset>().unwrap_err();
            assert!(
                matches!(err, ConfigError::Prescription { .. }),
                "{input:?} gave {err}"
            );
        }
    }

    #[test]
    fn preset_cycle_wraps_both_ways() {
        let config = PrescriptionConfig::from_toml_str(SAMPLE).unwrap();
        let mut cycle = PresetCycle::new(&config, Some("myopia"));
        assert_eq!(cycle.current(), Some("myopia"));
        assert_eq!(cycle.next(), Some("astigmatism"));
        assert_eq!(cycle.prev(), Some("myopia"));
        assert_eq!(cycle.prev(), Some("hyperopia"));

        let mut fresh = PresetCycle::new(&config, None);
        assert_eq!(fresh.current(), None);
        assert_eq!(fresh.next(), Some("astigmatism"));

        let empty = PrescriptionConfig::from_toml_str("version = 1").unwrap();
        let mut cycle = PresetCycle::new(&empty, None);
        assert!(cycle.is_empty());
        assert_eq!(cycle.next(), None);
    }
}

use renderer::PrescriptionParameters;
use rxconfig::{PrescriptionConfig, PresetCycle, EYE_OFFSET_LIMIT};
use winit::keyboard::{Key, NamedKey};

use crate::bindings::preset_parameters;

pub const DIOPTRE_STEP: f32 = 0.25;
pub const AXIS_STEP: f32 = 1.0;
pub const EYE_STEP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    AdjustSphere(f32),
    AdjustCylinder(f32),
    AdjustAxis(f32),
    MoveEye { dx: f32, dy: f32 },
    NextPreset,
    PreviousPreset,
    ToggleSource,
    Restart,
    Reset,
    Quit,
}

impl Command {
    /// Step edits keep stepping while their key is held.
    pub fn repeats(&self) -> bool {
        matches!(
            self,
            Command::AdjustSphere(_)
                | Command::AdjustCylinder(_)
                | Command::AdjustAxis(_)
                | Command::MoveEye { .. }
        )
    }
}

/// What the host should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Publish(PrescriptionParameters),
    ToggleSource,
    Restart,
    Quit,
    Ignored,
}

/// Keyboard layout:
///
/// | key            | effect                   |
/// |----------------|--------------------------|
/// | Up / Down      | sphere ±0.25 D           |
/// | Right / Left   | cylinder ±0.25 D         |
/// | `]` / `[`      | axis ±1°                 |
/// | W A S D        | eye offset ±0.01         |
/// | Tab / Shift+Tab| next / previous preset   |
/// | Space          | show or hide the picture |
/// | R              | restart the renderer     |
/// | 0              | reset                    |
/// | Esc            | quit                     |
pub fn command_for_key(key: &Key, shift: bool) -> Option<Command> {
    match key {
        Key::Named(NamedKey::ArrowUp) => Some(Command::AdjustSphere(DIOPTRE_STEP)),
        Key::Named(NamedKey::ArrowDown) => Some(Command::AdjustSphere(-DIOPTRE_STEP)),
        Key::Named(NamedKey::ArrowRight) => Some(Command::AdjustCylinder(DIOPTRE_STEP)),
        Key::Named(NamedKey::ArrowLeft) => Some(Command::AdjustCylinder(-DIOPTRE_STEP)),
        Key::Named(NamedKey::Tab) if shift => Some(Command::PreviousPreset),
        Key::Named(NamedKey::Tab) => Some(Command::NextPreset),
        Key::Named(NamedKey::Space) => Some(Command::ToggleSource),
        Key::Named(NamedKey::Escape) => Some(Command::Quit),
        Key::Character(text) => match text.to_ascii_lowercase().as_str() {
            "]" => Some(Command::AdjustAxis(AXIS_STEP)),
            "[" => Some(Command::AdjustAxis(-AXIS_STEP)),
            "w" => Some(Command::MoveEye { dx: 0.0, dy: EYE_STEP }),
            "s" => Some(Command::MoveEye { dx: 0.0, dy: -EYE_STEP }),
            "a" => Some(Command::MoveEye { dx: -EYE_STEP, dy: 0.0 }),
            "d" => Some(Command::MoveEye { dx: EYE_STEP, dy: 0.0 }),
            " " => Some(Command::ToggleSource),
            "r" => Some(Command::Restart),
            "0" => Some(Command::Reset),
            _ => None,
        },
        _ => None,
    }
}

/// Interactive prescription state. Every edit yields a complete new value.
pub struct Controls {
    parameters: PrescriptionParameters,
    initial: PrescriptionParameters,
    presets: Option<PrescriptionConfig>,
    cycle: Option<PresetCycle>,
}

impl Controls {
    pub fn new(
        initial: PrescriptionParameters,
        presets: Option<PrescriptionConfig>,
        start_preset: Option<&str>,
    ) -> Self {
        let cycle = presets
            .as_ref()
            .map(|config| PresetCycle::new(config, start_preset));
        Self {
            parameters: initial,
            initial,
            presets,
            cycle,
        }
    }

    #[cfg(test)]
    pub fn parameters(&self) -> PrescriptionParameters {
        self.parameters
    }

    pub fn apply(&mut self, command: Command) -> Action {
        let mut next = self.parameters;
        match command {
            Command::AdjustSphere(step) => next.sphere = snap(next.sphere + step),
            Command::AdjustCylinder(step) => next.cylinder = snap(next.cylinder + step),
            Command::AdjustAxis(step) => next.axis_degrees += step,
            Command::MoveEye { dx, dy } => {
                next.eye_offset.x = clamp_eye(next.eye_offset.x + dx);
                next.eye_offset.y = clamp_eye(next.eye_offset.y + dy);
            }
            Command::NextPreset | Command::PreviousPreset => {
                match self.step_preset(command == Command::NextPreset) {
                    Some(parameters) => next = parameters,
                    None => return Action::Ignored,
                }
            }
            Command::Reset => next = self.initial,
            Command::ToggleSource => return Action::ToggleSource,
            Command::Restart => return Action::Restart,
            Command::Quit => return Action::Quit,
        }

        if next == self.parameters {
            return Action::Ignored;
        }
        self.parameters = next;
        Action::Publish(next)
    }

    fn step_preset(&mut self, forward: bool) -> Option<PrescriptionParameters> {
        let (config, cycle) = (self.presets.as_ref()?, self.cycle.as_mut()?);
        let name = if forward { cycle.next() } else { cycle.prev() }?;
        let preset = config.preset(name)?;
        tracing::info!(preset = name, "switched preset");
        Some(preset_parameters(preset))
    }
}

fn snap(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn clamp_eye(value: f32) -> f32 {
    snap(value).clamp(-EYE_OFFSET_LIMIT, EYE_OFFSET_LIMIT)
}

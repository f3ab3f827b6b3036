//! Translation of entity commands into outbound telegrams
//!
//! Every controllable profile has an explicit entry in a static table that
//! maps a profile code (or code prefix) to a translation function. Commands
//! a profile has no mapping for are reported as unsupported instead of
//! being guessed at.

use enolink_esp3::rorg;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::value::FieldMap;

/// Rocker button codes for RPS telegrams (`A0`/`AI` and so on are aliases)
pub const BUTTONS: &[(&str, u8)] = &[
    ("A0", 0x10),
    ("AI", 0x10),
    ("A1", 0x30),
    ("AO", 0x30),
    ("B0", 0x50),
    ("BI", 0x50),
    ("B1", 0x70),
    ("BO", 0x70),
];

/// Look up a rocker button code by name
pub fn button_code(name: &str) -> Option<u8> {
    BUTTONS
        .iter()
        .find(|(button, _)| button.eq_ignore_ascii_case(name.trim()))
        .map(|&(_, code)| code)
}

/// An entity command received from the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Binary on/off (or open/close for covers)
    Switch(bool),
    /// Brightness 0-255
    Dim(u8),
    /// Cover position 0-100, 100 = fully open
    Position(u8),
    /// Stop a moving cover
    Stop,
    /// Colour
    Rgb {
        /// Red channel
        red: u8,
        /// Green channel
        green: u8,
        /// Blue channel
        blue: u8,
    },
    /// Raw numeric output value
    Value(f64),
    /// Press a named rocker button
    Button(String),
}

impl Command {
    /// Short command kind for logging and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Switch(_) => "switch",
            Command::Dim(_) => "dim",
            Command::Position(_) => "position",
            Command::Stop => "stop",
            Command::Rgb { .. } => "rgb",
            Command::Value(_) => "value",
            Command::Button(_) => "button",
        }
    }

    /// Parse a JSON command payload
    ///
    /// Accepted keys: `state` (`ON`/`OFF`/`OPEN`/`CLOSE`/`STOP`),
    /// `brightness`, `position`, `rgb` (array or `{r,g,b}` object), `value`
    /// and `button`. A brightness wins over `state: ON` so that light
    /// commands carrying both dim rather than switch.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let state = payload.get("state").and_then(parse_state);

        if let Some(brightness) = payload.get("brightness").and_then(Value::as_f64) {
            if !matches!(state, Some(Command::Switch(false))) {
                return Some(Command::Dim(brightness.clamp(0.0, 255.0).round() as u8));
            }
        }
        if state.is_some() {
            return state;
        }
        if let Some(position) = payload.get("position").and_then(Value::as_f64) {
            return Some(Command::Position(position.clamp(0.0, 100.0).round() as u8));
        }
        if let Some(rgb) = payload.get("rgb").and_then(parse_rgb) {
            return Some(rgb);
        }
        if let Some(value) = payload.get("value").and_then(Value::as_f64) {
            return Some(Command::Value(value));
        }
        payload
            .get("button")
            .and_then(Value::as_str)
            .map(|b| Command::Button(b.to_string()))
    }

    /// Fields a confirming telegram must carry for `entity`
    ///
    /// Only commands whose effect shows up as a decoded value are tracked.
    pub fn expected_state(&self, entity: &str) -> Option<FieldMap> {
        let value = match self {
            Command::Switch(on) => Value::from(i64::from(*on)),
            Command::Dim(brightness) => Value::from(*brightness),
            Command::Position(position) => Value::from(*position),
            _ => return None,
        };
        Some(FieldMap::from([(entity.to_string(), value)]))
    }

    /// State to publish optimistically once the command was sent
    ///
    /// Mirrors the expected state, plus the colour for RGB commands.
    pub fn optimistic_state(&self, entity: &str) -> FieldMap {
        match self {
            Command::Rgb { red, green, blue } => FieldMap::from([(
                "rgb".to_string(),
                Value::from(vec![*red, *green, *blue]),
            )]),
            Command::Value(value) => FieldMap::from([(entity.to_string(), Value::from(*value))]),
            other => other.expected_state(entity).unwrap_or_default(),
        }
    }
}

fn parse_state(value: &Value) -> Option<Command> {
    if let Some(on) = value.as_bool() {
        return Some(Command::Switch(on));
    }
    match value.as_str()?.trim().to_ascii_uppercase().as_str() {
        "ON" | "OPEN" | "TRUE" => Some(Command::Switch(true)),
        "OFF" | "CLOSE" | "CLOSED" | "FALSE" => Some(Command::Switch(false)),
        "STOP" => Some(Command::Stop),
        _ => None,
    }
}

fn parse_rgb(value: &Value) -> Option<Command> {
    let channel = |v: Option<&Value>| v.and_then(Value::as_u64).map(|c| c.min(255) as u8);
    let (red, green, blue) = match value {
        Value::Array(items) if items.len() == 3 => (
            channel(items.first())?,
            channel(items.get(1))?,
            channel(items.get(2))?,
        ),
        Value::Object(map) => (
            channel(map.get("r"))?,
            channel(map.get("g"))?,
            channel(map.get("b"))?,
        ),
        _ => return None,
    };
    Some(Command::Rgb { red, green, blue })
}

/// Outbound action produced by a translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Translation {
    /// Send one radio telegram with these data bytes
    Telegram {
        /// Family code
        rorg: u8,
        /// Data bytes between RORG and sender id
        data: Vec<u8>,
    },
    /// Emulate a rocker press followed by a release
    Momentary {
        /// Button code of the press telegram
        button: u8,
    },
}

impl Translation {
    fn four_bs(data: [u8; 4]) -> Self {
        Translation::Telegram {
            rorg: rorg::FOUR_BS,
            data: data.to_vec(),
        }
    }

    fn vld(data: &[u8]) -> Self {
        Translation::Telegram {
            rorg: rorg::VLD,
            data: data.to_vec(),
        }
    }
}

/// Scale a 0-255 brightness to a 0-100 percentage
pub fn brightness_percent(brightness: u8) -> u8 {
    (f64::from(brightness) / 255.0 * 100.0).round() as u8
}

fn percent(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

type TranslateFn = fn(&Command) -> Option<Translation>;

/// One controllable profile family
struct Mapping {
    /// Profile code, or code prefix when `exact` is false
    eep: &'static str,
    exact: bool,
    commands: &'static [&'static str],
    translate: TranslateFn,
}

impl Mapping {
    fn applies_to(&self, eep: &str) -> bool {
        let eep = eep.trim();
        if self.exact {
            eep.eq_ignore_ascii_case(self.eep)
        } else {
            eep.get(..self.eep.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(self.eep))
        }
    }
}

/// Ordered so that exact codes are checked before their family prefix
static MAPPINGS: &[Mapping] = &[
    Mapping {
        eep: "A5-38-08",
        exact: true,
        commands: &["switch", "dim", "rgb", "value"],
        translate: central_command,
    },
    Mapping {
        eep: "D2-01-12",
        exact: true,
        commands: &["switch", "dim", "rgb", "value"],
        translate: rgb_actuator,
    },
    Mapping {
        eep: "D2-01",
        exact: false,
        commands: &["switch", "dim", "value"],
        translate: electronic_switch,
    },
    Mapping {
        eep: "D2-05",
        exact: false,
        commands: &["switch", "position", "stop", "value"],
        translate: blinds_control,
    },
    Mapping {
        eep: "F6-02",
        exact: false,
        commands: &["switch"],
        translate: rocker_switch,
    },
];

/// A5-38-08 central command: switching, dimming and colour
fn central_command(command: &Command) -> Option<Translation> {
    match command {
        Command::Switch(true) => Some(Translation::four_bs([0x02, 0x00, 0x64, 0x09])),
        Command::Switch(false) => Some(Translation::four_bs([0x02, 0x00, 0x00, 0x08])),
        Command::Dim(brightness) => Some(Translation::four_bs([
            0x02,
            0x00,
            brightness_percent(*brightness),
            0x09,
        ])),
        Command::Value(value) => Some(Translation::four_bs([0x02, 0x00, percent(*value), 0x09])),
        Command::Rgb { red, green, blue } => {
            Some(Translation::four_bs([0x07, *red, *green, *blue]))
        }
        _ => None,
    }
}

/// D2-01-12 variant with an RGB channel
fn rgb_actuator(command: &Command) -> Option<Translation> {
    match command {
        Command::Rgb { red, green, blue } => Some(Translation::vld(&[0x07, *red, *green, *blue])),
        other => electronic_switch(other),
    }
}

/// D2-01 "actuator set output" on all output channels
fn electronic_switch(command: &Command) -> Option<Translation> {
    const SET_OUTPUT: u8 = 0x01;
    const ALL_CHANNELS: u8 = 0x1E;
    let level = match command {
        Command::Switch(on) => {
            if *on {
                100
            } else {
                0
            }
        }
        Command::Dim(brightness) => brightness_percent(*brightness),
        Command::Value(value) => percent(*value),
        _ => return None,
    };
    Some(Translation::vld(&[SET_OUTPUT, ALL_CHANNELS, level]))
}

/// D2-05 blinds: wire position 0 is fully open, so positions are inverted
fn blinds_control(command: &Command) -> Option<Translation> {
    const GO_TO_POSITION: u8 = 0x01;
    const STOP: u8 = 0x02;
    const ANGLE_UNCHANGED: u8 = 0x7F;
    let wire_position = match command {
        Command::Position(position) => 100 - (*position).min(100),
        Command::Switch(open) => {
            if *open {
                0
            } else {
                100
            }
        }
        Command::Value(value) => percent(*value),
        Command::Stop => return Some(Translation::vld(&[STOP])),
        _ => return None,
    };
    Some(Translation::vld(&[
        wire_position,
        ANGLE_UNCHANGED,
        0x00,
        GO_TO_POSITION,
    ]))
}

/// F6-02 rockers: emulate the I (on) or O (off) button of channel A
fn rocker_switch(command: &Command) -> Option<Translation> {
    match command {
        Command::Switch(true) => Some(Translation::Momentary { button: 0x10 }),
        Command::Switch(false) => Some(Translation::Momentary { button: 0x30 }),
        _ => None,
    }
}

/// Turns entity commands into telegrams using the mapping table
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandTranslator;

impl CommandTranslator {
    /// Create a translator
    pub fn new() -> Self {
        Self
    }

    fn mapping(eep: &str) -> Option<&'static Mapping> {
        MAPPINGS.iter().find(|m| m.applies_to(eep))
    }

    /// Translate a command, failing with `UnsupportedCommand`
    ///
    /// Button commands work for every profile since they only emulate a
    /// rocker press.
    pub fn try_translate(&self, eep: &str, entity: &str, command: &Command) -> Result<Translation> {
        if let Command::Button(name) = command {
            if let Some(button) = button_code(name) {
                return Ok(Translation::Momentary { button });
            }
        }

        let translation = Self::mapping(eep).and_then(|m| (m.translate)(command));
        match translation {
            Some(t) => {
                debug!(eep, entity, command = command.kind(), translation = ?t, "Translated command");
                Ok(t)
            }
            None => Err(EepError::UnsupportedCommand {
                eep: eep.to_string(),
                command: command.kind(),
            }),
        }
    }

    /// Translate a command, logging and returning `None` when unsupported
    pub fn translate(&self, eep: &str, entity: &str, command: &Command) -> Option<Translation> {
        match self.try_translate(eep, entity, command) {
            Ok(translation) => Some(translation),
            Err(e) => {
                warn!(error = %e, code = e.error_code(), entity, "Cannot translate command");
                None
            }
        }
    }

    /// Whether any command can be sent to devices with this profile
    pub fn is_controllable(&self, eep: &str) -> bool {
        Self::mapping(eep).is_some()
    }

    /// Command kinds with a mapping for this profile
    pub fn supported_commands(&self, eep: &str) -> Vec<&'static str> {
        let mut commands = Self::mapping(eep)
            .map(|m| m.commands.to_vec())
            .unwrap_or_default();
        commands.push("button");
        commands
    }
}

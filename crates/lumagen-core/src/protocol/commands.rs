//! Command catalog: textual command ids to wire text.
//!
//! The ids are the simple-command names a remote-control host uses (`up`,
//! `menu`, `mema`, `source_aspect_2_35`, ...).  Each entry also says how the
//! dispatcher decides the command was acknowledged:
//!
//! - **Actions** are acknowledged by the echo alone.  The device does not
//!   answer key presses; their effect shows up later as reports.
//! - **Queries** are acknowledged by the first response line carrying the
//!   expected prefix after the echo.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::protocol::reports::{
    input_label_code, ALIVE_RESPONSE_PREFIX, IDENTITY_RESPONSE_PREFIX,
    INPUT_LABEL_RESPONSE_PREFIX, MAX_INPUT, POWER_RESPONSE_PREFIX,
};

/// Longest text `display_message` accepts.
pub const MAX_MESSAGE_LEN: usize = 60;

/// Errors raised when resolving a command id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    #[error("command {command} does not take parameter {name}")]
    UnexpectedParameter { command: String, name: String },

    #[error("command {command} requires parameter {name}")]
    MissingParameter { command: String, name: &'static str },
}

/// How a command is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The echo completes the command.
    OnEcho,
    /// A response starting with this prefix completes the command.
    OnResponse(&'static str),
}

/// A command ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    text: String,
    ack: Acknowledgement,
}

/// Parameters attached to a command id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams(BTreeMap<String, String>);

impl CommandParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Action commands: id and wire text.
const ACTIONS: &[(&str, &str)] = &[
    ("power_on", "Z1"),
    ("standby", "Z0"),
    ("power_off", "Z0"),
    ("0", "0"),
    ("1", "1"),
    ("2", "2"),
    ("3", "3"),
    ("4", "4"),
    ("5", "5"),
    ("6", "6"),
    ("7", "7"),
    ("8", "8"),
    ("9", "9"),
    ("10", "+"),
    ("up", "^"),
    ("down", "v"),
    ("left", "<"),
    ("right", ">"),
    ("ok", "k"),
    ("menu", "M"),
    ("exit", "X"),
    ("input", "i"),
    ("alt", "#"),
    ("prev", "P"),
    ("help", "U"),
    ("clear", "!"),
    ("save", "S"),
    ("hdr", "Y"),
    ("pattern", "p"),
    ("zone", "L"),
    ("mema", "a"),
    ("memb", "b"),
    ("memc", "c"),
    ("memd", "d"),
    ("nls", "N"),
    ("source_aspect_4x3", "ZA133"),
    ("source_aspect_lbox", "ZALBX"),
    ("source_aspect_16x9", "ZA178"),
    ("source_aspect_1_85", "ZA185"),
    ("source_aspect_1_90", "ZA190"),
    ("source_aspect_2_00", "ZA200"),
    ("source_aspect_2_10", "ZA210"),
    ("source_aspect_2_20", "ZA220"),
    ("source_aspect_2_35", "ZA235"),
    ("source_aspect_2_40", "ZA240"),
    ("source_aspect_2_55", "ZA255"),
    ("source_aspect_2_76", "ZA276"),
    ("auto_aspect_enable", "ZAE"),
    ("auto_aspect_disable", "ZAD"),
    ("clear_message", "ZC"),
];

/// Commands that need parameters, with the parameter names they accept.
const PARAMETERISED: &[(&str, &[&str])] = &[
    ("input", &["input"]),
    ("display_message", &["text", "seconds"]),
];

/// Query commands: id, wire text and response prefix.
const QUERIES: &[(&str, &str, &str)] = &[
    ("alive", "ZQS00", ALIVE_RESPONSE_PREFIX),
    ("device_info", "ZQS01", IDENTITY_RESPONSE_PREFIX),
    ("power_status", "ZQS02", POWER_RESPONSE_PREFIX),
];

impl Command {
    /// Builds a command directly from its parts.
    pub fn raw(name: impl Into<String>, text: impl Into<String>, ack: Acknowledgement) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            ack,
        }
    }

    /// Resolves a command id plus parameters.
    ///
    /// `input` optionally takes `input = 1..=18`; without it the Input key is
    /// sent.  `display_message` takes `text` and optionally `seconds = 0..=9`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] for unknown ids or bad parameters.
    pub fn lookup(id: &str, params: &CommandParams) -> Result<Self, CommandError> {
        let accepted = PARAMETERISED
            .iter()
            .find(|(name, _)| *name == id)
            .map_or(&[][..], |(_, accepted)| *accepted);
        if let Some(name) = params.names().find(|n| !accepted.contains(n)) {
            return Err(CommandError::UnexpectedParameter {
                command: id.to_string(),
                name: name.to_string(),
            });
        }

        match id {
            "input" => {
                if let Some(value) = params.get("input") {
                    let n = value
                        .trim()
                        .parse::<u8>()
                        .ok()
                        .filter(|n| (1..=MAX_INPUT).contains(n))
                        .ok_or_else(|| invalid("input", value))?;
                    return Ok(Self::select_input_unchecked(n));
                }
            }
            "display_message" => {
                let text = params.get("text").ok_or(CommandError::MissingParameter {
                    command: id.to_string(),
                    name: "text",
                })?;
                let seconds = match params.get("seconds") {
                    None => 1,
                    Some(value) => value
                        .trim()
                        .parse::<u8>()
                        .ok()
                        .filter(|s| *s <= 9)
                        .ok_or_else(|| invalid("seconds", value))?,
                };
                return Self::display_message(text, seconds);
            }
            _ => {}
        }

        if let Some((_, text)) = ACTIONS.iter().find(|(name, _)| *name == id) {
            return Ok(Self::raw(id, *text, Acknowledgement::OnEcho));
        }
        if let Some((_, text, prefix)) = QUERIES.iter().find(|(name, _, _)| *name == id) {
            return Ok(Self::raw(id, *text, Acknowledgement::OnResponse(*prefix)));
        }
        Err(CommandError::UnknownCommand(id.to_string()))
    }

    /// All command ids the catalog knows.
    pub fn known_ids() -> impl Iterator<Item = &'static str> {
        ACTIONS
            .iter()
            .map(|(id, _)| *id)
            .chain(QUERIES.iter().map(|(id, _, _)| *id))
            .chain(std::iter::once("display_message"))
    }

    /// Shows `text` on the on-screen display for `seconds` (9 keeps it up
    /// until cleared).
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] for empty, overlong or
    /// non-printable text, or `seconds` above 9.
    pub fn display_message(text: &str, seconds: u8) -> Result<Self, CommandError> {
        if seconds > 9 {
            return Err(invalid("seconds", &seconds.to_string()));
        }
        let printable = text.chars().all(|c| c.is_ascii() && !c.is_ascii_control());
        if text.is_empty() || text.len() > MAX_MESSAGE_LEN || !printable {
            return Err(invalid("text", text));
        }
        Ok(Self::raw(
            "display_message",
            format!("ZT{seconds}{text}"),
            Acknowledgement::OnEcho,
        ))
    }

    /// Asks for the label of physical input `n` in memory A.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] outside `1..=18`.
    pub fn input_label(n: u8) -> Result<Self, CommandError> {
        let code = input_label_code(n).ok_or_else(|| invalid("input", &n.to_string()))?;
        Ok(Self::raw(
            "input_label",
            format!("ZQS1A{code}"),
            Acknowledgement::OnResponse(INPUT_LABEL_RESPONSE_PREFIX),
        ))
    }

    pub fn power_on() -> Self {
        Self::raw("power_on", "Z1", Acknowledgement::OnEcho)
    }

    pub fn standby() -> Self {
        Self::raw("standby", "Z0", Acknowledgement::OnEcho)
    }

    /// Liveness probe.
    pub fn alive() -> Self {
        Self::raw("alive", "ZQS00", Acknowledgement::OnResponse(ALIVE_RESPONSE_PREFIX))
    }

    pub fn device_info() -> Self {
        Self::raw(
            "device_info",
            "ZQS01",
            Acknowledgement::OnResponse(IDENTITY_RESPONSE_PREFIX),
        )
    }

    pub fn power_status() -> Self {
        Self::raw(
            "power_status",
            "ZQS02",
            Acknowledgement::OnResponse(POWER_RESPONSE_PREFIX),
        )
    }

    /// Selects physical input `n`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] outside `1..=18`.
    pub fn select_input(n: u8) -> Result<Self, CommandError> {
        if !(1..=MAX_INPUT).contains(&n) {
            return Err(invalid("input", &n.to_string()));
        }
        Ok(Self::select_input_unchecked(n))
    }

    fn select_input_unchecked(n: u8) -> Self {
        Self::raw("input", format!("i{n}"), Acknowledgement::OnEcho)
    }

    /// Catalog id of the command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire text without terminator; also the exact text the echo carries.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ack(&self) -> Acknowledgement {
        self.ack
    }

    /// Response prefix for queries.
    pub fn expected_response(&self) -> Option<&'static str> {
        match self.ack {
            Acknowledgement::OnEcho => None,
            Acknowledgement::OnResponse(prefix) => Some(prefix),
        }
    }

    /// Bytes to write: text followed by the terminator.
    pub fn encode(&self, terminator: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(terminator);
        bytes
    }
}

fn invalid(name: &str, value: &str) -> CommandError {
    CommandError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.name, self.text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

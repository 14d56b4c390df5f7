//! Parsers for the text the device emits: unsolicited reports and query
//! responses.
//!
//! With "Report mode Fullv4" enabled the processor announces state changes on
//! its own.  The grammar understood here:
//!
//! | Frame                       | Meaning                                   |
//! |-----------------------------|-------------------------------------------|
//! | `Z1Standby` / `Z1Warming` / `Z1Active` | power state report            |
//! | `!I00,<n>`                  | physical input changed to `n`             |
//! | `!I25,<f1>,...,<f17>[,<f18>,<f19>,...]` | full input/output information |
//! | `!S00,Ok`                   | response to the alive query               |
//! | `!S01,<model>,<rev>,<no>,<serial>` | response to the identity query     |
//! | `!S02,<0\|1>`               | response to the power query               |
//! | `!S1A<c>,<label>`           | response to an input label query          |
//!
//! Field 18 of `!I25` is the source mode and field 19 the detected source
//! aspect.  Older firmware stops at field 17; both are optional.
//!
//! Input label queries address inputs 1..=10 as `0`..`9` and 11..=18 as
//! `A`..`H`.
//!
//! Parsing is deliberately forgiving about what it does not know: a frame
//! without a known prefix is simply "not a report".  A frame that *has* a
//! known prefix but broken fields is a [`ReportError`], which the classifier
//! downgrades to Unknown.

use thiserror::Error;

use crate::domain::device_state::PowerState;

/// Prefix of power reports.
pub const POWER_REPORT_PREFIX: &str = "Z1";
/// Prefix of input-change reports.
pub const INPUT_REPORT_PREFIX: &str = "!I00,";
/// Prefix of Fullv4 information reports.
pub const FULL_INFO_PREFIX: &str = "!I25,";

/// Prefix of the alive query response.
pub const ALIVE_RESPONSE_PREFIX: &str = "!S00,";
/// Prefix of the identity query response.
pub const IDENTITY_RESPONSE_PREFIX: &str = "!S01,";
/// Prefix of the power query response.
pub const POWER_RESPONSE_PREFIX: &str = "!S02,";
/// Prefix of input label responses (memory A).
pub const INPUT_LABEL_RESPONSE_PREFIX: &str = "!S1A";

/// Minimum number of comma-separated fields after the `!I25` tag.
pub const FULL_INFO_MIN_FIELDS: usize = 17;

/// Highest physical input number on a Radiance Pro.
pub const MAX_INPUT: u8 = 18;

/// Errors raised while parsing a frame that carries a known report prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    /// The power word after `Z1` is not one of the known states.
    #[error("unknown power word: {0:?}")]
    UnknownPowerWord(String),

    /// Fewer fields than the grammar requires (truncated frame).
    #[error("{report}: expected at least {expected} fields, got {actual}")]
    Truncated {
        report: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A field could not be interpreted.
    #[error("{report}: invalid {field}: {value:?}")]
    InvalidField {
        report: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Dynamic range of the current source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicRange {
    Sdr,
    Hdr,
}

impl DynamicRange {
    /// Short label used in logs and UI sensors.
    pub fn as_str(self) -> &'static str {
        match self {
            DynamicRange::Sdr => "SDR",
            DynamicRange::Hdr => "HDR",
        }
    }
}

/// Scan type of the current source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Interlaced,
    Progressive,
    /// No active source.
    NoSource,
}

impl SourceMode {
    fn from_field(field: &str) -> Option<Self> {
        match field {
            "i" => Some(SourceMode::Interlaced),
            "p" => Some(SourceMode::Progressive),
            "n" => Some(SourceMode::NoSource),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceMode::Interlaced => "Interlaced",
            SourceMode::Progressive => "Progressive",
            SourceMode::NoSource => "No Source",
        }
    }
}

/// Fields extracted from a Fullv4 information report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullInfo {
    /// Source vertical refresh rate, e.g. `"023"` for 23.976 Hz.
    pub source_vertical_rate: String,
    /// Source content aspect, e.g. `"235"`.
    pub content_aspect: String,
    /// Source dynamic range.
    pub dynamic_range: DynamicRange,
    /// Physical input currently routed.
    pub physical_input: u8,
    /// Field 18, when the firmware sends it.
    pub source_mode: Option<SourceMode>,
    /// Field 19: aspect the processor detected in the picture.
    pub detected_aspect: Option<String>,
}

/// A typed unsolicited report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Power state changed.
    Power(PowerState),
    /// A different physical input was selected.
    InputChanged(u8),
    /// Full information snapshot.
    FullInfo(FullInfo),
    /// Name of a physical input, from a label query.
    InputLabel { input: u8, label: String },
}

/// Returns `true` when `text` starts with one of the unsolicited-report
/// prefixes.
pub fn has_report_prefix(text: &str) -> bool {
    text.starts_with(POWER_REPORT_PREFIX)
        || text.starts_with(INPUT_REPORT_PREFIX)
        || text.starts_with(FULL_INFO_PREFIX)
}

/// Parses an unsolicited report.
///
/// Returns `None` when the text has no report prefix, `Some(Err(_))` when the
/// prefix matched but the body is malformed.
pub fn parse_report(text: &str) -> Option<Result<Report, ReportError>> {
    if let Some(word) = text.strip_prefix(POWER_REPORT_PREFIX) {
        return Some(parse_power_word(word).map(Report::Power));
    }
    if let Some(body) = text.strip_prefix(INPUT_REPORT_PREFIX) {
        return Some(parse_input(body.trim(), "input report").map(Report::InputChanged));
    }
    if let Some(body) = text.strip_prefix(FULL_INFO_PREFIX) {
        return Some(parse_full_info(body).map(Report::FullInfo));
    }
    None
}

/// Extracts state carried by a query response.
///
/// The power and input label answers carry state; every other response
/// yields `None`.
///
/// # Errors
///
/// Returns [`ReportError`] if a `!S02` response carries an unknown value or a
/// label response names no valid input.
pub fn parse_status_response(text: &str) -> Option<Result<Report, ReportError>> {
    if let Some(body) = text.strip_prefix(INPUT_LABEL_RESPONSE_PREFIX) {
        return Some(parse_input_label(body));
    }
    let value = text.strip_prefix(POWER_RESPONSE_PREFIX)?;
    let power = match value.trim() {
        "0" => Ok(PowerState::Standby),
        "1" => Ok(PowerState::Active),
        other => Err(ReportError::InvalidField {
            report: "power response",
            field: "power",
            value: other.to_string(),
        }),
    };
    Some(power.map(Report::Power))
}

/// Wire code of input `n` in label queries.
pub fn input_label_code(n: u8) -> Option<char> {
    match n {
        1..=10 => char::from_digit(u32::from(n - 1), 10),
        11..=MAX_INPUT => Some(char::from(b'A' + (n - 11))),
        _ => None,
    }
}

fn input_from_label_code(code: char) -> Option<u8> {
    match code {
        '0'..='9' => Some(code as u8 - b'0' + 1),
        'A'..='H' => Some(code as u8 - b'A' + 11),
        _ => None,
    }
}

fn parse_input_label(body: &str) -> Result<Report, ReportError> {
    let invalid = || ReportError::InvalidField {
        report: "input label response",
        field: "input",
        value: body.to_string(),
    };
    let (code, label) = body.split_once(',').ok_or_else(invalid)?;
    let mut chars = code.chars();
    let input = match (chars.next(), chars.next()) {
        (Some(c), None) => input_from_label_code(c).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    Ok(Report::InputLabel {
        input,
        label: label.trim().to_string(),
    })
}

fn parse_power_word(word: &str) -> Result<PowerState, ReportError> {
    match word {
        "Standby" => Ok(PowerState::Standby),
        "Warming" => Ok(PowerState::Warming),
        "Active" => Ok(PowerState::Active),
        other => Err(ReportError::UnknownPowerWord(other.to_string())),
    }
}

fn parse_input(value: &str, report: &'static str) -> Result<u8, ReportError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|n| (1..=MAX_INPUT).contains(n))
        .ok_or_else(|| ReportError::InvalidField {
            report,
            field: "input",
            value: value.to_string(),
        })
}

fn parse_full_info(body: &str) -> Result<FullInfo, ReportError> {
    const REPORT: &str = "full info";

    let fields: Vec<&str> = body.split(',').map(str::trim).collect();
    let required = &fields[..fields.len().min(FULL_INFO_MIN_FIELDS)];
    if required.len() < FULL_INFO_MIN_FIELDS || required.iter().any(|f| f.is_empty()) {
        return Err(ReportError::Truncated {
            report: REPORT,
            expected: FULL_INFO_MIN_FIELDS,
            actual: fields.iter().take_while(|f| !f.is_empty()).count(),
        });
    }

    // Field numbers below are 1-based as in the device documentation.
    let source_vertical_rate = fields[1].to_string();
    let content_aspect = fields[6].to_string();
    let dynamic_range = match fields[15] {
        "0" => DynamicRange::Sdr,
        "1" => DynamicRange::Hdr,
        other => {
            return Err(ReportError::InvalidField {
                report: REPORT,
                field: "dynamic range",
                value: other.to_string(),
            })
        }
    };
    let physical_input = parse_input(fields[16], REPORT)?;
    let source_mode = match fields.get(17).copied().filter(|f| !f.is_empty()) {
        None => None,
        Some(field) => Some(SourceMode::from_field(field).ok_or_else(|| {
            ReportError::InvalidField {
                report: REPORT,
                field: "source mode",
                value: field.to_string(),
            }
        })?),
    };
    let detected_aspect = fields
        .get(18)
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string());

    Ok(FullInfo {
        source_vertical_rate,
        content_aspect,
        dynamic_range,
        physical_input,
        source_mode,
        detected_aspect,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Device-state snapshot and the rules for folding reports into it.
//!
//! The snapshot is plain data.  Ownership and update rights live with the
//! client's state tracker; this module only answers "given this snapshot and
//! this report, what is the next snapshot?" and "what changed between two
//! snapshots?".

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::protocol::reports::{FullInfo, Report};

/// Power state of the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    /// No trustworthy report since the connection was (re)established.
    #[default]
    Unknown,
    Standby,
    /// Transient state between Standby and Active.
    Warming,
    Active,
}

impl PowerState {
    /// Whether the transition `self -> next` is allowed.
    ///
    /// Unknown may only resolve to Standby or Active; Warming is reachable
    /// only from Standby and leaves to Active or back to Standby.  Moving to
    /// Unknown is reserved for disconnects and is not a report transition.
    pub fn can_transition_to(self, next: PowerState) -> bool {
        use PowerState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Unknown) => false,
            (Unknown, Standby | Active) => true,
            (Unknown, Warming) => false,
            (Standby, Warming | Active) => true,
            (Warming, Active | Standby) => true,
            (Active, Standby) => true,
            (Active, Warming) => false,
            _ => false,
        }
    }

    pub fn is_on(self) -> bool {
        self == PowerState::Active
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Unknown => "unknown",
            PowerState::Standby => "Standby",
            PowerState::Warming => "Warming",
            PowerState::Active => "Active",
        };
        f.write_str(s)
    }
}

/// Last known state of the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub power: PowerState,
    /// Physical input currently routed (1-based).
    pub active_source_id: Option<u8>,
    /// Source content aspect as reported, e.g. `"235"`.
    pub aspect_mode: Option<String>,
    pub source_vertical_rate: Option<String>,
    pub source_dynamic_range: Option<String>,
    /// Scan type of the source, e.g. `"Progressive"`.
    pub source_mode: Option<String>,
    /// Aspect detected in the picture, e.g. `"240"`.
    pub detected_aspect: Option<String>,
    /// Input names; index 0 is input 1.  Unlabelled inputs are empty.
    pub input_labels: Vec<String>,
    /// When any field last changed.  Not part of change detection.
    pub last_updated: Option<SystemTime>,
}

/// One observable field that differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Power(PowerState),
    ActiveSource(Option<u8>),
    AspectMode(Option<String>),
    SourceVerticalRate(Option<String>),
    SourceDynamicRange(Option<String>),
    SourceMode(Option<String>),
    DetectedAspect(Option<String>),
    InputLabels(Vec<String>),
}

/// A published change event: what changed plus the resulting snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDelta {
    pub changes: Vec<StateChange>,
    pub state: DeviceState,
}

impl StateDelta {
    /// The new power state, if power changed.
    pub fn power(&self) -> Option<PowerState> {
        self.changes.iter().find_map(|c| match c {
            StateChange::Power(p) => Some(*p),
            _ => None,
        })
    }
}

/// Outcome of applying a report to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// At least one field changed.
    Changed,
    /// The report repeated what was already known.
    Unchanged,
    /// The report asked for a power transition that is not allowed.
    IllegalTransition { from: PowerState, to: PowerState },
}

impl DeviceState {
    /// Folds `report` into the snapshot.
    pub fn apply(&mut self, report: &Report) -> ApplyResult {
        let before = self.clone();
        match report {
            Report::Power(next) => {
                if !self.power.can_transition_to(*next) {
                    return ApplyResult::IllegalTransition {
                        from: self.power,
                        to: *next,
                    };
                }
                self.power = *next;
            }
            Report::InputChanged(input) => self.active_source_id = Some(*input),
            Report::FullInfo(info) => self.apply_full_info(info),
            Report::InputLabel { input, label } => self.set_input_label(*input, label),
        }

        if self.observably_equal(&before) {
            ApplyResult::Unchanged
        } else {
            self.last_updated = Some(SystemTime::now());
            ApplyResult::Changed
        }
    }

    /// Resets power to Unknown; used when the connection drops.
    pub fn invalidate_power(&mut self) -> bool {
        if self.power == PowerState::Unknown {
            return false;
        }
        self.power = PowerState::Unknown;
        self.last_updated = Some(SystemTime::now());
        true
    }

    /// Lists the fields of `self` that differ from `previous`.
    pub fn diff(&self, previous: &DeviceState) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if self.power != previous.power {
            changes.push(StateChange::Power(self.power));
        }
        if self.active_source_id != previous.active_source_id {
            changes.push(StateChange::ActiveSource(self.active_source_id));
        }
        if self.aspect_mode != previous.aspect_mode {
            changes.push(StateChange::AspectMode(self.aspect_mode.clone()));
        }
        if self.source_vertical_rate != previous.source_vertical_rate {
            changes.push(StateChange::SourceVerticalRate(
                self.source_vertical_rate.clone(),
            ));
        }
        if self.source_dynamic_range != previous.source_dynamic_range {
            changes.push(StateChange::SourceDynamicRange(
                self.source_dynamic_range.clone(),
            ));
        }
        if self.source_mode != previous.source_mode {
            changes.push(StateChange::SourceMode(self.source_mode.clone()));
        }
        if self.detected_aspect != previous.detected_aspect {
            changes.push(StateChange::DetectedAspect(self.detected_aspect.clone()));
        }
        if self.input_labels != previous.input_labels {
            changes.push(StateChange::InputLabels(self.input_labels.clone()));
        }
        changes
    }

    fn observably_equal(&self, other: &DeviceState) -> bool {
        self.diff(other).is_empty()
    }

    fn apply_full_info(&mut self, info: &FullInfo) {
        self.active_source_id = Some(info.physical_input);
        self.aspect_mode = Some(info.content_aspect.clone());
        self.source_vertical_rate = Some(info.source_vertical_rate.clone());
        self.source_dynamic_range = Some(info.dynamic_range.as_str().to_string());
        if let Some(mode) = info.source_mode {
            self.source_mode = Some(mode.as_str().to_string());
        }
        if let Some(aspect) = &info.detected_aspect {
            self.detected_aspect = Some(aspect.clone());
        }
    }

    fn set_input_label(&mut self, input: u8, label: &str) {
        let Some(index) = usize::from(input).checked_sub(1) else {
            return;
        };
        if self.input_labels.len() <= index {
            self.input_labels.resize(index + 1, String::new());
        }
        self.input_labels[index] = label.to_string();
    }

    /// Name of the currently routed input, if it has a label.
    pub fn active_source_name(&self) -> Option<&str> {
        let index = usize::from(self.active_source_id?).checked_sub(1)?;
        self.input_labels
            .get(index)
            .map(String::as_str)
            .filter(|l| !l.is_empty())
    }

    /// Input number carrying `label`, compared case-insensitively.
    pub fn input_for_label(&self, label: &str) -> Option<u8> {
        let index = self
            .input_labels
            .iter()
            .position(|l| !l.is_empty() && l.eq_ignore_ascii_case(label.trim()))?;
        u8::try_from(index + 1).ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

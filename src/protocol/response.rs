//! Response line classification
//!
//! Every line the controller sends is either a command outcome (`S`/`E`) or
//! a state update. Success lines may carry a state update too, e.g. the reply
//! to `GET C[1].Z[1].name` is `S C[1].Z[1].name="Kitchen"`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::RioError;
use crate::types::{PresetId, SourceId, ZoneId};

/// Success outcome tag
pub const TAG_SUCCESS: char = 'S';
/// Error outcome tag
pub const TAG_ERROR: char = 'E';

/// `<target>.<variable>="<value>"` where the target is a preset, source or zone.
/// Alternation order matters: the preset form must be tried before the
/// bare source form it starts with.
static STATE_UPDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"(?:S\[(?P<preset_source>\d+)\]\.B\[(?P<preset_bank>\d+)\]\.P\[(?P<preset>\d+)\])|",
        r"(?:S\[(?P<source>\d+)\])|",
        r"(?:C\[(?P<controller>\d+)\]\.Z\[(?P<zone>\d+)\])",
        r")\.(?P<variable>[^=\s]+)=",
        r#""(?P<value>.*)""#,
    ))
    .expect("state update pattern is valid")
});

/// Any `<path>="<value>"` assignment, e.g. the controller-level `C[1].type`
static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^=\s]+="(?P<value>.*)"$"#).expect("assignment pattern is valid")
});

/// Object a state update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTarget {
    /// Zone variable
    Zone(ZoneId),
    /// Source variable
    Source(SourceId),
    /// Preset variable
    Preset(PresetId),
}

/// A variable assignment reported by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Object the variable belongs to
    pub target: UpdateTarget,
    /// Lower-cased variable name
    pub variable: String,
    /// Raw value, quotes stripped
    pub value: String,
}

/// Classification of one response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `S` outcome, possibly doubling as a state update
    Success(Option<StateUpdate>),
    /// `S` outcome assigning a variable the cache does not track
    Value(String),
    /// `E` outcome with the controller's message
    Error(String),
    /// Unsolicited (or otherwise untagged) state update
    Update(StateUpdate),
    /// Neither an outcome nor a recognised state update
    Ignored,
}

impl Response {
    /// Check if this line resolves a pending command
    #[must_use]
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Value(_) | Self::Error(_))
    }

    /// State update carried by this line, if any
    #[must_use]
    pub fn update(&self) -> Option<&StateUpdate> {
        match self {
            Self::Success(update) => update.as_ref(),
            Self::Update(update) => Some(update),
            Self::Value(_) | Self::Error(_) | Self::Ignored => None,
        }
    }

    /// Value a success outcome resolves its command with
    ///
    /// A bare `S` (e.g. the reply to `SET`) yields an empty string.
    #[must_use]
    pub fn success_value(&self) -> Option<String> {
        match self {
            Self::Success(update) => Some(
                update
                    .as_ref()
                    .map(|u| u.value.clone())
                    .unwrap_or_default(),
            ),
            Self::Value(value) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Classify one line received from the controller
///
/// The line is trimmed, its first character is the tag and the payload
/// starts after the one-character separator that follows it.
#[must_use]
pub fn parse_line(line: &str) -> Response {
    let line = line.trim();
    let mut chars = line.chars();
    let Some(tag) = chars.next() else {
        return Response::Ignored;
    };
    chars.next();
    let payload = chars.as_str();

    if tag == TAG_ERROR {
        return Response::Error(payload.to_string());
    }

    let update = parse_state_update(payload);
    if tag == TAG_SUCCESS {
        if update.is_none() {
            if let Some(caps) = ASSIGNMENT.captures(payload) {
                return Response::Value(caps["value"].to_string());
            }
        }
        return Response::Success(update);
    }
    update.map_or(Response::Ignored, Response::Update)
}

/// Match a payload against the state-update grammar
#[must_use]
pub fn parse_state_update(payload: &str) -> Option<StateUpdate> {
    let caps = STATE_UPDATE.captures(payload)?;
    let target = match extract_target(&caps) {
        Ok(target) => target,
        Err(e) => {
            tracing::debug!(payload, error = %e, "Ignoring update with invalid target");
            return None;
        }
    };

    Some(StateUpdate {
        target,
        variable: caps["variable"].to_lowercase(),
        value: caps["value"].to_string(),
    })
}

fn extract_target(caps: &Captures<'_>) -> Result<UpdateTarget, RioError> {
    if let (Some(source), Some(bank), Some(preset)) = (
        caps.name("preset_source"),
        caps.name("preset_bank"),
        caps.name("preset"),
    ) {
        return PresetId::parse(source.as_str(), bank.as_str(), preset.as_str())
            .map(UpdateTarget::Preset);
    }
    if let Some(source) = caps.name("source") {
        return SourceId::parse(source.as_str()).map(UpdateTarget::Source);
    }
    match (caps.name("controller"), caps.name("zone")) {
        (Some(controller), Some(zone)) => {
            ZoneId::parse(controller.as_str(), zone.as_str()).map(UpdateTarget::Zone)
        }
        _ => Err(RioError::Codec {
            message: "state update without a target".to_string(),
        }),
    }
}

//! Command rendering

use std::fmt;

use crate::types::{PresetId, SourceId, ZoneId};

/// Addressable object in a RIO command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A whole controller, e.g. `C[1]`
    Controller(u32),
    /// A zone, e.g. `C[1].Z[2]`
    Zone(ZoneId),
    /// A source, e.g. `S[3]`
    Source(SourceId),
    /// A tuner preset, e.g. `S[1].B[2].P[3]`
    Preset(PresetId),
}

impl Target {
    /// Target syntax for RIO commands
    #[must_use]
    pub fn device_str(&self) -> String {
        match self {
            Self::Controller(controller) => format!("C[{controller}]"),
            Self::Zone(zone) => zone.device_str(),
            Self::Source(source) => source.device_str(),
            Self::Preset(preset) => preset.device_str(),
        }
    }
}

impl From<ZoneId> for Target {
    fn from(zone: ZoneId) -> Self {
        Self::Zone(zone)
    }
}

impl From<SourceId> for Target {
    fn from(source: SourceId) -> Self {
        Self::Source(source)
    }
}

impl From<PresetId> for Target {
    fn from(preset: PresetId) -> Self {
        Self::Preset(preset)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device_str())
    }
}

/// A RIO command, rendered to wire text with `to_string()`
///
/// The trailing carriage return is added by the codec, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GET <target>.<variable>`
    Get {
        /// Object to query
        target: Target,
        /// Variable name
        variable: String,
    },
    /// `SET <target>.<variable>="<value>"`
    Set {
        /// Object to modify
        target: Target,
        /// Variable name
        variable: String,
        /// New value
        value: String,
    },
    /// `WATCH <target> ON|OFF`
    Watch {
        /// Object to (un)subscribe
        target: Target,
        /// Subscribe when true
        enabled: bool,
    },
    /// `EVENT <target>!<event> <args...>`
    Event {
        /// Object receiving the event
        target: Target,
        /// Event name, e.g. `KeyPress`
        event: String,
        /// Event arguments
        args: Vec<String>,
    },
}

impl Command {
    /// Build a `GET` command
    #[must_use]
    pub fn get(target: impl Into<Target>, variable: impl Into<String>) -> Self {
        Self::Get {
            target: target.into(),
            variable: variable.into(),
        }
    }

    /// Build a `SET` command
    #[must_use]
    pub fn set(
        target: impl Into<Target>,
        variable: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Set {
            target: target.into(),
            variable: variable.into(),
            value: value.into(),
        }
    }

    /// Build a `WATCH` command
    #[must_use]
    pub fn watch(target: impl Into<Target>, enabled: bool) -> Self {
        Self::Watch {
            target: target.into(),
            enabled,
        }
    }

    /// Build an `EVENT` command
    #[must_use]
    pub fn event<I, A>(target: impl Into<Target>, event: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Self::Event {
            target: target.into(),
            event: event.into(),
            args: args.into_iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { target, variable } => write!(f, "GET {target}.{variable}"),
            Self::Set {
                target,
                variable,
                value,
            } => write!(f, "SET {target}.{variable}=\"{value}\""),
            Self::Watch { target, enabled } => {
                write!(f, "WATCH {target} {}", if *enabled { "ON" } else { "OFF" })
            }
            Self::Event {
                target,
                event,
                args,
            } => {
                write!(f, "EVENT {target}!{event}")?;
                if !args.is_empty() {
                    write!(f, " {}", args.join(" "))?;
                }
                Ok(())
            }
        }
    }
}

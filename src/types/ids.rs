//! Identifiers addressing zones, sources and presets
//!
//! All three are small immutable values, compared and hashed field by field,
//! and render to the exact target syntax used in RIO commands.

use std::fmt;
use std::str::FromStr;

use crate::error::RioError;

/// Number of banks on a tuner source
pub const BANKS_PER_SOURCE: u32 = 6;
/// Number of presets in a tuner bank
pub const PRESETS_PER_BANK: u32 = 6;

/// Uniquely identifies a zone
///
/// Controllers can be linked together to expand the total zone count, so a
/// zone is addressed by its controller index (1-N) within the system and its
/// zone index (1-N) within that controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId {
    controller: u32,
    zone: u32,
}

impl ZoneId {
    /// Create a zone identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if either index is zero.
    pub fn new(controller: u32, zone: u32) -> Result<Self, RioError> {
        Ok(Self {
            controller: check_index("controller", controller, None)?,
            zone: check_index("zone", zone, None)?,
        })
    }

    /// Create a zone identifier from integer-like text
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if either field is not a positive integer.
    pub fn parse(controller: &str, zone: &str) -> Result<Self, RioError> {
        Self::new(
            parse_index("controller", controller)?,
            parse_index("zone", zone)?,
        )
    }

    /// Controller index
    #[must_use]
    pub fn controller(&self) -> u32 {
        self.controller
    }

    /// Zone index within the controller
    #[must_use]
    pub fn zone(&self) -> u32 {
        self.zone
    }

    /// Target syntax for RIO commands, e.g. `C[1].Z[2]`
    #[must_use]
    pub fn device_str(&self) -> String {
        format!("C[{}].Z[{}]", self.controller, self.zone)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.zone)
    }
}

impl FromStr for ZoneId {
    type Err = RioError;

    /// Parse the wire form `C[<controller>].Z[<zone>]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || invalid_target("zone", s);
        let (controller, rest) = bracketed(s, "C[").ok_or_else(invalid)?;
        let (zone, rest) = bracketed(rest, ".Z[").ok_or_else(invalid)?;
        if !rest.is_empty() {
            return Err(invalid());
        }
        Self::parse(controller, zone)
    }
}

/// Uniquely identifies a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u32);

impl SourceId {
    /// Create a source identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if the index is zero.
    pub fn new(source: u32) -> Result<Self, RioError> {
        Ok(Self(check_index("source", source, None)?))
    }

    /// Create a source identifier from integer-like text
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if the field is not a positive integer.
    pub fn parse(source: &str) -> Result<Self, RioError> {
        Self::new(parse_index("source", source)?)
    }

    /// Source index
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Target syntax for RIO commands, e.g. `S[3]`
    #[must_use]
    pub fn device_str(&self) -> String {
        format!("S[{}]", self.0)
    }
}

impl TryFrom<u32> for SourceId {
    type Error = RioError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = RioError;

    /// Parse the wire form `S[<source>]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match bracketed(s, "S[") {
            Some((source, "")) => Self::parse(source),
            _ => Err(invalid_target("source", s)),
        }
    }
}

/// Uniquely identifies a tuner preset
///
/// Presets live in one of six banks on a source, six presets per bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresetId {
    source: u32,
    bank: u32,
    preset: u32,
}

impl PresetId {
    /// Create a preset identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if the source is zero or the bank/preset
    /// is outside `1..=6`.
    pub fn new(source: u32, bank: u32, preset: u32) -> Result<Self, RioError> {
        Ok(Self {
            source: check_index("source", source, None)?,
            bank: check_index("bank", bank, Some(BANKS_PER_SOURCE))?,
            preset: check_index("preset", preset, Some(PRESETS_PER_BANK))?,
        })
    }

    /// Create a preset identifier from integer-like text
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if any field is not a valid index.
    pub fn parse(source: &str, bank: &str, preset: &str) -> Result<Self, RioError> {
        Self::new(
            parse_index("source", source)?,
            parse_index("bank", bank)?,
            parse_index("preset", preset)?,
        )
    }

    /// Source index
    #[must_use]
    pub fn source(&self) -> u32 {
        self.source
    }

    /// Bank index (1-6)
    #[must_use]
    pub fn bank(&self) -> u32 {
        self.bank
    }

    /// Preset index within the bank (1-6)
    #[must_use]
    pub fn preset(&self) -> u32 {
        self.preset
    }

    /// Flat preset number across all banks (1-36), as used by `RestorePreset`
    #[must_use]
    pub fn index(&self) -> u32 {
        Self::flat_index(self.bank, self.preset)
    }

    /// Flat preset number for a bank/preset pair: `(bank - 1) * 6 + preset`
    #[must_use]
    pub fn flat_index(bank: u32, preset: u32) -> u32 {
        bank.saturating_sub(1) * PRESETS_PER_BANK + preset
    }

    /// Target syntax for RIO commands, e.g. `S[1].B[2].P[3]`
    #[must_use]
    pub fn device_str(&self) -> String {
        format!("S[{}].B[{}].P[{}]", self.source, self.bank, self.preset)
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.bank, self.preset)
    }
}

impl FromStr for PresetId {
    type Err = RioError;

    /// Parse the wire form `S[<source>].B[<bank>].P[<preset>]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || invalid_target("preset", s);
        let (source, rest) = bracketed(s, "S[").ok_or_else(invalid)?;
        let (bank, rest) = bracketed(rest, ".B[").ok_or_else(invalid)?;
        let (preset, rest) = bracketed(rest, ".P[").ok_or_else(invalid)?;
        if !rest.is_empty() {
            return Err(invalid());
        }
        Self::parse(source, bank, preset)
    }
}

/// Split `<prefix><inner>]<rest>` into `(inner, rest)`
fn bracketed<'a>(s: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    s.strip_prefix(prefix)?.split_once(']')
}

fn parse_index(name: &'static str, value: &str) -> Result<u32, RioError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|e| RioError::InvalidIdentifier {
            name,
            value: value.to_string(),
            message: e.to_string(),
        })
}

fn check_index(name: &'static str, value: u32, max: Option<u32>) -> Result<u32, RioError> {
    let upper = max.unwrap_or(u32::MAX);
    if (1..=upper).contains(&value) {
        Ok(value)
    } else {
        Err(RioError::InvalidIdentifier {
            name,
            value: value.to_string(),
            message: format!("must be between 1 and {upper}"),
        })
    }
}

fn invalid_target(name: &'static str, value: &str) -> RioError {
    RioError::InvalidIdentifier {
        name,
        value: value.to_string(),
        message: "not a valid target".to_string(),
    }
}

//! Shared identifier wrappers for Roadmap Flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a domain identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// Stable business key of an initiative: `INIT-NNNNNN`.
///
/// Assigned once on first persistence and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitiativeKey(String);

const INITIATIVE_KEY_PREFIX: &str = "INIT-";
const INITIATIVE_KEY_DIGITS: usize = 6;

impl InitiativeKey {
    /// Build a key from its sequence number: `7 -> INIT-000007`.
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!(
            "{}{:0width$}",
            INITIATIVE_KEY_PREFIX,
            seq,
            width = INITIATIVE_KEY_DIGITS
        ))
    }

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix(INITIATIVE_KEY_PREFIX)
            .ok_or_else(|| IdParseError::new(format!("Invalid initiative key: {trimmed}")))?;
        if digits.len() != INITIATIVE_KEY_DIGITS || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(IdParseError::new(format!(
                "Invalid initiative key: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The numeric sequence component of the key.
    pub fn sequence(&self) -> u64 {
        self.0[INITIATIVE_KEY_PREFIX.len()..]
            .parse()
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InitiativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InitiativeKey {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Durable ledger identifier for one action execution:
/// `run_YYYYMMDD_HHMMSS_<6 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRunId(String);

impl ActionRunId {
    /// Mint a new run id stamped with the given instant.
    pub fn mint(now: DateTime<Utc>) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        Self(format!(
            "run_{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            &entropy[..6]
        ))
    }

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let trimmed = value.trim();
        if !trimmed.starts_with("run_") || trimmed.len() < 10 {
            return Err(IdParseError::new(format!("Invalid run id: {trimmed}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActionRunId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tracker identifier of a work item, e.g. `PROJ-12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TicketKey(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketKeyError {
    Empty,
}

impl fmt::Display for TicketKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "ticket key must not be empty"),
        }
    }
}

impl std::error::Error for TicketKeyError {}

impl TicketKey {
    pub fn new(value: impl Into<String>) -> Result<Self, TicketKeyError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(TicketKeyError::Empty);
        }
        if trimmed.len() == value.len() {
            return Ok(Self(value));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketKey {
    type Err = TicketKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TicketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TicketKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: TicketKey,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
}

impl Ticket {
    pub fn new(key: TicketKey, summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key,
            summary: summary.into(),
            description: description.into(),
        }
    }
}

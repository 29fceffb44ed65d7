//! Session-related types shared by the billing ledger and its callers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::BillingError;

/// Kind of billable navigation session
///
/// The partition key for all billing bookkeeping: at most one billed session
/// exists per type at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    /// Turn-by-turn guidance along a route
    ActiveGuidance,
    /// Passive navigation without a route
    FreeDrive,
}

impl SessionType {
    /// All session types, highest token priority first
    pub const PRIORITY: [SessionType; 2] = [SessionType::ActiveGuidance, SessionType::FreeDrive];

    /// Get the wire name of this session type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActiveGuidance => "activeGuidance",
            Self::FreeDrive => "freeDrive",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activeGuidance" => Ok(Self::ActiveGuidance),
            "freeDrive" => Ok(Self::FreeDrive),
            other => Err(BillingError::invalid_value("session_type", other)),
        }
    }
}

/// Lifecycle state of a handle or of a billed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No session (unknown handles are always stopped)
    #[default]
    Stopped,
    /// Session is billing
    Running,
    /// Session exists but is not billing
    Paused,
}

impl SessionState {
    /// Get the wire name of this state
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque caller-generated identifier of one logical trip
///
/// Many handles may reference the same billed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    /// Generate a fresh random handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionHandle {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

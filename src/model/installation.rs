//! Per-guild installations and their last-run status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code persisted on an installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusCode {
    /// Last run completed (or the extension has never run).
    #[default]
    Ok,
    /// Last run failed.
    Error,
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Error => 2,
        }
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(StatusCode::Ok),
            2 => Ok(StatusCode::Error),
            other => Err(format!("invalid installation status code: {other}")),
        }
    }
}

/// The installation's mutable status field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStatus {
    pub code: StatusCode,
    pub description: Option<String>,
}

impl InstallationStatus {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            description: None,
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            description: Some(description.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

/// Identifies the one record concurrent runs may share.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstallationKey {
    pub guild_id: String,
    pub extension_id: String,
}

impl InstallationKey {
    pub fn new(guild_id: impl Into<String>, extension_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            extension_id: extension_id.into(),
        }
    }
}

impl fmt::Display for InstallationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.extension_id)
    }
}

/// An extension installed into one guild, pinned to a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub guild_id: String,
    pub extension_id: String,
    pub version_id: String,
    /// Minimum admin level (0-3) a member needs to invoke the extension.
    #[serde(default)]
    pub admin_level: u8,
    #[serde(default)]
    pub disabled_channel_ids: BTreeSet<String>,
    /// Extension settings chosen by this guild's administrators.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: InstallationStatus,
}

impl Installation {
    pub fn key(&self) -> InstallationKey {
        InstallationKey::new(&self.guild_id, &self.extension_id)
    }

    pub fn is_channel_disabled(&self, channel_id: &str) -> bool {
        self.disabled_channel_ids.contains(channel_id)
    }
}

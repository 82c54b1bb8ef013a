//! Extension documents and their versions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::scope::{Scope, ScopeSet};

/// What kind of event invokes an extension version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationType {
    Command,
    Slash,
    Keyword,
    Timer,
    Event,
}

impl InvocationType {
    /// Every invocation type.
    pub const ALL: [InvocationType; 5] = [
        InvocationType::Command,
        InvocationType::Slash,
        InvocationType::Keyword,
        InvocationType::Timer,
        InvocationType::Event,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvocationType::Command => "command",
            InvocationType::Slash => "slash",
            InvocationType::Keyword => "keyword",
            InvocationType::Timer => "timer",
            InvocationType::Event => "event",
        }
    }
}

impl fmt::Display for InvocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger metadata, tagged by the version's `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Prefixed chat command, e.g. `!roll`.
    Command { key: String },
    /// Platform slash command.
    Slash { key: String, description: String },
    /// Runs when a message contains one of the keywords.
    Keyword {
        keywords: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// Scheduled tick.
    Timer { interval_ms: u64 },
    /// Gateway event such as `guildMemberAdd`.
    Event { event: String },
}

impl Trigger {
    pub fn invocation_type(&self) -> InvocationType {
        match self {
            Trigger::Command { .. } => InvocationType::Command,
            Trigger::Slash { .. } => InvocationType::Slash,
            Trigger::Keyword { .. } => InvocationType::Keyword,
            Trigger::Timer { .. } => InvocationType::Timer,
            Trigger::Event { .. } => InvocationType::Event,
        }
    }

    /// Whether chat message `content` fires a command or keyword trigger.
    ///
    /// `prefix` is the guild's command prefix. Other trigger kinds never match
    /// a chat message.
    pub fn matches_message(&self, prefix: &str, content: &str) -> bool {
        match self {
            Trigger::Command { key } => content
                .strip_prefix(prefix)
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|word| word.eq_ignore_ascii_case(key)),
            Trigger::Keyword {
                keywords,
                case_sensitive,
            } => {
                if *case_sensitive {
                    keywords.iter().any(|k| !k.is_empty() && content.contains(k.as_str()))
                } else {
                    let haystack = content.to_lowercase();
                    keywords
                        .iter()
                        .any(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
                }
            }
            _ => false,
        }
    }
}

/// Network tier a version was reviewed for.
///
/// Network modules are never serviced inside the sandbox; the tier only
/// tells host-side intrinsics what the reviewer approved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCapability {
    #[default]
    None,
    Allowlisted,
    Unrestricted,
}

impl NetworkCapability {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkCapability::None => "none",
            NetworkCapability::Allowlisted => "allowlisted",
            NetworkCapability::Unrestricted => "unrestricted",
        }
    }
}

/// One reviewed revision of an extension. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionVersion {
    pub id: String,
    #[serde(flatten)]
    pub trigger: Trigger,
    #[serde(default)]
    pub scopes: ScopeSet,
    pub timeout_ms: u64,
    /// Content-addressed pointer (hex SHA-256) to the guest source.
    pub code_id: String,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub network: NetworkCapability,
}

impl ExtensionVersion {
    pub fn invocation_type(&self) -> InvocationType {
        self.trigger.invocation_type()
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

/// A published extension and its version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub versions: Vec<ExtensionVersion>,
}

impl Extension {
    /// Look up a version by id.
    pub fn version(&self, version_id: &str) -> Option<&ExtensionVersion> {
        self.versions.iter().find(|v| v.id == version_id)
    }

    /// The most recent accepted version, if any.
    pub fn latest_accepted(&self) -> Option<&ExtensionVersion> {
        self.versions.iter().rev().find(|v| v.accepted)
    }
}

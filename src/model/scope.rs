//! Capability scopes granted to an extension version.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named permission token gating one host module or mutation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    MessagesRead,
    MessagesWrite,
    MessagesManage,
    ChannelsRead,
    ChannelsManage,
    GuildRead,
    GuildManage,
    MembersRead,
    MembersManage,
    RolesRead,
    RolesManage,
    Config,
    EconomyRead,
    EconomyManage,
    Ban,
    Kick,
}

/// The set of scopes an extension version declares.
pub type ScopeSet = BTreeSet<Scope>;

impl Scope {
    /// Every scope, in wire-name order of declaration.
    pub const ALL: [Scope; 16] = [
        Scope::MessagesRead,
        Scope::MessagesWrite,
        Scope::MessagesManage,
        Scope::ChannelsRead,
        Scope::ChannelsManage,
        Scope::GuildRead,
        Scope::GuildManage,
        Scope::MembersRead,
        Scope::MembersManage,
        Scope::RolesRead,
        Scope::RolesManage,
        Scope::Config,
        Scope::EconomyRead,
        Scope::EconomyManage,
        Scope::Ban,
        Scope::Kick,
    ];

    /// The token as it appears in version documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::MessagesRead => "messages_read",
            Scope::MessagesWrite => "messages_write",
            Scope::MessagesManage => "messages_manage",
            Scope::ChannelsRead => "channels_read",
            Scope::ChannelsManage => "channels_manage",
            Scope::GuildRead => "guild_read",
            Scope::GuildManage => "guild_manage",
            Scope::MembersRead => "members_read",
            Scope::MembersManage => "members_manage",
            Scope::RolesRead => "roles_read",
            Scope::RolesManage => "roles_manage",
            Scope::Config => "config",
            Scope::EconomyRead => "economy_read",
            Scope::EconomyManage => "economy_manage",
            Scope::Ban => "ban",
            Scope::Kick => "kick",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a scope token is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope: {0}")]
pub struct UnknownScope(pub String);

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| UnknownScope(s.to_string()))
    }
}

/// Parse a list of scope tokens, failing on the first unknown one.
pub fn parse_scopes<I, S>(tokens: I) -> Result<ScopeSet, UnknownScope>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|token| token.as_ref().parse::<Scope>())
        .collect()
}

//! Live host-side state handed to the engine by the bot process.
//!
//! These types may carry data that must never reach guest code (tokens,
//! secrets, nonces, other guilds). The [`crate::snapshot`] module is the
//! only way their contents cross into an isolate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest admin level; reserved for the guild owner.
pub const OWNER_ADMIN_LEVEL: u8 = 3;

/// A chat channel in a guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// A role in a guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub permissions: u64,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub managed: bool,
}

/// A guild member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub role_ids: Vec<String>,
    pub joined_at: DateTime<Utc>,
    /// Account email known to the host; never exposed to guests.
    #[serde(default)]
    pub email: Option<String>,
}

impl MemberState {
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

/// Live view of a guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub channels: Vec<ChannelState>,
    #[serde(default)]
    pub roles: Vec<RoleState>,
    #[serde(default)]
    pub members: Vec<MemberState>,
}

impl GuildState {
    pub fn channel(&self, channel_id: &str) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    pub fn member(&self, user_id: &str) -> Option<&MemberState> {
        self.members.iter().find(|m| m.user_id == user_id)
    }
}

/// A chat message that triggered a command or keyword extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageState {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mention_ids: Vec<String>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    /// Gateway nonce; internal to the host.
    #[serde(default)]
    pub nonce: Option<String>,
}

/// A slash command interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionState {
    pub id: String,
    pub command: String,
    pub channel_id: String,
    pub guild_id: String,
    pub user_id: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    /// Interaction response token; internal to the host.
    pub token: String,
}

/// A scheduled timer tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTick {
    pub scheduled_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

/// A gateway event forwarded to event extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// The triggering payload of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerPayload {
    Message(MessageState),
    Interaction(InteractionState),
    Timer(TimerTick),
    Event(EventPayload),
}

impl TriggerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerPayload::Message(_) => "message",
            TriggerPayload::Interaction(_) => "interaction",
            TriggerPayload::Timer(_) => "timer",
            TriggerPayload::Event(_) => "event",
        }
    }

    /// Channel the payload originated in, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            TriggerPayload::Message(m) => Some(&m.channel_id),
            TriggerPayload::Interaction(i) => Some(&i.channel_id),
            TriggerPayload::Timer(_) => None,
            TriggerPayload::Event(e) => e.channel_id.as_deref(),
        }
    }

    /// Guild the payload originated in, if it carries one.
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            TriggerPayload::Message(m) => Some(&m.guild_id),
            TriggerPayload::Interaction(i) => Some(&i.guild_id),
            TriggerPayload::Timer(_) | TriggerPayload::Event(_) => None,
        }
    }

    /// User who caused the invocation, if a person did.
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            TriggerPayload::Message(m) => Some(&m.author_id),
            TriggerPayload::Interaction(i) => Some(&i.user_id),
            TriggerPayload::Timer(_) | TriggerPayload::Event(_) => None,
        }
    }
}

/// The bot's own identity and runtime info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub version: String,
    #[serde(default)]
    pub guild_count: u64,
    #[serde(default)]
    pub uptime_secs: u64,
    /// Gateway token; never exposed to guests.
    pub token: String,
}

/// Role-to-admin-level assignment in a server document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRole {
    pub role_id: String,
    pub level: u8,
}

/// Per-guild economy balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomyLedger {
    #[serde(default = "default_currency")]
    pub currency_name: String,
    /// Balance keyed by user id.
    #[serde(default)]
    pub balances: BTreeMap<String, i64>,
}

fn default_currency() -> String {
    "points".to_string()
}

/// Persisted per-guild bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDocument {
    pub guild_id: String,
    pub command_prefix: String,
    #[serde(default)]
    pub admins: Vec<AdminRole>,
    #[serde(default)]
    pub economy: EconomyLedger,
    /// Outgoing webhook secret; never exposed to guests.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl ServerDocument {
    /// Admin level of `user_id`: owner is 3, otherwise the highest level of
    /// any admin role the member holds, otherwise 0.
    pub fn member_admin_level(&self, guild: &GuildState, user_id: &str) -> u8 {
        if guild.owner_id == user_id {
            return OWNER_ADMIN_LEVEL;
        }
        let Some(member) = guild.member(user_id) else {
            return 0;
        };
        self.admins
            .iter()
            .filter(|admin| member.role_ids.contains(&admin.role_id))
            .map(|admin| admin.level.min(OWNER_ADMIN_LEVEL))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild() -> GuildState {
        GuildState {
            id: "g1".to_string(),
            name: "Guild".to_string(),
            icon: None,
            owner_id: "owner".to_string(),
            region: None,
            created_at: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            channels: vec![],
            roles: vec![],
            members: vec![MemberState {
                user_id: "u1".to_string(),
                username: "alice".to_string(),
                nickname: Some("Al".to_string()),
                avatar: None,
                bot: false,
                role_ids: vec!["mods".to_string(), "fans".to_string()],
                joined_at: DateTime::from_timestamp(1_600_000_100, 0).unwrap(),
                email: None,
            }],
        }
    }

    fn server(admins: Vec<AdminRole>) -> ServerDocument {
        ServerDocument {
            guild_id: "g1".to_string(),
            command_prefix: "!".to_string(),
            admins,
            economy: EconomyLedger::default(),
            webhook_secret: None,
        }
    }

    #[test]
    fn test_admin_level_owner() {
        assert_eq!(server(vec![]).member_admin_level(&guild(), "owner"), 3);
    }

    #[test]
    fn test_admin_level_highest_role() {
        let doc = server(vec![
            AdminRole {
                role_id: "fans".to_string(),
                level: 1,
            },
            AdminRole {
                role_id: "mods".to_string(),
                level: 2,
            },
        ]);
        assert_eq!(doc.member_admin_level(&guild(), "u1"), 2);
        assert_eq!(doc.member_admin_level(&guild(), "stranger"), 0);
    }

    #[test]
    fn test_payload_accessors() {
        let payload = TriggerPayload::Event(EventPayload {
            name: "guildMemberAdd".to_string(),
            channel_id: None,
            data: BTreeMap::new(),
        });
        assert_eq!(payload.kind(), "event");
        assert!(payload.channel_id().is_none());
        assert!(payload.actor_id().is_none());
        assert_eq!(guild().member("u1").unwrap().display_name(), "Al");
    }
}

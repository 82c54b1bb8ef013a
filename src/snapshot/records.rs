//! Snapshot record types: the complete field list of every value a guest can see.
//!
//! Adding or removing a field is a guest-facing API change and must bump
//! [`SNAPSHOT_VERSION`](super::SNAPSHOT_VERSION).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user: UserSnapshot,
    pub nickname: Option<String>,
    pub role_ids: Vec<String>,
    /// RFC 3339 timestamp.
    pub joined_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    /// Absent when the author already left the guild.
    pub author: Option<MemberSnapshot>,
    pub author_id: String,
    pub created_at: String,
    pub mention_ids: Vec<String>,
    pub attachment_urls: Vec<String>,
    /// Content after the prefix and command key, split on whitespace.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: String,
    pub name: String,
    pub topic: Option<String>,
    pub kind: String,
    pub position: i32,
    pub nsfw: bool,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: String,
    pub region: Option<String>,
    pub created_at: String,
    pub member_count: u64,
    pub channel_count: u64,
    pub role_count: u64,
    pub command_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRosterSnapshot {
    /// Sorted by user id.
    pub members: Vec<MemberSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub id: String,
    pub name: String,
    pub color: u32,
    pub position: i32,
    /// Permission bitfield as a decimal string; it does not fit a guest double.
    pub permissions: String,
    pub hoist: bool,
    pub mentionable: bool,
    pub managed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTableSnapshot {
    /// Highest position first, ties by id.
    pub roles: Vec<RoleSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub user_id: String,
    pub balance: i64,
    /// 1-based rank by balance.
    pub rank: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomySnapshot {
    pub currency_name: String,
    /// Ordered by rank.
    pub accounts: Vec<AccountSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub command_prefix: String,
    pub admin_level: u8,
    pub values: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub version: String,
    pub guild_count: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub name: String,
    pub channel_id: Option<String>,
    pub data: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSnapshot {
    pub id: String,
    pub command: String,
    pub channel_id: String,
    pub user: Option<MemberSnapshot>,
    pub user_id: String,
    pub options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: Option<String>,
    pub keywords: Vec<String>,
    pub case_sensitive: bool,
    pub interval_ms: Option<u64>,
    pub event: Option<String>,
    /// Set for timer runs: RFC 3339 time the tick was scheduled for.
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSnapshot {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub version_id: String,
    pub trigger: TriggerSnapshot,
    /// Sorted scope tokens.
    pub scopes: Vec<String>,
    pub timeout_ms: u64,
    pub network: String,
}

/// Marker for modules whose real work happens host-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableSnapshot {
    pub module: String,
    pub available: bool,
    pub reason: String,
}

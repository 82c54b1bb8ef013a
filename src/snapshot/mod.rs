//! Serialization boundary between live host state and guest code.
//!
//! Every value a guest can observe is produced here as an owned, plain-data
//! record and serialized to JSON before it is copied into guest memory.
//! Nothing in a [`Snapshot`] borrows from or points back into host state.

pub mod records;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::context::ExecutionContext;
use crate::error::ResolveError;
use crate::host::{GuildState, MemberState, TriggerPayload};
use crate::model::Trigger;
use crate::sandbox::capability::ModuleKind;

pub use records::*;

/// Version of the snapshot wire format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A point-in-time, primitive-only view of one host module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Message(MessageSnapshot),
    Channel(ChannelSnapshot),
    Guild(GuildSnapshot),
    Members(MemberRosterSnapshot),
    Roles(RoleTableSnapshot),
    Economy(EconomySnapshot),
    Config(ConfigSnapshot),
    Bot(BotSnapshot),
    Event(EventSnapshot),
    Extension(ExtensionSnapshot),
    Interaction(InteractionSnapshot),
    Unavailable(UnavailableSnapshot),
}

#[derive(Serialize)]
struct Envelope<'a> {
    v: u32,
    module: &'static str,
    data: &'a Snapshot,
}

impl Snapshot {
    /// Serialize into the versioned envelope handed to the guest.
    pub fn to_json_bytes(&self, module: ModuleKind) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&Envelope {
            v: SNAPSHOT_VERSION,
            module: module.name(),
            data: self,
        })
    }

    /// Marker returned for modules that would need I/O from inside the guest.
    pub fn unavailable(module: ModuleKind) -> Self {
        Snapshot::Unavailable(UnavailableSnapshot {
            module: module.name().to_string(),
            available: false,
            reason: "unavailable in this sandbox".to_string(),
        })
    }
}

/// Produce the snapshot for `kind` from the run's context.
///
/// Callers are expected to have passed the capability check already; a
/// module whose data is missing from the payload is reported as unknown.
pub fn snapshot_for(kind: ModuleKind, ctx: &ExecutionContext) -> Result<Snapshot, ResolveError> {
    let missing = || ResolveError::UnknownCapability {
        module: kind.name().to_string(),
    };
    let snapshot = match kind {
        ModuleKind::Message => Snapshot::Message(message_snapshot(ctx).ok_or_else(missing)?),
        ModuleKind::Channel => Snapshot::Channel(channel_snapshot(ctx).ok_or_else(missing)?),
        ModuleKind::Guild => Snapshot::Guild(guild_snapshot(ctx)),
        ModuleKind::Members => Snapshot::Members(member_roster(ctx.guild())),
        ModuleKind::Roles => Snapshot::Roles(role_table(ctx.guild())),
        ModuleKind::Economy => Snapshot::Economy(economy_snapshot(ctx)),
        ModuleKind::Config => Snapshot::Config(ConfigSnapshot {
            command_prefix: ctx.server().command_prefix.clone(),
            admin_level: ctx.installation().admin_level,
            values: ctx.installation().config.clone(),
        }),
        ModuleKind::Bot => {
            let bot = ctx.bot();
            Snapshot::Bot(BotSnapshot {
                id: bot.user_id.clone(),
                username: bot.username.clone(),
                avatar: bot.avatar.clone(),
                version: bot.version.clone(),
                guild_count: bot.guild_count,
                uptime_secs: bot.uptime_secs,
            })
        }
        ModuleKind::Event => match ctx.payload() {
            TriggerPayload::Event(event) => Snapshot::Event(EventSnapshot {
                name: event.name.clone(),
                channel_id: event.channel_id.clone(),
                data: event.data.clone(),
            }),
            _ => return Err(missing()),
        },
        ModuleKind::Extension => Snapshot::Extension(extension_snapshot(ctx)),
        ModuleKind::Interaction => match ctx.payload() {
            TriggerPayload::Interaction(interaction) => {
                Snapshot::Interaction(InteractionSnapshot {
                    id: interaction.id.clone(),
                    command: interaction.command.clone(),
                    channel_id: interaction.channel_id.clone(),
                    user: ctx.guild().member(&interaction.user_id).map(member_snapshot),
                    user_id: interaction.user_id.clone(),
                    options: interaction.options.clone(),
                })
            }
            _ => return Err(missing()),
        },
        ModuleKind::Http | ModuleKind::Rss => Snapshot::unavailable(kind),
    };
    Ok(snapshot)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn member_snapshot(member: &MemberState) -> MemberSnapshot {
    MemberSnapshot {
        user: UserSnapshot {
            id: member.user_id.clone(),
            username: member.username.clone(),
            display_name: member.display_name().to_string(),
            avatar: member.avatar.clone(),
            bot: member.bot,
        },
        nickname: member.nickname.clone(),
        role_ids: member.role_ids.clone(),
        joined_at: timestamp(&member.joined_at),
    }
}

fn message_snapshot(ctx: &ExecutionContext) -> Option<MessageSnapshot> {
    let TriggerPayload::Message(message) = ctx.payload() else {
        return None;
    };
    let args = match &ctx.version().trigger {
        Trigger::Command { .. } => message
            .content
            .strip_prefix(ctx.server().command_prefix.as_str())
            .map(|rest| rest.split_whitespace().skip(1).map(str::to_string).collect())
            .unwrap_or_default(),
        _ => message.content.split_whitespace().map(str::to_string).collect(),
    };
    Some(MessageSnapshot {
        id: message.id.clone(),
        channel_id: message.channel_id.clone(),
        content: message.content.clone(),
        author: ctx.guild().member(&message.author_id).map(member_snapshot),
        author_id: message.author_id.clone(),
        created_at: timestamp(&message.created_at),
        mention_ids: message.mention_ids.clone(),
        attachment_urls: message.attachment_urls.clone(),
        args,
    })
}

fn channel_snapshot(ctx: &ExecutionContext) -> Option<ChannelSnapshot> {
    let channel_id = ctx.payload().channel_id()?;
    let channel = ctx.guild().channel(channel_id)?;
    Some(ChannelSnapshot {
        id: channel.id.clone(),
        name: channel.name.clone(),
        topic: channel.topic.clone(),
        kind: channel.kind.clone(),
        position: channel.position,
        nsfw: channel.nsfw,
        parent_id: channel.parent_id.clone(),
    })
}

fn guild_snapshot(ctx: &ExecutionContext) -> GuildSnapshot {
    let guild = ctx.guild();
    GuildSnapshot {
        id: guild.id.clone(),
        name: guild.name.clone(),
        icon: guild.icon.clone(),
        owner_id: guild.owner_id.clone(),
        region: guild.region.clone(),
        created_at: timestamp(&guild.created_at),
        member_count: guild.members.len() as u64,
        channel_count: guild.channels.len() as u64,
        role_count: guild.roles.len() as u64,
        command_prefix: ctx.server().command_prefix.clone(),
    }
}

fn member_roster(guild: &GuildState) -> MemberRosterSnapshot {
    let mut members: Vec<MemberSnapshot> = guild.members.iter().map(member_snapshot).collect();
    members.sort_by(|a, b| a.user.id.cmp(&b.user.id));
    MemberRosterSnapshot { members }
}

fn role_table(guild: &GuildState) -> RoleTableSnapshot {
    let mut roles: Vec<RoleSnapshot> = guild
        .roles
        .iter()
        .map(|role| RoleSnapshot {
            id: role.id.clone(),
            name: role.name.clone(),
            color: role.color,
            position: role.position,
            permissions: role.permissions.to_string(),
            hoist: role.hoist,
            mentionable: role.mentionable,
            managed: role.managed,
        })
        .collect();
    roles.sort_by(|a, b| b.position.cmp(&a.position).then_with(|| a.id.cmp(&b.id)));
    RoleTableSnapshot { roles }
}

fn economy_snapshot(ctx: &ExecutionContext) -> EconomySnapshot {
    let ledger = &ctx.server().economy;
    let mut balances: Vec<(&String, &i64)> = ledger.balances.iter().collect();
    balances.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    EconomySnapshot {
        currency_name: ledger.currency_name.clone(),
        accounts: balances
            .into_iter()
            .enumerate()
            .map(|(index, (user_id, balance))| AccountSnapshot {
                user_id: user_id.clone(),
                balance: *balance,
                rank: index as u64 + 1,
            })
            .collect(),
    }
}

fn extension_snapshot(ctx: &ExecutionContext) -> ExtensionSnapshot {
    let extension = ctx.extension();
    let version = ctx.version();
    let mut trigger = TriggerSnapshot {
        kind: version.invocation_type().as_str().to_string(),
        key: None,
        keywords: Vec::new(),
        case_sensitive: false,
        interval_ms: None,
        event: None,
        scheduled_at: None,
    };
    match &version.trigger {
        Trigger::Command { key } | Trigger::Slash { key, .. } => trigger.key = Some(key.clone()),
        Trigger::Keyword {
            keywords,
            case_sensitive,
        } => {
            trigger.keywords = keywords.clone();
            trigger.case_sensitive = *case_sensitive;
        }
        Trigger::Timer { interval_ms } => trigger.interval_ms = Some(*interval_ms),
        Trigger::Event { event } => trigger.event = Some(event.clone()),
    }
    if let TriggerPayload::Timer(tick) = ctx.payload() {
        trigger.scheduled_at = Some(timestamp(&tick.scheduled_at));
    }

    ExtensionSnapshot {
        id: extension.id.clone(),
        name: extension.name.clone(),
        owner_id: extension.owner_id.clone(),
        version_id: version.id.clone(),
        trigger,
        scopes: version.scopes.iter().map(|s| s.as_str().to_string()).collect(),
        timeout_ms: version.timeout_ms,
        network: version.network.as_str().to_string(),
    }
}

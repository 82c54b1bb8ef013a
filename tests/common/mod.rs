//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use extension_sandbox::host::{
    AdminRole, BotState, ChannelState, EconomyLedger, EventPayload, GuildState, MemberState,
    MessageState, RoleState, ServerDocument, TriggerPayload,
};
use extension_sandbox::model::{
    Extension, ExtensionVersion, Installation, InstallationStatus, NetworkCapability, Scope,
    ScopeSet, Trigger,
};
use extension_sandbox::sandbox::cache::code_id_for;
use extension_sandbox::{ExecutionContext, ExtensionRunner, SandboxConfig};

pub const BOT_TOKEN: &str = "bot-token-do-not-leak";
pub const WEBHOOK_SECRET: &str = "whsec-do-not-leak";

/// Guest that returns immediately.
pub const NOOP_GUEST: &str = r#"(module (memory (export "memory") 1) (func (export "run")))"#;

/// Guest that never returns.
pub const LOOP_GUEST: &str = r#"(module
    (memory (export "memory") 1)
    (func (export "run") (loop $spin (br $spin))))"#;

/// Guest that resolves `module`, reads the snapshot and logs it.
pub fn resolve_guest(module: &str) -> String {
    format!(
        r#"(module
    (import "sandbox" "resolve" (func $resolve (param i32 i32) (result i32)))
    (import "sandbox" "read" (func $read (param i32 i32) (result i32)))
    (import "sandbox" "log" (func $log (param i32 i32)))
    (memory (export "memory") 1)
    (data (i32.const 0) "{module}")
    (func (export "run")
        (local $len i32)
        (local.set $len (call $resolve (i32.const 0) (i32.const {len})))
        (drop (call $read (i32.const 1024) (local.get $len)))
        (call $log (i32.const 1024) (local.get $len))))"#,
        len = module.len()
    )
}

/// Guest that raises an error carrying `message`.
pub fn throw_guest(message: &str) -> String {
    format!(
        r#"(module
    (import "sandbox" "throw" (func $throw (param i32 i32)))
    (memory (export "memory") 1)
    (data (i32.const 0) "{message}")
    (func (export "run") (call $throw (i32.const 0) (i32.const {len}))))"#,
        len = message.len()
    )
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn runner() -> ExtensionRunner {
    ExtensionRunner::new(SandboxConfig::default()).unwrap()
}

pub fn scopes(scopes: &[Scope]) -> ScopeSet {
    scopes.iter().copied().collect()
}

pub fn command(key: &str) -> Trigger {
    Trigger::Command {
        key: key.to_string(),
    }
}

pub fn event_trigger(event: &str) -> Trigger {
    Trigger::Event {
        event: event.to_string(),
    }
}

pub fn extension(trigger: Trigger, granted: &[Scope], source: &str, timeout_ms: u64) -> Extension {
    Extension {
        id: "ext-1".to_string(),
        name: "Test Extension".to_string(),
        owner_id: "dev-1".to_string(),
        versions: vec![ExtensionVersion {
            id: "ver-1".to_string(),
            trigger,
            scopes: scopes(granted),
            timeout_ms,
            code_id: code_id_for(source.as_bytes()),
            accepted: true,
            network: NetworkCapability::None,
        }],
    }
}

pub fn installation(guild_id: &str) -> Installation {
    Installation {
        guild_id: guild_id.to_string(),
        extension_id: "ext-1".to_string(),
        version_id: "ver-1".to_string(),
        admin_level: 0,
        disabled_channel_ids: Default::default(),
        config: BTreeMap::new(),
        status: InstallationStatus::ok(),
    }
}

pub fn server(guild_id: &str) -> ServerDocument {
    let mut balances = BTreeMap::new();
    balances.insert("owner".to_string(), 500);
    balances.insert("u2".to_string(), 120);
    ServerDocument {
        guild_id: guild_id.to_string(),
        command_prefix: "!".to_string(),
        admins: vec![AdminRole {
            role_id: "mods".to_string(),
            level: 2,
        }],
        economy: EconomyLedger {
            currency_name: "coins".to_string(),
            balances,
        },
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
    }
}

fn member(user_id: &str, username: &str, role_ids: &[&str]) -> MemberState {
    MemberState {
        user_id: user_id.to_string(),
        username: username.to_string(),
        nickname: None,
        avatar: None,
        bot: false,
        role_ids: role_ids.iter().map(|r| r.to_string()).collect(),
        joined_at: at(1_650_000_000),
        email: Some(format!("{username}@mail.invalid")),
    }
}

pub fn guild(guild_id: &str) -> GuildState {
    GuildState {
        id: guild_id.to_string(),
        name: format!("Guild {guild_id}"),
        icon: None,
        owner_id: "owner".to_string(),
        region: None,
        created_at: at(1_600_000_000),
        channels: vec![ChannelState {
            id: "chan-1".to_string(),
            guild_id: guild_id.to_string(),
            name: "general".to_string(),
            topic: Some("chat".to_string()),
            kind: "text".to_string(),
            position: 0,
            nsfw: false,
            parent_id: None,
        }],
        roles: vec![RoleState {
            id: "mods".to_string(),
            name: "Moderators".to_string(),
            color: 0x3498db,
            position: 2,
            permissions: 8,
            hoist: true,
            mentionable: false,
            managed: false,
        }],
        members: vec![
            member("u2", "bob", &[]),
            member("owner", "olivia", &[]),
            member("u3", "mod", &["mods"]),
        ],
    }
}

pub fn bot() -> BotState {
    BotState {
        user_id: "bot-1".to_string(),
        username: "Helper".to_string(),
        avatar: None,
        version: "1.0.0".to_string(),
        guild_count: 2,
        uptime_secs: 3600,
        token: BOT_TOKEN.to_string(),
    }
}

pub fn message(guild_id: &str, author_id: &str, content: &str) -> TriggerPayload {
    TriggerPayload::Message(MessageState {
        id: "msg-1".to_string(),
        channel_id: "chan-1".to_string(),
        guild_id: guild_id.to_string(),
        author_id: author_id.to_string(),
        content: content.to_string(),
        created_at: at(1_700_000_000),
        mention_ids: vec![],
        attachment_urls: vec![],
        nonce: Some("nonce-do-not-leak".to_string()),
    })
}

pub fn event(name: &str) -> TriggerPayload {
    TriggerPayload::Event(EventPayload {
        name: name.to_string(),
        channel_id: None,
        data: BTreeMap::new(),
    })
}

/// Context in `guild_id` for an extension running `source`.
pub fn context_in(
    guild_id: &str,
    trigger: Trigger,
    granted: &[Scope],
    source: &str,
    timeout_ms: u64,
    payload: TriggerPayload,
) -> ExecutionContext {
    ExecutionContext::new(
        extension(trigger, granted, source, timeout_ms),
        installation(guild_id),
        server(guild_id),
        guild(guild_id),
        bot(),
        payload,
    )
    .unwrap()
}

/// Command context in guild `g1`, invoked by `u2` with `!test`.
pub fn command_context(granted: &[Scope], source: &str) -> Arc<ExecutionContext> {
    Arc::new(context_in(
        "g1",
        command("test"),
        granted,
        source,
        1_000,
        message("g1", "u2", "!test one two"),
    ))
}

pub fn timeout(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Wait for `check` to hold, polling for up to two seconds.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

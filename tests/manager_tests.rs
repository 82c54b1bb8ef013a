//! Invocation gating, source integrity and lazy module delivery.

mod common;

use std::sync::Arc;

use common::*;
use extension_sandbox::host::TriggerPayload;
use extension_sandbox::model::{InstallationKey, Scope};
use extension_sandbox::prelude::*;
use extension_sandbox::sandbox::capability::ModuleKind;

struct Harness {
    sources: Arc<InMemorySourceStore>,
    statuses: Arc<InMemoryStatusStore>,
    manager: ExtensionManager,
}

fn harness() -> Harness {
    let sources = Arc::new(InMemorySourceStore::new());
    let statuses = Arc::new(InMemoryStatusStore::new());
    let manager = ExtensionManager::new(runner(), sources.clone(), statuses.clone());
    Harness {
        sources,
        statuses,
        manager,
    }
}

fn ctx_with(
    source: &str,
    granted: &[Scope],
    payload: TriggerPayload,
    adjust: impl FnOnce(&mut Extension, &mut Installation),
) -> ExecutionContext {
    let mut extension = extension(command("test"), granted, source, 1_000);
    let mut installation = installation("g1");
    adjust(&mut extension, &mut installation);
    ExecutionContext::new(extension, installation, server("g1"), guild("g1"), bot(), payload)
        .unwrap()
}

#[tokio::test]
async fn test_lazy_members_module_resolves_through_bridge() {
    let h = harness();
    let source = resolve_guest("members");
    h.sources.insert(source.clone());

    let ctx = ctx_with(&source, &[Scope::MembersRead], message("g1", "u2", "!test"), |_, _| {});
    let invocation = h.manager.invoke(ctx).await.unwrap();

    let report = invocation.report().unwrap();
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.resolved, vec![ModuleKind::Members]);

    let snapshot: serde_json::Value = serde_json::from_str(&report.console.logs[0]).unwrap();
    let ids: Vec<&str> = snapshot["data"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["user"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["owner", "u2", "u3"]);
    assert!(h.statuses.get(&InstallationKey::new("g1", "ext-1")).unwrap().is_ok());
}

#[tokio::test]
async fn test_unaccepted_version_is_skipped() {
    let h = harness();
    let ctx = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!test"), |ext, _| {
        ext.versions[0].accepted = false;
    });

    let invocation = h.manager.invoke(ctx).await.unwrap();
    assert!(matches!(invocation, Invocation::Skipped(SkipReason::NotAccepted)));
    assert_eq!(h.statuses.writes(), 0);
}

#[tokio::test]
async fn test_disabled_channel_is_skipped() {
    let h = harness();
    let ctx = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!test"), |_, inst| {
        inst.disabled_channel_ids.insert("chan-1".to_string());
    });

    let invocation = h.manager.invoke(ctx).await.unwrap();
    assert!(matches!(invocation, Invocation::Skipped(SkipReason::ChannelDisabled)));
    assert_eq!(h.statuses.writes(), 0);
}

#[tokio::test]
async fn test_other_command_is_skipped() {
    let h = harness();
    let ctx = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!other"), |_, _| {});

    let invocation = h.manager.invoke(ctx).await.unwrap();
    assert!(matches!(invocation, Invocation::Skipped(SkipReason::TriggerMismatch)));
}

#[tokio::test]
async fn test_admin_level_gate() {
    let h = harness();
    h.sources.insert(NOOP_GUEST);

    let below = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!test"), |_, inst| {
        inst.admin_level = 2;
    });
    let invocation = h.manager.invoke(below).await.unwrap();
    assert!(matches!(
        invocation,
        Invocation::Skipped(SkipReason::InsufficientAdminLevel)
    ));

    // u3 holds the level 2 "mods" role
    let moderator = ctx_with(NOOP_GUEST, &[], message("g1", "u3", "!test"), |_, inst| {
        inst.admin_level = 2;
    });
    assert!(h.manager.invoke(moderator).await.unwrap().report().is_some());

    let owner = ctx_with(NOOP_GUEST, &[], message("g1", "owner", "!test"), |_, inst| {
        inst.admin_level = 3;
    });
    assert!(h.manager.invoke(owner).await.unwrap().report().is_some());
}

#[tokio::test]
async fn test_tampered_source_fails_integrity_check() {
    let h = harness();
    let ctx = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!test"), |_, _| {});
    let code_id = ctx.version().code_id.clone();
    h.sources.insert_raw(code_id, LOOP_GUEST);

    let err = h.manager.invoke(ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceIntegrity { .. }));
    assert_eq!(h.statuses.writes(), 0);
}

#[tokio::test]
async fn test_missing_source_writes_no_status() {
    let h = harness();
    let ctx = ctx_with(NOOP_GUEST, &[], message("g1", "u2", "!test"), |_, _| {});

    let err = h.manager.invoke(ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceFetch(_)));
    assert_eq!(h.statuses.writes(), 0);
}

#[tokio::test]
async fn test_invalid_module_reports_failure() {
    let h = harness();
    let source = "(module (func (export \"run\") (call 7)))";
    h.sources.insert(source);
    let ctx = ctx_with(source, &[], message("g1", "u2", "!test"), |_, _| {});

    let invocation = h.manager.invoke(ctx).await.unwrap();
    let report = invocation.report().unwrap();
    assert_eq!(report.outcome.error().unwrap().code(), "INVALID_MODULE");

    let status = h.statuses.get(&InstallationKey::new("g1", "ext-1")).unwrap();
    assert!(!status.is_ok());
    assert!(status.description.is_some());
}

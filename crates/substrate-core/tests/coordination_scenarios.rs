// Integration tests have relaxed clippy settings.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::too_many_lines,
    clippy::doc_markdown
)]
//! End-to-end coordination scenarios driven through the substrate facade
//! with a simulated clock.

use std::sync::Arc;

use chrono::Utc;
use substrate_core::{
    Action, Error, ManualClock, Result, RuleId, Settings, Store, Substrate,
};

async fn substrate() -> Result<(Substrate, ManualClock)> {
    let store = Store::open_in_memory().await?;
    let clock = ManualClock::new(Utc::now());
    let substrate = Substrate::new(store, Arc::new(clock.clone()), Settings::default());
    Ok((substrate, clock))
}

async fn ready(substrate: &Substrate, agent: &str) -> Result<()> {
    substrate.init_session(agent, "developer").await?;
    substrate.acknowledge(agent).await?;
    Ok(())
}

#[tokio::test]
async fn lock_holder_is_named_then_released_path_still_needs_lock() -> Result<()> {
    let (sub, _) = substrate().await?;
    ready(&sub, "A").await?;
    ready(&sub, "B").await?;

    sub.acquire_lock("src/x.ts", "A", Some("refactor"), None).await?;

    let blocked = sub.check("B", Action::FileEdit, Some("src/x.ts")).await?;
    assert!(!blocked.allowed);
    let failed = blocked
        .checks
        .iter()
        .find(|c| c.rule == RuleId::LockBeforeEdit && !c.passed)
        .expect("lock-before-edit should fail");
    assert!(failed.message.contains("locked by A"));

    sub.release_lock("src/x.ts", "A").await?;

    let still_blocked = sub.check("B", Action::FileEdit, Some("src/x.ts")).await?;
    assert!(!still_blocked.allowed);
    assert!(still_blocked
        .violations
        .iter()
        .any(|m| m.contains("must lock first")));

    sub.acquire_lock("src/x.ts", "B", None, None).await?;
    let allowed = sub.check("B", Action::FileEdit, Some("src/x.ts")).await?;
    assert!(allowed.allowed);
    assert!(allowed.warnings.is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_claim_is_reclaimed_and_reusable() -> Result<()> {
    let (sub, clock) = substrate().await?;
    sub.create_claim("task-7", "A", Some("migrate schema")).await?;

    let early = sub.create_claim("task-7", "B", None).await;
    assert!(matches!(early, Err(Error::Conflict { .. })));

    clock.advance_minutes(31);
    let verdict = sub.check("C", Action::ZoneEnter, Some("docs")).await?;
    assert_eq!(verdict.stale_cleaned.claims, vec!["task-7".to_string()]);

    let outcome = sub.create_claim("task-7", "B", None).await?;
    assert!(outcome.claimed);

    let cleanup = sub.violations(None, Some("SYSTEM")).await?;
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].action, "auto-cleanup");
    Ok(())
}

#[tokio::test]
async fn stale_lock_disappears_from_next_check() -> Result<()> {
    let (sub, clock) = substrate().await?;
    sub.acquire_lock("src/lib.rs", "A", None, None).await?;
    clock.advance_minutes(31);

    let verdict = sub.check("B", Action::Lock, Some("src/lib.rs")).await?;
    assert_eq!(verdict.stale_cleaned.locks, vec!["src/lib.rs".to_string()]);
    assert!(verdict.allowed);
    assert!(sub.list_locks(true).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn zone_owner_blocks_lock_holder() -> Result<()> {
    let (sub, _) = substrate().await?;
    ready(&sub, "A").await?;
    sub.set_zone("backend", "src/api", "B", Some("API layer")).await?;
    sub.acquire_lock("src/api/routes.rs", "A", None, None).await?;

    let verdict = sub.check("A", Action::FileEdit, Some("src/api/routes.rs")).await?;
    assert!(!verdict.allowed);
    let rules: Vec<RuleId> = verdict
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.rule)
        .collect();
    assert_eq!(rules, vec![RuleId::ZoneRespect]);
    Ok(())
}

#[tokio::test]
async fn quota_blocks_then_release_permits_exactly_one() -> Result<()> {
    let (sub, _) = substrate().await?;
    ready(&sub, "A").await?;
    for task in ["t1", "t2", "t3"] {
        sub.create_claim(task, "A", None).await?;
    }

    let verdict = sub.check("A", Action::Claim, Some("t4")).await?;
    assert!(!verdict.allowed);
    assert!(matches!(
        sub.create_claim("t4", "A", None).await,
        Err(Error::QuotaExceeded { .. })
    ));

    sub.release_claim("t1", "A").await?;
    assert!(sub.check("A", Action::Claim, Some("t4")).await?.allowed);
    sub.create_claim("t4", "A", None).await?;
    assert!(matches!(
        sub.create_claim("t5", "A", None).await,
        Err(Error::QuotaExceeded { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn blocked_checks_are_logged_and_counted() -> Result<()> {
    let (sub, _) = substrate().await?;
    ready(&sub, "B").await?;
    sub.acquire_lock("src/x.ts", "A", None, None).await?;

    sub.check("B", Action::FileEdit, Some("src/x.ts")).await?;
    sub.check("B", Action::ReleaseLock, Some("src/x.ts")).await?;

    let session = sub.get_session("B").await?;
    assert_eq!(session.violation_count, 2);

    let log = sub.violations(Some(10), Some("B")).await?;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].failures[0].rule, "lock-ownership");
    assert_eq!(log[1].failures[0].rule, "lock-before-edit");
    Ok(())
}

#[tokio::test]
async fn release_ownership_rules() -> Result<()> {
    let (sub, _) = substrate().await?;
    sub.acquire_lock("src/x.ts", "A", None, None).await?;
    sub.create_claim("task-1", "A", None).await?;

    assert!(matches!(
        sub.release_lock("src/x.ts", "B").await,
        Err(Error::NotOwner { .. })
    ));
    assert!(matches!(
        sub.release_claim("task-1", "B").await,
        Err(Error::NotOwner { .. })
    ));
    assert!(!sub.release_lock("src/none.ts", "B").await?.released);
    assert!(!sub.release_claim("task-none", "B").await?.released);
    Ok(())
}

#[tokio::test]
async fn handoff_transfers_claim_between_agents() -> Result<()> {
    let (sub, _) = substrate().await?;
    sub.create_claim("task-3", "A", None).await?;

    let verdict = sub.check("A", Action::Handoff, Some("task-3")).await?;
    assert!(verdict.allowed);

    let moved = sub.handoff_claim("task-3", "A", "B").await?;
    assert_eq!(moved.by, "B");
    assert!(sub.check("B", Action::TaskStart, Some("task-3")).await?.allowed);
    assert!(!sub.check("A", Action::TaskStart, Some("task-3")).await?.allowed);
    Ok(())
}

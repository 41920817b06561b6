//! End-to-end engine scenarios: delegation safety, override lifecycle,
//! claim synthesis, and rate limiting through the public API

use clearance_engine::{
    AuditOutcome, AuthorizationEngine, ClaimConfig, EngineConfig, EngineDeps, EngineError,
    InMemoryAuditSink, InMemoryCounterStore, InMemoryIdentityProvider, InMemoryOverrideStore,
    InMemoryUserDirectory, NewOverride, PermissionCatalog, PermissionKey, RateLimitConfig, Role,
    RoleHierarchy, RoleThresholds, UserDirectory, UserRecord,
};
use std::sync::Arc;

struct TestEnv {
    engine: AuthorizationEngine,
    audit: Arc<InMemoryAuditSink>,
    provider: Arc<InMemoryIdentityProvider>,
}

fn business_catalog() -> PermissionCatalog {
    PermissionCatalog::new([
        ("reports", vec!["read", "export"]),
        ("payroll", vec!["read", "write"]),
        ("invoices", vec!["read"]),
    ])
}

fn business_hierarchy(catalog: &PermissionCatalog) -> RoleHierarchy {
    RoleHierarchy::new(
        catalog,
        [
            (Role::Viewer, vec![PermissionKey::new("reports", "read")]),
            (
                Role::Consultant,
                vec![
                    PermissionKey::new("reports", "read"),
                    PermissionKey::new("invoices", "read"),
                ],
            ),
            (
                Role::Manager,
                vec![
                    PermissionKey::new("reports", "*"),
                    PermissionKey::new("payroll", "read"),
                ],
            ),
            (Role::Admin, vec![PermissionKey::new("*", "*")]),
        ],
    )
    .unwrap()
}

async fn env_with_config(config: EngineConfig) -> TestEnv {
    let catalog = business_catalog();
    let hierarchy = business_hierarchy(&catalog);

    let directory = Arc::new(InMemoryUserDirectory::new());
    directory
        .upsert(UserRecord::new("admin-1", Role::Admin).staff())
        .await
        .unwrap();
    directory
        .upsert(
            UserRecord::new("u1", Role::Consultant)
                .with_organization("org-1")
                .with_manager("admin-1"),
        )
        .await
        .unwrap();
    directory
        .upsert(UserRecord::new("viewer-1", Role::Viewer))
        .await
        .unwrap();

    let audit = Arc::new(InMemoryAuditSink::new());
    let provider = Arc::new(InMemoryIdentityProvider::new());
    let overrides = Arc::new(InMemoryOverrideStore::new(Arc::new(catalog.clone())));

    let engine = AuthorizationEngine::new(
        config,
        catalog,
        hierarchy,
        EngineDeps {
            directory,
            overrides,
            provider: provider.clone(),
            counters: Arc::new(InMemoryCounterStore::new()),
            audit_sink: audit.clone(),
        },
    );

    TestEnv {
        engine,
        audit,
        provider,
    }
}

async fn env() -> TestEnv {
    env_with_config(EngineConfig::default()).await
}

fn export_grant(user: &str) -> NewOverride {
    NewOverride {
        user_id: user.to_string(),
        key: PermissionKey::new("reports", "export"),
        granted: true,
        reason: "quarterly board pack".to_string(),
        created_by: "admin-1".to_string(),
    }
}

async fn wait_for_sync(env: &TestEnv, subject: &str, version: u64) {
    for _ in 0..200 {
        if env.engine.sync().last_synced(subject) >= Some(version) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("sync for {subject} v{version} did not complete");
}

// Scenario A: a viewer attempting to grant itself payroll.write is denied
// and the attempt is audited.
#[tokio::test]
async fn viewer_cannot_self_grant() {
    let env = env().await;

    let result = env
        .engine
        .create_override(
            "viewer-1",
            NewOverride {
                user_id: "viewer-1".to_string(),
                key: PermissionKey::new("payroll", "write"),
                granted: true,
                reason: "please".to_string(),
                created_by: "viewer-1".to_string(),
            },
        )
        .await;

    assert!(matches!(result, Err(EngineError::Authorization(_))));

    let records = env.audit.records_for_action("override.create").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Denied);
    assert_eq!(records[0].actor_id, "viewer-1");

    // Nothing leaked into the effective set.
    let set = env.engine.effective_permissions("viewer-1").await.unwrap();
    assert!(!set.allows(&PermissionKey::new("payroll", "write")));
}

// Scenario B: an admin grant shows up in the target's effective set even
// though the role defaults lack it.
#[tokio::test]
async fn admin_grant_extends_consultant() {
    let env = env().await;

    env.engine
        .create_override("admin-1", export_grant("u1"))
        .await
        .unwrap();

    let set = env.engine.effective_permissions("u1").await.unwrap();
    assert_eq!(set.role, Role::Consultant);
    assert!(set.allows(&PermissionKey::new("reports", "export")));
    // Defaults intact alongside the grant.
    assert!(set.allows(&PermissionKey::new("invoices", "read")));
}

// Scenario C: revoking the grant removes the key again; every mutation
// bumps the version exactly once regardless of interleaved reads.
#[tokio::test]
async fn grant_revoke_cycle_versions() {
    let env = env().await;

    let baseline = env.engine.effective_permissions("u1").await.unwrap();
    assert_eq!(baseline.version, 1);

    let record = env
        .engine
        .create_override("admin-1", export_grant("u1"))
        .await
        .unwrap();

    // Interleaved reads must not move the version.
    for _ in 0..3 {
        let set = env.engine.effective_permissions("u1").await.unwrap();
        assert_eq!(set.version, 2);
    }

    env.engine
        .revoke_override("admin-1", &record.id)
        .await
        .unwrap();

    let after = env.engine.effective_permissions("u1").await.unwrap();
    assert!(!after.allows(&PermissionKey::new("reports", "export")));
    assert_eq!(after.version, 3, "one bump per mutation");
    assert_eq!(after.hash, baseline.hash, "back to the default fingerprint");

    // Revoking again is a no-op success and moves nothing.
    env.engine
        .revoke_override("admin-1", &record.id)
        .await
        .unwrap();
    let settled = env.engine.effective_permissions("u1").await.unwrap();
    assert_eq!(settled.version, 3);
}

// Scenario D: a ceiling too small for even the minimal payload surfaces
// PayloadTooLarge instead of a truncated claim.
#[tokio::test]
async fn claim_ceiling_is_enforced() {
    let env = env_with_config(EngineConfig {
        claims: ClaimConfig {
            max_payload_bytes: 32,
        },
        ..Default::default()
    })
    .await;

    let result = env.engine.claims("u1").await;
    match result {
        Err(EngineError::PayloadTooLarge { size, ceiling }) => {
            assert_eq!(ceiling, 32);
            assert!(size > 32);
        }
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn claims_carry_identity_and_fingerprint() {
    let env = env().await;

    let set = env.engine.effective_permissions("u1").await.unwrap();
    let payload = env.engine.claims("u1").await.unwrap();

    assert_eq!(payload.subject_id, "u1");
    assert_eq!(payload.role, Role::Consultant);
    assert_eq!(payload.allowed_roles, vec![Role::Viewer, Role::Consultant]);
    assert_eq!(payload.permission_hash, set.hash);
    assert_eq!(payload.permission_version, set.version);
    assert_eq!(payload.organization_id.as_deref(), Some("org-1"));
    assert_eq!(payload.manager_id.as_deref(), Some("admin-1"));
    assert!(!payload.is_staff);
}

#[tokio::test]
async fn mutation_triggers_provider_sync() {
    let env = env().await;

    env.engine
        .create_override("admin-1", export_grant("u1"))
        .await
        .unwrap();

    // The mutation returned already; the push lands asynchronously.
    wait_for_sync(&env, "u1", 1).await;

    let claims = env.provider.claims_for("u1").await.unwrap();
    assert_eq!(claims.subject_id, "u1");
    let set = env.engine.effective_permissions("u1").await.unwrap();
    assert_eq!(claims.permission_hash, set.hash);
}

#[tokio::test]
async fn role_assignment_enforces_levels_and_recomputes() {
    let env = env().await;

    // Consultant cannot assign roles at all under strict-greater.
    let denied = env.engine.assign_role("u1", "viewer-1", Role::Consultant).await;
    assert!(matches!(denied, Err(EngineError::Authorization(_))));

    let denials = env.audit.records_for_action("role.assign").await;
    assert_eq!(denials[0].outcome, AuditOutcome::Denied);

    // Admin promotion changes the effective set.
    env.engine
        .assign_role("admin-1", "u1", Role::Manager)
        .await
        .unwrap();

    let set = env.engine.effective_permissions("u1").await.unwrap();
    assert_eq!(set.role, Role::Manager);
    assert!(set.allows(&PermissionKey::new("payroll", "read")));
}

#[tokio::test]
async fn unknown_target_user_is_not_found() {
    let env = env().await;

    let result = env
        .engine
        .create_override("admin-1", export_grant("nobody"))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));

    let result = env.engine.effective_permissions("nobody").await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn rate_limit_exactness_through_engine() {
    let env = env_with_config(EngineConfig {
        rate_limits: RateLimitConfig::new([(
            Role::Consultant,
            RoleThresholds {
                per_minute: 5,
                per_hour: 1_000,
                per_day: 10_000,
            },
        )]),
        ..Default::default()
    })
    .await;

    for i in 0..5 {
        assert!(
            env.engine.check_rate_limit("u1").await.is_ok(),
            "call {} should pass",
            i + 1
        );
    }

    match env.engine.check_rate_limit("u1").await {
        Err(EngineError::RateLimitExceeded {
            usage,
            limit,
            retry_after_seconds,
            ..
        }) => {
            assert_eq!(usage, 5);
            assert_eq!(limit, 5);
            assert!(retry_after_seconds <= 60);
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }

    // Denied calls consumed no quota.
    let status = env.engine.rate_status("u1").await.unwrap();
    assert_eq!(status[0].usage, 5);
}

#[tokio::test]
async fn audit_trail_covers_the_override_lifecycle() {
    let env = env().await;

    let record = env
        .engine
        .create_override("admin-1", export_grant("u1"))
        .await
        .unwrap();
    env.engine
        .revoke_override("admin-1", &record.id)
        .await
        .unwrap();

    let creates = env.audit.records_for_action("override.create").await;
    let revokes = env.audit.records_for_action("override.revoke").await;
    assert_eq!(creates.len(), 1);
    assert_eq!(revokes.len(), 1);
    assert_eq!(creates[0].outcome, AuditOutcome::Success);
    assert!(revokes[0].before.is_some());
    assert!(revokes[0].after.is_some());
    assert_eq!(env.engine.audit().missed_records(), 0);
}

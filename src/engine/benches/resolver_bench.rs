//! Resolver benchmarks: cached reads, cold recomputes, and hashing

use clearance_engine::{
    CacheConfig, InMemoryOverrideStore, InMemoryUserDirectory, NewOverride, OverrideStore,
    PermissionCatalog, PermissionKey, PermissionResolver, Role, RoleHierarchy, UserDirectory,
    UserRecord,
};
use clearance_engine::resolver::permission_hash;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_resolver(rt: &Runtime, override_count: usize) -> Arc<PermissionResolver> {
    let catalog = PermissionCatalog::new([
        ("reports", vec!["read", "export", "schedule"]),
        ("payroll", vec!["read", "write", "approve"]),
        ("invoices", vec!["read", "write", "void"]),
        ("users", vec!["read", "write"]),
    ]);
    let hierarchy = Arc::new(
        RoleHierarchy::new(
            &catalog,
            [
                (Role::Viewer, vec![PermissionKey::new("reports", "read")]),
                (Role::Consultant, vec![PermissionKey::new("reports", "*")]),
                (Role::Manager, vec![PermissionKey::new("payroll", "*")]),
                (Role::Admin, vec![PermissionKey::new("*", "*")]),
            ],
        )
        .unwrap(),
    );

    let catalog = Arc::new(catalog);
    let directory = Arc::new(InMemoryUserDirectory::new());
    let overrides = Arc::new(InMemoryOverrideStore::new(catalog.clone()));

    rt.block_on(async {
        directory
            .upsert(UserRecord::new("bench-user", Role::Consultant))
            .await
            .unwrap();
        let actions = ["read", "write", "approve"];
        for i in 0..override_count {
            overrides
                .create(NewOverride {
                    user_id: "bench-user".to_string(),
                    key: PermissionKey::new("payroll", actions[i % actions.len()]),
                    granted: true,
                    reason: "bench".to_string(),
                    created_by: "admin".to_string(),
                })
                .await
                .unwrap();
        }
    });

    Arc::new(PermissionResolver::new(
        directory,
        hierarchy,
        catalog,
        overrides,
        CacheConfig::default(),
    ))
}

fn bench_resolve_cached(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let resolver = build_resolver(&rt, 3);
    rt.block_on(resolver.resolve("bench-user")).unwrap();

    c.bench_function("resolve_cached", |b| {
        b.iter(|| {
            let set = rt.block_on(resolver.resolve(black_box("bench-user"))).unwrap();
            black_box(set.version)
        })
    });
}

fn bench_recompute(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let resolver = build_resolver(&rt, 3);

    c.bench_function("recompute", |b| {
        b.iter(|| {
            let (set, _) = rt.block_on(resolver.recompute(black_box("bench-user"))).unwrap();
            black_box(set.hash)
        })
    });
}

fn bench_permission_hash(c: &mut Criterion) {
    let keys: BTreeSet<_> = (0..64)
        .map(|i| PermissionKey::new(format!("resource-{}", i % 8), format!("action-{i}")))
        .collect();

    c.bench_function("permission_hash_64_keys", |b| {
        b.iter(|| permission_hash(Role::Manager, black_box(&keys)))
    });
}

criterion_group!(
    benches,
    bench_resolve_cached,
    bench_recompute,
    bench_permission_hash
);
criterion_main!(benches);

//! Benchmarks for policy evaluation.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use depot_core::rbac::{
    Enforcer, FactSet, GrantFact, GroupingFact, MemoryAdapter, PolicyStore, ProjectAction,
    SidebarItem, ADMIN_ROLE, PROJECT_OBJECT, SIDEBAR_OBJECT, WILDCARD_DOMAIN,
};

fn populated_enforcer(rt: &tokio::runtime::Runtime, tenants: usize) -> Enforcer {
    rt.block_on(async {
        let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap();
        let mut grants = Vec::new();
        for t in 0..tenants {
            let tenant = format!("t{t}");
            for item in SidebarItem::all() { grants.push(GrantFact::new("viewer", &tenant, SIDEBAR_OBJECT, item.as_str())); }
            grants.push(GrantFact::new("owner", &tenant, PROJECT_OBJECT, "update"));
            store.add_grouping(GroupingFact::new("owner", "viewer", &tenant)).await.unwrap();
            store.add_grouping(GroupingFact::new(format!("user-{t}"), "owner", &tenant)).await.unwrap();
        }
        grants.push(GrantFact::new(ADMIN_ROLE, WILDCARD_DOMAIN, PROJECT_OBJECT, "delete"));
        store.add_grants(grants).await.unwrap();
        store.add_grouping(GroupingFact::new("root", ADMIN_ROLE, WILDCARD_DOMAIN)).await.unwrap();
        Enforcer::new(store)
    })
}

fn bench_enforce_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("enforce_paths");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let enforcer = populated_enforcer(&rt, 100);
    group.bench_function("direct", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce("owner", "t42", PROJECT_OBJECT, "update").await.unwrap()) })); });
    group.bench_function("inherited", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce("user-42", "t42", SIDEBAR_OBJECT, "dashboard").await.unwrap()) })); });
    group.bench_function("wildcard", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce("root", "t42", PROJECT_OBJECT, "delete").await.unwrap()) })); });
    group.bench_function("deny", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce("user-42", "t7", PROJECT_OBJECT, "update").await.unwrap()) })); });
    group.finish();
}

fn bench_enforce_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("enforce_scaling");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for tenants in [10, 100, 1_000] {
        let enforcer = populated_enforcer(&rt, tenants);
        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, _| {
            b.iter(|| rt.block_on(async { black_box(enforcer.enforce("user-5", "t5", SIDEBAR_OBJECT, "settings").await.unwrap()) }));
        });
    }
    group.finish();
}

fn bench_enforce_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("enforce_many");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let enforcer = populated_enforcer(&rt, 100);
    let sidebar: Vec<(&str, &str)> = SidebarItem::all().iter().map(|i| (SIDEBAR_OBJECT, i.as_str())).collect();
    let project: Vec<(&str, &str)> = ProjectAction::all().iter().map(|a| (PROJECT_OBJECT, a.as_str())).collect();
    group.throughput(Throughput::Elements(sidebar.len() as u64));
    group.bench_function("sidebar", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce_many("user-3", "t3", &sidebar).await.unwrap()) })); });
    group.bench_function("project", |b| { b.iter(|| rt.block_on(async { black_box(enforcer.enforce_many("user-3", "t3", &project).await.unwrap()) })); });
    group.finish();
}

fn bench_fact_set_insert(c: &mut Criterion) {
    c.bench_function("fact_set_insert_1000", |b| {
        b.iter(|| {
            let mut facts = FactSet::new();
            for i in 0..1_000 { facts.insert_grant(GrantFact::new(format!("role-{}", i % 10), format!("t{i}"), "project", "read")); }
            black_box(facts.grant_count())
        });
    });
}

criterion_group!(benches, bench_enforce_paths, bench_enforce_scaling, bench_enforce_many, bench_fact_set_insert);
criterion_main!(benches);

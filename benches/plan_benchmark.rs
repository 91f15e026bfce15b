use criterion::{Criterion, black_box, criterion_group, criterion_main};
use page_vision::plan::{NamingPolicy, Route, SnapshotPlan, Viewport};

fn benchmark_plan_build(c: &mut Criterion) {
    let routes: Vec<Route> = (0..200)
        .map(|i| Route::new(format!("page-{}", i), format!("/pages/{}", i)).tag("smoke"))
        .collect();
    let viewports = Viewport::all_presets();
    let naming = NamingPolicy::default().include_device_label(true);

    c.bench_function("plan_build_200x9", |b| {
        b.iter(|| {
            let plan = SnapshotPlan::build(black_box(&routes), black_box(&viewports), &naming);
            assert!(plan.is_ok());
        })
    });

    let plan = SnapshotPlan::build(&routes, &viewports, &naming).unwrap();
    c.bench_function("plan_shard_4", |b| {
        b.iter(|| black_box(plan.shards(4)));
    });
}

criterion_group!(benches, benchmark_plan_build);
criterion_main!(benches);

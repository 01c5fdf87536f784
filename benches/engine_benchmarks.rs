use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pinmap::quadtree::{IndexEntry, Quadtree};
use pinmap::{
    ClusterEngine, Engine, EngineBuilder, Entity, EntityId, EntityPayload, GeoBounds, Viewport,
    project, project_bounds,
};
use std::time::{Duration, Instant};

fn make_entities(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            // Pseudo-random but deterministic spread over greater Lisbon.
            let lat = 38.65 + ((i * 7919) % 10_000) as f64 * 1e-5;
            let lng = -9.25 + ((i * 104_729) % 20_000) as f64 * 1e-5;
            Entity::new(i as u64, lat, lng, EntityPayload::default())
        })
        .collect()
}

fn benchmark_quadtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("quadtree");

    for size in [1_000, 10_000] {
        let entities = make_entities(size);

        group.bench_with_input(BenchmarkId::new("insert", size), &size, |b, _| {
            b.iter(|| {
                let mut tree = Quadtree::unit(16, 12);
                for e in &entities {
                    tree.insert(black_box(IndexEntry::new(e.id, project(e.lat, e.lng))));
                }
                tree
            })
        });

        let mut tree = Quadtree::unit(16, 12);
        for e in &entities {
            tree.insert(IndexEntry::new(e.id, project(e.lat, e.lng)));
        }
        let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
        let rect = project_bounds(&bounds);

        group.bench_with_input(BenchmarkId::new("viewport_query", size), &size, |b, _| {
            b.iter(|| tree.query(black_box(&rect)))
        });
    }

    group.finish();
}

fn benchmark_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");

    for size in [500, 2_000] {
        let entities = make_entities(size);
        let refs: Vec<&Entity> = entities.iter().collect();

        group.bench_with_input(BenchmarkId::new("cluster_pass", size), &size, |b, _| {
            let mut engine = ClusterEngine::new(
                15.0,
                3.0,
                0.08,
                0.8,
                3,
                Duration::from_millis(300),
                16,
                12,
            );
            let now = Instant::now();
            b.iter(|| engine.run(black_box(&refs), black_box(10.0), now))
        });
    }

    group.finish();
}

fn benchmark_region_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_cache");

    let mut engine = Engine::new();
    let now = Instant::now();
    let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    engine
        .store_region(&bounds, 16.0, make_entities(500), now)
        .unwrap();

    group.bench_function("lookup_hit_500", |b| {
        b.iter(|| engine.lookup_region(black_box(&bounds), 16.0, now))
    });

    group.bench_function("store_region_500", |b| {
        let entities = make_entities(500);
        b.iter_batched(
            || (Engine::new(), entities.clone()),
            |(mut engine, entities)| {
                engine
                    .store_region(black_box(&bounds), 16.0, entities, now)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_cycle");
    group.sample_size(20);

    for size in [1_000, 5_000] {
        group.bench_with_input(
            BenchmarkId::new("viewport_to_markers", size),
            &size,
            |b, &size| {
                let mut engine = EngineBuilder::new()
                    .debounce_interval(Duration::from_millis(0))
                    .pool_initial_size(2_048)
                    .build()
                    .unwrap();
                engine.insert_entities(make_entities(size));

                let mut now = Instant::now();
                let mut flip = false;
                b.iter(|| {
                    // Alternate between two viewports so every cycle has a
                    // real diff to plan and apply.
                    now += Duration::from_millis(50);
                    let viewport = if flip {
                        Viewport::new(38.70, 38.75, -9.16, -9.13, 16.0)
                    } else {
                        Viewport::new(38.68, 38.73, -9.20, -9.17, 16.0)
                    };
                    flip = !flip;
                    engine.set_viewport(black_box(viewport), now).unwrap();
                    engine.tick(now)
                })
            },
        );
    }

    group.finish();
}

fn benchmark_marker_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("marker_diff");

    let entities = make_entities(1_000);

    group.bench_function("diff_1000_unchanged", |b| {
        use pinmap::{MarkerDiffer, VirtualMarker};
        use rustc_hash::FxHashMap;

        let map: FxHashMap<EntityId, VirtualMarker> = entities
            .iter()
            .map(|e| (e.id, VirtualMarker::for_entity(e, true)))
            .collect();
        let mut differ = MarkerDiffer::new();
        differ.diff(map.clone());
        b.iter(|| differ.diff(black_box(map.clone())))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_quadtree,
    benchmark_clustering,
    benchmark_region_cache,
    benchmark_full_cycle,
    benchmark_marker_diff
);
criterion_main!(benches);

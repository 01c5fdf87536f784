use pinmap::{
    Config, Engine, EngineBuilder, Entity, EntityPayload, GeoBounds, MarkerOp, Viewport,
};
use std::time::{Duration, Instant};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn entity(id: u64, lat: f64, lng: f64) -> Entity {
    Entity::new(id, lat, lng, EntityPayload::default())
}

fn lisbon_viewport(zoom: f64) -> Viewport {
    Viewport::new(38.70, 38.75, -9.16, -9.13, zoom)
}

/// Tick the engine forward until the debounced cycle has run and every
/// queued marker batch is applied, collecting all emitted ops.
fn settle(engine: &mut Engine, start: Instant) -> Vec<MarkerOp> {
    let mut ops = Vec::new();
    let mut now = start;
    for _ in 0..64 {
        now += Duration::from_millis(200);
        ops.extend(engine.tick(now).marker_ops);
    }
    ops
}

#[test]
fn test_basic_pipeline() {
    init_logs();
    let mut engine = Engine::new();
    let accepted = engine.insert_entities(vec![
        entity(1, 38.7223, -9.1393),
        entity(2, 38.7169, -9.1399),
        entity(3, 38.7369, -9.1527),
    ]);
    assert_eq!(accepted, 3);

    let now = Instant::now();
    engine.set_viewport(lisbon_viewport(16.0), now).unwrap();
    let ops = settle(&mut engine, now);

    let upserts = ops
        .iter()
        .filter(|op| matches!(op, MarkerOp::Upsert { .. }))
        .count();
    assert_eq!(upserts, 3);

    let stats = engine.stats();
    assert_eq!(stats.active_markers, 3);
    assert_eq!(stats.entity_count, 3);
    assert!(stats.cycles_run >= 1);
}

#[test]
fn test_region_cache_roundtrip() {
    let mut engine = Engine::new();
    let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    let now = Instant::now();

    let fetched = vec![entity(1, 38.72, -9.14), entity(2, 38.73, -9.15)];
    engine.store_region(&bounds, 16.0, fetched, now).unwrap();

    // An equal query at the same zoom band hits the cache.
    let hit = engine.lookup_region(&bounds, 16.0, now).unwrap();
    assert_eq!(hit.entities.len(), 2);
    assert!(!hit.needs_refresh);

    // A different zoom band is a separate cache; this misses.
    assert!(engine.lookup_region(&bounds, 5.0, now).is_none());

    // Stored entities also land in the entity store.
    assert_eq!(engine.entity_count(), 2);
}

#[test]
fn test_detail_degrades_at_low_zoom() {
    let mut engine = Engine::new();
    let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    let now = Instant::now();

    let rich = Entity::new(
        1,
        38.72,
        -9.14,
        EntityPayload {
            rating: Some(4.5),
            review_count: 120,
            tags: vec!["pastry".to_string()],
            hours: Some("8-18".to_string()),
            ..EntityPayload::default()
        },
    );
    engine.store_region(&bounds, 16.0, vec![rich.clone()], now).unwrap();
    engine.store_region(&bounds, 5.0, vec![rich], now).unwrap();

    // Full detail at high zoom.
    let full = engine.lookup_region(&bounds, 16.0, now).unwrap();
    assert!(full.entities[0].payload.hours.is_some());
    assert!(!full.entities[0].payload.tags.is_empty());

    // Minimal detail at low zoom strips heavy fields but keeps identity.
    let minimal = engine.lookup_region(&bounds, 5.0, now).unwrap();
    assert!(minimal.entities[0].payload.hours.is_none());
    assert!(minimal.entities[0].payload.tags.is_empty());
    assert_eq!(minimal.entities[0].id, full.entities[0].id);
}

#[test]
fn test_dense_city_collapses_to_one_cluster() {
    let mut engine = EngineBuilder::new().min_cluster_size(2).build().unwrap();

    // 50 points within a few hundred meters of each other.
    let entities: Vec<Entity> = (0..50)
        .map(|i| {
            let angle = i as f64 / 50.0 * std::f64::consts::TAU;
            entity(i, 38.72 + 0.002 * angle.sin(), -9.14 + 0.002 * angle.cos())
        })
        .collect();
    engine.insert_entities(entities);

    let now = Instant::now();
    engine.set_viewport(lisbon_viewport(10.0), now).unwrap();

    let mut clusters = Vec::new();
    let mut t = now;
    for _ in 0..8 {
        t += Duration::from_millis(200);
        let frame = engine.tick(t);
        if !frame.clusters.is_empty() {
            clusters = frame.clusters;
        }
    }

    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].count, 50);
    // Clustered members carry no individual markers.
    assert_eq!(engine.stats().active_markers, 0);
}

#[test]
fn test_zoom_in_breaks_cluster_into_markers() {
    let mut engine = EngineBuilder::new().min_cluster_size(2).build().unwrap();
    engine.insert_entities(vec![entity(1, 38.72, -9.14), entity(2, 38.7201, -9.1401)]);

    let now = Instant::now();
    engine.set_viewport(lisbon_viewport(10.0), now).unwrap();
    settle(&mut engine, now);
    assert_eq!(engine.stats().active_markers, 0);

    // Past the clustering threshold the pair becomes two markers.
    let later = now + Duration::from_secs(30);
    engine.set_viewport(lisbon_viewport(16.0), later).unwrap();
    settle(&mut engine, later);
    assert_eq!(engine.stats().active_markers, 2);
}

#[test]
fn test_cluster_transition_reported_on_change() {
    let mut engine = EngineBuilder::new().min_cluster_size(2).build().unwrap();
    engine.insert_entities(vec![entity(1, 38.71, -9.14), entity(2, 38.712, -9.14)]);

    let now = Instant::now();
    engine.set_viewport(lisbon_viewport(10.0), now).unwrap();
    settle(&mut engine, now);

    // A third member shifts the centroid and grows the count.
    engine.insert_entities(vec![entity(3, 38.714, -9.14)]);
    let later = now + Duration::from_secs(30);
    engine.set_viewport(lisbon_viewport(10.0), later).unwrap();

    let mut saw_transition = false;
    let mut t = later;
    for _ in 0..4 {
        t += Duration::from_millis(100);
        let frame = engine.tick(t);
        for transition in &frame.transitions {
            assert_eq!(transition.id, "c:1");
            assert!((0.0..=1.0).contains(&transition.progress));
            saw_transition = true;
        }
    }
    assert!(saw_transition);
}

#[test]
fn test_marker_budget_respected() {
    let mut engine = EngineBuilder::new()
        .marker_budgets(vec![(22.0, 25)])
        .build()
        .unwrap();

    let entities: Vec<Entity> = (0..200)
        .map(|i| {
            entity(
                i,
                38.701 + (i % 20) as f64 * 0.002,
                -9.159 + (i / 20) as f64 * 0.002,
            )
        })
        .collect();
    engine.insert_entities(entities);

    let now = Instant::now();
    engine.set_viewport(lisbon_viewport(17.0), now).unwrap();
    settle(&mut engine, now);

    // Visible markers stay within budget; preload-margin markers are bound
    // but hidden.
    let stats = engine.stats();
    assert!(stats.active_markers >= 25);
    assert!(stats.active_markers <= 200);
}

#[test]
fn test_popularity_pruning_keeps_hot_regions() {
    let mut engine = EngineBuilder::new().popularity_threshold(3).build().unwrap();
    let hot = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    let cold = GeoBounds::new(41.10, 41.20, -8.65, -8.55);
    let now = Instant::now();

    engine
        .store_region(&hot, 16.0, vec![entity(1, 38.72, -9.14)], now)
        .unwrap();
    engine
        .store_region(&cold, 16.0, vec![entity(2, 41.15, -8.60)], now)
        .unwrap();

    for i in 0..5 {
        engine.lookup_region(&hot, 16.0, now + Duration::from_secs(i));
    }
    engine.lookup_region(&cold, 16.0, now);

    let evicted = engine.prune_unpopular(now + Duration::from_secs(10));
    assert_eq!(evicted, 1);

    let later = now + Duration::from_secs(11);
    assert!(engine.lookup_region(&hot, 16.0, later).is_some());
    assert!(engine.lookup_region(&cold, 16.0, later).is_none());
}

#[test]
fn test_frequent_region_reports_stale_sooner() {
    let mut engine = Engine::new();
    let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    let now = Instant::now();
    engine
        .store_region(&bounds, 16.0, vec![entity(1, 38.72, -9.14)], now)
        .unwrap();

    // Hammer the region so its staleness window shrinks well below the
    // 300s base.
    for i in 0..20 {
        engine.lookup_region(&bounds, 16.0, now + Duration::from_secs(i));
    }

    // At 100s a popular region is already due for refresh.
    let at = now + Duration::from_secs(100);
    let hit = engine.lookup_region(&bounds, 16.0, at).unwrap();
    assert!(hit.needs_refresh);
}

#[test]
fn test_clear_resets_everything() {
    let mut engine = Engine::new();
    let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
    let now = Instant::now();
    engine
        .store_region(&bounds, 16.0, vec![entity(1, 38.72, -9.14)], now)
        .unwrap();
    engine.set_viewport(lisbon_viewport(16.0), now).unwrap();
    settle(&mut engine, now);
    assert_eq!(engine.stats().active_markers, 1);

    engine.clear();

    let stats = engine.stats();
    assert_eq!(stats.entity_count, 0);
    assert_eq!(stats.region_count, 0);
    assert_eq!(stats.active_markers, 0);
    let later = now + Duration::from_secs(60);
    assert!(engine.lookup_region(&bounds, 16.0, later).is_none());
}

#[test]
fn test_config_json_roundtrip() {
    let config = Config::default()
        .with_region_cache_capacity(32)
        .with_min_cluster_size(4);
    let json = config.to_json().unwrap();
    let restored = Config::from_json(&json).unwrap();
    assert_eq!(restored.region_cache_capacity, 32);
    assert_eq!(restored.min_cluster_size, 4);
}

#[test]
fn test_config_json_rejects_invalid() {
    let json = r#"{"region_cache_capacity": 0}"#;
    assert!(Config::from_json(json).is_err());
}

#[cfg(feature = "toml")]
#[test]
fn test_config_toml_roundtrip() {
    let config = Config::default().with_region_cache_capacity(16);
    let toml_str = config.to_toml().unwrap();
    let restored = Config::from_toml(&toml_str).unwrap();
    assert_eq!(restored.region_cache_capacity, 16);
}

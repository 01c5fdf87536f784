//! Engine facade tying cache, clustering, selection, and markers together.
//!
//! The engine is single-threaded and host-driven: the host reports viewport
//! changes and feeds fetched region data in, then calls [`Engine::tick`]
//! once per frame with the current time. Each tick performs at most one
//! bounded unit of marker work, so the engine never blocks a frame on a
//! large update.

use crate::bands::{BandedCaches, RegionLookup};
use crate::cache::RegionKey;
use crate::cluster::{Cluster, ClusterEngine};
use crate::error::{PinmapError, Result};
use crate::marker::{
    MarkerBatch, MarkerDiffer, MarkerOp, MarkerPool, VirtualMarker, apply_batch, plan_batches,
};
use crate::optimizer::{ViewportDebouncer, ViewportOptimizer};
use crate::projection::{project, project_bounds};
use crate::quadtree::{IndexEntry, Quadtree};
use crate::types::{Config, EngineStats, Entity, EntityId, GeoBounds, Viewport};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::time::Instant;

/// Snapshot of one in-flight cluster transition for the host to animate.
#[derive(Debug, Clone)]
pub struct TransitionState {
    pub id: String,
    pub from: (f64, f64),
    pub to: (f64, f64),
    /// Interpolated `(lat, lng)` at the tick's time.
    pub position: (f64, f64),
    /// Linear progress in `[0, 1]`.
    pub progress: f64,
}

/// Everything the host needs to render after one tick.
#[derive(Debug, Default)]
pub struct FrameOutput {
    /// Marker instructions for this frame, already capped to the budget.
    pub marker_ops: Vec<MarkerOp>,
    /// Clusters recomputed this tick; empty when no selection cycle ran.
    pub clusters: Vec<Cluster>,
    pub transitions: Vec<TransitionState>,
}

/// The viewport-aware marker engine.
///
/// Owns the entity store, the banded region caches, the cluster engine, the
/// viewport optimizer, and the marker pool. All time-dependent behavior
/// takes `now` from the caller, so hosts control the clock.
pub struct Engine {
    config: Config,
    entities: FxHashMap<EntityId, Entity>,
    /// Index over the whole entity store; selection cycles query it with
    /// the preload rect instead of scanning every entity.
    entity_index: Quadtree,
    /// Set when an existing entity is replaced (it may have moved); the
    /// index is rebuilt before the next query.
    index_dirty: bool,
    caches: BandedCaches,
    clusterer: ClusterEngine,
    optimizer: ViewportOptimizer,
    debouncer: ViewportDebouncer,
    pool: MarkerPool,
    differ: MarkerDiffer,
    batches: VecDeque<MarkerBatch>,
    /// Bumped on `clear`; batches planned under an older epoch are dropped.
    epoch: u64,
    pending_cycle: Option<Viewport>,
    stats: EngineStats,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        // The default config always validates.
        match Self::with_config(Config::default()) {
            Ok(engine) => engine,
            Err(_) => unreachable!("default config is valid"),
        }
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate().map_err(PinmapError::InvalidConfig)?;

        let caches = BandedCaches::new(
            config.zoom_band_width,
            config.region_cache_capacity,
            config.quadtree_capacity,
            config.quadtree_max_depth,
            config.popularity_window(),
            config.base_max_age(),
            config.detail_full_zoom,
            config.detail_medium_zoom,
        );
        let clusterer = ClusterEngine::new(
            config.cluster_zoom_threshold,
            config.cluster_min_zoom,
            config.cluster_radius_base,
            config.cluster_radius_decay,
            config.min_cluster_size,
            config.transition_duration(),
            config.quadtree_capacity,
            config.quadtree_max_depth,
        );
        let optimizer = ViewportOptimizer::new(
            config.preload_margin,
            config.cleanup_margin,
            config.density_grid_size,
            config.marker_budgets.clone(),
        );
        let debouncer = ViewportDebouncer::new(config.debounce_interval());
        let pool = MarkerPool::new(
            config.pool_initial_size,
            config.pool_growth_factor,
            config.recycle_threshold,
            config.pool_chunk_size,
        );

        let entity_index = Quadtree::unit(config.quadtree_capacity, config.quadtree_max_depth);

        Ok(Self {
            config,
            entities: FxHashMap::default(),
            entity_index,
            index_dirty: false,
            caches,
            clusterer,
            optimizer,
            debouncer,
            pool,
            differ: MarkerDiffer::new(),
            batches: VecDeque::new(),
            epoch: 0,
            pending_cycle: None,
            stats: EngineStats::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add entities to the store. Entities with non-finite or out-of-range
    /// coordinates are skipped with a warning; returns the accepted count.
    pub fn insert_entities(&mut self, entities: Vec<Entity>) -> usize {
        let mut accepted = 0;
        for entity in entities {
            if !entity.has_valid_position() {
                log::warn!(
                    "skipping entity {} with invalid position ({}, {})",
                    entity.id,
                    entity.lat,
                    entity.lng
                );
                continue;
            }
            self.add_entity(entity);
            accepted += 1;
        }
        accepted
    }

    /// Insert into the store, keeping the entity index in sync.
    fn add_entity(&mut self, entity: Entity) {
        let entry = IndexEntry::new(entity.id, project(entity.lat, entity.lng));
        if self.entities.insert(entity.id, entity).is_some() {
            self.index_dirty = true;
        } else {
            self.entity_index.insert(entry);
        }
    }

    fn rebuild_entity_index(&mut self) {
        self.entity_index.clear();
        for entity in self.entities.values() {
            self.entity_index
                .insert(IndexEntry::new(entity.id, project(entity.lat, entity.lng)));
        }
        self.index_dirty = false;
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Feed a fetched region into the cache and the entity store.
    pub fn store_region(
        &mut self,
        bounds: &GeoBounds,
        zoom: f64,
        entities: Vec<Entity>,
        now: Instant,
    ) -> Result<RegionKey> {
        if !bounds.is_valid() {
            return Err(PinmapError::InvalidInput(format!(
                "invalid region bounds: {:?}",
                bounds
            )));
        }

        let valid: Vec<Entity> = entities
            .into_iter()
            .filter(|e| e.has_valid_position())
            .collect();
        for entity in &valid {
            self.add_entity(entity.clone());
        }

        let key = self.caches.store_region(bounds, zoom, valid, now);
        log::debug!("stored region {} at zoom {}", key, zoom);
        Ok(key)
    }

    /// Cached snapshot for `bounds` at `zoom`, detail-degraded to the zoom
    /// tier, with a staleness verdict.
    pub fn lookup_region(
        &mut self,
        bounds: &GeoBounds,
        zoom: f64,
        now: Instant,
    ) -> Option<RegionLookup> {
        self.caches.lookup(bounds, zoom, now)
    }

    /// Report a viewport change. The change is debounced: rapid successive
    /// calls coalesce, and the selection cycle runs on a later [`tick`].
    ///
    /// [`tick`]: Engine::tick
    pub fn set_viewport(&mut self, viewport: Viewport, now: Instant) -> Result<()> {
        if !viewport.is_valid() {
            return Err(PinmapError::InvalidInput(format!(
                "invalid viewport: {:?}",
                viewport
            )));
        }
        if let Some(released) = self.debouncer.submit(viewport, now) {
            self.pending_cycle = Some(released);
        }
        Ok(())
    }

    /// Advance the engine by one frame.
    ///
    /// Grows the marker pool by at most one chunk, runs a selection cycle if
    /// a debounced viewport is due, and applies at most one marker batch.
    pub fn tick(&mut self, now: Instant) -> FrameOutput {
        self.pool.grow_chunk();

        let due = self
            .pending_cycle
            .take()
            .or_else(|| self.debouncer.poll(now));

        let clusters = match due {
            Some(viewport) => self.run_cycle(viewport, now),
            None => Vec::new(),
        };

        let marker_ops = match self.batches.pop_front() {
            Some(batch) => {
                let (ops, deferred) = apply_batch(&mut self.pool, batch, self.epoch);
                if !deferred.is_empty() {
                    // Pool exhausted mid-batch; retry these once the next
                    // growth chunk lands.
                    self.batches.push_front(MarkerBatch {
                        epoch: self.epoch,
                        changes: deferred,
                    });
                }
                if !ops.is_empty() {
                    self.stats.record_batch();
                }
                ops
            }
            None => Vec::new(),
        };

        let transitions = self
            .clusterer
            .active_transitions(now)
            .iter()
            .map(|t| TransitionState {
                id: t.id.clone(),
                from: t.start,
                to: t.end,
                position: t.position_at(now),
                progress: t.progress(now),
            })
            .collect();

        FrameOutput {
            marker_ops,
            clusters,
            transitions,
        }
    }

    /// One selection cycle: cluster, select, diff, plan batches.
    fn run_cycle(&mut self, viewport: Viewport, now: Instant) -> Vec<Cluster> {
        if self.index_dirty {
            self.rebuild_entity_index();
        }

        let preload = self.optimizer.preload_bounds(&viewport);
        let hits = self.entity_index.query(&project_bounds(&preload));
        // The contains re-check drops hits whose latitude was clamped into
        // the rect by the projection.
        let candidates: Vec<&Entity> = hits
            .iter()
            .filter_map(|hit| self.entities.get(&hit.id))
            .filter(|e| preload.contains(e.lat, e.lng))
            .collect();

        let clusters = self.clusterer.run(&candidates, viewport.zoom, now);
        let selection = self.optimizer.select(&candidates, &viewport);

        // Members of real clusters are represented by the cluster, not by
        // individual markers.
        let clustered: FxHashSet<EntityId> = clusters
            .iter()
            .filter(|c| !c.is_singleton())
            .flat_map(|c| c.members.iter().copied())
            .collect();

        let mut next: FxHashMap<EntityId, VirtualMarker> = FxHashMap::default();
        for (ids, visible) in [
            (&selection.visible, true),
            (&selection.preload, false),
            (&selection.retained, false),
        ] {
            for id in ids {
                if clustered.contains(id) {
                    continue;
                }
                if let Some(entity) = self.entities.get(id) {
                    next.insert(*id, VirtualMarker::for_entity(entity, visible));
                }
            }
        }

        let diff = self.differ.diff(next);
        let planned = plan_batches(diff, self.config.batch_size(), self.epoch);
        if planned.len() > 1 {
            // More marker work than fits in one frame budget.
            self.stats.record_budget_overrun();
        }
        self.batches.extend(planned);

        self.stats.record_cycle(clusters.len());
        log::debug!(
            "cycle at zoom {}: {} candidates, {} clusters, {} batches queued",
            viewport.zoom,
            candidates.len(),
            clusters.len(),
            self.batches.len()
        );
        clusters
    }

    /// Evict regions whose recent access count is below the configured
    /// popularity threshold. Returns the number of regions evicted.
    pub fn prune_unpopular(&mut self, now: Instant) -> usize {
        self.caches
            .prune_unpopular(self.config.popularity_threshold, now)
    }

    /// Drop all entities, caches, markers, and queued work.
    ///
    /// The epoch is advanced so batches planned before the clear can never
    /// apply afterwards.
    pub fn clear(&mut self) {
        self.epoch += 1;
        self.entities.clear();
        self.entity_index.clear();
        self.index_dirty = false;
        self.caches.clear();
        self.clusterer.clear();
        self.optimizer.clear();
        self.debouncer.clear();
        self.pool.clear();
        self.differ.clear();
        self.batches.clear();
        self.pending_cycle = None;
        log::info!("engine cleared (epoch {})", self.epoch);
    }

    /// Counters plus a snapshot of live sizes.
    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.entity_count = self.entities.len();
        stats.region_count = self.caches.region_count();
        stats.active_markers = self.pool.active();
        stats.recycled_markers = self.pool.recycled();
        stats
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

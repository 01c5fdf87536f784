//! Popularity-aware cache layer partitioned by zoom band.
//!
//! The zoom range is split into fixed-width bands, each owning its own
//! region cache and spatial index pair. Lookups append to a per-region
//! access log whose records age out of a trailing window; region popularity
//! is the count of live records. Eviction is therefore two-tier: LRU under
//! capacity pressure in the cache itself, plus an explicit pruning pass here
//! for regions whose access frequency has dropped below a threshold.

use crate::cache::{CachedRegion, RegionCache, RegionKey, band_for_zoom};
use crate::projection::{project, project_bounds};
use crate::quadtree::{IndexEntry, Quadtree};
use crate::types::{DetailLevel, Entity, EntityId, GeoBounds};
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::{Duration, Instant};

/// One zoom band's region cache and spatial index.
///
/// The index holds only id + position references; callers resolve ids
/// against the entity store. `indexed` mirrors the id set currently held by
/// the index, so a re-stored region never duplicates entries, and every
/// removal path (refresh, LRU displacement, popularity pruning) rebuilds
/// the index from the regions still cached.
pub struct CacheBand {
    pub cache: RegionCache,
    pub index: Quadtree,
    indexed: FxHashSet<EntityId>,
}

impl CacheBand {
    /// Reconstruct the index from the cached regions, deduplicating ids
    /// shared by overlapping regions.
    fn rebuild_index(&mut self) {
        self.index.clear();
        self.indexed.clear();
        for region in self.cache.regions() {
            for entity in &region.entities {
                if self.indexed.insert(entity.id) {
                    self.index
                        .insert(IndexEntry::new(entity.id, project(entity.lat, entity.lng)));
                }
            }
        }
    }
}

/// Result of a region lookup.
#[derive(Debug, Clone)]
pub struct RegionLookup {
    /// Cached entities, reduced to the zoom's detail tier.
    pub entities: Vec<Entity>,
    /// True when the region's staleness window has elapsed and the caller
    /// should schedule a refetch.
    pub needs_refresh: bool,
}

/// Per-zoom-band caches with access-frequency tracking.
pub struct BandedCaches {
    bands: FxHashMap<u32, CacheBand>,
    access_log: FxHashMap<RegionKey, Vec<Instant>>,
    band_width: f64,
    cache_capacity: usize,
    quadtree_capacity: usize,
    quadtree_max_depth: u8,
    popularity_window: Duration,
    base_max_age: Duration,
    detail_full_zoom: f64,
    detail_medium_zoom: f64,
}

impl BandedCaches {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        band_width: f64,
        cache_capacity: usize,
        quadtree_capacity: usize,
        quadtree_max_depth: u8,
        popularity_window: Duration,
        base_max_age: Duration,
        detail_full_zoom: f64,
        detail_medium_zoom: f64,
    ) -> Self {
        Self {
            bands: FxHashMap::default(),
            access_log: FxHashMap::default(),
            band_width,
            cache_capacity,
            quadtree_capacity,
            quadtree_max_depth,
            popularity_window,
            base_max_age,
            detail_full_zoom,
            detail_medium_zoom,
        }
    }

    /// The cache/index pair serving a zoom level, created on first use.
    pub fn band_for(&mut self, zoom: f64) -> &mut CacheBand {
        let band = band_for_zoom(zoom, self.band_width);
        self.bands.entry(band).or_insert_with(|| CacheBand {
            cache: RegionCache::new(self.cache_capacity),
            index: Quadtree::unit(self.quadtree_capacity, self.quadtree_max_depth),
            indexed: FxHashSet::default(),
        })
    }

    /// Store (or refresh) a region snapshot and index its entities.
    ///
    /// A fresh region extends the band index in place; a refresh or an LRU
    /// displacement rebuilds it from the surviving regions, so index size
    /// stays proportional to what the cache actually holds.
    pub fn store_region(
        &mut self,
        bounds: &GeoBounds,
        zoom: f64,
        entities: Vec<Entity>,
        now: Instant,
    ) -> RegionKey {
        let key = RegionKey::for_bounds(bounds, zoom, self.band_width);
        let band = self.band_for(zoom);

        let entries: Vec<IndexEntry> = entities
            .iter()
            .map(|e| IndexEntry::new(e.id, project(e.lat, e.lng)))
            .collect();

        let refreshed = band.cache.contains(&key);
        let region = CachedRegion::new(key.clone(), entities, now);
        let evicted = band.cache.insert(region);

        if refreshed || evicted.is_some() {
            band.rebuild_index();
        } else {
            for entry in entries {
                if band.indexed.insert(entry.id) {
                    band.index.insert(entry);
                }
            }
        }
        key
    }

    /// Look up the cached region covering `bounds` at `zoom`.
    ///
    /// Records the access for popularity tracking and returns entities at
    /// the zoom's detail tier together with a staleness verdict.
    pub fn lookup(&mut self, bounds: &GeoBounds, zoom: f64, now: Instant) -> Option<RegionLookup> {
        let key = RegionKey::for_bounds(bounds, zoom, self.band_width);
        self.record_access(&key, now);
        let frequency = self.popularity(&key);
        let base_max_age = self.base_max_age;
        let level = DetailLevel::for_zoom(zoom, self.detail_full_zoom, self.detail_medium_zoom);

        let band = self.band_for(zoom);
        let region = band.cache.get(&key)?;

        let entities = region
            .entities
            .iter()
            .map(|e| Entity {
                id: e.id,
                lat: e.lat,
                lng: e.lng,
                payload: e.payload.degraded(level),
            })
            .collect();

        Some(RegionLookup {
            entities,
            needs_refresh: region.is_due_for_refresh(now, base_max_age, frequency),
        })
    }

    /// Ids of cached entities intersecting `bounds` in the zoom's band.
    pub fn cached_ids_in(&mut self, bounds: &GeoBounds, zoom: f64) -> Vec<EntityId> {
        let rect = project_bounds(bounds);
        let band = self.band_for(zoom);
        band.index.query(&rect).into_iter().map(|e| e.id).collect()
    }

    fn record_access(&mut self, key: &RegionKey, now: Instant) {
        let window = self.popularity_window;
        let log = self.access_log.entry(key.clone()).or_default();
        // Lazy pruning: records older than the trailing window drop out on
        // the next access. Keys are band-scoped, so a timestamp is the whole
        // record.
        log.retain(|at| now.duration_since(*at) <= window);
        log.push(now);
    }

    /// Access count within the trailing popularity window.
    ///
    /// Counts records as last pruned; callers that need an exact value at
    /// `now` should have just recorded an access.
    pub fn popularity(&self, key: &RegionKey) -> usize {
        self.access_log.get(key).map_or(0, |log| log.len())
    }

    /// Periodic pruning pass: evict regions whose popularity fell below the
    /// threshold, independent of LRU pressure. Returns the number pruned.
    pub fn prune_unpopular(&mut self, threshold: usize, now: Instant) -> usize {
        let window = self.popularity_window;
        for log in self.access_log.values_mut() {
            log.retain(|at| now.duration_since(*at) <= window);
        }

        let mut pruned = 0;
        for band in self.bands.values_mut() {
            let mut removed_any = false;
            for key in band.cache.keys() {
                let popularity = self.access_log.get(&key).map_or(0, |log| log.len());
                if popularity < threshold {
                    band.cache.remove(&key);
                    self.access_log.remove(&key);
                    removed_any = true;
                    pruned += 1;
                }
            }
            if removed_any {
                band.rebuild_index();
            }
        }

        self.access_log.retain(|_, log| !log.is_empty());
        if pruned > 0 {
            log::debug!("pruned {} unpopular regions", pruned);
        }
        pruned
    }

    /// Total cached regions across all bands.
    pub fn region_count(&self) -> usize {
        self.bands.values().map(|b| b.cache.len()).sum()
    }

    pub fn clear(&mut self) {
        self.bands.clear();
        self.access_log.clear();
    }
}

//! Bounded region cache with LRU eviction.
//!
//! Fetched rectangular regions are keyed by a quantized bounding box plus
//! zoom band, so two viewports that are "close enough" at a given zoom
//! collapse to the same key and cache cardinality stays bounded. Eviction is
//! strict LRU under capacity pressure; popularity-based pruning lives in the
//! band layer on top.

use crate::types::{Entity, GeoBounds};
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Deterministic, zoom-scoped cache key for a bounding box.
///
/// The box edges are quantized to a zoom-band-dependent step before being
/// formatted, so identical inputs always produce the identical key and boxes
/// differing by less than the step share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey(String);

impl RegionKey {
    /// Derive the key for `bounds` at `zoom`, with bands of `band_width`.
    pub fn for_bounds(bounds: &GeoBounds, zoom: f64, band_width: f64) -> Self {
        let band = band_for_zoom(zoom, band_width);
        let step = quantization_step(band, band_width);

        let qs = (bounds.south / step).floor() as i64;
        let qn = (bounds.north / step).floor() as i64;
        let qw = (bounds.west / step).floor() as i64;
        let qe = (bounds.east / step).floor() as i64;

        RegionKey(format!("b{}:{}:{}:{}:{}", band, qw, qs, qe, qn))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a zoom level to its band index via floor division.
pub fn band_for_zoom(zoom: f64, band_width: f64) -> u32 {
    (zoom.max(0.0) / band_width).floor() as u32
}

/// Quantization step in degrees for a zoom band.
///
/// Halves with each effective zoom level so that key granularity tracks
/// viewport size; the exponent is clamped to keep the step representable.
fn quantization_step(band: u32, band_width: f64) -> f64 {
    let exponent = ((band as f64 * band_width).round() as u32 + 2).min(30);
    360.0 / (1u64 << exponent) as f64
}

/// A cached rectangular region and the entities fetched for it.
#[derive(Debug, Clone)]
pub struct CachedRegion {
    pub key: RegionKey,
    /// When this region was last (re)populated.
    pub stored_at: Instant,
    pub entity_count: usize,
    pub entities: Vec<Entity>,
}

impl CachedRegion {
    pub fn new(key: RegionKey, entities: Vec<Entity>, now: Instant) -> Self {
        let entity_count = entities.len();
        Self {
            key,
            stored_at: now,
            entity_count,
            entities,
        }
    }

    /// Whether this region is due for a refresh check.
    ///
    /// The base staleness window shrinks as `1 / sqrt(frequency + 1)`:
    /// frequently revisited regions refresh more eagerly, rarely visited
    /// ones are kept longer before a refresh is suggested (they are not
    /// auto-evicted here).
    pub fn is_due_for_refresh(
        &self,
        now: Instant,
        base_max_age: Duration,
        access_frequency: usize,
    ) -> bool {
        let effective = base_max_age.div_f64(((access_frequency + 1) as f64).sqrt());
        now.duration_since(self.stored_at) > effective
    }
}

/// Capacity-limited, recency-evicted store of cached regions.
pub struct RegionCache {
    inner: LruCache<RegionKey, CachedRegion>,
}

impl RegionCache {
    /// Create a cache holding at most `capacity` regions.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Look up a region, promoting it to most-recently-used.
    pub fn get(&mut self, key: &RegionKey) -> Option<&CachedRegion> {
        self.inner.get(key)
    }

    /// Look up without touching recency order.
    pub fn peek(&self, key: &RegionKey) -> Option<&CachedRegion> {
        self.inner.peek(key)
    }

    /// Insert or refresh a region, evicting the least-recently-used entry
    /// when at capacity. Returns the evicted region, if any.
    pub fn insert(&mut self, region: CachedRegion) -> Option<CachedRegion> {
        match self.inner.push(region.key.clone(), region) {
            // push returns the displaced pair; same-key replacement is a
            // refresh, not an eviction.
            Some((evicted_key, evicted)) if self.inner.peek(&evicted_key).is_none() => {
                log::trace!("region cache evicted {}", evicted_key);
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Remove a specific region, ignoring recency order.
    pub fn remove(&mut self, key: &RegionKey) -> Option<CachedRegion> {
        self.inner.pop(key)
    }

    /// Snapshot of all keys, most-recently-used first.
    pub fn keys(&self) -> Vec<RegionKey> {
        self.inner.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Iterate cached regions, most-recently-used first, without touching
    /// recency order.
    pub fn regions(&self) -> impl Iterator<Item = &CachedRegion> {
        self.inner.iter().map(|(_, region)| region)
    }

    pub fn contains(&self, key: &RegionKey) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionCache")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.cap())
            .finish()
    }
}

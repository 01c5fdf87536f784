//! Core types and configuration for pinmap.
//!
//! This module provides the serializable configuration surface, the entity
//! model consumed by the pipeline, and the viewport/bounds types exchanged
//! with the host map view.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable identifier for a point entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity category used for icons and importance weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Restaurant,
    Cafe,
    Bar,
    FastFood,
    Bakery,
    #[default]
    Other,
}

/// Typed entity payload.
///
/// The payload is a closed record rather than an open property bag: the
/// fields the pipeline reads (category, rating, review presence, weight)
/// have explicit types, and the heavy fields (tags, hours) are the ones
/// stripped by detail-level degradation at low zoom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    #[serde(default)]
    pub category: Category,
    /// Average rating in `[0, 5]`, if known.
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opening hours, opaque to the engine.
    #[serde(default)]
    pub hours: Option<String>,
    /// Importance weight for centroid averaging and selection scoring.
    #[serde(default = "EntityPayload::default_weight")]
    pub weight: f64,
}

impl EntityPayload {
    const fn default_weight() -> f64 {
        1.0
    }

    pub fn has_reviews(&self) -> bool {
        self.review_count > 0
    }

    /// Return a copy reduced to the given detail level.
    ///
    /// `Full` keeps everything, `TagsAndHours` strips review data, and
    /// `Minimal` keeps only the category.
    pub fn degraded(&self, level: DetailLevel) -> EntityPayload {
        match level {
            DetailLevel::Full => self.clone(),
            DetailLevel::TagsAndHours => EntityPayload {
                category: self.category,
                rating: None,
                review_count: 0,
                tags: self.tags.clone(),
                hours: self.hours.clone(),
                weight: self.weight,
            },
            DetailLevel::Minimal => EntityPayload {
                category: self.category,
                rating: None,
                review_count: 0,
                tags: Vec::new(),
                hours: None,
                weight: self.weight,
            },
        }
    }
}

impl Default for EntityPayload {
    fn default() -> Self {
        Self {
            category: Category::default(),
            rating: None,
            review_count: 0,
            tags: Vec::new(),
            hours: None,
            weight: Self::default_weight(),
        }
    }
}

/// A point entity supplied by the data-fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub payload: EntityPayload,
}

impl Entity {
    pub fn new(id: u64, lat: f64, lng: f64, payload: EntityPayload) -> Self {
        Self {
            id: EntityId(id),
            lat,
            lng,
            payload,
        }
    }

    /// Whether the coordinates are finite and within geographic range.
    ///
    /// The spatial index has undefined behavior on malformed coordinates, so
    /// the engine rejects failing entities at the boundary.
    pub fn has_valid_position(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.south.is_finite()
            && self.north.is_finite()
            && self.west.is_finite()
            && self.east.is_finite()
            && self.south <= self.north
            && self.west <= self.east
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }

    /// Expand by a fraction of the box's own width/height on each side.
    pub fn expanded(&self, fraction: f64) -> GeoBounds {
        let lat_margin = (self.north - self.south) * fraction;
        let lng_margin = (self.east - self.west) * fraction;
        GeoBounds {
            south: self.south - lat_margin,
            north: self.north + lat_margin,
            west: self.west - lng_margin,
            east: self.east + lng_margin,
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }
}

/// The visible map rectangle plus zoom, supplied on every pan/zoom settle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(south: f64, north: f64, west: f64, east: f64, zoom: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
            zoom,
        }
    }

    pub fn bounds(&self) -> GeoBounds {
        GeoBounds::new(self.south, self.north, self.west, self.east)
    }

    pub fn is_valid(&self) -> bool {
        self.bounds().is_valid() && self.zoom.is_finite() && self.zoom >= 0.0
    }
}

/// Detail tier applied to cached entities on read.
///
/// At low zoom individual entities are not distinguishable, so heavy payload
/// fields are progressively stripped to reduce snapshot size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// All payload fields.
    Full,
    /// Tags and hours retained, review data stripped.
    TagsAndHours,
    /// Identity, position, and category only.
    Minimal,
}

impl DetailLevel {
    pub fn for_zoom(zoom: f64, full_at: f64, medium_at: f64) -> DetailLevel {
        if zoom >= full_at {
            DetailLevel::Full
        } else if zoom >= medium_at {
            DetailLevel::TagsAndHours
        } else {
            DetailLevel::Minimal
        }
    }
}

/// Engine configuration.
///
/// Designed to be easily serializable and loadable from JSON (or TOML with
/// the `toml` feature) while keeping complexity minimal.
///
/// # Example
///
/// ```rust
/// use pinmap::Config;
///
/// let config = Config::default();
///
/// let json = r#"{
///     "region_cache_capacity": 32,
///     "min_cluster_size": 2,
///     "debounce_interval_ms": 100
/// }"#;
/// let config: Config = Config::from_json(json).unwrap();
/// assert_eq!(config.region_cache_capacity, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum cached regions per zoom band before LRU eviction.
    #[serde(default = "Config::default_region_cache_capacity")]
    pub region_cache_capacity: usize,

    /// Base staleness window in seconds; scaled down for popular regions.
    #[serde(default = "Config::default_base_max_age_secs")]
    pub base_max_age_secs: f64,

    /// Width of a zoom band; each band owns its own cache and index.
    #[serde(default = "Config::default_zoom_band_width")]
    pub zoom_band_width: f64,

    /// Trailing window over which region accesses count toward popularity.
    #[serde(default = "Config::default_popularity_window_secs")]
    pub popularity_window_secs: f64,

    /// Regions with popularity below this are pruned by the periodic pass.
    #[serde(default = "Config::default_popularity_threshold")]
    pub popularity_threshold: usize,

    /// Leaf capacity of the quadtree before subdivision.
    #[serde(default = "Config::default_quadtree_capacity")]
    pub quadtree_capacity: usize,

    /// Maximum quadtree depth; bounds recursion on coincident points.
    #[serde(default = "Config::default_quadtree_max_depth")]
    pub quadtree_max_depth: u8,

    /// Clustering runs only below this zoom; above it points pass through.
    #[serde(default = "Config::default_cluster_zoom_threshold")]
    pub cluster_zoom_threshold: f64,

    /// Zoom at which the cluster search radius equals its base value.
    #[serde(default = "Config::default_cluster_min_zoom")]
    pub cluster_min_zoom: f64,

    /// Cluster search radius at `cluster_min_zoom`, in normalized units.
    #[serde(default = "Config::default_cluster_radius_base")]
    pub cluster_radius_base: f64,

    /// Per-zoom-level decay of the cluster search radius.
    #[serde(default = "Config::default_cluster_radius_decay")]
    pub cluster_radius_decay: f64,

    /// Minimum member count for a group to form a cluster.
    #[serde(default = "Config::default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Duration of a cluster transition animation in milliseconds.
    #[serde(default = "Config::default_transition_duration_ms")]
    pub transition_duration_ms: u64,

    /// Fractional preload margin around the viewport, per side.
    #[serde(default = "Config::default_preload_margin")]
    pub preload_margin: f64,

    /// Additional fractional margin beyond preload before markers are culled.
    #[serde(default = "Config::default_cleanup_margin")]
    pub cleanup_margin: f64,

    /// Quiet interval for viewport debouncing in milliseconds.
    #[serde(default = "Config::default_debounce_interval_ms")]
    pub debounce_interval_ms: u64,

    /// Cells per axis in the density sampling grid.
    #[serde(default = "Config::default_density_grid_size")]
    pub density_grid_size: usize,

    /// Zoom-banded marker budgets as `(zoom_threshold, max_markers)` pairs,
    /// ascending by threshold. The budget of the first threshold at or above
    /// the current zoom applies.
    #[serde(default = "Config::default_marker_budgets")]
    pub marker_budgets: Vec<(f64, usize)>,

    /// Markers created up front (in chunks) when the pool is built.
    #[serde(default = "Config::default_pool_initial_size")]
    pub pool_initial_size: usize,

    /// Pool growth multiplier; growth adds `size * (factor - 1)` markers.
    #[serde(default = "Config::default_pool_growth_factor")]
    pub pool_growth_factor: f64,

    /// Growth triggers when active occupancy exceeds `1 - recycle_threshold`.
    #[serde(default = "Config::default_recycle_threshold")]
    pub recycle_threshold: f64,

    /// Markers created per tick during pool population and growth.
    #[serde(default = "Config::default_pool_chunk_size")]
    pub pool_chunk_size: usize,

    /// Per-tick frame budget in milliseconds.
    #[serde(default = "Config::default_frame_budget_ms")]
    pub frame_budget_ms: f64,

    /// Estimated cost of applying one marker update, in milliseconds.
    #[serde(default = "Config::default_marker_cost_estimate_ms")]
    pub marker_cost_estimate_ms: f64,

    /// Zoom at or above which cached entities are returned at full detail.
    #[serde(default = "Config::default_detail_full_zoom")]
    pub detail_full_zoom: f64,

    /// Zoom at or above which tags and hours are retained.
    #[serde(default = "Config::default_detail_medium_zoom")]
    pub detail_medium_zoom: f64,
}

impl Config {
    const fn default_region_cache_capacity() -> usize {
        64
    }
    const fn default_base_max_age_secs() -> f64 {
        300.0
    }
    const fn default_zoom_band_width() -> f64 {
        2.0
    }
    const fn default_popularity_window_secs() -> f64 {
        86_400.0
    }
    const fn default_popularity_threshold() -> usize {
        3
    }
    const fn default_quadtree_capacity() -> usize {
        16
    }
    const fn default_quadtree_max_depth() -> u8 {
        12
    }
    const fn default_cluster_zoom_threshold() -> f64 {
        15.0
    }
    const fn default_cluster_min_zoom() -> f64 {
        3.0
    }
    const fn default_cluster_radius_base() -> f64 {
        0.08
    }
    const fn default_cluster_radius_decay() -> f64 {
        0.8
    }
    const fn default_min_cluster_size() -> usize {
        3
    }
    const fn default_transition_duration_ms() -> u64 {
        300
    }
    const fn default_preload_margin() -> f64 {
        0.5
    }
    const fn default_cleanup_margin() -> f64 {
        0.25
    }
    const fn default_debounce_interval_ms() -> u64 {
        150
    }
    const fn default_density_grid_size() -> usize {
        8
    }
    fn default_marker_budgets() -> Vec<(f64, usize)> {
        vec![(10.0, 100), (13.0, 250), (16.0, 500), (22.0, 1000)]
    }
    const fn default_pool_initial_size() -> usize {
        128
    }
    const fn default_pool_growth_factor() -> f64 {
        1.5
    }
    const fn default_recycle_threshold() -> f64 {
        0.2
    }
    const fn default_pool_chunk_size() -> usize {
        64
    }
    const fn default_frame_budget_ms() -> f64 {
        16.0
    }
    const fn default_marker_cost_estimate_ms() -> f64 {
        0.05
    }
    const fn default_detail_full_zoom() -> f64 {
        15.0
    }
    const fn default_detail_medium_zoom() -> f64 {
        11.0
    }

    pub fn with_region_cache_capacity(mut self, capacity: usize) -> Self {
        self.region_cache_capacity = capacity;
        self
    }

    pub fn with_base_max_age(mut self, age: Duration) -> Self {
        self.base_max_age_secs = age.as_secs_f64();
        self
    }

    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    pub fn with_cluster_zoom_threshold(mut self, zoom: f64) -> Self {
        self.cluster_zoom_threshold = zoom;
        self
    }

    pub fn with_debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_pool_initial_size(mut self, size: usize) -> Self {
        self.pool_initial_size = size;
        self
    }

    pub fn with_marker_budgets(mut self, budgets: Vec<(f64, usize)>) -> Self {
        self.marker_budgets = budgets;
        self
    }

    pub fn with_popularity_threshold(mut self, threshold: usize) -> Self {
        self.popularity_threshold = threshold;
        self
    }

    pub fn base_max_age(&self) -> Duration {
        Duration::from_secs_f64(self.base_max_age_secs.max(0.0))
    }

    pub fn popularity_window(&self) -> Duration {
        Duration::from_secs_f64(self.popularity_window_secs.max(0.0))
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn transition_duration(&self) -> Duration {
        Duration::from_millis(self.transition_duration_ms)
    }

    /// Marker updates per batch such that estimated batch cost stays under
    /// the frame budget.
    pub fn batch_size(&self) -> usize {
        if self.marker_cost_estimate_ms <= 0.0 {
            return 1;
        }
        ((self.frame_budget_ms / self.marker_cost_estimate_ms) as usize).max(1)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.region_cache_capacity == 0 {
            return Err("Region cache capacity must be greater than zero".to_string());
        }
        if !self.base_max_age_secs.is_finite() || self.base_max_age_secs <= 0.0 {
            return Err("Base max age must be positive and finite".to_string());
        }
        if !self.zoom_band_width.is_finite() || self.zoom_band_width <= 0.0 {
            return Err("Zoom band width must be positive".to_string());
        }
        if self.quadtree_capacity == 0 {
            return Err("Quadtree capacity must be greater than zero".to_string());
        }
        if self.cluster_radius_decay <= 0.0 || self.cluster_radius_decay >= 1.0 {
            return Err("Cluster radius decay must be in (0, 1)".to_string());
        }
        if !self.cluster_radius_base.is_finite() || self.cluster_radius_base <= 0.0 {
            return Err("Cluster radius base must be positive".to_string());
        }
        if self.min_cluster_size < 2 {
            return Err("Minimum cluster size must be at least 2".to_string());
        }
        if !self.preload_margin.is_finite() || self.preload_margin < 0.0 {
            return Err("Preload margin must be non-negative".to_string());
        }
        if !self.cleanup_margin.is_finite() || self.cleanup_margin < 0.0 {
            return Err("Cleanup margin must be non-negative".to_string());
        }
        if self.density_grid_size == 0 {
            return Err("Density grid size must be greater than zero".to_string());
        }
        if self.marker_budgets.is_empty() {
            return Err("Marker budget table must not be empty".to_string());
        }
        if !self.marker_budgets.windows(2).all(|w| w[0].0 < w[1].0) {
            return Err("Marker budget thresholds must be strictly ascending".to_string());
        }
        if self.pool_growth_factor <= 1.0 || !self.pool_growth_factor.is_finite() {
            return Err("Pool growth factor must be greater than 1".to_string());
        }
        if self.recycle_threshold <= 0.0 || self.recycle_threshold >= 1.0 {
            return Err("Recycle threshold must be in (0, 1)".to_string());
        }
        if self.pool_chunk_size == 0 {
            return Err("Pool chunk size must be greater than zero".to_string());
        }
        if !self.frame_budget_ms.is_finite() || self.frame_budget_ms <= 0.0 {
            return Err("Frame budget must be positive".to_string());
        }
        if !self.marker_cost_estimate_ms.is_finite() || self.marker_cost_estimate_ms <= 0.0 {
            return Err("Marker cost estimate must be positive".to_string());
        }
        if self.detail_medium_zoom > self.detail_full_zoom {
            return Err("Medium detail zoom must not exceed full detail zoom".to_string());
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from a TOML string (requires the `toml` feature).
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as a TOML string (requires the `toml` feature).
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region_cache_capacity: Self::default_region_cache_capacity(),
            base_max_age_secs: Self::default_base_max_age_secs(),
            zoom_band_width: Self::default_zoom_band_width(),
            popularity_window_secs: Self::default_popularity_window_secs(),
            popularity_threshold: Self::default_popularity_threshold(),
            quadtree_capacity: Self::default_quadtree_capacity(),
            quadtree_max_depth: Self::default_quadtree_max_depth(),
            cluster_zoom_threshold: Self::default_cluster_zoom_threshold(),
            cluster_min_zoom: Self::default_cluster_min_zoom(),
            cluster_radius_base: Self::default_cluster_radius_base(),
            cluster_radius_decay: Self::default_cluster_radius_decay(),
            min_cluster_size: Self::default_min_cluster_size(),
            transition_duration_ms: Self::default_transition_duration_ms(),
            preload_margin: Self::default_preload_margin(),
            cleanup_margin: Self::default_cleanup_margin(),
            debounce_interval_ms: Self::default_debounce_interval_ms(),
            density_grid_size: Self::default_density_grid_size(),
            marker_budgets: Self::default_marker_budgets(),
            pool_initial_size: Self::default_pool_initial_size(),
            pool_growth_factor: Self::default_pool_growth_factor(),
            recycle_threshold: Self::default_recycle_threshold(),
            pool_chunk_size: Self::default_pool_chunk_size(),
            frame_budget_ms: Self::default_frame_budget_ms(),
            marker_cost_estimate_ms: Self::default_marker_cost_estimate_ms(),
            detail_full_zoom: Self::default_detail_full_zoom(),
            detail_medium_zoom: Self::default_detail_medium_zoom(),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of entities known to the engine.
    pub entity_count: usize,
    /// Regions currently cached across all zoom bands.
    pub region_count: usize,
    /// Markers bound to entities.
    pub active_markers: usize,
    /// Idle markers available for reuse.
    pub recycled_markers: usize,
    /// Update cycles run since creation.
    pub cycles_run: u64,
    /// Marker batches applied since creation.
    pub batches_applied: u64,
    /// Ticks whose work exceeded the frame budget.
    pub budget_overruns: u64,
    /// Clusters emitted by the most recent cycle.
    pub clusters_last_cycle: usize,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&mut self, clusters: usize) {
        self.cycles_run += 1;
        self.clusters_last_cycle = clusters;
    }

    pub fn record_batch(&mut self) {
        self.batches_applied += 1;
    }

    pub fn record_budget_overrun(&mut self) {
        self.budget_overruns += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.region_cache_capacity, 64);
        assert_eq!(config.zoom_band_width, 2.0);
        assert_eq!(config.min_cluster_size, 3);
        assert_eq!(config.pool_initial_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::default()
            .with_region_cache_capacity(16)
            .with_min_cluster_size(2)
            .with_debounce_interval(Duration::from_millis(50))
            .with_pool_initial_size(32);

        assert_eq!(config.region_cache_capacity, 16);
        assert_eq!(config.min_cluster_size, 2);
        assert_eq!(config.debounce_interval(), Duration::from_millis(50));
        assert_eq!(config.pool_initial_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.region_cache_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.pool_growth_factor = 1.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.recycle_threshold = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.marker_budgets = vec![(16.0, 500), (10.0, 100)];
        assert!(config.validate().is_err());

        config = Config::default();
        config.cluster_radius_decay = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default()
            .with_region_cache_capacity(32)
            .with_popularity_threshold(5);

        let json = config.to_json().unwrap();
        let restored = Config::from_json(&json).unwrap();

        assert_eq!(restored.region_cache_capacity, 32);
        assert_eq!(restored.popularity_threshold, 5);
    }

    #[test]
    fn test_config_json_rejects_invalid() {
        let json = r#"{ "region_cache_capacity": 0 }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn test_batch_size_from_budget() {
        let config = Config::default();
        // 16ms budget over 0.05ms per marker
        assert_eq!(config.batch_size(), 320);

        let mut tight = Config::default();
        tight.marker_cost_estimate_ms = 100.0;
        assert_eq!(tight.batch_size(), 1);
    }

    #[test]
    fn test_entity_position_validation() {
        let ok = Entity::new(1, 38.72, -9.14, EntityPayload::default());
        assert!(ok.has_valid_position());

        let nan = Entity::new(2, f64::NAN, -9.14, EntityPayload::default());
        assert!(!nan.has_valid_position());

        let out_of_range = Entity::new(3, 91.0, 0.0, EntityPayload::default());
        assert!(!out_of_range.has_valid_position());

        let bad_lng = Entity::new(4, 0.0, 181.0, EntityPayload::default());
        assert!(!bad_lng.has_valid_position());
    }

    #[test]
    fn test_payload_degradation() {
        let payload = EntityPayload {
            category: Category::Restaurant,
            rating: Some(4.6),
            review_count: 12,
            tags: vec!["vegan".to_string()],
            hours: Some("9-17".to_string()),
            weight: 2.0,
        };

        let full = payload.degraded(DetailLevel::Full);
        assert_eq!(full, payload);

        let medium = payload.degraded(DetailLevel::TagsAndHours);
        assert_eq!(medium.rating, None);
        assert_eq!(medium.review_count, 0);
        assert_eq!(medium.tags, payload.tags);
        assert_eq!(medium.hours, payload.hours);

        let minimal = payload.degraded(DetailLevel::Minimal);
        assert_eq!(minimal.category, Category::Restaurant);
        assert!(minimal.tags.is_empty());
        assert!(minimal.hours.is_none());
    }

    #[test]
    fn test_detail_level_for_zoom() {
        assert_eq!(DetailLevel::for_zoom(16.0, 15.0, 11.0), DetailLevel::Full);
        assert_eq!(
            DetailLevel::for_zoom(12.0, 15.0, 11.0),
            DetailLevel::TagsAndHours
        );
        assert_eq!(DetailLevel::for_zoom(8.0, 15.0, 11.0), DetailLevel::Minimal);
    }

    #[test]
    fn test_bounds_expand_and_contains() {
        let bounds = GeoBounds::new(38.70, 38.75, -9.16, -9.13);
        assert!(bounds.is_valid());
        assert!(bounds.contains(38.72, -9.14));
        assert!(!bounds.contains(38.80, -9.14));

        let expanded = bounds.expanded(0.5);
        assert!(expanded.south < bounds.south);
        assert!(expanded.north > bounds.north);
        assert!(expanded.west < bounds.west);
        assert!(expanded.east > bounds.east);
        // 50% per side: dimensions double
        assert!((expanded.height() - bounds.height() * 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_viewport_validity() {
        let vp = Viewport::new(38.70, 38.75, -9.16, -9.13, 15.0);
        assert!(vp.is_valid());

        let inverted = Viewport::new(38.75, 38.70, -9.16, -9.13, 15.0);
        assert!(!inverted.is_valid());

        let bad_zoom = Viewport::new(38.70, 38.75, -9.16, -9.13, f64::NAN);
        assert!(!bad_zoom.is_valid());
    }

    #[test]
    fn test_engine_stats() {
        let mut stats = EngineStats::new();
        stats.record_cycle(7);
        stats.record_batch();
        stats.record_budget_overrun();

        assert_eq!(stats.cycles_run, 1);
        assert_eq!(stats.clusters_last_cycle, 7);
        assert_eq!(stats.batches_applied, 1);
        assert_eq!(stats.budget_overruns, 1);
    }
}

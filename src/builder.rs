//! Engine builder for flexible configuration
//!
//! This module provides a builder pattern for creating engines with
//! tuned cache, clustering, and marker-pool settings.

use crate::engine::Engine;
use crate::error::Result;
use crate::types::Config;
use std::time::Duration;

/// Builder for engine configuration.
#[derive(Debug)]
pub struct EngineBuilder {
    config: Config,
}

impl EngineBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of cached regions per zoom band.
    pub fn region_cache_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_region_cache_capacity(capacity);
        self
    }

    /// Base staleness window for cached regions.
    pub fn base_max_age(mut self, age: Duration) -> Self {
        self.config = self.config.with_base_max_age(age);
        self
    }

    /// Minimum number of nearby points that form a cluster.
    pub fn min_cluster_size(mut self, size: usize) -> Self {
        self.config = self.config.with_min_cluster_size(size);
        self
    }

    /// Zoom level at and above which clustering is disabled.
    pub fn cluster_zoom_threshold(mut self, zoom: f64) -> Self {
        self.config = self.config.with_cluster_zoom_threshold(zoom);
        self
    }

    /// Quiet period required between viewport selection cycles.
    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_debounce_interval(interval);
        self
    }

    /// Number of marker slots allocated up front.
    pub fn pool_initial_size(mut self, size: usize) -> Self {
        self.config = self.config.with_pool_initial_size(size);
        self
    }

    /// Ascending `(max_zoom, budget)` marker budget table.
    pub fn marker_budgets(mut self, budgets: Vec<(f64, usize)>) -> Self {
        self.config = self.config.with_marker_budgets(budgets);
        self
    }

    /// Minimum recent accesses a region needs to survive popularity pruning.
    pub fn popularity_threshold(mut self, threshold: usize) -> Self {
        self.config = self.config.with_popularity_threshold(threshold);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine> {
        Engine::with_config(self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

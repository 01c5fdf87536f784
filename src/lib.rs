//! Viewport-aware geospatial marker engine with caching, clustering, and
//! pooled marker updates.
//!
//! ```rust
//! use pinmap::{Engine, Entity, EntityPayload, Viewport};
//! use std::time::Instant;
//!
//! let mut engine = Engine::new();
//! engine.insert_entities(vec![
//!     Entity::new(1, 38.7223, -9.1393, EntityPayload::default()),
//!     Entity::new(2, 38.7169, -9.1399, EntityPayload::default()),
//! ]);
//!
//! let viewport = Viewport::new(38.70, 38.75, -9.16, -9.13, 16.0);
//! engine.set_viewport(viewport, Instant::now())?;
//! let frame = engine.tick(Instant::now());
//! # let _ = frame.marker_ops;
//! # Ok::<(), pinmap::PinmapError>(())
//! ```

pub mod bands;
pub mod builder;
pub mod cache;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod marker;
pub mod optimizer;
pub mod projection;
pub mod quadtree;
pub mod types;

pub use builder::EngineBuilder;
pub use engine::{Engine, FrameOutput, TransitionState};
pub use error::{PinmapError, Result};

pub use geo::{Coord, Rect};

pub use bands::{BandedCaches, RegionLookup};
pub use cache::{CachedRegion, RegionCache, RegionKey, band_for_zoom};
pub use cluster::{Cluster, ClusterEngine, Transition};
pub use marker::{
    ElementHandle, MarkerBatch, MarkerChange, MarkerDiff, MarkerDiffer, MarkerId, MarkerOp,
    MarkerPool, MarkerProps, PooledMarker, VirtualMarker,
};
pub use optimizer::{Selection, ViewportDebouncer, ViewportOptimizer};
pub use projection::{MAX_MERCATOR_LAT, project, project_bounds};
pub use quadtree::{IndexEntry, Quadtree};
pub use types::{
    Category, Config, DetailLevel, EngineStats, Entity, EntityId, EntityPayload, GeoBounds,
    Viewport,
};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::builder::EngineBuilder;
    pub use crate::engine::{Engine, FrameOutput};
    pub use crate::error::{PinmapError, Result};
    pub use crate::marker::MarkerOp;
    pub use crate::types::{Config, Entity, EntityId, EntityPayload, GeoBounds, Viewport};
}

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Density clustering with interpolated transitions.
//!
//! Below a configured zoom threshold, nearby points are grouped into
//! clusters around genuine density peaks; above it every point passes
//! through as its own singleton. Clusters are rebuilt from scratch on every
//! pass — identity is re-derived from member composition (the lowest member
//! id), never preserved by reference — and a transition record is emitted
//! whenever a repeated identity moved or changed size, for the host to
//! animate.

use crate::projection::{normalized_distance, project, rect_around};
use crate::quadtree::{IndexEntry, Quadtree};
use crate::types::{Entity, EntityId, GeoBounds};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// An ephemeral, zoom-scoped grouping of nearby points.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// `c:<lowest member id>` for real clusters, `p:<id>` for singletons.
    pub id: String,
    /// Weighted centroid as `(lat, lng)`.
    pub position: (f64, f64),
    pub members: SmallVec<[EntityId; 8]>,
    pub count: usize,
    /// Min/max latitude and longitude over the members.
    pub bounds: GeoBounds,
}

impl Cluster {
    pub fn is_singleton(&self) -> bool {
        self.count == 1
    }
}

/// Links an old cluster state to a new one for interpolated animation.
#[derive(Debug, Clone)]
pub struct Transition {
    pub id: String,
    pub start: (f64, f64),
    pub end: (f64, f64),
    pub started_at: Instant,
    pub duration: Duration,
}

impl Transition {
    /// Linear progress in `[0, 1]` by elapsed time.
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (now.duration_since(self.started_at).as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    /// Interpolated `(lat, lng)` at `now`.
    pub fn position_at(&self, now: Instant) -> (f64, f64) {
        let t = self.progress(now);
        (
            self.start.0 + (self.end.0 - self.start.0) * t,
            self.start.1 + (self.end.1 - self.start.1) * t,
        )
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

#[derive(Debug, Clone, Copy)]
struct ClusterSnapshot {
    position: (f64, f64),
    count: usize,
}

/// Groups candidate points into clusters, tracking changes across passes.
pub struct ClusterEngine {
    zoom_threshold: f64,
    min_zoom: f64,
    radius_base: f64,
    radius_decay: f64,
    min_cluster_size: usize,
    transition_duration: Duration,
    quadtree_capacity: usize,
    quadtree_max_depth: u8,
    previous: FxHashMap<String, ClusterSnapshot>,
    transitions: Vec<Transition>,
}

impl ClusterEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zoom_threshold: f64,
        min_zoom: f64,
        radius_base: f64,
        radius_decay: f64,
        min_cluster_size: usize,
        transition_duration: Duration,
        quadtree_capacity: usize,
        quadtree_max_depth: u8,
    ) -> Self {
        Self {
            zoom_threshold,
            min_zoom,
            radius_base,
            radius_decay,
            min_cluster_size,
            transition_duration,
            quadtree_capacity,
            quadtree_max_depth,
            previous: FxHashMap::default(),
            transitions: Vec::new(),
        }
    }

    /// Whether clustering applies at this zoom.
    pub fn is_active_at(&self, zoom: f64) -> bool {
        zoom < self.zoom_threshold
    }

    /// Search radius in normalized units, shrinking as zoom increases.
    pub fn radius_for_zoom(&self, zoom: f64) -> f64 {
        let steps = (zoom - self.min_zoom).max(0.0);
        self.radius_base * self.radius_decay.powf(steps)
    }

    /// Run one clustering pass over the candidates.
    ///
    /// Every pass rebuilds cluster state from scratch; the previous pass is
    /// only consulted to derive transitions.
    pub fn run(&mut self, candidates: &[&Entity], zoom: f64, now: Instant) -> Vec<Cluster> {
        let clusters = if self.is_active_at(zoom) {
            self.cluster_pass(candidates, zoom)
        } else {
            candidates.iter().map(|e| singleton(e)).collect()
        };

        self.diff_against_previous(&clusters, now);
        clusters
    }

    fn cluster_pass(&self, candidates: &[&Entity], zoom: f64) -> Vec<Cluster> {
        let radius = self.radius_for_zoom(zoom);
        let mut scratch = Quadtree::unit(self.quadtree_capacity, self.quadtree_max_depth);
        let mut by_id: FxHashMap<EntityId, &Entity> = FxHashMap::default();

        for entity in candidates {
            let pos = project(entity.lat, entity.lng);
            if scratch.insert(IndexEntry::new(entity.id, pos)) {
                by_id.insert(entity.id, entity);
            }
        }

        // Process densest points first so clusters form around genuine
        // density peaks rather than input order.
        let mut ordered: Vec<(&Entity, usize)> = by_id
            .values()
            .map(|e| (*e, neighbors_of(&scratch, e, radius).len()))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));

        let mut processed: FxHashSet<EntityId> = FxHashSet::default();
        let mut clusters = Vec::new();

        for (seed, _) in ordered {
            if processed.contains(&seed.id) {
                continue;
            }

            let neighbors: Vec<EntityId> = neighbors_of(&scratch, seed, radius)
                .into_iter()
                .filter(|id| !processed.contains(id))
                .collect();

            if neighbors.len() >= self.min_cluster_size {
                let members: Vec<&Entity> = neighbors.iter().map(|id| by_id[id]).collect();
                for id in &neighbors {
                    processed.insert(*id);
                }
                clusters.push(build_cluster(&members));
            } else {
                processed.insert(seed.id);
                clusters.push(singleton(seed));
            }
        }

        clusters
    }

    fn diff_against_previous(&mut self, clusters: &[Cluster], now: Instant) {
        const CENTROID_EPSILON: f64 = 1e-9;

        let mut next = FxHashMap::default();
        for cluster in clusters {
            if let Some(old) = self.previous.get(&cluster.id) {
                let moved = (old.position.0 - cluster.position.0).abs() > CENTROID_EPSILON
                    || (old.position.1 - cluster.position.1).abs() > CENTROID_EPSILON;
                if moved || old.count != cluster.count {
                    self.transitions.retain(|t| t.id != cluster.id);
                    self.transitions.push(Transition {
                        id: cluster.id.clone(),
                        start: old.position,
                        end: cluster.position,
                        started_at: now,
                        duration: self.transition_duration,
                    });
                }
            }
            next.insert(
                cluster.id.clone(),
                ClusterSnapshot {
                    position: cluster.position,
                    count: cluster.count,
                },
            );
        }
        self.previous = next;
    }

    /// Transitions still in flight; completed ones self-clear.
    pub fn active_transitions(&mut self, now: Instant) -> &[Transition] {
        self.transitions.retain(|t| !t.is_finished(now));
        &self.transitions
    }

    pub fn clear(&mut self) {
        self.previous.clear();
        self.transitions.clear();
    }
}

fn neighbors_of(scratch: &Quadtree, entity: &Entity, radius: f64) -> Vec<EntityId> {
    let pos = project(entity.lat, entity.lng);
    scratch
        .query(&rect_around(pos, radius))
        .into_iter()
        .filter(|e| normalized_distance(e.pos, pos) <= radius)
        .map(|e| e.id)
        .collect()
}

fn singleton(entity: &Entity) -> Cluster {
    Cluster {
        id: format!("p:{}", entity.id),
        position: (entity.lat, entity.lng),
        members: SmallVec::from_slice(&[entity.id]),
        count: 1,
        bounds: GeoBounds::new(entity.lat, entity.lat, entity.lng, entity.lng),
    }
}

fn build_cluster(members: &[&Entity]) -> Cluster {
    let mut weight_sum = 0.0;
    let mut lat_sum = 0.0;
    let mut lng_sum = 0.0;
    let mut south = f64::INFINITY;
    let mut north = f64::NEG_INFINITY;
    let mut west = f64::INFINITY;
    let mut east = f64::NEG_INFINITY;
    let mut lowest_id = EntityId(u64::MAX);

    for member in members {
        let weight = member.payload.weight.max(f64::EPSILON);
        weight_sum += weight;
        lat_sum += member.lat * weight;
        lng_sum += member.lng * weight;
        south = south.min(member.lat);
        north = north.max(member.lat);
        west = west.min(member.lng);
        east = east.max(member.lng);
        lowest_id = lowest_id.min(member.id);
    }

    Cluster {
        id: format!("c:{}", lowest_id),
        position: (lat_sum / weight_sum, lng_sum / weight_sum),
        members: members.iter().map(|m| m.id).collect(),
        count: members.len(),
        bounds: GeoBounds::new(south, north, west, east),
    }
}

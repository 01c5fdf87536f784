//! Viewport-driven marker selection and debounced viewport intake.
//!
//! The optimizer decides which entities deserve a marker for a given
//! viewport: it expands the viewport by a preload margin, caps the result at
//! a zoom-dependent budget, and when over budget keeps high-importance
//! entities from low-density areas first so dense downtown blocks do not
//! monopolize the budget. A trailing-edge debouncer in front of it coalesces
//! rapid pan/zoom updates into one selection pass.

use crate::types::{Category, Entity, EntityId, GeoBounds, Viewport};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Outcome of one selection pass.
#[derive(Debug, Default)]
pub struct Selection {
    /// Entities inside the visible viewport, within budget.
    pub visible: Vec<EntityId>,
    /// Entities in the preload margin only; indexed but not shown.
    pub preload: Vec<EntityId>,
    /// Previously tracked entities kept despite leaving the viewport.
    pub retained: Vec<EntityId>,
    /// Previously tracked entities now outside the cleanup boundary.
    pub removed: Vec<EntityId>,
}

/// Selects which entities to materialize for a viewport.
pub struct ViewportOptimizer {
    preload_margin: f64,
    cleanup_margin: f64,
    grid_size: usize,
    /// Ascending `(max_zoom, budget)` table.
    budgets: Vec<(f64, usize)>,
    tracked: FxHashMap<EntityId, (f64, f64)>,
}

impl ViewportOptimizer {
    pub fn new(
        preload_margin: f64,
        cleanup_margin: f64,
        grid_size: usize,
        budgets: Vec<(f64, usize)>,
    ) -> Self {
        Self {
            preload_margin,
            cleanup_margin,
            grid_size: grid_size.max(1),
            budgets,
            tracked: FxHashMap::default(),
        }
    }

    /// Marker budget for a zoom level from the ascending table; past the
    /// last row the last budget applies.
    pub fn budget_for_zoom(&self, zoom: f64) -> usize {
        for (max_zoom, budget) in &self.budgets {
            if zoom <= *max_zoom {
                return *budget;
            }
        }
        self.budgets.last().map(|(_, b)| *b).unwrap_or(usize::MAX)
    }

    /// Preload bounds: the viewport expanded by the preload margin.
    pub fn preload_bounds(&self, viewport: &Viewport) -> GeoBounds {
        viewport.bounds().expanded(self.preload_margin)
    }

    /// Run one selection pass over `candidates` for `viewport`.
    ///
    /// Tracked positions persist across passes so retention and cleanup can
    /// be judged against the new viewport.
    pub fn select(&mut self, candidates: &[&Entity], viewport: &Viewport) -> Selection {
        let visible_bounds = viewport.bounds();
        let preload_bounds = self.preload_bounds(viewport);
        let cleanup_bounds = preload_bounds.expanded(self.cleanup_margin);
        let budget = self.budget_for_zoom(viewport.zoom);

        let mut in_view: Vec<&Entity> = Vec::new();
        let mut in_margin: Vec<&Entity> = Vec::new();
        for entity in candidates {
            if visible_bounds.contains(entity.lat, entity.lng) {
                in_view.push(entity);
            } else if preload_bounds.contains(entity.lat, entity.lng) {
                in_margin.push(entity);
            }
        }

        if in_view.len() > budget {
            in_view = self.thin_by_density(in_view, &visible_bounds, budget);
        }

        let mut selection = Selection::default();
        let mut next_tracked = FxHashMap::default();
        for entity in &in_view {
            selection.visible.push(entity.id);
            next_tracked.insert(entity.id, (entity.lat, entity.lng));
        }
        for entity in &in_margin {
            selection.preload.push(entity.id);
            next_tracked.insert(entity.id, (entity.lat, entity.lng));
        }

        // Previously tracked entities that fell out of this pass are kept
        // while still inside the cleanup boundary, removed beyond it.
        for (id, (lat, lng)) in &self.tracked {
            if next_tracked.contains_key(id) {
                continue;
            }
            if cleanup_bounds.contains(*lat, *lng) {
                selection.retained.push(*id);
                next_tracked.insert(*id, (*lat, *lng));
            } else {
                selection.removed.push(*id);
            }
        }

        log::debug!(
            "viewport selection: {} visible, {} preload, {} retained, {} removed (budget {})",
            selection.visible.len(),
            selection.preload.len(),
            selection.retained.len(),
            selection.removed.len(),
            budget
        );

        self.tracked = next_tracked;
        selection
    }

    /// Keep the `budget` best entities, scoring importance against local
    /// density over a coarse grid so sparse areas keep representation.
    fn thin_by_density<'a>(
        &self,
        entities: Vec<&'a Entity>,
        bounds: &GeoBounds,
        budget: usize,
    ) -> Vec<&'a Entity> {
        let mut cell_counts: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        for entity in &entities {
            *cell_counts
                .entry(self.cell_of(entity, bounds))
                .or_insert(0) += 1;
        }

        let mut scored: Vec<(f64, &Entity)> = entities
            .into_iter()
            .map(|entity| {
                let density = cell_counts[&self.cell_of(entity, bounds)];
                (importance(entity) / (density as f64 + 1.0), entity)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.id.cmp(&b.1.id))
        });
        scored.truncate(budget);
        scored.into_iter().map(|(_, e)| e).collect()
    }

    fn cell_of(&self, entity: &Entity, bounds: &GeoBounds) -> (usize, usize) {
        let n = self.grid_size;
        let fx = ((entity.lng - bounds.west) / bounds.width()).clamp(0.0, 1.0);
        let fy = ((entity.lat - bounds.south) / bounds.height()).clamp(0.0, 1.0);
        (
            ((fx * n as f64) as usize).min(n - 1),
            ((fy * n as f64) as usize).min(n - 1),
        )
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
    }
}

/// Intrinsic importance of an entity, independent of its surroundings.
fn importance(entity: &Entity) -> f64 {
    let payload = &entity.payload;
    let mut score = payload.weight;

    score += (payload.review_count as f64 / 100.0).min(2.0);
    if let Some(rating) = payload.rating {
        if rating >= 4.5 {
            score += 1.5;
        } else if rating >= 4.0 {
            score += 0.5;
        }
    }
    score += match payload.category {
        Category::Restaurant => 0.5,
        Category::Cafe | Category::Bar => 0.3,
        _ => 0.0,
    };

    score
}

#[derive(Debug)]
enum DebounceState {
    Idle,
    Pending { viewport: Viewport, deadline: Instant },
}

/// Trailing-edge debouncer for viewport changes.
///
/// The first change after a quiet period passes through immediately; changes
/// arriving inside the interval are coalesced, and the latest one is released
/// once the interval elapses. Callers drive it by polling.
#[derive(Debug)]
pub struct ViewportDebouncer {
    interval: Duration,
    state: DebounceState,
    last_accepted: Option<Instant>,
}

impl ViewportDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: DebounceState::Idle,
            last_accepted: None,
        }
    }

    /// Offer a new viewport. Returns it if it should be processed right
    /// away; otherwise it is held as the pending candidate.
    pub fn submit(&mut self, viewport: Viewport, now: Instant) -> Option<Viewport> {
        let quiet = match self.last_accepted {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        };

        if quiet && matches!(self.state, DebounceState::Idle) {
            self.last_accepted = Some(now);
            return Some(viewport);
        }

        // Keep only the latest candidate; the deadline extends with each
        // submission (trailing edge).
        self.state = DebounceState::Pending {
            viewport,
            deadline: now + self.interval,
        };
        None
    }

    /// Release the pending viewport once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Viewport> {
        if let DebounceState::Pending { viewport, deadline } = &self.state
            && now >= *deadline
        {
            let viewport = *viewport;
            self.state = DebounceState::Idle;
            self.last_accepted = Some(now);
            return Some(viewport);
        }
        None
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    pub fn clear(&mut self) {
        self.state = DebounceState::Idle;
        self.last_accepted = None;
    }
}

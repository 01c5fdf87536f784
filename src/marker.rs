//! Marker pooling, diffing, and frame-budgeted batch application.
//!
//! The host environment treats marker elements as expensive to create and
//! destroy, so the engine maintains a pool of reusable marker slots, computes
//! minimal diffs between successive virtual marker sets, and applies those
//! diffs in bounded batches so no single frame takes an unbounded hit.

use crate::types::{Category, Entity, EntityId};
use rustc_hash::FxHashMap;

/// Handle to a host-side marker element, attached by the host after an
/// upsert op and carried with the slot through recycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Pool-internal slot identifier; stable for the life of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub usize);

/// Display-relevant marker state; two markers with equal props render
/// identically.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerProps {
    pub category: Category,
    pub rating: Option<f32>,
    pub has_reviews: bool,
}

/// The desired state of one marker, derived from an entity each cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMarker {
    pub entity: EntityId,
    /// `(lat, lng)`.
    pub position: (f64, f64),
    pub visible: bool,
    pub props: MarkerProps,
}

impl VirtualMarker {
    pub fn for_entity(entity: &Entity, visible: bool) -> Self {
        Self {
            entity: entity.id,
            position: (entity.lat, entity.lng),
            visible,
            props: MarkerProps {
                category: entity.payload.category,
                rating: entity.payload.rating,
                has_reviews: entity.payload.has_reviews(),
            },
        }
    }
}

/// A reusable marker slot.
#[derive(Debug)]
pub struct PooledMarker {
    pub id: MarkerId,
    /// Host element, once attached. Survives recycling so the element is
    /// reused rather than recreated.
    pub element: Option<ElementHandle>,
    pub bound_to: Option<EntityId>,
    pub position: (f64, f64),
    pub visible: bool,
    pub props: Option<MarkerProps>,
}

impl PooledMarker {
    fn new(id: MarkerId) -> Self {
        Self {
            id,
            element: None,
            bound_to: None,
            position: (0.0, 0.0),
            visible: false,
            props: None,
        }
    }

    fn reset(&mut self) {
        self.bound_to = None;
        self.visible = false;
        self.props = None;
    }
}

/// Fixed-slot marker pool with chunked growth.
///
/// Every slot is always either bound to an entity or on the recycled list,
/// so `active() + recycled() == total()` holds at all times. Growth happens
/// one chunk per frame via [`MarkerPool::grow_chunk`] to avoid allocation
/// spikes.
#[derive(Debug)]
pub struct MarkerPool {
    markers: Vec<PooledMarker>,
    active: FxHashMap<EntityId, MarkerId>,
    recycled: Vec<MarkerId>,
    pending_growth: usize,
    growth_factor: f64,
    /// Fraction of the pool kept free; occupancy above `1 - threshold`
    /// schedules growth before the free list actually runs dry.
    recycle_threshold: f64,
    chunk_size: usize,
}

impl MarkerPool {
    pub fn new(
        initial_size: usize,
        growth_factor: f64,
        recycle_threshold: f64,
        chunk_size: usize,
    ) -> Self {
        let mut pool = Self {
            markers: Vec::with_capacity(initial_size),
            active: FxHashMap::default(),
            recycled: Vec::with_capacity(initial_size),
            pending_growth: 0,
            growth_factor: growth_factor.max(1.0),
            recycle_threshold: recycle_threshold.clamp(0.0, 1.0),
            chunk_size: chunk_size.max(1),
        };
        pool.extend_by(initial_size);
        pool
    }

    fn extend_by(&mut self, count: usize) {
        for _ in 0..count {
            let id = MarkerId(self.markers.len());
            self.markers.push(PooledMarker::new(id));
            self.recycled.push(id);
        }
    }

    /// Bind a slot to `entity`, reusing its existing slot when already
    /// active. Growth is scheduled as soon as occupancy crosses the recycle
    /// threshold; if the free list is already empty, `None` is returned and
    /// the caller retries after the next [`grow_chunk`].
    ///
    /// [`grow_chunk`]: MarkerPool::grow_chunk
    pub fn acquire(&mut self, entity: EntityId) -> Option<MarkerId> {
        if let Some(id) = self.active.get(&entity) {
            return Some(*id);
        }
        match self.recycled.pop() {
            Some(id) => {
                self.markers[id.0].bound_to = Some(entity);
                self.active.insert(entity, id);
                let occupancy_limit = (1.0 - self.recycle_threshold) * self.markers.len() as f64;
                if self.active.len() as f64 > occupancy_limit {
                    self.schedule_growth();
                }
                Some(id)
            }
            None => {
                self.schedule_growth();
                None
            }
        }
    }

    /// Return an entity's slot to the free list. The host element stays
    /// attached to the slot.
    pub fn release(&mut self, entity: EntityId) -> Option<MarkerId> {
        let id = self.active.remove(&entity)?;
        self.markers[id.0].reset();
        self.recycled.push(id);
        Some(id)
    }

    fn schedule_growth(&mut self) {
        if self.pending_growth > 0 {
            return;
        }
        let target = ((self.markers.len() as f64 * self.growth_factor) as usize)
            .max(self.markers.len() + self.chunk_size);
        self.pending_growth = target - self.markers.len();
        log::debug!(
            "marker pool at {} slots, scheduling growth of {}",
            self.markers.len(),
            self.pending_growth
        );
    }

    /// Materialize at most one chunk of scheduled growth. Called once per
    /// frame so allocation cost is spread over time.
    pub fn grow_chunk(&mut self) -> usize {
        let step = self.pending_growth.min(self.chunk_size);
        if step > 0 {
            self.extend_by(step);
            self.pending_growth -= step;
        }
        step
    }

    pub fn attach_element(&mut self, id: MarkerId, element: ElementHandle) {
        if let Some(slot) = self.markers.get_mut(id.0) {
            slot.element = Some(element);
        }
    }

    pub fn get(&self, id: MarkerId) -> Option<&PooledMarker> {
        self.markers.get(id.0)
    }

    pub fn get_mut(&mut self, id: MarkerId) -> Option<&mut PooledMarker> {
        self.markers.get_mut(id.0)
    }

    pub fn slot_of(&self, entity: EntityId) -> Option<MarkerId> {
        self.active.get(&entity).copied()
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn recycled(&self) -> usize {
        self.recycled.len()
    }

    pub fn total(&self) -> usize {
        self.markers.len()
    }

    /// Release every active slot. Elements stay attached for reuse.
    pub fn clear(&mut self) {
        let bound: Vec<EntityId> = self.active.keys().copied().collect();
        for entity in bound {
            self.release(entity);
        }
    }
}

/// One entry of a marker diff.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerChange {
    Upsert(VirtualMarker),
    Remove(EntityId),
}

/// Minimal difference between two successive virtual marker sets.
#[derive(Debug, Default)]
pub struct MarkerDiff {
    pub changes: Vec<MarkerChange>,
}

impl MarkerDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Computes minimal diffs against the previously committed marker set.
#[derive(Debug, Default)]
pub struct MarkerDiffer {
    previous: FxHashMap<EntityId, VirtualMarker>,
}

impl MarkerDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `next` against the last committed set and commit it.
    ///
    /// A marker present in both sets with deep-equal state produces no
    /// change at all.
    pub fn diff(&mut self, next: FxHashMap<EntityId, VirtualMarker>) -> MarkerDiff {
        let mut changes = Vec::new();

        for (entity, marker) in &next {
            match self.previous.get(entity) {
                Some(old) if old == marker => {}
                _ => changes.push(MarkerChange::Upsert(marker.clone())),
            }
        }
        for entity in self.previous.keys() {
            if !next.contains_key(entity) {
                changes.push(MarkerChange::Remove(*entity));
            }
        }

        self.previous = next;
        MarkerDiff { changes }
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }
}

/// A slice of a diff small enough to apply within one frame budget.
#[derive(Debug)]
pub struct MarkerBatch {
    /// Epoch the batch was planned under; stale batches are dropped.
    pub epoch: u64,
    pub changes: Vec<MarkerChange>,
}

/// Split a diff into batches of at most `batch_size` changes.
pub fn plan_batches(diff: MarkerDiff, batch_size: usize, epoch: u64) -> Vec<MarkerBatch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut changes = diff.changes;

    while !changes.is_empty() {
        let rest = changes.split_off(changes.len().min(batch_size));
        batches.push(MarkerBatch { epoch, changes });
        changes = rest;
    }
    batches
}

/// Instruction for the host renderer, produced by applying a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOp {
    /// Create or update the element in slot `marker` to match the state.
    Upsert {
        marker: MarkerId,
        element: Option<ElementHandle>,
        state: VirtualMarker,
    },
    /// Hide the element in slot `marker`; the slot has been recycled.
    Recycle {
        marker: MarkerId,
        element: Option<ElementHandle>,
    },
}

/// Apply one batch to the pool, translating changes into host ops.
///
/// Batches planned before the last [`MarkerPool::clear`] carry an older
/// epoch and are dropped wholesale, so a stale pan cannot resurrect markers
/// after a reset. Upserts that find the pool exhausted come back as
/// deferred changes; the caller re-queues them for a later frame, after
/// scheduled growth has materialized.
pub fn apply_batch(
    pool: &mut MarkerPool,
    batch: MarkerBatch,
    current_epoch: u64,
) -> (Vec<MarkerOp>, Vec<MarkerChange>) {
    if batch.epoch != current_epoch {
        log::trace!(
            "dropping stale marker batch (epoch {} != {})",
            batch.epoch,
            current_epoch
        );
        return (Vec::new(), Vec::new());
    }

    let mut ops = Vec::with_capacity(batch.changes.len());
    let mut deferred = Vec::new();
    for change in batch.changes {
        match change {
            MarkerChange::Upsert(state) => match pool.acquire(state.entity) {
                Some(id) => {
                    let slot = pool
                        .get_mut(id)
                        .filter(|s| s.bound_to == Some(state.entity));
                    if let Some(slot) = slot {
                        slot.position = state.position;
                        slot.visible = state.visible;
                        slot.props = Some(state.props.clone());
                        ops.push(MarkerOp::Upsert {
                            marker: id,
                            element: slot.element,
                            state,
                        });
                    }
                }
                None => deferred.push(MarkerChange::Upsert(state)),
            },
            MarkerChange::Remove(entity) => {
                if let Some(id) = pool.release(entity) {
                    let element = pool.get(id).and_then(|s| s.element);
                    ops.push(MarkerOp::Recycle {
                        marker: id,
                        element,
                    });
                }
            }
        }
    }
    (ops, deferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityPayload;

    fn entity(id: u64) -> Entity {
        Entity::new(id, 38.72, -9.14, EntityPayload::default())
    }

    fn marker_map(entities: &[Entity]) -> FxHashMap<EntityId, VirtualMarker> {
        entities
            .iter()
            .map(|e| (e.id, VirtualMarker::for_entity(e, true)))
            .collect()
    }

    fn assert_conserved(pool: &MarkerPool) {
        assert_eq!(pool.active() + pool.recycled(), pool.total());
    }

    #[test]
    fn test_pool_acquire_release_conservation() {
        let mut pool = MarkerPool::new(4, 1.5, 0.2, 2);
        assert_conserved(&pool);

        let a = pool.acquire(EntityId(1)).unwrap();
        let b = pool.acquire(EntityId(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.active(), 2);
        assert_conserved(&pool);

        // Re-acquiring a bound entity returns its existing slot.
        assert_eq!(pool.acquire(EntityId(1)), Some(a));
        assert_eq!(pool.active(), 2);

        pool.release(EntityId(1));
        assert_eq!(pool.active(), 1);
        assert_conserved(&pool);

        // Released slot is reused.
        let c = pool.acquire(EntityId(3)).unwrap();
        assert_eq!(c, a);
        assert_conserved(&pool);
    }

    #[test]
    fn test_pool_exhaustion_schedules_chunked_growth() {
        let mut pool = MarkerPool::new(2, 2.0, 0.2, 1);
        pool.acquire(EntityId(1)).unwrap();
        pool.acquire(EntityId(2)).unwrap();

        // Exhausted: acquire defers and schedules growth to 4 slots.
        assert!(pool.acquire(EntityId(3)).is_none());
        assert_eq!(pool.total(), 2);

        // One chunk per call.
        assert_eq!(pool.grow_chunk(), 1);
        assert_eq!(pool.total(), 3);
        assert!(pool.acquire(EntityId(3)).is_some());
        assert_conserved(&pool);

        assert_eq!(pool.grow_chunk(), 1);
        assert_eq!(pool.grow_chunk(), 0);
        assert_eq!(pool.total(), 4);
        assert_conserved(&pool);
    }

    #[test]
    fn test_element_survives_recycling() {
        let mut pool = MarkerPool::new(1, 1.5, 0.2, 1);
        let id = pool.acquire(EntityId(1)).unwrap();
        pool.attach_element(id, ElementHandle(42));

        pool.release(EntityId(1));
        let id2 = pool.acquire(EntityId(2)).unwrap();
        assert_eq!(id, id2);
        assert_eq!(pool.get(id2).unwrap().element, Some(ElementHandle(42)));
    }

    #[test]
    fn test_differ_emits_minimal_changes() {
        let mut differ = MarkerDiffer::new();
        let entities = [entity(1), entity(2), entity(3)];

        let first = differ.diff(marker_map(&entities));
        assert_eq!(first.len(), 3);

        // Identical set: empty diff.
        let second = differ.diff(marker_map(&entities));
        assert!(second.is_empty());

        // One moved, one removed, one added.
        let mut moved = entity(1);
        moved.lat += 0.001;
        let third = differ.diff(marker_map(&[moved, entity(2), entity(4)]));
        assert_eq!(third.len(), 3);
        let upserts: Vec<EntityId> = third
            .changes
            .iter()
            .filter_map(|c| match c {
                MarkerChange::Upsert(m) => Some(m.entity),
                _ => None,
            })
            .collect();
        assert!(upserts.contains(&EntityId(1)));
        assert!(upserts.contains(&EntityId(4)));
        assert!(!upserts.contains(&EntityId(2)));
        assert!(third.changes.contains(&MarkerChange::Remove(EntityId(3))));
    }

    #[test]
    fn test_plan_batches_splits_by_size() {
        let mut differ = MarkerDiffer::new();
        let entities: Vec<Entity> = (0..10).map(entity).collect();
        let diff = differ.diff(marker_map(&entities));

        let batches = plan_batches(diff, 4, 7);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].changes.len(), 4);
        assert_eq!(batches[1].changes.len(), 4);
        assert_eq!(batches[2].changes.len(), 2);
        assert!(batches.iter().all(|b| b.epoch == 7));
    }

    #[test]
    fn test_apply_batch_produces_ops() {
        let mut pool = MarkerPool::new(8, 1.5, 0.2, 4);
        let mut differ = MarkerDiffer::new();
        let entities = [entity(1), entity(2)];
        let diff = differ.diff(marker_map(&entities));

        let batches = plan_batches(diff, 10, 0);
        let (ops, deferred) = apply_batch(&mut pool, batches.into_iter().next().unwrap(), 0);
        assert_eq!(ops.len(), 2);
        assert!(deferred.is_empty());
        assert!(ops.iter().all(|op| matches!(op, MarkerOp::Upsert { .. })));
        assert_eq!(pool.active(), 2);
        assert_conserved(&pool);

        // Removal recycles the slot.
        let diff = differ.diff(marker_map(&[entity(1)]));
        let batch = plan_batches(diff, 10, 0).remove(0);
        let (ops, _) = apply_batch(&mut pool, batch, 0);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], MarkerOp::Recycle { .. }));
        assert_eq!(pool.active(), 1);
        assert_conserved(&pool);
    }

    #[test]
    fn test_stale_epoch_batch_dropped() {
        let mut pool = MarkerPool::new(4, 1.5, 0.2, 2);
        let mut differ = MarkerDiffer::new();
        let diff = differ.diff(marker_map(&[entity(1)]));
        let batch = plan_batches(diff, 10, 3).remove(0);

        let (ops, deferred) = apply_batch(&mut pool, batch, 4);
        assert!(ops.is_empty());
        assert!(deferred.is_empty());
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_pool_exhaustion_defers_upsert() {
        let mut pool = MarkerPool::new(1, 1.5, 0.2, 1);
        let mut differ = MarkerDiffer::new();
        let diff = differ.diff(marker_map(&[entity(1), entity(2)]));
        let batch = plan_batches(diff, 10, 0).remove(0);

        let (ops, deferred) = apply_batch(&mut pool, batch, 0);
        assert_eq!(pool.active(), 1);
        assert_eq!(ops.len(), 1);
        assert_eq!(deferred.len(), 1);
        assert_conserved(&pool);

        // After growth the deferred change applies cleanly.
        pool.grow_chunk();
        let retry = MarkerBatch {
            epoch: 0,
            changes: deferred,
        };
        let (ops, deferred) = apply_batch(&mut pool, retry, 0);
        assert_eq!(ops.len(), 1);
        assert!(deferred.is_empty());
        assert_eq!(pool.active(), 2);
        assert_conserved(&pool);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut pool = MarkerPool::new(4, 1.5, 0.2, 2);
        for i in 0..4 {
            pool.acquire(EntityId(i)).unwrap();
        }
        pool.clear();
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.recycled(), 4);
        assert_conserved(&pool);
    }
}

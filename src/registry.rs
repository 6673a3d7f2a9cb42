//! Top-level collection of boxes.
//!
//! One [`BoxEntry`] per competition box: the authoritative [`BoxState`]
//! behind a `parking_lot::Mutex` (never held across an `await`, per spec.md
//! §5) plus that box's [`BoxHub`] fan-out set. Grounded on the teacher's
//! `DashMap<Id, Arc<...>>` registries (e.g.
//! `knhk-workflow-engine/src/services/timer.rs`'s `TimerRegistry`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::box_state::BoxState;
use crate::hub::BoxHub;

pub struct BoxEntry {
    pub state: Mutex<BoxState>,
    /// Operator channel: full `Event`/`STATE_SNAPSHOT` frames (spec.md §4.E).
    pub hub: BoxHub,
    /// Per-box spectator channel: redacted `PublicSnapshot`-based frames
    /// only (spec.md §4.F, §4.H).
    pub public_hub: BoxHub,
    /// Display label for the public channel (spec.md §4.F `categorie`); not
    /// part of the authoritative state machine itself.
    pub categorie: Mutex<String>,
}

impl BoxEntry {
    fn new(box_id: u32, routes_count: u32, default_time_criterion: bool, categorie: String, queue_depth: usize) -> Self {
        Self {
            state: Mutex::new(BoxState::new(box_id, routes_count, default_time_criterion)),
            hub: BoxHub::new(queue_depth),
            public_hub: BoxHub::new(queue_depth),
            categorie: Mutex::new(categorie),
        }
    }
}

/// `DashMap<box_id, Arc<BoxEntry>>` — boxes are created by roster upload and
/// removed by admin deletion (spec.md §10.5); lookups never block on a
/// specific box's lock, only on the map's own sharded locks.
pub struct BoxRegistry {
    boxes: DashMap<u32, Arc<BoxEntry>>,
    /// Cross-box aggregate channel (spec.md §4.H `/api/public/ws`): every
    /// committed box's redacted update also fans out here.
    pub aggregate_hub: BoxHub,
    queue_depth: usize,
    /// Set once by `Dispatcher::quiesce_all` during graceful shutdown (spec.md
    /// §5), so connection tasks can tell a deliberate, whole-server quiesce
    /// apart from one box being individually admin-deleted.
    shutting_down: AtomicBool,
}

impl BoxRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            boxes: DashMap::new(),
            aggregate_hub: BoxHub::new(queue_depth),
            queue_depth,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Create (or replace) a box, e.g. on roster upload for a fresh event.
    pub fn create_box(
        &self,
        box_id: u32,
        routes_count: u32,
        default_time_criterion: bool,
        categorie: impl Into<String>,
    ) -> Arc<BoxEntry> {
        let entry = Arc::new(BoxEntry::new(
            box_id,
            routes_count,
            default_time_criterion,
            categorie.into(),
            self.queue_depth,
        ));
        self.boxes.insert(box_id, entry.clone());
        entry
    }

    pub fn get(&self, box_id: u32) -> Option<Arc<BoxEntry>> {
        self.boxes.get(&box_id).map(|e| e.clone())
    }

    /// `DELETE /api/admin/box/{boxId}` (SPEC_FULL.md §10.5): removes the box
    /// so its subscribers can be closed with `4409 box_removed`.
    pub fn remove(&self, box_id: u32) -> Option<Arc<BoxEntry>> {
        self.boxes.remove(&box_id).map(|(_, e)| e)
    }

    pub fn box_ids(&self) -> Vec<u32> {
        self.boxes.iter().map(|e| *e.key()).collect()
    }

    pub fn all(&self) -> Vec<(u32, Arc<BoxEntry>)> {
        self.boxes.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_roundtrips() {
        let registry = BoxRegistry::new(8);
        registry.create_box(1, 3, true, "Women Final");
        let entry = registry.get(1).unwrap();
        assert_eq!(entry.state.lock().box_id, 1);
        assert_eq!(*entry.categorie.lock(), "Women Final");
    }

    #[test]
    fn remove_drops_the_box() {
        let registry = BoxRegistry::new(8);
        registry.create_box(5, 1, false, "Men Semi");
        assert!(registry.remove(5).is_some());
        assert!(registry.get(5).is_none());
    }

    #[test]
    fn unknown_box_is_none() {
        let registry = BoxRegistry::new(8);
        assert!(registry.get(99).is_none());
    }
}

//! Reference-counted membership of entity rooms.
//!
//! Two caller classes hold rooms open: job tracking (a room per entity
//! with running jobs) and per-screen lifetime (the detail screen for one
//! restaurant). They can add and drop the same entity independently, so
//! membership is counted rather than boolean-toggled; a screen leaving
//! never tears down a room job tracking still needs.

use std::collections::HashMap;

use sync_core::EntityId;

#[derive(Debug, Default)]
pub struct RoomSet {
    holds: HashMap<EntityId, u32>,
}

impl RoomSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a hold on an entity's room. Returns `true` when this is the
    /// first hold, i.e. the caller must emit a subscribe request.
    pub fn acquire(&mut self, entity_id: EntityId) -> bool {
        let count = self.holds.entry(entity_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a hold. Returns `true` when it was the last one, i.e. the
    /// caller must emit an unsubscribe request. Releasing a non-member is
    /// a safe no-op.
    pub fn release(&mut self, entity_id: EntityId) -> bool {
        match self.holds.get_mut(&entity_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.holds.remove(&entity_id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.holds.contains_key(&entity_id)
    }

    /// Entities with at least one hold, sorted for stable output.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self.holds.keys().copied().collect();
        entities.sort_unstable();
        entities
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}

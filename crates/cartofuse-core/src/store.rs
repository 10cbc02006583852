//! Arena of live features addressed by [`FeatureId`].
//!
//! Features live in a dense slot vector. Removing a feature empties its
//! slot and records it on a free list, so slots never shift and the
//! surviving features can be read back in a stable order.

use std::collections::HashMap;

use crate::types::{Feature, FeatureId};

/// Owning store of live features.
#[derive(Debug, Default)]
pub struct FeatureStore {
    slots: Vec<Option<Feature>>,
    by_id: HashMap<FeatureId, usize>,
    free: Vec<usize>,
}

impl FeatureStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `capacity` features.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            by_id: HashMap::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Store a feature, reusing a freed slot when one is available.
    ///
    /// Returns the slot index.
    pub fn insert(&mut self, feature: Feature) -> usize {
        let id = feature.id();
        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(feature);
            slot
        } else {
            self.slots.push(Some(feature));
            self.slots.len() - 1
        };
        self.by_id.insert(id, slot);
        slot
    }

    /// Take a feature out of the store. `None` if `id` is not live.
    pub fn remove(&mut self, id: FeatureId) -> Option<Feature> {
        let slot = self.by_id.remove(&id)?;
        self.free.push(slot);
        self.slots[slot].take()
    }

    /// Borrow a live feature.
    #[must_use]
    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.by_id
            .get(&id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Whether `id` refers to a live feature.
    #[must_use]
    pub fn contains(&self, id: FeatureId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of live features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the store holds no live features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Live feature ids in slot order.
    #[must_use]
    pub fn ids(&self) -> Vec<FeatureId> {
        self.slots.iter().flatten().map(Feature::id).collect()
    }

    /// Consume the store, yielding live features in slot order.
    #[must_use]
    pub fn into_features(self) -> Vec<Feature> {
        self.slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Attributes;
    use geo::polygon;

    fn feature() -> Feature {
        Feature::from_polygon(
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            Attributes::new(),
        )
    }

    #[test]
    fn insert_get_remove() {
        let mut store = FeatureStore::new();
        let f = feature();
        let id = f.id();
        store.insert(f);
        assert!(store.contains(id));
        assert_eq!(store.get(id).unwrap().id(), id);
        assert_eq!(store.remove(id).unwrap().id(), id);
        assert!(store.get(id).is_none());
        assert!(store.remove(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn removal_does_not_shift_slots() {
        let mut store = FeatureStore::with_capacity(3);
        let features: Vec<Feature> = (0..3).map(|_| feature()).collect();
        let ids: Vec<FeatureId> = features.iter().map(Feature::id).collect();
        let slots: Vec<usize> = features.into_iter().map(|f| store.insert(f)).collect();
        assert_eq!(slots, vec![0, 1, 2]);

        store.remove(ids[1]);
        assert_eq!(store.ids(), vec![ids[0], ids[2]]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut store = FeatureStore::new();
        let a = feature();
        let a_id = a.id();
        store.insert(a);
        store.insert(feature());
        store.remove(a_id);

        let c = feature();
        let c_id = c.id();
        assert_eq!(store.insert(c), 0);
        assert_eq!(store.into_features()[0].id(), c_id);
    }
}

//! R-tree over feature envelopes.
//!
//! The merge engine keeps exactly one entry per live feature. Envelopes
//! are stored as given at insert time, so a feature whose geometry
//! changes must be deleted with its old envelope and re-inserted.

use std::fmt;

use geo::{Coord, Rect};
use rstar::{RTree, RTreeObject};
use rstar::primitives::{GeomWithData, Rectangle};

use crate::types::FeatureId;

/// One index entry: an envelope tagged with the feature it belongs to.
type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, FeatureId>;

fn to_rectangle(bbox: Rect<f64>) -> Rectangle<[f64; 2]> {
    Rectangle::from_corners(bbox.min().into(), bbox.max().into())
}

/// Grow `bbox` by `margin` on every side.
#[must_use]
pub fn expand(bbox: Rect<f64>, margin: f64) -> Rect<f64> {
    let delta = Coord {
        x: margin,
        y: margin,
    };
    Rect::new(bbox.min() - delta, bbox.max() + delta)
}

/// Spatial index of feature envelopes.
#[derive(Default)]
pub struct SpatialIndex {
    tree: RTree<IndexedEnvelope>,
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.tree.size())
            .finish()
    }
}

impl SpatialIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load an index from `(id, envelope)` pairs.
    #[must_use]
    pub fn bulk_load(entries: impl IntoIterator<Item = (FeatureId, Rect<f64>)>) -> Self {
        let items = entries
            .into_iter()
            .map(|(id, bbox)| GeomWithData::new(to_rectangle(bbox), id))
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    /// Insert an entry for `id`.
    pub fn insert(&mut self, id: FeatureId, bbox: Rect<f64>) {
        self.tree.insert(GeomWithData::new(to_rectangle(bbox), id));
    }

    /// Remove the entry for `id` stored with envelope `bbox`.
    ///
    /// Returns `false` if no such entry exists.
    pub fn delete(&mut self, id: FeatureId, bbox: Rect<f64>) -> bool {
        self.tree
            .remove(&GeomWithData::new(to_rectangle(bbox), id))
            .is_some()
    }

    /// Ids whose envelope intersects `bbox` (touching counts).
    ///
    /// The result is an owned snapshot; the index may be mutated while
    /// the caller walks it.
    #[must_use]
    pub fn query_intersecting(&self, bbox: Rect<f64>) -> Vec<FeatureId> {
        let rectangle = to_rectangle(bbox);
        self.tree
            .locate_in_envelope_intersecting(&rectangle.envelope())
            .map(|entry| entry.data)
            .collect()
    }

    /// The `k` ids whose envelopes are closest to `point`, nearest first.
    #[must_use]
    pub fn nearest(&self, point: Coord<f64>, k: usize) -> Vec<FeatureId> {
        self.tree
            .nearest_neighbor_iter(&[point.x, point.y])
            .take(k)
            .map(|entry| entry.data)
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

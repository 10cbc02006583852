//! Geometry validity repair.
//!
//! Invalid polygons (self-intersecting rings, bow-ties, overlapping
//! parts) are rebuilt with a zero-width buffer: a boolean self-overlay
//! of the geometry. The overlay re-nodes every ring and emits a
//! valid polygon set without moving the boundary.

use geo::{BooleanOps, CoordsIter, MultiPolygon, Validation};

/// Why a geometry could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepairError {
    /// The geometry has NaN or infinite coordinates.
    #[error("geometry has non-finite coordinates")]
    NonFinite,

    /// Nothing with area is left.
    #[error("geometry collapsed to nothing")]
    Collapsed,

    /// The overlay result still failed validation.
    #[error("geometry is still invalid after repair")]
    StillInvalid,
}

/// Whether every coordinate is finite.
fn is_finite(geometry: &MultiPolygon<f64>) -> bool {
    geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

/// Zero-width buffer.
///
/// Each part is overlaid on its own, which resolves its self-crossings,
/// and the parts are then unioned one by one so overlapping parts
/// dissolve instead of cancelling out.
#[must_use]
pub fn zero_buffer(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let empty = MultiPolygon::new(Vec::new());
    geometry.0.iter().fold(empty.clone(), |acc, part| {
        let part = MultiPolygon::new(vec![part.clone()]).union(&empty);
        acc.union(&part)
    })
}

/// Return a valid version of `geometry`.
///
/// Valid input is returned unchanged. Invalid input is rebuilt with
/// [`zero_buffer`] and validated again.
///
/// # Errors
///
/// [`RepairError::NonFinite`] for NaN/infinite coordinates,
/// [`RepairError::Collapsed`] for empty input or an empty repair result,
/// [`RepairError::StillInvalid`] when the rebuilt geometry fails validation.
pub fn repair(geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, RepairError> {
    if !is_finite(geometry) {
        return Err(RepairError::NonFinite);
    }
    if geometry.0.is_empty() {
        return Err(RepairError::Collapsed);
    }
    if geometry.is_valid() {
        return Ok(geometry.clone());
    }

    let rebuilt = zero_buffer(geometry);
    if rebuilt.0.is_empty() {
        return Err(RepairError::Collapsed);
    }
    if !rebuilt.is_valid() {
        return Err(RepairError::StillInvalid);
    }
    log::debug!(
        "repaired geometry: {} parts -> {} parts",
        geometry.0.len(),
        rebuilt.0.len()
    );
    Ok(rebuilt)
}

//! Merge predicates: decide whether two features are the same entity.
//!
//! The merge engine is predicate-agnostic. This module defines the
//! [`MergePredicate`] trait and two strategies, selected at runtime by
//! [`MergePredicateKind`]:
//!
//! - [`TileAdjacency`] for fragments of one object split along tile
//!   boundaries (glaciers).
//! - [`DuplicateDetection`] for the same object reported by several
//!   sources (wildfire perimeters).

use geo::line_measures::Distance;
use geo::{Area, BooleanOps, Euclidean, Intersects};
use serde::{Deserialize, Serialize};

use crate::similarity::jaro_winkler;
use crate::types::{AttrValue, Feature, FuseConfig, present};

/// Selects which merge predicate the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergePredicateKind {
    /// Merge geometries that touch (within epsilon) and do not carry
    /// conflicting names.
    #[default]
    TileAdjacency,

    /// Merge overlapping geometries of the same year whose names, areas
    /// and overlap agree closely enough.
    DuplicateDetection,
}

impl MergePredicateKind {
    /// Build the predicate with its thresholds taken from `config`.
    #[must_use]
    pub fn build(self, config: &FuseConfig) -> Box<dyn MergePredicate> {
        match self {
            Self::TileAdjacency => Box::new(TileAdjacency::from_config(config)),
            Self::DuplicateDetection => Box::new(DuplicateDetection::from_config(config)),
        }
    }
}

/// Decides whether two features should be merged.
///
/// Implementations must be symmetric: `should_merge(a, b)` equals
/// `should_merge(b, a)`.
pub trait MergePredicate: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Whether `a` and `b` represent the same real-world entity.
    fn should_merge(&self, a: &Feature, b: &Feature) -> bool;
}

/// Adjacency across tile boundaries.
///
/// Two features merge when their geometries intersect or lie within
/// `epsilon` of each other, and either both names are present and equal
/// or at least one is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TileAdjacency {
    /// Maximum gap between geometries that still counts as touching.
    pub epsilon: f64,
    /// Attribute holding the name.
    pub name_key: String,
    /// Whether name comparison is case-sensitive.
    pub case_sensitive: bool,
}

impl TileAdjacency {
    /// Thresholds from `config`.
    #[must_use]
    pub fn from_config(config: &FuseConfig) -> Self {
        Self {
            epsilon: config.merge_buffer_epsilon,
            name_key: config.name_key.clone(),
            case_sensitive: config.case_sensitive_names,
        }
    }

    fn names_compatible(&self, a: &Feature, b: &Feature) -> bool {
        match (a.text(&self.name_key), b.text(&self.name_key)) {
            (Some(x), Some(y)) if self.case_sensitive => x == y,
            (Some(x), Some(y)) => x.to_lowercase() == y.to_lowercase(),
            _ => {
                // A non-text name (number, bool) still counts as present.
                let x = present(a.attributes(), &self.name_key);
                let y = present(b.attributes(), &self.name_key);
                match (x, y) {
                    (Some(x), Some(y)) => x == y,
                    _ => true,
                }
            }
        }
    }
}

impl MergePredicate for TileAdjacency {
    fn name(&self) -> &'static str {
        "tile-adjacency"
    }

    fn should_merge(&self, a: &Feature, b: &Feature) -> bool {
        self.names_compatible(a, b) && within(a, b, self.epsilon)
    }
}

/// Whether the geometries intersect or are at most `epsilon` apart.
fn within(a: &Feature, b: &Feature, epsilon: f64) -> bool {
    let (ga, gb) = (a.geometry(), b.geometry());
    if ga.0.is_empty() || gb.0.is_empty() {
        return false;
    }
    ga.intersects(gb) || Euclidean.distance(ga, gb) <= epsilon
}

/// Cross-source duplicate detection.
///
/// Two features merge when all of these hold:
/// geometries intersect; years are equal; names (when both present) are
/// similar; areas are close; and the intersection covers enough of the
/// smaller feature.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateDetection {
    /// Attribute holding the name.
    pub name_key: String,
    /// Attribute holding the classification year.
    pub year_key: String,
    /// Minimum Jaro-Winkler similarity of names.
    pub name_similarity: f64,
    /// Maximum `|a1 - a2| / mean(a1, a2)`.
    pub area_ratio: f64,
    /// Minimum intersection area as a share of the smaller area.
    pub overlap_fraction: f64,
}

impl DuplicateDetection {
    /// Thresholds from `config`.
    #[must_use]
    pub fn from_config(config: &FuseConfig) -> Self {
        Self {
            name_key: config.name_key.clone(),
            year_key: config.year_key.clone(),
            name_similarity: config.name_similarity_threshold,
            area_ratio: config.area_ratio_threshold,
            overlap_fraction: config.overlap_fraction_threshold,
        }
    }

    /// The year as an integer, or the raw value when it is not numeric.
    fn year<'a>(&self, feature: &'a Feature) -> Option<Result<i64, &'a AttrValue>> {
        present(feature.attributes(), &self.year_key).map(|v| v.as_integer().ok_or(v))
    }

    fn years_match(&self, a: &Feature, b: &Feature) -> bool {
        match (self.year(a), self.year(b)) {
            (None, None) => true,
            (Some(Ok(x)), Some(Ok(y))) => x == y,
            (Some(Err(x)), Some(Err(y))) => x == y,
            _ => false,
        }
    }

    fn names_similar(&self, a: &Feature, b: &Feature) -> bool {
        match (a.text(&self.name_key), b.text(&self.name_key)) {
            (Some(x), Some(y)) => jaro_winkler(x, y) >= self.name_similarity,
            _ => true,
        }
    }
}

/// Relative area difference: `|a1 - a2| / ((a1 + a2) / 2)`.
#[must_use]
pub fn relative_area_difference(a1: f64, a2: f64) -> f64 {
    let mean = (a1 + a2) / 2.0;
    if mean <= 0.0 {
        return 0.0;
    }
    (a1 - a2).abs() / mean
}

impl MergePredicate for DuplicateDetection {
    fn name(&self) -> &'static str {
        "duplicate-detection"
    }

    fn should_merge(&self, a: &Feature, b: &Feature) -> bool {
        if !self.years_match(a, b) || !self.names_similar(a, b) {
            return false;
        }

        let (a1, a2) = (a.area(), b.area());
        if relative_area_difference(a1, a2) > self.area_ratio {
            return false;
        }

        if !a.geometry().intersects(b.geometry()) {
            return false;
        }
        let shared = a.geometry().intersection(b.geometry()).unsigned_area();
        shared >= self.overlap_fraction * a1.min(a2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrValue, Attributes};
    use geo::{Polygon, polygon};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn feature(poly: Polygon<f64>, attrs: &[(&str, AttrValue)]) -> Feature {
        let attributes: Attributes = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Feature::from_polygon(poly, attributes)
    }

    fn tile() -> TileAdjacency {
        TileAdjacency::from_config(&FuseConfig::default())
    }

    fn dup() -> DuplicateDetection {
        DuplicateDetection::from_config(&FuseConfig::default())
    }

    #[test]
    fn shared_edge_same_name_merges() {
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[("name", "X".into())]);
        let b = feature(rect(1.0, 0.0, 2.0, 1.0), &[("name", "X".into())]);
        assert!(tile().should_merge(&a, &b));
        assert!(tile().should_merge(&b, &a));
    }

    #[test]
    fn gap_within_epsilon_merges() {
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[]);
        let b = feature(rect(1.000_005, 0.0, 2.0, 1.0), &[]);
        assert!(tile().should_merge(&a, &b));

        let c = feature(rect(1.001, 0.0, 2.0, 1.0), &[]);
        assert!(!tile().should_merge(&a, &c));
    }

    #[test]
    fn conflicting_names_do_not_merge() {
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[("name", "X".into())]);
        let b = feature(rect(1.0, 0.0, 2.0, 1.0), &[("name", "Y".into())]);
        assert!(!tile().should_merge(&a, &b));
        assert!(!tile().should_merge(&b, &a));
    }

    #[test]
    fn unnamed_neighbor_merges() {
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[("name", "X".into())]);
        let b = feature(rect(1.0, 0.0, 2.0, 1.0), &[("name", AttrValue::Null)]);
        assert!(tile().should_merge(&a, &b));
        assert!(tile().should_merge(&b, &a));
    }

    #[test]
    fn case_insensitive_names_when_configured() {
        let config = FuseConfig {
            case_sensitive_names: false,
            ..FuseConfig::default()
        };
        let p = TileAdjacency::from_config(&config);
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[("name", "Eagle".into())]);
        let b = feature(rect(1.0, 0.0, 2.0, 1.0), &[("name", "EAGLE".into())]);
        assert!(p.should_merge(&a, &b));
        assert!(!tile().should_merge(&a, &b));
    }

    #[test]
    fn near_identical_perimeters_are_duplicates() {
        let a = feature(
            rect(0.0, 0.0, 10.0, 10.0),
            &[("name", "creek fire".into()), ("year", AttrValue::Int(2020))],
        );
        let b = feature(
            rect(0.5, 0.0, 10.5, 10.0),
            &[("name", "creek".into()), ("year", "2020".into())],
        );
        assert!(dup().should_merge(&a, &b));
        assert!(dup().should_merge(&b, &a));
    }

    #[test]
    fn different_years_are_not_duplicates() {
        let a = feature(rect(0.0, 0.0, 10.0, 10.0), &[("year", AttrValue::Int(2019))]);
        let b = feature(rect(0.0, 0.0, 10.0, 10.0), &[("year", AttrValue::Int(2020))]);
        assert!(!dup().should_merge(&a, &b));

        let c = feature(rect(0.0, 0.0, 10.0, 10.0), &[]);
        assert!(!dup().should_merge(&a, &c));
    }

    #[test]
    fn dissimilar_names_are_not_duplicates() {
        let a = feature(rect(0.0, 0.0, 10.0, 10.0), &[("name", "abc".into())]);
        let b = feature(rect(0.0, 0.0, 10.0, 10.0), &[("name", "xyz".into())]);
        assert!(!dup().should_merge(&a, &b));
    }

    #[test]
    fn area_mismatch_is_not_duplicate() {
        // Areas 100 and 125: relative difference 0.222 > 0.2.
        let a = feature(rect(0.0, 0.0, 10.0, 10.0), &[]);
        let b = feature(rect(0.0, 0.0, 12.5, 10.0), &[]);
        assert!(!dup().should_merge(&a, &b));
    }

    #[test]
    fn insufficient_overlap_is_not_duplicate() {
        // Equal areas, intersection 70% of either.
        let a = feature(rect(0.0, 0.0, 10.0, 10.0), &[]);
        let b = feature(rect(3.0, 0.0, 13.0, 10.0), &[]);
        assert!(!dup().should_merge(&a, &b));
    }

    #[test]
    fn disjoint_geometries_are_not_duplicates() {
        let a = feature(rect(0.0, 0.0, 1.0, 1.0), &[]);
        let b = feature(rect(5.0, 5.0, 6.0, 6.0), &[]);
        assert!(!dup().should_merge(&a, &b));
        assert!(!tile().should_merge(&a, &b));
    }

    #[test]
    fn relative_area_difference_formula() {
        assert!((relative_area_difference(100.0, 125.0) - 25.0 / 112.5).abs() < 1e-12);
        assert!(relative_area_difference(0.0, 0.0).abs() < 1e-12);
    }

    #[test]
    fn kind_builds_named_predicates() {
        let config = FuseConfig::default();
        assert_eq!(
            MergePredicateKind::TileAdjacency.build(&config).name(),
            "tile-adjacency"
        );
        assert_eq!(
            MergePredicateKind::DuplicateDetection.build(&config).name(),
            "duplicate-detection"
        );
    }
}

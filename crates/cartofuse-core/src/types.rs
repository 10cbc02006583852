//! Shared types for the cartofuse core: features, attributes,
//! configuration and errors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use geo::{Area, BoundingRect, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::centerline::CenterlineKind;
use crate::diagnostics::BatchReport;
use crate::labels::{Label, SkippedFeature};
use crate::merge::AttributePolicy;
use crate::predicate::MergePredicateKind;

/// Source of process-unique feature ids. Never reset, never reused.
static NEXT_FEATURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique opaque identifier of a [`Feature`].
///
/// A merge destroys the ids of its inputs and mints a new one for the
/// result, so an id observed once always refers to the same geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(u64);

impl FeatureId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_FEATURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging and serialization.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single attribute value.
///
/// The closed set of kinds keeps attribute resolution exhaustive: every
/// policy in [`AttributePolicy`] has to say what happens to each variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Missing or explicitly null.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer value (years, codes, counts).
    Int(i64),
    /// Floating-point value (areas, measurements).
    Float(f64),
    /// Free text (names, agencies, dates).
    Str(String),
}

impl AttrValue {
    /// Returns `true` for [`AttrValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text of a [`AttrValue::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a whole number.
    ///
    /// Integers pass through, whole floats are truncated and numeric
    /// strings are parsed (after trimming). Anything else is `None`.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Self::Str(s) => {
                let trimmed = s.trim();
                trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| {
                            #[allow(clippy::cast_possible_truncation)]
                            let whole = f as i64;
                            whole
                        })
                })
            }
            Self::Float(_) | Self::Null | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// String-keyed attribute map. Ordered so output is deterministic.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Look up a non-null attribute.
///
/// A missing key and an explicit [`AttrValue::Null`] are the same thing.
#[must_use]
pub fn present<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a AttrValue> {
    attributes.get(key).filter(|v| !v.is_null())
}

/// A polygonal feature: geometry plus attributes, identified by a
/// [`FeatureId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: FeatureId,
    geometry: MultiPolygon<f64>,
    attributes: Attributes,
}

impl Feature {
    /// Create a feature with a freshly allocated id.
    #[must_use]
    pub fn new(geometry: MultiPolygon<f64>, attributes: Attributes) -> Self {
        Self {
            id: FeatureId::fresh(),
            geometry,
            attributes,
        }
    }

    /// Create a feature from a single polygon.
    #[must_use]
    pub fn from_polygon(polygon: Polygon<f64>, attributes: Attributes) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]), attributes)
    }

    /// The feature's id.
    #[must_use]
    pub const fn id(&self) -> FeatureId {
        self.id
    }

    /// The feature's geometry.
    #[must_use]
    pub const fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// The feature's attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Mutable access to the attributes. The id is unaffected.
    pub const fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Replace the geometry in place, keeping id and attributes.
    ///
    /// Used by ingest-time repair, before the feature is indexed.
    pub(crate) fn set_geometry(&mut self, geometry: MultiPolygon<f64>) {
        self.geometry = geometry;
    }

    /// Non-null text attribute under `key`.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        present(&self.attributes, key).and_then(AttrValue::as_str)
    }

    /// Unsigned planar area in squared CRS units.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Axis-aligned envelope, `None` for empty geometry.
    #[must_use]
    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }

    /// Consume the feature, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> (FeatureId, MultiPolygon<f64>, Attributes) {
        (self.id, self.geometry, self.attributes)
    }
}

/// An ordered feature sequence plus an opaque coordinate-reference
/// identifier that is carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    /// Features in input order.
    pub features: Vec<Feature>,
    /// Coordinate reference, verbatim from the source. Never interpreted.
    pub crs: Option<String>,
}

impl FeatureCollection {
    /// Create a collection.
    #[must_use]
    pub const fn new(features: Vec<Feature>, crs: Option<String>) -> Self {
        Self { features, crs }
    }
}

/// Configuration for merging and label extraction.
///
/// Defaults suit geographic (degree) coordinates; see the `DEFAULT_*`
/// constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    /// Distance (CRS units) under which two geometries count as touching.
    pub merge_buffer_epsilon: f64,

    /// Attribute holding the feature name.
    pub name_key: String,

    /// Attribute holding the classification year (duplicate detection).
    pub year_key: String,

    /// Whether name equality is case-sensitive.
    pub case_sensitive_names: bool,

    /// Minimum Jaro-Winkler similarity for two names to be the same entity.
    pub name_similarity_threshold: f64,

    /// Maximum relative area difference for duplicate detection.
    pub area_ratio_threshold: f64,

    /// Minimum share of the smaller area that the intersection must cover.
    pub overlap_fraction_threshold: f64,

    /// Simplification tolerance applied before skeleton construction.
    pub pre_simplify_tolerance: f64,

    /// Simplification tolerance applied to extracted centerlines.
    pub post_simplify_tolerance: f64,

    /// Which merge predicate decides whether two features are one entity.
    pub merge_predicate: MergePredicateKind,

    /// How the attributes of a merge group are resolved.
    pub attribute_policy: AttributePolicy,

    /// Which centerline extraction strategy to use.
    pub centerline: CenterlineKind,

    /// Attributes compared across merge groups to raise conflict warnings.
    pub conflict_keys: Vec<String>,

    /// Split the merge into independent spatial partitions run in parallel.
    pub partitioned: bool,

    /// Whether [`process`](crate::process) also extracts label centerlines.
    pub extract_labels: bool,

    /// Worker thread count for parallel stages. `None` uses every core.
    pub workers: Option<usize>,
}

impl FuseConfig {
    /// Default adjacency distance, in degrees for geographic data.
    pub const DEFAULT_MERGE_BUFFER_EPSILON: f64 = 1e-5;
    /// Default name attribute.
    pub const DEFAULT_NAME_KEY: &'static str = "name";
    /// Default year attribute.
    pub const DEFAULT_YEAR_KEY: &'static str = "year";
    /// Default minimum name similarity.
    pub const DEFAULT_NAME_SIMILARITY_THRESHOLD: f64 = 0.5;
    /// Default maximum relative area difference.
    pub const DEFAULT_AREA_RATIO_THRESHOLD: f64 = 0.2;
    /// Default minimum overlap fraction of the smaller area.
    pub const DEFAULT_OVERLAP_FRACTION_THRESHOLD: f64 = 0.8;
    /// Default pre-skeleton simplification tolerance.
    pub const DEFAULT_PRE_SIMPLIFY_TOLERANCE: f64 = 1e-4;
    /// Default centerline simplification tolerance.
    pub const DEFAULT_POST_SIMPLIFY_TOLERANCE: f64 = 1e-4;

    /// Check that every numeric parameter is in range.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), FuseError> {
        let non_negative = [
            ("merge_buffer_epsilon", self.merge_buffer_epsilon),
            ("area_ratio_threshold", self.area_ratio_threshold),
            ("pre_simplify_tolerance", self.pre_simplify_tolerance),
            ("post_simplify_tolerance", self.post_simplify_tolerance),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(FuseError::InvalidConfig(format!(
                    "{field} must be finite and >= 0, got {value}"
                )));
            }
        }

        let unit_interval = [
            ("name_similarity_threshold", self.name_similarity_threshold),
            (
                "overlap_fraction_threshold",
                self.overlap_fraction_threshold,
            ),
        ];
        for (field, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(FuseError::InvalidConfig(format!(
                    "{field} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.name_key.is_empty() {
            return Err(FuseError::InvalidConfig(
                "name_key must not be empty".to_string(),
            ));
        }
        if let AttributePolicy::SourcePriority { key, .. } = &self.attribute_policy
            && key.is_empty()
        {
            return Err(FuseError::InvalidConfig(
                "source priority key must not be empty".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(FuseError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            merge_buffer_epsilon: Self::DEFAULT_MERGE_BUFFER_EPSILON,
            name_key: Self::DEFAULT_NAME_KEY.to_string(),
            year_key: Self::DEFAULT_YEAR_KEY.to_string(),
            case_sensitive_names: true,
            name_similarity_threshold: Self::DEFAULT_NAME_SIMILARITY_THRESHOLD,
            area_ratio_threshold: Self::DEFAULT_AREA_RATIO_THRESHOLD,
            overlap_fraction_threshold: Self::DEFAULT_OVERLAP_FRACTION_THRESHOLD,
            pre_simplify_tolerance: Self::DEFAULT_PRE_SIMPLIFY_TOLERANCE,
            post_simplify_tolerance: Self::DEFAULT_POST_SIMPLIFY_TOLERANCE,
            merge_predicate: MergePredicateKind::default(),
            attribute_policy: AttributePolicy::default(),
            centerline: CenterlineKind::default(),
            conflict_keys: Vec::new(),
            partitioned: false,
            extract_labels: false,
            workers: None,
        }
    }
}

/// Errors surfaced by the cartofuse core.
///
/// Only [`FuseError::InvalidConfig`] stops a batch; every other variant is
/// recorded per item and the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    /// An input or unioned geometry failed validity and could not be repaired.
    #[error("malformed geometry for feature {id}: {reason}")]
    MalformedGeometry {
        /// Feature whose geometry is malformed.
        id: FeatureId,
        /// What was wrong with it.
        reason: String,
    },

    /// A merge group had no member usable as a representative.
    #[error("merge group of {group_size} members has no viable representative")]
    NoCandidate {
        /// Number of members before filtering.
        group_size: usize,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Result of running the full [`process`](crate::process) pipeline.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Merged, repaired features. The CRS is the input's, unchanged.
    pub collection: FeatureCollection,

    /// Label centerlines (empty unless `extract_labels` was set).
    pub labels: Vec<Label>,

    /// Features for which no centerline could be produced.
    pub skipped: Vec<SkippedFeature>,

    /// Counters and issues from every stage.
    pub report: BatchReport,
}

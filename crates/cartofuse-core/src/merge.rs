//! Greedy cluster/merge engine.
//!
//! Features are processed from a LIFO work list. For each live focal
//! feature the spatial index supplies candidates whose envelopes come
//! within `merge_buffer_epsilon`; the first candidate accepted by the
//! [`MergePredicate`] is unioned with the focal feature, the result is
//! repaired, and the merged feature goes back on top of the work list so
//! it is matched again straight away. A focal feature with no match is
//! marked done.
//!
//! The pairwise-greedy order depends on insertion order. Three features
//! where A~B and B~C but not A~C can cluster differently for different
//! input orders.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use geo::{BooleanOps, MultiPolygon, Validation};
use serde::{Deserialize, Serialize};

use crate::attributes::CAUSE_KEYS;
use crate::diagnostics::{BatchReport, IssueKind};
use crate::index::{SpatialIndex, expand};
use crate::predicate::MergePredicate;
use crate::repair::{RepairError, repair};
use crate::store::FeatureStore;
use crate::types::{AttrValue, Attributes, Feature, FeatureId, FuseConfig, FuseError, present};

/// How the attributes of a merge group are combined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributePolicy {
    /// Keep the focal feature's attributes; discard the rest.
    #[default]
    KeepFocal,

    /// Start from the focal attributes and overwrite them with every
    /// non-null value of the other members, in member order.
    Overlay,

    /// Keep the focal attributes and only fill keys that are missing or
    /// null there.
    FillMissing,

    /// Keep one member's attributes whole.
    ///
    /// Members from the first source in `order` that occurs in the group
    /// are preferred, then those with the most specific cause (`cause3`
    /// over `cause2` over anything else). The last of the remaining
    /// members wins. A group with no listed source ranks all members.
    SourcePriority {
        /// Attribute naming where a record came from.
        key: String,
        /// Sources from most to least preferred.
        order: Vec<String>,
    },
}

impl AttributePolicy {
    /// Default source attribute for [`AttributePolicy::SourcePriority`].
    pub const DEFAULT_SOURCE_KEY: &'static str = "source";
    /// Default source preference for [`AttributePolicy::SourcePriority`].
    pub const DEFAULT_SOURCE_ORDER: [&'static str; 3] = ["NIFC", "USFS", "BLM"];

    /// [`AttributePolicy::SourcePriority`] with the default key and order.
    #[must_use]
    pub fn source_priority() -> Self {
        Self::SourcePriority {
            key: Self::DEFAULT_SOURCE_KEY.to_string(),
            order: Self::DEFAULT_SOURCE_ORDER.map(String::from).to_vec(),
        }
    }
}

/// Members of a merge group disagreed on an attribute.
///
/// Non-fatal: the configured [`AttributePolicy`] still applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictWarning {
    /// The attribute that differs.
    pub key: String,
    /// Distinct non-null values, in member order.
    pub values: Vec<AttrValue>,
    /// The members involved, focal first.
    pub members: Vec<FeatureId>,
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(f, "{:?} differs across group: {}", self.key, values.join(" vs "))
    }
}

/// Features unioned in one merge step. The focal feature comes first.
#[derive(Debug, Clone)]
pub struct MergeGroup {
    members: Vec<Feature>,
}

impl MergeGroup {
    /// A group of `focal` and the features merged into it.
    #[must_use]
    pub fn new(focal: Feature, others: impl IntoIterator<Item = Feature>) -> Self {
        let mut members = vec![focal];
        members.extend(others);
        Self { members }
    }

    /// Members, focal first.
    #[must_use]
    pub fn members(&self) -> &[Feature] {
        &self.members
    }

    /// Consume the group, returning its members.
    #[must_use]
    pub fn into_members(self) -> Vec<Feature> {
        self.members
    }

    /// Attributes among `keys` on which members hold different non-null
    /// values.
    #[must_use]
    pub fn conflicts(&self, keys: &[String]) -> Vec<ConflictWarning> {
        let mut warnings = Vec::new();
        for key in keys {
            let mut values: Vec<AttrValue> = Vec::new();
            for member in &self.members {
                if let Some(v) = present(member.attributes(), key)
                    && !values.contains(v)
                {
                    values.push(v.clone());
                }
            }
            if values.len() > 1 {
                warnings.push(ConflictWarning {
                    key: key.clone(),
                    values,
                    members: self.members.iter().map(Feature::id).collect(),
                });
            }
        }
        warnings
    }

    /// Combine the member attributes under `policy`, focal first.
    #[must_use]
    pub fn attributes(&self, policy: &AttributePolicy) -> Attributes {
        let members: Vec<&Feature> = self.members.iter().collect();
        combine(&members, policy)
    }

    /// Resolve the group into one new feature carrying `geometry`.
    ///
    /// Members with empty geometry cannot represent the group. The first
    /// remaining member (the focal one, normally) supplies the base
    /// attributes; the policy decides what the others contribute.
    ///
    /// # Errors
    ///
    /// [`FuseError::NoCandidate`] when every member has empty geometry.
    pub fn resolve(
        &self,
        geometry: MultiPolygon<f64>,
        policy: &AttributePolicy,
    ) -> Result<Feature, FuseError> {
        let viable: Vec<&Feature> = self
            .members
            .iter()
            .filter(|m| !m.geometry().0.is_empty())
            .collect();
        if viable.is_empty() {
            return Err(FuseError::NoCandidate {
                group_size: self.members.len(),
            });
        }
        Ok(Feature::new(geometry, combine(&viable, policy)))
    }
}

fn combine(members: &[&Feature], policy: &AttributePolicy) -> Attributes {
    let Some((representative, others)) = members.split_first() else {
        return Attributes::new();
    };

    let mut attributes = representative.attributes().clone();
    match policy {
        AttributePolicy::KeepFocal => {}
        AttributePolicy::Overlay => {
            for other in others {
                for (k, v) in other.attributes() {
                    if !v.is_null() {
                        attributes.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        AttributePolicy::FillMissing => {
            for other in others {
                fill_missing(&mut attributes, other.attributes());
            }
        }
        AttributePolicy::SourcePriority { key, order } => {
            if let Some(chosen) = by_source_priority(members, key, order) {
                attributes = chosen.attributes().clone();
            }
        }
    }
    attributes
}

/// 3 with a `cause3`, 2 with a `cause2`, 1 otherwise.
fn cause_specificity(feature: &Feature) -> usize {
    let level = CAUSE_KEYS.iter().rposition(|key| {
        present(feature.attributes(), key).is_some_and(|v| v.as_str().is_none_or(|s| !s.is_empty()))
    });
    match level {
        Some(level) if level > 0 => level + 1,
        _ => 1,
    }
}

fn by_source_priority<'a>(members: &[&'a Feature], key: &str, order: &[String]) -> Option<&'a Feature> {
    let preferred = order
        .iter()
        .find(|source| members.iter().any(|m| m.text(key) == Some(source.as_str())));
    let ranked: Vec<&'a Feature> = members
        .iter()
        .copied()
        .filter(|m| preferred.is_none_or(|source| m.text(key) == Some(source.as_str())))
        .collect();
    let best = ranked.iter().map(|m| cause_specificity(m)).max()?;
    ranked.into_iter().rev().find(|m| cause_specificity(m) == best)
}

fn fill_missing(into: &mut Attributes, from: &Attributes) {
    for (k, v) in from {
        if v.is_null() {
            continue;
        }
        let slot = into.entry(k.clone()).or_default();
        if slot.is_null() {
            *slot = v.clone();
        }
    }
}

/// Features left after a merge pass, plus what happened.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Live features in arena-slot order.
    pub features: Vec<Feature>,
    /// Counters and issues for the pass.
    pub report: BatchReport,
}

/// Geometry repair step used by the engine.
pub type RepairFn = fn(&MultiPolygon<f64>) -> Result<MultiPolygon<f64>, RepairError>;

/// Single-threaded greedy merge over one set of features.
///
/// Owns the feature arena and the spatial index for the duration of the
/// pass. Every feature in the arena has non-empty geometry.
pub struct MergeEngine<'p> {
    predicate: &'p dyn MergePredicate,
    repair: RepairFn,
    epsilon: f64,
    policy: AttributePolicy,
    conflict_keys: Vec<String>,
    store: FeatureStore,
    index: SpatialIndex,
    worklist: Vec<FeatureId>,
    done: HashSet<FeatureId>,
    vetoed: HashSet<(FeatureId, FeatureId)>,
    report: BatchReport,
}

impl fmt::Debug for MergeEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("predicate", &self.predicate.name())
            .field("live", &self.store.len())
            .field("pending", &self.worklist.len())
            .finish_non_exhaustive()
    }
}

/// Unordered pair key.
fn pair(a: FeatureId, b: FeatureId) -> (FeatureId, FeatureId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl<'p> MergeEngine<'p> {
    /// Create an empty engine.
    #[must_use]
    pub fn new(predicate: &'p dyn MergePredicate, config: &FuseConfig) -> Self {
        Self {
            predicate,
            repair,
            epsilon: config.merge_buffer_epsilon,
            policy: config.attribute_policy.clone(),
            conflict_keys: config.conflict_keys.clone(),
            store: FeatureStore::new(),
            index: SpatialIndex::new(),
            worklist: Vec::new(),
            done: HashSet::new(),
            vetoed: HashSet::new(),
            report: BatchReport::default(),
        }
    }

    /// Replace the repair step applied to inputs and unions.
    #[must_use]
    pub fn with_repair(mut self, repair: RepairFn) -> Self {
        self.repair = repair;
        self
    }

    /// Validate, repair if needed, and queue a feature.
    ///
    /// Features with empty or unrepairable geometry are dropped and
    /// recorded as [`IssueKind::MalformedGeometry`].
    pub fn ingest(&mut self, mut feature: Feature) {
        self.report.input_count += 1;
        let id = feature.id();

        if feature.geometry().0.is_empty() {
            self.report
                .record(IssueKind::MalformedGeometry, Some(id), "empty geometry");
            return;
        }
        if !feature.geometry().is_valid() {
            match (self.repair)(feature.geometry()) {
                Ok(fixed) => {
                    self.report.repairs += 1;
                    feature.set_geometry(fixed);
                }
                Err(e) => {
                    self.report
                        .record(IssueKind::MalformedGeometry, Some(id), e.to_string());
                    return;
                }
            }
        }
        self.insert(feature);
    }

    fn insert(&mut self, feature: Feature) {
        let id = feature.id();
        if let Some(envelope) = feature.envelope() {
            self.index.insert(id, envelope);
        }
        self.store.insert(feature);
        self.worklist.push(id);
    }

    fn remove(&mut self, id: FeatureId) -> Option<Feature> {
        let feature = self.store.remove(id)?;
        if let Some(envelope) = feature.envelope() {
            self.index.delete(id, envelope);
        }
        Some(feature)
    }

    /// First candidate the predicate accepts for `id`, in index order.
    fn find_partner(&mut self, id: FeatureId) -> Option<FeatureId> {
        let focal = self.store.get(id)?;
        let query = expand(focal.envelope()?, self.epsilon);

        for candidate in self.index.query_intersecting(query) {
            if candidate == id || self.vetoed.contains(&pair(id, candidate)) {
                continue;
            }
            let Some(other) = self.store.get(candidate) else {
                continue;
            };
            self.report.candidate_checks += 1;
            if self.predicate.should_merge(focal, other) {
                return Some(candidate);
            }
        }
        None
    }

    /// Union `focal` with `other` and replace both with the result.
    ///
    /// A union that cannot be repaired is rolled back: both features stay
    /// as they are, are marked done, and the pair is never tried again.
    fn merge_pair(&mut self, focal: FeatureId, other: FeatureId) {
        let (Some(a), Some(b)) = (self.store.get(focal), self.store.get(other)) else {
            return;
        };

        let union = a.geometry().union(b.geometry());
        let was_valid = union.is_valid() && !union.0.is_empty();
        let geometry = match (self.repair)(&union) {
            Ok(fixed) => {
                if !was_valid {
                    self.report.repairs += 1;
                }
                fixed
            }
            Err(e) => {
                self.vetoed.insert(pair(focal, other));
                self.done.insert(focal);
                self.done.insert(other);
                self.report.record(
                    IssueKind::RepairFailed,
                    Some(focal),
                    format!("union with {other} rolled back: {e}"),
                );
                return;
            }
        };

        let (Some(a), Some(b)) = (self.remove(focal), self.remove(other)) else {
            return;
        };
        let group = MergeGroup::new(a, [b]);

        for warning in group.conflicts(&self.conflict_keys) {
            self.report
                .record(IssueKind::Conflict, Some(focal), warning.to_string());
        }

        let merged = Feature::new(geometry, group.attributes(&self.policy));
        log::debug!(
            "{}: merged {focal} + {other} -> {}",
            self.predicate.name(),
            merged.id()
        );
        self.report.merges += 1;
        self.insert(merged);
    }

    /// Drain the work list and return the surviving features.
    #[must_use]
    pub fn run(mut self) -> MergeOutcome {
        while let Some(id) = self.worklist.pop() {
            if !self.store.contains(id) || self.done.contains(&id) {
                continue;
            }
            match self.find_partner(id) {
                Some(other) => self.merge_pair(id, other),
                None => {
                    self.done.insert(id);
                }
            }
        }

        self.report.output_count = self.store.len();
        MergeOutcome {
            features: self.store.into_features(),
            report: self.report,
        }
    }
}

/// Run one sequential merge pass over `features`.
#[must_use]
pub fn merge_features(
    features: Vec<Feature>,
    predicate: &dyn MergePredicate,
    config: &FuseConfig,
) -> MergeOutcome {
    let start = Instant::now();
    let mut engine = MergeEngine::new(predicate, config);
    for feature in features {
        engine.ingest(feature);
    }
    let mut outcome = engine.run();
    outcome.report.partitions = 1;
    outcome.report.merge_duration = start.elapsed();
    log::info!(
        "{}: {} features -> {} ({} merges, {} rollbacks)",
        predicate.name(),
        outcome.report.input_count,
        outcome.report.output_count,
        outcome.report.merges,
        outcome.report.rollbacks,
    );
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::predicate::{MergePredicateKind, TileAdjacency};
    use geo::{Polygon, polygon};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn named(poly: Polygon<f64>, name: Option<&str>) -> Feature {
        let mut attrs = Attributes::new();
        attrs.insert(
            "name".into(),
            name.map_or(AttrValue::Null, AttrValue::from),
        );
        Feature::from_polygon(poly, attrs)
    }

    fn run(features: Vec<Feature>, config: &FuseConfig) -> MergeOutcome {
        let predicate = config.merge_predicate.build(config);
        merge_features(features, predicate.as_ref(), config)
    }

    #[test]
    fn three_tiles_merge_into_one() {
        let config = FuseConfig {
            attribute_policy: AttributePolicy::FillMissing,
            ..FuseConfig::default()
        };
        let outcome = run(
            vec![
                named(rect(0.0, 0.0, 1.0, 1.0), Some("X")),
                named(rect(1.0, 0.0, 2.0, 1.0), Some("X")),
                named(rect(2.0, 0.0, 3.0, 1.0), None),
            ],
            &config,
        );
        assert_eq!(outcome.features.len(), 1);
        let merged = &outcome.features[0];
        assert!((merged.area() - 3.0).abs() < 1e-6 * 3.0);
        assert_eq!(merged.text("name"), Some("X"));
        assert_eq!(outcome.report.merges, 2);
        assert_eq!(outcome.report.input_count, 3);
        assert_eq!(outcome.report.output_count, 1);
    }

    #[test]
    fn overlapping_unnamed_squares_become_their_union() {
        let config = FuseConfig::default();
        let outcome = run(
            vec![
                named(rect(0.0, 0.0, 2.0, 2.0), None),
                named(rect(1.0, 0.0, 3.0, 2.0), None),
            ],
            &config,
        );
        assert_eq!(outcome.features.len(), 1);
        assert!((outcome.features[0].area() - 6.0).abs() < 1e-6 * 6.0);
        assert!(outcome.features[0].geometry().is_valid());
    }

    #[test]
    fn keep_focal_takes_last_queued_attributes() {
        // The work list is LIFO, so the last input is the first focal.
        let config = FuseConfig::default();
        let outcome = run(
            vec![
                named(rect(0.0, 0.0, 1.0, 1.0), Some("X")),
                named(rect(1.0, 0.0, 2.0, 1.0), None),
            ],
            &config,
        );
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.features[0].text("name"), None);
    }

    #[test]
    fn conflicting_names_stay_apart() {
        let config = FuseConfig::default();
        let outcome = run(
            vec![
                named(rect(0.0, 0.0, 1.0, 1.0), Some("X")),
                named(rect(1.0, 0.0, 2.0, 1.0), Some("Y")),
            ],
            &config,
        );
        assert_eq!(outcome.features.len(), 2);
        assert_eq!(outcome.report.merges, 0);
    }

    #[test]
    fn merged_ids_are_fresh() {
        let config = FuseConfig::default();
        let a = named(rect(0.0, 0.0, 1.0, 1.0), None);
        let b = named(rect(1.0, 0.0, 2.0, 1.0), None);
        let (ida, idb) = (a.id(), b.id());
        let outcome = run(vec![a, b], &config);
        let id = outcome.features[0].id();
        assert_ne!(id, ida);
        assert_ne!(id, idb);
    }

    #[test]
    fn second_pass_is_idempotent() {
        let config = FuseConfig::default();
        let first = run(
            vec![
                named(rect(0.0, 0.0, 1.0, 1.0), Some("X")),
                named(rect(1.0, 0.0, 2.0, 1.0), Some("X")),
                named(rect(5.0, 0.0, 6.0, 1.0), Some("Y")),
                named(rect(6.0, 0.0, 7.0, 1.0), Some("Z")),
            ],
            &config,
        );
        let count = first.features.len();
        let second = run(first.features, &config);
        assert_eq!(second.features.len(), count);
        assert_eq!(second.report.merges, 0);
    }

    #[test]
    fn empty_geometry_is_dropped_on_ingest() {
        let config = FuseConfig::default();
        let empty = Feature::new(MultiPolygon::new(Vec::new()), Attributes::new());
        let outcome = run(vec![empty, named(rect(0.0, 0.0, 1.0, 1.0), None)], &config);
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.report.dropped, 1);
        assert_eq!(outcome.report.count(IssueKind::MalformedGeometry), 1);
    }

    #[test]
    fn invalid_input_is_repaired_on_ingest() {
        let config = FuseConfig::default();
        let bowtie = Feature::from_polygon(
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0)],
            Attributes::new(),
        );
        let outcome = run(vec![bowtie], &config);
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.report.repairs, 1);
        assert!(outcome.features[0].geometry().is_valid());
    }

    #[test]
    fn duplicate_detection_overlays_attributes() {
        let config = FuseConfig {
            merge_predicate: MergePredicateKind::DuplicateDetection,
            attribute_policy: AttributePolicy::Overlay,
            ..FuseConfig::default()
        };
        let mut a = named(rect(0.0, 0.0, 10.0, 10.0), Some("creek fire"));
        a.attributes_mut().insert("year".into(), AttrValue::Int(2020));
        a.attributes_mut().insert("agency".into(), "usfs".into());
        let mut b = named(rect(0.2, 0.0, 10.2, 10.0), Some("creek"));
        b.attributes_mut().insert("year".into(), AttrValue::Int(2020));
        b.attributes_mut().insert("agency".into(), AttrValue::Null);
        b.attributes_mut().insert("acres".into(), AttrValue::Float(12.5));

        let outcome = run(vec![a, b], &config);
        assert_eq!(outcome.features.len(), 1);
        let merged = &outcome.features[0];
        assert!((merged.area() - 102.0).abs() < 1e-6 * 102.0);
        assert_eq!(merged.attributes()["acres"], AttrValue::Float(12.5));
        assert_eq!(merged.attributes()["agency"], AttrValue::from("usfs"));
    }

    #[test]
    fn conflicts_are_reported_but_merge_proceeds() {
        let config = FuseConfig {
            conflict_keys: vec!["agency".into()],
            ..FuseConfig::default()
        };
        let mut a = named(rect(0.0, 0.0, 1.0, 1.0), Some("X"));
        a.attributes_mut().insert("agency".into(), "a".into());
        let mut b = named(rect(1.0, 0.0, 2.0, 1.0), Some("X"));
        b.attributes_mut().insert("agency".into(), "b".into());

        let outcome = run(vec![a, b], &config);
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.report.conflicts, 1);
    }

    #[test]
    fn policies_resolve_attributes() {
        let mut focal = named(rect(0.0, 0.0, 1.0, 1.0), Some("X"));
        focal.attributes_mut().insert("agency".into(), AttrValue::Null);
        let mut other = named(rect(1.0, 0.0, 2.0, 1.0), Some("Y"));
        other.attributes_mut().insert("agency".into(), "nps".into());
        let group = MergeGroup::new(focal, [other]);
        let geometry = MultiPolygon::new(vec![rect(0.0, 0.0, 2.0, 1.0)]);

        let keep = group
            .resolve(geometry.clone(), &AttributePolicy::KeepFocal)
            .unwrap();
        assert_eq!(keep.text("name"), Some("X"));
        assert_eq!(keep.attributes()["agency"], AttrValue::Null);

        let overlay = group
            .resolve(geometry.clone(), &AttributePolicy::Overlay)
            .unwrap();
        assert_eq!(overlay.text("name"), Some("Y"));
        assert_eq!(overlay.text("agency"), Some("nps"));

        let fill = group
            .resolve(geometry, &AttributePolicy::FillMissing)
            .unwrap();
        assert_eq!(fill.text("name"), Some("X"));
        assert_eq!(fill.text("agency"), Some("nps"));
    }

    #[test]
    fn group_without_geometry_has_no_candidate() {
        let a = Feature::new(MultiPolygon::new(Vec::new()), Attributes::new());
        let b = Feature::new(MultiPolygon::new(Vec::new()), Attributes::new());
        let group = MergeGroup::new(a, [b]);
        let err = group
            .resolve(MultiPolygon::new(Vec::new()), &AttributePolicy::KeepFocal)
            .unwrap_err();
        assert!(matches!(err, FuseError::NoCandidate { group_size: 2 }));
    }

    #[test]
    fn empty_focal_defers_to_next_member() {
        let mut a = Feature::new(MultiPolygon::new(Vec::new()), Attributes::new());
        a.attributes_mut().insert("name".into(), "ghost".into());
        let b = named(rect(0.0, 0.0, 1.0, 1.0), Some("real"));
        let group = MergeGroup::new(a, [b]);
        let resolved = group
            .resolve(
                MultiPolygon::new(vec![rect(0.0, 0.0, 1.0, 1.0)]),
                &AttributePolicy::KeepFocal,
            )
            .unwrap();
        assert_eq!(resolved.text("name"), Some("real"));
    }

    #[test]
    fn engine_accepts_explicit_predicate() {
        let config = FuseConfig {
            merge_buffer_epsilon: 0.5,
            ..FuseConfig::default()
        };
        let predicate = TileAdjacency {
            epsilon: 0.5,
            name_key: "name".into(),
            case_sensitive: true,
        };
        let outcome = merge_features(
            vec![
                named(rect(0.0, 0.0, 1.0, 1.0), None),
                named(rect(1.25, 0.0, 2.0, 1.0), None),
            ],
            &predicate,
            &config,
        );
        assert_eq!(outcome.features.len(), 1);
        // The gap is not filled; the result is two parts.
        assert_eq!(outcome.features[0].geometry().0.len(), 2);
    }

    fn never_repairs(_: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, RepairError> {
        Err(RepairError::StillInvalid)
    }

    #[test]
    fn unrepairable_union_is_rolled_back() {
        let config = FuseConfig::default();
        let predicate = config.merge_predicate.build(&config);
        let a = named(rect(0.0, 0.0, 1.0, 1.0), Some("X"));
        let b = named(rect(1.0, 0.0, 2.0, 1.0), Some("X"));
        let (ida, idb) = (a.id(), b.id());

        let mut engine = MergeEngine::new(predicate.as_ref(), &config).with_repair(never_repairs);
        engine.ingest(a);
        engine.ingest(b);
        let outcome = engine.run();

        assert_eq!(outcome.features.len(), 2);
        let mut ids: Vec<FeatureId> = outcome.features.iter().map(Feature::id).collect();
        ids.sort();
        let mut expected = vec![ida, idb];
        expected.sort();
        assert_eq!(ids, expected);
        assert!((outcome.features[0].area() - 1.0).abs() < 1e-9);
        assert!((outcome.features[1].area() - 1.0).abs() < 1e-9);

        assert_eq!(outcome.report.rollbacks, 1);
        assert_eq!(outcome.report.merges, 0);
        assert_eq!(outcome.report.count(IssueKind::RepairFailed), 1);
        // Both stay done, so the accepted pair is evaluated only once.
        assert_eq!(outcome.report.candidate_checks, 1);
        assert_eq!(outcome.report.output_count, 2);
    }

    #[test]
    fn done_features_can_still_be_partners() {
        // c rolls back with b; a then picks b as its partner and rolls back too.
        let config = FuseConfig::default();
        let predicate = config.merge_predicate.build(&config);
        let mut engine = MergeEngine::new(predicate.as_ref(), &config).with_repair(never_repairs);
        engine.ingest(named(rect(0.0, 0.0, 1.0, 1.0), Some("X")));
        engine.ingest(named(rect(1.0, 0.0, 2.0, 1.0), Some("X")));
        engine.ingest(named(rect(2.0, 0.0, 3.0, 1.0), Some("X")));
        let outcome = engine.run();
        assert_eq!(outcome.features.len(), 3);
        assert_eq!(outcome.report.rollbacks, 2);
        assert_eq!(outcome.report.merges, 0);
    }

    fn fire(source: &str, causes: [Option<&str>; 3], tag: &str) -> Feature {
        let mut f = named(rect(0.0, 0.0, 1.0, 1.0), Some("creek fire"));
        f.attributes_mut().insert("source".into(), source.into());
        for (key, cause) in CAUSE_KEYS.iter().zip(causes) {
            f.attributes_mut()
                .insert((*key).into(), cause.map_or(AttrValue::Null, AttrValue::from));
        }
        f.attributes_mut().insert("tag".into(), tag.into());
        f
    }

    fn winner(members: Vec<Feature>) -> Option<String> {
        let mut members = members.into_iter();
        let focal = members.next().unwrap();
        let group = MergeGroup::new(focal, members);
        group
            .attributes(&AttributePolicy::source_priority())
            .get("tag")
            .and_then(|v| v.as_str().map(String::from))
    }

    #[test]
    fn source_priority_prefers_listed_source_order() {
        let tag = winner(vec![
            fire("BLM", [Some("human"), Some("arson"), Some("x")], "blm"),
            fire("USFS", [None, None, None], "usfs"),
        ]);
        assert_eq!(tag.as_deref(), Some("usfs"));

        let tag = winner(vec![
            fire("USFS", [None, None, None], "usfs"),
            fire("NIFC", [None, None, None], "nifc"),
            fire("BLM", [None, None, None], "blm"),
        ]);
        assert_eq!(tag.as_deref(), Some("nifc"));
    }

    #[test]
    fn source_priority_prefers_specific_cause_then_last() {
        let tag = winner(vec![
            fire("NIFC", [Some("human"), Some("arson"), None], "level2"),
            fire("NIFC", [Some("human"), None, None], "level1"),
        ]);
        assert_eq!(tag.as_deref(), Some("level2"));

        // cause1 alone ranks with no cause at all; the last member wins.
        let tag = winner(vec![
            fire("NIFC", [Some("human"), None, None], "first"),
            fire("NIFC", [None, None, None], "second"),
        ]);
        assert_eq!(tag.as_deref(), Some("second"));

        let tag = winner(vec![
            fire("USFS", [None, None, Some("campfire")], "level3"),
            fire("USFS", [None, Some(""), None], "blank"),
        ]);
        assert_eq!(tag.as_deref(), Some("level3"));
    }

    #[test]
    fn source_priority_keeps_one_record_whole() {
        let mut focal = fire("BLM", [None, None, None], "blm");
        focal.attributes_mut().insert("acres".into(), AttrValue::Float(40.0));
        let other = fire("NIFC", [None, None, None], "nifc");
        let group = MergeGroup::new(focal, [other]);
        let attributes = group.attributes(&AttributePolicy::source_priority());
        assert_eq!(attributes.get("tag"), Some(&AttrValue::from("nifc")));
        assert!(!attributes.contains_key("acres"));
    }

    #[test]
    fn source_priority_without_listed_source_ranks_everyone() {
        let tag = winner(vec![
            fire("state", [Some("natural"), Some("lightning"), None], "specific"),
            fire("county", [None, None, None], "last"),
        ]);
        assert_eq!(tag.as_deref(), Some("specific"));
    }

    #[test]
    fn duplicate_detection_with_source_priority() {
        let config = FuseConfig {
            merge_predicate: MergePredicateKind::DuplicateDetection,
            attribute_policy: AttributePolicy::source_priority(),
            ..FuseConfig::default()
        };
        let a = fire("NIFC", [Some("human"), None, None], "nifc");
        let b = fire("BLM", [Some("human"), Some("arson"), Some("x")], "blm");
        let outcome = run(vec![a, b], &config);
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.features[0].text("tag"), Some("nifc"));
    }
}

//! Batch label extraction.
//!
//! Each feature is reduced to one centerline: its largest polygon is
//! simplified, skeletonized, walked by the configured
//! [`CenterlineKind`](crate::centerline::CenterlineKind), and the result
//! simplified again. Features are independent, so the batch runs on a
//! rayon pool; results come back in input order.
//!
//! A feature that cannot be labeled does not stop the batch. It is
//! returned as a [`SkippedFeature`] carrying its attributes, so callers
//! can retry it with different settings.

use std::time::Instant;

use geo::{Area, LineString, Polygon};
use rayon::prelude::*;

use crate::centerline::{CenterlineError, CenterlineExtractor};
use crate::diagnostics::{BatchReport, IssueKind};
use crate::pool;
use crate::simplify::simplify;
use crate::skeleton::{SkeletonError, build_skeleton};
use crate::types::{Attributes, Feature, FeatureId, FuseConfig};

/// A label centerline derived from one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// The feature the label was derived from.
    pub id: FeatureId,
    /// The centerline.
    pub geometry: LineString<f64>,
    /// Copy of the feature's attributes.
    pub attributes: Attributes,
}

/// Why a feature could not be labeled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LabelError {
    /// The feature has no polygon to label.
    #[error("feature has no polygon")]
    Empty,

    /// The straight skeleton could not be built.
    #[error("skeleton construction failed: {0}")]
    Skeleton(#[from] SkeletonError),

    /// No centerline could be taken from the skeleton.
    #[error("centerline extraction failed: {0}")]
    Centerline(#[from] CenterlineError),
}

impl LabelError {
    /// Diagnostics category for this failure.
    #[must_use]
    pub const fn issue_kind(&self) -> IssueKind {
        match self {
            Self::Empty | Self::Skeleton(_) => IssueKind::SkeletonConstruction,
            Self::Centerline(_) => IssueKind::Centerline,
        }
    }
}

/// A feature that was not labeled, kept for a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFeature {
    /// The feature's id.
    pub id: FeatureId,
    /// Copy of the feature's attributes.
    pub attributes: Attributes,
    /// What went wrong.
    pub error: LabelError,
}

/// Result of a labeling batch.
#[derive(Debug, Clone, Default)]
pub struct LabelOutcome {
    /// Labels, in input order.
    pub labels: Vec<Label>,
    /// Features that could not be labeled, in input order.
    pub skipped: Vec<SkippedFeature>,
    /// Counters, timing and issues.
    pub report: BatchReport,
}

/// The polygon with the largest area.
fn largest_polygon(feature: &Feature) -> Option<&Polygon<f64>> {
    feature
        .geometry()
        .0
        .iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
}

/// Extract the label centerline of a single feature.
///
/// # Errors
///
/// [`LabelError::Empty`] for a feature without polygons, otherwise the
/// skeleton or centerline failure.
pub fn extract_label(feature: &Feature, config: &FuseConfig) -> Result<Label, LabelError> {
    let polygon = largest_polygon(feature).ok_or(LabelError::Empty)?;
    let polygon = simplify(polygon, config.pre_simplify_tolerance);
    let skeleton = build_skeleton(&polygon)?;
    let centerline = config.centerline.extract(&skeleton)?;
    let geometry = simplify(&centerline, config.post_simplify_tolerance);

    Ok(Label {
        id: feature.id(),
        geometry,
        attributes: feature.attributes().clone(),
    })
}

/// Label every feature on the worker pool.
#[must_use]
pub fn extract_labels(features: &[Feature], config: &FuseConfig) -> LabelOutcome {
    let start = Instant::now();
    let results: Vec<Result<Label, LabelError>> = pool::install(config.workers, || {
        features
            .par_iter()
            .map(|feature| extract_label(feature, config))
            .collect()
    });

    let mut outcome = LabelOutcome::default();
    for (feature, result) in features.iter().zip(results) {
        match result {
            Ok(label) => {
                outcome.report.labels += 1;
                outcome.labels.push(label);
            }
            Err(error) => {
                outcome
                    .report
                    .record(error.issue_kind(), Some(feature.id()), error.to_string());
                outcome.skipped.push(SkippedFeature {
                    id: feature.id(),
                    attributes: feature.attributes().clone(),
                    error,
                });
            }
        }
    }

    outcome.report.label_duration = start.elapsed();
    log::info!(
        "labels: {} extracted, {} skipped",
        outcome.labels.len(),
        outcome.skipped.len(),
    );
    outcome
}

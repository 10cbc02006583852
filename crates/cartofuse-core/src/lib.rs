//! cartofuse-core: polygon clustering and label centerlines (sans-IO).
//!
//! Cleans polygon collections for cartography in two stages:
//! repair -> greedy cluster/merge (spatial index + pluggable predicate),
//! then optionally straight skeleton -> centerline for label placement.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! [`FeatureCollection`]s. GeoJSON lives in `cartofuse-geojson`, files and
//! the command line in `cartofuse-cli`.

pub mod attributes;
pub mod centerline;
pub mod diagnostics;
pub mod index;
pub mod labels;
pub mod merge;
pub mod partition;
mod pool;
pub mod predicate;
pub mod repair;
pub mod similarity;
pub mod simplify;
pub mod skeleton;
pub mod store;
pub mod types;

pub use centerline::{CenterlineExtractor, CenterlineKind};
pub use diagnostics::{BatchReport, Issue, IssueKind};
pub use labels::{Label, LabelError, SkippedFeature, extract_label, extract_labels};
pub use merge::{AttributePolicy, MergeOutcome, merge_features};
pub use partition::merge_partitioned;
pub use predicate::{MergePredicate, MergePredicateKind};
pub use types::{
    AttrValue, Attributes, Feature, FeatureCollection, FeatureId, FuseConfig, FuseError,
    ProcessResult,
};

/// Run the full cleaning pipeline.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Ingest: validate and repair every geometry, drop unrecoverable ones
/// 3. Greedy cluster/merge with the configured predicate (sequential or
///    spatially partitioned)
/// 4. Optional label extraction: skeleton and centerline per feature
///
/// Per-feature failures never abort the run; they are counted and listed
/// in [`ProcessResult::report`]. The collection's CRS is returned unchanged.
///
/// # Errors
///
/// Returns [`FuseError::InvalidConfig`] if `config` fails validation.
pub fn process(
    collection: FeatureCollection,
    config: &FuseConfig,
) -> Result<ProcessResult, FuseError> {
    // 1. Configuration.
    config.validate()?;
    let predicate = config.merge_predicate.build(config);
    let FeatureCollection { features, crs } = collection;

    // 2-3. Ingest and merge.
    let merged = if config.partitioned {
        merge_partitioned(features, predicate.as_ref(), config)
    } else {
        merge_features(features, predicate.as_ref(), config)
    };
    let mut report = merged.report;

    // 4. Labels.
    let (labels, skipped) = if config.extract_labels {
        let outcome = extract_labels(&merged.features, config);
        report.absorb(outcome.report);
        (outcome.labels, outcome.skipped)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(ProcessResult {
        collection: FeatureCollection::new(merged.features, crs),
        labels,
        skipped,
        report,
    })
}

//! Spatially partitioned merging.
//!
//! Features whose epsilon-expanded envelopes never touch, directly or
//! through a chain of neighbors, can never be merged with each other. Such
//! groups are merged independently on the worker pool, each pass owning
//! its own arena and index. A final sequential pass runs over the combined
//! output.

use std::collections::HashMap;
use std::time::Instant;

use petgraph::unionfind::UnionFind;
use rayon::prelude::*;

use crate::diagnostics::BatchReport;
use crate::index::{SpatialIndex, expand};
use crate::merge::{MergeOutcome, merge_features};
use crate::pool;
use crate::predicate::MergePredicate;
use crate::types::{Feature, FuseConfig};

/// Group feature positions into independent partitions.
///
/// Two features share a partition when a chain of intersecting
/// `epsilon`-expanded envelopes links them. Partitions are ordered by
/// their first member; members keep input order. Features without an
/// envelope get a partition of their own.
#[must_use]
pub fn partition(features: &[Feature], epsilon: f64) -> Vec<Vec<usize>> {
    let envelopes: Vec<_> = features
        .iter()
        .map(|f| f.envelope().map(|e| expand(e, epsilon)))
        .collect();

    let index = SpatialIndex::bulk_load(
        features
            .iter()
            .zip(&envelopes)
            .filter_map(|(f, &e)| e.map(|e| (f.id(), e))),
    );
    let position: HashMap<_, _> = features
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id(), i))
        .collect();

    let mut sets = UnionFind::<usize>::new(features.len());
    for (i, envelope) in envelopes.iter().enumerate() {
        let Some(envelope) = envelope else {
            continue;
        };
        for id in index.query_intersecting(*envelope) {
            if let Some(&j) = position.get(&id) {
                sets.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root = HashMap::new();
    for i in 0..features.len() {
        let root = sets.find_mut(i);
        let slot = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

/// Merge `features` partition by partition on the worker pool.
///
/// Produces the same clusters as [`merge_features`] for any input where no
/// partition boundary separates mergeable features, which the envelope
/// test guarantees for both built-in predicates.
#[must_use]
pub fn merge_partitioned(
    features: Vec<Feature>,
    predicate: &dyn MergePredicate,
    config: &FuseConfig,
) -> MergeOutcome {
    let start = Instant::now();
    let input_count = features.len();
    let groups = partition(&features, config.merge_buffer_epsilon);
    if groups.len() <= 1 {
        return merge_features(features, predicate, config);
    }
    log::info!("{}: {} partitions", predicate.name(), groups.len());

    let mut slots: Vec<Option<Feature>> = features.into_iter().map(Some).collect();
    let buckets: Vec<Vec<Feature>> = groups
        .iter()
        .map(|group| group.iter().filter_map(|&i| slots[i].take()).collect())
        .collect();

    let outcomes: Vec<MergeOutcome> = pool::install(config.workers, || {
        buckets
            .into_par_iter()
            .map(|bucket| merge_features(bucket, predicate, config))
            .collect()
    });

    let mut report = BatchReport::default();
    let mut combined = Vec::new();
    for outcome in outcomes {
        combined.extend(outcome.features);
        report.absorb(outcome.report);
    }

    let last = merge_features(combined, predicate, config);
    report.absorb(last.report);
    report.input_count = input_count;
    report.output_count = last.features.len();
    report.partitions = groups.len();
    report.merge_duration = start.elapsed();

    MergeOutcome {
        features: last.features,
        report,
    }
}

//! Batch diagnostics: counts, timings and per-item issues.
//!
//! Every merge pass and labeling run fills a [`BatchReport`]. Per-item
//! failures never abort a batch; they are recorded here as [`Issue`]s,
//! counted, and logged at `warn` level.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FeatureId;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Category of a degraded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    /// Input geometry was empty or could not be repaired; feature dropped.
    MalformedGeometry,
    /// A merged geometry could not be repaired; the merge was rolled back.
    RepairFailed,
    /// A merge group had no viable representative.
    NoCandidate,
    /// Straight skeleton construction failed; polygon skipped.
    SkeletonConstruction,
    /// Centerline extraction failed; polygon skipped.
    Centerline,
    /// Group members disagreed on a conflict-checked attribute.
    Conflict,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MalformedGeometry => "malformed geometry",
            Self::RepairFailed => "repair failed",
            Self::NoCandidate => "no candidate",
            Self::SkeletonConstruction => "skeleton construction",
            Self::Centerline => "centerline",
            Self::Conflict => "attribute conflict",
        })
    }
}

/// One degraded item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// What went wrong.
    pub kind: IssueKind,
    /// The feature involved, when there is a single one.
    pub feature: Option<FeatureId>,
    /// Human-readable detail.
    pub message: String,
}

/// Counters, timings and issues for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Features handed to the merge stage.
    pub input_count: usize,
    /// Features left after merging.
    pub output_count: usize,
    /// Successful pairwise merges.
    pub merges: usize,
    /// Geometries fixed by the repair step (ingest and merge results).
    pub repairs: usize,
    /// Merges undone because the union could not be repaired.
    pub rollbacks: usize,
    /// Input features dropped for malformed geometry.
    pub dropped: usize,
    /// Merge groups skipped for lack of a representative.
    pub skipped_groups: usize,
    /// Predicate evaluations performed.
    pub candidate_checks: usize,
    /// Attribute conflicts observed in merge groups.
    pub conflicts: usize,
    /// Spatial partitions used (1 for a sequential merge).
    pub partitions: usize,
    /// Label centerlines produced.
    pub labels: usize,
    /// Polygons skipped because the skeleton could not be built.
    pub skeleton_failures: usize,
    /// Polygons skipped because no centerline could be extracted.
    pub centerline_failures: usize,
    /// Wall-clock time spent merging (seconds).
    #[serde(with = "duration_serde")]
    pub merge_duration: Duration,
    /// Wall-clock time spent extracting labels (seconds).
    #[serde(with = "duration_serde")]
    pub label_duration: Duration,
    /// Every degraded item, in the order it was recorded.
    pub issues: Vec<Issue>,
}

impl BatchReport {
    /// Record an issue, bump its counter and log it.
    pub fn record(&mut self, kind: IssueKind, feature: Option<FeatureId>, message: impl Into<String>) {
        let message = message.into();
        match feature {
            Some(id) => log::warn!("{kind} ({id}): {message}"),
            None => log::warn!("{kind}: {message}"),
        }
        match kind {
            IssueKind::MalformedGeometry => self.dropped += 1,
            IssueKind::RepairFailed => self.rollbacks += 1,
            IssueKind::NoCandidate => self.skipped_groups += 1,
            IssueKind::SkeletonConstruction => self.skeleton_failures += 1,
            IssueKind::Centerline => self.centerline_failures += 1,
            IssueKind::Conflict => self.conflicts += 1,
        }
        self.issues.push(Issue {
            kind,
            feature,
            message,
        });
    }

    /// Number of recorded issues of `kind`.
    #[must_use]
    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    /// Fold another report's counters and issues into this one.
    ///
    /// `input_count` and `output_count` are summed; callers that chain
    /// passes over the same features overwrite them afterwards.
    pub fn absorb(&mut self, other: Self) {
        self.input_count += other.input_count;
        self.output_count += other.output_count;
        self.merges += other.merges;
        self.repairs += other.repairs;
        self.rollbacks += other.rollbacks;
        self.dropped += other.dropped;
        self.skipped_groups += other.skipped_groups;
        self.candidate_checks += other.candidate_checks;
        self.conflicts += other.conflicts;
        self.partitions += other.partitions;
        self.labels += other.labels;
        self.skeleton_failures += other.skeleton_failures;
        self.centerline_failures += other.centerline_failures;
        self.merge_duration += other.merge_duration;
        self.label_duration += other.label_duration;
        self.issues.extend(other.issues);
    }

    /// Total wall-clock time across stages.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.merge_duration + self.label_duration
    }

    /// Produce a human-readable summary.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Batch Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Features: {} in, {} out ({} merges, {} dropped)",
            self.input_count, self.output_count, self.merges, self.dropped,
        ));
        lines.push(format!(
            "Merge: {:.3}ms over {} partition(s), {} predicate checks",
            duration_ms(self.merge_duration),
            self.partitions,
            self.candidate_checks,
        ));
        lines.push(format!(
            "Repairs: {} applied, {} merges rolled back",
            self.repairs, self.rollbacks,
        ));
        if self.skipped_groups > 0 || self.conflicts > 0 {
            lines.push(format!(
                "Groups: {} skipped, {} attribute conflicts",
                self.skipped_groups, self.conflicts,
            ));
        }
        if self.labels > 0 || self.skeleton_failures > 0 || self.centerline_failures > 0 {
            lines.push(format!(
                "Labels: {} extracted in {:.3}ms, {} skeleton failures, {} centerline failures",
                self.labels,
                duration_ms(self.label_duration),
                self.skeleton_failures,
                self.centerline_failures,
            ));
        }
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration()),
        ));

        if !self.issues.is_empty() {
            lines.push(String::new());
            lines.push(format!("Issues ({})", self.issues.len()));
            lines.push("-".repeat(60));
            for issue in &self.issues {
                let who = issue
                    .feature
                    .map_or_else(|| "-".to_string(), |id| id.to_string());
                lines.push(format!("{:<24} {:>8}  {}", issue.kind, who, issue.message));
            }
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to fractional milliseconds.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_by_kind() {
        let mut report = BatchReport::default();
        let id = FeatureId::fresh();
        report.record(IssueKind::RepairFailed, Some(id), "still invalid");
        report.record(IssueKind::SkeletonConstruction, None, "degenerate");
        report.record(IssueKind::SkeletonConstruction, None, "degenerate");

        assert_eq!(report.rollbacks, 1);
        assert_eq!(report.skeleton_failures, 2);
        assert_eq!(report.count(IssueKind::SkeletonConstruction), 2);
        assert_eq!(report.issues[0].feature, Some(id));
    }

    #[test]
    fn absorb_sums_counters() {
        let mut a = BatchReport {
            merges: 2,
            merge_duration: Duration::from_millis(5),
            ..BatchReport::default()
        };
        let mut b = BatchReport {
            merges: 3,
            merge_duration: Duration::from_millis(7),
            ..BatchReport::default()
        };
        b.record(IssueKind::NoCandidate, None, "empty group");
        a.absorb(b);

        assert_eq!(a.merges, 5);
        assert_eq!(a.skipped_groups, 1);
        assert_eq!(a.issues.len(), 1);
        assert_eq!(a.merge_duration, Duration::from_millis(12));
    }

    #[test]
    fn report_lists_issues() {
        let mut report = BatchReport {
            input_count: 4,
            output_count: 2,
            merges: 2,
            partitions: 1,
            ..BatchReport::default()
        };
        report.record(IssueKind::Centerline, None, "disconnected skeleton");
        let text = report.report();
        assert!(text.contains("4 in, 2 out"));
        assert!(text.contains("Issues (1)"));
        assert!(text.contains("disconnected skeleton"));
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        assert!((duration_ms(d) - 1234.0).abs() < 0.01);
    }

    #[test]
    fn serde_durations_are_seconds() {
        let report = BatchReport {
            merge_duration: Duration::from_millis(1500),
            ..BatchReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!((json["merge_duration"].as_f64().unwrap() - 1.5).abs() < 1e-9);

        let back: BatchReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}

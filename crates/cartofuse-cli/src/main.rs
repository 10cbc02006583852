//! cartofuse: merge a GeoJSON polygon layer and derive label centerlines.
//!
//! Reads a GeoJSON `FeatureCollection`, repairs and merges its polygons,
//! optionally extracts one label centerline per merged feature, writes
//! the results as GeoJSON and prints a batch report.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin cartofuse -- [OPTIONS] --output <PATH> <INPUT>
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` to see each
//! merge.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cartofuse_core::attributes::{NameRules, standardize_causes, standardize_name, standardize_year};
use cartofuse_core::{AttributePolicy, CenterlineKind, FeatureCollection, FuseConfig, MergePredicateKind};
use clap::{Parser, ValueEnum};

/// Merge fragmented or duplicated polygons and extract label centerlines.
#[derive(Parser)]
#[command(name = "cartofuse", version)]
struct Cli {
    /// Input GeoJSON FeatureCollection.
    input: PathBuf,

    /// Where to write the merged polygons (GeoJSON).
    #[arg(long, short)]
    output: PathBuf,

    /// Where to write label centerlines (GeoJSON). Enables labeling.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Which rule decides that two polygons are the same entity.
    #[arg(long, value_enum, default_value_t = Predicate::TileAdjacency)]
    predicate: Predicate,

    /// How attributes of merged polygons are combined.
    #[arg(long, value_enum, default_value_t = Policy::KeepFocal)]
    policy: Policy,

    /// Attribute naming each record's source, for `--policy source-priority`.
    #[arg(long, default_value = AttributePolicy::DEFAULT_SOURCE_KEY)]
    source_key: String,

    /// Sources from most to least preferred, for `--policy source-priority`.
    #[arg(long, value_delimiter = ',', default_values = AttributePolicy::DEFAULT_SOURCE_ORDER)]
    source_order: Vec<String>,

    /// Centerline strategy for labels.
    #[arg(long, value_enum, default_value_t = Centerline::HeaviestPath)]
    centerline: Centerline,

    /// Adjacency distance in CRS units.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_MERGE_BUFFER_EPSILON)]
    epsilon: f64,

    /// Attribute holding the feature name.
    #[arg(long, default_value = FuseConfig::DEFAULT_NAME_KEY)]
    name_key: String,

    /// Attribute holding the classification year.
    #[arg(long, default_value = FuseConfig::DEFAULT_YEAR_KEY)]
    year_key: String,

    /// Compare names ignoring case.
    #[arg(long)]
    case_insensitive: bool,

    /// Minimum Jaro-Winkler name similarity for duplicate detection.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_NAME_SIMILARITY_THRESHOLD)]
    name_similarity: f64,

    /// Maximum relative area difference for duplicate detection.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_AREA_RATIO_THRESHOLD)]
    area_ratio: f64,

    /// Minimum overlap, as a share of the smaller area, for duplicate detection.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_OVERLAP_FRACTION_THRESHOLD)]
    overlap_fraction: f64,

    /// Simplification tolerance before skeleton construction.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_PRE_SIMPLIFY_TOLERANCE)]
    pre_simplify: f64,

    /// Simplification tolerance for centerlines.
    #[arg(long, default_value_t = FuseConfig::DEFAULT_POST_SIMPLIFY_TOLERANCE)]
    post_simplify: f64,

    /// Attribute to check for disagreement within merge groups (repeatable).
    #[arg(long = "conflict-key")]
    conflict_keys: Vec<String>,

    /// Normalize names, years and cause codes before merging.
    #[arg(long)]
    standardize: bool,

    /// Merge independent spatial partitions in parallel.
    #[arg(long)]
    partitioned: bool,

    /// Worker threads for parallel stages (default: all cores).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    workers: Option<usize>,

    /// Output the batch report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Full configuration as a JSON string.
    ///
    /// When provided, all other tuning flags are ignored. The JSON must
    /// be a valid (possibly partial) `FuseConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Merge predicate selection.
#[derive(Clone, Copy, ValueEnum)]
enum Predicate {
    /// Same-named (or unnamed) polygons that touch.
    TileAdjacency,
    /// Overlapping polygons with similar names, areas and the same year.
    Duplicate,
}

/// Attribute policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Keep the attributes of the polygon that triggered the merge.
    KeepFocal,
    /// Overwrite with the other polygon's non-null attributes.
    Overlay,
    /// Keep the focal attributes, filling only missing values.
    FillMissing,
    /// Keep the record from the preferred source with the most specific cause.
    SourcePriority,
}

/// Centerline strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Centerline {
    /// Follow the heaviest skeleton branches from the center.
    HeaviestPath,
    /// Longest path through the skeleton.
    Diameter,
}

/// Build a [`FuseConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual tuning flags are ignored. `--labels` and `--workers` apply
/// either way.
fn config_from_cli(cli: &Cli) -> Result<FuseConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        FuseConfig {
            merge_buffer_epsilon: cli.epsilon,
            name_key: cli.name_key.clone(),
            year_key: cli.year_key.clone(),
            case_sensitive_names: !cli.case_insensitive,
            name_similarity_threshold: cli.name_similarity,
            area_ratio_threshold: cli.area_ratio,
            overlap_fraction_threshold: cli.overlap_fraction,
            pre_simplify_tolerance: cli.pre_simplify,
            post_simplify_tolerance: cli.post_simplify,
            merge_predicate: match cli.predicate {
                Predicate::TileAdjacency => MergePredicateKind::TileAdjacency,
                Predicate::Duplicate => MergePredicateKind::DuplicateDetection,
            },
            attribute_policy: match cli.policy {
                Policy::KeepFocal => AttributePolicy::KeepFocal,
                Policy::Overlay => AttributePolicy::Overlay,
                Policy::FillMissing => AttributePolicy::FillMissing,
                Policy::SourcePriority => AttributePolicy::SourcePriority {
                    key: cli.source_key.clone(),
                    order: cli.source_order.clone(),
                },
            },
            centerline: match cli.centerline {
                Centerline::HeaviestPath => CenterlineKind::HeaviestPath,
                Centerline::Diameter => CenterlineKind::Diameter,
            },
            conflict_keys: cli.conflict_keys.clone(),
            partitioned: cli.partitioned,
            ..FuseConfig::default()
        }
    };

    if cli.labels.is_some() {
        config.extract_labels = true;
    }
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Normalize names, years and causes in place.
fn standardize(collection: &mut FeatureCollection, config: &FuseConfig) {
    let rules = NameRules::default();
    for feature in &mut collection.features {
        let attributes = feature.attributes_mut();
        standardize_name(attributes, &config.name_key, &rules);
        standardize_year(attributes, &config.year_key);
        standardize_causes(attributes);
    }
}

fn write(path: &Path, text: &str, what: &str) -> Result<(), String> {
    std::fs::write(path, text).map_err(|e| format!("Error writing {what} to {}: {e}", path.display()))?;
    eprintln!("{what} written to {} ({} bytes)", path.display(), text.len());
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;

    let text = std::fs::read_to_string(&cli.input)
        .map_err(|e| format!("Error reading {}: {e}", cli.input.display()))?;
    let parsed = cartofuse_geojson::parse_feature_collection(&text)
        .map_err(|e| format!("Error parsing {}: {e}", cli.input.display()))?;
    if parsed.unsupported > 0 {
        log::warn!("skipped {} non-polygon features", parsed.unsupported);
    }

    let mut collection = parsed.collection;
    if cli.standardize {
        standardize(&mut collection, &config);
    }
    log::info!(
        "{}: {} polygon features",
        cli.input.display(),
        collection.features.len()
    );

    let result = cartofuse_core::process(collection, &config).map_err(|e| e.to_string())?;

    let polygons = cartofuse_geojson::features_to_geojson(&result.collection).map_err(|e| e.to_string())?;
    write(&cli.output, &polygons, "Polygons")?;

    if let Some(ref path) = cli.labels {
        let labels =
            cartofuse_geojson::labels_to_geojson(&result.labels, result.collection.crs.as_deref())
                .map_err(|e| e.to_string())?;
        write(path, &labels, "Labels")?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&result.report)
            .map_err(|e| format!("Error serializing report: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", result.report.report());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

//! cartofuse-geojson: GeoJSON codec (sans-IO)
//!
//! Reads a GeoJSON `FeatureCollection` into a core
//! [`FeatureCollection`](cartofuse_core::FeatureCollection) and writes
//! features and labels back out. Text in, text out; files are the
//! caller's business.

pub mod read;
pub mod write;

pub use read::{ParsedCollection, parse_feature_collection};
pub use write::{features_to_geojson, labels_to_geojson};

/// Errors from reading or writing GeoJSON.
#[derive(Debug, thiserror::Error)]
pub enum GeoJsonError {
    /// The text is not valid JSON, or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is not a `FeatureCollection`.
    #[error("expected a FeatureCollection, found {found}")]
    NotAFeatureCollection {
        /// The `type` member that was found, or `"nothing"`.
        found: String,
    },

    /// A feature lacks a required member or has the wrong shape.
    #[error("feature {index}: {reason}")]
    InvalidFeature {
        /// Position of the feature in the `features` array.
        index: usize,
        /// What was wrong.
        reason: String,
    },
}

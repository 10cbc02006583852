//! GeoJSON reader.
//!
//! Only `Polygon` and `MultiPolygon` features are kept. Features with any
//! other geometry type, or a `null` geometry, are counted and skipped.
//! Properties become [`AttrValue`]s; arrays and objects, which the core
//! has no variant for, are kept as their JSON text.

use cartofuse_core::{AttrValue, Attributes, Feature, FeatureCollection};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

use crate::GeoJsonError;

/// A parsed collection and how many features were not polygons.
#[derive(Debug, Clone, Default)]
pub struct ParsedCollection {
    /// Polygon features in document order.
    pub collection: FeatureCollection,
    /// Features skipped for an unsupported or missing geometry.
    pub unsupported: usize,
}

/// Parse a GeoJSON `FeatureCollection`.
///
/// The top-level `crs` member, if any, is carried through as its JSON
/// text without interpretation.
///
/// # Errors
///
/// Returns [`GeoJsonError::Json`] for malformed JSON,
/// [`GeoJsonError::NotAFeatureCollection`] for any other document type,
/// and [`GeoJsonError::InvalidFeature`] for polygon features whose
/// coordinates are not well-formed.
pub fn parse_feature_collection(text: &str) -> Result<ParsedCollection, GeoJsonError> {
    let document: Value = serde_json::from_str(text)?;

    let kind = document.get("type").and_then(Value::as_str);
    if kind != Some("FeatureCollection") {
        return Err(GeoJsonError::NotAFeatureCollection {
            found: kind.unwrap_or("nothing").to_string(),
        });
    }
    let crs = document.get("crs").filter(|v| !v.is_null()).map(Value::to_string);

    let mut parsed = ParsedCollection::default();
    parsed.collection.crs = crs;

    let features = document
        .get("features")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    for (index, feature) in features.iter().enumerate() {
        let invalid = |reason: &str| GeoJsonError::InvalidFeature {
            index,
            reason: reason.to_string(),
        };

        let geometry = feature.get("geometry").filter(|g| !g.is_null());
        let Some(geometry) = geometry else {
            parsed.unsupported += 1;
            continue;
        };
        let coordinates = geometry.get("coordinates");
        let multi = match geometry.get("type").and_then(Value::as_str) {
            Some("Polygon") => {
                let rings = coordinates
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid("Polygon without coordinates"))?;
                MultiPolygon::new(vec![parse_polygon(rings).map_err(|r| invalid(&r))?])
            }
            Some("MultiPolygon") => {
                let polygons = coordinates
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid("MultiPolygon without coordinates"))?;
                let mut parts = Vec::with_capacity(polygons.len());
                for polygon in polygons {
                    let rings = polygon
                        .as_array()
                        .ok_or_else(|| invalid("polygon is not an array of rings"))?;
                    parts.push(parse_polygon(rings).map_err(|r| invalid(&r))?);
                }
                MultiPolygon::new(parts)
            }
            _ => {
                parsed.unsupported += 1;
                continue;
            }
        };

        let attributes = feature
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), attr_value(v)))
                    .collect::<Attributes>()
            })
            .unwrap_or_default();

        parsed.collection.features.push(Feature::new(multi, attributes));
    }

    Ok(parsed)
}

/// Convert a JSON property value.
#[must_use]
pub fn attr_value(value: &Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)), AttrValue::Int),
        Value::String(s) => AttrValue::Str(s.clone()),
        Value::Array(_) | Value::Object(_) => AttrValue::Str(value.to_string()),
    }
}

fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>, String> {
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| "polygon has no exterior ring".to_string())??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(ring: &Value) -> Result<LineString<f64>, String> {
    let positions = ring
        .as_array()
        .ok_or_else(|| "ring is not an array of positions".to_string())?;
    let coords = positions
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>, _>>()?;
    // Polygon::new closes rings that are left open.
    Ok(LineString::new(coords))
}

fn parse_position(position: &Value) -> Result<Coord<f64>, String> {
    let values = position
        .as_array()
        .ok_or_else(|| "position is not an array".to_string())?;
    match (
        values.first().and_then(Value::as_f64),
        values.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(format!("position {position} needs two numbers")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TWO_SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "EPSG:4326"}},
        "features": [
            {"type": "Feature",
             "properties": {"name": "a", "year": 2020, "area": 1.5, "tags": ["x"]},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature",
             "properties": null,
             "geometry": {"type": "MultiPolygon",
                          "coordinates": [[[[2,0],[3,0],[3,1],[2,1]]],
                                          [[[5,0],[6,0],[6,1],[5,1],[5,0]]]]}},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Point", "coordinates": [0, 0]}},
            {"type": "Feature", "properties": {}, "geometry": null}
        ]
    }"#;

    #[test]
    fn parses_polygons_and_skips_the_rest() {
        let parsed = parse_feature_collection(TWO_SQUARES).unwrap();
        let features = &parsed.collection.features;
        assert_eq!(features.len(), 2);
        assert_eq!(parsed.unsupported, 2);
        assert_eq!(features[0].geometry().0.len(), 1);
        assert_eq!(features[1].geometry().0.len(), 2);
    }

    #[test]
    fn open_rings_are_closed() {
        let parsed = parse_feature_collection(TWO_SQUARES).unwrap();
        let ring = parsed.collection.features[1].geometry().0[0].exterior();
        assert!(ring.is_closed());
        assert_eq!(ring.0.len(), 5);
    }

    #[test]
    fn properties_map_to_attr_values() {
        let parsed = parse_feature_collection(TWO_SQUARES).unwrap();
        let attrs = parsed.collection.features[0].attributes();
        assert_eq!(attrs.get("name"), Some(&AttrValue::from("a")));
        assert_eq!(attrs.get("year"), Some(&AttrValue::Int(2020)));
        assert_eq!(attrs.get("area"), Some(&AttrValue::Float(1.5)));
        assert_eq!(attrs.get("tags"), Some(&AttrValue::from(r#"["x"]"#)));
        assert!(parsed.collection.features[1].attributes().is_empty());
    }

    #[test]
    fn crs_is_carried_verbatim() {
        let parsed = parse_feature_collection(TWO_SQUARES).unwrap();
        let crs: Value = serde_json::from_str(parsed.collection.crs.as_deref().unwrap()).unwrap();
        assert_eq!(crs["properties"]["name"], "EPSG:4326");
    }

    #[test]
    fn rejects_other_documents() {
        let err = parse_feature_collection(r#"{"type": "Feature"}"#).unwrap_err();
        assert!(matches!(err, GeoJsonError::NotAFeatureCollection { .. }));
        assert!(matches!(
            parse_feature_collection("not json"),
            Err(GeoJsonError::Json(_))
        ));
    }

    #[test]
    fn bad_position_names_the_feature() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1],[1,1],[0,0]]]}}
        ]}"#;
        let err = parse_feature_collection(text).unwrap_err();
        assert!(matches!(err, GeoJsonError::InvalidFeature { index: 0, .. }));
    }
}

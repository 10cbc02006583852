//! GeoJSON writers for merged features and label centerlines.
//!
//! Single-part features are written as `Polygon`, everything else as
//! `MultiPolygon`. Each output feature's `id` is the core feature id, so
//! labels can be joined back to the polygons they came from.

use cartofuse_core::{Attributes, FeatureCollection, Label};
use geo::{LineString, Polygon};
use serde_json::{Value, json};

use crate::GeoJsonError;

fn ring(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon(poly: &Polygon<f64>) -> Value {
    let mut rings = vec![ring(poly.exterior())];
    rings.extend(poly.interiors().iter().map(ring));
    Value::Array(rings)
}

fn properties(attributes: &Attributes) -> Result<Value, GeoJsonError> {
    Ok(serde_json::to_value(attributes)?)
}

fn crs_member(crs: Option<&str>) -> Option<Value> {
    // Carried as JSON text; anything that does not parse is written as a string.
    crs.map(|text| serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn collection(features: Vec<Value>, crs: Option<&str>) -> Result<String, GeoJsonError> {
    let mut document = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if let (Some(crs), Some(object)) = (crs_member(crs), document.as_object_mut()) {
        object.insert("crs".to_string(), crs);
    }
    Ok(serde_json::to_string(&document)?)
}

/// Serialize a feature collection, including its CRS member.
///
/// # Errors
///
/// Returns [`GeoJsonError::Json`] if serialization fails.
pub fn features_to_geojson(features: &FeatureCollection) -> Result<String, GeoJsonError> {
    let mut out = Vec::with_capacity(features.features.len());
    for feature in &features.features {
        let parts = &feature.geometry().0;
        let geometry = if let [single] = parts.as_slice() {
            json!({"type": "Polygon", "coordinates": polygon(single)})
        } else {
            json!({
                "type": "MultiPolygon",
                "coordinates": parts.iter().map(polygon).collect::<Vec<_>>(),
            })
        };
        out.push(json!({
            "type": "Feature",
            "id": feature.id().get(),
            "geometry": geometry,
            "properties": properties(feature.attributes())?,
        }));
    }
    collection(out, features.crs.as_deref())
}

/// Serialize label centerlines as `LineString` features.
///
/// # Errors
///
/// Returns [`GeoJsonError::Json`] if serialization fails.
pub fn labels_to_geojson(labels: &[Label], crs: Option<&str>) -> Result<String, GeoJsonError> {
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        out.push(json!({
            "type": "Feature",
            "id": label.id.get(),
            "geometry": {"type": "LineString", "coordinates": ring(&label.geometry)},
            "properties": properties(&label.attributes)?,
        }));
    }
    collection(out, crs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cartofuse_core::{AttrValue, Feature, FeatureId};
    use geo::{MultiPolygon, line_string, polygon};

    fn square(x: f64) -> Polygon<f64> {
        polygon![(x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0)]
    }

    #[test]
    fn single_part_is_a_polygon() {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), AttrValue::from("a"));
        attrs.insert("gone".into(), AttrValue::Null);
        let feature = Feature::from_polygon(square(0.0), attrs);
        let id = feature.id();
        let text = features_to_geojson(&FeatureCollection::new(vec![feature], None)).unwrap();

        let doc: Value = serde_json::from_str(&text).unwrap();
        let f = &doc["features"][0];
        assert_eq!(f["geometry"]["type"], "Polygon");
        assert_eq!(f["geometry"]["coordinates"][0].as_array().unwrap().len(), 5);
        assert_eq!(f["properties"]["name"], "a");
        assert!(f["properties"]["gone"].is_null());
        assert_eq!(f["id"], id.get());
        assert!(doc.get("crs").is_none());
    }

    #[test]
    fn multi_part_is_a_multipolygon() {
        let feature = Feature::new(
            MultiPolygon::new(vec![square(0.0), square(5.0)]),
            Attributes::new(),
        );
        let text = features_to_geojson(&FeatureCollection::new(
            vec![feature],
            Some(r#"{"type":"name","properties":{"name":"EPSG:3857"}}"#.to_string()),
        ))
        .unwrap();

        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["features"][0]["geometry"]["type"], "MultiPolygon");
        assert_eq!(
            doc["features"][0]["geometry"]["coordinates"].as_array().unwrap().len(),
            2
        );
        assert_eq!(doc["crs"]["properties"]["name"], "EPSG:3857");
    }

    #[test]
    fn labels_are_linestrings() {
        let label = Label {
            id: FeatureId::fresh(),
            geometry: line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 1.0)],
            attributes: Attributes::from([("name".to_string(), AttrValue::from("lake"))]),
        };
        let text = labels_to_geojson(std::slice::from_ref(&label), Some("EPSG:4326")).unwrap();

        let doc: Value = serde_json::from_str(&text).unwrap();
        let f = &doc["features"][0];
        assert_eq!(f["geometry"]["type"], "LineString");
        assert_eq!(f["geometry"]["coordinates"][2], json!([2.0, 1.0]));
        assert_eq!(f["properties"]["name"], "lake");
        assert_eq!(f["id"], label.id.get());
        assert_eq!(doc["crs"], "EPSG:4326");
    }
}

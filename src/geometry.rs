use crate::types::DistrictBoundary;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, PolygonType, Value};
use tracing::{debug, warn};

const PREFIX: &str = "POLYGON ((";
const SUFFIX: &str = "))";

/// Parses `POLYGON ((lon lat, lon lat, ...))` into a single-ring polygon.
///
/// Only the outer ring is supported. A vertex whose components are missing or
/// not numbers comes out as `NaN` instead of failing the whole polygon; use
/// [`invalid_vertex_count`] to find out whether that happened.
pub fn parse_polygon(text: &str) -> PolygonType {
    let body = text.replacen(PREFIX, "", 1).replacen(SUFFIX, "", 1);

    let ring = body
        .split(", ")
        .map(|vertex| {
            let mut parts = vertex.split_whitespace().map(parse_component);
            let lon = parts.next().unwrap_or(f64::NAN);
            let lat = parts.next().unwrap_or(f64::NAN);
            vec![lon, lat]
        })
        .collect();

    vec![ring]
}

fn parse_component(token: &str) -> f64 {
    token.parse().unwrap_or(f64::NAN)
}

/// Number of vertices holding a non-finite coordinate.
pub fn invalid_vertex_count(polygon: &PolygonType) -> usize {
    polygon
        .iter()
        .flatten()
        .filter(|position| position.iter().any(|c| !c.is_finite()))
        .count()
}

pub fn build_feature(record: &DistrictBoundary) -> Feature {
    let coordinates = parse_polygon(&record.polygon_text);

    let invalid = invalid_vertex_count(&coordinates);
    if invalid > 0 {
        warn!(
            district = %record.id,
            name = %record.name,
            invalid,
            "Boundary contains unparsable vertices"
        );
    }

    let mut properties = JsonObject::new();
    properties.insert("name".to_string(), record.name.clone().into());
    properties.insert("id".to_string(), record.id.clone().into());
    properties.insert("value".to_string(), 0.into());

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(coordinates))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Turns the boundary records into a FeatureCollection, one feature per record, in order.
pub fn build_feature_collection(records: &[DistrictBoundary]) -> FeatureCollection {
    let features: Vec<Feature> = records.iter().map(build_feature).collect();
    debug!("Built {} district features", features.len());

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Reads a string property, if present.
pub fn str_property<'a>(feature: &'a Feature, key: &str) -> Option<&'a str> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get(key))
        .and_then(|v| v.as_str())
}

pub fn f64_property(feature: &Feature, key: &str) -> Option<f64> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get(key))
        .and_then(|v| v.as_f64())
}

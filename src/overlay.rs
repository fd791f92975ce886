use crate::config::{parse_hex_color, ColorStop, OverlayConfig};
use crate::geometry::str_property;
use crate::map::{Layer, LayerKind, MapView};
use crate::types::IncomeRecord;
use anyhow::{anyhow, Result};
use geojson::{Feature, FeatureCollection};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

pub const DISTRICT_SOURCE: &str = "distritos";
pub const FILL_LAYER: &str = "distritos-fill";
pub const LINE_LAYER: &str = "distritos-line";

/// Income ids are numeric, district codes are two-digit strings.
pub fn pad_district_id(id: &str) -> String {
    format!("{:0>2}", id)
}

/// Copies `valor` / `colorIndex` of the matching income record onto each feature.
///
/// Features without a match keep whatever they had. With duplicate ids the
/// first record in `income` wins.
pub fn join_income(
    collection: &FeatureCollection,
    income: &[IncomeRecord],
) -> FeatureCollection {
    let mut matched = 0;

    let features: Vec<Feature> = collection
        .features
        .iter()
        .map(|feature| {
            let mut feature = feature.clone();
            let district_id = str_property(&feature, "id").map(str::to_string);

            let record = district_id
                .as_deref()
                .and_then(|id| income.iter().find(|r| pad_district_id(&r.id) == id));

            match record {
                Some(record) => {
                    matched += 1;
                    let props = feature.properties.get_or_insert_with(Map::new);
                    props.insert("value".to_string(), json!(record.value));
                    props.insert("colorIndex".to_string(), json!(record.color_index));
                }
                None => debug!(district = ?district_id, "No income record for district"),
            }
            feature
        })
        .collect();

    info!(
        "Joined income onto {}/{} districts",
        matched,
        features.len()
    );

    FeatureCollection {
        bbox: collection.bbox.clone(),
        features,
        foreign_members: collection.foreign_members.clone(),
    }
}

/// `["interpolate", ["linear"], ["get", "value"], stop, colour, ...]`
pub fn fill_color_expression(stops: &[ColorStop]) -> Value {
    let mut expression = vec![json!("interpolate"), json!(["linear"]), json!(["get", "value"])];
    for stop in stops {
        expression.push(json!(stop.value));
        expression.push(json!(stop.color));
    }
    Value::Array(expression)
}

/// Evaluates the interpolation expression for one value.
///
/// Values outside the stop range take the nearest endpoint colour. `None` if
/// there are no stops, a colour cannot be parsed or the value is NaN.
pub fn color_for(value: f64, stops: &[ColorStop]) -> Option<[u8; 3]> {
    if value.is_nan() {
        return None;
    }
    let first = stops.first()?;
    let last = stops.last()?;

    if value <= first.value {
        return parse_hex_color(&first.color).ok();
    }
    if value >= last.value {
        return parse_hex_color(&last.color).ok();
    }

    let upper = stops.iter().position(|s| s.value >= value)?;
    let (lo, hi) = (&stops[upper - 1], &stops[upper]);
    let t = (value - lo.value) / (hi.value - lo.value);

    let a = parse_hex_color(&lo.color).ok()?;
    let b = parse_hex_color(&hi.color).ok()?;
    let mut out = [0u8; 3];
    for i in 0..3 {
        out[i] = (a[i] as f64 + (b[i] as f64 - a[i] as f64) * t).round() as u8;
    }
    Some(out)
}

/// Adds the district source plus its fill and outline layers.
pub fn install_districts(
    map: &mut impl MapView,
    collection: FeatureCollection,
    style: &OverlayConfig,
) {
    info!("Installing {} districts on the map", collection.features.len());
    map.add_source(DISTRICT_SOURCE, collection);

    let mut fill = Map::new();
    fill.insert("fill-color".to_string(), json!(style.initial_fill));
    fill.insert("fill-opacity".to_string(), json!(style.fill_opacity));
    map.add_layer(Layer {
        id: FILL_LAYER.to_string(),
        kind: LayerKind::Fill,
        source: DISTRICT_SOURCE.to_string(),
        paint: fill,
    });

    let mut line = Map::new();
    line.insert("line-color".to_string(), json!(style.line_color));
    line.insert("line-width".to_string(), json!(style.line_width));
    map.add_layer(Layer {
        id: LINE_LAYER.to_string(),
        kind: LayerKind::Line,
        source: DISTRICT_SOURCE.to_string(),
        paint: line,
    });
}

/// Joins `income` into the district source and recolours the fill layer.
pub fn apply_income(
    map: &mut impl MapView,
    income: &[IncomeRecord],
    stops: &[ColorStop],
) -> Result<()> {
    let current = map
        .source_data(DISTRICT_SOURCE)
        .ok_or_else(|| anyhow!("District source has not been installed"))?;

    let updated = join_income(current, income);
    map.set_source_data(DISTRICT_SOURCE, updated)?;
    map.set_paint_property(FILL_LAYER, "fill-color", fill_color_expression(stops))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build_feature_collection, f64_property};
    use crate::map::MapState;
    use crate::types::DistrictBoundary;

    fn districts(ids: &[&str]) -> FeatureCollection {
        let records: Vec<DistrictBoundary> = ids
            .iter()
            .map(|id| DistrictBoundary {
                id: id.to_string(),
                name: format!("District {}", id),
                polygon_text: "POLYGON ((2.1 41.3, 2.2 41.4, 2.1 41.4, 2.1 41.3))".to_string(),
            })
            .collect();
        build_feature_collection(&records)
    }

    fn income(id: u32, value: f64, color_index: i64) -> IncomeRecord {
        IncomeRecord {
            id: id.to_string(),
            value,
            color_index: color_index.into(),
        }
    }

    fn color_index(feature: &Feature) -> Option<i64> {
        feature.properties.as_ref()?.get("colorIndex")?.as_i64()
    }

    #[test]
    fn pads_ids_to_two_digits() {
        assert_eq!(pad_district_id("1"), "01");
        assert_eq!(pad_district_id("10"), "10");
        assert_eq!(pad_district_id("123"), "123");
    }

    #[test]
    fn joins_matching_ids_and_keeps_the_rest() {
        let collection = districts(&["01", "02"]);
        let joined = join_income(&collection, &[income(1, 40000.0, 2)]);

        assert_eq!(joined.features.len(), 2);
        assert_eq!(f64_property(&joined.features[0], "value"), Some(40000.0));
        assert_eq!(color_index(&joined.features[0]), Some(2));
        assert_eq!(f64_property(&joined.features[1], "value"), Some(0.0));
        assert_eq!(color_index(&joined.features[1]), None);

        // the input collection is left alone
        assert_eq!(f64_property(&collection.features[0], "value"), Some(0.0));
    }

    #[test]
    fn unmatched_feature_keeps_previous_join() {
        let collection = districts(&["01", "02"]);
        let first = join_income(&collection, &[income(1, 40000.0, 2), income(2, 50000.0, 3)]);
        let second = join_income(&first, &[income(1, 41000.0, 2)]);

        assert_eq!(f64_property(&second.features[0], "value"), Some(41000.0));
        assert_eq!(f64_property(&second.features[1], "value"), Some(50000.0));
        assert_eq!(color_index(&second.features[1]), Some(3));
    }

    #[test]
    fn fractional_color_index_is_copied_as_is() {
        let collection = districts(&["02"]);
        let records: Vec<IncomeRecord> =
            serde_json::from_str(r#"[{"id": 2.0, "valor": 50000, "colorIndex": 2.5}]"#).unwrap();
        let joined = join_income(&collection, &records);

        let props = joined.features[0].properties.as_ref().unwrap();
        assert_eq!(props["value"], json!(50000.0));
        assert_eq!(props["colorIndex"], json!(2.5));
    }

    #[test]
    fn duplicate_ids_first_record_wins() {
        let collection = districts(&["03"]);
        let joined = join_income(&collection, &[income(3, 1.0, 0), income(3, 2.0, 1)]);
        assert_eq!(f64_property(&joined.features[0], "value"), Some(1.0));
    }

    #[test]
    fn unpadded_feature_id_does_not_match() {
        let collection = districts(&["1"]);
        let joined = join_income(&collection, &[income(1, 40000.0, 2)]);
        assert_eq!(f64_property(&joined.features[0], "value"), Some(0.0));
    }

    #[test]
    fn expression_lists_all_stops() {
        let stops = OverlayConfig::default().stops;
        let expression = fill_color_expression(&stops);

        assert_eq!(
            expression,
            json!([
                "interpolate", ["linear"], ["get", "value"],
                35000.0, "#f28cb1",
                45000.0, "#3bb2d0",
                55000.0, "#2a9d8f",
                65000.0, "#e9c46a",
                80000.0, "#e76f51"
            ])
        );
    }

    #[test]
    fn color_for_clamps_and_interpolates() {
        let stops = vec![
            ColorStop {
                value: 0.0,
                color: "#000000".to_string(),
            },
            ColorStop {
                value: 100.0,
                color: "#ffffff".to_string(),
            },
        ];

        assert_eq!(color_for(-5.0, &stops), Some([0, 0, 0]));
        assert_eq!(color_for(500.0, &stops), Some([255, 255, 255]));
        assert_eq!(color_for(50.0, &stops), Some([128, 128, 128]));
        assert_eq!(color_for(f64::NAN, &stops), None);
        assert_eq!(color_for(1.0, &[]), None);

        let defaults = OverlayConfig::default().stops;
        assert_eq!(color_for(45000.0, &defaults), Some([0x3b, 0xb2, 0xd0]));
    }

    #[test]
    fn apply_income_updates_source_and_paint() -> Result<()> {
        let style = OverlayConfig::default();
        let mut map = MapState::new();

        assert!(apply_income(&mut map, &[], &style.stops).is_err());

        install_districts(&mut map, districts(&["01", "02", "03"]), &style);
        assert_eq!(map.layer(FILL_LAYER).unwrap().paint["fill-color"], json!("#ccc"));
        assert_eq!(map.layer(LINE_LAYER).unwrap().paint["line-width"], json!(2.0));

        apply_income(&mut map, &[income(2, 60000.0, 4)], &style.stops)?;

        let source = map.source_data(DISTRICT_SOURCE).unwrap();
        assert_eq!(source.features.len(), 3);
        assert_eq!(f64_property(&source.features[1], "value"), Some(60000.0));
        assert_eq!(
            map.layer(FILL_LAYER).unwrap().paint["fill-color"],
            fill_color_expression(&style.stops)
        );
        assert_eq!(map.layer(FILL_LAYER).unwrap().paint["fill-opacity"], json!(0.6));
        Ok(())
    }
}

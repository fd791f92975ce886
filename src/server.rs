use crate::config::AppConfig;
use crate::geometry::{f64_property, str_property};
use crate::map::{Layer, MapState, MapView};
use crate::overlay::DISTRICT_SOURCE;
use crate::types::{Category, Marker};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use geo::{BoundingRect, Contains, Point, Polygon};
use geojson::FeatureCollection;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

// Wrapper for RTree indexing
struct DistrictIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for DistrictIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// District outlines for point lookups. Geometry never changes after startup.
pub struct DistrictLookup {
    shapes: Vec<(usize, Polygon<f64>)>,
    tree: RTree<DistrictIndex>,
}

impl DistrictLookup {
    pub fn build(collection: &FeatureCollection) -> Self {
        let mut shapes = Vec::new();

        for (i, feature) in collection.features.iter().enumerate() {
            let Some(geometry) = &feature.geometry else { continue };
            let converted: Result<geo::Geometry<f64>, _> = geometry.value.clone().try_into();
            match converted {
                Ok(geo::Geometry::Polygon(polygon)) => shapes.push((i, polygon)),
                Ok(_) => continue, // Only district polygons are indexed
                Err(e) => warn!("Skipping feature {} in point lookup: {:?}", i, e),
            }
        }

        let tree_items: Vec<DistrictIndex> = shapes
            .iter()
            .enumerate()
            .filter_map(|(slot, (_, polygon))| {
                let rect = polygon.bounding_rect()?;
                let (min, max) = (rect.min(), rect.max());
                if ![min.x, min.y, max.x, max.y].iter().all(|c| c.is_finite()) {
                    return None;
                }
                Some(DistrictIndex {
                    index: slot,
                    aabb: AABB::from_corners([min.x, min.y], [max.x, max.y]),
                })
            })
            .collect();

        info!("Spatial index built for {} districts.", tree_items.len());

        Self {
            shapes,
            tree: RTree::bulk_load(tree_items),
        }
    }

    /// Index of the feature containing the point.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<usize> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.shapes.get(candidate.index))
            .find(|(_, polygon)| polygon.contains(&point))
            .map(|(feature, _)| *feature)
    }
}

pub struct AppState {
    pub map: Arc<RwLock<MapState>>,
    pub selection: watch::Sender<String>,
    pub lookup: DistrictLookup,
    pub config: AppConfig,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    id: Option<String>,
    name: Option<String>,
    value: Option<f64>,
    color_index: Option<f64>,
}

#[derive(Deserialize)]
pub struct SelectionRequest {
    centre: String,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct SelectionResponse {
    centre: String,
    recognized: bool,
}

#[derive(Serialize)]
pub struct StyleResponse {
    center: [f64; 2],
    zoom: f64,
    layers: Vec<Layer>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/districts", get(districts_handler))
        .route("/api/style", get(style_handler))
        .route("/api/markers", get(markers_handler))
        .route("/api/selection", post(selection_handler))
        .route("/api/query", get(query_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let port = state.config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn districts_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let map = state.map.read().await;
    match map.source_data(DISTRICT_SOURCE) {
        Some(collection) => Json(collection.clone()).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn style_handler(State(state): State<Arc<AppState>>) -> Json<StyleResponse> {
    let map = state.map.read().await;
    Json(StyleResponse {
        center: state.config.map.center,
        zoom: state.config.map.zoom,
        layers: map.layers().to_vec(),
    })
}

async fn markers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Marker>> {
    let map = state.map.read().await;
    Json(map.markers().cloned().collect())
}

async fn selection_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectionRequest>,
) -> (StatusCode, Json<SelectionResponse>) {
    let recognized = Category::from_selection(&request.centre).is_some();

    // Same value twice is not a change.
    let centre = request.centre.clone();
    state.selection.send_if_modified(|current| {
        if *current == centre {
            false
        } else {
            *current = centre;
            true
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(SelectionResponse {
            centre: request.centre,
            recognized,
        }),
    )
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let Some(index) = state.lookup.locate(params.lon, params.lat) else {
        return Json(None);
    };

    let map = state.map.read().await;
    let feature = map
        .source_data(DISTRICT_SOURCE)
        .and_then(|collection| collection.features.get(index));

    Json(feature.map(|feature| QueryResponse {
        id: str_property(feature, "id").map(str::to_string),
        name: str_property(feature, "name").map(str::to_string),
        value: f64_property(feature, "value"),
        color_index: f64_property(feature, "colorIndex"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        MapConfig, MarkerConfig, OverlayConfig, RenderConfig, ServerConfig, SourceConfig,
    };
    use crate::geometry::build_feature_collection;
    use crate::overlay::{apply_income, install_districts};
    use crate::types::{DistrictBoundary, IncomeRecord};
    use std::path::PathBuf;

    fn config() -> AppConfig {
        AppConfig {
            source: SourceConfig {
                boundaries: "b.json".to_string(),
                income: "i.json".to_string(),
                infantil: "inf.json".to_string(),
                primaria: "pri.json".to_string(),
                secundaria: "sec.json".to_string(),
            },
            server: ServerConfig {
                port: 0,
                static_dir: PathBuf::from("web"),
            },
            overlay: OverlayConfig::default(),
            markers: MarkerConfig::default(),
            centroids: Default::default(),
            map: MapConfig::default(),
            render: RenderConfig::default(),
        }
    }

    fn square(id: &str, name: &str, x: f64) -> DistrictBoundary {
        DistrictBoundary {
            id: id.to_string(),
            name: name.to_string(),
            polygon_text: format!(
                "POLYGON (({x} 41, {x1} 41, {x1} 42, {x} 42, {x} 41))",
                x = x,
                x1 = x + 1.0
            ),
        }
    }

    fn state() -> (Arc<AppState>, watch::Receiver<String>) {
        let collection = build_feature_collection(&[
            square("01", "West", 0.0),
            square("02", "East", 1.5),
            DistrictBoundary {
                id: "03".to_string(),
                name: "Broken".to_string(),
                polygon_text: "nonsense".to_string(),
            },
        ]);
        let lookup = DistrictLookup::build(&collection);

        let config = config();
        let mut map = MapState::new();
        install_districts(&mut map, collection, &config.overlay);
        apply_income(
            &mut map,
            &[IncomeRecord {
                id: "2".to_string(),
                value: 52000.0,
                color_index: 3.into(),
            }],
            &config.overlay.stops,
        )
        .unwrap();

        let (selection, rx) = watch::channel(String::new());
        let state = Arc::new(AppState {
            map: Arc::new(RwLock::new(map)),
            selection,
            lookup,
            config,
        });
        (state, rx)
    }

    #[test]
    fn lookup_finds_containing_district() {
        let (state, _rx) = state();
        assert_eq!(state.lookup.locate(0.5, 41.5), Some(0));
        assert_eq!(state.lookup.locate(2.0, 41.5), Some(1));
        assert_eq!(state.lookup.locate(1.25, 41.5), None);
        assert_eq!(state.lookup.locate(0.5, 45.0), None);
    }

    #[tokio::test]
    async fn query_returns_joined_properties() {
        let (state, _rx) = state();

        let Json(hit) = query_handler(
            State(state.clone()),
            Query(QueryParams { lat: 41.5, lon: 2.0 }),
        )
        .await;
        assert_eq!(
            hit,
            Some(QueryResponse {
                id: Some("02".to_string()),
                name: Some("East".to_string()),
                value: Some(52000.0),
                color_index: Some(3.0),
            })
        );

        let Json(miss) =
            query_handler(State(state), Query(QueryParams { lat: 0.0, lon: 0.0 })).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn selection_publishes_changes_only() {
        let (state, mut rx) = state();

        let (status, Json(body)) = selection_handler(
            State(state.clone()),
            Json(SelectionRequest {
                centre: "Secundària".to_string(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.recognized);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "Secundària");

        let (_, Json(body)) = selection_handler(
            State(state.clone()),
            Json(SelectionRequest {
                centre: "Secundària".to_string(),
            }),
        )
        .await;
        assert!(body.recognized);
        assert!(!rx.has_changed().unwrap());

        let (_, Json(body)) = selection_handler(
            State(state),
            Json(SelectionRequest {
                centre: "Bachillerato".to_string(),
            }),
        )
        .await;
        assert!(!body.recognized);
        assert_eq!(*rx.borrow_and_update(), "Bachillerato");
    }

    #[tokio::test]
    async fn style_lists_both_layers() {
        let (state, _rx) = state();
        let Json(style) = style_handler(State(state)).await;
        let ids: Vec<&str> = style.layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["distritos-fill", "distritos-line"]);
        assert_eq!(style.zoom, 12.0);
    }
}

//! In-process map state: GeoJSON sources, styled layers and point markers.
//!
//! [`MapView`] is the surface the overlay updater and the marker refresher
//! draw on. [`MapState`] keeps everything in memory so the HTTP API can hand
//! it to the browser.

use crate::types::Marker;
use anyhow::{anyhow, Result};
use geojson::FeatureCollection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub type MarkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Fill,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub source: String,
    pub paint: Map<String, Value>,
}

pub trait MapView {
    fn add_source(&mut self, id: &str, data: FeatureCollection);
    fn source_data(&self, id: &str) -> Option<&FeatureCollection>;
    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<()>;
    fn add_layer(&mut self, layer: Layer);
    fn set_paint_property(&mut self, layer_id: &str, name: &str, value: Value) -> Result<()>;
    fn add_marker(&mut self, marker: Marker) -> MarkerId;
    /// Returns false when the marker was already gone.
    fn remove_marker(&mut self, id: MarkerId) -> bool;
}

#[derive(Debug, Default)]
pub struct MapState {
    sources: HashMap<String, FeatureCollection>,
    layers: Vec<Layer>,
    markers: BTreeMap<MarkerId, Marker>,
    next_marker: MarkerId,
}

impl MapState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }
}

impl MapView for MapState {
    fn add_source(&mut self, id: &str, data: FeatureCollection) {
        self.sources.insert(id.to_string(), data);
    }

    fn source_data(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id)
    }

    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<()> {
        let slot = self
            .sources
            .get_mut(id)
            .ok_or_else(|| anyhow!("Unknown map source '{}'", id))?;
        *slot = data;
        Ok(())
    }

    fn add_layer(&mut self, layer: Layer) {
        // re-adding a layer id replaces it in place
        match self.layers.iter_mut().find(|l| l.id == layer.id) {
            Some(existing) => *existing = layer,
            None => self.layers.push(layer),
        }
    }

    fn set_paint_property(&mut self, layer_id: &str, name: &str, value: Value) -> Result<()> {
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id == layer_id)
            .ok_or_else(|| anyhow!("Unknown map layer '{}'", layer_id))?;
        layer.paint.insert(name.to_string(), value);
        Ok(())
    }

    fn add_marker(&mut self, marker: Marker) -> MarkerId {
        let id = self.next_marker;
        self.next_marker += 1;
        self.markers.insert(id, marker);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) -> bool {
        self.markers.remove(&id).is_some()
    }
}

//! Category markers driven by the "selected centre" channel.
//!
//! Every switch to a known category drops all markers from the previous one
//! and draws one marker per district again. There is no diffing.

use crate::centroids::CentroidTable;
use crate::config::MarkerConfig;
use crate::fetch::DataSource;
use crate::map::{MapView, MarkerId};
use crate::types::{Category, CategoryStat, Marker, Popup};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info};

/// `percentage / 10`, or 1 when there is no usable percentage.
pub fn marker_scale(percentage: Option<f64>) -> f64 {
    match percentage {
        Some(p) if p != 0.0 && !p.is_nan() => p / 10.0,
        _ => 1.0,
    }
}

pub fn popup_html(stat: &CategoryStat) -> String {
    let percentage = match stat.percentage {
        Some(p) => format!("{}%", two_decimals(p)),
        None => "-".to_string(),
    };
    format!(
        "<h4>{}</h4>\n<p><strong>Total:</strong> {}</p>\n<p><strong>Percentage:</strong> {}</p>",
        escape_html(&stat.name),
        stat.total,
        percentage
    )
}

/// Two decimals with exact ties rounded away from zero, so `0.125` gives `0.13`.
///
/// `{:.2}` alone rounds ties to even. Only values whose binary expansion is
/// exactly halfway are affected; `1.005` is stored below the tie and stays `1.00`.
fn two_decimals(value: f64) -> String {
    if !value.is_finite() {
        return format!("{:.2}", value);
    }

    let exact = format!("{:.40}", value.abs());
    let is_tie = exact
        .split_once('.')
        .map(|(_, frac)| frac.as_bytes()[2] == b'5' && frac[3..].bytes().all(|b| b == b'0'))
        .unwrap_or(false);
    if !is_tie {
        return format!("{:.2}", value);
    }

    let cents = (value.abs() * 100.0).floor() as u64 + 1;
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// One marker per statistic whose district has a centroid. The rest are skipped.
pub fn build_markers(
    category: Category,
    stats: &[CategoryStat],
    centroids: &CentroidTable,
    config: &MarkerConfig,
) -> Vec<Marker> {
    let color = config.colors.get(category);

    stats
        .iter()
        .filter_map(|stat| {
            let Some(lng_lat) = centroids.lookup(&stat.name) else {
                debug!(
                    district = %stat.name,
                    ?category,
                    "No centroid for district, skipping marker"
                );
                return None;
            };
            Some(Marker {
                district: stat.name.clone(),
                lng_lat,
                color: color.to_string(),
                scale: marker_scale(stat.percentage),
                popup: Popup {
                    offset: config.popup_offset,
                    html: popup_html(stat),
                },
            })
        })
        .collect()
}

pub struct MarkerRefresher<S, M> {
    source: S,
    map: Arc<RwLock<M>>,
    centroids: CentroidTable,
    config: MarkerConfig,
    current: Option<Category>,
    markers: Vec<MarkerId>,
}

impl<S, M> MarkerRefresher<S, M>
where
    S: DataSource,
    M: MapView + Send + Sync,
{
    pub fn new(
        source: S,
        map: Arc<RwLock<M>>,
        centroids: CentroidTable,
        config: MarkerConfig,
    ) -> Self {
        Self {
            source,
            map,
            centroids,
            config,
            current: None,
            markers: Vec::new(),
        }
    }

    /// `None` until a category has been drawn.
    pub fn current(&self) -> Option<Category> {
        self.current
    }

    pub fn marker_ids(&self) -> &[MarkerId] {
        &self.markers
    }

    /// Handles one "selected centre" value.
    ///
    /// Returns `Ok(false)` for values that are not a category; those leave the
    /// markers untouched. If the fetch fails the previous markers stay up.
    pub async fn select(&mut self, value: &str) -> Result<bool> {
        let Some(category) = Category::from_selection(value) else {
            debug!(value, "Ignoring unknown centre selection");
            return Ok(false);
        };

        let stats = self.source.category_stats(category).await?;
        let markers = build_markers(category, &stats, &self.centroids, &self.config);

        let mut map = self.map.write().await;
        for id in self.markers.drain(..) {
            map.remove_marker(id);
        }
        self.markers = markers.into_iter().map(|m| map.add_marker(m)).collect();
        self.current = Some(category);

        info!(
            category = category.label(),
            drawn = self.markers.len(),
            records = stats.len(),
            "Refreshed category markers"
        );
        Ok(true)
    }

    /// Processes the current selection, then every change until the sender is dropped.
    pub async fn run(mut self, mut selection: watch::Receiver<String>) {
        loop {
            let value = selection.borrow_and_update().clone();
            if let Err(e) = self.select(&value).await {
                error!("Failed to refresh markers for {:?}: {:#}", value, e);
            }
            if selection.changed().await.is_err() {
                break;
            }
        }
        debug!("Selection channel closed, marker refresher stopping");
    }
}

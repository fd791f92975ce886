use crate::config::{ColorStop, RenderConfig};
use crate::geometry::f64_property;
use crate::overlay::color_for;
use anyhow::{anyhow, Context, Result};
use geo::{BoundingRect, Contains, Point, Polygon, Rect};
use geojson::FeatureCollection;
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::path::Path;
use tracing::info;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

struct Shape {
    polygon: Polygon<f64>,
    color: Rgba<u8>,
}

/// Rasterizes the districts, filled with their income colour, into a PNG-ready image.
pub fn render_preview(
    collection: &FeatureCollection,
    stops: &[ColorStop],
    fill_opacity: f64,
    settings: &RenderConfig,
) -> Result<RgbaImage> {
    if settings.width == 0 || settings.height == 0 {
        return Err(anyhow!("Preview size must be non-zero"));
    }

    let shapes = collect_shapes(collection, stops, fill_opacity);
    let bounds = bounds_of(&shapes).ok_or_else(|| anyhow!("No district has usable geometry"))?;

    // Work in Web Mercator so the preview matches the slippy map.
    let (min_x, max_y) = project(bounds.min().x, bounds.min().y);
    let (max_x, min_y) = project(bounds.max().x, bounds.max().y);
    let (width, height) = (settings.width, settings.height);

    let rows: Vec<Vec<Rgba<u8>>> = (0..height)
        .into_par_iter()
        .map(|py| {
            let my = min_y + (py as f64 + 0.5) / height as f64 * (max_y - min_y);
            (0..width)
                .map(|px| {
                    let mx = min_x + (px as f64 + 0.5) / width as f64 * (max_x - min_x);
                    let (lon, lat) = unproject(mx, my);
                    let point = Point::new(lon, lat);
                    shapes
                        .iter()
                        .find(|s| s.polygon.contains(&point))
                        .map(|s| s.color)
                        .unwrap_or(TRANSPARENT)
                })
                .collect()
        })
        .collect();

    let mut img: RgbaImage = ImageBuffer::new(width, height);
    for (py, row) in rows.into_iter().enumerate() {
        for (px, pixel) in row.into_iter().enumerate() {
            img.put_pixel(px as u32, py as u32, pixel);
        }
    }
    Ok(img)
}

pub fn save_preview(
    collection: &FeatureCollection,
    stops: &[ColorStop],
    fill_opacity: f64,
    settings: &RenderConfig,
    path: &Path,
) -> Result<()> {
    info!("Rendering {}x{} preview to {:?}", settings.width, settings.height, path);
    let img = render_preview(collection, stops, fill_opacity, settings)?;
    img.save(path)
        .with_context(|| format!("Failed to save preview {:?}", path))?;
    Ok(())
}

fn collect_shapes(
    collection: &FeatureCollection,
    stops: &[ColorStop],
    fill_opacity: f64,
) -> Vec<Shape> {
    collection
        .features
        .iter()
        .filter_map(|feature| {
            let geometry = feature.geometry.as_ref()?;
            let polygon = match geo::Geometry::<f64>::try_from(geometry.value.clone()).ok()? {
                geo::Geometry::Polygon(p) => p,
                _ => return None,
            };
            let value = f64_property(feature, "value").unwrap_or(0.0);
            let rgb = color_for(value, stops)?;
            Some(Shape {
                polygon,
                color: blend_over_white(rgb, fill_opacity),
            })
        })
        .collect()
}

fn bounds_of(shapes: &[Shape]) -> Option<Rect<f64>> {
    shapes
        .iter()
        .filter_map(|s| s.polygon.bounding_rect())
        .filter(|r| [r.min().x, r.min().y, r.max().x, r.max().y].iter().all(|c| c.is_finite()))
        .reduce(|a, b| {
            Rect::new(
                geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        })
}

fn blend_over_white(rgb: [u8; 3], opacity: f64) -> Rgba<u8> {
    let mix = |c: u8| (c as f64 * opacity + 255.0 * (1.0 - opacity)).round() as u8;
    Rgba([mix(rgb[0]), mix(rgb[1]), mix(rgb[2]), 255])
}

// Web Mercator in unit square coordinates, y grows southwards
fn project(lon: f64, lat: f64) -> (f64, f64) {
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0;
    (x, y)
}

fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();
    (lon, lat)
}

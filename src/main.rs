pub mod centroids;
pub mod config;
pub mod fetch;
pub mod geometry;
pub mod map;
pub mod markers;
pub mod overlay;
pub mod render;
pub mod server;
pub mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use fetch::{DataSource, HttpSource};
use geojson::FeatureCollection;
use map::{MapState, MapView};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch boundaries and income and write the joined districts as GeoJSON
    Build {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE", default_value = "districts.geojson")]
        output: PathBuf,
    },
    /// Render a static PNG preview of the income choropleth
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE", default_value = "districts.png")]
        output: PathBuf,
    },
    /// Serve the map state and react to centre selections
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config, output } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let source = HttpSource::new(app_config.source.clone())?;

            let districts = load_joined_districts(&source).await?;
            let json = serde_json::to_string_pretty(&districts)?;
            std::fs::write(&output, json)
                .with_context(|| format!("Failed to write {:?}", output))?;

            info!("Wrote {} districts to {:?}", districts.features.len(), output);
        }
        Commands::Render { config, output } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let source = HttpSource::new(app_config.source.clone())?;

            let districts = load_joined_districts(&source).await?;
            render::save_preview(
                &districts,
                &app_config.overlay.stops,
                app_config.overlay.fill_opacity,
                &app_config.render,
                &output,
            )?;
        }
        Commands::Serve { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            serve(app_config).await?;
        }
    }

    Ok(())
}

async fn load_joined_districts(source: &impl DataSource) -> Result<FeatureCollection> {
    let boundaries = source.boundaries().await.context("Failed to load district boundaries")?;
    let collection = geometry::build_feature_collection(&boundaries);

    let income = source.income().await.context("Failed to load income data")?;
    Ok(overlay::join_income(&collection, &income))
}

async fn serve(app_config: AppConfig) -> Result<()> {
    let source = HttpSource::new(app_config.source.clone())?;

    let boundaries = source.boundaries().await.context("Failed to load district boundaries")?;
    let collection = geometry::build_feature_collection(&boundaries);
    let lookup = server::DistrictLookup::build(&collection);

    let mut map = MapState::new();
    overlay::install_districts(&mut map, collection, &app_config.overlay);

    // Without income the districts keep their initial fill.
    match source.income().await {
        Ok(income) => overlay::apply_income(&mut map, &income, &app_config.overlay.stops)?,
        Err(e) => error!("Failed to load income data: {:#}", e),
    }
    info!(
        "Map ready with {} districts",
        map.source_data(overlay::DISTRICT_SOURCE)
            .map(|c| c.features.len())
            .unwrap_or(0)
    );

    let map = Arc::new(RwLock::new(map));
    let (selection, selection_rx) = watch::channel(String::new());

    let refresher = markers::MarkerRefresher::new(
        source,
        map.clone(),
        app_config.centroids.clone(),
        app_config.markers.clone(),
    );
    tokio::spawn(refresher.run(selection_rx));

    let state = Arc::new(server::AppState {
        map,
        selection,
        lookup,
        config: app_config,
    });
    server::start_server(state).await
}

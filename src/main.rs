use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::{controller::App, render::canvas::ImageRenderer, store::json::JsonStore};
mod config;
mod controller;
mod render;
mod server;
mod station;
mod store;

#[derive(Parser)]
struct Args {
    /// Directory holding the town files and `imgs/` maps
    #[arg(long, default_value = "apis")]
    assets: PathBuf,
    /// Directory holding `live.json` and `history.json`
    #[arg(long, default_value = "data")]
    store: PathBuf,
    /// Address to serve on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
    /// Bound on each store-backed request, in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Width of the rendered maps
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Height of the rendered maps
    #[arg(long, default_value_t = 480)]
    height: u32,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).compact().init();
    let args = Args::parse();

    let now = Instant::now();
    let towns = config::load_towns(&args.assets)?
        .into_iter()
        .map(|town| -> anyhow::Result<_> {
            let image = town.load_image()?;
            Ok((town, image))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let town_count = towns.len();

    let store = JsonStore::open(&args.store)
        .with_context(|| format!("Failed to open store at {}", args.store.display()))?;
    let renderer = ImageRenderer::new(args.width, args.height);
    let app = App::new(Box::new(store), Box::new(renderer), towns)
        .context("Failed to draw the initial maps")?;
    info!("loaded {} towns in {:?}", town_count, now.elapsed());

    server::run(app, &args.bind, Duration::from_millis(args.timeout_ms)).await?;
    Ok(())
}

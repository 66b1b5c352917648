use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod api;
mod cost;
mod insights;
mod mock;
mod report;
mod settings;
mod slack;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind: String = std::env::var("COSTBOARD_BIND").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let settings_path = env_path("COSTBOARD_SETTINGS", "settings.json");
    let public_dir = env_path("COSTBOARD_PUBLIC_DIR", "public");
    let insights_cache = std::env::var("COSTBOARD_INSIGHTS_CACHE").ok().map(PathBuf::from);

    let fetcher = report::ReportFetcher::from_env().await;
    let state = api::AppState::new(settings_path, public_dir, fetcher, insights_cache).await?;
    api::serve(bind, state).await
}

mod cache;
mod config;
mod consolidate;
mod magnet;
mod prowlarr;
mod scrape;
mod tmdb;
mod torznab;
mod web;

use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub http: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::Config::load().context("load configuration")?;

    // One client for Prowlarr, TorBox, and TMDB; per-call timeouts where a
    // tighter bound matters.
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("build http client")?;

    let addr = config.http_addr;
    let state = AppState {
        config: Arc::new(config),
        http,
    };

    web::serve(state, addr).await
}

use crate::magnet::InfoHash;
use crate::prowlarr::SearchRequest;
use crate::tmdb::ExternalIds;
use crate::{AppState, cache, consolidate, magnet, prowlarr, scrape, tmdb, torznab};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;

const IDENTIFIER_KEYS: [&str; 7] = [
    "rid", "tvdbid", "imdbid", "tmdbid", "tvmaze", "traktid", "doubanid",
];
const FORWARDED_KEYS: [&str; 9] = [
    "rid", "tvdbid", "season", "ep", "imdbid", "tmdbid", "tvmaze", "traktid", "doubanid",
];

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/api", get(torznab_api)).with_state(state);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn torznab_api(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    tracing::info!(params = ?params, "incoming request");

    match params.get("t").map(String::as_str) {
        Some("caps") => xml_response(torznab::caps_xml().to_string()),
        Some("search" | "tvsearch" | "movie") => match search_feed(&state, &params).await {
            Ok(xml) => xml_response(xml),
            Err(err) => {
                tracing::error!(%err, "unhandled error in search handler");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        },
        _ => (StatusCode::BAD_REQUEST, "Invalid request type").into_response(),
    }
}

fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// The per-request pipeline: search upstream, learn cache status, collapse
/// duplicates, scrape trackers for what is still uncached, then serialize.
/// Degraded stages shrink the enrichment, never the response.
async fn search_feed(state: &AppState, params: &HashMap<String, String>) -> anyhow::Result<String> {
    let cfg = &state.config;

    let mut query = params.get("q").cloned().unwrap_or_default();
    let search_type = params.get("t").cloned().unwrap_or_else(|| "search".to_string());
    let has_identifier = IDENTIFIER_KEYS
        .iter()
        .any(|key| params.get(*key).is_some_and(|v| !v.is_empty()));
    let categories: Vec<String> = params
        .get("cat")
        .map(|cat| cat.split(',').filter(|c| !c.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let indexer_ids: Vec<String> = params
        .get("indexerIds")
        .map(|ids| ids.split(',').filter(|i| !i.is_empty()).map(str::to_string).collect())
        .or_else(|| params.get("indexerId").map(|id| vec![id.clone()]))
        .unwrap_or_default();

    // Sonarr's "Test" button sends a category-only search with no query.
    // When a fallback query is configured, substitute it so the test gets
    // real results back.
    if query.is_empty()
        && !has_identifier
        && (!categories.is_empty() || !indexer_ids.is_empty())
        && !cfg.test_fallback_query.is_empty()
    {
        tracing::info!(fallback = %cfg.test_fallback_query, "category-only request; applying fallback query");
        query = cfg.test_fallback_query.clone();
    }

    // Id-only searches: resolve a title so indexers without id support can
    // still match something.
    if query.is_empty() && has_identifier {
        let ids = ExternalIds {
            imdbid: params.get("imdbid").cloned(),
            tmdbid: params.get("tmdbid").cloned(),
            tvdbid: params.get("tvdbid").cloned(),
            rid: params.get("rid").cloned(),
        };
        if let Some(title) = tmdb::lookup_title(&state.http, cfg, &ids, &search_type).await {
            tracing::info!(title = %title, "resolved query from external ids");
            query = title;
        } else {
            tracing::info!("title lookup failed or returned no results");
        }
    }

    // Nothing to search on at all; asking Prowlarr would just earn a 400.
    if query.is_empty() && !has_identifier && categories.is_empty() && indexer_ids.is_empty() {
        tracing::info!("no query, identifiers, or categories; returning empty feed");
        return Ok(torznab::empty_feed());
    }

    let request = SearchRequest {
        query,
        search_type,
        categories,
        identifiers: FORWARDED_KEYS
            .iter()
            .filter_map(|key| {
                params
                    .get(*key)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*key, v.clone()))
            })
            .collect(),
        indexer_ids,
        limit: params.get("limit").cloned(),
        offset: params.get("offset").cloned(),
    };

    let results = prowlarr::search(&state.http, cfg, &request).await;
    if results.is_empty() {
        return Ok(torznab::empty_feed());
    }

    let hashes: Vec<InfoHash> = results.iter().filter_map(magnet::resolve_hash).collect();
    if hashes.is_empty() {
        return Ok(torznab::render_feed(
            &results,
            &cache::CacheStatusMap::new(),
            &HashMap::new(),
            cfg.seeders_boost,
        ));
    }

    let cached = cache::check_cached(&state.http, cfg, &hashes).await;

    let total = results.len();
    let consolidated = consolidate::consolidate(results, &cached, &HashMap::new(), cfg.seeders_boost);
    if consolidated.len() < total {
        tracing::debug!(
            total,
            consolidated = consolidated.len(),
            removed = total - consolidated.len(),
            "deduplicated results"
        );
    }

    let mut estimates: HashMap<InfoHash, u32> = HashMap::new();
    if cfg.scrape_enabled {
        let tracker_map = consolidate::uncached_tracker_map(&consolidated, &cached);
        if !tracker_map.is_empty() {
            estimates = scrape::scrape_trackers(cfg, tracker_map).await;
        }
    }

    // Consolidation is idempotent on its own output; the second pass only
    // folds the scrape estimates into the seeder counts.
    let consolidated = consolidate::consolidate(consolidated, &cached, &estimates, cfg.seeders_boost);
    Ok(torznab::render_feed(&consolidated, &cached, &estimates, cfg.seeders_boost))
}

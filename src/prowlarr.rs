use crate::config::{Config, mask_key};
use crate::magnet::RawResult;
use anyhow::Context;
use serde_json::Value;

// Past this many explicit indexer ids the URL gets unwieldy; Prowlarr
// searches every enabled indexer when the parameter is omitted.
const MAX_INDEXER_IDS: usize = 20;

/// One outgoing search, assembled by the request handler from the incoming
/// Torznab parameters.
#[derive(Debug, Default, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub search_type: String,
    pub categories: Vec<String>,
    pub identifiers: Vec<(&'static str, String)>,
    pub indexer_ids: Vec<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Searches the aggregator. Any failure logs and degrades to an empty
/// result list; the feed for this request just comes out empty.
pub async fn search(client: &reqwest::Client, cfg: &Config, request: &SearchRequest) -> Vec<RawResult> {
    match search_inner(client, cfg, request).await {
        Ok(results) => results,
        Err(err) => {
            tracing::warn!(%err, "prowlarr search failed");
            Vec::new()
        }
    }
}

async fn search_inner(
    client: &reqwest::Client,
    cfg: &Config,
    request: &SearchRequest,
) -> anyhow::Result<Vec<RawResult>> {
    let url = format!("{}/api/v1/search", cfg.prowlarr_url.trim_end_matches('/'));

    let mut params: Vec<(&str, String)> = Vec::new();
    if !request.query.is_empty() {
        params.push(("query", request.query.clone()));
    }
    // Categories go out repeated, not comma-joined; Prowlarr rejects the
    // joined form.
    for category in &request.categories {
        params.push(("categories", category.clone()));
    }
    if !request.indexer_ids.is_empty() {
        if request.indexer_ids.len() <= MAX_INDEXER_IDS {
            params.push(("indexerIds", request.indexer_ids.join(",")));
        } else {
            tracing::debug!(
                total = request.indexer_ids.len(),
                "omitting indexerIds to keep the search URL bounded"
            );
        }
    }
    if !request.search_type.is_empty() {
        params.push(("type", request.search_type.clone()));
    }
    for (key, value) in &request.identifiers {
        params.push((*key, value.clone()));
    }
    if let Some(limit) = &request.limit {
        // Clients send limit=0 on test searches; only forward a positive
        // numeric limit, and leave validation of anything else to Prowlarr.
        match limit.trim().parse::<i64>() {
            Ok(n) if n > 0 => params.push(("limit", n.to_string())),
            Ok(_) => {}
            Err(_) => params.push(("limit", limit.clone())),
        }
    }
    if let Some(offset) = &request.offset {
        params.push(("offset", offset.clone()));
    }

    tracing::debug!(
        url = %url,
        params = ?params,
        key = %mask_key(&cfg.prowlarr_api_key),
        "prowlarr search request"
    );

    let response = client
        .get(&url)
        .header("X-Api-Key", &cfg.prowlarr_api_key)
        .query(&params)
        .send()
        .await
        .context("prowlarr request")?
        .error_for_status()
        .context("prowlarr status")?;

    let data: Value = response.json().await.context("decode prowlarr response")?;
    let results = normalize_results(data);
    tracing::debug!(results = results.len(), "prowlarr search complete");
    Ok(results)
}

/// Prowlarr answers with a bare list on current versions, and with the list
/// tucked under one of a few envelope keys on others. Unknown shapes count
/// as no results.
pub fn normalize_results(data: Value) -> Vec<RawResult> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let key = ["records", "results", "items", "data", "result"]
                .into_iter()
                .find(|k| matches!(map.get(*k), Some(Value::Array(_))));
            match key.and_then(|k| map.remove(k)) {
                Some(Value::Array(items)) => items,
                _ => {
                    tracing::debug!("unknown prowlarr response shape");
                    return Vec::new();
                }
            }
        }
        _ => {
            tracing::debug!("unknown prowlarr response shape");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawResult>(item) {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::debug!(%err, "skipping undecodable search result");
                None
            }
        })
        .collect()
}

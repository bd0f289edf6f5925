use crate::config::{Config, mask_key};
use crate::magnet::InfoHash;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::time::sleep;

/// Cache-oracle verdicts, keyed by lowercase hash. Absence means "unknown";
/// presence means cached only when the stored record is truthy.
pub type CacheStatusMap = HashMap<InfoHash, Value>;

pub fn is_cached(map: &CacheStatusMap, hash: &InfoHash) -> bool {
    map.get(hash).is_some_and(truthy)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Unique hashes in first-seen order. Values are already case-folded by
/// [`InfoHash::normalize`], so one hash never spans two batches no matter
/// how the upstream spelled it.
pub fn dedupe_hashes(hashes: &[InfoHash]) -> Vec<InfoHash> {
    let mut seen: HashSet<&InfoHash> = HashSet::new();
    let mut out = Vec::new();
    for hash in hashes {
        if hash.as_str().is_empty() {
            continue;
        }
        if seen.insert(hash) {
            out.push(hash.clone());
        }
    }
    out
}

enum BatchOutcome {
    Hits(Value),
    AuthRejected,
    Exhausted,
}

/// Asks the TorBox oracle which hashes are already cached.
///
/// Hashes are deduped, then queried in batches no larger than the configured
/// chunk size. Transient failures retry with doubling backoff and then
/// degrade that batch to zero hits; a credential rejection aborts the
/// remaining batches and returns whatever has been aggregated so far. This
/// function never fails the request it serves.
pub async fn check_cached(
    client: &reqwest::Client,
    cfg: &Config,
    hashes: &[InfoHash],
) -> CacheStatusMap {
    let mut combined = CacheStatusMap::new();
    if hashes.is_empty() {
        return combined;
    }

    let unique = dedupe_hashes(hashes);
    tracing::debug!(
        total = hashes.len(),
        unique = unique.len(),
        url = %cfg.torbox_check_url,
        key = %mask_key(&cfg.torbox_api_key),
        "cache check"
    );

    for chunk in unique.chunks(cfg.torbox_chunk_size) {
        match call_batch(client, cfg, chunk).await {
            BatchOutcome::Hits(payload) => merge_payload(&mut combined, payload),
            BatchOutcome::AuthRejected => {
                tracing::warn!("cache oracle rejected credentials; aborting remaining batches");
                return combined;
            }
            BatchOutcome::Exhausted => {
                tracing::warn!(batch = chunk.len(), "cache batch failed after retries; counting zero hits");
            }
        }
    }

    tracing::info!(hits = combined.len(), "cache check done");
    combined
}

async fn call_batch(client: &reqwest::Client, cfg: &Config, chunk: &[InfoHash]) -> BatchOutcome {
    let payload = serde_json::json!({
        "hashes": chunk.iter().map(InfoHash::as_str).collect::<Vec<_>>(),
    });

    let mut backoff = cfg.torbox_retry_backoff;
    for attempt in 1..=cfg.torbox_max_retries {
        let result = client
            .post(&cfg.torbox_check_url)
            .bearer_auth(&cfg.torbox_api_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().as_u16() == 401 => {
                return BatchOutcome::AuthRejected;
            }
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => return BatchOutcome::Hits(body),
                    Err(err) => {
                        tracing::warn!(%err, attempt, max = cfg.torbox_max_retries, "cache response decode failed");
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    attempt,
                    max = cfg.torbox_max_retries,
                    "cache oracle error status"
                );
            }
            Err(err) => {
                tracing::warn!(%err, attempt, max = cfg.torbox_max_retries, "cache request failed");
            }
        }

        if attempt < cfg.torbox_max_retries {
            sleep(backoff).await;
            backoff *= 2;
        }
    }
    BatchOutcome::Exhausted
}

/// Folds one batch reply into the aggregate. The oracle has been seen
/// answering with `{"data": {hash: record}}`, `{"data": [{"hash": ..}]}`,
/// and bare top-level versions of both; anything else counts as zero hits.
fn merge_payload(combined: &mut CacheStatusMap, payload: Value) {
    match payload {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(data)) => {
                for (key, value) in data {
                    combined.insert(InfoHash::normalize(&key), value);
                }
            }
            Some(Value::Array(data)) => merge_record_list(combined, data),
            Some(other) => {
                tracing::debug!(kind = json_kind(&other), "unexpected cache data shape");
            }
            None => {
                for (key, value) in map {
                    combined.insert(InfoHash::normalize(&key), value);
                }
            }
        },
        Value::Array(data) => merge_record_list(combined, data),
        other => {
            tracing::debug!(kind = json_kind(&other), "unexpected cache response shape");
        }
    }
}

fn merge_record_list(combined: &mut CacheStatusMap, records: Vec<Value>) {
    for record in records {
        let hash = record
            .as_object()
            .and_then(|o| o.get("hash"))
            .and_then(Value::as_str)
            .map(InfoHash::normalize);
        if let Some(hash) = hash {
            combined.insert(hash, record);
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// 160-bit swarm identifier, held as 40 lowercase hex characters.
///
/// Identity is case-insensitive upstream; every value passes through
/// [`InfoHash::normalize`] so equality and hashing can stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InfoHash(String);

impl InfoHash {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One raw record as the upstream aggregator reports it. Field presence is
/// all over the place between indexers, so everything is optional and the
/// swarm counters tolerate numbers, numeric strings, or garbage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawResult {
    pub title: Option<String>,
    pub indexer: Option<String>,
    pub info_hash: Option<String>,
    pub magnet_uri: Option<String>,
    pub guid: Option<String>,
    pub enclosure: Option<Enclosure>,
    pub magnet_url: Option<String>,
    pub link: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub seeders: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub leechers: u32,
    #[serde(deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(alias = "pubDate", alias = "date")]
    pub publish_date: Option<String>,
}

/// Some indexers put the magnet in an RSS-style enclosure, either as an
/// object with a `url` member or as a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Enclosure {
    Url { url: String },
    Plain(String),
    Other(serde_json::Value),
}

/// Returns the magnet-like string for a record, probing the carrier fields
/// in a fixed order: the explicit magnet field, then a guid that holds a
/// magnet, then the enclosure.
pub fn magnet_uri_for(item: &RawResult) -> Option<&str> {
    if let Some(m) = item.magnet_uri.as_deref() {
        if !m.is_empty() {
            return Some(m);
        }
    }
    if let Some(g) = item.guid.as_deref() {
        if g.contains("magnet:?") {
            return Some(g);
        }
    }
    match &item.enclosure {
        Some(Enclosure::Url { url }) if url.contains("magnet:?") => Some(url),
        Some(Enclosure::Plain(s)) if s.contains("magnet:?") => Some(s),
        _ => None,
    }
}

/// Resolves the canonical info hash for a record: the explicit hash field
/// when present, otherwise the `xt` parameter of whichever carrier field
/// holds a magnet. Returns `None` when nothing resolves; callers treat that
/// as "no hash", never as an error.
pub fn resolve_hash(item: &RawResult) -> Option<InfoHash> {
    if let Some(h) = item.info_hash.as_deref() {
        if !h.trim().is_empty() {
            return Some(InfoHash::normalize(h));
        }
    }
    hash_from_magnet(magnet_uri_for(item)?)
}

pub fn hash_from_magnet(magnet: &str) -> Option<InfoHash> {
    let xt = xt_param(magnet)?;
    let tail = xt.rsplit(':').next()?;
    if tail.trim().is_empty() {
        return None;
    }
    Some(InfoHash::normalize(tail))
}

/// First `xt` value of a magnet's query string, percent-decoded, with the
/// `urn:btih:` prefix (and its original case) intact.
pub fn xt_param(magnet: &str) -> Option<String> {
    let (_, query) = magnet.split_once('?')?;
    let query = urlencoding::decode(query).ok()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("xt=") {
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Tracker URLs from a magnet's `tr=` parameters: percent-decoded, trimmed,
/// empties dropped, deduped preserving first-seen order.
pub fn extract_trackers(magnet: &str) -> Vec<String> {
    let Some((_, query)) = magnet.split_once('?') else {
        return Vec::new();
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for part in query.split('&') {
        let Some(value) = part.strip_prefix("tr=") else {
            continue;
        };
        let Ok(decoded) = urlencoding::decode(value) else {
            continue;
        };
        let tracker = decoded.trim();
        if tracker.is_empty() {
            continue;
        }
        if seen.insert(tracker.to_string()) {
            out.push(tracker.to_string());
        }
    }
    out
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(count_from_value(&value).min(u32::MAX as u64) as u32)
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

fn count_from_value(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|x| x.max(0) as u64)
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<i64>().map(|x| x.max(0) as u64).unwrap_or(0),
        _ => 0,
    }
}

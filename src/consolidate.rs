use crate::cache::{CacheStatusMap, is_cached};
use crate::magnet::{InfoHash, RawResult, extract_trackers, magnet_uri_for, resolve_hash, xt_param};
use std::collections::{HashMap, HashSet};

/// Collapses duplicate announcements of the same info hash into one record
/// per hash, carrying the union of every member's trackers, then applies the
/// cache boost or scrape estimate to the seeder count.
///
/// Records with no resolvable hash pass through untouched, after the
/// consolidated groups. Group output order is the first appearance of each
/// hash in the input, so running this over its own output is a no-op.
pub fn consolidate(
    results: Vec<RawResult>,
    cached: &CacheStatusMap,
    estimates: &HashMap<InfoHash, u32>,
    seeders_boost: u32,
) -> Vec<RawResult> {
    let mut order: Vec<InfoHash> = Vec::new();
    let mut groups: HashMap<InfoHash, Vec<RawResult>> = HashMap::new();
    let mut pass_through: Vec<RawResult> = Vec::new();

    for item in results {
        match resolve_hash(&item) {
            Some(hash) => {
                let group = groups.entry(hash.clone()).or_default();
                if group.is_empty() {
                    order.push(hash);
                }
                group.push(item);
            }
            None => pass_through.push(item),
        }
    }

    let mut out = Vec::with_capacity(order.len() + pass_through.len());
    for hash in order {
        if let Some(members) = groups.remove(&hash) {
            out.push(consolidate_group(&hash, members, cached, estimates, seeders_boost));
        }
    }
    out.extend(pass_through);
    out
}

fn consolidate_group(
    hash: &InfoHash,
    mut members: Vec<RawResult>,
    cached: &CacheStatusMap,
    estimates: &HashMap<InfoHash, u32>,
    seeders_boost: u32,
) -> RawResult {
    // Union of trackers, walked in original member order.
    let mut seen: HashSet<String> = HashSet::new();
    let mut trackers: Vec<String> = Vec::new();
    for member in &members {
        if let Some(magnet) = magnet_uri_for(member) {
            for tracker in extract_trackers(magnet) {
                if seen.insert(tracker.clone()) {
                    trackers.push(tracker);
                }
            }
        }
    }

    // The member with the highest raw seeders donates the metadata. Ties keep
    // the earliest member, and the pick happens before any boost/estimate.
    let mut donor = 0;
    for (i, member) in members.iter().enumerate() {
        if member.seeders > members[donor].seeders {
            donor = i;
        }
    }
    let mut canonical = members.swap_remove(donor);

    let base = magnet_uri_for(&canonical)
        .filter(|m| m.contains("magnet:?"))
        .and_then(xt_param)
        .map(|xt| format!("magnet:?xt={xt}"))
        .unwrap_or_else(|| format!("magnet:?xt=urn:btih:{hash}"));

    let magnet = if trackers.is_empty() {
        base
    } else {
        let connector = if base.contains('?') { '&' } else { '?' };
        let tr_parts = trackers
            .iter()
            .map(|t| format!("tr={t}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{base}{connector}{tr_parts}")
    };

    tracing::debug!(
        hash = %hash,
        donor = canonical.indexer.as_deref().unwrap_or("unknown"),
        trackers = trackers.len(),
        magnet_len = magnet.len(),
        "consolidated"
    );

    // The rebuilt magnet and the canonical identifier always match.
    canonical.guid = Some(magnet.clone());
    canonical.magnet_uri = Some(magnet);
    canonical.info_hash = Some(hash.as_str().to_string());

    if is_cached(cached, hash) {
        canonical.seeders = canonical.seeders.max(seeders_boost);
    } else if let Some(estimate) = estimates.get(hash) {
        canonical.seeders = canonical.seeders.max(*estimate);
    }

    canonical
}

/// Inverts still-uncached consolidated results into tracker -> hashes, the
/// shape the scrape engine consumes.
pub fn uncached_tracker_map(
    results: &[RawResult],
    cached: &CacheStatusMap,
) -> HashMap<String, Vec<InfoHash>> {
    let mut map: HashMap<String, Vec<InfoHash>> = HashMap::new();
    for item in results {
        let Some(hash) = resolve_hash(item) else {
            continue;
        };
        if is_cached(cached, &hash) {
            continue;
        }
        let Some(magnet) = magnet_uri_for(item) else {
            continue;
        };
        for tracker in extract_trackers(magnet) {
            map.entry(tracker).or_default().push(hash.clone());
        }
    }
    map
}

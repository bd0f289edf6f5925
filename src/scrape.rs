use crate::config::Config;
use crate::magnet::InfoHash;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use url::Url;

// BEP 15 wire constants.
const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_SCRAPE: u32 = 2;

/// Estimates seeders for every hash in the tracker -> hashes inversion by
/// scraping each UDP tracker directly.
///
/// Every (tracker, hash-chunk) pair becomes one task holding one ephemeral
/// socket for one connect+scrape exchange, gated by a counting semaphore.
/// The estimate for a hash is the maximum seeder count any unit reported;
/// a unit that fails in any way contributes nothing. Non-UDP trackers are
/// ignored outright.
pub async fn scrape_trackers(
    cfg: &Config,
    tracker_map: HashMap<String, Vec<InfoHash>>,
) -> HashMap<InfoHash, u32> {
    let sem = Arc::new(Semaphore::new(cfg.scrape_concurrency));
    let mut units = JoinSet::new();

    tracing::debug!(
        trackers = tracker_map.len(),
        concurrency = cfg.scrape_concurrency,
        batch = cfg.scrape_batch_size,
        "tracker scrape start"
    );

    for (tracker, hashes) in tracker_map {
        let Some((host, port)) = udp_endpoint(&tracker, cfg.tracker_default_port) else {
            tracing::debug!(tracker = %tracker, "skipping non-udp tracker");
            continue;
        };
        for chunk in hashes.chunks(cfg.scrape_batch_size) {
            let sem = sem.clone();
            let host = host.clone();
            let chunk = chunk.to_vec();
            let exchange_timeout = cfg.scrape_timeout;
            units.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return HashMap::new();
                };
                scrape_unit(&host, port, &chunk, exchange_timeout).await
            });
        }
    }

    // Joining here is the only synchronization point; per-unit results fold
    // into a per-hash maximum.
    let mut best: HashMap<InfoHash, u32> = HashMap::new();
    while let Some(joined) = units.join_next().await {
        let Ok(unit) = joined else { continue };
        for (hash, seeders) in unit {
            let entry = best.entry(hash).or_insert(0);
            if seeders > *entry {
                *entry = seeders;
            }
        }
    }

    tracing::debug!(hashes = best.len(), "tracker scrape done");
    best
}

/// Host and port for a `udp://` tracker URL; `None` for any other scheme.
fn udp_endpoint(tracker: &str, default_port: u16) -> Option<(String, u16)> {
    let parsed = Url::parse(tracker).ok()?;
    if !parsed.scheme().eq_ignore_ascii_case("udp") {
        return None;
    }
    let host = parsed.host_str()?.to_string();
    Some((host, parsed.port().unwrap_or(default_port)))
}

/// One connect+scrape exchange. Failures of any kind degrade to an empty
/// map; the engine never retries a tracker within a request.
async fn scrape_unit(
    host: &str,
    port: u16,
    hashes: &[InfoHash],
    exchange_timeout: Duration,
) -> HashMap<InfoHash, u32> {
    match scrape_exchange(host, port, hashes, exchange_timeout).await {
        Ok(stats) => stats,
        Err(err) => {
            tracing::debug!(%err, host = %host, port, hashes = hashes.len(), "scrape unit failed");
            HashMap::new()
        }
    }
}

async fn scrape_exchange(
    host: &str,
    port: u16,
    hashes: &[InfoHash],
    exchange_timeout: Duration,
) -> anyhow::Result<HashMap<InfoHash, u32>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.context("bind scrape socket")?;
    socket.connect((host, port)).await.context("connect scrape socket")?;

    // Connect handshake: fixed magic, action 0, random transaction id.
    let connect_tx = rand::random::<u32>();
    let mut request = [0u8; 16];
    request[..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    request[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
    request[12..16].copy_from_slice(&connect_tx.to_be_bytes());
    socket.send(&request).await?;

    let mut reply = [0u8; 16];
    let n = timeout(exchange_timeout, socket.recv(&mut reply))
        .await
        .context("connect reply timed out")??;
    if n < 16 {
        anyhow::bail!("short connect reply: {n} bytes");
    }
    let action = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    let reply_tx = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);
    if action != ACTION_CONNECT {
        anyhow::bail!("unexpected connect action {action}");
    }
    if reply_tx != connect_tx {
        anyhow::bail!("connect transaction mismatch");
    }
    let connection_id = u64::from_be_bytes([
        reply[8], reply[9], reply[10], reply[11], reply[12], reply[13], reply[14], reply[15],
    ]);

    // Scrape: connection id, action 2, fresh transaction id, then the raw
    // 20-byte hashes. A hash that does not hex-decode is left out of both
    // the payload and the positional accounting below.
    let scrape_tx = rand::random::<u32>();
    let mut request = Vec::with_capacity(16 + hashes.len() * 20);
    request.extend_from_slice(&connection_id.to_be_bytes());
    request.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
    request.extend_from_slice(&scrape_tx.to_be_bytes());
    let mut sent: Vec<&InfoHash> = Vec::with_capacity(hashes.len());
    for hash in hashes {
        match hex::decode(hash.as_str()) {
            Ok(raw) if raw.len() == 20 => {
                request.extend_from_slice(&raw);
                sent.push(hash);
            }
            _ => tracing::debug!(hash = %hash, "skipping undecodable hash"),
        }
    }
    if sent.is_empty() {
        return Ok(HashMap::new());
    }
    socket.send(&request).await?;

    let mut reply = vec![0u8; 8 + sent.len() * 12];
    let n = timeout(exchange_timeout, socket.recv(&mut reply))
        .await
        .context("scrape reply timed out")??;
    if n < 8 {
        anyhow::bail!("short scrape reply: {n} bytes");
    }
    let action = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    let reply_tx = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);
    if action != ACTION_SCRAPE {
        anyhow::bail!("unexpected scrape action {action}");
    }
    if reply_tx != scrape_tx {
        anyhow::bail!("scrape transaction mismatch");
    }

    // One 12-byte {seeders, leechers, completed} record per sent hash, in
    // request order; chunks_exact drops a truncated trailing record.
    let mut stats = HashMap::new();
    for (i, record) in reply[8..n].chunks_exact(12).enumerate() {
        if i >= sent.len() {
            break;
        }
        let seeders = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        stats.insert(sent[i].clone(), seeders);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    /// Minimal in-process tracker: answers one connect and one scrape,
    /// echoing transaction ids and reporting the given seeder counts in
    /// request order.
    async fn mock_tracker(seeders: Vec<u32>) -> std::net::SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];

            let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert!(n >= 16, "connect request too short");
            assert_eq!(
                u64::from_be_bytes(buf[..8].try_into().unwrap()),
                PROTOCOL_ID
            );
            let mut reply = Vec::with_capacity(16);
            reply.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&0x0102_0304_0506_0708u64.to_be_bytes());
            socket.send_to(&reply, peer).await.unwrap();

            let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert!(n >= 16, "scrape request too short");
            assert_eq!((n - 16) % 20, 0, "scrape payload not whole hashes");
            let mut reply = Vec::new();
            reply.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
            reply.extend_from_slice(&buf[12..16]);
            for s in seeders {
                reply.extend_from_slice(&s.to_be_bytes());
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(&0u32.to_be_bytes());
            }
            socket.send_to(&reply, peer).await.unwrap();
        });
        addr
    }

    fn hashes(raw: &[&str]) -> Vec<InfoHash> {
        raw.iter().map(|h| InfoHash::normalize(h)).collect()
    }

    #[tokio::test]
    async fn scrape_unit_maps_records_positionally() {
        let addr = mock_tracker(vec![5, 10]).await;
        let stats = scrape_unit(
            &addr.ip().to_string(),
            addr.port(),
            &hashes(&[HASH_A, HASH_B]),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[&InfoHash::normalize(HASH_A)], 5);
        assert_eq!(stats[&InfoHash::normalize(HASH_B)], 10);
    }

    #[tokio::test]
    async fn undecodable_hash_is_skipped_not_fatal() {
        let addr = mock_tracker(vec![7]).await;
        let stats = scrape_unit(
            &addr.ip().to_string(),
            addr.port(),
            &hashes(&["not-hex-at-all", HASH_A]),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&InfoHash::normalize(HASH_A)], 7);
    }

    #[tokio::test]
    async fn silent_tracker_yields_empty_map() {
        // Bound but never reads; the connect reply never comes.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let stats = scrape_unit(
            &addr.ip().to_string(),
            addr.port(),
            &hashes(&[HASH_A]),
            Duration::from_millis(100),
        )
        .await;
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn aggregation_takes_maximum_across_trackers() {
        let low = mock_tracker(vec![5]).await;
        let high = mock_tracker(vec![10]).await;

        let mut tracker_map = HashMap::new();
        tracker_map.insert(
            format!("udp://{}:{}/announce", low.ip(), low.port()),
            hashes(&[HASH_A]),
        );
        tracker_map.insert(
            format!("udp://{}:{}/announce", high.ip(), high.port()),
            hashes(&[HASH_A]),
        );

        let cfg = test_config();
        let best = scrape_trackers(&cfg, tracker_map).await;
        assert_eq!(best[&InfoHash::normalize(HASH_A)], 10);
    }

    #[tokio::test]
    async fn non_udp_trackers_are_ignored() {
        let mut tracker_map = HashMap::new();
        tracker_map.insert(
            "http://tracker.example/announce".to_string(),
            hashes(&[HASH_A]),
        );

        let cfg = test_config();
        let best = scrape_trackers(&cfg, tracker_map).await;
        assert!(best.is_empty());
    }

    #[test]
    fn udp_endpoint_parsing() {
        assert_eq!(
            udp_endpoint("udp://tracker.example:6969/announce", 80),
            Some(("tracker.example".to_string(), 6969))
        );
        assert_eq!(
            udp_endpoint("udp://tracker.example/announce", 80),
            Some(("tracker.example".to_string(), 80))
        );
        assert_eq!(udp_endpoint("http://tracker.example/announce", 80), None);
        assert_eq!(udp_endpoint("not a url", 80), None);
    }
}

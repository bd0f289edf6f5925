use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

// TorBox accepts at most this many hashes per checkcached call.
const ORACLE_BATCH_LIMIT: usize = 100;

#[derive(Clone, Debug)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub http_timeout: Duration,

    // Upstream indexer aggregator
    pub prowlarr_url: String,
    pub prowlarr_api_key: String,
    pub test_fallback_query: String,

    // Cache oracle
    pub torbox_api_key: String,
    pub torbox_check_url: String,
    pub torbox_chunk_size: usize,
    pub torbox_max_retries: u32,
    pub torbox_retry_backoff: Duration,

    // Tracker scraping
    pub scrape_enabled: bool,
    pub scrape_concurrency: usize,
    pub scrape_timeout: Duration,
    pub scrape_batch_size: usize,
    pub tracker_default_port: u16,

    // Seeder count assigned to cached items (never below the raw value).
    pub seeders_boost: u32,

    // Optional external-id -> title lookup
    pub tmdb_api_key: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // If a .env file exists, load it. If not, keep going.
        // Precedence: process env > .env > code defaults.
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    fn from_env() -> anyhow::Result<Self> {
        let http_addr = env_string("CACHARR_ADDR", "0.0.0.0:8080");
        let http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|e| anyhow::anyhow!("parse CACHARR_ADDR: {e}"))?;
        let http_timeout = Duration::from_secs(env_u64("CACHARR_HTTP_TIMEOUT_SECS", 30));

        let prowlarr_url = env_required("PROWLARR_URL")?;
        let prowlarr_api_key = env_required("PROWLARR_API_KEY")?;
        let test_fallback_query = env_string("CACHARR_TEST_FALLBACK_QUERY", "");

        let torbox_api_key = env_required("TORBOX_API_KEY")?;
        let torbox_check_url = env_string(
            "TORBOX_CHECK_URL",
            "https://api.torbox.app/v1/api/torrents/checkcached",
        );
        let torbox_chunk_size = env_usize("TORBOX_CHUNK_SIZE", 100).clamp(1, ORACLE_BATCH_LIMIT);
        let torbox_max_retries = env_u32("TORBOX_MAX_RETRIES", 3).max(1);
        let torbox_retry_backoff = Duration::from_millis(env_u64("TORBOX_RETRY_BACKOFF_MS", 500));

        let scrape_enabled = env_enabled("CACHARR_TRACKER_SCRAPE", false);
        let scrape_concurrency = env_usize("CACHARR_TRACKER_SCRAPE_CONCURRENCY", 4).max(1);
        let scrape_timeout =
            Duration::from_millis(env_u64("CACHARR_TRACKER_SCRAPE_TIMEOUT_MS", 5_000));
        let scrape_batch_size = env_usize("CACHARR_TRACKER_SCRAPE_BATCH_SIZE", 50).max(1);
        let tracker_default_port = env_u16("CACHARR_TRACKER_DEFAULT_PORT", 80);

        let seeders_boost = env_u32("CACHARR_SEEDERS_BOOST", 10_000);

        let tmdb_api_key = env_opt_string("TMDB_API_KEY");

        Ok(Self {
            http_addr,
            http_timeout,

            prowlarr_url,
            prowlarr_api_key,
            test_fallback_query,

            torbox_api_key,
            torbox_check_url,
            torbox_chunk_size,
            torbox_max_retries,
            torbox_retry_backoff,

            scrape_enabled,
            scrape_concurrency,
            scrape_timeout,
            scrape_batch_size,
            tracker_default_port,

            seeders_boost,

            tmdb_api_key,
        })
    }
}

/// Masks a credential for safe debug logging.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    format!(
        "{}{}{}",
        &key[..4],
        "*".repeat(key.len() - 8),
        &key[key.len() - 4..]
    )
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_required(name: &str) -> anyhow::Result<String> {
    env_opt_string(name).ok_or_else(|| anyhow::anyhow!("{name} must be set"))
}

fn env_string(name: &str, default: &str) -> String {
    env_opt_string(name).unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_enabled(name: &str, default: bool) -> bool {
    match env_opt_string(name) {
        None => default,
        Some(v) => {
            let v = v.to_ascii_lowercase();
            if matches!(v.as_str(), "0" | "false" | "off" | "no") {
                return false;
            }
            if matches!(v.as_str(), "1" | "true" | "on" | "yes") {
                return true;
            }
            default
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        http_addr: SocketAddr::from_str("127.0.0.1:0").unwrap(),
        http_timeout: Duration::from_secs(5),
        prowlarr_url: "http://127.0.0.1:9696".to_string(),
        prowlarr_api_key: "prowlarr-test-key".to_string(),
        test_fallback_query: String::new(),
        torbox_api_key: "torbox-test-key".to_string(),
        torbox_check_url: "http://127.0.0.1:1/checkcached".to_string(),
        torbox_chunk_size: 100,
        torbox_max_retries: 3,
        torbox_retry_backoff: Duration::from_millis(1),
        scrape_enabled: true,
        scrape_concurrency: 4,
        scrape_timeout: Duration::from_millis(500),
        scrape_batch_size: 50,
        tracker_default_port: 80,
        seeders_boost: 10_000,
        tmdb_api_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns every env var this module reads; keeping it single avoids
    // cross-test races on the process environment.
    #[test]
    fn required_values_and_clamping() {
        unsafe {
            std::env::remove_var("PROWLARR_URL");
            std::env::remove_var("PROWLARR_API_KEY");
            std::env::remove_var("TORBOX_API_KEY");
        }
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("PROWLARR_URL"));

        unsafe {
            std::env::set_var("PROWLARR_URL", "http://localhost:9696");
            std::env::set_var("PROWLARR_API_KEY", "k");
            std::env::set_var("TORBOX_API_KEY", "k");
            std::env::set_var("TORBOX_CHUNK_SIZE", "500");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.torbox_chunk_size, 100);
        assert_eq!(cfg.tracker_default_port, 80);
        assert!(!cfg.scrape_enabled);
    }

    #[test]
    fn mask_key_keeps_edges_only() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("abcdefghijkl"), "abcd****ijkl");
    }
}

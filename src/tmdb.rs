use crate::config::Config;
use serde::Deserialize;
use std::time::Duration;

const FIND_TIMEOUT: Duration = Duration::from_secs(3);

/// External identifiers a Torznab client may send instead of a query.
#[derive(Debug, Default, Clone)]
pub struct ExternalIds {
    pub imdbid: Option<String>,
    pub tmdbid: Option<String>,
    pub tvdbid: Option<String>,
    pub rid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<MovieHit>,
    #[serde(default)]
    tv_results: Vec<TvHit>,
}

#[derive(Debug, Deserialize)]
struct MovieHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct TvHit {
    #[serde(default)]
    name: String,
    #[serde(default)]
    first_air_date: String,
}

/// Resolves a `Title Year` query string from external ids via TMDB, so
/// indexers that cannot search by id still get a usable text query. Without
/// a configured key, or on any lookup failure, this quietly yields nothing.
pub async fn lookup_title(
    client: &reqwest::Client,
    cfg: &Config,
    ids: &ExternalIds,
    search_type: &str,
) -> Option<String> {
    let Some(key) = cfg.tmdb_api_key.as_deref() else {
        tracing::debug!("TMDB_API_KEY not configured; skipping title lookup");
        return None;
    };

    // IMDb ids cover both movies and shows; try them first.
    if let Some(imdb) = ids.imdbid.as_deref() {
        let url = format!(
            "https://api.themoviedb.org/3/find/tt{imdb}?api_key={key}&external_source=imdb_id"
        );
        if let Some(title) = find_lookup(client, &url, true).await {
            tracing::info!(title = %title, source = "imdb", "resolved title via TMDB");
            return Some(title);
        }
    }

    if let Some(tvdb) = ids.tvdbid.as_deref() {
        let url = format!(
            "https://api.themoviedb.org/3/find/{tvdb}?api_key={key}&external_source=tvdb_id"
        );
        if let Some(title) = find_lookup(client, &url, false).await {
            tracing::info!(title = %title, source = "tvdb", "resolved title via TMDB");
            return Some(title);
        }
    }

    // TVRage is long dead but TMDB still resolves its ids.
    if let Some(rid) = ids.rid.as_deref() {
        let url = format!(
            "https://api.themoviedb.org/3/find/{rid}?api_key={key}&external_source=tvrage_id"
        );
        if let Some(title) = find_lookup(client, &url, false).await {
            tracing::info!(title = %title, source = "tvrage", "resolved title via TMDB");
            return Some(title);
        }
    }

    if let Some(tmdb) = ids.tmdbid.as_deref() {
        let title = if matches!(search_type, "movie" | "search") {
            let url = format!("https://api.themoviedb.org/3/movie/{tmdb}?api_key={key}");
            fetch::<MovieHit>(client, &url)
                .await
                .and_then(|hit| title_with_year(&hit.title, &hit.release_date))
        } else {
            let url = format!("https://api.themoviedb.org/3/tv/{tmdb}?api_key={key}");
            fetch::<TvHit>(client, &url)
                .await
                .and_then(|hit| title_with_year(&hit.name, &hit.first_air_date))
        };
        if let Some(title) = title {
            tracing::info!(title = %title, source = "tmdb", "resolved title via TMDB");
            return Some(title);
        }
    }

    tracing::debug!("title lookup found nothing");
    None
}

async fn find_lookup(client: &reqwest::Client, url: &str, movies_first: bool) -> Option<String> {
    let found = fetch::<FindResponse>(client, url).await?;
    if movies_first {
        if let Some(hit) = found.movie_results.first() {
            if let Some(title) = title_with_year(&hit.title, &hit.release_date) {
                return Some(title);
            }
        }
    }
    found
        .tv_results
        .first()
        .and_then(|hit| title_with_year(&hit.name, &hit.first_air_date))
}

async fn fetch<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Option<T> {
    let response = client
        .get(url)
        .timeout(FIND_TIMEOUT)
        .send()
        .await
        .map_err(|err| tracing::debug!(%err, "TMDB request failed"))
        .ok()?;
    if !response.status().is_success() {
        tracing::debug!(status = response.status().as_u16(), "TMDB lookup status");
        return None;
    }
    response
        .json::<T>()
        .await
        .map_err(|err| tracing::debug!(%err, "TMDB response decode failed"))
        .ok()
}

/// `"The Matrix" + "1999-03-31"` -> `"The Matrix 1999"`; empty title is a
/// miss, missing date keeps the bare title.
fn title_with_year(title: &str, date: &str) -> Option<String> {
    if title.is_empty() {
        return None;
    }
    match date.split('-').next().filter(|y| !y.is_empty()) {
        Some(year) => Some(format!("{title} {year}")),
        None => Some(title.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn title_year_formatting() {
        assert_eq!(
            title_with_year("The Matrix", "1999-03-31"),
            Some("The Matrix 1999".to_string())
        );
        assert_eq!(title_with_year("Show", ""), Some("Show".to_string()));
        assert_eq!(title_with_year("", "1999-03-31"), None);
    }

    #[tokio::test]
    async fn missing_key_skips_lookup_entirely() {
        let cfg = test_config();
        assert!(cfg.tmdb_api_key.is_none());
        let client = reqwest::Client::new();
        let ids = ExternalIds {
            imdbid: Some("0133093".to_string()),
            ..Default::default()
        };
        assert!(lookup_title(&client, &cfg, &ids, "movie").await.is_none());
    }
}

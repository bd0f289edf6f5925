use crate::cache::{CacheStatusMap, is_cached};
use crate::magnet::{InfoHash, RawResult, magnet_uri_for, resolve_hash};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};

const FEED_TITLE: &str = "Cacharr Cached Indexer";
const TORZNAB_NS: &str = "http://torznab.com/schemas/2015/feed";

/// Static Torznab capabilities document.
pub fn caps_xml() -> &'static str {
    r#"<caps>
  <searching>
    <search available="yes" supportedParams="q"/>
    <tv-search available="yes" supportedParams="q,season,ep"/>
    <movie-search available="yes" supportedParams="q,imdbid"/>
  </searching>
  <categories>
    <category id="2000" name="Movies"/>
    <category id="5000" name="TV"/>
  </categories>
</caps>"#
}

/// Feed with no items, for requests that produce nothing to enrich.
pub fn empty_feed() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n<channel>\n<title>{}</title>\n</channel>\n</rss>\n",
        xml_escape(FEED_TITLE)
    )
}

/// Renders the consolidated results as a Torznab feed.
///
/// Cached items get a `[CACHED]` title prefix and the boost floor; uncached
/// items take the scrape estimate when it beats the raw count. Both
/// adjustments were already applied during consolidation, so re-applying
/// them here is a no-op max. One item per hash makes it to the feed.
pub fn render_feed(
    results: &[RawResult],
    cached: &CacheStatusMap,
    estimates: &HashMap<InfoHash, u32>,
    seeders_boost: u32,
) -> String {
    let mut xml = String::with_capacity(1024 + results.len() * 512);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!("<rss version=\"2.0\" xmlns:torznab=\"{TORZNAB_NS}\">\n"));
    xml.push_str("<channel>\n");
    xml.push_str(&format!("<title>{}</title>\n", xml_escape(FEED_TITLE)));

    let mut emitted: HashSet<InfoHash> = HashSet::new();
    for item in results {
        let hash = resolve_hash(item);
        if let Some(h) = &hash {
            if !emitted.insert(h.clone()) {
                continue;
            }
        }
        let item_cached = hash.as_ref().is_some_and(|h| is_cached(cached, h));

        let mut title = item.title.clone().unwrap_or_else(|| "Unknown".to_string());
        if item_cached {
            title = format!("[CACHED] {title}");
        }

        // The GUID carries the consolidated magnet so the client hands the
        // full tracker union to its download client.
        let guid = item
            .magnet_uri
            .clone()
            .or_else(|| item.guid.clone())
            .unwrap_or_default();
        let link = item
            .link
            .clone()
            .or_else(|| item.magnet_url.clone())
            .or_else(|| item.magnet_uri.clone())
            .or_else(|| magnet_uri_for(item).map(str::to_string))
            .unwrap_or_else(|| guid.clone());

        let mut seeders = item.seeders;
        if item_cached {
            seeders = seeders.max(seeders_boost);
        } else if let Some(h) = &hash {
            if let Some(estimate) = estimates.get(h) {
                seeders = seeders.max(*estimate);
            }
        }

        xml.push_str("<item>\n");
        push_element(&mut xml, "title", &title);
        push_element(&mut xml, "guid", &guid);
        push_element(&mut xml, "link", &link);
        push_element(&mut xml, "pubDate", &format_pub_date(item.publish_date.as_deref()));
        xml.push_str(&format!(
            "<enclosure url=\"{}\" type=\"application/x-bittorrent\"/>\n",
            xml_escape(&link)
        ));
        push_attr(&mut xml, "seeders", &seeders.to_string());
        push_attr(&mut xml, "peers", &item.leechers.to_string());
        if let Some(h) = &hash {
            push_attr(&mut xml, "infohash", h.as_str());
        }
        push_attr(&mut xml, "size", &item.size.to_string());
        xml.push_str("</item>\n");
    }

    xml.push_str("</channel>\n</rss>\n");
    xml
}

fn push_element(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("<{tag}>{}</{tag}>\n", xml_escape(value)));
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    xml.push_str(&format!(
        "<torznab:attr name=\"{name}\" value=\"{}\"/>\n",
        xml_escape(value)
    ));
}

/// RFC 1123, the one date shape every Torznab consumer accepts. Upstream
/// dates are ISO 8601 when present; anything unparseable falls back to now
/// rather than failing the feed.
fn format_pub_date(raw: Option<&str>) -> String {
    let parsed = raw.and_then(parse_publish_date).unwrap_or_else(Utc::now);
    parsed.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_publish_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HASH: &str = "aabbccddeeff00112233445566778899aabbccdd";

    fn item(title: &str, seeders: u32) -> RawResult {
        RawResult {
            title: Some(title.to_string()),
            info_hash: Some(HASH.to_string()),
            magnet_uri: Some(format!("magnet:?xt=urn:btih:{HASH}&tr=udp://one:80/a")),
            guid: Some(format!("magnet:?xt=urn:btih:{HASH}&tr=udp://one:80/a")),
            seeders,
            leechers: 3,
            size: 1024,
            publish_date: Some("2025-05-10T16:57:09Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn cached_item_is_prefixed_and_boosted() {
        let mut cached = CacheStatusMap::new();
        cached.insert(InfoHash::normalize(HASH), json!(true));

        let xml = render_feed(&[item("Release", 1)], &cached, &HashMap::new(), 10_000);
        assert!(xml.contains("<title>[CACHED] Release</title>"));
        assert!(xml.contains("<torznab:attr name=\"seeders\" value=\"10000\"/>"));
    }

    #[test]
    fn uncached_item_takes_estimate() {
        let mut estimates = HashMap::new();
        estimates.insert(InfoHash::normalize(HASH), 50);

        let xml = render_feed(&[item("Release", 1)], &CacheStatusMap::new(), &estimates, 10_000);
        assert!(xml.contains("<title>Release</title>"));
        assert!(xml.contains("<torznab:attr name=\"seeders\" value=\"50\"/>"));
    }

    #[test]
    fn guid_is_the_consolidated_magnet() {
        let xml = render_feed(&[item("Release", 1)], &CacheStatusMap::new(), &HashMap::new(), 10_000);
        assert!(xml.contains(&format!(
            "<guid>magnet:?xt=urn:btih:{HASH}&amp;tr=udp://one:80/a</guid>"
        )));
        assert!(xml.contains(&format!("<torznab:attr name=\"infohash\" value=\"{HASH}\"/>")));
    }

    #[test]
    fn pub_date_is_rfc1123() {
        let xml = render_feed(&[item("Release", 1)], &CacheStatusMap::new(), &HashMap::new(), 10_000);
        assert!(xml.contains("<pubDate>Sat, 10 May 2025 16:57:09 GMT</pubDate>"));
    }

    #[test]
    fn malformed_date_falls_back_instead_of_failing() {
        let mut bad = item("Release", 1);
        bad.publish_date = Some("not a date".to_string());
        let xml = render_feed(&[bad], &CacheStatusMap::new(), &HashMap::new(), 10_000);
        assert!(xml.contains("GMT</pubDate>"));
    }

    #[test]
    fn duplicate_hashes_emit_once() {
        let xml = render_feed(
            &[item("One", 1), item("Two", 2)],
            &CacheStatusMap::new(),
            &HashMap::new(),
            10_000,
        );
        assert_eq!(xml.matches("<item>").count(), 1);
        assert!(xml.contains("<title>One</title>"));
    }

    #[test]
    fn hashless_item_still_renders() {
        let loose = RawResult {
            title: Some("No Hash".to_string()),
            link: Some("https://indexer.example/dl/1".to_string()),
            seeders: 4,
            ..Default::default()
        };
        let xml = render_feed(&[loose], &CacheStatusMap::new(), &HashMap::new(), 10_000);
        assert!(xml.contains("<title>No Hash</title>"));
        assert!(xml.contains("<link>https://indexer.example/dl/1</link>"));
        assert!(!xml.contains("name=\"infohash\""));
        assert!(xml.contains("<torznab:attr name=\"seeders\" value=\"4\"/>"));
    }

    #[test]
    fn titles_are_escaped() {
        let mut tricky = item("Tom & Jerry <HD>", 1);
        tricky.publish_date = None;
        let xml = render_feed(&[tricky], &CacheStatusMap::new(), &HashMap::new(), 10_000);
        assert!(xml.contains("<title>Tom &amp; Jerry &lt;HD&gt;</title>"));
    }

    #[test]
    fn caps_lists_search_modes() {
        let caps = caps_xml();
        assert!(caps.contains("<search available=\"yes\""));
        assert!(caps.contains("<tv-search available=\"yes\""));
        assert!(caps.contains("<movie-search available=\"yes\""));
    }
}

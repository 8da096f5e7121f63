//! Directory-stream track discovery.
//!
//! A directory stream's files are not declared in the catalog; they are
//! discovered by fetching the server's index page and scanning its
//! hyperlinks.  Results are cached per directory url for the life of the
//! process, so a directory is fetched at most once.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use scraper::{Html, Selector};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Extensions accepted as playable audio, matched against the lower-cased
/// path component of each resolved link.
pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 6] =
    [".mp3", ".m4a", ".aac", ".wav", ".ogg", ".flac"];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid directory url '{0}'")]
    InvalidUrl(String),
    #[error("directory listing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory listing returned HTTP {status}")]
    Status { status: u16 },
}

#[derive(Clone, Default)]
pub struct DirectoryResolver {
    client: reqwest::Client,
    cache: Arc<Mutex<HashMap<String, Arc<Vec<String>>>>>,
}

impl DirectoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the cache for a directory url.  Used by tests and by
    /// anything that already knows a directory's contents.
    pub async fn seed(&self, dir_url: &str, tracks: Vec<String>) {
        self.cache
            .lock()
            .await
            .insert(dir_url.to_string(), Arc::new(tracks));
    }

    /// Resolve a directory stream to its ordered track list.
    ///
    /// Cache-first: repeat calls for a known directory return the stored
    /// list without network access.  A fresh scan fetches the index page
    /// with cache-bypass headers so the listing reflects the server's
    /// current contents, then stores the extracted tracks before returning.
    pub async fn resolve(&self, dir_url: &str) -> Result<Arc<Vec<String>>, ResolveError> {
        if let Some(cached) = self.cache.lock().await.get(dir_url) {
            debug!("directory cache hit: {}", dir_url);
            return Ok(Arc::clone(cached));
        }

        if !dir_url.ends_with('/') {
            return Err(ResolveError::InvalidUrl(dir_url.to_string()));
        }
        let base = reqwest::Url::parse(dir_url)
            .map_err(|_| ResolveError::InvalidUrl(dir_url.to_string()))?;

        let response = self
            .client
            .get(base.clone())
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let tracks = Arc::new(extract_tracks(&body, &base));
        debug!("scanned {}: {} track(s)", dir_url, tracks.len());

        self.cache
            .lock()
            .await
            .insert(dir_url.to_string(), Arc::clone(&tracks));
        Ok(tracks)
    }
}

/// Extract the playable track urls from a directory index page.
///
/// Every `a[href]` target is resolved against the directory url; links are
/// kept only when the lower-cased path ends in a supported audio extension
/// and the absolute url stays inside the directory subtree.  Directory urls
/// end in `/`, so a full-string prefix check confines both origin and path:
/// `../`, absolute-path, and cross-host links cannot escape.  The result is
/// deduplicated and sorted lexicographically on the absolute url, which is
/// the canonical track order.  A page with no matching links (including
/// unparseable markup) yields an empty list, not an error.
pub fn extract_tracks(html: &str, dir_url: &reqwest::Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let prefix = dir_url.as_str();
    let document = Html::parse_document(html);
    let mut tracks = BTreeSet::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = dir_url.join(href) else {
            continue;
        };
        if !has_supported_extension(&absolute) {
            continue;
        }
        if !absolute.as_str().starts_with(prefix) {
            continue;
        }
        tracks.insert(absolute.to_string());
    }

    tracks.into_iter().collect()
}

fn has_supported_extension(url: &reqwest::Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SUPPORTED_AUDIO_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Human-readable track label: the final path segment, without query or
/// fragment.
pub fn track_name(url: &str) -> &str {
    let clean = url.split(['?', '#']).next().unwrap_or(url);
    clean
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> reqwest::Url {
        reqwest::Url::parse("http://radio.test/media/nitnem/").unwrap()
    }

    #[test]
    fn extracts_sorted_deduplicated_tracks() {
        let html = r#"
            <html><body>
            <a href="zulu.mp3">zulu</a>
            <a href="alpha.mp3">alpha</a>
            <a href="alpha.mp3">alpha again</a>
            <a href="mid.ogg">mid</a>
            </body></html>
        "#;
        let tracks = extract_tracks(html, &base());
        assert_eq!(
            tracks,
            vec![
                "http://radio.test/media/nitnem/alpha.mp3",
                "http://radio.test/media/nitnem/mid.ogg",
                "http://radio.test/media/nitnem/zulu.mp3",
            ]
        );
    }

    #[test]
    fn filters_unsupported_extensions() {
        let html = r#"
            <a href="track.mp3">ok</a>
            <a href="notes.txt">no</a>
            <a href="cover.jpg">no</a>
            <a href="TRACK2.MP3">case-insensitive ext</a>
            <a href="playlist.m3u">no</a>
        "#;
        let tracks = extract_tracks(html, &base());
        assert_eq!(
            tracks,
            vec![
                "http://radio.test/media/nitnem/TRACK2.MP3",
                "http://radio.test/media/nitnem/track.mp3",
            ]
        );
    }

    #[test]
    fn adversarial_links_cannot_escape_the_directory() {
        let html = r#"
            <a href="../escape.mp3">parent</a>
            <a href="/media/other.mp3">absolute path</a>
            <a href="http://evil.test/media/nitnem/remote.mp3">other host</a>
            <a href="sub/inside.mp3">nested is fine</a>
        "#;
        let tracks = extract_tracks(html, &base());
        assert_eq!(tracks, vec!["http://radio.test/media/nitnem/sub/inside.mp3"]);
    }

    #[test]
    fn malformed_listing_yields_empty_result() {
        assert!(extract_tracks("<<<< not html at all", &base()).is_empty());
        assert!(extract_tracks("", &base()).is_empty());
    }

    #[test]
    fn query_and_fragment_do_not_defeat_extension_check() {
        let html = r#"<a href="song.mp3?v=2#t=30">q</a>"#;
        let tracks = extract_tracks(html, &base());
        assert_eq!(
            tracks,
            vec!["http://radio.test/media/nitnem/song.mp3?v=2#t=30"]
        );
    }

    #[tokio::test]
    async fn resolve_is_cache_first() {
        // The seeded url is not even parseable; a cache miss would error,
        // so a successful return proves the cache was consulted first.
        let resolver = DirectoryResolver::new();
        resolver
            .seed("not-a-url/", vec!["a.mp3".into(), "b.mp3".into()])
            .await;
        let tracks = resolver.resolve("not-a-url/").await.unwrap();
        assert_eq!(tracks.as_slice(), ["a.mp3", "b.mp3"]);

        // And the same Arc comes back on a repeat call.
        let again = resolver.resolve("not-a-url/").await.unwrap();
        assert!(Arc::ptr_eq(&tracks, &again));
    }

    #[tokio::test]
    async fn resolve_rejects_invalid_urls() {
        let resolver = DirectoryResolver::new();
        let err = resolver.resolve("definitely not a url/").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl(_)));

        let err = resolver
            .resolve("http://radio.test/no-trailing-slash")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl(_)));
    }

    #[test]
    fn track_name_strips_path_query_and_fragment() {
        assert_eq!(
            track_name("http://radio.test/media/nitnem/japji.mp3?v=1#x"),
            "japji.mp3"
        );
        assert_eq!(track_name("japji.mp3"), "japji.mp3");
        assert_eq!(track_name("http://radio.test/dir/"), "http://radio.test/dir/");
    }
}

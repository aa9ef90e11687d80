//! Release-year enrichment backed by MusicBrainz.
//!
//! [`YearResolver`] searches MusicBrainz for an artist/album pair and returns
//! the year of the earliest dated release. Lookups are best-effort: every
//! failure resolves to `None`.
//!
//! Retry policy:
//! - connection errors and timeouts retry with a backoff that grows with the attempt number
//! - a rate-limit response (429/503) gives up at once; callers space their calls instead
//! - anything else gives up at once

mod musicbrainz;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use reviewrelay_shared::{MusicBrainzConfig, Result, RetryPolicy, retry_transient};

pub use musicbrainz::{MbRelease, MbSearchResponse, MusicBrainzClient, earliest_year, release_query};

/// Resolves the original release year of an album.
#[async_trait]
pub trait YearLookup: Send + Sync {
    async fn resolve_year(&self, artist: &str, album: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// YearResolver
// ---------------------------------------------------------------------------

pub struct YearResolver {
    client: MusicBrainzClient,
    policy: RetryPolicy,
}

impl YearResolver {
    pub fn new(config: &MusicBrainzConfig) -> Result<Self> {
        let client = MusicBrainzClient::new(
            &config.base_url,
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )?;
        let policy = RetryPolicy::new(config.max_attempts, Duration::from_millis(config.backoff_ms));
        Ok(Self::with_client(client, policy))
    }

    pub fn with_client(client: MusicBrainzClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl YearLookup for YearResolver {
    #[instrument(skip_all, fields(artist = %artist, album = %album))]
    async fn resolve_year(&self, artist: &str, album: &str) -> Option<String> {
        if artist.trim().is_empty() || album.trim().is_empty() {
            return None;
        }

        let result = retry_transient(&self.policy, "musicbrainz", |_| {
            self.client.search_releases(artist, album)
        })
        .await;

        match result {
            Ok(releases) => {
                let year = earliest_year(&releases);
                debug!(candidates = releases.len(), year = ?year, "MusicBrainz lookup done");
                year
            }
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "MusicBrainz rate limited, year unknown");
                None
            }
            Err(e) => {
                warn!(error = %e, "MusicBrainz lookup failed, year unknown");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn releases_body() -> serde_json::Value {
        serde_json::json!({
            "created": "2024-03-03T00:00:00.000Z",
            "count": 3,
            "releases": [
                { "id": "b", "title": "OK Computer", "date": "2009-03-24" },
                { "id": "c", "title": "OK Computer" },
                { "id": "a", "title": "OK Computer", "date": "1997-05-21" }
            ]
        })
    }

    fn resolver(server: &MockServer, timeout: Duration, backoff: Duration) -> YearResolver {
        let client = MusicBrainzClient::new(&server.uri(), "ReviewRelayTest/0.1", timeout).unwrap();
        YearResolver::with_client(client, RetryPolicy::new(3, backoff))
    }

    #[tokio::test]
    async fn resolves_earliest_year() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/release/"))
            .and(query_param("query", r#"release:"OK Computer" AND artist:"Radiohead""#))
            .and(query_param("fmt", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(releases_body()))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(&server, Duration::from_secs(5), Duration::from_millis(10));
        let year = resolver.resolve_year("Radiohead", "OK Computer").await;
        assert_eq!(year.as_deref(), Some("1997"));
    }

    #[tokio::test]
    async fn two_timeouts_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/release/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(releases_body())
                    .set_delay(Duration::from_millis(500)),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/release/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(releases_body()))
            .mount(&server)
            .await;

        let resolver = resolver(&server, Duration::from_millis(100), Duration::from_millis(50));
        let start = Instant::now();
        let year = resolver.resolve_year("Radiohead", "OK Computer").await;

        assert_eq!(year.as_deref(), Some("1997"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        // two client timeouts plus 50ms and 100ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(350));
    }

    #[tokio::test]
    async fn rate_limit_returns_unknown_after_one_attempt() {
        for status in [429, 503] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/release/"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;

            let resolver = resolver(&server, Duration::from_secs(5), Duration::from_millis(10));
            assert_eq!(resolver.resolve_year("Radiohead", "OK Computer").await, None);
            server.verify().await;
        }
    }

    #[tokio::test]
    async fn other_errors_abort_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/release/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(&server, Duration::from_secs(5), Duration::from_millis(10));
        assert_eq!(resolver.resolve_year("Radiohead", "OK Computer").await, None);
    }

    #[tokio::test]
    async fn malformed_body_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/release/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(&server, Duration::from_secs(5), Duration::from_millis(10));
        assert_eq!(resolver.resolve_year("Radiohead", "OK Computer").await, None);
    }

    #[tokio::test]
    async fn blank_input_skips_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(releases_body()))
            .expect(0)
            .mount(&server)
            .await;

        let resolver = resolver(&server, Duration::from_secs(5), Duration::from_millis(10));
        assert_eq!(resolver.resolve_year("", "OK Computer").await, None);
    }
}

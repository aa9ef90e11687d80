//! MusicBrainz release search.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use reviewrelay_shared::{Result, ReviewRelayError};

/// Release search response (only the fields we read).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MbSearchResponse {
    #[serde(default)]
    pub releases: Vec<MbRelease>,
}

/// One candidate release.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MbRelease {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// `YYYY`, `YYYY-MM`, or `YYYY-MM-DD`; absent for undated releases.
    pub date: Option<String>,
}

/// Thin client over the `/release` search endpoint.
pub struct MusicBrainzClient {
    client: Client,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ReviewRelayError::Network(format!("failed to build MusicBrainz client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Search releases by album title and artist.
    pub async fn search_releases(&self, artist: &str, album: &str) -> Result<Vec<MbRelease>> {
        let url = format!("{}/release/", self.base_url);
        let query = release_query(artist, album);
        debug!(%url, %query, "querying MusicBrainz");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query.as_str()), ("fmt", "json")])
            .send()
            .await
            .map_err(|e| ReviewRelayError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(ReviewRelayError::RateLimited(format!("{url}: HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReviewRelayError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: MbSearchResponse = response
            .json()
            .await
            .map_err(|e| ReviewRelayError::parse(format!("MusicBrainz response: {e}")))?;
        Ok(body.releases)
    }
}

/// Lucene query matching both the release title and the artist.
pub fn release_query(artist: &str, album: &str) -> String {
    format!(
        r#"release:"{}" AND artist:"{}""#,
        escape_phrase(album),
        escape_phrase(artist)
    )
}

fn escape_phrase(text: &str) -> String {
    text.replace('\\', r"\\").replace('"', r#"\""#)
}

/// Year of the earliest dated release, treated as the original release.
///
/// Only the earliest date is inspected: if it has no 1900-2099 year the
/// result is `None`, even when a later release carries one.
pub fn earliest_year(releases: &[MbRelease]) -> Option<String> {
    let earliest = releases
        .iter()
        .filter_map(|r| r.date.as_deref())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .min()?;

    static YEAR_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));
    YEAR_RE.find(earliest).map(|m| m.as_str().to_string())
}

//! Review source: profile URL construction, navigation retry, extraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scraper::Html;
use tracing::{debug, info, instrument};
use url::Url;

use reviewrelay_shared::{
    Result, RetryPolicy, ReviewRecord, ReviewRelayError, ScraperConfig, retry_transient,
};

use crate::adapters::{AdapterRegistry, AlbumDetails};
use crate::renderer::{PageRenderer, RenderOptions, RenderedPage};
use crate::{ExtractOptions, extract};

/// Where reviews come from.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// The user's most recent reviews, newest first.
    async fn recent_reviews(&self, username: &str) -> Result<Vec<ReviewRecord>>;

    /// Year and cover from an album page. Tried once, never retried.
    async fn album_details(&self, album_url: &str) -> Result<AlbumDetails>;
}

/// Usernames are joined into URLs, so only `[A-Za-z0-9_.-]` is allowed.
pub fn validate_username(username: &str) -> Result<()> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if username.is_empty() || !valid_chars || username.chars().all(|c| c == '.') {
        return Err(ReviewRelayError::validation(format!(
            "invalid username '{username}': use letters, digits, '_', '.', or '-'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ReviewFetcher
// ---------------------------------------------------------------------------

/// [`ReviewSource`] that renders pages and runs them through the adapters.
pub struct ReviewFetcher {
    renderer: Arc<dyn PageRenderer>,
    registry: AdapterRegistry,
    config: ScraperConfig,
    base_url: Url,
}

impl ReviewFetcher {
    pub fn new(renderer: Arc<dyn PageRenderer>, config: ScraperConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            ReviewRelayError::config(format!(
                "invalid scraper.base_url '{}': {e}",
                config.base_url
            ))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            renderer,
            registry: AdapterRegistry::new(),
            config,
            base_url,
        })
    }

    /// `{base_url}/{username}/reviews`.
    pub fn profile_url(&self, username: &str) -> Result<Url> {
        validate_username(username)?;
        self.base_url
            .join(&format!("{username}/reviews"))
            .map_err(|e| ReviewRelayError::validation(format!("bad profile URL for {username}: {e}")))
    }

    fn listing_options(&self) -> RenderOptions {
        RenderOptions {
            ready_selector: Some(self.config.ready_selector.clone()).filter(|s| !s.is_empty()),
            ready_retry: Duration::from_millis(self.config.ready_retry_ms),
            lazy_load_pages: self.config.lazy_load_pages.max(1),
        }
    }

    fn navigation_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.nav_attempts,
            Duration::from_millis(self.config.nav_backoff_ms),
        )
    }

    fn album_from_page(&self, page: &RenderedPage) -> AlbumDetails {
        let Some(html) = page.chunks.first() else {
            return AlbumDetails::default();
        };
        let doc = Html::parse_document(html);
        let adapter = self.registry.detect(&doc, &page.url);
        adapter.extract_album(&doc, &page.url)
    }
}

#[async_trait]
impl ReviewSource for ReviewFetcher {
    #[instrument(skip_all, fields(username = %username))]
    async fn recent_reviews(&self, username: &str) -> Result<Vec<ReviewRecord>> {
        let url = self.profile_url(username)?;
        let opts = self.listing_options();
        let policy = self.navigation_policy();

        let page = retry_transient(&policy, "navigate", |attempt| {
            debug!(%url, attempt, "navigating to listing");
            self.renderer.render(&url, &opts)
        })
        .await?;

        let reviews = extract(
            &page,
            &self.registry,
            &ExtractOptions {
                username,
                max_review_chars: self.config.max_review_chars,
                fetched_at: Utc::now(),
            },
        );
        info!(count = reviews.len(), "fetched reviews");
        Ok(reviews)
    }

    #[instrument(skip_all, fields(album_url = %album_url))]
    async fn album_details(&self, album_url: &str) -> Result<AlbumDetails> {
        let url = self
            .base_url
            .join(album_url)
            .map_err(|e| ReviewRelayError::validation(format!("bad album URL '{album_url}': {e}")))?;

        let page = self.renderer.render(&url, &RenderOptions::default()).await?;
        let details = self.album_from_page(&page);
        debug!(year = ?details.release_year, has_image = details.image_url.is_some(), "album page read");
        Ok(details)
    }
}

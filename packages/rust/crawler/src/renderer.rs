//! Rendering collaborator: turns a listing URL into page markup.
//!
//! [`HttpRenderer`] fetches server-rendered HTML, waits for a ready selector
//! by re-requesting once, and follows `rel="next"` links to emulate
//! lazy-loaded listings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use reviewrelay_shared::{Result, ReviewRelayError};

use crate::adapters::{resolve, selector};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("ReviewRelay/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Markup for one rendered listing, possibly spanning several loaded pages.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL of the first page, used as the base for relative links.
    pub url: Url,
    /// HTML of each loaded page, in load order.
    pub chunks: Vec<String>,
}

impl RenderedPage {
    pub fn from_html(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            chunks: vec![html.into()],
        }
    }
}

/// How a page should be rendered.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Selector that must be present for the page to count as ready.
    pub ready_selector: Option<String>,
    /// Wait before re-requesting a page that was not ready.
    pub ready_retry: Duration,
    /// Total listing pages to load (1 = first page only).
    pub lazy_load_pages: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            ready_selector: None,
            ready_retry: Duration::from_secs(1),
            lazy_load_pages: 1,
        }
    }
}

/// Something that can render a page to HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url, opts: &RenderOptions) -> Result<RenderedPage>;
}

// ---------------------------------------------------------------------------
// HttpRenderer
// ---------------------------------------------------------------------------

/// Plain-HTTP renderer backed by `reqwest`.
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    /// Create a renderer whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| ReviewRelayError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &Url) -> Result<(Url, String)> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ReviewRelayError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ReviewRelayError::Network(format!("{url}: body read failed: {e}")))?;
        Ok((final_url, body))
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    #[instrument(skip_all, fields(url = %url))]
    async fn render(&self, url: &Url, opts: &RenderOptions) -> Result<RenderedPage> {
        let (final_url, mut html) = self.fetch_html(url).await?;

        if let Some(ready) = opts.ready_selector.as_deref() {
            if !has_match(&html, ready) {
                debug!(ready, "ready selector missing, re-requesting");
                tokio::time::sleep(opts.ready_retry).await;
                html = self.fetch_html(url).await?.1;
                if !has_match(&html, ready) {
                    debug!(ready, "ready selector still missing");
                }
            }
        }

        let mut page = RenderedPage::from_html(final_url, html);
        while (page.chunks.len() as u32) < opts.lazy_load_pages {
            let Some(next) = page.chunks.last().and_then(|h| next_link(h, &page.url)) else {
                break;
            };
            debug!(%next, loaded = page.chunks.len(), "loading next listing page");
            let (_, more) = self.fetch_html(&next).await?;
            page.chunks.push(more);
        }

        Ok(page)
    }
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn status_error(url: &Url, status: StatusCode) -> ReviewRelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ReviewRelayError::RateLimited(format!("{url}: HTTP {status}")),
        StatusCode::NOT_FOUND => ReviewRelayError::NotFound(format!("{url}: HTTP {status}")),
        s if s.is_server_error() => ReviewRelayError::Network(format!("{url}: HTTP {status}")),
        s => ReviewRelayError::Http {
            status: s.as_u16(),
            message: url.to_string(),
        },
    }
}

fn has_match(html: &str, css: &str) -> bool {
    match scraper::Selector::parse(css) {
        Ok(sel) => Html::parse_document(html).select(&sel).next().is_some(),
        Err(_) => true,
    }
}

fn next_link(html: &str, base: &Url) -> Option<Url> {
    let doc = Html::parse_document(html);
    let href = doc
        .select(&selector(r#"a[rel~="next"], link[rel~="next"]"#))
        .find_map(|el| el.value().attr("href").map(String::from))?;
    resolve(base, &href)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts() -> RenderOptions {
        RenderOptions {
            ready_selector: Some("article.review-teaser".into()),
            ready_retry: Duration::from_millis(10),
            lazy_load_pages: 1,
        }
    }

    #[tokio::test]
    async fn renders_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alice/reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<article class="review-teaser">one</article>"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let renderer = HttpRenderer::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/alice/reviews", server.uri())).unwrap();
        let page = renderer.render(&url, &opts()).await.unwrap();

        assert_eq!(page.chunks.len(), 1);
        assert!(page.chunks[0].contains("review-teaser"));
    }

    #[tokio::test]
    async fn re_requests_once_when_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alice/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>loading</p>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/alice/reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<article class="review-teaser">ready</article>"#),
            )
            .mount(&server)
            .await;

        let renderer = HttpRenderer::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/alice/reviews", server.uri())).unwrap();
        let page = renderer.render(&url, &opts()).await.unwrap();

        assert!(page.chunks[0].contains("ready"));
    }

    #[tokio::test]
    async fn follows_next_links_up_to_limit() {
        let server = MockServer::start().await;
        Mock::given(path("/alice/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<article class="review-teaser">p1</article><a rel="next" href="/alice/reviews?page=2">next</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(path("/alice/reviews"))
            .and(wiremock::matchers::query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<article class="review-teaser">p2</article><a rel="next" href="/alice/reviews?page=3">next</a>"#,
            ))
            .with_priority(1)
            .mount(&server)
            .await;

        let renderer = HttpRenderer::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/alice/reviews", server.uri())).unwrap();
        let page = renderer
            .render(
                &url,
                &RenderOptions {
                    lazy_load_pages: 2,
                    ..opts()
                },
            )
            .await
            .unwrap();

        assert_eq!(page.chunks.len(), 2);
        assert!(page.chunks[1].contains("p2"));
    }

    #[tokio::test]
    async fn maps_statuses_onto_error_kinds() {
        let server = MockServer::start().await;
        for (route, status) in [("/gone", 404), ("/slow", 429), ("/down", 503), ("/denied", 403)] {
            Mock::given(path(route))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let renderer = HttpRenderer::new(Duration::from_secs(5)).unwrap();
        let render = |route: &str| {
            let url = Url::parse(&format!("{}{route}", server.uri())).unwrap();
            let renderer = &renderer;
            async move { renderer.render(&url, &RenderOptions::default()).await }
        };

        assert!(matches!(render("/gone").await, Err(ReviewRelayError::NotFound(_))));
        assert!(render("/slow").await.unwrap_err().is_rate_limited());
        assert!(render("/down").await.unwrap_err().is_transient());
        assert!(matches!(
            render("/denied").await,
            Err(ReviewRelayError::Http { status: 403, .. })
        ));
    }
}

//! Site adapter trait and built-in adapters for review extraction.
//!
//! Adapters detect a review site's markup and pull raw review fields out of
//! it. Selector chains live here; normalization (sentinels, truncation,
//! dedup) happens once in [`crate::extract`].

mod record_club;
mod schema_org;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub use record_club::RecordClubAdapter;
pub use schema_org::SchemaOrgAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One review as found on the page, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReview {
    pub album_title: Option<String>,
    pub artist_name: Option<String>,
    pub rating: Option<String>,
    pub body: Option<String>,
    /// The page showed a "more" link after the body.
    pub has_more: bool,
    pub review_url: Option<Url>,
    pub album_url: Option<Url>,
    pub image_url: Option<Url>,
    pub avatar_url: Option<Url>,
    pub timestamp: Option<DateTime<Utc>>,
    pub release_year: Option<String>,
}

/// Details read from an album's own page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumDetails {
    pub release_year: Option<String>,
    pub image_url: Option<String>,
}

/// Trait for site-specific review extraction.
///
/// Adapters are tried in priority order; [`SchemaOrgAdapter`] is the always-last fallback.
pub trait ReviewAdapter: Send + Sync {
    /// Returns `true` if this adapter should handle the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    /// Reviews on a listing page, in page order (newest first).
    fn extract_reviews(&self, doc: &Html, url: &Url) -> Vec<RawReview>;

    /// Year and cover art from a single album page.
    fn extract_album(&self, doc: &Html, url: &Url) -> AlbumDetails;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ReviewAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters (site-specific first, schema.org last).
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(RecordClubAdapter), Box::new(SchemaOrgAdapter)],
        }
    }

    /// Detect the best adapter for the given HTML document.
    /// Always returns an adapter (SchemaOrgAdapter is the fallback).
    pub fn detect(&self, doc: &Html, url: &Url) -> &dyn ReviewAdapter {
        for adapter in &self.adapters {
            if adapter.detect(doc, url) {
                return adapter.as_ref();
            }
        }
        unreachable!("SchemaOrgAdapter must always match");
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by adapters
// ---------------------------------------------------------------------------

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// First element matching `css` under `scope`.
pub(crate) fn first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    scope.select(&selector(css)).next()
}

/// Whitespace-collapsed text content; `None` when empty.
pub(crate) fn text_of(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Non-empty, trimmed attribute value.
pub(crate) fn attr_of(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Resolve `href` against `base`, accepting absolute URLs as-is.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok()
}

/// The URL inside an inline `background-image: url(...)` style.
pub(crate) fn background_image(el: ElementRef<'_>) -> Option<String> {
    let style = el.value().attr("style")?;
    static BG_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"url\(\s*["']?([^"')]+)["']?\s*\)"#).expect("valid regex")
    });
    BG_URL_RE.captures(style).map(|c| c[1].trim().to_string())
}

/// First 4-digit year (1900-2099) in `text`.
pub fn year_token(text: &str) -> Option<String> {
    static YEAR_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));
    YEAR_RE.find(text).map(|m| m.as_str().to_string())
}

/// Parse a `datetime` attribute: RFC 3339 first, then a bare date.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Cover art URLs that are stand-ins rather than real artwork.
pub fn is_placeholder_image(url: &str) -> bool {
    url.contains("placeholder") || url.contains("default")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_token_finds_first_plausible_year() {
        assert_eq!(year_token("Released 1997-05-21"), Some("1997".into()));
        assert_eq!(year_token("OK Computer (1997) remaster 2017"), Some("1997".into()));
        assert_eq!(year_token("catalog 31997"), None);
        assert_eq!(year_token("no year"), None);
    }

    #[test]
    fn timestamps_accept_rfc3339_and_bare_dates() {
        let full = parse_timestamp("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2024-03-01T12:30:00+00:00");

        let date = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn resolve_handles_relative_and_absolute() {
        let base = Url::parse("https://record.club/alice/reviews").unwrap();
        assert_eq!(
            resolve(&base, "/releases/1").unwrap().as_str(),
            "https://record.club/releases/1"
        );
        assert_eq!(
            resolve(&base, "https://cdn.example.com/a.jpg").unwrap().as_str(),
            "https://cdn.example.com/a.jpg"
        );
        assert!(resolve(&base, "  ").is_none());
    }

    #[test]
    fn background_image_reads_inline_style() {
        let doc = Html::parse_fragment(
            r#"<div style="background-image: url('/img/cover.jpg'); width: 10px"></div>"#,
        );
        let div = doc.select(&selector("div")).next().unwrap();
        assert_eq!(background_image(div), Some("/img/cover.jpg".into()));
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_image("https://record.club/img/placeholder.png"));
        assert!(is_placeholder_image("https://record.club/img/default-cover.png"));
        assert!(!is_placeholder_image("https://cdn.example.com/cover.jpg"));
    }
}

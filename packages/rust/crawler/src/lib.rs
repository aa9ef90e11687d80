//! Review page rendering, extraction, and site adapters.
//!
//! This crate provides:
//! - [`renderer`]: the rendering collaborator ([`PageRenderer`], [`HttpRenderer`])
//! - [`adapters`]: site-specific selector chains behind [`ReviewAdapter`]
//! - [`extract`]: turns a [`RenderedPage`] into newest-first [`ReviewRecord`]s
//! - [`fetcher`]: [`ReviewSource`] with navigation retry

pub mod adapters;
pub mod fetcher;
pub mod renderer;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use scraper::Html;

use reviewrelay_shared::{NO_RATING, ReviewRecord, UNKNOWN_ARTIST};

pub use adapters::{
    AdapterRegistry, AlbumDetails, RawReview, RecordClubAdapter, ReviewAdapter, SchemaOrgAdapter,
    is_placeholder_image, year_token,
};
pub use fetcher::{ReviewFetcher, ReviewSource, validate_username};
pub use renderer::{HttpRenderer, PageRenderer, RenderOptions, RenderedPage};

/// Per-fetch settings for [`extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions<'a> {
    /// Author stamped onto every record.
    pub username: &'a str,
    /// Body length cap in characters; 0 disables the cap.
    pub max_review_chars: usize,
    /// Timestamp used when the page shows none.
    pub fetched_at: DateTime<Utc>,
}

/// Extract review records from a rendered listing, newest first.
///
/// Records without a review URL are dropped; the URL is the diffing key.
/// Duplicate URLs keep their first (newest) occurrence. No reviews is an
/// empty vec, not an error.
pub fn extract(
    page: &RenderedPage,
    registry: &AdapterRegistry,
    opts: &ExtractOptions<'_>,
) -> Vec<ReviewRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for chunk in &page.chunks {
        let doc = Html::parse_document(chunk);
        let adapter = registry.detect(&doc, &page.url);
        for raw in adapter.extract_reviews(&doc, &page.url) {
            let Some(record) = finalize(raw, opts) else {
                tracing::debug!(adapter = adapter.name(), "skipping review without permalink");
                continue;
            };
            if seen.insert(record.review_url.clone()) {
                records.push(record);
            }
        }
    }

    records
}

fn finalize(raw: RawReview, opts: &ExtractOptions<'_>) -> Option<ReviewRecord> {
    let review_url = raw.review_url?;
    let (review_text, capped) = cap_review_text(raw.body.unwrap_or_default(), opts.max_review_chars);

    Some(ReviewRecord {
        username: opts.username.to_string(),
        album_title: raw.album_title.unwrap_or_default(),
        artist_name: raw.artist_name.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        rating: raw.rating.unwrap_or_else(|| NO_RATING.to_string()),
        review_text,
        is_truncated: capped || raw.has_more,
        review_url: review_url.to_string(),
        album_url: raw.album_url.map(|u| u.to_string()),
        image_url: raw.image_url.map(|u| u.to_string()),
        avatar_url: raw.avatar_url.map(|u| u.to_string()),
        timestamp: raw.timestamp.unwrap_or(opts.fetched_at),
        release_year: raw.release_year,
    })
}

/// Cap `text` at `max` characters, ending a cut body with `...`.
///
/// Returns the text and whether it was cut.
pub fn cap_review_text(text: String, max: usize) -> (String, bool) {
    if max == 0 || text.chars().count() <= max {
        return (text, false);
    }
    let keep = max.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str("...");
    (cut, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn load_fixture(name: &str) -> String {
        let path = format!("{}/../../../fixtures/html/{name}", env!("CARGO_MANIFEST_DIR"));
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn page(name: &str, url: &str) -> RenderedPage {
        RenderedPage::from_html(Url::parse(url).unwrap(), load_fixture(name))
    }

    fn opts(fetched_at: DateTime<Utc>) -> ExtractOptions<'static> {
        ExtractOptions {
            username: "alice",
            max_review_chars: 500,
            fetched_at,
        }
    }

    // -----------------------------------------------------------------------
    // Record Club listing
    // -----------------------------------------------------------------------

    #[test]
    fn record_club_listing_newest_first_and_deduplicated() {
        let page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));

        let urls: Vec<&str> = reviews.iter().map(|r| r.review_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://record.club/reviews/300",
                "https://record.club/reviews/299",
                "https://record.club/reviews/297",
            ]
        );
        assert!(reviews.iter().all(|r| r.username == "alice"));
    }

    #[test]
    fn record_club_fields_are_resolved() {
        let page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));
        let okc = &reviews[0];

        assert_eq!(okc.album_title, "OK Computer");
        assert_eq!(okc.artist_name, "Radiohead");
        assert_eq!(okc.rating, "4.5");
        assert_eq!(okc.release_year.as_deref(), Some("1997"));
        assert_eq!(okc.album_url.as_deref(), Some("https://record.club/releases/ok-computer"));
        assert_eq!(
            okc.image_url.as_deref(),
            Some("https://cdn.record.club/covers/ok-computer.jpg")
        );
        assert_eq!(
            okc.avatar_url.as_deref(),
            Some("https://record.club/media/avatars/alice.jpg")
        );
        assert_eq!(okc.timestamp.to_rfc3339(), "2024-03-03T18:20:00+00:00");
    }

    #[test]
    fn long_bodies_are_capped_and_flagged() {
        let page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));
        let okc = &reviews[0];

        assert!(okc.is_truncated);
        assert_eq!(okc.review_text.chars().count(), 500);
        assert!(okc.review_text.ends_with("..."));
        assert!(okc.review_text.starts_with("Paranoid Android"));
    }

    #[test]
    fn excerpt_with_more_link_is_flagged() {
        let page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));
        let homogenic = &reviews[1];

        assert_eq!(homogenic.artist_name, "Björk");
        assert_eq!(homogenic.rating, "4");
        assert_eq!(homogenic.review_text, "Joga alone justifies the strings budget");
        assert!(homogenic.is_truncated);
        assert_eq!(
            homogenic.image_url.as_deref(),
            Some("https://record.club/media/covers/homogenic.jpg")
        );
        assert!(homogenic.release_year.is_none());
    }

    #[test]
    fn missing_fields_get_sentinels() {
        let fetched_at = Utc::now();
        let page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(fetched_at));
        let clube = &reviews[2];

        assert_eq!(clube.artist_name, "Milton Nascimento");
        assert_eq!(clube.rating, NO_RATING);
        assert_eq!(clube.review_text, "");
        assert!(!clube.is_truncated);
        assert!(clube.image_url.is_none());
        assert_eq!(clube.timestamp, fetched_at);
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        let page = page("record_club_empty.html", "https://record.club/bob/reviews");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));
        assert!(reviews.is_empty());
    }

    #[test]
    fn later_chunks_append_older_reviews() {
        let mut page = page("record_club_reviews.html", "https://record.club/alice/reviews");
        page.chunks.push(
            r#"<article class="review-teaser">
                 <a class="title" href="/releases/kid-a">Kid A</a>
                 <a class="review-teaser-date" href="/reviews/250">Jan 2</a>
               </article>
               <article class="review-teaser">
                 <a class="title" href="/releases/homogenic">Homogenic</a>
                 <a class="review-teaser-date" href="/reviews/299">Mar 2</a>
               </article>"#
                .to_string(),
        );
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));

        assert_eq!(reviews.len(), 4);
        assert_eq!(reviews[3].review_url, "https://record.club/reviews/250");
    }

    // -----------------------------------------------------------------------
    // Adapter detection
    // -----------------------------------------------------------------------

    #[test]
    fn detect_record_club_on_foreign_host() {
        let doc = Html::parse_document(&load_fixture("record_club_reviews.html"));
        let url = Url::parse("http://127.0.0.1:9000/alice/reviews").unwrap();
        assert_eq!(AdapterRegistry::new().detect(&doc, &url).name(), "record-club");
    }

    #[test]
    fn detect_schema_org_fallback() {
        let doc = Html::parse_document(&load_fixture("schema_org_reviews.html"));
        let url = Url::parse("https://reviews.example.com/u/carol").unwrap();
        assert_eq!(AdapterRegistry::new().detect(&doc, &url).name(), "schema-org");
    }

    #[test]
    fn schema_org_reviews_extract() {
        let page = page("schema_org_reviews.html", "https://reviews.example.com/u/carol");
        let reviews = extract(&page, &AdapterRegistry::new(), &opts(Utc::now()));

        assert_eq!(reviews.len(), 1);
        let r = &reviews[0];
        assert_eq!(r.album_title, "Acabou Chorare");
        assert_eq!(r.artist_name, "Novos Baianos");
        assert_eq!(r.rating, "5");
        assert_eq!(r.review_text, "Sunlight on a record.");
        assert_eq!(r.review_url, "https://reviews.example.com/reviews/carol/acabou-chorare");
        assert_eq!(r.release_year.as_deref(), Some("1972"));
        assert_eq!(r.avatar_url.as_deref(), Some("https://reviews.example.com/avatars/carol.png"));
        assert_eq!(r.timestamp.to_rfc3339(), "2024-01-15T09:00:00+00:00");
    }

    // -----------------------------------------------------------------------
    // Album pages
    // -----------------------------------------------------------------------

    #[test]
    fn record_club_album_page_details() {
        let doc = Html::parse_document(&load_fixture("record_club_album.html"));
        let url = Url::parse("https://record.club/releases/clube-da-esquina").unwrap();
        let details = RecordClubAdapter.extract_album(&doc, &url);

        assert_eq!(details.release_year.as_deref(), Some("1972"));
        assert_eq!(
            details.image_url.as_deref(),
            Some("https://record.club/media/covers/clube-da-esquina.jpg")
        );
    }

    // -----------------------------------------------------------------------
    // Text capping
    // -----------------------------------------------------------------------

    #[test]
    fn cap_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let (cut, capped) = cap_review_text(text.clone(), 8);
        assert!(capped);
        assert_eq!(cut, format!("{}...", "é".repeat(5)));

        let (same, capped) = cap_review_text(text.clone(), 10);
        assert!(!capped);
        assert_eq!(same, text);
    }

    #[test]
    fn zero_cap_disables_truncation() {
        let (text, capped) = cap_review_text("x".repeat(2000), 0);
        assert!(!capped);
        assert_eq!(text.len(), 2000);
    }
}

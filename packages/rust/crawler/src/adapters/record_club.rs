//! record.club adapter.
//!
//! Detects: `record.club` host, `article.review-teaser` listing cards, or
//! `.release-headings` on an album page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use super::{
    AlbumDetails, RawReview, ReviewAdapter, attr_of, background_image, first, is_placeholder_image,
    parse_timestamp, resolve, selector, text_of, year_token,
};

pub struct RecordClubAdapter;

impl ReviewAdapter for RecordClubAdapter {
    fn detect(&self, doc: &Html, url: &Url) -> bool {
        if url
            .host_str()
            .is_some_and(|h| h == "record.club" || h.ends_with(".record.club"))
        {
            return true;
        }
        let marker = selector("article.review-teaser, .release-headings, dl.release-details");
        doc.select(&marker).next().is_some()
    }

    fn extract_reviews(&self, doc: &Html, url: &Url) -> Vec<RawReview> {
        let root = doc.root_element();
        let page_avatar = first(root, ".user-profile-header .avatar").and_then(avatar_src);

        root.select(&selector("article.review-teaser"))
            .map(|teaser| {
                let avatar = page_avatar
                    .clone()
                    .or_else(|| first(teaser, ".avatar").and_then(avatar_src));
                extract_teaser(teaser, url, avatar)
            })
            .collect()
    }

    fn extract_album(&self, doc: &Html, url: &Url) -> AlbumDetails {
        let root = doc.root_element();
        let year_from = |css: &str| {
            first(root, css)
                .and_then(text_of)
                .and_then(|t| year_token(&t))
        };

        let release_year = year_from(".release-year")
            .or_else(|| year_from("dl.release-details dd.date"))
            .or_else(|| year_from("h1.release-headings, .release-headings"))
            .or_else(|| year_from("title"));

        let image_url = first(root, ".release-artwork img")
            .and_then(img_src)
            .filter(|src| !is_placeholder_image(src))
            .and_then(|src| resolve(url, &src))
            .map(|u| u.to_string());

        AlbumDetails {
            release_year,
            image_url,
        }
    }

    fn name(&self) -> &str {
        "record-club"
    }
}

fn extract_teaser(teaser: ElementRef<'_>, base: &Url, avatar: Option<String>) -> RawReview {
    let title_el = first(teaser, "a.line-clamp-2, a.title");
    let album_title = title_el.and_then(text_of);
    let album_url = title_el
        .and_then(|el| attr_of(el, "href"))
        .and_then(|href| resolve(base, &href));

    let review_url = first(teaser, "a.review-teaser-date")
        .and_then(|el| attr_of(el, "href"))
        .and_then(|href| resolve(base, &href));

    let artist_name = first(teaser, r#"a[href^="/artists/"]"#)
        .and_then(text_of)
        .or_else(|| heading_artist(teaser, album_title.as_deref()));

    let more = first(teaser, "a.more, a.read-more, .review-teaser-more");
    let mut body = first(
        teaser,
        ".review-body, .review-teaser-body, .review-teaser-content, .review-teaser-excerpt",
    )
    .and_then(text_of);
    if let (Some(text), Some(marker)) = (body.as_mut(), more.and_then(text_of)) {
        strip_marker(text, &marker);
    }

    let image_url = cover_src(teaser).and_then(|src| resolve(base, &src));
    let avatar_url = avatar.and_then(|src| resolve(base, &src));

    let timestamp = first(teaser, "time")
        .and_then(|el| attr_of(el, "datetime"))
        .and_then(|dt| parse_timestamp(&dt));

    let release_year = first(teaser, ".release-year, .release-headings")
        .and_then(text_of)
        .and_then(|t| year_token(&t));

    RawReview {
        album_title,
        artist_name,
        rating: rating(teaser),
        body: body.filter(|b| !b.is_empty()),
        has_more: more.is_some(),
        review_url,
        album_url,
        image_url,
        avatar_url,
        timestamp,
        release_year,
    }
}

/// Heading text with the album title removed.
fn heading_artist(teaser: ElementRef<'_>, title: Option<&str>) -> Option<String> {
    let heading = first(teaser, "h3.release-headings").and_then(text_of)?;
    let artist = match title {
        Some(t) if !t.is_empty() => heading.replace(t, ""),
        _ => heading,
    };
    let artist = artist.trim();
    if artist.is_empty() {
        None
    } else {
        Some(artist.to_string())
    }
}

fn rating(teaser: ElementRef<'_>) -> Option<String> {
    if let Some(el) = first(teaser, r#"[itemprop="ratingValue"]"#) {
        if let Some(value) = attr_of(el, "content").or_else(|| text_of(el)) {
            return Some(value);
        }
    }
    let hidden = first(teaser, ".rating .visuallyhidden").and_then(text_of)?;
    static NUMBER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));
    NUMBER_RE.find(&hidden).map(|m| m.as_str().to_string())
}

/// Cover art: the artwork `<img>` unless it is a placeholder, then the
/// inline background image.
fn cover_src(teaser: ElementRef<'_>) -> Option<String> {
    let img = first(teaser, ".release-artwork img").and_then(img_src);
    match img {
        Some(src) if !is_placeholder_image(&src) => Some(src),
        other => first(teaser, ".release-artwork-inner")
            .and_then(background_image)
            .or(other),
    }
}

fn avatar_src(el: ElementRef<'_>) -> Option<String> {
    if el.value().name() == "img" {
        return img_src(el);
    }
    first(el, "img")
        .and_then(img_src)
        .or_else(|| background_image(el))
}

fn img_src(el: ElementRef<'_>) -> Option<String> {
    attr_of(el, "src").or_else(|| attr_of(el, "data-src"))
}

/// Drop a trailing "more" link label (and any ellipsis before it).
fn strip_marker(text: &mut String, marker: &str) {
    if let Some(stripped) = text.strip_suffix(marker) {
        let trimmed = stripped
            .trim_end()
            .trim_end_matches('…')
            .trim_end_matches("...")
            .trim_end();
        *text = trimmed.to_string();
    }
}

//! Generic (fallback) adapter for schema.org `Review` microdata.
//!
//! Always matches. Reads `itemprop` values scoped to the nearest `itemscope`
//! so nested items (the reviewed album, the author) do not leak into the
//! review's own properties.

use scraper::{ElementRef, Html};
use url::Url;

use super::{
    AlbumDetails, RawReview, ReviewAdapter, attr_of, first, is_placeholder_image,
    parse_timestamp, resolve, selector, text_of, year_token,
};

pub struct SchemaOrgAdapter;

impl ReviewAdapter for SchemaOrgAdapter {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        true
    }

    fn extract_reviews(&self, doc: &Html, url: &Url) -> Vec<RawReview> {
        doc.select(&selector(r#"[itemscope][itemtype$="/Review"]"#))
            .map(|item| extract_item(item, url))
            .collect()
    }

    fn extract_album(&self, doc: &Html, url: &Url) -> AlbumDetails {
        let album = doc
            .select(&selector(r#"[itemscope][itemtype$="/MusicAlbum"]"#))
            .next();

        let release_year = album
            .and_then(|a| own_prop(a, "datePublished"))
            .and_then(prop_value)
            .and_then(|v| year_token(&v))
            .or_else(|| {
                first(doc.root_element(), "title")
                    .and_then(text_of)
                    .and_then(|t| year_token(&t))
            });

        let image_url = album
            .and_then(|a| own_prop(a, "image"))
            .and_then(prop_value)
            .filter(|src| !is_placeholder_image(src))
            .and_then(|src| resolve(url, &src))
            .map(|u| u.to_string());

        AlbumDetails {
            release_year,
            image_url,
        }
    }

    fn name(&self) -> &str {
        "schema-org"
    }
}

fn extract_item(item: ElementRef<'_>, base: &Url) -> RawReview {
    let reviewed = own_prop(item, "itemReviewed");

    let album_title = reviewed.and_then(|r| nested_text(r, "name"));
    let artist_name = reviewed
        .and_then(|r| own_prop(r, "byArtist"))
        .and_then(|a| scoped_or_text(a, "name"));
    let album_url = reviewed
        .and_then(|r| own_prop(r, "url"))
        .and_then(prop_value)
        .and_then(|href| resolve(base, &href));
    let image_url = reviewed
        .and_then(|r| own_prop(r, "image"))
        .and_then(prop_value)
        .and_then(|src| resolve(base, &src));
    let release_year = reviewed
        .and_then(|r| own_prop(r, "datePublished"))
        .and_then(prop_value)
        .and_then(|v| year_token(&v));

    let rating = own_prop(item, "reviewRating")
        .and_then(|r| scoped_or_text(r, "ratingValue"))
        .or_else(|| own_prop(item, "ratingValue").and_then(prop_value));

    let avatar_url = own_prop(item, "author")
        .and_then(|a| own_prop(a, "image"))
        .and_then(prop_value)
        .and_then(|src| resolve(base, &src));

    RawReview {
        album_title,
        artist_name,
        rating,
        body: own_prop(item, "reviewBody").and_then(text_of),
        has_more: false,
        review_url: own_prop(item, "url")
            .and_then(prop_value)
            .and_then(|href| resolve(base, &href)),
        album_url,
        image_url,
        avatar_url,
        timestamp: own_prop(item, "datePublished")
            .and_then(prop_value)
            .and_then(|v| parse_timestamp(&v)),
        release_year,
    }
}

/// `prop` on a nested item if `el` is itself an item, else `el`'s own value.
fn scoped_or_text(el: ElementRef<'_>, prop: &str) -> Option<String> {
    if el.value().attr("itemscope").is_some() {
        own_prop(el, prop).and_then(prop_value)
    } else {
        prop_value(el)
    }
}

fn nested_text(item: ElementRef<'_>, prop: &str) -> Option<String> {
    own_prop(item, prop).and_then(prop_value)
}

/// First descendant carrying `itemprop="{prop}"` whose nearest item scope is `item`.
fn own_prop<'a>(item: ElementRef<'a>, prop: &str) -> Option<ElementRef<'a>> {
    let css = format!(r#"[itemprop="{prop}"]"#);
    item.select(&selector(&css))
        .find(|el| owner(*el).is_some_and(|o| o.id() == item.id()))
}

fn owner(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().attr("itemscope").is_some())
}

/// Microdata value of an element, per its tag.
fn prop_value(el: ElementRef<'_>) -> Option<String> {
    match el.value().name() {
        "meta" => attr_of(el, "content"),
        "a" | "link" | "area" => attr_of(el, "href"),
        "img" | "audio" | "video" | "source" => attr_of(el, "src"),
        "time" => attr_of(el, "datetime").or_else(|| text_of(el)),
        "data" | "meter" => attr_of(el, "value"),
        _ => attr_of(el, "content").or_else(|| text_of(el)),
    }
}

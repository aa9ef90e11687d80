//! Notification routing and message formatting.
//!
//! For each organization the target channel is the override for the album's
//! source, then the overrides along that source's fallback chain, then the
//! organization's default. Organizations with no resolvable channel are
//! skipped. A failed send to one organization never blocks the others.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use reviewrelay_shared::{OrgNotificationConfig, ReviewRecord, SourceConfig, SourceTag};

use crate::discord::ChannelSink;

/// Footer label for albums on no curated list.
pub const DEFAULT_LABEL: &str = "Record Club Review";
/// Accent colour for albums on no curated list.
pub const DEFAULT_COLOR: u32 = 0x0099FF;

const FULL_STAR: char = '★';
const HALF_STAR: char = '½';
const RULE: char = '┈';
const EMPTY_BODY: &str = "No review text.";
const MAX_TITLE_CHARS: usize = 256;
/// Ratings above this are not on a star scale and pass through as text.
const MAX_STARS: f64 = 10.0;

/// `floor(rating)` full stars plus a half star for any fractional part.
/// Non-numeric and out-of-scale ratings pass through unchanged.
pub fn format_stars(rating: &str) -> String {
    let value = match rating.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && (0.0..=MAX_STARS).contains(&v) => v,
        _ => return rating.to_string(),
    };

    let mut stars: String = std::iter::repeat_n(FULL_STAR, value.floor() as usize).collect();
    if value.fract() != 0.0 {
        stars.push(HALF_STAR);
    }
    stars
}

// ---------------------------------------------------------------------------
// Outbound message
// ---------------------------------------------------------------------------

/// One chat message: a single rich embed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    pub footer: EmbedFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    /// ISO 8601 review time.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// Outcome of sending one review to every organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    /// Organizations with no channel for this review.
    pub skipped: usize,
    /// `(org_id, error)` per failed send.
    pub failed: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// NotificationRouter
// ---------------------------------------------------------------------------

pub struct NotificationRouter {
    sources: HashMap<SourceTag, SourceConfig>,
}

impl NotificationRouter {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.tag.clone(), s)).collect(),
        }
    }

    /// Channel for `source` in `org`, following fallbacks before the default.
    pub fn resolve_channel<'a>(
        &self,
        org: &'a OrgNotificationConfig,
        source: Option<&SourceTag>,
    ) -> Option<&'a str> {
        let mut tag = source;
        let mut hops = 0;
        while let Some(current) = tag {
            if let Some(channel) = org.override_for(current) {
                return Some(channel);
            }
            hops += 1;
            if hops > self.sources.len() {
                break;
            }
            tag = self.sources.get(current).and_then(|s| s.fallback.as_ref());
        }
        org.default_channel.as_deref()
    }

    /// Footer label and colour for a source.
    pub fn presentation(&self, source: Option<&SourceTag>) -> (&str, u32) {
        match source.and_then(|tag| self.sources.get(tag)) {
            Some(cfg) => (cfg.label.as_str(), cfg.color),
            None => (DEFAULT_LABEL, DEFAULT_COLOR),
        }
    }

    pub fn build_message(&self, review: &ReviewRecord, source: Option<&SourceTag>) -> OutboundMessage {
        let (label, color) = self.presentation(source);

        let year = review
            .release_year
            .as_deref()
            .map(|y| format!(" ({y})"))
            .unwrap_or_default();
        let title = truncate_chars(
            &format!("{} by {}{year}", review.album_title, review.artist_name),
            MAX_TITLE_CHARS,
        );

        let body = if review.review_text.is_empty() {
            EMPTY_BODY.to_string()
        } else if review.is_truncated {
            format!("{} [more]({})", review.review_text, review.review_url)
        } else {
            review.review_text.clone()
        };

        let short_rule: String = std::iter::repeat_n(RULE, 5).collect();
        let long_rule: String = std::iter::repeat_n(RULE, label.chars().count()).collect();
        let description = format!(
            "{}\n{short_rule}\n{body}\n{long_rule}",
            format_stars(&review.rating)
        );

        OutboundMessage {
            embeds: vec![Embed {
                title,
                url: review.review_url.clone(),
                description,
                color,
                author: Some(EmbedAuthor {
                    name: format!("{} reviewed...", review.username),
                    icon_url: review.avatar_url.clone(),
                }),
                footer: EmbedFooter {
                    text: label.to_string(),
                },
                thumbnail: review.image_url.clone().map(|url| EmbedImage { url }),
                timestamp: review.timestamp.to_rfc3339(),
            }],
        }
    }

    /// Send one review to every organization that has a channel for it.
    pub async fn dispatch(
        &self,
        review: &ReviewRecord,
        source: Option<&SourceTag>,
        orgs: &[OrgNotificationConfig],
        sink: &dyn ChannelSink,
    ) -> DispatchReport {
        let message = self.build_message(review, source);
        let mut report = DispatchReport::default();

        for org in orgs {
            let Some(channel) = self.resolve_channel(org, source) else {
                debug!(org = %org.org_id, "no channel configured, skipping");
                report.skipped += 1;
                continue;
            };

            match sink.send(channel, &message).await {
                Ok(()) => {
                    debug!(org = %org.org_id, channel, review = %review.review_url, "notification sent");
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(org = %org.org_id, channel, error = %e, "notification failed");
                    report.failed.push((org.org_id.clone(), e.to_string()));
                }
            }
        }

        report
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

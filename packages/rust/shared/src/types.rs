//! Core domain types for ReviewRelay.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rating placeholder when a review carries no score.
pub const NO_RATING: &str = "No rating";

/// Artist placeholder when the page gives no usable artist name.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

// ---------------------------------------------------------------------------
// SourceTag
// ---------------------------------------------------------------------------

/// Label of the curated list an album belongs to (e.g. `1001`, `latam`).
///
/// "Unknown" is modelled as `Option::<SourceTag>::None` rather than a magic tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTag(pub String);

impl SourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// TrackedUser
// ---------------------------------------------------------------------------

/// A chat user linked to a review-site profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedUser {
    /// Chat-side identity (primary key).
    pub discord_id: String,
    /// Username on the review site.
    pub username: String,
    /// Identity (URL) of the last processed review; `None` until the first poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    /// When the watermark was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ReviewRecord
// ---------------------------------------------------------------------------

/// One review as scraped from a profile's review listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Review-site username of the author.
    pub username: String,
    pub album_title: String,
    /// Artist name, or [`UNKNOWN_ARTIST`].
    pub artist_name: String,
    /// Raw rating text, or [`NO_RATING`].
    pub rating: String,
    /// Review body, capped in length.
    pub review_text: String,
    /// Set when the body was cut short or the page only showed an excerpt.
    #[serde(default)]
    pub is_truncated: bool,
    /// Absolute review URL. Stable across polls; used as the diffing key.
    pub review_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Four-digit release year, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_year: Option<String>,
}

// ---------------------------------------------------------------------------
// Curated albums
// ---------------------------------------------------------------------------

/// One row of a persisted curated "best-of" list. Unique on all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CuratedAlbum {
    pub title: String,
    pub artist: String,
    pub source: SourceTag,
}

impl CuratedAlbum {
    pub fn new(title: impl Into<String>, artist: impl Into<String>, source: &str) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            source: SourceTag::new(source),
        }
    }
}

// ---------------------------------------------------------------------------
// OrgNotificationConfig
// ---------------------------------------------------------------------------

/// Where one organization (chat server) wants notifications delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgNotificationConfig {
    pub org_id: String,
    /// Channel used when no source-specific override applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
    /// Source tag → channel id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<SourceTag, String>,
}

impl OrgNotificationConfig {
    /// Channel override for a given source, if one is configured.
    pub fn override_for(&self, tag: &SourceTag) -> Option<&str> {
        self.overrides.get(tag).map(String::as_str)
    }
}

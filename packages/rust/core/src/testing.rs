//! Scripted collaborators for orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use reviewrelay_crawler::{AlbumDetails, ReviewSource};
use reviewrelay_metadata::YearLookup;
use reviewrelay_shared::{Result, ReviewRecord, ReviewRelayError};
use reviewrelay_storage::Storage;

use crate::discord::ChannelSink;
use crate::router::OutboundMessage;

/// Review number `n`; higher numbers are newer.
pub(crate) fn review(n: u32) -> ReviewRecord {
    ReviewRecord {
        username: "alice".into(),
        album_title: format!("Album {n}"),
        artist_name: format!("Artist {n}"),
        rating: "4".into(),
        review_text: format!("Thoughts on album {n}."),
        is_truncated: false,
        review_url: format!("https://record.club/reviews/{n}"),
        album_url: Some(format!("https://record.club/releases/{n}")),
        image_url: Some(format!("https://cdn.record.club/covers/{n}.jpg")),
        avatar_url: Some("https://record.club/media/avatars/alice.jpg".into()),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(n as i64),
        release_year: None,
    }
}

/// A newest-first listing of the given review numbers.
pub(crate) fn listing(numbers: &[u32]) -> Vec<ReviewRecord> {
    numbers.iter().map(|&n| review(n)).collect()
}

pub(crate) async fn temp_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("rr_core_test_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Replays queued fetch results per username; an empty queue yields no reviews.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    script: Mutex<HashMap<String, VecDeque<Result<Vec<ReviewRecord>>>>>,
    albums: Mutex<HashMap<String, AlbumDetails>>,
    calls: Mutex<Vec<String>>,
    album_calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, username: &str, result: Result<Vec<ReviewRecord>>) {
        self.script
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .push_back(result);
    }

    pub(crate) fn album(&self, album_url: &str, details: AlbumDetails) {
        self.albums.lock().unwrap().insert(album_url.to_string(), details);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn album_calls(&self) -> Vec<String> {
        self.album_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewSource for ScriptedSource {
    async fn recent_reviews(&self, username: &str) -> Result<Vec<ReviewRecord>> {
        self.calls.lock().unwrap().push(username.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(username)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn album_details(&self, album_url: &str) -> Result<AlbumDetails> {
        self.album_calls.lock().unwrap().push(album_url.to_string());
        self.albums
            .lock()
            .unwrap()
            .get(album_url)
            .cloned()
            .ok_or_else(|| ReviewRelayError::NotFound(album_url.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Records every send; channels listed as failing return a send error.
#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failing: HashSet<String>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(channels: &[&str]) -> Self {
        Self {
            failing: channels.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.embeds[0].title.clone())
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn send(&self, channel_id: &str, message: &OutboundMessage) -> Result<()> {
        if self.failing.contains(channel_id) {
            return Err(ReviewRelayError::send(channel_id, "HTTP 500"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticYears
// ---------------------------------------------------------------------------

/// Year lookup answering from a fixed album → year map.
#[derive(Default)]
pub(crate) struct StaticYears {
    years: HashMap<String, String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl StaticYears {
    pub(crate) fn new(years: &[(&str, &str)]) -> Self {
        Self {
            years: years
                .iter()
                .map(|(album, year)| (album.to_string(), year.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl YearLookup for StaticYears {
    async fn resolve_year(&self, _artist: &str, album: &str) -> Option<String> {
        self.calls.lock().unwrap().push((album.to_string(), Instant::now()));
        self.years.get(album).cloned()
    }
}

//! Curated-list album classification.
//!
//! Entries are keyed by a canonical form of their title and matched in
//! three tiers, first match wins:
//!
//! 1. title and artist equal
//! 2. title equal, one artist contains the other (billing variants)
//! 3. title equal, artist ignored
//!
//! Tier 3 can attribute an album to the wrong list when two lists share a
//! title; that is accepted to keep recall high against scraped text.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, instrument};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use reviewrelay_shared::{CuratedAlbum, Result, SourceTag};
use reviewrelay_storage::ReviewStore;

/// Canonical comparison form: accents stripped, lowercased, alphanumerics only.
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// A curated album with its normalized keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuratedAlbumEntry {
    pub title: String,
    pub artist: String,
    pub source: SourceTag,
    pub normalized_title: String,
    pub normalized_artist: String,
}

impl From<&CuratedAlbum> for CuratedAlbumEntry {
    fn from(album: &CuratedAlbum) -> Self {
        Self {
            title: album.title.clone(),
            artist: album.artist.clone(),
            source: album.source.clone(),
            normalized_title: normalize(&album.title),
            normalized_artist: normalize(&album.artist),
        }
    }
}

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    ArtistContains,
    TitleOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumMatch {
    pub source: SourceTag,
    pub tier: MatchTier,
}

// ---------------------------------------------------------------------------
// AlbumIndex
// ---------------------------------------------------------------------------

/// Immutable lookup structure over one curated set.
#[derive(Debug, Default)]
pub struct AlbumIndex {
    entries: Vec<CuratedAlbumEntry>,
    by_title: HashMap<String, Vec<usize>>,
}

impl AlbumIndex {
    pub fn build(albums: &[CuratedAlbum]) -> Self {
        let mut index = Self::default();
        for album in albums {
            let entry = CuratedAlbumEntry::from(album);
            if entry.normalized_title.is_empty() {
                continue;
            }
            index
                .by_title
                .entry(entry.normalized_title.clone())
                .or_default()
                .push(index.entries.len());
            index.entries.push(entry);
        }
        index
    }

    pub fn lookup(&self, title: &str, artist: &str) -> Option<AlbumMatch> {
        let title = normalize(title);
        let artist = normalize(artist);
        let candidates: Vec<&CuratedAlbumEntry> = self
            .by_title
            .get(&title)?
            .iter()
            .map(|&i| &self.entries[i])
            .collect();

        let hit = |entry: &CuratedAlbumEntry, tier: MatchTier| AlbumMatch {
            source: entry.source.clone(),
            tier,
        };

        if let Some(entry) = candidates.iter().find(|e| e.normalized_artist == artist) {
            return Some(hit(*entry, MatchTier::Exact));
        }

        if !artist.is_empty() {
            let contains = candidates.iter().find(|e| {
                !e.normalized_artist.is_empty()
                    && (e.normalized_artist.contains(&artist) || artist.contains(&e.normalized_artist))
            });
            if let Some(entry) = contains {
                return Some(hit(*entry, MatchTier::ArtistContains));
            }
        }

        candidates
            .first()
            .copied()
            .map(|entry| hit(entry, MatchTier::TitleOnly))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry count per source tag.
    pub fn counts(&self) -> BTreeMap<SourceTag, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.source.clone()).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// AlbumClassifier
// ---------------------------------------------------------------------------

/// Shared classifier whose index is swapped wholesale on rebuild.
///
/// Readers take an `Arc` snapshot, so a lookup never sees a half-built index.
#[derive(Debug, Default)]
pub struct AlbumClassifier {
    index: RwLock<Arc<AlbumIndex>>,
}

impl AlbumClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with one built from `albums`. Returns the entry count.
    pub fn rebuild(&self, albums: &[CuratedAlbum]) -> usize {
        let next = Arc::new(AlbumIndex::build(albums));
        let count = next.len();
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = next;
        count
    }

    /// Rebuild from the persisted curated set.
    #[instrument(skip_all)]
    pub async fn sync_from(&self, store: &dyn ReviewStore) -> Result<BTreeMap<SourceTag, usize>> {
        let albums = store.list_curated_albums().await?;
        self.rebuild(&albums);
        let counts = self.snapshot().counts();
        info!(total = albums.len(), sources = counts.len(), "curated index rebuilt");
        Ok(counts)
    }

    pub fn snapshot(&self) -> Arc<AlbumIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Source tag for an album, or `None` when it is on no curated list.
    pub fn classify(&self, title: &str, artist: &str) -> Option<SourceTag> {
        let found = self.snapshot().lookup(title, artist);
        debug!(title, artist, tier = ?found.as_ref().map(|m| m.tier), "classified album");
        found.map(|m| m.source)
    }
}

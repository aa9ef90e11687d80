//! libSQL storage layer for ReviewRelay.
//!
//! The [`Storage`] struct wraps a local libSQL database holding tracked users
//! and their watermarks, per-organization channel routing, and the curated
//! album lists. The polling engine only sees it through [`ReviewStore`].

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use reviewrelay_shared::{
    CuratedAlbum, OrgNotificationConfig, Result, ReviewRelayError, SourceTag, TrackedUser,
};

// ---------------------------------------------------------------------------
// Persistence seam
// ---------------------------------------------------------------------------

/// What the polling engine needs from persistence.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// All tracked users, in link order.
    async fn list_users(&self) -> Result<Vec<TrackedUser>>;

    /// Write a user's watermark (and last-checked time) in one statement.
    async fn set_watermark(
        &self,
        discord_id: &str,
        watermark: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Every organization with at least one configured channel.
    async fn list_org_configs(&self) -> Result<Vec<OrgNotificationConfig>>;

    /// The persisted curated set, in insertion order.
    async fn list_curated_albums(&self) -> Result<Vec<CuratedAlbum>>;

    /// Replace the whole curated set atomically.
    async fn replace_curated_albums(&self, albums: &[CuratedAlbum]) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn db_err(e: libsql::Error) -> ReviewRelayError {
    ReviewRelayError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReviewRelayError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ReviewRelayError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Track a user. Re-linking to a different username clears the watermark
    /// so the next cycle seeds instead of diffing against another profile.
    pub async fn link_user(&self, discord_id: &str, username: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (discord_id, username, last_review_url, last_checked_at)
                 VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT(discord_id) DO UPDATE SET
                   username = excluded.username,
                   last_review_url = CASE
                     WHEN users.username = excluded.username THEN users.last_review_url
                     ELSE NULL
                   END",
                params![discord_id, username],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Stop tracking a user. Returns `false` if the user was not linked.
    pub async fn unlink_user(&self, discord_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE discord_id = ?1", params![discord_id])
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Get one tracked user.
    pub async fn get_user(&self, discord_id: &str) -> Result<Option<TrackedUser>> {
        let mut rows = self
            .conn
            .query(
                "SELECT discord_id, username, last_review_url, last_checked_at
                 FROM users WHERE discord_id = ?1",
                params![discord_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Organization routing
    // -----------------------------------------------------------------------

    /// Set (or replace) an organization's default channel.
    pub async fn set_default_channel(&self, org_id: &str, channel_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO org_settings (org_id, default_channel_id) VALUES (?1, ?2)
                 ON CONFLICT(org_id) DO UPDATE SET default_channel_id = excluded.default_channel_id",
                params![org_id, channel_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Set (or replace) the channel used for one curated source.
    pub async fn set_channel_override(
        &self,
        org_id: &str,
        source: &SourceTag,
        channel_id: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO org_settings (org_id, default_channel_id) VALUES (?1, NULL)
                 ON CONFLICT(org_id) DO NOTHING",
                params![org_id],
            )
            .await
            .map_err(db_err)?;
        self.conn
            .execute(
                "INSERT INTO org_channel_overrides (org_id, source, channel_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(org_id, source) DO UPDATE SET channel_id = excluded.channel_id",
                params![org_id, source.as_str(), channel_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Remove an organization's default channel (overrides are kept).
    pub async fn clear_default_channel(&self, org_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE org_settings SET default_channel_id = NULL WHERE org_id = ?1",
                params![org_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Remove one source override.
    pub async fn clear_channel_override(&self, org_id: &str, source: &SourceTag) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM org_channel_overrides WHERE org_id = ?1 AND source = ?2",
                params![org_id, source.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for Storage {
    async fn list_users(&self) -> Result<Vec<TrackedUser>> {
        let mut rows = self
            .conn
            .query(
                "SELECT discord_id, username, last_review_url, last_checked_at
                 FROM users ORDER BY rowid",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_user(&row)?);
        }
        Ok(results)
    }

    async fn set_watermark(
        &self,
        discord_id: &str,
        watermark: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET last_review_url = ?1, last_checked_at = ?2 WHERE discord_id = ?3",
                params![watermark, checked_at.to_rfc3339(), discord_id],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return Err(ReviewRelayError::NotFound(format!(
                "user {discord_id} is not linked"
            )));
        }
        Ok(())
    }

    async fn list_org_configs(&self) -> Result<Vec<OrgNotificationConfig>> {
        let mut orgs: BTreeMap<String, OrgNotificationConfig> = BTreeMap::new();

        let mut rows = self
            .conn
            .query(
                "SELECT org_id, default_channel_id FROM org_settings ORDER BY org_id",
                params![],
            )
            .await
            .map_err(db_err)?;
        while let Ok(Some(row)) = rows.next().await {
            let org_id: String = row.get(0).map_err(db_err)?;
            let default_channel: Option<String> = row.get::<String>(1).ok();
            orgs.insert(
                org_id.clone(),
                OrgNotificationConfig {
                    org_id,
                    default_channel,
                    overrides: BTreeMap::new(),
                },
            );
        }

        let mut rows = self
            .conn
            .query(
                "SELECT org_id, source, channel_id FROM org_channel_overrides",
                params![],
            )
            .await
            .map_err(db_err)?;
        while let Ok(Some(row)) = rows.next().await {
            let org_id: String = row.get(0).map_err(db_err)?;
            let source: String = row.get(1).map_err(db_err)?;
            let channel_id: String = row.get(2).map_err(db_err)?;
            if let Some(org) = orgs.get_mut(&org_id) {
                org.overrides.insert(SourceTag(source), channel_id);
            }
        }

        Ok(orgs
            .into_values()
            .filter(|o| o.default_channel.is_some() || !o.overrides.is_empty())
            .collect())
    }

    async fn list_curated_albums(&self) -> Result<Vec<CuratedAlbum>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, artist, source FROM curated_albums ORDER BY rowid",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(CuratedAlbum {
                title: row.get(0).map_err(db_err)?,
                artist: row.get(1).map_err(db_err)?,
                source: SourceTag(row.get(2).map_err(db_err)?),
            });
        }
        Ok(results)
    }

    async fn replace_curated_albums(&self, albums: &[CuratedAlbum]) -> Result<usize> {
        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute("DELETE FROM curated_albums", params![])
            .await
            .map_err(db_err)?;

        let mut inserted = 0;
        for album in albums {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO curated_albums (title, artist, source) VALUES (?1, ?2, ?3)",
                    params![
                        album.title.as_str(),
                        album.artist.as_str(),
                        album.source.as_str()
                    ],
                )
                .await
                .map_err(db_err)? as usize;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::info!(albums = inserted, "replaced curated album set");
        Ok(inserted)
    }
}

/// Convert a database row to a [`TrackedUser`].
fn row_to_user(row: &libsql::Row) -> Result<TrackedUser> {
    Ok(TrackedUser {
        discord_id: row.get::<String>(0).map_err(db_err)?,
        username: row.get::<String>(1).map_err(db_err)?,
        watermark: row.get::<String>(2).ok(),
        last_checked_at: match row.get::<String>(3).ok() {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ReviewRelayError::Storage(format!("invalid date: {e}")))?,
            ),
            None => None,
        },
    })
}

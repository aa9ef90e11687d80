//! Shared types, error model, and configuration for ReviewRelay.
//!
//! This crate is the foundation depended on by all other ReviewRelay crates.
//! It provides:
//! - [`ReviewRelayError`]: the unified error type
//! - Domain types ([`ReviewRecord`], [`TrackedUser`], [`CuratedAlbum`], [`OrgNotificationConfig`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`retry_transient`] for bounded retries of transient failures

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, DiscordConfig, MusicBrainzConfig, PollingConfig, ScraperConfig,
    SourceConfig, config_dir, config_file_path, database_path, init_config, load_config,
    load_config_from, validate_token,
};
pub use error::{Result, ReviewRelayError};
pub use retry::{RetryPolicy, retry_transient};
pub use types::{
    CuratedAlbum, NO_RATING, OrgNotificationConfig, ReviewRecord, SourceTag, TrackedUser,
    UNKNOWN_ARTIST,
};

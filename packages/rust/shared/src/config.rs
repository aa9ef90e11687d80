//! Application configuration for ReviewRelay.
//!
//! User config lives at `~/.reviewrelay/reviewrelay.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewRelayError};
use crate::types::SourceTag;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reviewrelay.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reviewrelay";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "reviewrelay.db";

// ---------------------------------------------------------------------------
// Config structs (matching reviewrelay.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub musicbrainz: MusicBrainzConfig,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Curated sources, their presentation, and channel fallback.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            scraper: ScraperConfig::default(),
            musicbrainz: MusicBrainzConfig::default(),
            discord: DiscordConfig::default(),
            database: DatabaseConfig::default(),
            sources: default_sources(),
        }
    }
}

/// `[polling]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between timer-driven cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Pause between users within one cycle.
    #[serde(default = "default_user_delay_ms")]
    pub user_delay_ms: u64,

    /// Minimum spacing between metadata lookups within one backlog.
    #[serde(default = "default_enrichment_delay_ms")]
    pub enrichment_delay_ms: u64,

    /// Run a cycle immediately when the daemon starts.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            user_delay_ms: default_user_delay_ms(),
            enrichment_delay_ms: default_enrichment_delay_ms(),
            run_on_start: true,
        }
    }
}

fn default_interval_secs() -> u64 {
    15 * 60
}
fn default_user_delay_ms() -> u64 {
    5_000
}
fn default_enrichment_delay_ms() -> u64 {
    1_100
}
fn default_true() -> bool {
    true
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Review site origin; relative links are resolved against it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,

    /// CSS selector that signals the listing has rendered.
    #[serde(default = "default_ready_selector")]
    pub ready_selector: String,

    /// Wait before re-requesting a page that was not ready yet.
    #[serde(default = "default_ready_retry_ms")]
    pub ready_retry_ms: u64,

    /// How many listing pages to pull per fetch (1 = first page only).
    #[serde(default = "default_lazy_load_pages")]
    pub lazy_load_pages: u32,

    /// Navigation attempts before a fetch is reported as failed.
    #[serde(default = "default_nav_attempts")]
    pub nav_attempts: u32,

    /// Base delay between navigation attempts, multiplied by the attempt number.
    #[serde(default = "default_nav_backoff_ms")]
    pub nav_backoff_ms: u64,

    /// Review bodies longer than this are cut and flagged as truncated.
    #[serde(default = "default_max_review_chars")]
    pub max_review_chars: usize,

    /// Load the album page when the release year is still unknown.
    #[serde(default = "default_true")]
    pub album_page_fallback: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_scrape_timeout(),
            ready_selector: default_ready_selector(),
            ready_retry_ms: default_ready_retry_ms(),
            lazy_load_pages: default_lazy_load_pages(),
            nav_attempts: default_nav_attempts(),
            nav_backoff_ms: default_nav_backoff_ms(),
            max_review_chars: default_max_review_chars(),
            album_page_fallback: true,
        }
    }
}

fn default_base_url() -> String {
    "https://record.club".into()
}
fn default_scrape_timeout() -> u64 {
    60
}
fn default_ready_selector() -> String {
    "article.review-teaser".into()
}
fn default_ready_retry_ms() -> u64 {
    1_000
}
fn default_lazy_load_pages() -> u32 {
    1
}
fn default_nav_attempts() -> u32 {
    3
}
fn default_nav_backoff_ms() -> u64 {
    2_000
}
fn default_max_review_chars() -> usize {
    500
}

/// `[musicbrainz]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicBrainzConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_mb_base_url")]
    pub base_url: String,

    /// MusicBrainz rejects anonymous clients; identify the application.
    #[serde(default = "default_mb_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_mb_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_mb_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * backoff_ms`.
    #[serde(default = "default_mb_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_mb_base_url(),
            user_agent: default_mb_user_agent(),
            timeout_secs: default_mb_timeout(),
            max_attempts: default_mb_attempts(),
            backoff_ms: default_mb_backoff_ms(),
        }
    }
}

fn default_mb_base_url() -> String {
    "https://musicbrainz.org/ws/2".into()
}
fn default_mb_user_agent() -> String {
    concat!("ReviewRelay/", env!("CARGO_PKG_VERSION"), " ( reviewrelay@example.com )").into()
}
fn default_mb_timeout() -> u64 {
    5
}
fn default_mb_attempts() -> u32 {
    3
}
fn default_mb_backoff_ms() -> u64 {
    1_000
}

/// `[discord]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Name of the env var holding the bot token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_api_base(),
        }
    }
}

fn default_token_env() -> String {
    "DISCORD_TOKEN".into()
}
fn default_api_base() -> String {
    "https://discord.com/api/v10".into()
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; defaults to `~/.reviewrelay/reviewrelay.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[[sources]]` entry: presentation and routing for one curated list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub tag: SourceTag,
    /// Footer label shown on notifications.
    pub label: String,
    /// Embed accent colour (`0xRRGGBB`).
    pub color: u32,
    /// Source whose channel override is used when this one has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<SourceTag>,
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            tag: SourceTag::new("1001"),
            label: "🏆 1001 Albums List".into(),
            color: 0xFFD700,
            fallback: None,
        },
        SourceConfig {
            tag: SourceTag::new("latam"),
            label: "🌎 600 Discos Latinoamérica".into(),
            color: 0xFF5733,
            fallback: Some(SourceTag::new("1001")),
        },
    ]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reviewrelay/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ReviewRelayError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reviewrelay/reviewrelay.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path: explicit config value or the default location.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.database.path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ReviewRelayError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ReviewRelayError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_sources(&config.sources)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ReviewRelayError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ReviewRelayError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ReviewRelayError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the Discord token env var is set and non-empty, and return it.
pub fn validate_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.discord.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ReviewRelayError::config(format!(
            "Discord bot token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Reject duplicate tags and fallbacks that point at unknown sources.
fn validate_sources(sources: &[SourceConfig]) -> Result<()> {
    for (i, source) in sources.iter().enumerate() {
        if sources[..i].iter().any(|s| s.tag == source.tag) {
            return Err(ReviewRelayError::config(format!(
                "duplicate source tag {}",
                source.tag
            )));
        }
        if let Some(fallback) = &source.fallback {
            if !sources.iter().any(|s| &s.tag == fallback) {
                return Err(ReviewRelayError::config(format!(
                    "source {} falls back to unknown source {fallback}",
                    source.tag
                )));
            }
        }
    }
    Ok(())
}

//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use reviewrelay_core::{
    AlbumClassifier, ChannelSink, CycleObserver, CycleOutcome, CycleReport, DiscordSink,
    NotificationRouter, OutboundMessage, Poller, PollerSettings, Scheduler, SilentObserver,
    TriggerHandle, UserOutcome,
};
use reviewrelay_crawler::{HttpRenderer, ReviewFetcher, ReviewSource, validate_username};
use reviewrelay_metadata::YearResolver;
use reviewrelay_shared::{
    AppConfig, CuratedAlbum, ReviewRelayError, SourceTag, database_path, init_config, load_config,
    load_config_from, validate_token,
};
use reviewrelay_storage::{ReviewStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ReviewRelay: relay new record.club reviews into Discord.
#[derive(Parser)]
#[command(
    name = "reviewrelay",
    version,
    about = "Poll record.club profiles and relay new reviews into Discord channels.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.reviewrelay/reviewrelay.toml).
    #[arg(long, global = true, env = "REVIEWRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the polling daemon (SIGUSR1 polls now, SIGHUP resyncs curated lists).
    Run,

    /// Run a single polling cycle and print its report.
    Poll,

    /// Track a record.club user for a Discord member.
    Link {
        /// Discord user ID.
        discord_id: String,

        /// record.club username.
        username: String,

        /// Fetch the profile first and refuse if it has no reviews.
        #[arg(long)]
        verify: bool,
    },

    /// Stop tracking a Discord member.
    Unlink {
        /// Discord user ID.
        discord_id: String,
    },

    /// List tracked users and their watermarks.
    Users,

    /// Per-server notification channels.
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Show (or send) the formatted message for a user's newest review.
    Latest {
        /// record.club username.
        username: String,

        /// Post the message to this channel instead of printing it.
        #[arg(long)]
        send: Option<String>,
    },

    /// Rebuild the curated index and print counts per source.
    Sync {
        /// Replace the stored curated set with a JSON array of
        /// `{ "title", "artist", "source" }` objects first.
        #[arg(long)]
        import: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Channel subcommands.
#[derive(Subcommand)]
pub(crate) enum ChannelAction {
    /// Set the default channel, or the channel for one curated source.
    Set {
        /// Discord server (guild) ID.
        #[arg(long)]
        org: String,

        /// Curated source tag (e.g. 1001, latam). Omit for the default channel.
        #[arg(long)]
        source: Option<String>,

        /// Discord channel ID.
        channel_id: String,
    },
    /// Clear the default channel, or the channel for one curated source.
    Clear {
        #[arg(long)]
        org: String,

        #[arg(long)]
        source: Option<String>,
    },
    /// Show every server's routing.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reviewrelay=info",
        1 => "reviewrelay=debug",
        _ => "reviewrelay=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init();
    }

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run => cmd_run(&config).await,
        Command::Poll => cmd_poll(&config).await,
        Command::Link {
            discord_id,
            username,
            verify,
        } => cmd_link(&config, &discord_id, &username, verify).await,
        Command::Unlink { discord_id } => cmd_unlink(&config, &discord_id).await,
        Command::Users => cmd_users(&config).await,
        Command::Channel { action } => match action {
            ChannelAction::Set {
                org,
                source,
                channel_id,
            } => cmd_channel_set(&config, &org, source.as_deref(), &channel_id).await,
            ChannelAction::Clear { org, source } => {
                cmd_channel_clear(&config, &org, source.as_deref()).await
            }
            ChannelAction::List => cmd_channel_list(&config).await,
        },
        Command::Latest { username, send } => cmd_latest(&config, &username, send.as_deref()).await,
        Command::Sync { import } => cmd_sync(&config, import.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = database_path(config)?;
    info!(path = %path.display(), "opening database");
    Ok(Arc::new(Storage::open(&path).await?))
}

fn build_source(config: &AppConfig) -> Result<Arc<ReviewFetcher>> {
    let renderer = HttpRenderer::new(Duration::from_secs(config.scraper.timeout_secs))?;
    Ok(Arc::new(ReviewFetcher::new(
        Arc::new(renderer),
        config.scraper.clone(),
    )?))
}

async fn load_classifier(store: &Storage) -> Result<Arc<AlbumClassifier>> {
    let classifier = Arc::new(AlbumClassifier::new());
    let counts = classifier.sync_from(store).await?;
    if counts.is_empty() {
        warn!("curated set is empty, every review will be unclassified (see `reviewrelay sync --import`)");
    }
    Ok(classifier)
}

fn build_poller(
    config: &AppConfig,
    store: Arc<Storage>,
    sink: Arc<dyn ChannelSink>,
    classifier: Arc<AlbumClassifier>,
) -> Result<Poller> {
    let poller = Poller::new(
        store,
        build_source(config)?,
        sink,
        classifier,
        NotificationRouter::new(config.sources.clone()),
        PollerSettings::from_config(config),
    );

    if config.musicbrainz.enabled {
        let years = YearResolver::new(&config.musicbrainz)?;
        Ok(poller.with_year_lookup(Arc::new(years)))
    } else {
        Ok(poller)
    }
}

fn known_source(config: &AppConfig, tag: &str) -> Result<SourceTag> {
    let tag = SourceTag::new(tag);
    if config.sources.iter().any(|s| s.tag == tag) {
        return Ok(tag);
    }
    let known: Vec<&str> = config.sources.iter().map(|s| s.tag.as_str()).collect();
    Err(eyre!("unknown source '{tag}': expected one of {}", known.join(", ")))
}

// ---------------------------------------------------------------------------
// Polling commands
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig) -> Result<()> {
    if config.polling.interval_secs == 0 {
        return Err(eyre!("polling.interval_secs must be greater than zero"));
    }
    let token = validate_token(config)?;
    let store = open_storage(config).await?;
    let classifier = load_classifier(&store).await?;
    let sink = Arc::new(DiscordSink::new(&config.discord, token)?);
    let poller = Arc::new(build_poller(config, store.clone(), sink, classifier.clone())?);

    let (scheduler, trigger) = Scheduler::new(
        poller,
        Duration::from_secs(config.polling.interval_secs),
        config.polling.run_on_start,
        Arc::new(SilentObserver),
    );
    spawn_signal_handlers(trigger, classifier, store)?;

    info!(pid = std::process::id(), "daemon running, Ctrl-C to stop");
    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_handlers(
    trigger: TriggerHandle,
    classifier: Arc<AlbumClassifier>,
    store: Arc<Storage>,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut poll_now = signal(SignalKind::user_defined1())?;
    let mut resync = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = poll_now.recv() => {
                    if !trigger.trigger() {
                        info!("a manual cycle is already queued");
                    }
                }
                Some(()) = resync.recv() => {
                    if let Err(e) = classifier.sync_from(store.as_ref()).await {
                        warn!(error = %e, "curated resync failed, keeping the previous index");
                    }
                }
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(
    _trigger: TriggerHandle,
    _classifier: Arc<AlbumClassifier>,
    _store: Arc<Storage>,
) -> Result<()> {
    Ok(())
}

async fn cmd_poll(config: &AppConfig) -> Result<()> {
    let token = validate_token(config)?;
    let store = open_storage(config).await?;
    let classifier = load_classifier(&store).await?;
    let sink = Arc::new(DiscordSink::new(&config.discord, token)?);
    let poller = build_poller(config, store, sink, classifier)?;

    let progress = CliProgress::new();
    match poller.run_cycle(&progress).await {
        CycleOutcome::Completed(report) => print_report(&report),
        CycleOutcome::Skipped => println!("A cycle is already running."),
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!();
    println!("  Cycle:      {}", report.cycle_id);
    println!("  Users:      {}", report.users_polled);
    println!("  Seeded:     {}", report.seeded);
    println!("  Up to date: {}", report.up_to_date);
    println!("  Reset:      {}", report.reset);
    println!("  Empty:      {}", report.empty);
    println!(
        "  Notified:   {} reviews ({} sent, {} failed)",
        report.reviews_notified, report.messages_sent, report.send_failures
    );
    for failure in &report.failures {
        println!("  Failed:     {} ({})", failure.username, failure.error);
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress observer
// ---------------------------------------------------------------------------

/// Cycle observer using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl CycleObserver for CliProgress {
    fn cycle_started(&self, users: usize) {
        self.spinner.set_message(format!("Polling {users} users"));
    }

    fn user_started(&self, username: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Polling [{current}/{total}] {username}"));
    }

    fn user_finished(&self, username: &str, outcome: &reviewrelay_shared::Result<UserOutcome>) {
        match outcome {
            Ok(UserOutcome::Notified { reviews, .. }) => {
                self.spinner
                    .println(format!("  {username}: {reviews} new review(s)"));
            }
            Ok(UserOutcome::Reset) => {
                self.spinner
                    .println(format!("  {username}: watermark reset"));
            }
            Ok(_) => {}
            Err(e) => self.spinner.println(format!("  {username}: {e}")),
        }
    }

    fn cycle_finished(&self, _report: &CycleReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn cmd_link(config: &AppConfig, discord_id: &str, username: &str, verify: bool) -> Result<()> {
    validate_username(username)?;

    if verify {
        let reviews = build_source(config)?.recent_reviews(username).await?;
        if reviews.is_empty() {
            return Err(eyre!(
                "no reviews found for '{username}': check the username or link without --verify"
            ));
        }
        info!(username, reviews = reviews.len(), "profile verified");
    }

    let store = open_storage(config).await?;
    store.link_user(discord_id, username).await?;
    println!("Linked {discord_id} to record.club user {username}. The next cycle seeds the watermark.");
    Ok(())
}

async fn cmd_unlink(config: &AppConfig, discord_id: &str) -> Result<()> {
    let store = open_storage(config).await?;
    if store.unlink_user(discord_id).await? {
        println!("Unlinked {discord_id}.");
    } else {
        println!("{discord_id} was not linked.");
    }
    Ok(())
}

async fn cmd_users(config: &AppConfig) -> Result<()> {
    let store = open_storage(config).await?;
    let users = store.list_users().await?;
    if users.is_empty() {
        println!("No tracked users.");
        return Ok(());
    }

    for user in users {
        let checked = user
            .last_checked_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into());
        println!(
            "  {:<20} {:<20} checked {checked}",
            user.discord_id, user.username
        );
        println!(
            "  {:<20} watermark {}",
            "",
            user.watermark.as_deref().unwrap_or("(none, next cycle seeds)")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

async fn cmd_channel_set(
    config: &AppConfig,
    org: &str,
    source: Option<&str>,
    channel_id: &str,
) -> Result<()> {
    let store = open_storage(config).await?;
    match source {
        Some(tag) => {
            let tag = known_source(config, tag)?;
            store.set_channel_override(org, &tag, channel_id).await?;
            println!("{tag} reviews in {org} now go to channel {channel_id}.");
        }
        None => {
            store.set_default_channel(org, channel_id).await?;
            println!("Default channel for {org} is now {channel_id}.");
        }
    }
    Ok(())
}

async fn cmd_channel_clear(config: &AppConfig, org: &str, source: Option<&str>) -> Result<()> {
    let store = open_storage(config).await?;
    match source {
        Some(tag) => {
            let tag = known_source(config, tag)?;
            store.clear_channel_override(org, &tag).await?;
            println!("Cleared the {tag} channel for {org}.");
        }
        None => {
            store.clear_default_channel(org).await?;
            println!("Cleared the default channel for {org}.");
        }
    }
    Ok(())
}

async fn cmd_channel_list(config: &AppConfig) -> Result<()> {
    let store = open_storage(config).await?;
    let orgs = store.list_org_configs().await?;
    if orgs.is_empty() {
        println!("No servers configured.");
        return Ok(());
    }

    for org in orgs {
        println!("  {}", org.org_id);
        println!(
            "    default  {}",
            org.default_channel.as_deref().unwrap_or("-")
        );
        for (tag, channel) in &org.overrides {
            println!("    {:<8} {channel}", tag.as_str());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Latest review
// ---------------------------------------------------------------------------

/// Prints messages as JSON instead of posting them.
struct StdoutSink;

#[async_trait]
impl ChannelSink for StdoutSink {
    async fn send(
        &self,
        _channel_id: &str,
        message: &OutboundMessage,
    ) -> reviewrelay_shared::Result<()> {
        let json = serde_json::to_string_pretty(message)
            .map_err(|e| ReviewRelayError::parse(e.to_string()))?;
        println!("{json}");
        Ok(())
    }
}

async fn cmd_latest(config: &AppConfig, username: &str, send: Option<&str>) -> Result<()> {
    validate_username(username)?;
    let store = open_storage(config).await?;
    let classifier = load_classifier(&store).await?;

    let sink: Arc<dyn ChannelSink> = match send {
        Some(_) => Arc::new(DiscordSink::new(&config.discord, validate_token(config)?)?),
        None => Arc::new(StdoutSink),
    };
    let poller = build_poller(config, store, sink.clone(), classifier)?;

    let Some(latest) = poller.latest(username).await? else {
        println!("No reviews found for {username}.");
        return Ok(());
    };

    info!(
        album = %latest.review.album_title,
        source = latest.source.as_ref().map(SourceTag::as_str).unwrap_or("unknown"),
        "latest review"
    );

    sink.send(send.unwrap_or("stdout"), &latest.message).await?;
    if let Some(channel) = send {
        println!("Sent to channel {channel}.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Curated lists
// ---------------------------------------------------------------------------

async fn cmd_sync(config: &AppConfig, import: Option<&Path>) -> Result<()> {
    let store = open_storage(config).await?;

    if let Some(path) = import {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read {}: {e}", path.display()))?;
        let albums: Vec<CuratedAlbum> = serde_json::from_str(&content)
            .map_err(|e| eyre!("invalid curated list {}: {e}", path.display()))?;

        for album in &albums {
            if !config.sources.iter().any(|s| s.tag == album.source) {
                warn!(source = %album.source, title = %album.title, "album tagged with an unconfigured source");
            }
        }

        let count = store.replace_curated_albums(&albums).await?;
        println!("Imported {count} curated albums from {}.", path.display());
    }

    let counts = AlbumClassifier::new().sync_from(store.as_ref()).await?;
    let total: usize = counts.values().sum();

    println!();
    for (tag, count) in &counts {
        println!("  {:<10} {count}", tag.as_str());
    }
    println!("  {:<10} {total}", "total");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

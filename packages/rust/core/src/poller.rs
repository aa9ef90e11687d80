//! Polling orchestrator: one cycle walks every tracked user, diffs their
//! latest reviews against the stored watermark, and relays what is new.
//!
//! Per user:
//! - no reviews: nothing changes
//! - no watermark yet: seed it with the newest review, send nothing
//! - watermark not in the fetched window: reset to the newest, send nothing
//! - otherwise: enrich, classify, and dispatch everything newer than the
//!   watermark, oldest first, then write the watermark once
//!
//! At most one cycle runs at a time; a trigger that arrives mid-cycle is
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use reviewrelay_crawler::{ReviewSource, is_placeholder_image};
use reviewrelay_metadata::YearLookup;
use reviewrelay_shared::{
    AppConfig, OrgNotificationConfig, Result, ReviewRecord, ReviewRelayError, SourceTag,
    TrackedUser,
};
use reviewrelay_storage::ReviewStore;

use crate::classifier::AlbumClassifier;
use crate::discord::ChannelSink;
use crate::router::{NotificationRouter, OutboundMessage};

// ---------------------------------------------------------------------------
// Settings and reports
// ---------------------------------------------------------------------------

/// Pacing and fallback knobs for a [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Pause between users within a cycle.
    pub user_delay: Duration,
    /// Minimum spacing between year lookups within one backlog.
    pub enrichment_delay: Duration,
    /// Read the album page when the year is still unknown.
    pub album_page_fallback: bool,
}

impl PollerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            user_delay: Duration::from_millis(config.polling.user_delay_ms),
            enrichment_delay: Duration::from_millis(config.polling.enrichment_delay_ms),
            album_page_fallback: config.scraper.album_page_fallback,
        }
    }
}

/// What happened to one user in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    NoReviews,
    Seeded,
    UpToDate,
    Reset,
    Notified {
        reviews: usize,
        sent: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFailure {
    pub username: String,
    pub error: String,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle_id: String,
    pub users_polled: usize,
    pub seeded: usize,
    pub up_to_date: usize,
    pub reset: usize,
    pub empty: usize,
    pub reviews_notified: usize,
    pub messages_sent: usize,
    pub send_failures: usize,
    pub failures: Vec<UserFailure>,
    pub elapsed: Duration,
}

impl CycleReport {
    fn record(&mut self, outcome: &UserOutcome) {
        match outcome {
            UserOutcome::NoReviews => self.empty += 1,
            UserOutcome::Seeded => self.seeded += 1,
            UserOutcome::UpToDate => self.up_to_date += 1,
            UserOutcome::Reset => self.reset += 1,
            UserOutcome::Notified {
                reviews,
                sent,
                failed,
            } => {
                self.reviews_notified += reviews;
                self.messages_sent += sent;
                self.send_failures += failed;
            }
        }
    }
}

/// Result of asking for a cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Skipped,
}

/// Progress callbacks for a running cycle.
pub trait CycleObserver: Send + Sync {
    fn cycle_started(&self, users: usize);
    fn user_started(&self, username: &str, current: usize, total: usize);
    fn user_finished(&self, username: &str, outcome: &Result<UserOutcome>);
    fn cycle_finished(&self, report: &CycleReport);
}

/// No-op observer for the daemon and tests.
pub struct SilentObserver;

impl CycleObserver for SilentObserver {
    fn cycle_started(&self, _users: usize) {}
    fn user_started(&self, _username: &str, _current: usize, _total: usize) {}
    fn user_finished(&self, _username: &str, _outcome: &Result<UserOutcome>) {}
    fn cycle_finished(&self, _report: &CycleReport) {}
}

/// The newest review of a user, fully prepared for sending.
#[derive(Debug, Clone)]
pub struct LatestReview {
    pub review: ReviewRecord,
    pub source: Option<SourceTag>,
    pub message: OutboundMessage,
}

// ---------------------------------------------------------------------------
// Backlog planning
// ---------------------------------------------------------------------------

/// What to do with one fetch, given the stored watermark.
#[derive(Debug, PartialEq)]
pub enum BacklogPlan<'a> {
    Empty,
    Seed { newest: &'a str },
    UpToDate,
    Reset { newest: &'a str },
    /// `items` are oldest first.
    Backlog {
        newest: &'a str,
        items: Vec<&'a ReviewRecord>,
    },
}

/// Diff a newest-first fetch against a watermark.
pub fn plan_backlog<'a>(reviews: &'a [ReviewRecord], watermark: Option<&str>) -> BacklogPlan<'a> {
    let Some(newest) = reviews.first() else {
        return BacklogPlan::Empty;
    };
    let newest_url = newest.review_url.as_str();
    let Some(mark) = watermark else {
        return BacklogPlan::Seed { newest: newest_url };
    };

    match reviews.iter().position(|r| r.review_url == mark) {
        None => BacklogPlan::Reset { newest: newest_url },
        Some(0) => BacklogPlan::UpToDate,
        Some(i) => BacklogPlan::Backlog {
            newest: newest_url,
            items: reviews[..i].iter().rev().collect(),
        },
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    store: Arc<dyn ReviewStore>,
    source: Arc<dyn ReviewSource>,
    years: Option<Arc<dyn YearLookup>>,
    classifier: Arc<AlbumClassifier>,
    router: NotificationRouter,
    sink: Arc<dyn ChannelSink>,
    settings: PollerSettings,
    running: AtomicBool,
}

/// Clears the in-flight flag when dropped, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Spaces consecutive year lookups; the first lookup never waits.
struct LookupPacer {
    spacing: Duration,
    last: Option<Instant>,
}

impl LookupPacer {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: None,
        }
    }

    async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

impl Poller {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        source: Arc<dyn ReviewSource>,
        sink: Arc<dyn ChannelSink>,
        classifier: Arc<AlbumClassifier>,
        router: NotificationRouter,
        settings: PollerSettings,
    ) -> Self {
        Self {
            store,
            source,
            years: None,
            classifier,
            router,
            sink,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Enable release-year enrichment.
    pub fn with_year_lookup(mut self, years: Arc<dyn YearLookup>) -> Self {
        self.years = Some(years);
        self
    }

    pub fn classifier(&self) -> &Arc<AlbumClassifier> {
        &self.classifier
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in flight.
    pub async fn run_cycle(&self, observer: &dyn CycleObserver) -> CycleOutcome {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            info!("cycle already running, trigger dropped");
            return CycleOutcome::Skipped;
        };

        let cycle_id = Uuid::now_v7().to_string();
        let report = self
            .cycle(&cycle_id, observer)
            .instrument(info_span!("cycle", cycle_id = %cycle_id))
            .await;
        CycleOutcome::Completed(report)
    }

    async fn cycle(&self, cycle_id: &str, observer: &dyn CycleObserver) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle_id: cycle_id.to_string(),
            ..CycleReport::default()
        };

        let loaded = match self.store.list_users().await {
            Ok(users) => self.store.list_org_configs().await.map(|orgs| (users, orgs)),
            Err(e) => Err(e),
        };
        let (users, orgs) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "could not load users or organizations");
                report.failures.push(UserFailure {
                    username: "*".into(),
                    error: e.to_string(),
                });
                report.elapsed = started.elapsed();
                observer.cycle_finished(&report);
                return report;
            }
        };

        info!(users = users.len(), orgs = orgs.len(), "cycle started");
        observer.cycle_started(users.len());

        for (i, user) in users.iter().enumerate() {
            observer.user_started(&user.username, i + 1, users.len());

            let outcome = self.poll_user(user, &orgs).await;
            match &outcome {
                Ok(o) => report.record(o),
                Err(e) => {
                    error!(username = %user.username, error = %e, "polling user failed");
                    report.failures.push(UserFailure {
                        username: user.username.clone(),
                        error: e.to_string(),
                    });
                }
            }
            report.users_polled += 1;
            observer.user_finished(&user.username, &outcome);

            if i + 1 < users.len() && !self.settings.user_delay.is_zero() {
                tokio::time::sleep(self.settings.user_delay).await;
            }
        }

        report.elapsed = started.elapsed();
        info!(
            users = report.users_polled,
            seeded = report.seeded,
            reset = report.reset,
            notified = report.reviews_notified,
            sent = report.messages_sent,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "cycle finished"
        );
        observer.cycle_finished(&report);
        report
    }

    #[instrument(skip_all, fields(username = %user.username))]
    async fn poll_user(
        &self,
        user: &TrackedUser,
        orgs: &[OrgNotificationConfig],
    ) -> Result<UserOutcome> {
        let reviews = self.source.recent_reviews(&user.username).await?;

        match plan_backlog(&reviews, user.watermark.as_deref()) {
            BacklogPlan::Empty => {
                debug!("no reviews");
                Ok(UserOutcome::NoReviews)
            }
            BacklogPlan::Seed { newest } => {
                info!(watermark = newest, "first poll, seeding watermark");
                self.store
                    .set_watermark(&user.discord_id, newest, Utc::now())
                    .await?;
                Ok(UserOutcome::Seeded)
            }
            BacklogPlan::UpToDate => {
                debug!("no new reviews");
                if let Some(mark) = user.watermark.as_deref() {
                    self.store
                        .set_watermark(&user.discord_id, mark, Utc::now())
                        .await?;
                }
                Ok(UserOutcome::UpToDate)
            }
            BacklogPlan::Reset { newest } => {
                let mismatch = ReviewRelayError::DataIntegrity(format!(
                    "watermark {} not among the {} fetched reviews",
                    user.watermark.as_deref().unwrap_or_default(),
                    reviews.len()
                ));
                warn!(error = %mismatch, watermark = newest, "resetting watermark without notifying");
                self.store
                    .set_watermark(&user.discord_id, newest, Utc::now())
                    .await?;
                Ok(UserOutcome::Reset)
            }
            BacklogPlan::Backlog { newest, items } => {
                info!(backlog = items.len(), "new reviews found");
                let mut pacer = LookupPacer::new(self.settings.enrichment_delay);
                let mut sent = 0;
                let mut failed = 0;

                for item in &items {
                    let mut review = (*item).clone();
                    self.enrich(&mut review, &mut pacer).await;
                    let source = self
                        .classifier
                        .classify(&review.album_title, &review.artist_name);
                    info!(
                        album = %review.album_title,
                        source = source.as_ref().map(SourceTag::as_str).unwrap_or("unknown"),
                        "dispatching review"
                    );
                    let dispatched = self
                        .router
                        .dispatch(&review, source.as_ref(), orgs, self.sink.as_ref())
                        .await;
                    sent += dispatched.sent;
                    failed += dispatched.failed.len();
                }

                self.store
                    .set_watermark(&user.discord_id, newest, Utc::now())
                    .await?;
                Ok(UserOutcome::Notified {
                    reviews: items.len(),
                    sent,
                    failed,
                })
            }
        }
    }

    /// Fill in the release year (and a missing cover) where possible.
    async fn enrich(&self, review: &mut ReviewRecord, pacer: &mut LookupPacer) {
        if review.release_year.is_some() {
            return;
        }

        if let Some(years) = &self.years {
            pacer.wait().await;
            review.release_year = years
                .resolve_year(&review.artist_name, &review.album_title)
                .await;
        }

        if review.release_year.is_some() || !self.settings.album_page_fallback {
            return;
        }
        let Some(album_url) = review.album_url.clone() else {
            return;
        };

        match self.source.album_details(&album_url).await {
            Ok(details) => {
                review.release_year = details.release_year;
                let needs_cover = review
                    .image_url
                    .as_deref()
                    .is_none_or(is_placeholder_image);
                if needs_cover && details.image_url.is_some() {
                    review.image_url = details.image_url;
                }
            }
            Err(e) => debug!(%album_url, error = %e, "album page unavailable"),
        }
    }

    /// Fetch, enrich, classify, and format a user's newest review without
    /// touching any watermark.
    pub async fn latest(&self, username: &str) -> Result<Option<LatestReview>> {
        let reviews = self.source.recent_reviews(username).await?;
        let Some(mut review) = reviews.into_iter().next() else {
            return Ok(None);
        };

        let mut pacer = LookupPacer::new(self.settings.enrichment_delay);
        self.enrich(&mut review, &mut pacer).await;
        let source = self
            .classifier
            .classify(&review.album_title, &review.artist_name);
        let message = self.router.build_message(&review, source.as_ref());

        Ok(Some(LatestReview {
            review,
            source,
            message,
        }))
    }
}

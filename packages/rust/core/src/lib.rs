//! Review polling engine for ReviewRelay.
//!
//! This crate ties fetching, enrichment, classification, and routing into
//! the polling cycle:
//! - [`classifier`]: curated-list membership with tiered fuzzy matching
//! - [`router`]: per-organization channel resolution and message layout
//! - [`discord`]: the outbound [`ChannelSink`](discord::ChannelSink)
//! - [`poller`]: one cycle over every tracked user
//! - [`scheduler`]: interval and manual triggers

pub mod classifier;
pub mod discord;
pub mod poller;
pub mod router;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use classifier::{AlbumClassifier, AlbumIndex, AlbumMatch, MatchTier, normalize};
pub use discord::{ChannelSink, DiscordSink};
pub use poller::{
    BacklogPlan, CycleObserver, CycleOutcome, CycleReport, LatestReview, Poller, PollerSettings,
    SilentObserver, UserFailure, UserOutcome, plan_backlog,
};
pub use router::{DispatchReport, NotificationRouter, OutboundMessage, format_stars};
pub use scheduler::{Scheduler, TriggerHandle};

//! Outbound channel sink and its Discord REST implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use reviewrelay_shared::{DiscordConfig, Result, ReviewRelayError};

use crate::router::OutboundMessage;

/// User-Agent string for Discord API requests.
const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/reviewrelay/reviewrelay, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Something that delivers a formatted message to a channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, channel_id: &str, message: &OutboundMessage) -> Result<()>;
}

/// Posts embeds through the Discord REST API as a bot user.
pub struct DiscordSink {
    client: Client,
    api_base: String,
    token: String,
}

impl DiscordSink {
    pub fn new(config: &DiscordConfig, token: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ReviewRelayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl ChannelSink for DiscordSink {
    #[instrument(skip_all, fields(channel = %channel_id))]
    async fn send(&self, channel_id: &str, message: &OutboundMessage) -> Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(message)
            .send()
            .await
            .map_err(|e| ReviewRelayError::send(channel_id, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReviewRelayError::RateLimited(format!(
                "discord channel {channel_id}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewRelayError::send(channel_id, format!("HTTP {status}: {body}")));
        }

        debug!("message posted");
        Ok(())
    }
}

//! HTTP media player clients
//!
//! Video and audio playback run as separate HTTP services; each command is
//! a POST to `<base_url>/play` with the serialized command as JSON body.
//! One reqwest client is built at startup and reused for connection pooling.

use crate::domain::action::{AudioPlayCommand, VideoPlayCommand};
use crate::infra::config::Config;
use crate::services::dispatcher::MediaPlayer;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Media player backed by the external video/audio HTTP services
pub struct HttpPlayers {
    client: reqwest::Client,
    video_url: String,
    audio_url: String,
}

impl HttpPlayers {
    pub fn new(config: &Config) -> Result<Self> {
        let timeout = Duration::from_millis(config.player_timeout_ms());

        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("Failed to build player HTTP client")?;

        Ok(Self {
            client,
            video_url: config.video_url().trim_end_matches('/').to_string(),
            audio_url: config.audio_url().trim_end_matches('/').to_string(),
        })
    }

    async fn post_play<T: Serialize>(&self, base_url: &str, command: &T) -> Result<()> {
        let url = format!("{}/play", base_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(command)
            .send()
            .await
            .with_context(|| format!("player request to {} failed", url))?;

        let latency_us = start.elapsed().as_micros() as u64;
        let status = response.status();
        info!(url = %url, status = %status.as_u16(), latency_us = %latency_us, "player_command_sent");

        if !status.is_success() {
            bail!("player at {} returned {}", url, status);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaPlayer for HttpPlayers {
    async fn play_video(&self, cmd: VideoPlayCommand) -> Result<()> {
        self.post_play(&self.video_url, &cmd).await
    }

    async fn play_audio(&self, cmd: AudioPlayCommand) -> Result<()> {
        self.post_play(&self.audio_url, &cmd).await
    }
}

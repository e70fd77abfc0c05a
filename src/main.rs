//! Roomcast - occupancy-driven media controller
//!
//! Fuses per-camera occupancy telemetry into one official count and turns
//! camera events into media playback through a rule registry.
//!
//! Module structure:
//! - `domain/` - Core types (sensor messages, actions)
//! - `io/` - External interfaces (MQTT, players, HTTP API)
//! - `services/` - Business logic (Counter, RuleBook, Dispatcher, Pipeline)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use roomcast::infra::{Config, Metrics};
use roomcast::io::{create_egress_channel, HttpPlayers, MqttPublisher};
use roomcast::services::{ActionDispatcher, OccupancyCounter, Pipeline, RuleBook};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Roomcast - occupancy telemetry fusion and media action controller
#[derive(Parser, Debug)]
#[command(name = "roomcast", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full message visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "roomcast starting");

    let args = Args::parse();

    // Bad config is fatal: fusing counts with a nonsense quorum or staleness
    // window would be worse than not starting.
    let config = Config::from_file(&args.config)?;

    // Start embedded MQTT broker for standalone deployments
    if config.broker_enabled() {
        roomcast::infra::broker::start_embedded_broker(&config);
    }

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        state_topic = %config.mqtt_state_topic(),
        event_topic = %config.mqtt_event_topic(),
        quorum = %config.quorum(),
        stale_after_ms = %config.stale_after_ms(),
        video_url = %config.video_url(),
        audio_url = %config.audio_url(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Shared processing components
    let players = Arc::new(HttpPlayers::new(&config)?);
    let dispatcher =
        Arc::new(ActionDispatcher::new(players, egress_sender.clone(), metrics.clone()));
    let counter = Arc::new(OccupancyCounter::new(config.quorum(), config.stale_after_ms()));
    let rules = Arc::new(RuleBook::with_defaults());
    let pipeline = Arc::new(Pipeline::new(
        counter,
        rules,
        dispatcher.clone(),
        egress_sender,
        metrics.clone(),
    ));

    // Start the dispatcher drain task
    let dispatcher_shutdown = shutdown_rx.clone();
    tokio::spawn(dispatcher.run(dispatcher_shutdown));

    // Create message channel (bounded for backpressure)
    let (msg_tx, msg_rx) = mpsc::channel(1000);

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            roomcast::io::mqtt::start_mqtt_client(&mqtt_config, msg_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start management API HTTP server (if port > 0)
    let api_port = config.api_port();
    if api_port > 0 {
        let api_pipeline = pipeline.clone();
        let api_site = config.site_id().to_string();
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                roomcast::io::http::start_api_server(api_port, api_pipeline, api_site, api_shutdown)
                    .await
            {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.summary().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the pipeline - consumes messages until shutdown
    pipeline.run(msg_rx, shutdown_rx).await;

    info!("roomcast shutdown complete");
    Ok(())
}

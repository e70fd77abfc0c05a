//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/dev.toml). Invalid values are fatal at startup:
//! a controller running with a nonsense quorum or staleness window
//! would silently fuse garbage.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    #[serde(default = "default_event_topic")]
    pub event_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_state_topic() -> String {
    "sensor/+/state".to_string()
}

fn default_event_topic() -> String {
    "sensor/+/event".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Minimum active sensors before majority voting kicks in
    #[serde(default = "default_quorum")]
    pub quorum: usize,
    /// Sensor readings older than this are evicted (ms)
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

fn default_quorum() -> usize {
    3
}

fn default_stale_after_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayersConfig {
    /// Base URL of the video player service
    pub video_url: String,
    /// Base URL of the audio player service
    pub audio_url: String,
    #[serde(default = "default_player_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_player_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run the embedded MQTT broker (for standalone deployments)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Management API + metrics HTTP port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Interval for the periodic metrics summary log (seconds)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for CUSTOM action payloads (QoS 1)
    #[serde(default = "default_custom_topic")]
    pub custom_topic: String,
    /// Topic for occupancy changes (QoS 0)
    #[serde(default = "default_occupancy_topic")]
    pub occupancy_topic: String,
    /// Topic for dispatch outcomes (QoS 0)
    #[serde(default = "default_outcomes_topic")]
    pub outcomes_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            custom_topic: default_custom_topic(),
            occupancy_topic: default_occupancy_topic(),
            outcomes_topic: default_outcomes_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_custom_topic() -> String {
    "roomcast/custom".to_string()
}

fn default_occupancy_topic() -> String {
    "roomcast/occupancy".to_string()
}

fn default_outcomes_topic() -> String {
    "roomcast/outcomes".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "showroom-tokyo")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "roomcast".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    pub players: PlayersConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_state_topic: String,
    mqtt_event_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    quorum: usize,
    stale_after_ms: u64,
    video_url: String,
    audio_url: String,
    player_timeout_ms: u64,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    api_port: u16,
    metrics_interval_secs: u64,
    mqtt_egress_enabled: bool,
    mqtt_egress_custom_topic: String,
    mqtt_egress_occupancy_topic: String,
    mqtt_egress_outcomes_topic: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "roomcast".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_state_topic: default_state_topic(),
            mqtt_event_topic: default_event_topic(),
            mqtt_username: None,
            mqtt_password: None,
            quorum: 3,
            stale_after_ms: 30_000,
            video_url: "http://localhost:9001".to_string(),
            audio_url: "http://localhost:9002".to_string(),
            player_timeout_ms: 2000,
            broker_enabled: false,
            broker_bind_address: "0.0.0.0".to_string(),
            broker_port: 1883,
            api_port: 8080,
            metrics_interval_secs: 10,
            mqtt_egress_enabled: true,
            mqtt_egress_custom_topic: default_custom_topic(),
            mqtt_egress_occupancy_topic: default_occupancy_topic(),
            mqtt_egress_outcomes_topic: default_outcomes_topic(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Invalid values are an error,
    /// not a fallback.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_state_topic: toml_config.mqtt.state_topic,
            mqtt_event_topic: toml_config.mqtt.event_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            quorum: toml_config.fusion.quorum,
            stale_after_ms: toml_config.fusion.stale_after_ms,
            video_url: toml_config.players.video_url,
            audio_url: toml_config.players.audio_url,
            player_timeout_ms: toml_config.players.timeout_ms,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_custom_topic: toml_config.mqtt_egress.custom_topic,
            mqtt_egress_occupancy_topic: toml_config.mqtt_egress.occupancy_topic,
            mqtt_egress_outcomes_topic: toml_config.mqtt_egress.outcomes_topic,
            config_file: path.display().to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the fusion algorithm cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quorum < 1 {
            bail!("fusion.quorum must be at least 1 (got {})", self.quorum);
        }
        if self.stale_after_ms == 0 {
            bail!("fusion.stale_after_ms must be positive");
        }
        if self.player_timeout_ms == 0 {
            bail!("players.timeout_ms must be positive");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_state_topic(&self) -> &str {
        &self.mqtt_state_topic
    }

    pub fn mqtt_event_topic(&self) -> &str {
        &self.mqtt_event_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn stale_after_ms(&self) -> u64 {
        self.stale_after_ms
    }

    pub fn video_url(&self) -> &str {
        &self.video_url
    }

    pub fn audio_url(&self) -> &str {
        &self.audio_url
    }

    pub fn player_timeout_ms(&self) -> u64 {
        self.player_timeout_ms
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_custom_topic(&self) -> &str {
        &self.mqtt_egress_custom_topic
    }

    pub fn mqtt_egress_occupancy_topic(&self) -> &str {
        &self.mqtt_egress_occupancy_topic
    }

    pub fn mqtt_egress_outcomes_topic(&self) -> &str {
        &self.mqtt_egress_outcomes_topic
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

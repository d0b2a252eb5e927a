use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Queue engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// State backend configuration
    pub state: StateConfig,

    /// Scheduler backend configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Relays hosted by the daemon, one message service each
    #[serde(default)]
    pub relays: Vec<RelayConfig>,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: MQE_)
            .add_source(
                config::Environment::with_prefix("MQE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Look up a relay by name
    pub fn relay(&self, name: &str) -> Option<&RelayConfig> {
        self.relays.iter().find(|relay| relay.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Periodic tick for every pipeline (seconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Delay of the one-shot run scheduled after an enqueue (seconds)
    #[serde(default = "default_trigger_delay")]
    pub trigger_delay_secs: u64,

    /// Outbound checkpoint cadence (milliseconds)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_ms: u64,

    /// Rows per insert for batch receivers
    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    /// Quiet period after which an idle status is re-reported (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Age after which an unconfirmed intake row counts as abandoned (seconds)
    #[serde(default = "default_intermediate_grace")]
    pub intermediate_grace_secs: u64,

    /// What to do with abandoned intake rows
    #[serde(default)]
    pub abandoned_intake_policy: AbandonedIntakePolicy,

    /// Largest serialized payload accepted by enqueue
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            trigger_delay_secs: default_trigger_delay(),
            checkpoint_interval_ms: default_checkpoint_interval(),
            receive_batch_size: default_receive_batch_size(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            intermediate_grace_secs: default_intermediate_grace(),
            abandoned_intake_policy: AbandonedIntakePolicy::default(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            trigger_delay: Duration::from_secs(self.trigger_delay_secs),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms),
            receive_batch_size: self.receive_batch_size.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            intermediate_grace: Duration::from_secs(self.intermediate_grace_secs),
            abandoned_intake_policy: self.abandoned_intake_policy,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

/// Reconciliation applied to `IntermediateAdded` rows left behind by a crash
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbandonedIntakePolicy {
    /// Delete the row and rely on the source to redeliver
    Discard,
    /// Keep the row and make it eligible for handlers
    #[default]
    Promote,
}

/// Engine timings as used at runtime
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub trigger_delay: Duration,
    pub checkpoint_interval: Duration,
    pub receive_batch_size: usize,
    pub heartbeat_interval: Duration,
    pub intermediate_grace: Duration,
    pub abandoned_intake_policy: AbandonedIntakePolicy,
    pub max_payload_bytes: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineConfig::default().settings()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for embedded database (sled)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub backend: SchedulerBackend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// tokio-cron-scheduler job scheduler
    #[default]
    Cron,
    /// Plain tokio timers
    Tokio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay name; also the declared message type name of its queue
    pub name: String,

    /// Endpoint receiving outbound messages
    pub outbound_webhook: Option<String>,

    /// Endpoint handling inbound messages
    pub inbound_webhook: Option<String>,

    /// Webhook timeout (seconds)
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_tick_interval() -> u64 {
    60
}

fn default_trigger_delay() -> u64 {
    5
}

fn default_checkpoint_interval() -> u64 {
    3000
}

fn default_receive_batch_size() -> usize {
    50
}

fn default_heartbeat_interval() -> u64 {
    3600
}

fn default_intermediate_grace() -> u64 {
    600
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.tick_interval_secs, 60);
        assert_eq!(config.engine.receive_batch_size, 50);
        assert_eq!(config.state.backend, StateBackend::Sled);
        assert_eq!(config.scheduler.backend, SchedulerBackend::Cron);
        assert_eq!(config.server.port, 8080);
        assert!(config.relay("audit").is_some());
    }

    #[test]
    fn test_engine_settings_projection() {
        let settings = EngineConfig {
            checkpoint_interval_ms: 250,
            receive_batch_size: 0,
            abandoned_intake_policy: AbandonedIntakePolicy::Discard,
            ..Default::default()
        }
        .settings();

        assert_eq!(settings.checkpoint_interval, Duration::from_millis(250));
        assert_eq!(settings.receive_batch_size, 1);
        assert_eq!(settings.trigger_delay, Duration::from_secs(5));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(3600));
        assert_eq!(settings.abandoned_intake_policy, AbandonedIntakePolicy::Discard);
    }

    #[test]
    fn test_zero_tick_interval_is_raised_to_one_second() {
        let settings = EngineConfig {
            tick_interval_secs: 0,
            ..Default::default()
        }
        .settings();

        assert_eq!(settings.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_policy_names() {
        let policy: AbandonedIntakePolicy = serde_json::from_str("\"discard\"").unwrap();
        assert_eq!(policy, AbandonedIntakePolicy::Discard);
        assert_eq!(AbandonedIntakePolicy::default(), AbandonedIntakePolicy::Promote);
    }
}

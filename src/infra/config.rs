//! Configuration loading from TOML files
//!
//! The binaries select the file with clap: `--config <path>`, else the
//! CONFIG_FILE environment variable, else `config/dev.toml`.

use crate::services::publisher::{FailurePolicy, PublisherSettings};
use anyhow::Context;
use rumqttc::QoS;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_client_id() -> String {
    "route-simulator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run an embedded rumqttd broker in-process
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
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

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Topic carrying route requests
    #[serde(default = "default_input_topic")]
    pub input_topic: String,
    /// Topic receiving position events
    #[serde(default = "default_output_topic")]
    pub output_topic: String,
    /// Delay after each publish (milliseconds)
    #[serde(default = "default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Extra attempts per position after a failed publish (0 = best effort)
    #[serde(default)]
    pub publish_retries: u32,
    /// Directory holding `<route_id>.txt` files
    #[serde(default = "default_destinations_dir")]
    pub destinations_dir: String,
    /// MQTT QoS for position events (0 or 1)
    #[serde(default)]
    pub qos: u8,
}

fn default_input_topic() -> String {
    "route.new-direction".to_string()
}

fn default_output_topic() -> String {
    "route.new-position".to_string()
}

fn default_pacing_interval_ms() -> u64 {
    500
}

fn default_destinations_dir() -> String {
    "destinations".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            pacing_interval_ms: default_pacing_interval_ms(),
            failure_policy: FailurePolicy::default(),
            publish_retries: 0,
            destinations_dir: default_destinations_dir(),
            qos: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    input_topic: String,
    output_topic: String,
    pacing_interval_ms: u64,
    failure_policy: FailurePolicy,
    publish_retries: u32,
    destinations_dir: String,
    qos: u8,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            broker_enabled: false,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            pacing_interval_ms: default_pacing_interval_ms(),
            failure_policy: FailurePolicy::default(),
            publish_retries: 0,
            destinations_dir: default_destinations_dir(),
            qos: 0,
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.simulator.qos > 1 {
            anyhow::bail!(
                "Unsupported simulator.qos {} in {} (expected 0 or 1)",
                toml_config.simulator.qos,
                path.display()
            );
        }

        Ok(Self {
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            input_topic: toml_config.simulator.input_topic,
            output_topic: toml_config.simulator.output_topic,
            pacing_interval_ms: toml_config.simulator.pacing_interval_ms,
            failure_policy: toml_config.simulator.failure_policy,
            publish_retries: toml_config.simulator.publish_retries,
            destinations_dir: toml_config.simulator.destinations_dir,
            qos: toml_config.simulator.qos,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Settings for the position stream publisher
    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            output_topic: self.output_topic.clone(),
            pacing_interval: Duration::from_millis(self.pacing_interval_ms),
            failure_policy: self.failure_policy,
            publish_retries: self.publish_retries,
        }
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
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

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    pub fn pacing_interval_ms(&self) -> u64 {
        self.pacing_interval_ms
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn publish_retries(&self) -> u32 {
        self.publish_retries
    }

    pub fn destinations_dir(&self) -> &str {
        &self.destinations_dir
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.input_topic(), "route.new-direction");
        assert_eq!(config.output_topic(), "route.new-position");
        assert_eq!(config.pacing_interval_ms(), 500);
        assert_eq!(config.failure_policy(), FailurePolicy::ContinueOnFailure);
        assert_eq!(config.publish_retries(), 0);
        assert_eq!(config.qos(), QoS::AtMostOnce);
        assert!(!config.broker_enabled());
    }

    #[test]
    fn test_publisher_settings() {
        let settings = Config::default().publisher_settings();
        assert_eq!(settings.output_topic, "route.new-position");
        assert_eq!(settings.pacing_interval, Duration::from_millis(500));
        assert_eq!(settings.failure_policy, FailurePolicy::ContinueOnFailure);
    }

    #[test]
    fn test_simulator_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[mqtt]
host = "broker"
port = 1884
"#,
        )
        .unwrap();
        assert_eq!(toml_config.simulator.pacing_interval_ms, 500);
        assert_eq!(toml_config.simulator.destinations_dir, "destinations");
        assert_eq!(toml_config.mqtt.client_id, "route-simulator");
        assert_eq!(toml_config.metrics.interval_secs, 10);
    }
}

//! Bus configuration

use serde::{Deserialize, Serialize};

/// Bus transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    /// In-process broker (tests and single-process demos)
    Memory,
    /// MQTT broker
    Mqtt(MqttConfig),
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::Mqtt(MqttConfig::default())
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client identifier (random when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Time to wait for the broker's CONNACK in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            username: None,
            password: None,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        let config: BusConfig = toml::from_str("type = \"memory\"").unwrap();
        assert!(matches!(config, BusConfig::Memory));
    }

    #[test]
    fn test_parse_mqtt_defaults() {
        let config: BusConfig = toml::from_str(
            r#"
            type = "mqtt"
            host = "broker.local"
            "#,
        )
        .unwrap();

        match config {
            BusConfig::Mqtt(mqtt) => {
                assert_eq!(mqtt.host, "broker.local");
                assert_eq!(mqtt.port, 1883);
                assert_eq!(mqtt.keep_alive_secs, 30);
                assert!(mqtt.client_id.is_none());
            }
            other => panic!("Expected mqtt, got {:?}", other),
        }
    }
}

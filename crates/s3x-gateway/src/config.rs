//! Gateway configuration
//!
//! Loaded from TOML (or YAML for `.yaml`/`.yml` files). Every section and
//! field has a default, so an empty file is a valid mock gateway.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use s3x_bus::BusConfig;
use s3x_core::{topic, GatewayError, GatewayResult, PinNumber};
use s3x_device::DeviceConfig;

use crate::vocabulary::VocabularyConfig;

/// Complete configuration for one gateway process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl GatewayConfig {
    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::Config(format!("Invalid YAML in {}: {}", path.display(), e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                GatewayError::Config(format!("Invalid TOML in {}: {}", path.display(), e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> GatewayResult<()> {
        let device_id = self.device.device_id();
        if device_id.is_empty() || device_id.contains(['/', '+', '#']) {
            return Err(GatewayError::Config(format!(
                "Invalid device id '{}'",
                device_id
            )));
        }
        topic::validate_pattern(&self.topics.command_topic(&device_id))
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        if !self.topics.event.contains("{pin}") {
            return Err(GatewayError::Config(
                "Event topic template must contain {pin}".to_string(),
            ));
        }
        if self.supervisor.backoff.multiplier < 1.0 {
            return Err(GatewayError::Config(
                "Backoff multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Topics
// =============================================================================

/// Topic templates; `{device}` and `{pin}` are substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Inbound command topic
    #[serde(default = "default_command_topic")]
    pub command: String,
    /// Outbound telemetry topic
    #[serde(default = "default_event_topic")]
    pub event: String,
    /// Outbound gateway status topic
    #[serde(default = "default_status_topic")]
    pub status: String,
}

fn default_command_topic() -> String {
    "to_{device}_gateway".to_string()
}

fn default_event_topic() -> String {
    "from_{device}_gateway/{pin}".to_string()
}

fn default_status_topic() -> String {
    "from_{device}_gateway".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            command: default_command_topic(),
            event: default_event_topic(),
            status: default_status_topic(),
        }
    }
}

impl TopicConfig {
    pub fn command_topic(&self, device_id: &str) -> String {
        topic::render(&self.command, device_id, None)
    }

    pub fn event_topic(&self, device_id: &str, pin: PinNumber) -> String {
        topic::render(&self.event, device_id, Some(pin))
    }

    pub fn status_topic(&self, device_id: &str) -> String {
        topic::render(&self.status, device_id, None)
    }
}

// =============================================================================
// Telemetry
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Coalescing window for analog readings in milliseconds (0 disables)
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,
}

fn default_coalesce_window() -> u64 {
    50
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window(),
        }
    }
}

impl TelemetryConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry `n` (0-based): `min(initial * multiplier^n, max)`
    pub fn delay(&self, n: u32) -> Duration {
        let exponent = n.min(i32::MAX as u32) as i32;
        let millis = self.initial_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Consecutive failed connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Device liveness check interval in milliseconds (0 disables)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,
    /// Consecutive failed publishes before the bus counts as lost (0 never)
    #[serde(default = "default_bus_failure_threshold")]
    pub bus_failure_threshold: u32,
    /// Upper bound for flushing telemetry on shutdown, in milliseconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_health_check_interval() -> u64 {
    1000
}

fn default_bus_failure_threshold() -> u32 {
    5
}

fn default_drain_timeout() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_retries: default_max_retries(),
            health_check_interval_ms: default_health_check_interval(),
            bus_failure_threshold: default_bus_failure_threshold(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

pub mod preferences;
pub use preferences::{new_shared_preferences, DisplayPreferences, PreferenceStore, SharedPreferences};

use anyhow::{Context, Result};
use serde::Deserialize;

// Re-export existing config types
pub use crate::channel::ChannelConfig;

/// Complete configuration for both client roles
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertConfig {
    #[serde(default)]
    pub kiosk: KioskConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Kiosk (bus-stop device) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KioskConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// One-shot HTTP endpoint used when the channel is not Open
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,
    #[serde(default = "default_kiosk_channel")]
    pub channel: ChannelConfig,
}

fn default_device_id() -> String {
    "songkok_busstop_450".to_string()
}

fn default_device_name() -> String {
    "Songkok Stop".to_string()
}

fn default_fallback_url() -> String {
    "http://localhost:8001/emergency".to_string()
}

fn default_kiosk_channel() -> ChannelConfig {
    ChannelConfig::new("ws://localhost:8001/ws")
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            device_name: default_device_name(),
            fallback_url: default_fallback_url(),
            channel: default_kiosk_channel(),
        }
    }
}

/// Operator dashboard configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_stops_url")]
    pub stops_url: String,
    /// Marker "simulate emergency" endpoint; the stop id is appended
    #[serde(default = "default_simulate_url")]
    pub simulate_url: String,
    /// Maximum live-stack length
    #[serde(default = "default_stack_capacity")]
    pub stack_capacity: usize,
    /// How long the "emergency active" pulse stays on
    #[serde(default = "default_pulse_duration_ms")]
    pub pulse_duration_ms: u64,
    /// Map zoom level used when centering on an incident
    #[serde(default = "default_focus_zoom")]
    pub focus_zoom: u8,
    #[serde(default = "default_preferences_path")]
    pub preferences_path: String,
    #[serde(default = "default_dashboard_channel")]
    pub channel: ChannelConfig,
    /// Kiosk admin endpoints for live links, by stop
    #[serde(default)]
    pub device_links: Vec<DeviceLinkConfig>,
}

fn default_stops_url() -> String {
    "http://localhost:8000/api/bus-stops".to_string()
}

fn default_simulate_url() -> String {
    "http://localhost:8000/api/simulate-emergency".to_string()
}

fn default_stack_capacity() -> usize {
    10
}

fn default_pulse_duration_ms() -> u64 {
    2000
}

fn default_focus_zoom() -> u8 {
    3
}

fn default_preferences_path() -> String {
    "dashboard-preferences.json".to_string()
}

fn default_dashboard_channel() -> ChannelConfig {
    ChannelConfig::new("ws://localhost:8000/ws/emergency")
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            stops_url: default_stops_url(),
            simulate_url: default_simulate_url(),
            stack_capacity: default_stack_capacity(),
            pulse_duration_ms: default_pulse_duration_ms(),
            focus_zoom: default_focus_zoom(),
            preferences_path: default_preferences_path(),
            channel: default_dashboard_channel(),
            device_links: Vec::new(),
        }
    }
}

impl DashboardConfig {
    pub fn device_link(&self, stop_id: u64) -> Option<&DeviceLinkConfig> {
        self.device_links.iter().find(|link| link.stop_id == stop_id)
    }
}

/// Admin endpoint of the kiosk installed at a stop
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeviceLinkConfig {
    pub stop_id: u64,
    pub admin_url: String,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AlertConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: AlertConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AlertConfig::default();
        assert_eq!(config.kiosk.device_id, "songkok_busstop_450");
        assert_eq!(config.kiosk.channel.retry_delay_ms, 3000);
        assert_eq!(config.kiosk.channel.liveness_interval_ms, 5000);
        assert_eq!(config.kiosk.channel.handshake_timeout_ms, 10000);
        assert_eq!(config.dashboard.stack_capacity, 10);
        assert_eq!(config.dashboard.pulse_duration_ms, 2000);
        assert!(config.dashboard.device_links.is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [kiosk]
            device_id = "goheung_terminal_001"
            device_name = "Goheung Terminal"
            fallback_url = "http://kiosk.local/emergency"

            [kiosk.channel]
            url = "ws://kiosk.local/ws"
            retry_delay_ms = 5000

            [dashboard]
            stack_capacity = 5
            focus_zoom = 4

            [dashboard.channel]
            url = "ws://relay.local/ws/emergency"
            liveness_interval_ms = 10000
            handshake_timeout_ms = 3000

            [[dashboard.device_links]]
            stop_id = 450
            admin_url = "ws://kiosk.local/ws/admin"
        "#;

        let config: AlertConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.kiosk.device_name, "Goheung Terminal");
        assert_eq!(config.kiosk.channel.url, "ws://kiosk.local/ws");
        assert_eq!(config.kiosk.channel.retry_delay_ms, 5000);
        assert_eq!(config.kiosk.channel.liveness_interval_ms, 5000); // Default
        assert_eq!(config.dashboard.stack_capacity, 5);
        assert_eq!(config.dashboard.channel.liveness_interval_ms, 10000);
        assert_eq!(config.dashboard.channel.handshake_timeout_ms, 3000);
        assert_eq!(
            config.dashboard.device_link(450).map(|l| l.admin_url.as_str()),
            Some("ws://kiosk.local/ws/admin")
        );
        assert!(config.dashboard.device_link(1).is_none());
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [dashboard]
            pulse_duration_ms = 1500
        "#;

        let config: AlertConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.dashboard.pulse_duration_ms, 1500);
        assert_eq!(config.dashboard.stack_capacity, 10); // Default
        assert_eq!(config.kiosk.fallback_url, "http://localhost:8001/emergency"); // Default
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/alert.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/alert.toml"));
    }
}

//! Configuration loading for the MG400 driver

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use crate::{Mg400Error, Result};

pub const DASHBOARD_PORT: u16 = 29999;
pub const MOTION_PORT: u16 = 30003;
pub const REALTIME_PORT: u16 = 30004;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub robot: RobotConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub error_messages: Option<String>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotConfig {
    pub ip_address: String,
    #[serde(default)]
    pub ports: PortConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub dashboard: u16,
    pub motion: u16,
    pub realtime: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            dashboard: DASHBOARD_PORT,
            motion: MOTION_PORT,
            realtime: REALTIME_PORT,
        }
    }
}

/// Socket timing and retry policy shared by the three channels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub realtime_recv_timeout_ms: u64,
    /// Consecutive realtime failures tolerated before the channel goes fatal.
    pub realtime_trials: u32,
    pub retry_delay_ms: u64,
    pub monitor_period_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            reply_timeout_ms: 500,
            realtime_recv_timeout_ms: 5000,
            realtime_trials: 3,
            retry_delay_ms: 1000,
            monitor_period_ms: 1000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn realtime_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.realtime_recv_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn monitor_period(&self) -> Duration {
        Duration::from_millis(self.monitor_period_ms)
    }
}

/// Poll cadence used by the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub joint_state_ms: u64,
    pub robot_mode_ms: u64,
    pub error_check_ms: u64,
    pub interface_check_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            joint_state_ms: 10,
            robot_mode_ms: 100,
            error_check_ms: 500,
            interface_check_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub decimal_places: u32,
    pub dynamic: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            decimal_places: 4,
            dynamic: true,
        }
    }
}

impl Config {
    /// Configuration for `ip_address` with every other section defaulted.
    pub fn for_ip(ip_address: &str) -> Self {
        Self {
            robot: RobotConfig {
                ip_address: ip_address.to_string(),
                ports: PortConfig::default(),
            },
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
            error_messages: None,
            monitoring: MonitoringConfig::default(),
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Mg400Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        if config.robot.ip_address.trim().is_empty() {
            return Err(Mg400Error::Config("robot.ip_address must not be empty".to_string()));
        }
        if config.connection.realtime_trials == 0 {
            return Err(Mg400Error::Config("connection.realtime_trials must be at least 1".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("robot:\n  ip_address: 10.0.0.7\n").unwrap();

        assert_eq!(config.robot.ip_address, "10.0.0.7");
        assert_eq!(config.robot.ports.dashboard, 29999);
        assert_eq!(config.robot.ports.motion, 30003);
        assert_eq!(config.robot.ports.realtime, 30004);
        assert_eq!(config.connection.realtime_trials, 3);
        assert_eq!(config.connection.realtime_recv_timeout(), Duration::from_secs(5));
        assert_eq!(config.polling.joint_state_ms, 10);
        assert!(config.error_messages.is_none());
    }

    #[test]
    fn test_partial_section_override() {
        let yaml = r#"
robot:
  ip_address: 192.168.1.6
  ports:
    dashboard: 40000
connection:
  realtime_trials: 7
error_messages: config/error_messages.json
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.robot.ports.dashboard, 40000);
        assert_eq!(config.robot.ports.realtime, 30004);
        assert_eq!(config.connection.realtime_trials, 7);
        assert_eq!(config.connection.connect_timeout_ms, 1000);
        assert_eq!(config.error_messages.as_deref(), Some("config/error_messages.json"));
    }

    #[test]
    fn test_rejects_zero_trials() {
        let yaml = "robot:\n  ip_address: 1.2.3.4\nconnection:\n  realtime_trials: 0\n";
        assert!(matches!(Config::from_yaml(yaml), Err(Mg400Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from_path("/nonexistent/mg400.yaml").unwrap_err();
        assert!(matches!(err, Mg400Error::Config(_)));
    }

    #[test]
    fn test_shipped_config_loads() {
        let config = Config::load_from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default_config.yaml")).unwrap();
        assert_eq!(config.robot.ip_address, "192.168.1.6");
        assert_eq!(config.polling.interface_check_ms, 100);
        assert!(config.monitoring.dynamic);
    }
}

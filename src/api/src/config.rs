//! Configuration for the BetTracker API.

use anyhow::anyhow;
use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::merge::FailurePolicy;
use crate::scheduler::WeeklySchedule;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Apply `serve --host/--port`; flags that were not given keep the loaded value
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(h) = host {
            self.host = h;
        }
        if let Some(p) = port {
            self.port = p;
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "data/bettracker.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Horse merge job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Run the weekly merge inside `serve`
    #[serde(default = "default_schedule_enabled")]
    pub schedule_enabled: bool,
    /// Day of week in UTC (e.g. "sunday", "sun")
    #[serde(default = "default_weekday")]
    pub weekday: String,
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

fn default_schedule_enabled() -> bool {
    true
}

fn default_weekday() -> String {
    "sunday".to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            schedule_enabled: default_schedule_enabled(),
            weekday: default_weekday(),
            hour: 0,
            minute: 0,
        }
    }
}

impl MergeConfig {
    /// Parse the configured weekly slot
    pub fn schedule(&self) -> anyhow::Result<WeeklySchedule> {
        let weekday: Weekday = self
            .weekday
            .parse()
            .map_err(|e| anyhow!("invalid merge weekday {:?}: {:?}", self.weekday, e))?;
        WeeklySchedule::new(weekday, self.hour, self.minute)
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (BETTRACKER_SERVER__PORT, etc.)
            .add_source(
                config::Environment::with_prefix("BETTRACKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "data/bettracker.db");
        assert_eq!(config.merge.failure_policy, FailurePolicy::FailFast);
        assert!(config.merge.schedule_enabled);
    }

    #[test]
    fn test_default_schedule_is_sunday_midnight() {
        let schedule = MergeConfig::default().schedule().unwrap();
        assert_eq!(schedule, WeeklySchedule::new(Weekday::Sun, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_weekday_is_rejected() {
        let merge = MergeConfig {
            weekday: "someday".to_string(),
            ..Default::default()
        };
        assert!(merge.schedule().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "merge": { "failure_policy": "skip_and_continue", "hour": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.merge.failure_policy, FailurePolicy::SkipAndContinue);
        assert_eq!(config.merge.hour, 3);
        assert_eq!(config.merge.weekday, "sunday");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_server_overrides_keep_config_when_absent() {
        let mut server: ServerConfig =
            serde_json::from_str(r#"{ "host": "10.0.0.5", "port": 9100 }"#).unwrap();

        server.apply_overrides(None, None);
        assert_eq!(server.host, "10.0.0.5");
        assert_eq!(server.port, 9100);

        server.apply_overrides(None, Some(9000));
        assert_eq!(server.host, "10.0.0.5");
        assert_eq!(server.port, 9000);

        server.apply_overrides(Some("127.0.0.1".to_string()), None);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 9000);
    }
}

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::management::variant::DEFAULT_BRANCHES_URL;
use crate::management::OrchestratorSettings;
use crate::storage::file::{Config, FileIoWithBackup};

const CONFIG_FILE: &str = "config.json";

/// immutable through full lifetime of app, unless restart app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Instance records and the servers order live here.
    pub data_dir: PathBuf,
    pub servers_dir: PathBuf,
    pub steamcmd_path: PathBuf,
    pub branches_url: String,
    pub version_interval_secs: u64,
    pub query_interval_secs: u64,
    pub crash_restart_delay_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            servers_dir: PathBuf::from("servers"),
            steamcmd_path: PathBuf::from(if cfg!(windows) {
                "bin/steamcmd/steamcmd.exe"
            } else {
                "bin/steamcmd/steamcmd.sh"
            }),
            branches_url: DEFAULT_BRANCHES_URL.to_owned(),
            version_interval_secs: 300,
            query_interval_secs: 10,
            crash_restart_delay_secs: 5,
        }
    }
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    fn load() -> AppConfig {
        Self::load_config_or_default(CONFIG_FILE, Self::default).unwrap_or_else(|err| {
            warn!("{} unusable, running with defaults: {:#}", CONFIG_FILE, err);
            Self::default()
        })
    }

    pub fn get() -> &'static AppConfig {
        &APP_CONFIG
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            version_interval: Duration::from_secs(self.version_interval_secs.max(1)),
            query_interval: Duration::from_secs(self.query_interval_secs.max(1)),
            crash_restart_delay: Duration::from_secs(self.crash_restart_delay_secs),
            servers_dir: self.servers_dir.clone(),
        }
    }
}

static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "query_interval_secs": 30, "servers_dir": "D:/gsm" }"#)
                .unwrap();
        assert_eq!(config.query_interval_secs, 30);
        assert_eq!(config.servers_dir, PathBuf::from("D:/gsm"));
        assert_eq!(config.version_interval_secs, 300);
        assert_eq!(config.branches_url, DEFAULT_BRANCHES_URL);
    }

    #[test]
    fn settings_never_use_a_zero_period() {
        let config = AppConfig {
            query_interval_secs: 0,
            ..AppConfig::default()
        };
        let settings = config.orchestrator_settings();
        assert_eq!(settings.query_interval, Duration::from_secs(1));
        assert_eq!(settings.crash_restart_delay, Duration::from_secs(5));
    }
}

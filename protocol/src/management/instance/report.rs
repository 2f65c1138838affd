use crate::management::instance::{InstanceConfig, InstanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot returned by a server query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueryResponse {
    pub name: String,
    pub map: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub status: InstanceStatus,
    pub config: InstanceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<QueryResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl InstanceReport {
    pub fn update_available(&self) -> bool {
        match &self.latest_version {
            Some(latest) => self.config.is_installed() && *latest != self.config.local_version,
            None => false,
        }
    }
}

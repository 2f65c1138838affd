use anyhow::{bail, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::InstanceConfig;

/// Copies an instance's backup entries somewhere safe and back.
#[async_trait]
pub trait BackupProvider: Send + Sync {
    async fn backup(&self, config: &InstanceConfig) -> Result<()>;

    /// Restores the backup called `name`.
    async fn restore(&self, config: &InstanceConfig, name: &str) -> Result<()>;
}

/// Provider used until a real one is installed, every call fails.
pub struct NoBackup;

#[async_trait]
impl BackupProvider for NoBackup {
    async fn backup(&self, config: &InstanceConfig) -> Result<()> {
        bail!("no backup provider configured for {}", config.basic.name)
    }

    async fn restore(&self, config: &InstanceConfig, _name: &str) -> Result<()> {
        bail!("no backup provider configured for {}", config.basic.name)
    }
}

mod bedrock;
mod branches;
mod catalog;
mod registry;
mod steam_game;

#[cfg(test)]
pub(crate) mod fake;

pub use bedrock::MinecraftBedrock;
pub use branches::{BranchIndex, BranchInfo, DEFAULT_BRANCHES_URL};
pub use catalog::CATALOG;
pub use registry::VariantRegistry;
pub use steam_game::{SteamGame, SteamGameEntry};

use anyhow::{bail, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::{InstanceConfig, StopMethod};
use gsm_protocol::management::VersionSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::management::comm::{ProcessControl, ProcessStartInfo};
use crate::management::installer::{InstallOutcome, SteamCmd};
use crate::management::query::QueryClient;
use crate::utils::split_arguments;

/// Upper bound for a graceful stop before the operation fails.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Collaborators handed to every variant constructor.
#[derive(Clone)]
pub struct VariantContext {
    pub steamcmd: Arc<SteamCmd>,
    pub branches: Arc<BranchIndex>,
    pub query: Arc<dyn QueryClient>,
}

/// Raw lifecycle primitives of one game server type.
///
/// Implementations do not touch instance status; `ServerInstance` wraps every call with the
/// guard check, status transition and revert.
#[async_trait]
pub trait GameVariant: Send + Sync {
    /// Discriminator stored in the instance config.
    fn class_name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn default_config(&self, guid: Uuid, name: String, directory: PathBuf) -> InstanceConfig;

    /// Remote versions, newest first.
    async fn versions(&self) -> Result<VersionSnapshot>;

    async fn install(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome>;

    async fn update(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome>;

    /// Launches the server and returns its pid.
    async fn start(&self, process: &ProcessControl, config: &InstanceConfig) -> Result<u32> {
        launch(process, config).await
    }

    async fn stop(&self, process: &ProcessControl, config: &InstanceConfig) -> Result<()> {
        shutdown(process, config).await
    }

    fn query_client(&self) -> Option<Arc<dyn QueryClient>> {
        None
    }

    /// Names of the mods this game accepts.
    fn mods(&self) -> &[&'static str] {
        &[]
    }
}

/// Starts `<directory>/<start_path>` with the configured parameters.
pub async fn launch(process: &ProcessControl, config: &InstanceConfig) -> Result<u32> {
    let directory = &config.basic.directory;
    let target = directory.join(&config.start.start_path);
    if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
        bail!("{} does not exist", target.display());
    }

    let info = ProcessStartInfo::new(target, directory)
        .args(split_arguments(&config.start.start_parameter));
    Ok(process.start(config.start.console_mode, info).await?)
}

/// Stops the server with its configured method and waits for it to exit.
pub async fn shutdown(process: &ProcessControl, config: &InstanceConfig) -> Result<()> {
    match &config.start.stop {
        StopMethod::Command(command) => process.write_line(command).await?,
        StopMethod::Kill => process.kill()?,
    }
    if !process.wait_for_exit(Some(STOP_TIMEOUT)).await {
        bail!("Process fail to stop");
    }
    Ok(())
}

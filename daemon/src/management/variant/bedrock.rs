use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::{
    BackupConfig, BasicConfig, ConsoleMode, InstanceConfig, StartConfig, StopMethod,
};
use gsm_protocol::management::VersionSnapshot;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::GameVariant;
use crate::management::comm::ProcessControl;
use crate::management::installer::InstallOutcome;
use crate::utils::fs as fs_utils;

const DOWNLOAD_PAGE: &str = "https://www.minecraft.net/en-us/download/server/bedrock/";

#[cfg(windows)]
const PLATFORM: &str = "bin-win";
#[cfg(not(windows))]
const PLATFORM: &str = "bin-linux";

#[cfg(windows)]
const START_PATH: &str = "bedrock_server.exe";
#[cfg(not(windows))]
const START_PATH: &str = "bedrock_server";

/// Files the server writes on first run that an update must not overwrite.
const USER_FILES: [&str; 4] = [
    "allowlist.json",
    "server.properties",
    "permissions.json",
    "whitelist.json",
];

lazy_static! {
    static ref DOWNLOAD_PATTERN: Regex = Regex::new(&format!(
        r"https://minecraft\.azureedge\.net/{}/bedrock-server-(.*?)\.zip",
        PLATFORM
    ))
    .expect("Failed to compile DOWNLOAD_PATTERN regex");
}

/// Minecraft: Bedrock Edition dedicated server, downloaded straight from minecraft.net.
pub struct MinecraftBedrock {
    client: reqwest::Client,
}

impl Default for MinecraftBedrock {
    fn default() -> Self {
        Self::new()
    }
}

impl MinecraftBedrock {
    pub const CLASS_NAME: &'static str = "MCBE";

    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn download_url(version: &str) -> String {
        format!(
            "https://minecraft.azureedge.net/{}/bedrock-server-{}.zip",
            PLATFORM, version
        )
    }

    /// Version of the first server download linked from the page.
    pub fn parse_version(page: &str) -> Result<String> {
        DOWNLOAD_PATTERN
            .captures(page)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| anyhow!("Could not find the download URL"))
    }

    async fn download(&self, version: &str) -> Result<Vec<u8>> {
        let url = Self::download_url(version);
        debug!("downloading {}", url);
        let archive = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(archive.to_vec())
    }

    /// Unpacks `archive` over `directory`, leaving worlds and user settings in place.
    async fn apply_update(archive: Vec<u8>, directory: &Path) -> Result<()> {
        let staging = tempfile::tempdir()?;
        let unpacked = staging.path().join("server");
        fs_utils::extract_zip(archive, unpacked.clone()).await?;
        for file in USER_FILES {
            fs_utils::remove_file_if_exists(unpacked.join(file)).await?;
        }
        fs_utils::merge_dir(unpacked, directory.to_path_buf()).await?;
        Ok(())
    }
}

#[async_trait]
impl GameVariant for MinecraftBedrock {
    fn class_name(&self) -> &str {
        Self::CLASS_NAME
    }

    fn display_name(&self) -> &str {
        "Minecraft: Bedrock Edition Dedicated Server"
    }

    fn default_config(&self, guid: Uuid, name: String, directory: PathBuf) -> InstanceConfig {
        let start = StartConfig {
            start_path: PathBuf::from(START_PATH),
            start_parameter: String::new(),
            console_mode: ConsoleMode::PseudoConsole,
            stop: StopMethod::Command("stop".to_owned()),
        };
        let mut config =
            InstanceConfig::new(guid, Self::CLASS_NAME, BasicConfig { name, directory }, start);
        config.backup = BackupConfig {
            entries: ["worlds", "server.properties", "permissions.json", "allowlist.json"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        };
        config
    }

    async fn versions(&self) -> Result<VersionSnapshot> {
        let page = self
            .client
            .get(DOWNLOAD_PAGE)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(VersionSnapshot::new(vec![Self::parse_version(&page)?]))
    }

    async fn install(
        &self,
        _process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        let archive = self.download(version).await?;
        fs_utils::extract_zip(archive, config.basic.directory.clone()).await?;
        Ok(InstallOutcome::Success)
    }

    async fn update(
        &self,
        _process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        let archive = self.download(version).await?;
        Self::apply_update(archive, &config.basic.directory).await?;
        Ok(InstallOutcome::Success)
    }
}

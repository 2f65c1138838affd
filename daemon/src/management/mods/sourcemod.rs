use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::path::Path;

use super::{game_directory, ServerMod};
use crate::management::version::Version;
use crate::utils::fs as fs_utils;
use gsm_protocol::management::instance::InstanceConfig;
use gsm_protocol::management::VersionSnapshot;

lazy_static! {
    static ref LISTING_PATTERN: Regex =
        Regex::new(r#"href="(\d+\.\d+)"#).expect("Failed to compile LISTING_PATTERN regex");
    static ref STABLE_PATTERN: Regex =
        Regex::new(r"\?branch=(\d+\.\d+)").expect("Failed to compile STABLE_PATTERN regex");
}

const DROP_URL: &str = "https://sm.alliedmods.net/smdrop/";
const STABLE_URL: &str = "https://www.sourcemod.net/downloads.php?branch=stable";

pub const NAME: &str = "SourceMod";
pub const DEFAULT_INSTALL_PATH: &str = "addons/sourcemod";

/// Folders swapped out on upgrade, configs and data are left alone.
const UPGRADE_FOLDERS: [&str; 5] = ["bin", "extensions", "gamedata", "plugins", "translations"];

pub struct SourceMod {
    client: reqwest::Client,
}

impl Default for SourceMod {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMod {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn text(&self, url: &str) -> Result<String> {
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    /// Downloads the newest Windows build published for `version`.
    async fn download(&self, version: &str) -> Result<Vec<u8>> {
        let latest = self
            .text(&format!("{}{}/sourcemod-latest-windows", DROP_URL, version))
            .await?;
        let url = format!("{}{}/{}", DROP_URL, version, latest.trim());
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

    /// Stable branch first, then every listed branch newest first.
    pub fn parse_versions(listing: &str, stable_page: &str) -> Result<Vec<String>> {
        let stable = STABLE_PATTERN
            .captures_iter(stable_page)
            .last()
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| anyhow!("Could not find the stable SourceMod branch"))?;

        let mut listed: Vec<Version> = LISTING_PATTERN
            .captures_iter(listing)
            .filter_map(|caps| caps[1].parse().ok())
            .collect();
        listed.sort_by(|a, b| b.cmp(a));

        let mut versions = vec![stable];
        for version in listed.into_iter().map(|v| v.to_string()) {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    async fn replace_folders(staging: &Path, target: &Path) -> Result<()> {
        for folder in UPGRADE_FOLDERS {
            let from = staging.join(folder);
            if tokio::fs::try_exists(&from).await? {
                fs_utils::move_dir(from, target.join(folder)).await?;
            }
        }
        Ok(())
    }
}

fn install_path(config: &InstanceConfig) -> &str {
    config
        .mods
        .get(NAME)
        .and_then(|m| m.install_path.as_deref())
        .unwrap_or(DEFAULT_INSTALL_PATH)
}

#[async_trait]
impl ServerMod for SourceMod {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "SourceMod (SM) is an HL2 mod which allows you to write modifications for Half-Life 2 with the Small scripting language."
    }

    async fn versions(&self) -> Result<VersionSnapshot> {
        let listing = self.text(DROP_URL).await?;
        let stable_page = self.text(STABLE_URL).await?;
        Ok(VersionSnapshot::new(Self::parse_versions(
            &listing,
            &stable_page,
        )?))
    }

    async fn install(&self, config: &InstanceConfig, version: &str) -> Result<()> {
        let destination = game_directory(config)?;
        let archive = self.download(version).await?;
        fs_utils::extract_zip(archive, destination).await
    }

    async fn update(&self, config: &InstanceConfig, version: &str) -> Result<()> {
        let install_path = install_path(config);
        let target = game_directory(config)?.join(install_path);
        let archive = self.download(version).await?;

        let staging = tempfile::tempdir()?;
        fs_utils::extract_zip(archive, staging.path().to_path_buf()).await?;
        Self::replace_folders(&staging.path().join(install_path), &target).await
    }

    async fn delete(&self, config: &InstanceConfig) -> Result<()> {
        let target = game_directory(config)?.join(install_path(config));
        fs_utils::remove_dir_if_exists(target).await?;
        Ok(())
    }
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::{
    BackupConfig, BasicConfig, ConsoleMode, InstallerConfig, InstanceConfig, ProtocolConfig,
    StartConfig, StopMethod,
};
use gsm_protocol::management::VersionSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use super::{GameVariant, VariantContext};
use crate::management::comm::ProcessControl;
use crate::management::installer::{InstallOutcome, InstallPhase};
use crate::management::query::QueryClient;

/// A dedicated server distributed through SteamCMD, described entirely by data.
#[derive(Debug)]
pub struct SteamGameEntry {
    pub class_name: &'static str,
    pub display_name: &'static str,
    pub app_id: &'static str,
    /// Game folder passed to `app_set_config` and used as the mod root.
    pub game: &'static str,
    pub start_path: &'static str,
    pub start_parameter: &'static str,
    pub console_mode: ConsoleMode,
    /// Console command that stops the server, `None` kills it.
    pub stop_command: Option<&'static str>,
    pub query_port: Option<u16>,
    pub backup_entries: &'static [&'static str],
    pub mods: &'static [&'static str],
}

pub struct SteamGame {
    entry: &'static SteamGameEntry,
    context: VariantContext,
}

impl SteamGame {
    pub fn new(entry: &'static SteamGameEntry, context: VariantContext) -> Self {
        Self { entry, context }
    }

    async fn run(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        phase: InstallPhase,
        version: &str,
    ) -> Result<InstallOutcome> {
        self.context
            .steamcmd
            .run(process, config, phase, version)
            .await
    }
}

#[async_trait]
impl GameVariant for SteamGame {
    fn class_name(&self) -> &str {
        self.entry.class_name
    }

    fn display_name(&self) -> &str {
        self.entry.display_name
    }

    fn default_config(&self, guid: Uuid, name: String, directory: PathBuf) -> InstanceConfig {
        let entry = self.entry;
        let start = StartConfig {
            start_path: PathBuf::from(entry.start_path),
            start_parameter: entry.start_parameter.to_owned(),
            console_mode: entry.console_mode,
            stop: entry
                .stop_command
                .map_or(StopMethod::Kill, |command| StopMethod::Command(command.to_owned())),
        };
        let mut config =
            InstanceConfig::new(guid, entry.class_name, BasicConfig { name, directory }, start);
        config.backup = BackupConfig {
            entries: entry.backup_entries.iter().map(PathBuf::from).collect(),
        };
        config.installer = Some(InstallerConfig {
            game: entry.game.to_owned(),
            ..InstallerConfig::anonymous(entry.app_id)
        });
        config.protocol = entry.query_port.map(ProtocolConfig::new);
        config
    }

    async fn versions(&self) -> Result<VersionSnapshot> {
        self.context.branches.snapshot(self.entry.app_id).await
    }

    async fn install(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        self.run(process, config, InstallPhase::Install, version)
            .await
    }

    async fn update(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        self.run(process, config, InstallPhase::Update, version)
            .await
    }

    fn query_client(&self) -> Option<Arc<dyn QueryClient>> {
        self.entry
            .query_port
            .map(|_| Arc::clone(&self.context.query))
    }

    fn mods(&self) -> &[&'static str] {
        self.entry.mods
    }
}

impl SteamGameEntry {
    /// Looks an entry up by its discriminator.
    pub fn find(class_name: &str) -> Result<&'static SteamGameEntry> {
        super::CATALOG
            .iter()
            .find(|entry| entry.class_name == class_name)
            .ok_or_else(|| anyhow!("{} is not a SteamCMD game", class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::installer::SteamCmd;
    use crate::management::query::SourceQuery;
    use crate::management::variant::BranchIndex;

    fn context() -> VariantContext {
        VariantContext {
            steamcmd: Arc::new(SteamCmd::new("steamcmd/steamcmd.exe")),
            branches: Arc::new(BranchIndex::new("http://127.0.0.1:9/branches.json")),
            query: Arc::new(SourceQuery::default()),
        }
    }

    #[test]
    fn source_game_defaults() {
        let game = SteamGame::new(SteamGameEntry::find("AOC").unwrap(), context());
        let guid = Uuid::new_v4();
        let config = game.default_config(guid, "aoc".into(), PathBuf::from("servers/aoc"));

        assert_eq!(config.guid(), guid);
        assert_eq!(config.class_name(), "AOC");
        assert_eq!(config.start.start_path, PathBuf::from("srcds.exe"));
        assert_eq!(config.start.stop, StopMethod::Command("quit".into()));
        assert_eq!(config.protocol.as_ref().map(|p| p.query_port), Some(27015));
        assert_eq!(config.backup.entries.len(), 3);

        let installer = config.installer.unwrap();
        assert_eq!(installer.app_id, "17515");
        assert_eq!(installer.game, "ageofchivalry");
        assert!(installer.is_anonymous());
        assert!(game.query_client().is_some());
        assert_eq!(game.mods(), &["SourceMod"]);
    }

    #[test]
    fn killed_game_without_query() {
        let game = SteamGame::new(SteamGameEntry::find("DayZ").unwrap(), context());
        let config = game.default_config(Uuid::new_v4(), "dayz".into(), PathBuf::from("d"));
        assert_eq!(config.start.stop, StopMethod::Kill);
        assert!(game.query_client().is_none());
        assert!(game.mods().is_empty());
    }

    #[test]
    fn unknown_class_is_rejected() {
        assert!(SteamGameEntry::find("Minecraft").is_err());
    }
}

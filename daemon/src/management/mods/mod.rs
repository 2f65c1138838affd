mod sourcemod;

pub use sourcemod::SourceMod;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::InstanceConfig;
use gsm_protocol::management::VersionSnapshot;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::management::error::OperationError;

/// Primitives of one server-side mod. The instance records the installed version.
#[async_trait]
pub trait ServerMod: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn versions(&self) -> Result<VersionSnapshot>;

    async fn install(&self, config: &InstanceConfig, version: &str) -> Result<()>;

    async fn update(&self, config: &InstanceConfig, version: &str) -> Result<()>;

    async fn delete(&self, config: &InstanceConfig) -> Result<()>;
}

/// `<directory>/<game>`, the folder mods unpack into.
pub fn game_directory(config: &InstanceConfig) -> Result<PathBuf> {
    let installer = config
        .installer
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no SteamCMD settings", config.basic.name))?;
    Ok(config.basic.directory.join(&installer.game))
}

#[derive(Default)]
pub struct ModRegistry {
    mods: BTreeMap<String, Arc<dyn ServerMod>>,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SourceMod::new()));
        registry
    }

    pub fn register(&mut self, server_mod: Arc<dyn ServerMod>) {
        self.mods.insert(server_mod.name().to_owned(), server_mod);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ServerMod>, OperationError> {
        self.mods
            .get(name)
            .cloned()
            .ok_or_else(|| OperationError::UnknownMod(name.to_owned()))
    }
}

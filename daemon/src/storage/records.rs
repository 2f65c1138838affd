use anyhow::Context;
use gsm_protocol::management::instance::InstanceConfig;
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::file::{Config, FileIoWithBackup};

const CONFIGS_DIR: &str = "configs";
const ORDER_FILE: &str = "data/servers_order.json";

struct InstanceRecord;

impl FileIoWithBackup for InstanceRecord {}

impl Config for InstanceRecord {
    type ConfigType = InstanceConfig;
}

struct OrderRecord;

impl FileIoWithBackup for OrderRecord {}

impl Config for OrderRecord {
    type ConfigType = Vec<Uuid>;
}

/// Persisted instance configs, one JSON file per guid, plus the display order.
pub struct InstanceRecords {
    configs_dir: PathBuf,
    order_file: PathBuf,
}

impl InstanceRecords {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            configs_dir: data_dir.join(CONFIGS_DIR),
            order_file: data_dir.join(ORDER_FILE),
        }
    }

    pub fn path_of(&self, guid: Uuid) -> PathBuf {
        self.configs_dir.join(format!("{}.json", guid))
    }

    pub fn exists(&self, guid: Uuid) -> bool {
        self.path_of(guid).is_file()
    }

    pub fn save(&self, config: &InstanceConfig) -> anyhow::Result<()> {
        InstanceRecord::save_config(self.path_of(config.guid()), config)
            .with_context(|| format!("failed to save config of {}", config.guid()))
    }

    pub fn load(&self, guid: Uuid) -> anyhow::Result<InstanceConfig> {
        let config = InstanceRecord::load_config(self.path_of(guid))?;
        anyhow::ensure!(
            config.guid() == guid,
            "config file of {} carries guid {}",
            guid,
            config.guid()
        );
        Ok(config)
    }

    pub fn remove(&self, guid: Uuid) -> anyhow::Result<()> {
        InstanceRecord::remove_with_backup(self.path_of(guid))?;
        Ok(())
    }

    pub fn load_order(&self) -> anyhow::Result<Vec<Uuid>> {
        if !self.order_file.is_file() {
            return Ok(vec![]);
        }
        OrderRecord::load_config(&self.order_file)
    }

    pub fn save_order(&self, order: &[Uuid]) -> anyhow::Result<()> {
        OrderRecord::save_config(&self.order_file, &order.to_vec())
    }

    /// Every readable config, listed ones first in their saved order.
    pub fn load_all(&self) -> anyhow::Result<Vec<InstanceConfig>> {
        let mut seen = HashSet::new();
        let mut configs = vec![];

        let order = self.load_order().unwrap_or_else(|err| {
            warn!("servers order unreadable, falling back to a scan: {}", err);
            vec![]
        });
        let listed = order.into_iter().filter(|guid| self.exists(*guid));

        let mut scanned = vec![];
        if self.configs_dir.is_dir() {
            for entry in std::fs::read_dir(&self.configs_dir)? {
                let path = match entry {
                    Ok(entry) => entry.path(),
                    Err(_) => continue,
                };
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(guid) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| Uuid::parse_str(stem).ok())
                {
                    scanned.push(guid);
                }
            }
        }
        scanned.sort();

        for guid in listed.chain(scanned) {
            if !seen.insert(guid) {
                continue;
            }
            match self.load(guid) {
                Ok(config) => {
                    debug!("instance config {} loaded", guid);
                    configs.push(config);
                }
                Err(err) => warn!("instance config {} ignored: {:#}", guid, err),
            }
        }
        Ok(configs)
    }
}

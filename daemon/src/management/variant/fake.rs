use anyhow::{bail, Result};
use async_trait::async_trait;
use gsm_protocol::management::instance::{
    BasicConfig, ConsoleMode, InstanceConfig, ProtocolConfig, QueryResponse, StartConfig,
    StopMethod,
};
use gsm_protocol::management::VersionSnapshot;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::GameVariant;
use crate::management::comm::ProcessControl;
use crate::management::installer::InstallOutcome;
use crate::management::query::QueryClient;

/// Scriptable variant that runs `/bin/sh` and records how often each primitive ran.
#[derive(Default)]
pub struct FakeVariant {
    /// Build id the "installer" ends up with, `None` installs exactly what was asked for.
    pub build_id: Mutex<Option<String>>,
    pub fail_install: AtomicBool,
    pub fail_start: AtomicBool,
    pub versions: Mutex<Option<VersionSnapshot>>,
    pub query: Option<Arc<FakeQuery>>,
    pub mods: &'static [&'static str],
    pub installs: AtomicUsize,
    pub updates: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeVariant {
    pub const CLASS_NAME: &'static str = "Fake";

    pub fn with_query() -> Self {
        Self {
            query: Some(Arc::new(FakeQuery::default())),
            ..Self::default()
        }
    }

    pub fn with_versions(self, versions: &[&str]) -> Self {
        *self.versions.lock().unwrap() = Some(VersionSnapshot::new(
            versions.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    fn outcome(&self, version: &str) -> Result<InstallOutcome> {
        if self.fail_install.load(Ordering::SeqCst) {
            bail!("installer exploded");
        }
        Ok(match self.build_id.lock().unwrap().clone() {
            Some(build) if build != version => InstallOutcome::VersionMismatch(build),
            _ => InstallOutcome::Success,
        })
    }
}

#[async_trait]
impl GameVariant for FakeVariant {
    fn class_name(&self) -> &str {
        Self::CLASS_NAME
    }

    fn display_name(&self) -> &str {
        "Fake Server"
    }

    fn default_config(&self, guid: Uuid, name: String, directory: PathBuf) -> InstanceConfig {
        let start = StartConfig {
            start_path: PathBuf::from("/bin/sh"),
            start_parameter: r#"-c "read line; exit 0""#.to_owned(),
            console_mode: ConsoleMode::Redirect,
            stop: StopMethod::Command("quit".to_owned()),
        };
        let mut config =
            InstanceConfig::new(guid, Self::CLASS_NAME, BasicConfig { name, directory }, start);
        config.protocol = self.query.as_ref().map(|_| ProtocolConfig::new(27015));
        config
    }

    async fn versions(&self) -> Result<VersionSnapshot> {
        match self.versions.lock().unwrap().clone() {
            Some(snapshot) => Ok(snapshot),
            None => bail!("no versions published"),
        }
    }

    async fn install(
        &self,
        _process: &ProcessControl,
        _config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.outcome(version)
    }

    async fn update(
        &self,
        _process: &ProcessControl,
        _config: &InstanceConfig,
        version: &str,
    ) -> Result<InstallOutcome> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.outcome(version)
    }

    async fn start(&self, process: &ProcessControl, config: &InstanceConfig) -> Result<u32> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("refused to start");
        }
        super::launch(process, config).await
    }

    async fn stop(&self, process: &ProcessControl, config: &InstanceConfig) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        super::shutdown(process, config).await
    }

    fn query_client(&self) -> Option<Arc<dyn QueryClient>> {
        self.query
            .as_ref()
            .map(|query| query.clone() as Arc<dyn QueryClient>)
    }

    fn mods(&self) -> &[&'static str] {
        self.mods
    }
}

#[derive(Default)]
pub struct FakeQuery {
    pub calls: AtomicUsize,
}

#[async_trait]
impl QueryClient for FakeQuery {
    async fn query(&self, _host: &str, _port: u16) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(QueryResponse {
            name: "Fake Server".to_owned(),
            map: "de_test".to_owned(),
            players: 3,
            max_players: 16,
            ..QueryResponse::default()
        })
    }
}

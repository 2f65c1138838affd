use anyhow::anyhow;
use gsm_protocol::management::instance::{
    InstanceConfig, InstanceReport, InstanceStatus, Operation, ProcessPriority, QueryResponse,
};
use log::{debug, error, info, warn};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use uuid::Uuid;

use crate::management::backup::BackupProvider;
use crate::management::comm::{ProcessControl, ProcessEvent, ProcessExit, ProcessHelper};
use crate::management::error::{OperationError, ProcessError};
use crate::management::installer::InstallOutcome;
use crate::management::mods::ServerMod;
use crate::management::registry::{RegistryEvent, RegistryState};
use crate::management::variant::GameVariant;
use crate::utils::fs as fs_utils;

const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Proof that the caller holds the instance's operation lock.
pub type OperationLock<'a> = MutexGuard<'a, ()>;

/// One managed game server: its config, status, process and variant primitives.
pub struct ServerInstance {
    variant: Arc<dyn GameVariant>,
    config: RwLock<InstanceConfig>,
    status: watch::Sender<InstanceStatus>,
    process: ProcessControl,
    op_lock: Mutex<()>,
    state: Arc<RegistryState>,
}

/// Shows an in-flight status and puts `revert` back unless finished.
struct Transition<'a> {
    instance: &'a ServerInstance,
    revert: Option<InstanceStatus>,
}

impl<'a> Transition<'a> {
    fn new(instance: &'a ServerInstance, status: InstanceStatus, revert: InstanceStatus) -> Self {
        instance.set_status(status);
        Self {
            instance,
            revert: Some(revert),
        }
    }

    fn enter(&mut self, status: InstanceStatus) {
        self.instance.set_status(status);
    }

    fn revert_to(&mut self, status: InstanceStatus) {
        self.revert = Some(status);
    }

    fn finish(mut self, status: InstanceStatus) {
        self.revert = None;
        self.instance.set_status(status);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Some(status) = self.revert.take() {
            self.instance.set_status(status);
        }
    }
}

impl ServerInstance {
    pub fn new(
        variant: Arc<dyn GameVariant>,
        config: InstanceConfig,
        state: Arc<RegistryState>,
    ) -> Self {
        let status = if config.is_installed() {
            InstanceStatus::Stopped
        } else {
            InstanceStatus::NotInstalled
        };
        Self {
            variant,
            config: RwLock::new(config),
            status: watch::channel(status).0,
            process: ProcessControl::new(),
            op_lock: Mutex::new(()),
            state,
        }
    }

    pub fn guid(&self) -> Uuid {
        self.read_config(|config| config.guid())
    }

    pub fn name(&self) -> String {
        self.read_config(|config| config.basic.name.clone())
    }

    pub fn class_name(&self) -> &str {
        self.variant.class_name()
    }

    pub fn variant(&self) -> &Arc<dyn GameVariant> {
        &self.variant
    }

    pub fn config(&self) -> InstanceConfig {
        self.read_config(Clone::clone)
    }

    fn read_config<R>(&self, read: impl FnOnce(&InstanceConfig) -> R) -> R {
        read(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the mutable sections of the config and persists it.
    pub fn update_config(&self, config: InstanceConfig) -> Result<(), OperationError> {
        let current = self.config();
        if config.guid() != current.guid() || config.class_name() != current.class_name() {
            return Err(anyhow!("the guid and type of a server cannot change").into());
        }
        self.persist(config)?;
        Ok(())
    }

    fn edit_config(&self, edit: impl FnOnce(&mut InstanceConfig)) -> anyhow::Result<()> {
        let mut config = self.config();
        edit(&mut config);
        self.persist(config)
    }

    fn persist(&self, config: InstanceConfig) -> anyhow::Result<()> {
        self.state.records().save(&config)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<InstanceStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: InstanceStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(
                "[{}] status {} -> {} ({})",
                self.name(),
                previous,
                status,
                self.guid()
            );
            self.state.emit(RegistryEvent::StatusChanged {
                guid: self.guid(),
                status,
            });
        }
    }

    pub fn process(&self) -> &ProcessControl {
        &self.process
    }

    pub fn output(&self) -> String {
        self.process.output()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.process.subscribe()
    }

    pub fn exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.process.exits()
    }

    pub fn response(&self) -> Option<QueryResponse> {
        self.state.response(self.guid())
    }

    /// Head of the remote branch this instance tracks.
    pub fn latest_version(&self) -> Option<String> {
        let snapshot = self.state.version(self.class_name())?;
        self.read_config(|config| {
            let branch = config.installer.as_ref().and_then(|i| i.branch());
            snapshot.latest(branch).map(str::to_owned)
        })
    }

    pub fn is_update_available(&self) -> bool {
        self.latest_version()
            .is_some_and(|latest| self.read_config(|config| config.local_version != latest))
    }

    pub fn report(&self) -> InstanceReport {
        InstanceReport {
            status: self.status(),
            config: self.config(),
            response: self.response(),
            latest_version: self.latest_version(),
        }
    }

    /// Takes the operation lock without waiting.
    pub fn lock(&self) -> Result<OperationLock<'_>, OperationError> {
        self.op_lock.try_lock().map_err(|_| OperationError::Busy)
    }

    /// Waits until the running operation, if any, lets go of the lock.
    pub(crate) async fn lock_wait(&self) -> OperationLock<'_> {
        self.op_lock.lock().await
    }

    fn begin(
        &self,
        _lock: &OperationLock<'_>,
        operation: Operation,
    ) -> Result<Transition<'_>, OperationError> {
        let status = self.status();
        if !status.permits(operation) {
            return Err(OperationError::Disabled { operation, status });
        }
        Ok(Transition::new(self, operation.transient_status(), status))
    }

    fn fail(&self, what: &str, err: anyhow::Error) -> OperationError {
        error!("[{}] {}: {:#}", self.name(), what, err);
        OperationError::Failure(err)
    }

    pub async fn start(&self) -> Result<(), OperationError> {
        let lock = self.lock()?;
        self.start_locked(&lock).await
    }

    pub(crate) async fn start_locked(&self, lock: &OperationLock<'_>) -> Result<(), OperationError> {
        let transition = self.begin(lock, Operation::Start)?;
        self.launch(transition).await
    }

    async fn launch(&self, transition: Transition<'_>) -> Result<(), OperationError> {
        let name = self.name();
        info!("[{}] Server starting...", name);

        let pid = self.start_process(&self.config()).await?;

        info!("[{}] Server started (pid={})", name, pid);
        transition.finish(InstanceStatus::Started);
        Ok(())
    }

    /// Runs the variant's start primitive, then tunes and queries the new process.
    async fn start_process(&self, config: &InstanceConfig) -> Result<u32, OperationError> {
        let pid = self
            .variant
            .start(&self.process, config)
            .await
            .map_err(|err| self.fail("Server failed to start", err))?;
        self.apply_process_settings(pid, config);

        self.query().await;
        if !self.process.is_running() {
            return Err(self.fail("Server failed to start", anyhow!("Server crashed while starting")));
        }
        Ok(pid)
    }

    fn apply_process_settings(&self, pid: u32, config: &InstanceConfig) {
        let advanced = &config.advanced;
        if advanced.process_priority != ProcessPriority::Normal {
            if let Err(err) = ProcessHelper::set_priority(pid, advanced.process_priority) {
                warn!("[{}] could not set process priority: {}", config.basic.name, err);
            }
        }
        if advanced.processor_affinity != 0 {
            if let Err(err) = ProcessHelper::set_affinity(pid, advanced.processor_affinity) {
                warn!("[{}] could not set processor affinity: {}", config.basic.name, err);
            }
        }
    }

    pub async fn stop(&self) -> Result<(), OperationError> {
        let lock = self.lock()?;
        self.stop_locked(&lock).await
    }

    pub(crate) async fn stop_locked(&self, lock: &OperationLock<'_>) -> Result<(), OperationError> {
        let transition = self.begin(lock, Operation::Stop)?;
        let name = self.name();
        info!("[{}] Server stopping...", name);

        self.variant
            .stop(&self.process, &self.config())
            .await
            .map_err(|err| self.fail("Server failed to stop", err))?;
        self.state.clear_response(self.guid());

        info!("[{}] Server stopped", name);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let mut transition = self.begin(&lock, Operation::Restart)?;
        let name = self.name();
        info!("[{}] Server restarting...", name);

        let config = self.config();
        self.variant
            .stop(&self.process, &config)
            .await
            .map_err(|err| self.fail("Server failed to stop", err))?;
        transition.revert_to(InstanceStatus::Stopped);
        self.state.clear_response(self.guid());

        let pid = self.start_process(&config).await?;

        info!("[{}] Server restarted (pid={})", name, pid);
        transition.finish(InstanceStatus::Started);
        Ok(())
    }

    pub async fn kill(&self) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::Kill)?;
        let name = self.name();
        info!("[{}] Server killing...", name);

        match self.process.kill() {
            Ok(()) | Err(ProcessError::NotRunning) => {}
            Err(err) => return Err(self.fail("Server failed to kill", err.into())),
        }
        if !self.process.wait_for_exit(Some(KILL_TIMEOUT)).await {
            let err = anyhow!("process {:?} is still running", self.process.pid());
            return Err(self.fail("Server failed to kill", err));
        }
        self.state.clear_response(self.guid());

        info!("[{}] Server killed", name);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn install(&self, version: &str) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::Install)?;
        let name = self.name();
        let config = self.config();

        // recorded before anything touches the disk so a failed install is still listed
        if !self.state.records().exists(config.guid()) {
            self.state
                .records()
                .save(&config)
                .map_err(|err| self.fail("Server failed to install", err))?;
        }
        tokio::fs::create_dir_all(&config.basic.directory)
            .await
            .map_err(|err| self.fail("Server failed to install", err.into()))?;

        info!("[{}] Server installing... ({})", name, version);
        let outcome = self
            .variant
            .install(&self.process, &config, version)
            .await
            .map_err(|err| self.fail("Server failed to install", err))?;
        self.record_version(version, outcome)
            .map_err(|err| self.fail("Server failed to install", err))?;

        info!(
            "[{}] Server installed ({})",
            name,
            self.read_config(|c| c.local_version.clone())
        );
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn update(&self, version: &str) -> Result<(), OperationError> {
        let lock = self.lock()?;
        self.update_locked(&lock, version).await
    }

    pub(crate) async fn update_locked(
        &self,
        lock: &OperationLock<'_>,
        version: &str,
    ) -> Result<(), OperationError> {
        let transition = self.begin(lock, Operation::Update)?;
        let name = self.name();
        let config = self.config();
        info!(
            "[{}] Server updating... ({}) => ({})",
            name, config.local_version, version
        );

        let outcome = self
            .variant
            .update(&self.process, &config, version)
            .await
            .map_err(|err| self.fail("Server failed to update", err))?;
        self.record_version(version, outcome)
            .map_err(|err| self.fail("Server failed to update", err))?;

        info!(
            "[{}] Server updated ({})",
            name,
            self.read_config(|c| c.local_version.clone())
        );
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    /// Stores the version that actually landed on disk.
    fn record_version(&self, requested: &str, outcome: InstallOutcome) -> anyhow::Result<()> {
        let installed = match outcome {
            InstallOutcome::Success => requested.to_owned(),
            InstallOutcome::VersionMismatch(actual) => {
                warn!(
                    "[{}] Server current version is {} instead of {}",
                    self.name(),
                    actual,
                    requested
                );
                actual
            }
        };
        self.edit_config(|config| config.local_version = installed)
    }

    /// Removes the server files and its record. The caller deregisters the instance.
    pub async fn delete(&self) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let mut transition = self.begin(&lock, Operation::Delete)?;
        transition.revert_to(InstanceStatus::Stopped);
        let name = self.name();
        let config = self.config();
        info!("[{}] Server deleting...", name);

        fs_utils::remove_dir_if_exists(&config.basic.directory)
            .await
            .map_err(|err| self.fail("Server failed to delete", err.into()))?;
        self.state
            .records()
            .remove(config.guid())
            .map_err(|err| self.fail("Server failed to delete", err))?;
        self.state.clear_response(config.guid());

        info!("[{}] Server deleted", name);
        transition.finish(InstanceStatus::NotInstalled);
        Ok(())
    }

    pub async fn backup(&self, provider: &dyn BackupProvider) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::Backup)?;
        let name = self.name();
        info!("[{}] Server backing up...", name);

        provider
            .backup(&self.config())
            .await
            .map_err(|err| self.fail("Server failed to back up", err))?;

        info!("[{}] Server backed up", name);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn restore(
        &self,
        provider: &dyn BackupProvider,
        backup: &str,
    ) -> Result<(), OperationError> {
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::Restore)?;
        let name = self.name();
        info!("[{}] Server restoring {}...", name, backup);

        provider
            .restore(&self.config(), backup)
            .await
            .map_err(|err| self.fail("Server failed to restore", err))?;

        info!("[{}] Server restored", name);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    fn check_mod(&self, server_mod: &dyn ServerMod) -> Result<(), OperationError> {
        if self.variant.mods().iter().any(|m| *m == server_mod.name()) {
            Ok(())
        } else {
            Err(OperationError::UnknownMod(server_mod.name().to_owned()))
        }
    }

    pub async fn install_mod(
        &self,
        server_mod: &dyn ServerMod,
        version: &str,
    ) -> Result<(), OperationError> {
        self.check_mod(server_mod)?;
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::InstallMod)?;
        let mod_name = server_mod.name();
        info!("[{}] {} installing... ({})", self.name(), mod_name, version);

        let failed = format!("{} failed to install", mod_name);
        server_mod
            .install(&self.config(), version)
            .await
            .and_then(|_| self.set_mod_version(mod_name, version))
            .map_err(|err| self.fail(&failed, err))?;

        info!("[{}] {} installed ({})", self.name(), mod_name, version);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn update_mod(
        &self,
        server_mod: &dyn ServerMod,
        version: &str,
    ) -> Result<(), OperationError> {
        self.check_mod(server_mod)?;
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::UpdateMod)?;
        let mod_name = server_mod.name();
        let current = self.read_config(|c| c.mod_version(mod_name).unwrap_or_default().to_owned());
        info!(
            "[{}] {} updating... ({}) => ({})",
            self.name(),
            mod_name,
            current,
            version
        );

        let failed = format!("{} failed to update", mod_name);
        server_mod
            .update(&self.config(), version)
            .await
            .and_then(|_| self.set_mod_version(mod_name, version))
            .map_err(|err| self.fail(&failed, err))?;

        info!("[{}] {} updated ({})", self.name(), mod_name, version);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    pub async fn delete_mod(&self, server_mod: &dyn ServerMod) -> Result<(), OperationError> {
        self.check_mod(server_mod)?;
        let lock = self.lock()?;
        let transition = self.begin(&lock, Operation::DeleteMod)?;
        let mod_name = server_mod.name();
        info!("[{}] {} deleting...", self.name(), mod_name);

        let failed = format!("{} failed to delete", mod_name);
        server_mod
            .delete(&self.config())
            .await
            .and_then(|_| self.set_mod_version(mod_name, ""))
            .map_err(|err| self.fail(&failed, err))?;

        info!("[{}] {} deleted", self.name(), mod_name);
        transition.finish(InstanceStatus::Stopped);
        Ok(())
    }

    fn set_mod_version(&self, mod_name: &str, version: &str) -> anyhow::Result<()> {
        self.edit_config(|config| {
            config
                .mods
                .entry(mod_name.to_owned())
                .or_default()
                .local_version = version.to_owned();
        })
    }

    /// Queries the running server, caching the response. Failures count as no data.
    pub async fn query(&self) -> Option<QueryResponse> {
        let client = self.variant.query_client()?;
        let protocol = self.read_config(|config| config.protocol.clone())?;
        match client
            .query(&protocol.ip_address, protocol.query_port)
            .await
        {
            Ok(response) => {
                self.state.set_response(self.guid(), response.clone());
                Some(response)
            }
            Err(err) => {
                debug!("[{}] query failed: {:#}", self.name(), err);
                None
            }
        }
    }

    pub fn is_queryable(&self) -> bool {
        self.variant.query_client().is_some() && self.read_config(|c| c.protocol.is_some())
    }

    /// Types a line into the server console.
    pub async fn send_command(&self, command: &str) -> Result<(), OperationError> {
        if self.status() != InstanceStatus::Started {
            return Err(anyhow!("[{}] server is not started", self.name()).into());
        }
        self.process
            .write_line(command)
            .await
            .map_err(|err| OperationError::Failure(err.into()))
    }

    /// Crash recovery: shows `Restarting`, waits `delay`, then starts again.
    pub(crate) async fn restart_after_crash(
        &self,
        _lock: &OperationLock<'_>,
        delay: Duration,
    ) -> Result<(), OperationError> {
        let mut transition =
            Transition::new(self, InstanceStatus::Restarting, InstanceStatus::Stopped);
        self.state.clear_response(self.guid());
        tokio::time::sleep(delay).await;

        transition.enter(InstanceStatus::Starting);
        self.launch(transition).await
    }

    /// Settles a server whose process went away on its own.
    pub(crate) fn settle_stopped(&self, _lock: &OperationLock<'_>) {
        self.state.clear_response(self.guid());
        self.set_status(InstanceStatus::Stopped);
    }

    /// Kills a live process and frees its console session.
    pub async fn release(&self) {
        self.process.release().await;
    }
}

use futures::future;
use gsm_protocol::management::instance::{InstanceReport, InstanceStatus, Operation};
use gsm_protocol::management::VersionSnapshot;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::management::backup::BackupProvider;
use crate::management::comm::ProcessExit;
use crate::management::error::OperationError;
use crate::management::instance::ServerInstance;
use crate::management::mods::{ModRegistry, ServerMod};
use crate::management::registry::{Registry, RegistryEvent};
use crate::management::variant::GameVariant;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub version_interval: Duration,
    pub query_interval: Duration,
    pub crash_restart_delay: Duration,
    /// Root under which new instances get `<guid>` directories.
    pub servers_dir: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            version_interval: Duration::from_secs(300),
            query_interval: Duration::from_secs(10),
            crash_restart_delay: Duration::from_secs(5),
            servers_dir: PathBuf::from("servers"),
        }
    }
}

/// Owns the registry and drives the background loops and crash recovery around it.
pub struct Orchestrator {
    registry: Arc<Registry>,
    mods: ModRegistry,
    backup: Arc<dyn BackupProvider>,
    settings: OrchestratorSettings,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        mods: ModRegistry,
        backup: Arc<dyn BackupProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            mods,
            backup,
            settings,
            tasks: Mutex::new(vec![]),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Loads the persisted instances, then starts the loops and auto-start.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        for instance in self.registry.load()? {
            self.watch_exits(&instance);
        }

        let version_loop = self.spawn_loop(self.settings.version_interval, |this| async move {
            this.refresh_versions().await
        });
        let query_loop = self.spawn_loop(self.settings.query_interval, |this| async move {
            this.poll().await
        });
        self.track(version_loop);
        self.track(query_loop);

        let this = self.clone();
        tokio::spawn(async move { this.auto_start().await });
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Fires `tick` every `period`, the first one immediately. Ticks never wait on each other.
    fn spawn_loop<F, Fut>(self: &Arc<Self>, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                tokio::spawn(tick(this));
            }
        })
    }

    /// Version discovery tick: one snapshot per game type and mod in use, then auto-update.
    pub async fn refresh_versions(&self) {
        let mut variants: BTreeMap<String, Arc<dyn GameVariant>> = BTreeMap::new();
        let mut mods: BTreeMap<String, Arc<dyn ServerMod>> = BTreeMap::new();
        for instance in self.registry.instances() {
            let variant = instance.variant();
            for name in variant.mods() {
                if let Ok(server_mod) = self.mods.get(name) {
                    mods.insert(name.to_string(), server_mod);
                }
            }
            variants
                .entry(variant.class_name().to_owned())
                .or_insert_with(|| variant.clone());
        }
        info!(
            "Checking versions of {} server type(s) and {} mod(s)...",
            variants.len(),
            mods.len()
        );

        let mut tasks = JoinSet::new();
        for (class_name, variant) in variants {
            let state = self.registry.state().clone();
            tasks.spawn(async move {
                match variant.versions().await {
                    Ok(snapshot) => {
                        log_snapshot(&class_name, &snapshot);
                        state.set_version(&class_name, snapshot);
                    }
                    Err(err) => error!("[{}] Failed to fetch versions: {:#}", class_name, err),
                }
            });
        }
        for (name, server_mod) in mods {
            let state = self.registry.state().clone();
            tasks.spawn(async move {
                match server_mod.versions().await {
                    Ok(snapshot) => {
                        log_snapshot(&name, &snapshot);
                        state.set_mod_version(&name, snapshot);
                    }
                    Err(err) => error!("[{}] Failed to fetch versions: {:#}", name, err),
                }
            });
        }
        join_tasks(tasks).await;

        self.auto_update().await;
        info!("Version check finished");
    }

    /// Updates and restarts every running instance that opted in and is behind.
    pub async fn auto_update(&self) {
        let eligible: Vec<_> = self
            .registry
            .instances()
            .into_iter()
            .filter(|instance| {
                instance.status() == InstanceStatus::Started
                    && instance.config().advanced.auto_update_and_restart
                    && instance.is_update_available()
            })
            .collect();
        if eligible.is_empty() {
            return;
        }
        info!("Auto updating {} server(s)...", eligible.len());

        let mut tasks = JoinSet::new();
        for instance in eligible {
            tasks.spawn(async move {
                if let Err(err) = Self::update_and_restart(&instance).await {
                    error!("[{}] Auto update failed: {}", instance.name(), err);
                }
            });
        }
        join_tasks(tasks).await;
    }

    async fn update_and_restart(instance: &ServerInstance) -> Result<(), OperationError> {
        let Some(version) = instance.latest_version() else {
            return Ok(());
        };
        let lock = instance.lock()?;
        info!(
            "[{}] Auto update and restart... ({} => {})",
            instance.name(),
            instance.config().local_version,
            version
        );
        instance.stop_locked(&lock).await?;
        instance.update_locked(&lock, &version).await?;
        instance.start_locked(&lock).await?;
        info!("[{}] Auto update and restart finished", instance.name());
        Ok(())
    }

    /// Live poll tick: queries every started instance that has a query endpoint.
    pub async fn poll(&self) {
        let eligible: Vec<_> = self
            .registry
            .instances()
            .into_iter()
            .filter(|instance| {
                instance.status() == InstanceStatus::Started && instance.is_queryable()
            })
            .collect();
        debug!("Querying {} server(s)...", eligible.len());

        let mut tasks = JoinSet::new();
        for instance in eligible {
            tasks.spawn(async move {
                instance.query().await;
            });
        }
        join_tasks(tasks).await;
    }

    /// Starts every stopped instance flagged for auto-start.
    pub async fn auto_start(&self) {
        let mut tasks = JoinSet::new();
        for instance in self.registry.instances() {
            if instance.status() != InstanceStatus::Stopped || !instance.config().advanced.auto_start
            {
                continue;
            }
            tasks.spawn(async move {
                info!("[{}] Auto starting...", instance.name());
                if let Err(err) = instance.start().await {
                    error!("[{}] Auto start failed: {}", instance.name(), err);
                }
            });
        }
        join_tasks(tasks).await;
    }

    fn watch_exits(&self, instance: &Arc<ServerInstance>) {
        let mut exits = instance.exits();
        let instance = Arc::downgrade(instance);
        let delay = self.settings.crash_restart_delay;
        self.track(tokio::spawn(async move {
            loop {
                let exit = match exits.recv().await {
                    Ok(exit) => exit,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Some(instance) = instance.upgrade() else {
                    break;
                };
                Self::handle_exit(&instance, exit, delay).await;
            }
        }));
    }

    /// Crash recovery. Waits out any running operation, then acts only if the exited
    /// process is still the instance's current one and the instance still looks started.
    async fn handle_exit(instance: &ServerInstance, exit: ProcessExit, delay: Duration) {
        let ProcessExit { pid, code } = exit;
        let lock = instance.lock_wait().await;
        if instance.process().last_pid() != Some(pid) {
            debug!("[{}] Stale exit of pid {} ignored", instance.name(), pid);
            return;
        }
        if instance.status() != InstanceStatus::Started || instance.process().is_running() {
            debug!("[{}] Exit of pid {} was expected ({})", instance.name(), pid, code);
            return;
        }

        if instance.config().advanced.restart_on_crash {
            warn!(
                "[{}] Server crashed (exit code {}), restarting in {}s...",
                instance.name(),
                code,
                delay.as_secs_f32()
            );
            if let Err(err) = instance.restart_after_crash(&lock, delay).await {
                error!("[{}] Restart after crash failed: {}", instance.name(), err);
            }
        } else {
            warn!("[{}] Server exited (exit code {})", instance.name(), code);
            instance.settle_stopped(&lock);
        }
    }

    /// A fresh `NotInstalled` instance built from the variant defaults. Not registered yet.
    pub fn create(
        &self,
        class_name: &str,
        name: Option<String>,
    ) -> Result<Arc<ServerInstance>, OperationError> {
        let variant = self.registry.variants().create(class_name)?;
        let guid = Uuid::new_v4();
        let name = name.unwrap_or_else(|| format!("GSM - Server #{}", self.registry.len() + 1));
        let directory = self.settings.servers_dir.join(guid.to_string());
        let config = variant.default_config(guid, name, directory);
        Ok(Arc::new(ServerInstance::new(
            variant,
            config,
            self.registry.state().clone(),
        )))
    }

    /// Registers `instance` and installs `version` into it.
    pub async fn install(
        &self,
        instance: &Arc<ServerInstance>,
        version: &str,
    ) -> Result<(), OperationError> {
        let status = instance.status();
        if !status.permits(Operation::Install) {
            return Err(OperationError::Disabled {
                operation: Operation::Install,
                status,
            });
        }
        if self.registry.add(instance.clone()) {
            self.watch_exits(instance);
        }
        instance.install(version).await
    }

    pub async fn delete(&self, guid: Uuid) -> Result<(), OperationError> {
        let instance = self.registry.get(guid)?;
        instance.delete().await?;
        self.registry.remove(guid);
        Ok(())
    }

    pub async fn start_instance(&self, guid: Uuid) -> Result<(), OperationError> {
        self.registry.get(guid)?.start().await
    }

    pub async fn stop_instance(&self, guid: Uuid) -> Result<(), OperationError> {
        self.registry.get(guid)?.stop().await
    }

    pub async fn restart_instance(&self, guid: Uuid) -> Result<(), OperationError> {
        self.registry.get(guid)?.restart().await
    }

    pub async fn kill_instance(&self, guid: Uuid) -> Result<(), OperationError> {
        self.registry.get(guid)?.kill().await
    }

    pub async fn update_instance(&self, guid: Uuid, version: &str) -> Result<(), OperationError> {
        self.registry.get(guid)?.update(version).await
    }

    pub async fn backup_instance(&self, guid: Uuid) -> Result<(), OperationError> {
        self.registry.get(guid)?.backup(self.backup.as_ref()).await
    }

    pub async fn restore_instance(&self, guid: Uuid, backup: &str) -> Result<(), OperationError> {
        self.registry
            .get(guid)?
            .restore(self.backup.as_ref(), backup)
            .await
    }

    pub async fn install_mod(
        &self,
        guid: Uuid,
        mod_name: &str,
        version: &str,
    ) -> Result<(), OperationError> {
        let instance = self.registry.get(guid)?;
        let server_mod = self.mods.get(mod_name)?;
        instance.install_mod(server_mod.as_ref(), version).await
    }

    pub async fn update_mod(
        &self,
        guid: Uuid,
        mod_name: &str,
        version: &str,
    ) -> Result<(), OperationError> {
        let instance = self.registry.get(guid)?;
        let server_mod = self.mods.get(mod_name)?;
        instance.update_mod(server_mod.as_ref(), version).await
    }

    pub async fn delete_mod(&self, guid: Uuid, mod_name: &str) -> Result<(), OperationError> {
        let instance = self.registry.get(guid)?;
        let server_mod = self.mods.get(mod_name)?;
        instance.delete_mod(server_mod.as_ref()).await
    }

    pub async fn send_command(&self, guid: Uuid, command: &str) -> Result<(), OperationError> {
        self.registry.get(guid)?.send_command(command).await
    }

    pub fn mod_versions(&self, mod_name: &str) -> Option<VersionSnapshot> {
        self.registry.state().mod_version(mod_name)
    }

    pub fn report(&self, guid: Uuid) -> Result<InstanceReport, OperationError> {
        Ok(self.registry.get(guid)?.report())
    }

    pub fn reports(&self) -> Vec<InstanceReport> {
        self.registry
            .instances()
            .iter()
            .map(|instance| instance.report())
            .collect()
    }

    /// Stops the loops and watchers, then frees every live process.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        let instances = self.registry.instances();
        future::join_all(instances.iter().map(|instance| instance.release())).await;
        info!("All servers released");
    }
}

fn log_snapshot(name: &str, snapshot: &VersionSnapshot) {
    match snapshot.latest(None) {
        Some(latest) => info!("[{}] Latest version: {}", name, latest),
        None => warn!("[{}] No version published", name),
    }
}

/// Drains a fan-out, logging items that panicked without touching the others.
async fn join_tasks(mut tasks: JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            if err.is_panic() {
                error!("background task panicked: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::backup::NoBackup;
    use crate::management::installer::SteamCmd;
    use crate::management::query::SourceQuery;
    use crate::management::variant::fake::FakeVariant;
    use crate::management::variant::{BranchIndex, VariantContext, VariantRegistry};
    use crate::storage::InstanceRecords;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn orchestrator(dir: &Path, fake: Arc<FakeVariant>) -> Arc<Orchestrator> {
        let context = VariantContext {
            steamcmd: Arc::new(SteamCmd::new("steamcmd")),
            branches: Arc::new(BranchIndex::new("http://127.0.0.1:9/")),
            query: Arc::new(SourceQuery::default()),
        };
        let mut variants = VariantRegistry::new(context);
        variants.register(FakeVariant::CLASS_NAME, move |_| fake.clone() as Arc<dyn GameVariant>);
        let registry = Registry::new(InstanceRecords::new(dir.join("data")), variants);
        let settings = OrchestratorSettings {
            crash_restart_delay: Duration::from_millis(200),
            servers_dir: dir.join("servers"),
            ..OrchestratorSettings::default()
        };
        Arc::new(Orchestrator::new(
            registry,
            ModRegistry::new(),
            Arc::new(NoBackup),
            settings,
        ))
    }

    async fn installed(orchestrator: &Orchestrator, name: &str) -> Arc<ServerInstance> {
        let instance = orchestrator
            .create(FakeVariant::CLASS_NAME, Some(name.to_owned()))
            .unwrap();
        orchestrator.install(&instance, "1").await.unwrap();
        instance
    }

    #[tokio::test]
    async fn create_uses_defaults_and_install_registers() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::new(FakeVariant::default()));

        let instance = orchestrator.create(FakeVariant::CLASS_NAME, None).unwrap();
        assert_eq!(instance.name(), "GSM - Server #1");
        assert_eq!(
            instance.config().basic.directory,
            dir.path().join("servers").join(instance.guid().to_string())
        );
        assert_eq!(instance.status(), InstanceStatus::NotInstalled);
        assert!(orchestrator.registry().is_empty());
        assert!(matches!(
            orchestrator.create("Terraria", None),
            Err(OperationError::UnknownVariant(_))
        ));

        orchestrator.install(&instance, "1").await.unwrap();
        assert!(orchestrator.registry().contains(instance.guid()));
        assert_eq!(orchestrator.reports()[0].config.local_version, "1");
        assert!(matches!(
            orchestrator.install(&instance, "2").await,
            Err(OperationError::Disabled { .. })
        ));
    }

    #[tokio::test]
    async fn delete_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::new(FakeVariant::default()));
        let instance = installed(&orchestrator, "a").await;
        let mut events = orchestrator.subscribe();

        orchestrator.delete(instance.guid()).await.unwrap();

        assert!(!orchestrator.registry().contains(instance.guid()));
        assert!(matches!(
            orchestrator.start_instance(instance.guid()).await,
            Err(OperationError::NotFound(_))
        ));
        let mut removed = false;
        while let Ok(event) = events.try_recv() {
            removed |= event == RegistryEvent::InstanceRemoved(instance.guid());
        }
        assert!(removed);
    }

    #[tokio::test]
    async fn refresh_stores_snapshots_per_type() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeVariant::default().with_versions(&["5", "4"]));
        let orchestrator = orchestrator(dir.path(), fake);
        let instance = installed(&orchestrator, "a").await;

        orchestrator.refresh_versions().await;

        let snapshot = orchestrator
            .registry()
            .state()
            .version(FakeVariant::CLASS_NAME)
            .unwrap();
        assert_eq!(snapshot.latest(None), Some("5"));
        assert!(instance.is_update_available());
        // not started, so auto-update leaves it alone
        assert_eq!(instance.config().local_version, "1");
    }

    #[tokio::test]
    async fn unknown_mod_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::new(FakeVariant::default()));
        let instance = installed(&orchestrator, "a").await;

        assert!(matches!(
            orchestrator.install_mod(instance.guid(), "SourceMod", "1.11").await,
            Err(OperationError::UnknownMod(_))
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        async fn wait_for(instance: &ServerInstance, status: InstanceStatus) {
            let mut watch = instance.watch_status();
            tokio::time::timeout(Duration::from_secs(10), watch.wait_for(|s| *s == status))
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn poll_only_queries_started_instances() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::with_query());
            let query = fake.query.clone().unwrap();
            let orchestrator = orchestrator(dir.path(), fake);
            let instance = installed(&orchestrator, "a").await;

            orchestrator.poll().await;
            assert_eq!(query.calls.load(Ordering::SeqCst), 0);

            instance.start().await.unwrap();
            let after_start = query.calls.load(Ordering::SeqCst);
            orchestrator.poll().await;
            assert_eq!(query.calls.load(Ordering::SeqCst), after_start + 1);

            orchestrator.shutdown().await;
        }

        #[tokio::test]
        async fn crash_with_restart_enabled_starts_once_more() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            let mut config = instance.config();
            config.advanced.restart_on_crash = true;
            instance.update_config(config).unwrap();
            instance.start().await.unwrap();

            let mut events = orchestrator.subscribe();
            instance.process().kill().unwrap();
            wait_for(&instance, InstanceStatus::Restarting).await;
            wait_for(&instance, InstanceStatus::Started).await;

            let mut statuses = vec![];
            while let Ok(event) = events.try_recv() {
                if let RegistryEvent::StatusChanged { status, .. } = event {
                    statuses.push(status);
                }
            }
            assert_eq!(
                statuses,
                vec![
                    InstanceStatus::Restarting,
                    InstanceStatus::Starting,
                    InstanceStatus::Started,
                ]
            );
            assert_eq!(fake.starts.load(Ordering::SeqCst), 2);

            orchestrator.shutdown().await;
        }

        #[tokio::test]
        async fn crash_without_restart_settles_stopped() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            instance.start().await.unwrap();

            instance.process().kill().unwrap();
            wait_for(&instance, InstanceStatus::Stopped).await;
            assert_eq!(fake.starts.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn exit_during_an_operation_is_handled_afterwards() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            instance.start().await.unwrap();

            let lock = instance.lock().unwrap();
            instance.process().kill().unwrap();
            assert!(instance.process().wait_for_exit(Some(Duration::from_secs(5))).await);
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(instance.status(), InstanceStatus::Started);
            drop(lock);

            wait_for(&instance, InstanceStatus::Stopped).await;
            assert_eq!(fake.starts.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn exit_of_a_replaced_process_is_ignored() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            let mut config = instance.config();
            config.advanced.restart_on_crash = true;
            instance.update_config(config).unwrap();
            instance.start().await.unwrap();
            let first = instance.process().pid().unwrap();

            let lock = instance.lock().unwrap();
            instance.process().kill().unwrap();
            assert!(instance.process().wait_for_exit(Some(Duration::from_secs(5))).await);
            instance
                .restart_after_crash(&lock, Duration::from_millis(10))
                .await
                .unwrap();
            drop(lock);
            tokio::time::sleep(Duration::from_millis(500)).await;

            assert_eq!(instance.status(), InstanceStatus::Started);
            assert_ne!(instance.process().pid(), Some(first));
            assert_eq!(fake.starts.load(Ordering::SeqCst), 2);

            orchestrator.shutdown().await;
        }

        #[tokio::test]
        async fn failed_crash_restart_settles_stopped() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            let mut config = instance.config();
            config.advanced.restart_on_crash = true;
            instance.update_config(config).unwrap();
            instance.start().await.unwrap();

            fake.fail_start.store(true, Ordering::SeqCst);
            let mut events = orchestrator.subscribe();
            instance.process().kill().unwrap();
            wait_for(&instance, InstanceStatus::Restarting).await;
            wait_for(&instance, InstanceStatus::Stopped).await;

            let mut statuses = vec![];
            while let Ok(event) = events.try_recv() {
                if let RegistryEvent::StatusChanged { status, .. } = event {
                    statuses.push(status);
                }
            }
            assert_eq!(
                statuses,
                vec![
                    InstanceStatus::Restarting,
                    InstanceStatus::Starting,
                    InstanceStatus::Stopped,
                ]
            );
            assert_eq!(fake.starts.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn solicited_stop_is_not_a_crash() {
            let dir = tempfile::tempdir().unwrap();
            let fake = Arc::new(FakeVariant::default());
            let orchestrator = orchestrator(dir.path(), fake.clone());
            let instance = installed(&orchestrator, "a").await;
            let mut config = instance.config();
            config.advanced.restart_on_crash = true;
            instance.update_config(config).unwrap();

            instance.start().await.unwrap();
            instance.stop().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;

            assert_eq!(instance.status(), InstanceStatus::Stopped);
            assert_eq!(fake.starts.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn auto_update_touches_only_eligible_instances() {
            let dir = tempfile::tempdir().unwrap();
            let orchestrator = orchestrator(dir.path(), Arc::new(FakeVariant::default()));

            let opted_in = installed(&orchestrator, "opted-in").await;
            let stopped = installed(&orchestrator, "stopped").await;
            let manual = installed(&orchestrator, "manual").await;
            for instance in [&opted_in, &stopped] {
                let mut config = instance.config();
                config.advanced.auto_update_and_restart = true;
                instance.update_config(config).unwrap();
            }
            opted_in.start().await.unwrap();
            manual.start().await.unwrap();

            let state = orchestrator.registry().state();
            state.set_version(FakeVariant::CLASS_NAME, VersionSnapshot::new(vec!["2".into()]));
            orchestrator.auto_update().await;

            assert_eq!(opted_in.config().local_version, "2");
            assert_eq!(opted_in.status(), InstanceStatus::Started);
            assert_eq!(stopped.config().local_version, "1");
            assert_eq!(stopped.status(), InstanceStatus::Stopped);
            assert_eq!(manual.config().local_version, "1");
            assert_eq!(manual.status(), InstanceStatus::Started);

            orchestrator.shutdown().await;
        }
    }
}

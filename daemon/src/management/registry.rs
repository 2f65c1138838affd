use gsm_protocol::management::instance::{InstanceStatus, QueryResponse};
use gsm_protocol::management::VersionSnapshot;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::management::error::OperationError;
use crate::management::instance::ServerInstance;
use crate::management::variant::VariantRegistry;
use crate::storage::InstanceRecords;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    InstanceAdded(Uuid),
    InstanceRemoved(Uuid),
    StatusChanged { guid: Uuid, status: InstanceStatus },
    /// The cached query response was replaced or dropped.
    ResponseUpdated(Uuid),
}

/// Records, version snapshots and live responses shared by the registry and its instances.
pub struct RegistryState {
    records: InstanceRecords,
    versions: scc::HashMap<String, VersionSnapshot, ahash::RandomState>,
    mod_versions: scc::HashMap<String, VersionSnapshot, ahash::RandomState>,
    responses: scc::HashMap<Uuid, QueryResponse, ahash::RandomState>,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistryState {
    pub fn new(records: InstanceRecords) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            records,
            versions: scc::HashMap::default(),
            mod_versions: scc::HashMap::default(),
            responses: scc::HashMap::default(),
            events,
        }
    }

    pub fn records(&self) -> &InstanceRecords {
        &self.records
    }

    /// Snapshot for a game type, keyed by class name.
    pub fn version(&self, class_name: &str) -> Option<VersionSnapshot> {
        self.versions.read(class_name, |_, v| v.clone())
    }

    pub fn set_version(&self, class_name: &str, snapshot: VersionSnapshot) {
        let _ = self.versions.upsert(class_name.to_owned(), snapshot);
    }

    pub fn mod_version(&self, name: &str) -> Option<VersionSnapshot> {
        self.mod_versions.read(name, |_, v| v.clone())
    }

    pub fn set_mod_version(&self, name: &str, snapshot: VersionSnapshot) {
        let _ = self.mod_versions.upsert(name.to_owned(), snapshot);
    }

    pub fn response(&self, guid: Uuid) -> Option<QueryResponse> {
        self.responses.read(&guid, |_, v| v.clone())
    }

    pub fn set_response(&self, guid: Uuid, response: QueryResponse) {
        let _ = self.responses.upsert(guid, response);
        self.emit(RegistryEvent::ResponseUpdated(guid));
    }

    pub fn clear_response(&self, guid: Uuid) {
        if self.responses.remove(&guid).is_some() {
            self.emit(RegistryEvent::ResponseUpdated(guid));
        }
    }

    pub fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

/// Every known server instance, in display order.
pub struct Registry {
    state: Arc<RegistryState>,
    variants: VariantRegistry,
    instances: scc::HashMap<Uuid, Arc<ServerInstance>, ahash::RandomState>,
    order: Mutex<Vec<Uuid>>,
}

impl Registry {
    pub fn new(records: InstanceRecords, variants: VariantRegistry) -> Self {
        Self {
            state: Arc::new(RegistryState::new(records)),
            variants,
            instances: scc::HashMap::default(),
            order: Mutex::new(vec![]),
        }
    }

    pub fn state(&self) -> &Arc<RegistryState> {
        &self.state
    }

    pub fn variants(&self) -> &VariantRegistry {
        &self.variants
    }

    /// Rebuilds the registry from the persisted records and returns the loaded instances.
    pub fn load(&self) -> anyhow::Result<Vec<Arc<ServerInstance>>> {
        let mut loaded = vec![];
        for config in self.state.records().load_all()? {
            let guid = config.guid();
            match self.build(config) {
                Ok(instance) => {
                    if self.insert(instance.clone()) {
                        loaded.push(instance);
                    }
                }
                Err(err) => warn!("instance {} ignored: {}", guid, err),
            }
        }
        self.save_order();
        info!("{} server instance(s) loaded", loaded.len());
        Ok(loaded)
    }

    /// Wraps a config in an instance of its variant without registering it.
    pub fn build(
        &self,
        config: gsm_protocol::management::instance::InstanceConfig,
    ) -> Result<Arc<ServerInstance>, OperationError> {
        let variant = self.variants.create(config.class_name())?;
        Ok(Arc::new(ServerInstance::new(
            variant,
            config,
            self.state.clone(),
        )))
    }

    fn insert(&self, instance: Arc<ServerInstance>) -> bool {
        let guid = instance.guid();
        if self.instances.insert(guid, instance).is_err() {
            return false;
        }
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(guid);
        debug!("instance {} added", guid);
        self.state.emit(RegistryEvent::InstanceAdded(guid));
        true
    }

    /// Registers `instance` and rewrites the order file. Returns false if it was already known.
    pub fn add(&self, instance: Arc<ServerInstance>) -> bool {
        let added = self.insert(instance);
        if added {
            self.save_order();
        }
        added
    }

    pub fn remove(&self, guid: Uuid) -> Option<Arc<ServerInstance>> {
        let (_, instance) = self.instances.remove(&guid)?;
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|known| *known != guid);
        self.save_order();
        self.state.clear_response(guid);
        debug!("instance {} removed", guid);
        self.state.emit(RegistryEvent::InstanceRemoved(guid));
        Some(instance)
    }

    pub fn get(&self, guid: Uuid) -> Result<Arc<ServerInstance>, OperationError> {
        self.instances
            .read(&guid, |_, v| Arc::clone(v))
            .ok_or(OperationError::NotFound(guid))
    }

    pub fn contains(&self, guid: Uuid) -> bool {
        self.instances.contains(&guid)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> Vec<Arc<ServerInstance>> {
        let order = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        order
            .into_iter()
            .filter_map(|guid| self.get(guid).ok())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.state.subscribe()
    }

    fn save_order(&self) {
        let order = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(err) = self.state.records().save_order(&order) {
            warn!("failed to save servers order: {:#}", err);
        }
    }
}

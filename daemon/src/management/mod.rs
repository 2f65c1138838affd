pub mod backup;
pub mod channel;
pub mod comm;
pub mod error;
pub mod installer;
pub mod instance;
pub mod mods;
pub mod orchestrator;
pub mod query;
pub mod registry;
pub mod variant;
pub mod version;

pub use error::{OperationError, ProcessError};
pub use instance::ServerInstance;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use registry::{Registry, RegistryEvent};

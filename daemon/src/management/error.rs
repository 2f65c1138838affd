use crate::management::channel::ChannelError;
use gsm_protocol::management::instance::{ConsoleMode, InstanceStatus, Operation};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("{operation} is disabled while the server is {status}")]
    Disabled {
        operation: Operation,
        status: InstanceStatus,
    },
    #[error("another operation is in progress")]
    Busy,
    #[error("instance {0} not found")]
    NotFound(Uuid),
    #[error("unknown game server type: {0}")]
    UnknownVariant(String),
    #[error("unknown mod: {0}")]
    UnknownMod(String),
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process is not running")]
    NotRunning,
    #[error("process is already running")]
    AlreadyRunning,
    #[error("could not start process: {0}")]
    StartFailure(String),
    #[error("{0:?} console mode is not supported on this platform")]
    Unsupported(ConsoleMode),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

//! Request/reply control channel over a shared memory region.
//!
//! The controller writes a request into the region, signals "controller ready" and blocks until
//! the child signals "child ready", then reads the reply from the same region. Only one request
//! is ever in flight: the region lock is held for the whole rendezvous.

mod wire;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as sys;

use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub use wire::ChannelCommand;

pub const DEFAULT_BUFFER_SIZE: usize = 65536;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{0} was rejected by the child process")]
    Rejected(ChannelCommand),
    #[error("child process disconnected from the control channel")]
    Disconnected,
    #[error("request of {len} bytes does not fit into the {capacity} byte region")]
    Overflow { len: usize, capacity: usize },
    #[error("malformed reply: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct ControlChannel {
    region: Mutex<sys::Region>,
    link: sys::Link,
}

impl ControlChannel {
    pub fn new(capacity: usize) -> Result<Self, ChannelError> {
        let (region, link) = sys::create(capacity)?;
        Ok(Self {
            region: Mutex::new(region),
            link,
        })
    }

    /// Handle arguments the child expects ahead of its own command line.
    pub fn child_arguments(&self) -> Vec<String> {
        let [file, parent, child] = self.link.child_handles();
        vec![
            "-HFILE".to_owned(),
            file.to_string(),
            "-HPARENT".to_owned(),
            parent.to_string(),
            "-HCHILD".to_owned(),
            child.to_string(),
        ]
    }

    /// Makes the channel handles inheritable by the child spawned from `command`.
    pub fn configure(&self, command: &mut std::process::Command) {
        self.link.configure(command);
    }

    /// Releases the parent's copies of the child-side handles once the child is running.
    pub fn spawned(&self) {
        self.link.spawned();
    }

    /// Wakes any caller blocked on a rendezvous with a child that has exited.
    pub fn notify_exited(&self) {
        self.link.notify_exited();
    }

    pub fn write(&self, text: &str) -> Result<(), ChannelError> {
        let accepted = self.request(
            |region| wire::write_command_request(region, text),
            |region| Ok(wire::read_bool(region)),
        )?;
        accepted
            .then_some(())
            .ok_or(ChannelError::Rejected(ChannelCommand::WriteCommand))
    }

    pub fn get_screen_buffer(&self, start: i32, end: i32) -> Result<String, ChannelError> {
        self.request(
            |region| wire::write_words(region, &[ChannelCommand::GetScreenBuffer as i32, start, end]),
            |region| {
                if !wire::read_bool(region) {
                    return Err(ChannelError::Rejected(ChannelCommand::GetScreenBuffer));
                }
                Ok(wire::read_screen_text(region))
            },
        )
    }

    /// Number of lines in the child's screen buffer.
    pub fn get_screen_buffer_size(&self) -> Result<i32, ChannelError> {
        self.request(
            |region| wire::write_words(region, &[ChannelCommand::GetScreenBufferSize as i32]),
            |region| {
                if wire::read_word(region, 0)? != 1 {
                    return Err(ChannelError::Rejected(ChannelCommand::GetScreenBufferSize));
                }
                wire::read_word(region, 1)
            },
        )
    }

    pub fn set_screen_buffer_size(&self, size: i32) -> Result<(), ChannelError> {
        self.request(
            |region| {
                wire::write_words(region, &[ChannelCommand::SetScreenBufferSize as i32, size])
            },
            |region| {
                if wire::read_word(region, 0)? != 1 {
                    return Err(ChannelError::Rejected(ChannelCommand::SetScreenBufferSize));
                }
                Ok(())
            },
        )
    }

    fn request<T>(
        &self,
        fill: impl FnOnce(&mut [u8]) -> Result<(), ChannelError>,
        read: impl FnOnce(&[u8]) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        let mut region = self.region.lock().unwrap_or_else(PoisonError::into_inner);
        fill(region.as_mut_slice())?;
        self.link.signal_and_wait()?;
        read(region.as_slice())
    }
}

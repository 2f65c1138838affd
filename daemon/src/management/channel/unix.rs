use super::ChannelError;
use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::sync::{Mutex, PoisonError};

/// Shared segment backed by an unlinked temporary file.
pub struct Region {
    // keeps the descriptor passed as -HFILE open
    #[cfg_attr(not(test), allow(dead_code))]
    file: File,
    map: MmapMut,
}

impl Region {
    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    #[cfg(test)]
    pub fn file(&self) -> &File {
        &self.file
    }
}

/// "controller ready" and "child ready" as two pipes. A closed child end reads as EOF.
pub struct Link {
    controller_ready: File,
    child_ready: File,
    // [controller ready read end, child ready write end], held until the child is spawned
    child_ends: Mutex<Option<[OwnedFd; 2]>>,
    handles: [RawFd; 3],
}

pub fn create(capacity: usize) -> Result<(Region, Link), ChannelError> {
    let file = tempfile::tempfile()?;
    file.set_len(capacity as u64)?;
    // SAFETY: the file is private to this process and its child, and never truncated
    let map = unsafe { MmapMut::map_mut(&file)? };

    let (controller_read, controller_write) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;
    let (child_read, child_write) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;

    let handles = [
        file.as_raw_fd(),
        controller_read.as_raw_fd(),
        child_write.as_raw_fd(),
    ];
    let link = Link {
        controller_ready: File::from(controller_write),
        child_ready: File::from(child_read),
        child_ends: Mutex::new(Some([controller_read, child_write])),
        handles,
    };
    Ok((Region { file, map }, link))
}

impl Link {
    pub fn child_handles(&self) -> [i64; 3] {
        self.handles.map(i64::from)
    }

    pub fn configure(&self, command: &mut std::process::Command) {
        let handles = self.handles;
        // SAFETY: only async-signal-safe fcntl calls run between fork and exec
        unsafe {
            command.pre_exec(move || {
                for fd in handles {
                    if nix::libc::fcntl(fd, nix::libc::F_SETFD, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    pub fn spawned(&self) {
        self.child_ends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn notify_exited(&self) {
        // the exiting child closes its pipe ends, which already wakes a blocked reader
    }

    pub fn signal_and_wait(&self) -> Result<(), ChannelError> {
        (&self.controller_ready)
            .write_all(&[1])
            .map_err(disconnected)?;

        let mut byte = [0u8; 1];
        loop {
            match (&self.child_ready).read(&mut byte) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(disconnected(err)),
            }
        }
    }

    #[cfg(test)]
    pub fn test_peer(&self, file: &File) -> io::Result<Peer> {
        let ends = self.child_ends.lock().unwrap();
        let [controller_read, child_write] = ends.as_ref().expect("channel already spawned");
        Ok(Peer {
            // SAFETY: test-only second view of the same segment
            map: unsafe { MmapMut::map_mut(file)? },
            wait: File::from(controller_read.try_clone()?),
            reply: File::from(child_write.try_clone()?),
        })
    }
}

fn disconnected(err: io::Error) -> ChannelError {
    match err.kind() {
        io::ErrorKind::BrokenPipe => ChannelError::Disconnected,
        _ => ChannelError::Io(err),
    }
}

/// In-process stand-in for the cooperating child.
#[cfg(test)]
pub struct Peer {
    map: MmapMut,
    wait: File,
    reply: File,
}

#[cfg(test)]
impl Peer {
    pub fn serve<F: FnMut(&mut [u8])>(mut self, mut handler: F) {
        let mut byte = [0u8; 1];
        while let Ok(1) = self.wait.read(&mut byte) {
            handler(&mut self.map[..]);
            if self.reply.write_all(&[1]).is_err() {
                break;
            }
        }
    }
}

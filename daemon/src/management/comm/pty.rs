use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, OpenptyResult, Winsize};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::process::{ConsoleInput, Launched, OutputSink, ProcessStartInfo};
use crate::management::error::ProcessError;

const WINSIZE: Winsize = Winsize {
    ws_row: 50,
    ws_col: 120,
    ws_xpixel: 0,
    ws_ypixel: 0,
};

pub(super) fn spawn(info: &ProcessStartInfo, sink: OutputSink) -> Result<Launched, ProcessError> {
    let OpenptyResult { master, slave } = openpty(Some(&WINSIZE), None).map_err(io::Error::from)?;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;

    let mut command = info.command();
    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave));
    // SAFETY: setsid and ioctl are async-signal-safe
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    let spawned = command.spawn();
    // the command owns the parent's copies of the slave, close them so reads hit EOF on exit
    drop(command);
    let child = spawned.map_err(|err| info.start_failure(err))?;

    let reader = File::from_std(std::fs::File::from(master.try_clone()?));
    let writer = File::from_std(std::fs::File::from(master));
    tokio::spawn(forward_chunks(reader, sink));

    Ok(Launched {
        child,
        input: Box::new(PtyInput {
            writer: Mutex::new(writer),
        }),
    })
}

async fn forward_chunks(mut reader: File, sink: OutputSink) {
    let mut buffer = [0u8; 4096];
    // reading the master fails with EIO once every slave descriptor is closed
    while let Ok(read) = reader.read(&mut buffer).await {
        if read == 0 {
            break;
        }
        sink.chunk(String::from_utf8_lossy(&buffer[..read]).into_owned());
    }
}

struct PtyInput {
    writer: Mutex<File>,
}

#[async_trait]
impl ConsoleInput for PtyInput {
    async fn write(&self, text: &str) -> Result<(), ProcessError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn write_line(&self, text: &str) -> Result<(), ProcessError> {
        self.write(&format!("{}\r", text)).await
    }
}

use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::select;
use tokio::sync::Notify;
use tokio::task;

use super::process::{ConsoleInput, Launched, OutputSink, ProcessStartInfo};
use crate::management::channel::{ChannelError, ControlChannel, DEFAULT_BUFFER_SIZE};
use crate::management::error::ProcessError;

const SCREEN_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub(super) fn spawn(info: &ProcessStartInfo, sink: OutputSink) -> Result<Launched, ProcessError> {
    let channel = Arc::new(ControlChannel::new(DEFAULT_BUFFER_SIZE)?);

    let mut command = std::process::Command::new(&info.target);
    command
        .args(channel.child_arguments())
        .args(&info.args)
        .current_dir(&info.working_dir)
        .envs(&info.envs)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    channel.configure(&mut command);

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    let spawned = command.spawn();
    drop(command);
    channel.spawned();
    let child = spawned.map_err(|err| info.start_failure(err))?;

    let stop = Arc::new(Notify::new());
    tokio::spawn(poll_screen(channel.clone(), sink, stop.clone()));

    Ok(Launched {
        child,
        input: Box::new(ChannelInput { channel, stop }),
    })
}

/// Mirrors the child's screen buffer into the captured output whenever it changes.
async fn poll_screen(channel: Arc<ControlChannel>, sink: OutputSink, stop: Arc<Notify>) {
    let mut screen = String::new();
    loop {
        select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(SCREEN_POLL_INTERVAL) => {}
        }

        let result = task::spawn_blocking({
            let channel = channel.clone();
            move || {
                let size = channel.get_screen_buffer_size()?;
                channel.get_screen_buffer(1, size - 2)
            }
        })
        .await;

        match result {
            Ok(Ok(text)) if text != screen => {
                screen.clone_from(&text);
                sink.replace(text);
            }
            Ok(Ok(_)) => {}
            Ok(Err(ChannelError::Disconnected)) | Err(_) => break,
            Ok(Err(err)) => debug!("screen buffer poll failed: {}", err),
        }
    }
}

struct ChannelInput {
    channel: Arc<ControlChannel>,
    stop: Arc<Notify>,
}

#[async_trait]
impl ConsoleInput for ChannelInput {
    async fn write(&self, text: &str) -> Result<(), ProcessError> {
        let channel = self.channel.clone();
        let text = text.to_owned();
        task::spawn_blocking(move || channel.write(&text))
            .await
            .map_err(|err| ProcessError::Io(std::io::Error::other(err)))??;
        Ok(())
    }

    /// The child executes each written command as a full line.
    async fn write_line(&self, text: &str) -> Result<(), ProcessError> {
        self.write(text).await
    }

    fn release(&self) {
        self.stop.notify_one();
        self.channel.notify_exited();
    }
}

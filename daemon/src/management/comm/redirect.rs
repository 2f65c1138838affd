use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Mutex;

use super::process::{ConsoleInput, Launched, OutputSink, ProcessStartInfo};
use crate::management::error::ProcessError;

pub(super) fn spawn(info: &ProcessStartInfo, sink: OutputSink) -> Result<Launched, ProcessError> {
    let mut command = info.command();
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let mut command = Command::from(command);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| info.start_failure(err))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, sink.clone(), ""));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, sink, "[STDERR] "));
    }

    let input = PipeInput {
        stdin: Mutex::new(child.stdin.take()),
    };
    Ok(Launched {
        child,
        input: Box::new(input),
    })
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, sink: OutputSink, prefix: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.line(format!("{}{}", prefix, line));
    }
}

struct PipeInput {
    stdin: Mutex<Option<ChildStdin>>,
}

#[async_trait]
impl ConsoleInput for PipeInput {
    async fn write(&self, text: &str) -> Result<(), ProcessError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(ProcessError::NotRunning)?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn release(&self) {
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
    }
}

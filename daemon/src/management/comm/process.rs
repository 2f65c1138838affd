use async_trait::async_trait;
use gsm_protocol::management::instance::ConsoleMode;
use log::{debug, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Child;
use tokio::select;
use tokio::sync::{broadcast, watch, Notify};

use crate::management::error::ProcessError;

/// Captured output kept per process, older text is dropped past this size.
const OUTPUT_LIMIT: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessStartInfo {
    pub target: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub envs: HashMap<OsString, OsString>,
}

impl ProcessStartInfo {
    pub fn new<T: Into<PathBuf>, W: Into<PathBuf>>(target: T, working_dir: W) -> Self {
        Self {
            target: target.into(),
            args: vec![],
            working_dir: working_dir.into(),
            envs: HashMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(super) fn command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.target);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.envs);
        command
    }

    pub(super) fn start_failure(&self, err: std::io::Error) -> ProcessError {
        ProcessError::StartFailure(format!("{}: {}", self.target.display(), err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(String),
    /// Captured output was reset.
    Cleared,
    Exited(i32),
}

/// One child's exit, tagged with its pid so a stale exit can be told from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub pid: u32,
    pub code: i32,
}

#[derive(Clone)]
pub(super) struct OutputSink {
    events: broadcast::Sender<ProcessEvent>,
    exits: broadcast::Sender<ProcessExit>,
    output: Arc<Mutex<String>>,
}

impl OutputSink {
    fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (exits, _) = broadcast::channel(8);
        Self {
            events,
            exits,
            output: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn line(&self, line: String) {
        self.append(&line);
        self.append("\n");
        let _ = self.events.send(ProcessEvent::Output(line));
    }

    pub fn chunk(&self, text: String) {
        self.append(&text);
        let _ = self.events.send(ProcessEvent::Output(text));
    }

    /// Replaces the captured output with `text`.
    pub fn replace(&self, text: String) {
        self.clear();
        self.chunk(text);
    }

    pub fn clear(&self) {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let _ = self.events.send(ProcessEvent::Cleared);
    }

    fn exited(&self, pid: u32, code: i32) {
        let _ = self.events.send(ProcessEvent::Exited(code));
        let _ = self.exits.send(ProcessExit { pid, code });
    }

    fn append(&self, text: &str) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.push_str(text);
        if output.len() > OUTPUT_LIMIT {
            let mut cut = output.len() - OUTPUT_LIMIT / 2;
            while !output.is_char_boundary(cut) {
                cut += 1;
            }
            output.drain(..cut);
        }
    }
}

/// Input side of a console strategy.
#[async_trait]
pub(super) trait ConsoleInput: Send + Sync {
    async fn write(&self, text: &str) -> Result<(), ProcessError>;

    async fn write_line(&self, text: &str) -> Result<(), ProcessError> {
        self.write(&format!("{}\n", text)).await
    }

    /// Called once after the child exited.
    fn release(&self) {}
}

pub(super) struct Launched {
    pub child: Child,
    pub input: Box<dyn ConsoleInput>,
}

struct Session {
    pid: u32,
    input: Arc<dyn ConsoleInput>,
    kill_notify: Arc<Notify>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl Session {
    fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }
}

/// Runs one child process at a time under a console strategy.
pub struct ProcessControl {
    session: Mutex<Option<Arc<Session>>>,
    sink: OutputSink,
}

impl Default for ProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            sink: OutputSink::new(),
        }
    }

    /// Launches the child and returns its pid once the OS reports it running.
    pub async fn start(
        &self,
        mode: ConsoleMode,
        info: ProcessStartInfo,
    ) -> Result<u32, ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning);
        }
        self.sink.clear();

        let Launched { mut child, input } = match mode {
            #[cfg(unix)]
            ConsoleMode::PseudoConsole => super::pty::spawn(&info, self.sink.clone())?,
            #[cfg(not(unix))]
            ConsoleMode::PseudoConsole => return Err(ProcessError::Unsupported(mode)),
            ConsoleMode::Redirect => super::redirect::spawn(&info, self.sink.clone())?,
            ConsoleMode::SharedMemory => super::shared::spawn(&info, self.sink.clone())?,
            ConsoleMode::Windowed => super::windowed::spawn(&info)?,
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let _ = child.wait().await;
                input.release();
                return Err(ProcessError::StartFailure(format!(
                    "{} exited before it could be observed",
                    info.target.display()
                )));
            }
        };
        debug!("process started: {} (pid={})", info.target.display(), pid);

        let input: Arc<dyn ConsoleInput> = Arc::from(input);
        let kill_notify = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(Self::monitor(
            child,
            pid,
            kill_notify.clone(),
            exit_tx,
            input.clone(),
            self.sink.clone(),
        ));

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(Session {
            pid,
            input,
            kill_notify,
            exit_rx,
        }));
        Ok(pid)
    }

    async fn monitor(
        mut child: Child,
        pid: u32,
        kill_notify: Arc<Notify>,
        exit_tx: watch::Sender<Option<i32>>,
        input: Arc<dyn ConsoleInput>,
        sink: OutputSink,
    ) {
        let status = select! {
            status = child.wait() => status,
            _ = kill_notify.notified() => {
                if let Err(err) = child.start_kill() {
                    warn!("Could not kill process (pid={}): {}", pid, err);
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => exit_code(status),
            Err(err) => {
                warn!("Could not wait for process (pid={}): {}", pid, err);
                -1
            }
        };
        debug!("process exited (pid={}, code={})", pid, code);

        input.release();
        let _ = exit_tx.send(Some(code));
        sink.exited(pid, code);
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn running(&self) -> Result<Arc<Session>, ProcessError> {
        self.current()
            .filter(|session| session.exit_code().is_none())
            .ok_or(ProcessError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_ok()
    }

    pub fn pid(&self) -> Option<u32> {
        self.running().ok().map(|session| session.pid)
    }

    /// Pid of the most recent process, whether or not it still runs.
    pub fn last_pid(&self) -> Option<u32> {
        self.current().map(|session| session.pid)
    }

    /// Exit code of the most recent process, `None` while it runs or before any start.
    pub fn exit_code(&self) -> Option<i32> {
        self.current().and_then(|session| session.exit_code())
    }

    pub fn kill(&self) -> Result<(), ProcessError> {
        self.running()?.kill_notify.notify_one();
        Ok(())
    }

    /// Returns whether the process exited within `timeout`; `None` waits indefinitely.
    pub async fn wait_for_exit(&self, timeout: Option<Duration>) -> bool {
        let Some(session) = self.current() else {
            return true;
        };
        let mut exit_rx = session.exit_rx.clone();
        let exited = async move { exit_rx.wait_for(Option::is_some).await.is_ok() };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exited).await.unwrap_or(false),
            None => exited.await,
        }
    }

    pub async fn write(&self, text: &str) -> Result<(), ProcessError> {
        let session = self.running()?;
        session.input.write(text).await
    }

    pub async fn write_line(&self, text: &str) -> Result<(), ProcessError> {
        let session = self.running()?;
        session.input.write_line(text).await
    }

    pub fn output(&self) -> String {
        self.sink
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.sink.events.subscribe()
    }

    /// Exits only, unaffected by output volume.
    pub fn exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.sink.exits.subscribe()
    }

    /// Force-terminates a live child and waits briefly for its session to wind down.
    pub async fn release(&self) {
        if self.kill().is_ok() && !self.wait_for_exit(Some(Duration::from_secs(5))).await {
            warn!("process (pid={:?}) did not exit after kill", self.pid());
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessStartInfo {
        ProcessStartInfo::new("/bin/sh", std::env::temp_dir()).args(["-c", script])
    }

    async fn next_exit(events: &mut broadcast::Receiver<ProcessEvent>) -> i32 {
        loop {
            match events.recv().await.unwrap() {
                ProcessEvent::Exited(code) => return code,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn redirect_captures_lines_and_exit_code() {
        let control = ProcessControl::new();
        let mut events = control.subscribe();
        let pid = control
            .start(ConsoleMode::Redirect, shell("echo hello; echo oops 1>&2; exit 3"))
            .await
            .unwrap();
        assert!(pid > 0);

        assert!(control.wait_for_exit(Some(Duration::from_secs(5))).await);
        assert_eq!(next_exit(&mut events).await, 3);
        assert_eq!(control.exit_code(), Some(3));
        assert!(!control.is_running());

        // readers may still be draining the pipes right after exit
        tokio::time::sleep(Duration::from_millis(100)).await;
        let output = control.output();
        assert!(output.contains("hello\n"));
        assert!(output.contains("[STDERR] oops\n"));
    }

    #[tokio::test]
    async fn exits_are_tagged_with_their_pid() {
        let control = ProcessControl::new();
        let mut exits = control.exits();

        let first = control.start(ConsoleMode::Redirect, shell("exit 1")).await.unwrap();
        assert_eq!(exits.recv().await.unwrap(), ProcessExit { pid: first, code: 1 });
        assert_eq!(control.last_pid(), Some(first));
        assert_eq!(control.pid(), None);

        let second = control.start(ConsoleMode::Redirect, shell("exit 2")).await.unwrap();
        assert_eq!(exits.recv().await.unwrap(), ProcessExit { pid: second, code: 2 });
        assert_eq!(control.last_pid(), Some(second));
    }

    #[tokio::test]
    async fn redirect_writes_to_stdin() {
        let control = ProcessControl::new();
        let mut events = control.subscribe();
        control
            .start(ConsoleMode::Redirect, shell("read line; echo \"got $line\""))
            .await
            .unwrap();
        control.write_line("quit").await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                ProcessEvent::Output(line) if line == "got quit" => break,
                ProcessEvent::Exited(code) => panic!("exited early with {code}"),
                _ => continue,
            }
        }
        assert!(control.wait_for_exit(Some(Duration::from_secs(5))).await);
    }

    #[tokio::test]
    async fn kill_fires_exited_once() {
        let control = ProcessControl::new();
        let mut events = control.subscribe();
        control
            .start(ConsoleMode::Redirect, shell("sleep 30"))
            .await
            .unwrap();
        assert!(!control.wait_for_exit(Some(Duration::from_millis(100))).await);
        assert!(matches!(
            control.start(ConsoleMode::Redirect, shell("true")).await,
            Err(ProcessError::AlreadyRunning)
        ));

        control.kill().unwrap();
        assert!(control.wait_for_exit(Some(Duration::from_secs(5))).await);
        assert_eq!(next_exit(&mut events).await, 128 + 9);

        let again = tokio::time::timeout(Duration::from_millis(200), next_exit(&mut events)).await;
        assert!(again.is_err());
        assert!(matches!(control.kill(), Err(ProcessError::NotRunning)));
    }

    #[tokio::test]
    async fn missing_target_is_start_failure() {
        let control = ProcessControl::new();
        let info = ProcessStartInfo::new("/nonexistent/server", std::env::temp_dir());
        assert!(matches!(
            control.start(ConsoleMode::Redirect, info).await,
            Err(ProcessError::StartFailure(_))
        ));
        assert!(control.wait_for_exit(Some(Duration::ZERO)).await);
    }

    #[tokio::test]
    async fn pseudo_console_streams_output() {
        let control = ProcessControl::new();
        control
            .start(ConsoleMode::PseudoConsole, shell("echo from-pty"))
            .await
            .unwrap();
        assert!(control.wait_for_exit(Some(Duration::from_secs(5))).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(control.output().contains("from-pty"));
        assert_eq!(control.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn start_clears_previous_output() {
        let control = ProcessControl::new();
        control
            .start(ConsoleMode::Redirect, shell("echo first"))
            .await
            .unwrap();
        control.wait_for_exit(None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut events = control.subscribe();
        control
            .start(ConsoleMode::Redirect, shell("echo second"))
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), ProcessEvent::Cleared);
        control.wait_for_exit(None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!control.output().contains("first"));
    }
}

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use super::process::{ConsoleInput, Launched, ProcessStartInfo};
use crate::management::error::ProcessError;

pub const VK_RETURN: u16 = 0x0D;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    /// WM_CHAR with one UTF-16 code unit.
    Char(u16),
    /// WM_KEYDOWN with a virtual key code.
    KeyDown(u16),
}

/// Keystroke messages that type `text` into a window.
///
/// Posting the same character twice in a row can be coalesced by the receiving window, so a
/// no-op key down separates adjacent duplicates.
pub fn keystrokes(text: &str, enter: bool) -> Vec<Keystroke> {
    let mut plan = Vec::with_capacity(text.len() + 1);
    let mut previous = None;
    for unit in text.encode_utf16() {
        if previous == Some(unit) {
            plan.push(Keystroke::KeyDown(0));
        }
        plan.push(Keystroke::Char(unit));
        previous = Some(unit);
    }
    if enter {
        plan.push(Keystroke::KeyDown(VK_RETURN));
    }
    plan
}

pub(super) fn spawn(info: &ProcessStartInfo) -> Result<Launched, ProcessError> {
    let mut command = info.command();
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
        command.creation_flags(CREATE_NEW_CONSOLE);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    let child = command.spawn().map_err(|err| info.start_failure(err))?;

    #[cfg(windows)]
    if let Some(pid) = child.id() {
        tokio::spawn(window::minimize_when_shown(pid));
    }

    let pid = child.id().unwrap_or_default();
    Ok(Launched {
        child,
        input: Box::new(WindowInput { pid }),
    })
}

struct WindowInput {
    pid: u32,
}

impl WindowInput {
    async fn post(&self, plan: Vec<Keystroke>) -> Result<(), ProcessError> {
        #[cfg(windows)]
        {
            let pid = self.pid;
            tokio::task::spawn_blocking(move || window::post(pid, &plan))
                .await
                .map_err(std::io::Error::other)??;
            Ok(())
        }
        #[cfg(not(windows))]
        {
            let _ = (self.pid, plan);
            Err(ProcessError::Unsupported(
                gsm_protocol::management::instance::ConsoleMode::Windowed,
            ))
        }
    }
}

#[async_trait]
impl ConsoleInput for WindowInput {
    async fn write(&self, text: &str) -> Result<(), ProcessError> {
        self.post(keystrokes(text, false)).await
    }

    async fn write_line(&self, text: &str) -> Result<(), ProcessError> {
        self.post(keystrokes(text, true)).await
    }
}

#[cfg(windows)]
mod window {
    use super::Keystroke;
    use std::io;
    use std::time::Duration;
    use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPARAM, TRUE, WPARAM};
    use winapi::shared::windef::HWND;
    use winapi::um::winuser::{
        EnumWindows, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, ShowWindow,
        SW_MINIMIZE, WM_CHAR, WM_KEYDOWN,
    };

    struct Search {
        pid: DWORD,
        found: HWND,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut Search);
        let mut owner: DWORD = 0;
        GetWindowThreadProcessId(hwnd, &mut owner);
        if owner == search.pid && IsWindowVisible(hwnd) != 0 {
            search.found = hwnd;
            return FALSE;
        }
        TRUE
    }

    fn find(pid: u32) -> Option<HWND> {
        let mut search = Search {
            pid,
            found: std::ptr::null_mut(),
        };
        unsafe { EnumWindows(Some(visit), &mut search as *mut Search as LPARAM) };
        (!search.found.is_null()).then_some(search.found)
    }

    pub fn post(pid: u32, plan: &[Keystroke]) -> io::Result<()> {
        let hwnd = find(pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process has no window"))?;
        for keystroke in plan {
            let (message, code) = match *keystroke {
                Keystroke::Char(unit) => (WM_CHAR, unit),
                Keystroke::KeyDown(key) => (WM_KEYDOWN, key),
            };
            if unsafe { PostMessageW(hwnd, message, code as WPARAM, 0) } == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub async fn minimize_when_shown(pid: u32) {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Some(hwnd) = find(pid) {
                unsafe { ShowWindow(hwnd, SW_MINIMIZE) };
                return;
            }
        }
    }
}

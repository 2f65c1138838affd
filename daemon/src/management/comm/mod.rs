mod process;
mod process_helper;
#[cfg(unix)]
mod pty;
mod redirect;
mod shared;
mod windowed;

pub use process::{ProcessControl, ProcessEvent, ProcessExit, ProcessStartInfo};
pub use process_helper::ProcessHelper;

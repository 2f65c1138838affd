use gsm_protocol::management::instance::ProcessPriority;
use std::io;

#[cfg(windows)]
use winapi::shared::minwindef::{DWORD, FALSE};
#[cfg(windows)]
use winapi::um::handleapi::CloseHandle;
#[cfg(windows)]
use winapi::um::processthreadsapi::{OpenProcess, SetPriorityClass};
#[cfg(windows)]
use winapi::um::winbase::{
    SetProcessAffinityMask, ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS,
    HIGH_PRIORITY_CLASS, IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, REALTIME_PRIORITY_CLASS,
};
#[cfg(windows)]
use winapi::um::winnt::{HANDLE, PROCESS_QUERY_INFORMATION, PROCESS_SET_INFORMATION};

pub struct ProcessHelper;

impl ProcessHelper {
    /// Nice value used for a priority class on Unix.
    pub fn nice(priority: ProcessPriority) -> i32 {
        match priority {
            ProcessPriority::Realtime => -20,
            ProcessPriority::High => -10,
            ProcessPriority::AboveNormal => -5,
            ProcessPriority::Normal => 0,
            ProcessPriority::BelowNormal => 5,
            ProcessPriority::Low => 19,
        }
    }

    pub fn set_priority(pid: u32, priority: ProcessPriority) -> io::Result<()> {
        #[cfg(unix)]
        {
            let result = unsafe {
                nix::libc::setpriority(nix::libc::PRIO_PROCESS as _, pid as _, Self::nice(priority))
            };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
        #[cfg(windows)]
        {
            let class = match priority {
                ProcessPriority::Realtime => REALTIME_PRIORITY_CLASS,
                ProcessPriority::High => HIGH_PRIORITY_CLASS,
                ProcessPriority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
                ProcessPriority::Normal => NORMAL_PRIORITY_CLASS,
                ProcessPriority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
                ProcessPriority::Low => IDLE_PRIORITY_CLASS,
            };
            Self::with_process(pid, |handle| unsafe { SetPriorityClass(handle, class) })
        }
    }

    /// Restricts the process to the processors set in `mask`.
    pub fn set_affinity(pid: u32, mask: u64) -> io::Result<()> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut cpus = CpuSet::new();
            for cpu in (0..64).filter(|cpu| mask & (1u64 << cpu) != 0) {
                if cpu < CpuSet::count() {
                    cpus.set(cpu).map_err(io::Error::from)?;
                }
            }
            sched_setaffinity(Pid::from_raw(pid as i32), &cpus).map_err(io::Error::from)
        }
        #[cfg(windows)]
        {
            Self::with_process(pid, |handle| unsafe {
                SetProcessAffinityMask(handle, mask as usize)
            })
        }
        #[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
        {
            let _ = (pid, mask);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "processor affinity is not supported on this platform",
            ))
        }
    }

    #[cfg(windows)]
    fn with_process(pid: u32, action: impl FnOnce(HANDLE) -> i32) -> io::Result<()> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_SET_INFORMATION | PROCESS_QUERY_INFORMATION,
                FALSE,
                pid as DWORD,
            )
        };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let result = action(handle);
        let err = io::Error::last_os_error();
        unsafe { CloseHandle(handle) };
        if result == 0 {
            Err(err)
        } else {
            Ok(())
        }
    }
}

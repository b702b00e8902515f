//! Platform-specific process probing.
//!
//! Liveness by PID and a process-table scan by executable name.

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`. `EPERM` means the process exists but
///   belongs to someone else, so it counts as alive. `ESRCH` is dead.
/// - **Windows**: `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
///
/// PID 0 and PIDs outside the platform range are never alive.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        is_process_alive_unix(pid)
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        true
    }
}

#[cfg(unix)]
fn is_process_alive_unix(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!("kill({}, 0) failed: {}", pid, e);
            false
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: OpenProcess takes plain integers and returns a handle or null.
    // A non-null handle is owned here and closed exactly once.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

/// Lowercase executable name without directory or `.exe` extension.
pub fn normalize_process_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = base.to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Find running processes whose executable name is one of `names`.
///
/// Names are compared after [`normalize_process_name`]. Returns
/// `(pid, executable name)` pairs sorted by PID.
pub fn find_processes_by_name(names: &[String]) -> Vec<(u32, String)> {
    let wanted: Vec<String> = names.iter().map(|n| normalize_process_name(n)).collect();

    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

    let mut found: Vec<(u32, String)> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let name = process.name().to_string_lossy().into_owned();
            if wanted.contains(&normalize_process_name(&name)) {
                Some((pid.as_u32(), name))
            } else {
                None
            }
        })
        .collect();
    found.sort_by_key(|(pid, _)| *pid);

    debug!("Process scan matched {} candidates", found.len());
    found
}

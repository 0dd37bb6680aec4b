//! Process liveness probe used to tell live registry entries from stale ones.

/// Return `true` if a process with `pid` currently exists.
///
/// On Unix this uses `kill(pid, 0)`, a read-only existence probe that sends
/// no signal. `EPERM` means the process exists but belongs to someone else,
/// which still counts as alive. On other platforms there is no cheap probe
/// and every pid is reported alive, so foreign registry entries are honored.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        pid_alive_unix(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(unix)]
fn pid_alive_unix(pid: u32) -> bool {
    let Ok(pid_t) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid_t <= 0 {
        return false;
    }
    // SAFETY: kill with sig=0 never sends a signal; it only checks PID existence.
    let result = unsafe { libc::kill(pid_t, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_out_of_range_pid_is_dead() {
        assert!(!is_pid_alive(u32::MAX));
        assert!(!is_pid_alive(0));
    }
}

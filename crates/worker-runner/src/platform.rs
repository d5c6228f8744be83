//! Process-group isolation and signalling
//!
//! Workers are started as leaders of their own process group so that a
//! stop reaches every process the worker forked, not just the interpreter.
//! Windows has no SIGTERM for a detached group, so both signals end the
//! whole process tree there at once.

use std::io;

use tokio::process::Command;

/// Signal sent to a whole worker process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Make the spawned process the leader of a new process group
pub fn isolate_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        #[allow(unused_imports)]
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;

/// Deliver `signal` to every process in group `pgid`.
///
/// Returns `Ok(false)` when the group no longer exists.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: GroupSignal) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(windows)]
pub fn signal_group(pgid: u32, _signal: GroupSignal) -> io::Result<bool> {
    if !group_alive(pgid) {
        return Ok(false);
    }
    let status = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pgid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    Ok(status.success())
}

/// Whether any process of group `pgid` is still alive
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether the group leader is still alive
#[cfg(windows)]
pub fn group_alive(pgid: u32) -> bool {
    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pgid}"), "/FO", "CSV", "/NH"])
        .stderr(std::process::Stdio::null())
        .output();
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&format!("\"{pgid}\"")),
        Err(_) => false,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    #[tokio::test]
    async fn test_group_signal_reaches_children() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & sleep 30 & wait"])
            .stdout(Stdio::null())
            .kill_on_drop(true);
        isolate_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pgid = child.id().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(group_alive(pgid));

        assert!(signal_group(pgid, GroupSignal::Kill).unwrap());
        // The leader dies from the group signal rather than exiting normally
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}

use super::GroupBackend;
use crate::prelude::*;
use crate::process::ProcessId;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, getpgid, setpgid};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

/// POSIX process group containment.
///
/// The group id is reserved by an anchor child that exits immediately and stays a zombie
/// until the group is closed. Members inherit the group across `fork`, but leave it with
/// `setsid` or `setpgid`, which every job-control shell does for its jobs.
pub struct ProcessGroupBackend {
    pgid: Pid,
    anchor: Child,
}

impl ProcessGroupBackend {
    pub fn create() -> Result<Self> {
        let anchor = Command::new("true")
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::GroupCreateFailed(format!("failed to spawn group anchor: {e}")))?;

        let pgid = Pid::from_raw(anchor.id() as libc::pid_t);
        debug!("Process group {pgid} anchored");

        Ok(Self { pgid, anchor })
    }

    pub fn pgid(&self) -> libc::pid_t {
        self.pgid.as_raw()
    }
}

impl GroupBackend for ProcessGroupBackend {
    fn name(&self) -> &'static str {
        "process-group"
    }

    fn enable_kill_on_release(&mut self) -> Result<()> {
        // Enforced in `close`, nothing to configure in the kernel
        Ok(())
    }

    fn prepare_command(&self, command: &mut Command) {
        command.process_group(self.pgid.as_raw());
    }

    fn assign(&mut self, pid: ProcessId) -> bool {
        if matches!(getpgid(Some(pid.to_nix())), Ok(pgid) if pgid == self.pgid) {
            return true;
        }

        // Only allowed on our own children that have not exec'd yet and share our session
        match setpgid(pid.to_nix(), self.pgid) {
            Ok(()) => true,
            Err(e) => {
                debug!("setpgid({pid}, {}) rejected: {e}", self.pgid);
                false
            }
        }
    }

    fn trigger(&mut self) -> bool {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => true,
            Err(e) => {
                warn!("killpg({}) failed: {e}", self.pgid);
                false
            }
        }
    }

    fn close(&mut self, kill_members: bool) {
        if kill_members {
            self.trigger();
        }

        // Reaping the anchor frees the group id
        if let Err(e) = self.anchor.kill().and_then(|_| self.anchor.wait().map(|_| ())) {
            warn!("Failed to reap process group anchor {}: {e}", self.pgid);
        }
    }
}

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ContainmentMode;
use crate::prelude::*;
use reaper_core::{
    ContainmentGroup, Error as CoreError, ProcessControl, ProcessId, TerminationReport,
    TreeTerminator,
};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A hosted command and the containment group it was started in.
///
/// Dropping a session without calling [`Session::end`] still releases the group, but
/// skips the descendant sweep.
#[derive(Debug)]
pub struct Session {
    root: Child,
    root_pid: ProcessId,
    group: Option<ContainmentGroup>,
    /// The group exists but cannot kill on release, leaving the trigger and sweep
    observation_only: bool,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub report: TerminationReport,
    /// `None` when the root could not be reaped after teardown
    pub root_status: Option<ExitStatus>,
}

impl Session {
    /// Create the containment group, spawn `command` and assign its process to the group.
    ///
    /// A group that cannot be created leaves the sweep as the only mechanism. A group that
    /// cannot be configured to kill on release keeps tracking members for the trigger.
    pub fn start(
        mut command: Command,
        mode: ContainmentMode,
        cgroup_parent: Option<PathBuf>,
    ) -> Result<Self> {
        let mut group = match mode.group_kind() {
            Some(kind) => match ContainmentGroup::create(kind, cgroup_parent) {
                Ok(group) => Some(group),
                Err(e @ CoreError::GroupCreateFailed(_)) => {
                    warn!("No containment group for this session, relying on the tree sweep: {e}");
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let mut observation_only = false;
        if let Some(group) = group.as_mut() {
            // Already logged by the group
            observation_only = group.configure_kill_on_release().is_err();
            group.prepare_command(&mut command);
        }

        let root = command
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", command.get_program()))?;
        let root_pid = ProcessId::new(root.id()).context("Spawned process has no PID")?;

        if let Some(group) = group.as_mut() {
            group.assign(root_pid);
        }

        info!(
            "Started session {root_pid} ({}{})",
            group
                .as_ref()
                .map(|group| group.backend_name())
                .unwrap_or("no containment group"),
            if observation_only {
                ", observation-only"
            } else {
                ""
            }
        );

        Ok(Self {
            root,
            root_pid,
            group,
            observation_only,
        })
    }

    pub fn root_pid(&self) -> ProcessId {
        self.root_pid
    }

    pub fn group(&self) -> Option<&ContainmentGroup> {
        self.group.as_ref()
    }

    /// True when the group could not be made to kill its members on release
    pub fn observation_only(&self) -> bool {
        self.observation_only
    }

    /// Wait for the root to exit. Returns `None` if `timeout` elapsed first.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
        let Some(timeout) = timeout else {
            return Ok(Some(self.root.wait()?));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.root.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Tear the session down: group trigger and sweep, then release the group and reap the
    /// root.
    pub fn end<C: ProcessControl>(
        mut self,
        terminator: &TreeTerminator<C>,
    ) -> Result<SessionOutcome> {
        let report = terminator.terminate(self.root_pid, self.group.as_mut())?;

        if let Some(group) = self.group.take() {
            group.release();
        }

        let root_status = self.reap();
        Ok(SessionOutcome {
            report,
            root_status,
        })
    }

    fn reap(&mut self) -> Option<ExitStatus> {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            match self.root.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => {
                    warn!("Root process {} is still running, not reaping it", self.root_pid);
                    return None;
                }
                Err(e) => {
                    debug!("Failed to reap {}: {e}", self.root_pid);
                    return None;
                }
            }
        }
    }
}

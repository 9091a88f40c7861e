//! Kernel-assisted grouping of a session's processes.
//!
//! A group is best-effort: a child can be created (and even exit) before it joins, and a
//! process can leave on purpose. The tree sweep in [`crate::TreeTerminator`] covers both gaps.

#[cfg(target_os = "linux")]
mod cgroup;
#[cfg(target_os = "linux")]
mod process_group;

#[cfg(target_os = "linux")]
pub use cgroup::CgroupBackend;
#[cfg(target_os = "linux")]
pub use process_group::ProcessGroupBackend;

use crate::prelude::*;
use crate::process::ProcessId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// OS mechanism behind a [`ContainmentGroup`].
pub trait GroupBackend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Make sure closing the group also terminates its members.
    fn enable_kill_on_release(&mut self) -> Result<()>;

    /// Let a command join the group as it is spawned, before it can fork. The default
    /// does nothing and relies on [`GroupBackend::assign`] right after spawn.
    fn prepare_command(&self, _command: &mut Command) {}

    /// Add an already running process. Returns false when the OS refuses.
    fn assign(&mut self, pid: ProcessId) -> bool;

    /// Request termination of every current member in one call.
    fn trigger(&mut self) -> bool;

    /// Tear down the OS object, killing remaining members first when `kill_members` is set.
    /// Called exactly once.
    fn close(&mut self, kill_members: bool);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    /// cgroup v2 when delegated to us, process group otherwise
    #[default]
    Auto,
    Cgroup,
    ProcessGroup,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Auto => write!(f, "auto"),
            GroupKind::Cgroup => write!(f, "cgroup"),
            GroupKind::ProcessGroup => write!(f, "process-group"),
        }
    }
}

/// A containment group owned by exactly one session.
///
/// Not `Clone`: the owning session is the only party that may trigger or release it.
/// Release runs exactly once, either through [`ContainmentGroup::release`] or on drop, so
/// every exit path of the session (errors included) closes the OS object.
pub struct ContainmentGroup {
    backend: Box<dyn GroupBackend>,
    kill_on_release: bool,
    released: bool,
}

impl ContainmentGroup {
    /// Allocate a new group with the given mechanism.
    ///
    /// `cgroup_parent` is only used by the cgroup backend and defaults to the cgroup of the
    /// current process.
    #[cfg(target_os = "linux")]
    pub fn create(kind: GroupKind, cgroup_parent: Option<PathBuf>) -> Result<Self> {
        let backend: Box<dyn GroupBackend> = match kind {
            GroupKind::Cgroup => Box::new(CgroupBackend::create(cgroup_parent)?),
            GroupKind::ProcessGroup => Box::new(ProcessGroupBackend::create()?),
            GroupKind::Auto => match CgroupBackend::create(cgroup_parent) {
                Ok(cgroup) => Box::new(cgroup),
                Err(e) => {
                    debug!("cgroup containment unavailable ({e}), using a process group");
                    Box::new(ProcessGroupBackend::create()?)
                }
            },
        };

        Ok(Self::from_backend(backend))
    }

    pub fn from_backend(backend: Box<dyn GroupBackend>) -> Self {
        debug!("Created {} containment group", backend.name());
        Self {
            backend,
            kill_on_release: false,
            released: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// On failure the group still tracks membership but will not kill on release.
    pub fn configure_kill_on_release(&mut self) -> Result<()> {
        match self.backend.enable_kill_on_release() {
            Ok(()) => {
                self.kill_on_release = true;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "{} group degraded to observation-only: {e}",
                    self.backend.name()
                );
                Err(e)
            }
        }
    }

    pub fn kills_on_release(&self) -> bool {
        self.kill_on_release
    }

    pub fn prepare_command(&self, command: &mut Command) {
        self.backend.prepare_command(command);
    }

    /// Best-effort. A false return is expected for processes that already belong to
    /// another group and is covered by the sweep.
    pub fn assign(&mut self, pid: ProcessId) -> bool {
        let assigned = self.backend.assign(pid);
        if assigned {
            debug!("Assigned PID {pid} to {} group", self.backend.name());
        } else {
            info!(
                "PID {pid} rejected by {} group, relying on the tree sweep",
                self.backend.name()
            );
        }
        assigned
    }

    /// Success does not mean every descendant is gone: escaped processes are untouched.
    pub fn trigger(&mut self) -> bool {
        let triggered = self.backend.trigger();
        if !triggered {
            warn!("Failed to trigger {} group termination", self.backend.name());
        }
        triggered
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!(
            "Releasing {} group (kill on release: {})",
            self.backend.name(),
            self.kill_on_release
        );
        self.backend.close(self.kill_on_release);
    }
}

impl Drop for ContainmentGroup {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for ContainmentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainmentGroup")
            .field("backend", &self.backend.name())
            .field("kill_on_release", &self.kill_on_release)
            .field("released", &self.released)
            .finish()
    }
}

use crate::prelude::*;
use crate::snapshot::Snapshot;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OS-level identifier of a live or recently-live process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Returns `None` for `0`, which never names a real process, and for values that do
    /// not fit in a `pid_t`.
    pub fn new(raw: u32) -> Option<Self> {
        libc::pid_t::try_from(raw)
            .is_ok_and(|pid| pid > 0)
            .then_some(Self(raw))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_raw(self) -> libc::pid_t {
        // Bounded by `new`
        self.0 as libc::pid_t
    }

    pub(crate) fn to_nix(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.as_raw())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProcessId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw: u32 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid process id '{s}': {e}"))?;
        ProcessId::new(raw).ok_or_else(|| format!("process id out of range: {raw}"))
    }
}

impl TryFrom<u32> for ProcessId {
    type Error = String;

    fn try_from(raw: u32) -> std::result::Result<Self, Self::Error> {
        ProcessId::new(raw).ok_or_else(|| format!("process id out of range: {raw}"))
    }
}

/// A process as seen by one snapshot. The live table may already have diverged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: ProcessId,
    /// `None` for processes without a parent (pid 1, kernel threads under pid 0)
    pub parent_pid: Option<ProcessId>,
    pub image_name: String,
    /// Start time in clock ticks since boot, used to detect recycled identifiers
    pub start_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Signaled,
    /// The process exited before the signal could be delivered.
    AlreadyGone,
}

/// Every OS operation the terminator needs.
pub trait ProcessControl {
    /// Read the whole process table. All-or-nothing: never returns a partial listing.
    fn capture(&self) -> Result<Snapshot>;

    /// Whether the process described by `record` is still running. A pid now owned by a
    /// different process counts as dead.
    fn is_alive(&self, record: &ProcessRecord) -> bool;

    /// Forcefully terminate a single process.
    fn force_kill(&self, record: &ProcessRecord) -> std::result::Result<KillOutcome, Errno>;

    /// The process running the terminator, never signaled even when it sits inside the tree.
    fn current_pid(&self) -> Option<ProcessId> {
        ProcessId::new(std::process::id())
    }
}

impl<T: ProcessControl + ?Sized> ProcessControl for &T {
    fn capture(&self) -> Result<Snapshot> {
        (**self).capture()
    }

    fn is_alive(&self, record: &ProcessRecord) -> bool {
        (**self).is_alive(record)
    }

    fn force_kill(&self, record: &ProcessRecord) -> std::result::Result<KillOutcome, Errno> {
        (**self).force_kill(record)
    }

    fn current_pid(&self) -> Option<ProcessId> {
        (**self).current_pid()
    }
}

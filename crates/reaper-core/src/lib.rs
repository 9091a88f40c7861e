//! Session process-tree teardown.
//!
//! Killing the root of a session does not kill what it spawned. This crate resolves the
//! descendants of a root process from a process table snapshot, triggers an optional
//! containment group, then sweeps every surviving member deepest-first and reports what
//! could not be killed.

mod error;
pub mod group;
mod prelude;
mod process;
mod snapshot;
mod terminator;
mod tree;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use group::{ContainmentGroup, GroupBackend, GroupKind};
pub use process::{KillOutcome, ProcessControl, ProcessId, ProcessRecord};
pub use snapshot::Snapshot;
pub use terminator::{MAX_WAIT, TerminationReport, TerminatorConfig, TreeTerminator};
pub use tree::{ProcessTree, TreeNode, resolve};

#[cfg(target_os = "linux")]
pub use linux::LinuxProcessControl;

/// Run a single termination pass on the local system.
#[cfg(target_os = "linux")]
pub fn terminate(
    root: ProcessId,
    group: Option<&mut ContainmentGroup>,
) -> Result<TerminationReport> {
    TreeTerminator::new(LinuxProcessControl, TerminatorConfig::default()).terminate(root, group)
}

use crate::prelude::*;
use crate::process::{KillOutcome, ProcessControl, ProcessId, ProcessRecord};
use crate::snapshot::Snapshot;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use procfs::ProcError;
use procfs::process::{Process, Stat};

/// `/proc` and signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxProcessControl;

/// Zombies have exited and lost their children to a reaper, `X` is a task being removed.
fn is_defunct(stat: &Stat) -> bool {
    matches!(stat.state, 'Z' | 'X' | 'x')
}

fn record_from_stat(stat: Stat) -> Option<ProcessRecord> {
    let pid = ProcessId::new(u32::try_from(stat.pid).ok()?)?;
    let parent_pid = u32::try_from(stat.ppid).ok().and_then(ProcessId::new);

    Some(ProcessRecord {
        pid,
        parent_pid,
        image_name: stat.comm,
        start_time: stat.starttime,
    })
}

impl ProcessControl for LinuxProcessControl {
    fn capture(&self) -> Result<Snapshot> {
        let processes = procfs::process::all_processes()
            .map_err(|e| Error::SnapshotUnavailable(e.to_string()))?;

        let mut records = Vec::new();
        for process in processes {
            let stat = match process.and_then(|p| p.stat()) {
                Ok(stat) => stat,
                // Exited between the directory listing and the read
                Err(ProcError::NotFound(_)) => continue,
                Err(e) => return Err(Error::SnapshotUnavailable(e.to_string())),
            };

            if is_defunct(&stat) {
                continue;
            }
            if let Some(record) = record_from_stat(stat) {
                records.push(record);
            }
        }

        trace!("Captured {} processes", records.len());
        Ok(Snapshot::new(records))
    }

    fn is_alive(&self, record: &ProcessRecord) -> bool {
        match Process::new(record.pid.as_raw()).and_then(|p| p.stat()) {
            Ok(stat) => !is_defunct(&stat) && stat.starttime == record.start_time,
            Err(ProcError::NotFound(_)) => false,
            Err(e) => {
                // Cannot read /proc for it, fall back to asking the kernel directly
                trace!("Cannot stat {}: {e}", record.pid);
                !matches!(kill(record.pid.to_nix(), None::<Signal>), Err(Errno::ESRCH))
            }
        }
    }

    fn force_kill(&self, record: &ProcessRecord) -> std::result::Result<KillOutcome, Errno> {
        // Recheck identity right before signaling so a recycled pid is never hit
        if !self.is_alive(record) {
            return Ok(KillOutcome::AlreadyGone);
        }

        match kill(record.pid.to_nix(), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Signaled),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

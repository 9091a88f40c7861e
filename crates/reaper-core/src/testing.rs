//! In-memory process table and containment group for unit tests.

use crate::error::{Error, Result};
use crate::group::GroupBackend;
use crate::process::{KillOutcome, ProcessControl, ProcessId, ProcessRecord};
use crate::snapshot::Snapshot;
use nix::errno::Errno;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub fn pid(raw: u32) -> ProcessId {
    ProcessId::new(raw).unwrap()
}

/// A record with a start time derived from the pid. `ppid` 0 means no parent.
pub fn record(raw_pid: u32, raw_ppid: u32, name: &str) -> ProcessRecord {
    ProcessRecord {
        pid: pid(raw_pid),
        parent_pid: ProcessId::new(raw_ppid),
        image_name: name.to_string(),
        start_time: raw_pid as u64 * 10,
    }
}

struct FakeProcess {
    record: ProcessRecord,
    alive: bool,
    unkillable: bool,
    /// Declines group membership, for itself and everything it spawns
    escaped: bool,
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<ProcessId, FakeProcess>,
    sweep_kills: Vec<ProcessId>,
    group_kills: Vec<ProcessId>,
    snapshot_fails: bool,
    current_pid: Option<ProcessId>,
    /// Applied right after the next capture: the pid exits and is reused with a new start time
    recycle_after_capture: Option<(ProcessId, u64)>,
}

#[derive(Default)]
pub struct FakeSystem {
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new(records: impl IntoIterator<Item = ProcessRecord>) -> Arc<Self> {
        let system = Arc::new(FakeSystem::default());
        for record in records {
            system.spawn(record);
        }
        system
    }

    pub fn spawn(&self, record: ProcessRecord) {
        self.state.lock().unwrap().processes.insert(
            record.pid,
            FakeProcess {
                record,
                alive: true,
                unkillable: false,
                escaped: false,
            },
        );
    }

    /// Natural exit
    pub fn exit(&self, p: ProcessId) {
        if let Some(process) = self.state.lock().unwrap().processes.get_mut(&p) {
            process.alive = false;
        }
    }

    pub fn set_unkillable(&self, p: ProcessId) {
        if let Some(process) = self.state.lock().unwrap().processes.get_mut(&p) {
            process.unkillable = true;
        }
    }

    pub fn set_escaped(&self, p: ProcessId) {
        if let Some(process) = self.state.lock().unwrap().processes.get_mut(&p) {
            process.escaped = true;
        }
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.state.lock().unwrap().snapshot_fails = fail;
    }

    /// Pretend the terminating process is `p`
    pub fn set_current_pid(&self, p: ProcessId) {
        self.state.lock().unwrap().current_pid = Some(p);
    }

    pub fn recycle_after_capture(&self, p: ProcessId, start_time: u64) {
        self.state.lock().unwrap().recycle_after_capture = Some((p, start_time));
    }

    pub fn is_running(&self, p: ProcessId) -> bool {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(&p)
            .is_some_and(|process| process.alive)
    }

    fn is_escaped(&self, p: ProcessId) -> bool {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(&p)
            .is_some_and(|process| process.escaped)
    }

    /// Pids killed by the tree sweep, in order.
    pub fn sweep_kills(&self) -> Vec<ProcessId> {
        self.state.lock().unwrap().sweep_kills.clone()
    }

    pub fn group_kills(&self) -> Vec<ProcessId> {
        self.state.lock().unwrap().group_kills.clone()
    }

    /// Kill every member and every descendant that inherited membership.
    fn kill_group(&self, members: &BTreeSet<ProcessId>) {
        let mut state = self.state.lock().unwrap();

        let parents: BTreeMap<ProcessId, Option<ProcessId>> = state
            .processes
            .iter()
            .map(|(p, process)| (*p, process.record.parent_pid))
            .collect();
        let escaped: BTreeSet<ProcessId> = state
            .processes
            .iter()
            .filter(|(_, process)| process.escaped)
            .map(|(p, _)| *p)
            .collect();

        let in_group = |start: ProcessId| {
            let mut current = Some(start);
            let mut hops = 0;
            while let Some(p) = current {
                if escaped.contains(&p) || hops > parents.len() {
                    return false;
                }
                if members.contains(&p) {
                    return true;
                }
                current = parents.get(&p).copied().flatten();
                hops += 1;
            }
            false
        };

        let targets: Vec<ProcessId> = state
            .processes
            .iter()
            .filter(|(p, process)| process.alive && !process.unkillable && in_group(**p))
            .map(|(p, _)| *p)
            .collect();

        for target in targets {
            if let Some(process) = state.processes.get_mut(&target) {
                process.alive = false;
            }
            state.group_kills.push(target);
        }
    }
}

impl ProcessControl for FakeSystem {
    fn capture(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if state.snapshot_fails {
            return Err(Error::SnapshotUnavailable("resource exhaustion".into()));
        }

        let snapshot: Snapshot = state
            .processes
            .values()
            .filter(|process| process.alive)
            .map(|process| process.record.clone())
            .collect();

        if let Some((p, start_time)) = state.recycle_after_capture.take() {
            if let Some(process) = state.processes.get_mut(&p) {
                process.record = ProcessRecord {
                    parent_pid: ProcessId::new(1),
                    image_name: "recycled".to_string(),
                    start_time,
                    ..process.record.clone()
                };
                process.alive = true;
            }
        }

        Ok(snapshot)
    }

    fn is_alive(&self, record: &ProcessRecord) -> bool {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(&record.pid)
            .is_some_and(|process| process.alive && process.record.start_time == record.start_time)
    }

    fn force_kill(&self, record: &ProcessRecord) -> std::result::Result<KillOutcome, Errno> {
        let mut state = self.state.lock().unwrap();
        let Some(process) = state.processes.get_mut(&record.pid) else {
            return Ok(KillOutcome::AlreadyGone);
        };
        if !process.alive || process.record.start_time != record.start_time {
            return Ok(KillOutcome::AlreadyGone);
        }
        if process.unkillable {
            return Err(Errno::EPERM);
        }

        process.alive = false;
        state.sweep_kills.push(record.pid);
        Ok(KillOutcome::Signaled)
    }

    fn current_pid(&self) -> Option<ProcessId> {
        self.state.lock().unwrap().current_pid
    }
}

pub struct FakeGroup {
    system: Arc<FakeSystem>,
    members: BTreeSet<ProcessId>,
    configure_fails: bool,
    trigger_fails: bool,
}

impl FakeGroup {
    pub fn new(system: Arc<FakeSystem>) -> Self {
        Self {
            system,
            members: BTreeSet::new(),
            configure_fails: false,
            trigger_fails: false,
        }
    }

    /// A group whose kernel object cannot kill anything.
    pub fn degraded(system: Arc<FakeSystem>) -> Self {
        Self {
            configure_fails: true,
            trigger_fails: true,
            ..Self::new(system)
        }
    }
}

impl GroupBackend for FakeGroup {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn enable_kill_on_release(&mut self) -> Result<()> {
        if self.configure_fails {
            return Err(Error::GroupConfigureFailed("limit information rejected".into()));
        }
        Ok(())
    }

    fn assign(&mut self, p: ProcessId) -> bool {
        if !self.system.is_running(p) || self.system.is_escaped(p) {
            return false;
        }
        self.members.insert(p);
        true
    }

    fn trigger(&mut self) -> bool {
        if self.trigger_fails {
            return false;
        }
        self.system.kill_group(&self.members);
        true
    }

    fn close(&mut self, kill_members: bool) {
        if kill_members && !self.trigger_fails {
            self.system.kill_group(&self.members);
        }
    }
}

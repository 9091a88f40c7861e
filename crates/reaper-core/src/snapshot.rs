use crate::process::{ProcessId, ProcessRecord};
use std::collections::BTreeMap;
use std::time::Instant;

/// Point-in-time view of the process table.
///
/// Valid only as of `captured_at`: processes keep starting and exiting while it is read.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: BTreeMap<ProcessId, ProcessRecord>,
    captured_at: Instant,
}

impl Snapshot {
    pub fn new(records: impl IntoIterator<Item = ProcessRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.pid, r)).collect(),
            captured_at: Instant::now(),
        }
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessRecord> {
        self.records.get(&pid)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.records.contains_key(&pid)
    }

    /// Records ordered by pid.
    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

impl FromIterator<ProcessRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = ProcessRecord>>(iter: I) -> Self {
        Snapshot::new(iter)
    }
}

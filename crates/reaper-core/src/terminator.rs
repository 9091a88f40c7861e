use crate::group::ContainmentGroup;
use crate::prelude::*;
use crate::process::{KillOutcome, ProcessControl, ProcessId, ProcessRecord};
use crate::tree::resolve;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Ceiling applied to each of the two waits of a pass.
pub const MAX_WAIT: Duration = Duration::from_secs(4);

const DEFAULT_PROPAGATION_WAIT: Duration = Duration::from_millis(500);
const DEFAULT_SETTLE_WAIT: Duration = Duration::from_millis(500);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatorConfig {
    /// How long to let the OS propagate a group trigger before sweeping
    pub propagation_wait: Duration,
    /// How long to let swept processes die before the final liveness check
    pub settle_wait: Duration,
    /// Liveness polling period during both waits
    pub poll_interval: Duration,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            propagation_wait: DEFAULT_PROPAGATION_WAIT,
            settle_wait: DEFAULT_SETTLE_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TerminatorConfig {
    fn clamped(self) -> Self {
        let clamp = |wait: Duration, what: &str| {
            if wait > MAX_WAIT {
                warn!("{what} of {wait:?} exceeds {MAX_WAIT:?}, clamping");
                MAX_WAIT
            } else {
                wait
            }
        };

        Self {
            propagation_wait: clamp(self.propagation_wait, "Propagation wait"),
            settle_wait: clamp(self.settle_wait, "Settle wait"),
            poll_interval: self
                .poll_interval
                .clamp(Duration::from_millis(1), MAX_POLL_INTERVAL),
        }
    }
}

/// Outcome of one termination pass.
///
/// A non-empty `still_alive` means processes of the session survived teardown. It is a
/// condition to surface to the operator, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub root: ProcessId,
    /// The root and every descendant resolved at the start of the pass
    pub attempted: BTreeSet<ProcessId>,
    /// Members that were running at the start of the pass and are gone at the end
    pub killed: BTreeSet<ProcessId>,
    /// Result of the post-sweep liveness check, never of the initial snapshot
    pub still_alive: BTreeSet<ProcessId>,
    /// Kills the OS refused, with the reason
    pub failures: BTreeMap<ProcessId, String>,
    /// `None` when the pass ran without a containment group
    pub group_triggered: Option<bool>,
}

impl TerminationReport {
    pub fn is_clean(&self) -> bool {
        self.still_alive.is_empty()
    }

    /// Number of orphans left behind.
    pub fn leaked(&self) -> usize {
        self.still_alive.len()
    }
}

/// Tears down a process tree: group trigger, then a verified deepest-first sweep.
///
/// A pass is strictly sequential and runs to completion once started. Wrap the call in a
/// caller-level timeout instead of interrupting it.
pub struct TreeTerminator<C> {
    control: C,
    config: TerminatorConfig,
}

impl<C: ProcessControl> TreeTerminator<C> {
    pub fn new(control: C, config: TerminatorConfig) -> Self {
        Self {
            control,
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &TerminatorConfig {
        &self.config
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Terminate `root` and everything it transitively spawned.
    ///
    /// Only a failed snapshot is an error, in which case nothing was touched. A second
    /// call on an already cleaned up root reports nothing killed and nothing alive.
    pub fn terminate(
        &self,
        root: ProcessId,
        group: Option<&mut ContainmentGroup>,
    ) -> Result<TerminationReport> {
        let snapshot = self.control.capture()?;
        let tree = resolve(root, &snapshot);
        let own_pid = self.control.current_pid();
        // Killing ourselves would abort the pass halfway, leaving the ancestors running
        let (spared, members): (Vec<&ProcessRecord>, Vec<&ProcessRecord>) = tree
            .sweep_order()
            .into_iter()
            .partition(|record| Some(record.pid) == own_pid);

        let mut attempted: BTreeSet<ProcessId> =
            members.iter().chain(&spared).map(|r| r.pid).collect();
        attempted.insert(root);
        debug!(
            "Terminating process tree of {root}: {} descendants, root {}",
            tree.len(),
            if tree.apex().is_some() {
                "running"
            } else {
                "already gone"
            }
        );

        let group_triggered = group.map(|group| {
            let triggered = group.trigger();
            self.wait_until_gone(&members, self.config.propagation_wait);
            triggered
        });

        // Liveness checks are independent, kills follow the sweep order
        let survivors: Vec<&ProcessRecord> = members
            .iter()
            .copied()
            .filter(|record| self.control.is_alive(record))
            .collect();
        if group_triggered.is_some() && !survivors.is_empty() {
            info!(
                "{} processes of {root} survived the group trigger, sweeping them",
                survivors.len()
            );
        }

        let mut failures = self.sweep(&survivors);
        self.wait_until_gone(&members, self.config.settle_wait);

        let (mut still_alive, killed): (BTreeSet<ProcessId>, BTreeSet<ProcessId>) = members
            .iter()
            .map(|record| (record.pid, self.control.is_alive(record)))
            .fold(
                (BTreeSet::new(), BTreeSet::new()),
                |(mut alive, mut dead), (pid, is_alive)| {
                    if is_alive {
                        alive.insert(pid);
                    } else {
                        dead.insert(pid);
                    }
                    (alive, dead)
                },
            );

        for record in spared {
            warn!(
                "{} ({}) is running this termination and belongs to the tree of {root}, not killing it",
                record.pid, record.image_name
            );
            still_alive.insert(record.pid);
            failures.insert(
                record.pid,
                "terminating process is part of the tree".to_string(),
            );
        }

        if still_alive.is_empty() {
            debug!("Process tree of {root} terminated ({} killed)", killed.len());
        } else {
            warn!(
                "{} processes of {root} survived termination: {}",
                still_alive.len(),
                still_alive
                    .iter()
                    .map(|pid| pid.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(TerminationReport {
            root,
            attempted,
            killed,
            still_alive,
            failures,
            group_triggered,
        })
    }

    /// Kill each record in order. One stuck process never blocks its siblings.
    fn sweep(&self, records: &[&ProcessRecord]) -> BTreeMap<ProcessId, String> {
        let mut failures = BTreeMap::new();

        for record in records {
            match self.control.force_kill(record) {
                Ok(KillOutcome::Signaled) => {
                    debug!("Killed {} ({})", record.pid, record.image_name)
                }
                Ok(KillOutcome::AlreadyGone) => {
                    trace!("{} exited before it could be killed", record.pid)
                }
                Err(e) => {
                    warn!("Failed to kill {} ({}): {e}", record.pid, record.image_name);
                    failures.insert(record.pid, e.to_string());
                }
            }
        }

        failures
    }

    /// Poll until every record is dead or `ceiling` elapses.
    fn wait_until_gone(&self, records: &[&ProcessRecord], ceiling: Duration) {
        let deadline = Instant::now() + ceiling;

        loop {
            if records.iter().all(|record| !self.control.is_alive(record)) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }
}

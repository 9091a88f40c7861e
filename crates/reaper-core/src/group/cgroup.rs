use super::GroupBackend;
use crate::prelude::*;
use crate::process::ProcessId;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const CGROUP_MOUNT: &str = "/sys/fs/cgroup";
const REMOVE_ATTEMPTS: usize = 50;
const REMOVE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(0);

/// cgroup v2 containment.
///
/// Children are placed in the group by the kernel on `fork` and cannot leave it without
/// write access to another cgroup. Needs a delegated hierarchy (root, or a systemd unit
/// with `Delegate=yes`).
pub struct CgroupBackend {
    path: PathBuf,
}

/// Path of the cgroup the current process lives in, from the unified hierarchy entry
/// (`0::/some/path`) of `/proc/self/cgroup`.
fn current_cgroup() -> std::result::Result<PathBuf, String> {
    let content = fs::read_to_string("/proc/self/cgroup")
        .map_err(|e| format!("failed to read /proc/self/cgroup: {e}"))?;

    parse_unified_cgroup(&content)
        .map(|relative| Path::new(CGROUP_MOUNT).join(relative))
        .ok_or_else(|| "no cgroup v2 hierarchy mounted".to_string())
}

fn parse_unified_cgroup(content: &str) -> Option<PathBuf> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(|relative| PathBuf::from(relative.trim().trim_start_matches('/')))
}

impl CgroupBackend {
    pub fn create(parent: Option<PathBuf>) -> Result<Self> {
        let parent = match parent {
            Some(parent) => parent,
            None => current_cgroup().map_err(Error::GroupCreateFailed)?,
        };

        if !parent.join("cgroup.procs").exists() {
            return Err(Error::GroupCreateFailed(format!(
                "{} is not a cgroup v2 directory",
                parent.display()
            )));
        }

        let name = format!(
            "reaper-{}-{}",
            std::process::id(),
            NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)
        );
        let path = parent.join(name);
        fs::create_dir(&path)
            .map_err(|e| Error::GroupCreateFailed(format!("{}: {e}", path.display())))?;
        debug!("Created cgroup {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn members(&self) -> Vec<ProcessId> {
        fs::read_to_string(self.path.join("cgroup.procs"))
            .map(|procs| {
                procs
                    .lines()
                    .filter_map(|line| line.parse::<ProcessId>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_kill_file(&self) -> bool {
        self.path.join("cgroup.kill").exists()
    }

    /// Kernels older than 5.14 have no `cgroup.kill`: signal each listed member instead.
    fn kill_members_one_by_one(&self) -> bool {
        let mut all_signaled = true;
        for pid in self.members() {
            match kill(pid.to_nix(), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    warn!("Failed to kill cgroup member {pid}: {e}");
                    all_signaled = false;
                }
            }
        }
        all_signaled
    }
}

impl GroupBackend for CgroupBackend {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn enable_kill_on_release(&mut self) -> Result<()> {
        if !self.has_kill_file() {
            return Err(Error::GroupConfigureFailed(
                "kernel does not provide cgroup.kill".into(),
            ));
        }
        Ok(())
    }

    fn assign(&mut self, pid: ProcessId) -> bool {
        match fs::write(self.path.join("cgroup.procs"), pid.to_string()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Failed to move {pid} into {}: {e}", self.path.display());
                false
            }
        }
    }

    fn trigger(&mut self) -> bool {
        if !self.has_kill_file() {
            return self.kill_members_one_by_one();
        }

        match fs::write(self.path.join("cgroup.kill"), "1") {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write cgroup.kill in {}: {e}", self.path.display());
                false
            }
        }
    }

    fn close(&mut self, kill_members: bool) {
        if kill_members {
            self.trigger();
        } else if !self.members().is_empty() {
            warn!(
                "cgroup {} still has members, leaving it in place",
                self.path.display()
            );
            return;
        }

        // Killed members are removed asynchronously, rmdir fails with EBUSY until then
        for _ in 0..REMOVE_ATTEMPTS {
            match fs::remove_dir(&self.path) {
                Ok(()) => {
                    debug!("Removed cgroup {}", self.path.display());
                    return;
                }
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                    std::thread::sleep(REMOVE_RETRY_INTERVAL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    warn!("Failed to remove cgroup {}: {e}", self.path.display());
                    return;
                }
            }
        }
        warn!("cgroup {} is still busy, leaving it in place", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unified(
        "0::/user.slice/user-1000.slice/session-2.scope\n",
        Some("user.slice/user-1000.slice/session-2.scope")
    )]
    #[case::hybrid(
        "12:cpu,cpuacct:/docker/abc\n1:name=systemd:/docker/abc\n0::/docker/abc\n",
        Some("docker/abc")
    )]
    #[case::root("0::/\n", Some(""))]
    #[case::v1_only("4:memory:/foo\n2:cpu:/foo\n", None)]
    fn test_parse_unified_cgroup(#[case] content: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_unified_cgroup(content), expected.map(PathBuf::from));
    }

    #[test]
    fn test_create_rejects_non_cgroup_parent() {
        let dir = tempfile::tempdir().unwrap();
        let result = CgroupBackend::create(Some(dir.path().to_path_buf()));
        assert!(matches!(result, Err(Error::GroupCreateFailed(_))));
    }
}

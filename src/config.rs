use std::{env, fs, path::PathBuf, time::Duration};

use crate::prelude::*;
use clap::ValueEnum;
use nestify::nest;
use reaper_core::{GroupKind, TerminatorConfig};
use serde::{Deserialize, Serialize};

/// Upper bound on the combined waits of one termination pass
pub const MAX_TOTAL_WAIT: Duration = Duration::from_secs(9);

/// How a hosted session is contained
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainmentMode {
    /// Prefer a cgroup, fall back to a process group
    #[default]
    Auto,
    Cgroup,
    ProcessGroup,
    /// No group, the descendant sweep is the only mechanism
    None,
}

impl ContainmentMode {
    pub fn group_kind(self) -> Option<GroupKind> {
        match self {
            ContainmentMode::Auto => Some(GroupKind::Auto),
            ContainmentMode::Cgroup => Some(GroupKind::Cgroup),
            ContainmentMode::ProcessGroup => Some(GroupKind::ProcessGroup),
            ContainmentMode::None => None,
        }
    }
}

nest! {
    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Persistent configuration, stored at `~/.config/reaper/config.yaml`.
    pub struct ReaperConfig {
        pub containment: ContainmentMode,
        /// Directory under which per-session cgroups are created. Defaults to the cgroup
        /// of the reaper process itself.
        pub cgroup_parent: Option<PathBuf>,
        pub waits: pub struct WaitConfig {
            /// e.g. `500ms`, `1s` or `2`
            pub propagation: Option<String>,
            pub settle: Option<String>,
        }
    }
}

/// Get the path to the configuration file, following the XDG Base Directory Specification
///
/// If config_name is None, returns ~/.config/reaper/config.yaml
/// If config_name is Some, returns ~/.config/reaper/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = env::var("HOME").context("Neither XDG_CONFIG_HOME nor HOME is set")?;
            PathBuf::from(home).join(".config")
        }
    };
    let config_dir = config_dir.join("reaper");

    Ok(match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    })
}

impl ReaperConfig {
    /// Load the configuration. If it does not exist, return a default configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name)?;

        match fs::read(&config_path) {
            Ok(config_str) => {
                let config: ReaperConfig = serde_yaml::from_slice(&config_str).context(format!(
                    "Failed to parse reaper config at {}",
                    config_path.display()
                ))?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(ReaperConfig::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }

    /// Build the terminator configuration, with `overrides` taking precedence over the file
    pub fn terminator_config(&self, overrides: &WaitConfig) -> Result<TerminatorConfig> {
        let mut config = TerminatorConfig::default();

        if let Some(raw) = overrides.propagation.as_ref().or(self.waits.propagation.as_ref()) {
            config.propagation_wait =
                parse_duration(raw).context("Invalid propagation wait")?;
        }
        if let Some(raw) = overrides.settle.as_ref().or(self.waits.settle.as_ref()) {
            config.settle_wait = parse_duration(raw).context("Invalid settle wait")?;
        }

        let total = config.propagation_wait + config.settle_wait;
        ensure!(
            total <= MAX_TOTAL_WAIT,
            "Propagation and settle waits add up to {}, the limit is {}",
            humantime::format_duration(total),
            humantime::format_duration(MAX_TOTAL_WAIT)
        );

        Ok(config)
    }
}

/// Parse a wait: a humantime string (`250ms`, `1s 500ms`) or a bare number of seconds
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<f64>() {
        ensure!(
            seconds.is_finite() && seconds >= 0.0,
            "Duration must be a non-negative number of seconds, got {raw}"
        );
        return Ok(Duration::from_secs_f64(seconds));
    }

    humantime::parse_duration(raw).map_err(|e| anyhow!("Invalid duration {raw:?}: {e}"))
}

use std::env;
use std::io::Write;

use crate::prelude::*;
use console::Style;
use log::Log;
use simplelog::{CombinedLogger, SharedLogger};

pub const LOG_LEVEL_ENV: &str = "REAPER_LOG";

pub struct LocalLogger {
    log_level: log::LevelFilter,
}

impl LocalLogger {
    pub fn new() -> Self {
        let log_level = env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info);

        LocalLogger { log_level }
    }
}

impl Log for LocalLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.log_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        print_record(record);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Diagnostics go to stderr so `--json` output on stdout stays parseable.
fn print_record(record: &log::Record) {
    let message = match record.level() {
        log::Level::Error => Style::new()
            .red()
            .bold()
            .apply_to(format!("error: {}", record.args())),
        log::Level::Warn => Style::new()
            .yellow()
            .apply_to(format!("warning: {}", record.args())),
        log::Level::Info => Style::new().apply_to(record.args().to_string()),
        log::Level::Debug => Style::new()
            .blue()
            .dim()
            .apply_to(format!("[{}] {}", short_target(record.target()), record.args())),
        log::Level::Trace => Style::new()
            .black()
            .dim()
            .apply_to(format!("[{}] {}", short_target(record.target()), record.args())),
    };
    eprintln!("{message}");
}

/// `reaper_core::group::cgroup` becomes `group::cgroup`
fn short_target(target: &str) -> &str {
    target
        .split_once("::")
        .map(|(_, rest)| rest)
        .unwrap_or(target)
}

impl SharedLogger for LocalLogger {
    fn level(&self) -> log::LevelFilter {
        self.log_level
    }

    fn config(&self) -> Option<&simplelog::Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    Box::new(LocalLogger::new())
}

pub fn init_local_logger() -> Result<()> {
    let logger = get_local_logger();
    CombinedLogger::init(vec![logger])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("reaper_core::group::cgroup"), "group::cgroup");
        assert_eq!(short_target("reaper"), "reaper");
    }

    #[test]
    fn test_log_level_from_env() {
        temp_env::with_var(LOG_LEVEL_ENV, Some("debug"), || {
            assert_eq!(LocalLogger::new().log_level, log::LevelFilter::Debug);
        });
        temp_env::with_var(LOG_LEVEL_ENV, Some("not-a-level"), || {
            assert_eq!(LocalLogger::new().log_level, log::LevelFilter::Info);
        });
        temp_env::with_var_unset(LOG_LEVEL_ENV, || {
            assert_eq!(LocalLogger::new().log_level, log::LevelFilter::Info);
        });
    }
}

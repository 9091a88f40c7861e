use std::collections::BTreeSet;
use std::process::ExitCode;
use std::time::Duration;

use crate::config::{ContainmentMode, ReaperConfig, parse_duration};
use crate::prelude::*;
use itertools::Itertools;
use reaper_core::{ProcessId, TerminationReport};

/// Processes survived the teardown
pub const EXIT_LEAKED: u8 = 2;

pub fn parse_duration_arg(raw: &str) -> std::result::Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

/// The command line flag wins over the configuration file
pub fn containment_mode(flag: Option<ContainmentMode>, config: &ReaperConfig) -> ContainmentMode {
    flag.unwrap_or(config.containment)
}

pub fn format_pids(pids: &BTreeSet<ProcessId>) -> String {
    pids.iter().join(", ")
}

pub fn format_report(report: &TerminationReport) -> String {
    let mut lines = vec![format!(
        "Terminated {}: {} killed, {} leaked",
        report.root,
        report.killed.len(),
        report.leaked()
    )];

    match report.group_triggered {
        Some(true) => lines.push("Containment group: triggered".to_string()),
        Some(false) => lines.push("Containment group: trigger failed".to_string()),
        None => {}
    }
    if !report.still_alive.is_empty() {
        lines.push(format!("Still alive: {}", format_pids(&report.still_alive)));
    }
    for (pid, reason) in &report.failures {
        lines.push(format!("Failed to kill {pid}: {reason}"));
    }

    lines.join("\n")
}

pub fn print_report(report: &TerminationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", format_report(report));
    }
    Ok(())
}

pub fn report_exit_status(report: &TerminationReport) -> u8 {
    if report.is_clean() { 0 } else { EXIT_LEAKED }
}

pub fn report_exit_code(report: &TerminationReport) -> ExitCode {
    ExitCode::from(report_exit_status(report))
}

use std::process::ExitCode;

use super::shared::{print_report, report_exit_code};
use crate::prelude::*;
use clap::Args;
use reaper_core::{ProcessControl, ProcessId, TreeTerminator};

#[derive(Debug, Args)]
pub struct KillArgs {
    /// Root of the tree to terminate
    pub pid: ProcessId,

    /// Print the termination report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run<C: ProcessControl>(args: KillArgs, terminator: &TreeTerminator<C>) -> Result<ExitCode> {
    ensure!(
        args.pid.as_u32() != std::process::id(),
        "Refusing to terminate the reaper process itself"
    );
    ensure!(args.pid.as_u32() != 1, "Refusing to terminate PID 1");

    let report = terminator.terminate(args.pid, None)?;
    if report.killed.is_empty() && report.is_clean() {
        info!("Nothing left to terminate under {}", args.pid);
    }

    print_report(&report, args.json)?;
    Ok(report_exit_code(&report))
}

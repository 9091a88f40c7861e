use std::process::{Command, ExitCode};
use std::time::Duration;

use super::shared::{containment_mode, parse_duration_arg, print_report, report_exit_code};
use crate::config::{ContainmentMode, ReaperConfig};
use crate::prelude::*;
use crate::session::Session;
use clap::Args;
use reaper_core::{ProcessControl, TreeTerminator};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// How to contain the session. Defaults to the configured mode
    #[arg(long, value_enum)]
    pub containment: Option<ContainmentMode>,

    /// Tear the session down after this long even if the command is still running
    #[arg(long, value_parser = parse_duration_arg, value_name = "DURATION")]
    pub timeout: Option<Duration>,

    /// Print the termination report as JSON
    #[arg(long)]
    pub json: bool,

    /// The command to host, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub fn run<C: ProcessControl>(
    args: RunArgs,
    config: &ReaperConfig,
    terminator: &TreeTerminator<C>,
) -> Result<ExitCode> {
    let (program, program_args) = args.command.split_first().context("No command given")?;
    let mode = containment_mode(args.containment, config);
    debug!("Running `{}` with {mode:?} containment", shell_words::join(&args.command));

    let mut command = Command::new(program);
    command.args(program_args);
    let mut session = Session::start(command, mode, config.cgroup_parent.clone())?;

    match session.wait(args.timeout)? {
        Some(status) => info!("Command exited with {status}, tearing down its session"),
        None => warn!(
            "Command still running after {}, tearing down its session",
            humantime::format_duration(args.timeout.unwrap_or_default())
        ),
    }

    let outcome = session.end(terminator)?;
    if let Some(status) = outcome.root_status {
        debug!("Session root reaped with {status}");
    }
    print_report(&outcome.report, args.json)?;
    Ok(report_exit_code(&outcome.report))
}

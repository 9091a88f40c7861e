use std::collections::BTreeSet;
use std::process::{Command, ExitCode};
use std::thread;
use std::time::{Duration, Instant};

use super::shared::{EXIT_LEAKED, containment_mode, format_pids, print_report};
use super::tree::render_tree;
use crate::config::{ContainmentMode, ReaperConfig};
use crate::prelude::*;
use crate::pty::Pty;
use crate::session::Session;
use clap::Args;
use reaper_core::{ProcessControl, ProcessId, ProcessTree, TreeTerminator, resolve};

/// Three generations below the shell: a subshell, its own subshell, and a sleep in each
const THREE_GENERATIONS: &str = r#"sh -c 'sh -c "sleep 300; true" & sleep 300; wait' &"#;
const TREE_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// The shell hosted in the pseudo-terminal. Must understand POSIX job syntax
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// How to contain the session. Defaults to the configured mode
    #[arg(long, value_enum)]
    pub containment: Option<ContainmentMode>,

    /// Print the termination report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run<C: ProcessControl>(
    args: ProbeArgs,
    config: &ReaperConfig,
    terminator: &TreeTerminator<C>,
) -> Result<ExitCode> {
    let mode = containment_mode(args.containment, config);

    let mut pty = Pty::open()?;
    let mut command = Command::new(&args.shell);
    pty.attach(&mut command)?;
    let session = Session::start(command, mode, config.cgroup_parent.clone())?;
    pty.drain()?;
    println!(
        "Hosting `{}` as session {} (containment: {}{})",
        args.shell,
        session.root_pid(),
        session.group().map(|group| group.backend_name()).unwrap_or("none"),
        if session.observation_only() {
            ", observation-only"
        } else {
            ""
        }
    );

    let ready = pty
        .write_line(THREE_GENERATIONS)
        .and_then(|()| wait_for_generations(terminator.control(), session.root_pid(), 3));
    let tree = match ready {
        Ok(tree) => tree,
        Err(e) => {
            // Still tear down whatever the shell managed to start
            if let Err(end_err) = session.end(terminator) {
                warn!("Failed to tear down the probe session: {end_err}");
            }
            return Err(e);
        }
    };
    println!("Process tree of the hosted shell:");
    print!("{}", render_tree(&tree));

    let outcome = session.end(terminator)?;
    print_report(&outcome.report, args.json)?;

    let orphans: BTreeSet<ProcessId> = tree
        .members()
        .filter(|record| terminator.control().is_alive(record))
        .map(|record| record.pid)
        .collect();
    if orphans.is_empty() {
        println!("Orphan check: no orphans");
        Ok(ExitCode::SUCCESS)
    } else {
        error!("Orphan check: {} orphans left: {}", orphans.len(), format_pids(&orphans));
        Ok(ExitCode::from(EXIT_LEAKED))
    }
}

fn wait_for_generations(
    control: &impl ProcessControl,
    root: ProcessId,
    depth: usize,
) -> Result<ProcessTree> {
    let deadline = Instant::now() + TREE_READY_TIMEOUT;
    loop {
        let tree = resolve(root, &control.capture()?);
        ensure!(tree.apex().is_some(), "The hosted shell {root} exited early");
        if tree.max_depth() >= depth {
            debug!("Tree of {root} reached {depth} generations with {} processes", tree.len());
            return Ok(tree);
        }
        if Instant::now() >= deadline {
            bail!(
                "The tree of {root} did not reach {depth} generations within {}",
                humantime::format_duration(TREE_READY_TIMEOUT)
            );
        }
        thread::sleep(Duration::from_millis(50));
    }
}

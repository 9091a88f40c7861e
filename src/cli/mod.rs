mod kill;
mod probe;
mod run;
mod shared;
mod tree;

use std::process::ExitCode;

use crate::{
    config::{ReaperConfig, WaitConfig},
    local_logger::init_local_logger,
    prelude::*,
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};
use reaper_core::{LinuxProcessControl, TreeTerminator};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Red.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Red.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::White.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Tear down session process trees without leaving orphans",
    styles = create_styles()
)]
pub struct Cli {
    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/reaper/{config-name}.yaml
    /// Otherwise, loads from ~/.config/reaper/config.yaml
    #[arg(long, env = "REAPER_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    /// How long a group kill may take to propagate before the sweep, e.g. `500ms`
    #[arg(long, global = true, value_name = "DURATION")]
    pub propagation_wait: Option<String>,

    /// How long swept processes may take to die before the final liveness check
    #[arg(long, global = true, value_name = "DURATION")]
    pub settle_wait: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the process tree rooted at a PID
    Tree(tree::TreeArgs),
    /// Terminate a process and all of its descendants
    Kill(kill::KillArgs),
    /// Run a command as a contained session and tear it down once it exits
    Run(run::RunArgs),
    /// Host a shell in a pseudo-terminal, spawn a three-generation tree in it, tear the
    /// session down and check for orphans
    Probe(probe::ProbeArgs),
}

impl Cli {
    fn wait_overrides(&self) -> WaitConfig {
        WaitConfig {
            propagation: self.propagation_wait.clone(),
            settle: self.settle_wait.clone(),
        }
    }
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_local_logger()?;

    let config = ReaperConfig::load(cli.config_name.as_deref())?;
    let terminator = TreeTerminator::new(
        LinuxProcessControl,
        config.terminator_config(&cli.wait_overrides())?,
    );
    debug!("Terminator configuration: {:?}", terminator.config());

    match cli.command {
        Commands::Tree(args) => tree::run(args, terminator.control()),
        Commands::Kill(args) => kill::run(args, &terminator),
        Commands::Run(args) => run::run(args, &config, &terminator),
        Commands::Probe(args) => probe::run(args, &config, &terminator),
    }
}

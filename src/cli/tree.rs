use std::process::ExitCode;

use crate::prelude::*;
use clap::Args;
use reaper_core::{ProcessControl, ProcessId, ProcessTree, resolve};

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Root of the tree
    pub pid: ProcessId,

    /// Print the tree as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: TreeArgs, control: &impl ProcessControl) -> Result<ExitCode> {
    let snapshot = control.capture()?;
    let tree = resolve(args.pid, &snapshot);
    if tree.apex().is_none() {
        bail!("No running process with PID {}", args.pid);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print!("{}", render_tree(&tree));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn render_tree(tree: &ProcessTree) -> String {
    let mut out = String::new();
    if let Some(apex) = tree.apex() {
        out.push_str(&format!("{} {}\n", apex.pid, apex.image_name));
    }
    render_children(tree, tree.root(), "", &mut out);
    out
}

fn render_children(tree: &ProcessTree, parent: ProcessId, prefix: &str, out: &mut String) {
    let children: Vec<_> = tree.children_of(parent).collect();
    for (i, child) in children.iter().enumerate() {
        let (branch, indent) = if i + 1 == children.len() {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        out.push_str(&format!(
            "{prefix}{branch}{} {}\n",
            child.record.pid, child.record.image_name
        ));
        render_children(tree, child.record.pid, &format!("{prefix}{indent}"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::{ProcessRecord, Snapshot};

    fn record(pid: u32, ppid: u32, name: &str) -> ProcessRecord {
        ProcessRecord {
            pid: ProcessId::new(pid).unwrap(),
            parent_pid: ProcessId::new(ppid),
            image_name: name.to_string(),
            start_time: u64::from(pid),
        }
    }

    #[test]
    fn test_render_three_generations() {
        let snapshot = Snapshot::new([
            record(1, 0, "init"),
            record(100, 1, "bash"),
            record(101, 100, "sh"),
            record(102, 101, "sh"),
            record(103, 102, "sleep"),
            record(104, 101, "sleep"),
            record(105, 100, "vim"),
            record(200, 1, "sshd"),
        ]);
        let tree = resolve(ProcessId::new(100).unwrap(), &snapshot);

        insta::assert_snapshot!(render_tree(&tree), @r"
        100 bash
        ├── 101 sh
        │   ├── 102 sh
        │   │   └── 103 sleep
        │   └── 104 sleep
        └── 105 vim
        ");
    }

    #[test]
    fn test_render_leaf() {
        let snapshot = Snapshot::new([record(1, 0, "init"), record(42, 1, "sleep")]);
        let tree = resolve(ProcessId::new(42).unwrap(), &snapshot);
        assert_eq!(render_tree(&tree), "42 sleep\n");
    }
}

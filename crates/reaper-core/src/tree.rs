use crate::process::{ProcessId, ProcessRecord};
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub record: ProcessRecord,
    /// Distance from the root, direct children are at depth 1
    pub depth: usize,
}

/// Descendants of a root process, in breadth-first order.
///
/// The root is not part of the descendant set. It is kept as the apex when the snapshot
/// still lists it, so that a sweep can terminate it last.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessTree {
    root: ProcessId,
    apex: Option<ProcessRecord>,
    nodes: Vec<TreeNode>,
}

/// Compute every transitive child of `root` in `snapshot`.
///
/// Never fails: a root that is missing from the snapshot, or that has no children, yields
/// an empty tree. Each pid is expanded at most once, so a corrupted snapshot containing a
/// parent cycle cannot make this loop forever.
pub fn resolve(root: ProcessId, snapshot: &Snapshot) -> ProcessTree {
    let mut children: HashMap<ProcessId, Vec<&ProcessRecord>> = HashMap::new();
    for record in snapshot.records() {
        if let Some(parent) = record.parent_pid {
            if parent != record.pid {
                children.entry(parent).or_default().push(record);
            }
        }
    }

    let mut visited = HashSet::from([root]);
    let mut nodes = Vec::new();
    let mut queue = VecDeque::from([(root, 0)]);

    while let Some((pid, depth)) = queue.pop_front() {
        let Some(direct_children) = children.get(&pid) else {
            continue;
        };

        for child in direct_children {
            if !visited.insert(child.pid) {
                continue;
            }
            nodes.push(TreeNode {
                record: (*child).clone(),
                depth: depth + 1,
            });
            queue.push_back((child.pid, depth + 1));
        }
    }

    ProcessTree {
        root,
        apex: snapshot.get(root).cloned(),
        nodes,
    }
}

impl ProcessTree {
    pub fn root(&self) -> ProcessId {
        self.root
    }

    /// The root's own record, if it was alive when the snapshot was taken.
    pub fn apex(&self) -> Option<&ProcessRecord> {
        self.apex.as_ref()
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn descendants(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.nodes.iter().map(|node| &node.record)
    }

    /// Number of descendants, the root excluded.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.nodes.iter().any(|node| node.record.pid == pid)
    }

    pub fn children_of(&self, pid: ProcessId) -> impl Iterator<Item = &TreeNode> {
        self.nodes
            .iter()
            .filter(move |node| node.record.parent_pid == Some(pid))
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(0)
    }

    /// Every live member of the tree: the apex (when present) followed by the descendants.
    pub fn members(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.apex.iter().chain(self.descendants())
    }

    /// Termination order: deepest descendants first, the apex last.
    ///
    /// A child always comes before its parent since its depth is strictly greater.
    pub fn sweep_order(&self) -> Vec<&ProcessRecord> {
        let mut order: Vec<&TreeNode> = self.nodes.iter().collect();
        order.sort_by(|a, b| b.depth.cmp(&a.depth));

        order
            .into_iter()
            .map(|node| &node.record)
            .chain(self.apex.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pid, record};

    fn three_generation_snapshot() -> Snapshot {
        Snapshot::new([
            record(1, 0, "init"),
            record(100, 1, "sh"),
            record(101, 100, "sleep"),
            record(102, 100, "sh"),
            record(103, 102, "sh"),
            record(104, 103, "sleep"),
            record(200, 1, "unrelated"),
            record(201, 200, "child-of-unrelated"),
        ])
    }

    #[test]
    fn test_resolve_returns_every_descendant_and_excludes_root() {
        let tree = resolve(pid(100), &three_generation_snapshot());

        assert_eq!(tree.len(), 4);
        assert!(!tree.contains(pid(100)));
        assert_eq!(tree.apex().map(|r| r.pid), Some(pid(100)));
        assert_eq!(tree.max_depth(), 3);

        let snapshot = three_generation_snapshot();
        for descendant in tree.descendants() {
            // Walk parent edges back up: must reach the root
            let mut current = descendant.parent_pid;
            let mut reached_root = false;
            while let Some(parent) = current {
                if parent == pid(100) {
                    reached_root = true;
                    break;
                }
                current = snapshot.get(parent).and_then(|r| r.parent_pid);
            }
            assert!(reached_root, "{} is not reachable from root", descendant.pid);
        }
    }

    #[test]
    fn test_resolve_ignores_unrelated_processes() {
        let tree = resolve(pid(100), &three_generation_snapshot());

        assert!(!tree.contains(pid(200)));
        assert!(!tree.contains(pid(201)));
        assert!(!tree.contains(pid(1)));
    }

    #[test]
    fn test_resolve_depths() {
        let tree = resolve(pid(100), &three_generation_snapshot());
        let depth_of = |p: u32| {
            tree.nodes()
                .iter()
                .find(|n| n.record.pid == pid(p))
                .map(|n| n.depth)
        };

        assert_eq!(depth_of(101), Some(1));
        assert_eq!(depth_of(102), Some(1));
        assert_eq!(depth_of(103), Some(2));
        assert_eq!(depth_of(104), Some(3));
    }

    #[test]
    fn test_resolve_missing_root_is_empty() {
        let tree = resolve(pid(999), &three_generation_snapshot());

        assert!(tree.is_empty());
        assert!(tree.apex().is_none());
        assert!(tree.sweep_order().is_empty());
    }

    #[test]
    fn test_resolve_leaf_root_has_no_descendants() {
        let tree = resolve(pid(104), &three_generation_snapshot());

        assert!(tree.is_empty());
        assert_eq!(tree.sweep_order().len(), 1);
    }

    #[test]
    fn test_resolve_survives_parent_cycle() {
        let snapshot = Snapshot::new([
            record(10, 12, "a"),
            record(11, 10, "b"),
            record(12, 11, "c"),
            record(13, 13, "self-parent"),
        ]);

        let tree = resolve(pid(10), &snapshot);
        assert_eq!(tree.len(), 2);
        assert!(tree.contains(pid(11)));
        assert!(tree.contains(pid(12)));
        assert!(!tree.contains(pid(10)));

        let tree = resolve(pid(13), &snapshot);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_sweep_order_children_before_parents_root_last() {
        let tree = resolve(pid(100), &three_generation_snapshot());
        let order: Vec<ProcessId> = tree.sweep_order().iter().map(|r| r.pid).collect();

        assert_eq!(order.last(), Some(&pid(100)));
        let position = |p: ProcessId| order.iter().position(|x| *x == p).unwrap();
        for node in tree.nodes() {
            let parent = node.record.parent_pid.unwrap();
            assert!(
                position(node.record.pid) < position(parent),
                "{} must be swept before its parent {}",
                node.record.pid,
                parent
            );
        }
    }

    #[test]
    fn test_children_of() {
        let tree = resolve(pid(100), &three_generation_snapshot());
        let children: Vec<ProcessId> = tree.children_of(pid(100)).map(|n| n.record.pid).collect();

        assert_eq!(children, vec![pid(101), pid(102)]);
    }
}

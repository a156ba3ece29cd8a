//! Action dependencies derived from node acquire/release semantics.
//!
//! An action *frees* a node when a VM leaves it or when the node becomes
//! available (boot). An action *demands* a node when it needs room on it
//! or needs it empty (node shutdown). An action depends on every action
//! that frees one of its demanded nodes and ends no later than it starts.

use std::collections::BTreeMap;

use crate::action::{Action, ActionKind};
use crate::types::NodeId;

/// Indexes the actions of a plan by the nodes they free and demand.
///
/// Actions are referenced by their position in the plan's action list.
#[derive(Debug, Clone, Default)]
pub struct DependencyExtractor {
    freeings: BTreeMap<NodeId, Vec<usize>>,
    demandings: BTreeMap<NodeId, Vec<usize>>,
}

impl DependencyExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one action. Actions may be visited in any order.
    pub fn visit(&mut self, idx: usize, a: &Action) {
        let (frees, demands) = footprint(a);
        for n in frees.into_iter().flatten() {
            self.freeings.entry(n).or_default().push(idx);
        }
        for n in demands.into_iter().flatten() {
            self.demandings.entry(n).or_default().push(idx);
        }
    }

    /// Indices of the actions `actions[idx]` directly depends on.
    pub fn dependencies(&self, actions: &[Action], idx: usize) -> Vec<usize> {
        let Some(a) = actions.get(idx) else {
            return Vec::new();
        };
        let mut deps: Vec<usize> = self
            .demandings
            .iter()
            .filter(|(_, demanders)| demanders.contains(&idx))
            .filter_map(|(n, _)| self.freeings.get(n))
            .flatten()
            .copied()
            .filter(|x| *x != idx && actions[*x].end <= a.start)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

/// Nodes freed and demanded by an action, at most two of each.
fn footprint(a: &Action) -> ([Option<NodeId>; 2], [Option<NodeId>; 2]) {
    match &a.kind {
        ActionKind::MigrateVm { from, to, .. } => ([Some(*from), None], [Some(*to), None]),
        ActionKind::BootVm { node, .. } | ActionKind::Allocate { node, .. } => {
            ([None, None], [Some(*node), None])
        }
        ActionKind::ShutdownVm { node, .. } => ([Some(*node), None], [None, None]),
        ActionKind::SuspendVm { from, to, .. } => {
            let demand = (from != to).then_some(*to);
            ([Some(*from), None], [demand, None])
        }
        ActionKind::ResumeVm { from, to, .. } => {
            let free = (from != to).then_some(*from);
            ([free, None], [Some(*to), None])
        }
        ActionKind::KillVm { node, .. } => ([*node, None], [None, None]),
        ActionKind::BootNode { node } => ([Some(*node), None], [None, None]),
        ActionKind::ShutdownNode { node } => ([None, None], [Some(*node), None]),
        ActionKind::ForgeVm { .. } => ([None, None], [None, None]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VmId;

    fn extract(actions: &[Action]) -> DependencyExtractor {
        let mut ex = DependencyExtractor::new();
        for (i, a) in actions.iter().enumerate() {
            ex.visit(i, a);
        }
        ex
    }

    #[test]
    fn boot_vm_waits_for_node_boot() {
        let n = NodeId(0);
        let actions = vec![
            Action::boot_node(n, 0, 3),
            Action::boot_vm(VmId(0), n, 3, 4),
        ];
        let ex = extract(&actions);
        assert_eq!(ex.dependencies(&actions, 1), vec![0]);
        assert!(ex.dependencies(&actions, 0).is_empty());
    }

    #[test]
    fn shutdown_node_waits_for_vms_leaving() {
        let (n1, n2) = (NodeId(1), NodeId(2));
        let actions = vec![
            Action::migrate_vm(VmId(0), n1, n2, 0, 2),
            Action::shutdown_vm(VmId(1), n1, 0, 1),
            Action::shutdown_node(n1, 2, 5),
            // Ends too late to be a dependency.
            Action::suspend_vm(VmId(2), n1, n1, 0, 6),
        ];
        let ex = extract(&actions);
        assert_eq!(ex.dependencies(&actions, 2), vec![0, 1]);
    }

    #[test]
    fn local_suspend_demands_nothing() {
        let n = NodeId(0);
        let actions = vec![
            Action::shutdown_vm(VmId(1), n, 0, 1),
            Action::suspend_vm(VmId(0), n, n, 1, 2),
            Action::resume_vm(VmId(2), NodeId(3), n, 1, 2),
        ];
        let ex = extract(&actions);
        assert!(ex.dependencies(&actions, 1).is_empty());
        assert_eq!(ex.dependencies(&actions, 2), vec![0]);
    }

    #[test]
    fn queries_are_idempotent() {
        let n = NodeId(0);
        let actions = vec![
            Action::boot_node(n, 0, 1),
            Action::boot_vm(VmId(0), n, 1, 2),
            Action::allocate(VmId(0), n, "mem", 3, 2, 2),
        ];
        let ex = extract(&actions);
        let first = ex.dependencies(&actions, 2);
        assert_eq!(first, ex.dependencies(&actions, 2));
        assert_eq!(first, vec![0]);
    }
}

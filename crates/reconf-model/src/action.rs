//! Scheduled actions.
//!
//! An [`Action`] is a concrete operation with a `[start, end)` interval.
//! Kinds form a closed set so the applier, the dependency extractor and
//! the checkers all dispatch with exhaustive `match`es.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::types::{NodeId, VmId};

/// A timed operation on a node or a VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub start: i32,
    pub end: i32,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// The typed payload of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ActionKind {
    #[serde(rename = "bootNode")]
    BootNode { node: NodeId },
    #[serde(rename = "shutdownNode")]
    ShutdownNode { node: NodeId },
    #[serde(rename = "bootVM")]
    BootVm { vm: VmId, node: NodeId },
    #[serde(rename = "shutdownVM")]
    ShutdownVm { vm: VmId, node: NodeId },
    #[serde(rename = "migrateVM")]
    MigrateVm { vm: VmId, from: NodeId, to: NodeId },
    #[serde(rename = "suspendVM")]
    SuspendVm { vm: VmId, from: NodeId, to: NodeId },
    #[serde(rename = "resumeVM")]
    ResumeVm { vm: VmId, from: NodeId, to: NodeId },
    /// `node` is absent when the VM was ready.
    #[serde(rename = "killVM")]
    KillVm { vm: VmId, node: Option<NodeId> },
    #[serde(rename = "forgeVM")]
    ForgeVm { vm: VmId },
    #[serde(rename = "allocate")]
    Allocate {
        vm: VmId,
        node: NodeId,
        resource: String,
        amount: i64,
    },
}

/// Which kind of checker event an action produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    /// The action changes a node's lifecycle.
    NodeState,
    /// The action moves a VM into or out of a node.
    Placement,
    /// Anything else.
    Other,
}

impl Action {
    pub fn new(start: i32, end: i32, kind: ActionKind) -> Self {
        Self { start, end, kind }
    }

    pub fn boot_node(node: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::BootNode { node })
    }

    pub fn shutdown_node(node: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::ShutdownNode { node })
    }

    pub fn boot_vm(vm: VmId, node: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::BootVm { vm, node })
    }

    pub fn shutdown_vm(vm: VmId, node: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::ShutdownVm { vm, node })
    }

    pub fn migrate_vm(vm: VmId, from: NodeId, to: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::MigrateVm { vm, from, to })
    }

    pub fn suspend_vm(vm: VmId, from: NodeId, to: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::SuspendVm { vm, from, to })
    }

    pub fn resume_vm(vm: VmId, from: NodeId, to: NodeId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::ResumeVm { vm, from, to })
    }

    pub fn kill_vm(vm: VmId, node: Option<NodeId>, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::KillVm { vm, node })
    }

    pub fn forge_vm(vm: VmId, start: i32, end: i32) -> Self {
        Self::new(start, end, ActionKind::ForgeVm { vm })
    }

    pub fn allocate(vm: VmId, node: NodeId, resource: &str, amount: i64, start: i32, end: i32) -> Self {
        Self::new(
            start,
            end,
            ActionKind::Allocate {
                vm,
                node,
                resource: resource.to_string(),
                amount,
            },
        )
    }

    /// The VM the action manipulates, if any.
    pub fn vm(&self) -> Option<VmId> {
        match &self.kind {
            ActionKind::BootNode { .. } | ActionKind::ShutdownNode { .. } => None,
            ActionKind::BootVm { vm, .. }
            | ActionKind::ShutdownVm { vm, .. }
            | ActionKind::MigrateVm { vm, .. }
            | ActionKind::SuspendVm { vm, .. }
            | ActionKind::ResumeVm { vm, .. }
            | ActionKind::KillVm { vm, .. }
            | ActionKind::ForgeVm { vm }
            | ActionKind::Allocate { vm, .. } => Some(*vm),
        }
    }

    pub fn category(&self) -> ActionCategory {
        match &self.kind {
            ActionKind::BootNode { .. } | ActionKind::ShutdownNode { .. } => {
                ActionCategory::NodeState
            }
            ActionKind::BootVm { .. }
            | ActionKind::ShutdownVm { .. }
            | ActionKind::MigrateVm { .. }
            | ActionKind::SuspendVm { .. }
            | ActionKind::ResumeVm { .. }
            | ActionKind::KillVm { .. } => ActionCategory::Placement,
            ActionKind::ForgeVm { .. } | ActionKind::Allocate { .. } => ActionCategory::Other,
        }
    }

    /// Apply the action on a model.
    ///
    /// Returns `false` without touching the model when the action guard
    /// does not hold (e.g. booting a node that is already online).
    pub fn apply(&self, mo: &mut Model) -> bool {
        let map = mo.mapping_mut();
        match &self.kind {
            ActionKind::BootNode { node } => map.is_offline(*node) && map.add_online_node(*node),
            ActionKind::ShutdownNode { node } => {
                map.is_online(*node) && map.add_offline_node(*node)
            }
            ActionKind::BootVm { vm, node } => map.is_ready(*vm) && map.add_running_vm(*vm, *node),
            ActionKind::ShutdownVm { vm, node } => {
                map.is_running(*vm) && map.vm_location(*vm) == Some(*node) && map.add_ready_vm(*vm)
            }
            ActionKind::MigrateVm { vm, from, to } => {
                map.is_online(*from)
                    && map.is_running(*vm)
                    && map.vm_location(*vm) == Some(*from)
                    && map.add_running_vm(*vm, *to)
            }
            ActionKind::SuspendVm { vm, from, to } => {
                map.is_running(*vm)
                    && map.vm_location(*vm) == Some(*from)
                    && map.add_sleeping_vm(*vm, *to)
            }
            ActionKind::ResumeVm { vm, from, to } => {
                map.is_sleeping(*vm)
                    && map.vm_location(*vm) == Some(*from)
                    && map.add_running_vm(*vm, *to)
            }
            ActionKind::KillVm { vm, node } => {
                map.contains_vm(*vm) && map.vm_location(*vm) == *node && map.remove_vm(*vm)
            }
            ActionKind::ForgeVm { vm } => !map.contains_vm(*vm) && map.add_ready_vm(*vm),
            ActionKind::Allocate {
                vm,
                node,
                resource,
                amount,
            } => {
                if !(map.is_running(*vm) && map.vm_location(*vm) == Some(*node)) {
                    return false;
                }
                match mo.view_mut(resource) {
                    Ok(view) => {
                        view.set_consumption(*vm, *amount);
                        true
                    }
                    Err(_) => false,
                }
            }
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootNode { node } => write!(f, "boot(node={node})"),
            Self::ShutdownNode { node } => write!(f, "shutdown(node={node})"),
            Self::BootVm { vm, node } => write!(f, "boot(vm={vm}, on={node})"),
            Self::ShutdownVm { vm, node } => write!(f, "shutdown(vm={vm}, on={node})"),
            Self::MigrateVm { vm, from, to } => write!(f, "migrate(vm={vm}, from={from}, to={to})"),
            Self::SuspendVm { vm, from, to } => write!(f, "suspend(vm={vm}, from={from}, to={to})"),
            Self::ResumeVm { vm, from, to } => write!(f, "resume(vm={vm}, from={from}, to={to})"),
            Self::KillVm { vm, node: Some(node) } => write!(f, "kill(vm={vm}, on={node})"),
            Self::KillVm { vm, node: None } => write!(f, "kill(vm={vm})"),
            Self::ForgeVm { vm } => write!(f, "forge(vm={vm})"),
            Self::Allocate {
                vm,
                node,
                resource,
                amount,
            } => write!(f, "allocate(vm={vm}, on={node}, rc={resource}, amount={amount})"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.start, self.end, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ShareableResource;

    fn model() -> (Model, NodeId, NodeId, VmId) {
        let mut mo = Model::new();
        let n1 = mo.new_node();
        let n2 = mo.new_node();
        let vm = mo.new_vm();
        mo.mapping_mut().add_online_node(n1);
        mo.mapping_mut().add_online_node(n2);
        mo.mapping_mut().add_running_vm(vm, n1);
        (mo, n1, n2, vm)
    }

    #[test]
    fn shutdown_node_requires_online_and_empty() {
        let (mut mo, n1, n2, _) = model();
        assert!(!Action::shutdown_node(n1, 0, 3).apply(&mut mo));
        assert!(Action::shutdown_node(n2, 0, 3).apply(&mut mo));
        assert!(!Action::shutdown_node(n2, 3, 6).apply(&mut mo));
        assert!(mo.mapping().is_offline(n2));
    }

    #[test]
    fn migrate_checks_source_location() {
        let (mut mo, n1, n2, vm) = model();
        assert!(!Action::migrate_vm(vm, n2, n1, 0, 2).apply(&mut mo));
        assert!(Action::migrate_vm(vm, n1, n2, 0, 2).apply(&mut mo));
        assert_eq!(mo.mapping().vm_location(vm), Some(n2));
    }

    #[test]
    fn suspend_then_resume() {
        let (mut mo, n1, n2, vm) = model();
        assert!(Action::suspend_vm(vm, n1, n1, 0, 2).apply(&mut mo));
        assert!(mo.mapping().is_sleeping(vm));
        assert!(Action::resume_vm(vm, n1, n2, 2, 4).apply(&mut mo));
        assert_eq!(mo.mapping().vm_location(vm), Some(n2));
    }

    #[test]
    fn forge_then_boot_then_kill() {
        let (mut mo, n1, _, _) = model();
        let vm = mo.new_vm();
        assert!(!Action::boot_vm(vm, n1, 0, 1).apply(&mut mo));
        assert!(Action::forge_vm(vm, 0, 3).apply(&mut mo));
        assert!(!Action::forge_vm(vm, 3, 4).apply(&mut mo));
        assert!(Action::boot_vm(vm, n1, 3, 5).apply(&mut mo));
        assert!(!Action::kill_vm(vm, None, 5, 6).apply(&mut mo));
        assert!(Action::kill_vm(vm, Some(n1), 5, 6).apply(&mut mo));
        assert!(!mo.mapping().contains_vm(vm));
    }

    #[test]
    fn allocate_updates_view() {
        let (mut mo, n1, n2, vm) = model();
        assert!(!Action::allocate(vm, n1, "mem", 4, 0, 0).apply(&mut mo));
        mo.attach(ShareableResource::new("mem"));
        assert!(!Action::allocate(vm, n2, "mem", 4, 0, 0).apply(&mut mo));
        assert!(Action::allocate(vm, n1, "mem", 4, 0, 0).apply(&mut mo));
        assert_eq!(mo.view("mem").unwrap().consumption(vm), 4);
    }

    #[test]
    fn json_uses_stable_type_tag() {
        let a = Action::migrate_vm(VmId(1), NodeId(2), NodeId(3), 3, 5);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["id"], "migrateVM");
        assert_eq!(json["start"], 3);
        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn every_kind_roundtrips() {
        let (vm, n1, n2) = (VmId(1), NodeId(1), NodeId(2));
        let actions = [
            Action::boot_node(n1, 3, 5),
            Action::shutdown_node(n1, 3, 5),
            Action::boot_vm(vm, n1, 3, 5),
            Action::shutdown_vm(vm, n1, 3, 5),
            Action::suspend_vm(vm, n1, n2, 3, 5),
            Action::resume_vm(vm, n1, n2, 3, 5),
            Action::kill_vm(vm, Some(n1), 3, 5),
            Action::kill_vm(vm, None, 3, 5),
            Action::forge_vm(vm, 3, 5),
            Action::allocate(vm, n1, "foo", 4, 3, 5),
        ];
        for a in actions {
            let s = serde_json::to_string(&a).unwrap();
            assert_eq!(serde_json::from_str::<Action>(&s).unwrap(), a, "{s}");
        }
    }
}

//! VM-to-node assignment and node lifecycle.
//!
//! The mapping is the authoritative placement of a model snapshot. It is
//! only mutated through the guarded operations below, which are the ones
//! actions rely on when they are applied.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeState, VmId, VmState};

/// Placement of VMs on nodes plus node lifecycle states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    online: BTreeSet<NodeId>,
    offline: BTreeSet<NodeId>,
    running: BTreeMap<VmId, NodeId>,
    sleeping: BTreeMap<VmId, NodeId>,
    ready: BTreeSet<VmId>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ─────────────────────────────────────────────────────

    /// Set a node online. Always succeeds.
    pub fn add_online_node(&mut self, node: NodeId) -> bool {
        self.offline.remove(&node);
        self.online.insert(node);
        true
    }

    /// Set a node offline. Fails if the node still hosts VMs.
    pub fn add_offline_node(&mut self, node: NodeId) -> bool {
        if self.hosts_any(node) {
            return false;
        }
        self.online.remove(&node);
        self.offline.insert(node);
        true
    }

    /// Remove a node from the mapping. Fails if it hosts VMs.
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        if self.hosts_any(node) {
            return false;
        }
        self.online.remove(&node) | self.offline.remove(&node)
    }

    pub fn is_online(&self, node: NodeId) -> bool {
        self.online.contains(&node)
    }

    pub fn is_offline(&self, node: NodeId) -> bool {
        self.offline.contains(&node)
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.is_online(node) || self.is_offline(node)
    }

    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        if self.is_online(node) {
            Some(NodeState::Online)
        } else if self.is_offline(node) {
            Some(NodeState::Offline)
        } else {
            None
        }
    }

    pub fn online_nodes(&self) -> &BTreeSet<NodeId> {
        &self.online
    }

    pub fn offline_nodes(&self) -> &BTreeSet<NodeId> {
        &self.offline
    }

    /// Every node, online first then offline, each in id order.
    pub fn all_nodes(&self) -> BTreeSet<NodeId> {
        self.online.union(&self.offline).copied().collect()
    }

    fn hosts_any(&self, node: NodeId) -> bool {
        self.running.values().any(|n| *n == node) || self.sleeping.values().any(|n| *n == node)
    }

    // ── VMs ───────────────────────────────────────────────────────

    /// Run a VM on an online node, leaving whatever state it was in.
    pub fn add_running_vm(&mut self, vm: VmId, node: NodeId) -> bool {
        if !self.is_online(node) {
            return false;
        }
        self.detach(vm);
        self.running.insert(vm, node);
        true
    }

    /// Put a VM asleep on an online node, leaving whatever state it was in.
    pub fn add_sleeping_vm(&mut self, vm: VmId, node: NodeId) -> bool {
        if !self.is_online(node) {
            return false;
        }
        self.detach(vm);
        self.sleeping.insert(vm, node);
        true
    }

    /// Mark a VM as ready (defined but not placed).
    pub fn add_ready_vm(&mut self, vm: VmId) -> bool {
        self.detach(vm);
        self.ready.insert(vm);
        true
    }

    /// Remove a VM from the mapping entirely.
    pub fn remove_vm(&mut self, vm: VmId) -> bool {
        self.detach(vm)
    }

    fn detach(&mut self, vm: VmId) -> bool {
        self.running.remove(&vm).is_some()
            | self.sleeping.remove(&vm).is_some()
            | self.ready.remove(&vm)
    }

    pub fn is_running(&self, vm: VmId) -> bool {
        self.running.contains_key(&vm)
    }

    pub fn is_sleeping(&self, vm: VmId) -> bool {
        self.sleeping.contains_key(&vm)
    }

    pub fn is_ready(&self, vm: VmId) -> bool {
        self.ready.contains(&vm)
    }

    pub fn contains_vm(&self, vm: VmId) -> bool {
        self.is_running(vm) || self.is_sleeping(vm) || self.is_ready(vm)
    }

    /// The node hosting a running or sleeping VM.
    pub fn vm_location(&self, vm: VmId) -> Option<NodeId> {
        self.running
            .get(&vm)
            .or_else(|| self.sleeping.get(&vm))
            .copied()
    }

    pub fn vm_state(&self, vm: VmId) -> Option<VmState> {
        if self.is_running(vm) {
            Some(VmState::Running)
        } else if self.is_sleeping(vm) {
            Some(VmState::Sleeping)
        } else if self.is_ready(vm) {
            Some(VmState::Ready)
        } else {
            None
        }
    }

    pub fn running_vms(&self) -> BTreeSet<VmId> {
        self.running.keys().copied().collect()
    }

    pub fn sleeping_vms(&self) -> BTreeSet<VmId> {
        self.sleeping.keys().copied().collect()
    }

    pub fn ready_vms(&self) -> &BTreeSet<VmId> {
        &self.ready
    }

    /// Every VM in the mapping, in id order.
    pub fn all_vms(&self) -> BTreeSet<VmId> {
        self.running
            .keys()
            .chain(self.sleeping.keys())
            .chain(self.ready.iter())
            .copied()
            .collect()
    }

    /// VMs running on a given node.
    pub fn running_vms_on(&self, node: NodeId) -> BTreeSet<VmId> {
        self.running
            .iter()
            .filter(|(_, n)| **n == node)
            .map(|(vm, _)| *vm)
            .collect()
    }

    /// VMs sleeping on a given node.
    pub fn sleeping_vms_on(&self, node: NodeId) -> BTreeSet<VmId> {
        self.sleeping
            .iter()
            .filter(|(_, n)| **n == node)
            .map(|(vm, _)| *vm)
            .collect()
    }
}

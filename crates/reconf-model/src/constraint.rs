//! Placement constraints.
//!
//! A [`SatConstraint`] declares the VMs and nodes it involves and whether
//! its restriction is discrete (destination model only) or continuous
//! (every intermediate state of the plan). Kinds that only make sense
//! with one restriction carry no flag.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::types::{fmt_list, NodeId, VmId};

/// An administrator-supplied placement constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum SatConstraint {
    /// Running VMs are hosted on a single group of nodes.
    #[serde(rename = "among")]
    Among {
        vms: BTreeSet<VmId>,
        groups: Vec<BTreeSet<NodeId>>,
        #[serde(default)]
        continuous: bool,
    },
    /// Running VMs are hosted on pairwise distinct nodes.
    #[serde(rename = "spread")]
    Spread {
        vms: BTreeSet<VmId>,
        #[serde(default = "default_true")]
        continuous: bool,
    },
    /// VMs of distinct groups never share a node.
    #[serde(rename = "split")]
    Split {
        groups: Vec<BTreeSet<VmId>>,
        #[serde(default)]
        continuous: bool,
    },
    /// Each VM group sits on one node group, distinct VM groups on distinct node groups.
    #[serde(rename = "splitAmong")]
    SplitAmong {
        vm_groups: Vec<BTreeSet<VmId>>,
        node_groups: Vec<BTreeSet<NodeId>>,
        #[serde(default)]
        continuous: bool,
    },
    #[serde(rename = "offline")]
    Offline { node: NodeId },
    #[serde(rename = "online")]
    Online { node: NodeId },
    #[serde(rename = "running")]
    Running { vm: VmId },
    #[serde(rename = "ready")]
    Ready { vm: VmId },
    #[serde(rename = "sleeping")]
    Sleeping { vm: VmId },
    #[serde(rename = "killed")]
    Killed { vm: VmId },
    /// Running VMs never land on the given nodes.
    #[serde(rename = "ban")]
    Ban {
        vms: BTreeSet<VmId>,
        nodes: BTreeSet<NodeId>,
    },
    /// Running VMs only land on the given nodes.
    #[serde(rename = "fence")]
    Fence {
        vms: BTreeSet<VmId>,
        nodes: BTreeSet<NodeId>,
    },
    /// The VM is never relocated.
    #[serde(rename = "root")]
    Root { vm: VmId },
    /// At most `amount` of the nodes are online.
    #[serde(rename = "maxOnline")]
    MaxOnline {
        nodes: BTreeSet<NodeId>,
        amount: u32,
        #[serde(default)]
        continuous: bool,
    },
    /// Running VMs are granted at least `amount` of a resource.
    #[serde(rename = "preserve")]
    Preserve {
        vms: BTreeSet<VmId>,
        resource: String,
        amount: i64,
    },
    /// At most `amount` running VMs on each node.
    #[serde(rename = "singleRunningCapacity")]
    SingleRunningCapacity { nodes: BTreeSet<NodeId>, amount: u32 },
}

fn default_true() -> bool {
    true
}

impl SatConstraint {
    // ── Constructors ──────────────────────────────────────────────

    pub fn among(
        vms: impl IntoIterator<Item = VmId>,
        groups: Vec<BTreeSet<NodeId>>,
        continuous: bool,
    ) -> Self {
        Self::Among {
            vms: vms.into_iter().collect(),
            groups,
            continuous,
        }
    }

    pub fn spread(vms: impl IntoIterator<Item = VmId>, continuous: bool) -> Self {
        Self::Spread {
            vms: vms.into_iter().collect(),
            continuous,
        }
    }

    pub fn split(groups: Vec<BTreeSet<VmId>>, continuous: bool) -> Self {
        Self::Split { groups, continuous }
    }

    pub fn ban(vms: impl IntoIterator<Item = VmId>, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::Ban {
            vms: vms.into_iter().collect(),
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn fence(vms: impl IntoIterator<Item = VmId>, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::Fence {
            vms: vms.into_iter().collect(),
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn max_online(nodes: impl IntoIterator<Item = NodeId>, amount: u32, continuous: bool) -> Self {
        Self::MaxOnline {
            nodes: nodes.into_iter().collect(),
            amount,
            continuous,
        }
    }

    /// One `Offline` constraint per node.
    pub fn offline_all(nodes: impl IntoIterator<Item = NodeId>) -> Vec<Self> {
        nodes.into_iter().map(|node| Self::Offline { node }).collect()
    }

    /// One `Running` constraint per VM.
    pub fn running_all(vms: impl IntoIterator<Item = VmId>) -> Vec<Self> {
        vms.into_iter().map(|vm| Self::Running { vm }).collect()
    }

    /// One `Killed` constraint per VM.
    pub fn killed_all(vms: impl IntoIterator<Item = VmId>) -> Vec<Self> {
        vms.into_iter().map(|vm| Self::Killed { vm }).collect()
    }

    // ── Accessors ─────────────────────────────────────────────────

    /// Short kind name, matching the serialized type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Among { .. } => "among",
            Self::Spread { .. } => "spread",
            Self::Split { .. } => "split",
            Self::SplitAmong { .. } => "splitAmong",
            Self::Offline { .. } => "offline",
            Self::Online { .. } => "online",
            Self::Running { .. } => "running",
            Self::Ready { .. } => "ready",
            Self::Sleeping { .. } => "sleeping",
            Self::Killed { .. } => "killed",
            Self::Ban { .. } => "ban",
            Self::Fence { .. } => "fence",
            Self::Root { .. } => "root",
            Self::MaxOnline { .. } => "maxOnline",
            Self::Preserve { .. } => "preserve",
            Self::SingleRunningCapacity { .. } => "singleRunningCapacity",
        }
    }

    pub fn involved_vms(&self) -> BTreeSet<VmId> {
        match self {
            Self::Among { vms, .. }
            | Self::Spread { vms, .. }
            | Self::Ban { vms, .. }
            | Self::Fence { vms, .. }
            | Self::Preserve { vms, .. } => vms.clone(),
            Self::Split { groups, .. } => groups.iter().flatten().copied().collect(),
            Self::SplitAmong { vm_groups, .. } => vm_groups.iter().flatten().copied().collect(),
            Self::Running { vm }
            | Self::Ready { vm }
            | Self::Sleeping { vm }
            | Self::Killed { vm }
            | Self::Root { vm } => BTreeSet::from([*vm]),
            Self::Offline { .. }
            | Self::Online { .. }
            | Self::MaxOnline { .. }
            | Self::SingleRunningCapacity { .. } => BTreeSet::new(),
        }
    }

    pub fn involved_nodes(&self) -> BTreeSet<NodeId> {
        match self {
            Self::Among { groups, .. } => groups.iter().flatten().copied().collect(),
            Self::SplitAmong { node_groups, .. } => node_groups.iter().flatten().copied().collect(),
            Self::Offline { node } | Self::Online { node } => BTreeSet::from([*node]),
            Self::Ban { nodes, .. }
            | Self::Fence { nodes, .. }
            | Self::MaxOnline { nodes, .. }
            | Self::SingleRunningCapacity { nodes, .. } => nodes.clone(),
            Self::Spread { .. }
            | Self::Split { .. }
            | Self::Running { .. }
            | Self::Ready { .. }
            | Self::Sleeping { .. }
            | Self::Killed { .. }
            | Self::Root { .. }
            | Self::Preserve { .. } => BTreeSet::new(),
        }
    }

    pub fn is_continuous(&self) -> bool {
        match self {
            Self::Among { continuous, .. }
            | Self::Spread { continuous, .. }
            | Self::Split { continuous, .. }
            | Self::SplitAmong { continuous, .. }
            | Self::MaxOnline { continuous, .. } => *continuous,
            Self::Root { .. } => true,
            _ => false,
        }
    }

    /// Change the restriction. Returns `false` when the kind does not
    /// support the requested restriction; the constraint is unchanged then.
    pub fn set_continuous(&mut self, value: bool) -> bool {
        match self {
            Self::Among { continuous, .. }
            | Self::Spread { continuous, .. }
            | Self::Split { continuous, .. }
            | Self::SplitAmong { continuous, .. }
            | Self::MaxOnline { continuous, .. } => {
                *continuous = value;
                true
            }
            Self::Root { .. } => value,
            _ => !value,
        }
    }

    // ── Endpoint satisfaction ─────────────────────────────────────

    /// Whether a model satisfies the constraint, regardless of how it
    /// was reached.
    pub fn is_satisfied(&self, mo: &Model) -> bool {
        let map = mo.mapping();
        match self {
            Self::Among { vms, groups, .. } => {
                among_group(mo, vms, groups) != AmongPlacement::Spanning
            }
            Self::Spread { vms, .. } => {
                let mut used = BTreeSet::new();
                vms.iter()
                    .filter(|vm| map.is_running(**vm))
                    .filter_map(|vm| map.vm_location(*vm))
                    .all(|n| used.insert(n))
            }
            Self::Split { groups, .. } => {
                let hosts: Vec<BTreeSet<NodeId>> = groups
                    .iter()
                    .map(|g| running_hosts(mo, g))
                    .collect();
                hosts.iter().enumerate().all(|(i, a)| {
                    hosts.iter().skip(i + 1).all(|b| a.is_disjoint(b))
                })
            }
            Self::SplitAmong {
                vm_groups,
                node_groups,
                ..
            } => {
                let mut chosen = BTreeSet::new();
                for vms in vm_groups {
                    match among_group(mo, vms, node_groups) {
                        AmongPlacement::Group(g) => {
                            if !chosen.insert(g) {
                                return false;
                            }
                        }
                        AmongPlacement::Unplaced => {}
                        AmongPlacement::Spanning => return false,
                    }
                }
                true
            }
            Self::Offline { node } => map.is_offline(*node),
            Self::Online { node } => map.is_online(*node),
            Self::Running { vm } => map.is_running(*vm),
            Self::Ready { vm } => map.is_ready(*vm),
            Self::Sleeping { vm } => map.is_sleeping(*vm),
            Self::Killed { vm } => !map.contains_vm(*vm),
            Self::Ban { vms, nodes } => running_hosts(mo, vms).is_disjoint(nodes),
            Self::Fence { vms, nodes } => running_hosts(mo, vms).is_subset(nodes),
            // A root VM cannot be judged without its origin; the checker
            // compares against the source model.
            Self::Root { .. } => true,
            Self::MaxOnline { nodes, amount, .. } => {
                nodes.iter().filter(|n| map.is_online(**n)).count() <= *amount as usize
            }
            Self::Preserve {
                vms,
                resource,
                amount,
            } => match mo.view(resource) {
                Ok(view) => vms
                    .iter()
                    .filter(|vm| map.is_running(**vm))
                    .all(|vm| view.consumption(*vm) >= *amount),
                Err(_) => false,
            },
            Self::SingleRunningCapacity { nodes, amount } => nodes
                .iter()
                .all(|n| map.running_vms_on(*n).len() <= *amount as usize),
        }
    }
}

/// Nodes hosting the running VMs of a set.
pub fn running_hosts(mo: &Model, vms: &BTreeSet<VmId>) -> BTreeSet<NodeId> {
    let map = mo.mapping();
    vms.iter()
        .filter(|vm| map.is_running(**vm))
        .filter_map(|vm| map.vm_location(*vm))
        .collect()
}

/// Index of the group of a node, if any.
pub fn group_of(groups: &[BTreeSet<NodeId>], node: NodeId) -> Option<usize> {
    groups.iter().position(|g| g.contains(&node))
}

/// Where the running VMs of a set sit relative to node groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmongPlacement {
    /// No VM of the set runs.
    Unplaced,
    /// Every running VM is hosted in this group.
    Group(usize),
    /// The running VMs use several groups, or a node outside every group.
    Spanning,
}

/// The single group hosting all running VMs of `vms`.
pub fn among_group(
    mo: &Model,
    vms: &BTreeSet<VmId>,
    groups: &[BTreeSet<NodeId>],
) -> AmongPlacement {
    let mut found = None;
    for n in running_hosts(mo, vms) {
        let Some(g) = group_of(groups, n) else {
            return AmongPlacement::Spanning;
        };
        match found {
            None => found = Some(g),
            Some(prev) if prev != g => return AmongPlacement::Spanning,
            Some(_) => {}
        }
    }
    found.map_or(AmongPlacement::Unplaced, AmongPlacement::Group)
}

fn restriction(continuous: bool) -> &'static str {
    if continuous {
        "continuous"
    } else {
        "discrete"
    }
}

impl fmt::Display for SatConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind())?;
        match self {
            Self::Among { vms, groups, .. } => {
                f.write_str("vms=")?;
                fmt_list(f, vms)?;
                f.write_str(", nodes=[")?;
                for (i, g) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_list(f, g)?;
                }
                f.write_str("]")?;
            }
            Self::SplitAmong {
                vm_groups,
                node_groups,
                ..
            } => {
                f.write_str("vms=[")?;
                for (i, g) in vm_groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_list(f, g)?;
                }
                f.write_str("], nodes=[")?;
                for (i, g) in node_groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_list(f, g)?;
                }
                f.write_str("]")?;
            }
            Self::Split { groups, .. } => {
                f.write_str("vms=[")?;
                for (i, g) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_list(f, g)?;
                }
                f.write_str("]")?;
            }
            Self::Spread { vms, .. } => {
                f.write_str("vms=")?;
                fmt_list(f, vms)?;
            }
            Self::Offline { node } | Self::Online { node } => write!(f, "node={node}")?,
            Self::Running { vm }
            | Self::Ready { vm }
            | Self::Sleeping { vm }
            | Self::Killed { vm }
            | Self::Root { vm } => write!(f, "vm={vm}")?,
            Self::Ban { vms, nodes } | Self::Fence { vms, nodes } => {
                f.write_str("vms=")?;
                fmt_list(f, vms)?;
                f.write_str(", nodes=")?;
                fmt_list(f, nodes)?;
            }
            Self::MaxOnline { nodes, amount, .. } => {
                f.write_str("nodes=")?;
                fmt_list(f, nodes)?;
                write!(f, ", amount={amount}")?;
            }
            Self::Preserve {
                vms,
                resource,
                amount,
            } => {
                f.write_str("vms=")?;
                fmt_list(f, vms)?;
                write!(f, ", rc={resource}, amount={amount}")?;
            }
            Self::SingleRunningCapacity { nodes, amount } => {
                f.write_str("nodes=")?;
                fmt_list(f, nodes)?;
                write!(f, ", amount={amount}")?;
            }
        }
        write!(f, ", {})", restriction(self.is_continuous()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[u32]) -> BTreeSet<NodeId> {
        ids.iter().map(|i| NodeId(*i)).collect()
    }

    fn vms(ids: &[u32]) -> BTreeSet<VmId> {
        ids.iter().map(|i| VmId(*i)).collect()
    }

    fn model() -> Model {
        // n0: vm0, vm1 | n1: vm2 | n2: - | n3 offline, vm3 ready
        let mut mo = Model::new();
        for _ in 0..4 {
            mo.new_node();
        }
        for _ in 0..4 {
            mo.new_vm();
        }
        let map = mo.mapping_mut();
        for n in 0..3 {
            map.add_online_node(NodeId(n));
        }
        map.add_offline_node(NodeId(3));
        map.add_running_vm(VmId(0), NodeId(0));
        map.add_running_vm(VmId(1), NodeId(0));
        map.add_running_vm(VmId(2), NodeId(1));
        map.add_ready_vm(VmId(3));
        mo
    }

    #[test]
    fn discrete_only_kinds_refuse_continuity() {
        let mut c = SatConstraint::Offline { node: NodeId(0) };
        assert!(!c.set_continuous(true));
        assert!(c.set_continuous(false));
        assert!(!c.is_continuous());

        let mut root = SatConstraint::Root { vm: VmId(0) };
        assert!(!root.set_continuous(false));
        assert!(root.is_continuous());

        let mut spread = SatConstraint::spread(vms(&[0, 1]), false);
        assert!(spread.set_continuous(true));
        assert!(spread.is_continuous());
    }

    #[test]
    fn among_satisfaction() {
        let mo = model();
        let ok = SatConstraint::among(vms(&[0, 1]), vec![nodes(&[0]), nodes(&[1, 2])], false);
        assert!(ok.is_satisfied(&mo));
        let ko = SatConstraint::among(vms(&[0, 2]), vec![nodes(&[0]), nodes(&[1, 2])], false);
        assert!(!ko.is_satisfied(&mo));
        let outside = SatConstraint::among(vms(&[2]), vec![nodes(&[0])], false);
        assert!(!outside.is_satisfied(&mo));
    }

    #[test]
    fn among_group_reports_the_placement() {
        let mo = model();
        let groups = vec![nodes(&[0]), nodes(&[1, 2])];
        assert_eq!(among_group(&mo, &vms(&[0, 1]), &groups), AmongPlacement::Group(0));
        assert_eq!(among_group(&mo, &vms(&[2]), &groups), AmongPlacement::Group(1));
        assert_eq!(among_group(&mo, &vms(&[3]), &groups), AmongPlacement::Unplaced);
        assert_eq!(among_group(&mo, &vms(&[0, 2]), &groups), AmongPlacement::Spanning);
        assert_eq!(
            among_group(&mo, &vms(&[2, 3]), &[nodes(&[0])]),
            AmongPlacement::Spanning
        );
    }

    #[test]
    fn spread_and_split_satisfaction() {
        let mo = model();
        assert!(!SatConstraint::spread(vms(&[0, 1]), true).is_satisfied(&mo));
        assert!(SatConstraint::spread(vms(&[0, 2, 3]), true).is_satisfied(&mo));
        assert!(SatConstraint::split(vec![vms(&[0]), vms(&[2])], false).is_satisfied(&mo));
        assert!(!SatConstraint::split(vec![vms(&[0]), vms(&[1, 2])], false).is_satisfied(&mo));
    }

    #[test]
    fn state_and_capacity_satisfaction() {
        let mo = model();
        assert!(SatConstraint::Offline { node: NodeId(3) }.is_satisfied(&mo));
        assert!(!SatConstraint::Killed { vm: VmId(3) }.is_satisfied(&mo));
        assert!(SatConstraint::Ready { vm: VmId(3) }.is_satisfied(&mo));
        assert!(SatConstraint::max_online(nodes(&[0, 1, 2]), 3, false).is_satisfied(&mo));
        assert!(!SatConstraint::max_online(nodes(&[0, 1, 2]), 2, false).is_satisfied(&mo));
        let src = SatConstraint::SingleRunningCapacity {
            nodes: nodes(&[0]),
            amount: 1,
        };
        assert!(!src.is_satisfied(&mo));
        assert!(!SatConstraint::ban(vms(&[0]), nodes(&[0])).is_satisfied(&mo));
        assert!(SatConstraint::fence(vms(&[0, 2]), nodes(&[0, 1])).is_satisfied(&mo));
    }

    #[test]
    fn display_mentions_restriction() {
        let c = SatConstraint::spread(vms(&[1, 2]), true);
        assert_eq!(c.to_string(), "spread(vms=[vm#1, vm#2], continuous)");
        let o = SatConstraint::Offline { node: NodeId(0) };
        assert_eq!(o.to_string(), "offline(node=node#0, discrete)");
    }

    #[test]
    fn every_kind_roundtrips() {
        let all = vec![
            SatConstraint::among(vms(&[1, 2]), vec![nodes(&[0]), nodes(&[1, 2])], true),
            SatConstraint::spread(vms(&[1, 2]), false),
            SatConstraint::split(vec![vms(&[1]), vms(&[2, 3])], true),
            SatConstraint::SplitAmong {
                vm_groups: vec![vms(&[1]), vms(&[2])],
                node_groups: vec![nodes(&[0]), nodes(&[1])],
                continuous: false,
            },
            SatConstraint::Offline { node: NodeId(1) },
            SatConstraint::Online { node: NodeId(1) },
            SatConstraint::Running { vm: VmId(1) },
            SatConstraint::Ready { vm: VmId(1) },
            SatConstraint::Sleeping { vm: VmId(1) },
            SatConstraint::Killed { vm: VmId(1) },
            SatConstraint::ban(vms(&[1]), nodes(&[2])),
            SatConstraint::fence(vms(&[1]), nodes(&[2])),
            SatConstraint::Root { vm: VmId(4) },
            SatConstraint::max_online(nodes(&[1, 2]), 1, true),
            SatConstraint::Preserve {
                vms: vms(&[1]),
                resource: "cpu".into(),
                amount: 5,
            },
            SatConstraint::SingleRunningCapacity {
                nodes: nodes(&[1]),
                amount: 2,
            },
        ];
        for c in all {
            let s = serde_json::to_string(&c).unwrap();
            assert_eq!(serde_json::from_str::<SatConstraint>(&s).unwrap(), c, "{s}");
        }
    }
}

//! Plan validation against placement constraints.
//!
//! Each constraint gets a [`ConstraintChecker`] that walks through
//! `not started → running → ended`:
//!
//! - `starts_with` seeds the scanning state from the source model and
//!   may reject a source model a continuous constraint cannot start from.
//! - `on_start` / `on_end` observe the actions of the plan in timeline
//!   order. Only continuous constraints keep scanning state; discrete
//!   ones ignore every action.
//! - `ends_with` checks the destination model for every constraint.
//!
//! [`PlanChecker`] replays a whole plan through a set of checkers.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::action::{Action, ActionCategory, ActionKind};
use crate::constraint::{group_of, SatConstraint};
use crate::error::{CheckPhase, CheckerError};
use crate::model::Model;
use crate::plan::ReconfigurationPlan;
use crate::types::{NodeId, VmId};

/// Lifecycle of a checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerPhase {
    NotStarted,
    Running,
    Ended,
}

/// Minimal scanning state of a continuous constraint.
#[derive(Debug, Clone)]
enum ScanState {
    /// Discrete constraints: nothing to remember between actions.
    Stateless,
    /// Spread and Split: which constrained VMs occupy each node. A VM
    /// occupies its destination from the start of its arrival and leaves
    /// its source at the end of its departure.
    Occupancy {
        group: BTreeMap<VmId, usize>,
        occupied: BTreeMap<NodeId, BTreeSet<VmId>>,
    },
    /// Among and SplitAmong: the node group each VM group settled on.
    Groups {
        group: BTreeMap<VmId, usize>,
        node_groups: Vec<BTreeSet<NodeId>>,
        chosen: BTreeMap<usize, usize>,
    },
    /// MaxOnline: nodes that are online or on their way to be.
    OnlineCount {
        nodes: BTreeSet<NodeId>,
        amount: u32,
        online: u32,
    },
    /// Root: the host the VM must never leave.
    Origin { vm: VmId, node: Option<NodeId> },
}

impl ScanState {
    fn reacts_to(&self) -> Option<ActionCategory> {
        match self {
            Self::Stateless => None,
            Self::Occupancy { .. } | Self::Groups { .. } | Self::Origin { .. } => {
                Some(ActionCategory::Placement)
            }
            Self::OnlineCount { .. } => Some(ActionCategory::NodeState),
        }
    }
}

/// A VM that starts being hosted on a node when the action starts.
fn arrival(a: &Action) -> Option<(VmId, NodeId)> {
    match &a.kind {
        ActionKind::BootVm { vm, node } => Some((*vm, *node)),
        ActionKind::MigrateVm { vm, to, .. } | ActionKind::ResumeVm { vm, to, .. } => {
            Some((*vm, *to))
        }
        _ => None,
    }
}

/// A running VM that stops being hosted on a node when the action ends.
fn departure(a: &Action) -> Option<(VmId, NodeId)> {
    match &a.kind {
        ActionKind::MigrateVm { vm, from, .. } | ActionKind::SuspendVm { vm, from, .. } => {
            Some((*vm, *from))
        }
        ActionKind::ShutdownVm { vm, node } => Some((*vm, *node)),
        ActionKind::KillVm { vm, node: Some(node) } => Some((*vm, *node)),
        _ => None,
    }
}

fn index_groups(groups: &[BTreeSet<VmId>]) -> BTreeMap<VmId, usize> {
    groups
        .iter()
        .enumerate()
        .flat_map(|(i, g)| g.iter().map(move |vm| (*vm, i)))
        .collect()
}

/// Stateful validator for one constraint.
#[derive(Debug, Clone)]
pub struct ConstraintChecker {
    constraint: SatConstraint,
    phase: CheckerPhase,
    state: ScanState,
}

impl ConstraintChecker {
    pub fn new(constraint: SatConstraint) -> Self {
        let state = if !constraint.is_continuous() {
            ScanState::Stateless
        } else {
            match &constraint {
                SatConstraint::Spread { vms, .. } => ScanState::Occupancy {
                    group: vms.iter().enumerate().map(|(i, vm)| (*vm, i)).collect(),
                    occupied: BTreeMap::new(),
                },
                SatConstraint::Split { groups, .. } => ScanState::Occupancy {
                    group: index_groups(groups),
                    occupied: BTreeMap::new(),
                },
                SatConstraint::Among { vms, groups, .. } => ScanState::Groups {
                    group: vms.iter().map(|vm| (*vm, 0)).collect(),
                    node_groups: groups.clone(),
                    chosen: BTreeMap::new(),
                },
                SatConstraint::SplitAmong {
                    vm_groups,
                    node_groups,
                    ..
                } => ScanState::Groups {
                    group: index_groups(vm_groups),
                    node_groups: node_groups.clone(),
                    chosen: BTreeMap::new(),
                },
                SatConstraint::MaxOnline { nodes, amount, .. } => ScanState::OnlineCount {
                    nodes: nodes.clone(),
                    amount: *amount,
                    online: 0,
                },
                SatConstraint::Root { vm } => ScanState::Origin { vm: *vm, node: None },
                _ => ScanState::Stateless,
            }
        };
        Self {
            constraint,
            phase: CheckerPhase::NotStarted,
            state,
        }
    }

    pub fn constraint(&self) -> &SatConstraint {
        &self.constraint
    }

    pub fn phase(&self) -> CheckerPhase {
        self.phase
    }

    /// Whether the checker wants to see actions of this category.
    pub fn reacts_to(&self, category: ActionCategory) -> bool {
        self.state.reacts_to() == Some(category)
    }

    fn violation(&self, phase: CheckPhase, action: Option<&Action>) -> CheckerError {
        CheckerError::Violation {
            constraint: self.constraint.clone(),
            phase,
            action: action.cloned(),
        }
    }

    /// Seed the scanning state from the source model.
    pub fn starts_with(&mut self, mo: &Model) -> Result<(), CheckerError> {
        self.phase = CheckerPhase::Running;
        let map = mo.mapping();
        let ok = match &mut self.state {
            ScanState::Stateless => true,
            ScanState::Occupancy { group, occupied } => {
                for (vm, _) in group.iter() {
                    if let (true, Some(n)) = (map.is_running(*vm), map.vm_location(*vm)) {
                        occupied.entry(n).or_default().insert(*vm);
                    }
                }
                occupied.values().all(|vms| {
                    let distinct: BTreeSet<usize> = vms.iter().filter_map(|v| group.get(v)).copied().collect();
                    distinct.len() <= 1
                })
            }
            ScanState::Groups {
                group,
                node_groups,
                chosen,
            } => {
                let mut ok = true;
                for (vm, k) in group.iter() {
                    let Some(n) = map.vm_location(*vm).filter(|_| map.is_running(*vm)) else {
                        continue;
                    };
                    match (group_of(node_groups, n), chosen.get(k)) {
                        (None, _) => ok = false,
                        (Some(g), Some(prev)) if *prev != g => ok = false,
                        (Some(g), _) => {
                            chosen.insert(*k, g);
                        }
                    }
                }
                let used: BTreeSet<usize> = chosen.values().copied().collect();
                ok && used.len() == chosen.len()
            }
            ScanState::OnlineCount {
                nodes,
                amount,
                online,
            } => {
                *online = nodes.iter().filter(|n| map.is_online(**n)).count() as u32;
                *online <= *amount
            }
            ScanState::Origin { vm, node } => {
                *node = map.vm_location(*vm);
                true
            }
        };
        if ok {
            Ok(())
        } else {
            Err(self.violation(CheckPhase::StartsWith, None))
        }
    }

    /// Observe the start of an action.
    pub fn on_start(&mut self, a: &Action) -> Result<(), CheckerError> {
        if self.phase != CheckerPhase::Running || !self.reacts_to(a.category()) {
            return Ok(());
        }
        let ok = match &mut self.state {
            ScanState::Stateless => true,
            ScanState::Occupancy { group, occupied } => match arrival(a) {
                Some((vm, n)) if group.contains_key(&vm) => {
                    let mine = group.get(&vm).copied();
                    let on_node = occupied.entry(n).or_default();
                    let clash = on_node
                        .iter()
                        .any(|other| *other != vm && group.get(other).copied() != mine);
                    on_node.insert(vm);
                    !clash
                }
                _ => true,
            },
            ScanState::Groups {
                group,
                node_groups,
                chosen,
            } => match arrival(a).and_then(|(vm, n)| group.get(&vm).map(|k| (*k, n))) {
                Some((k, n)) => match group_of(node_groups, n) {
                    None => false,
                    Some(g) => match chosen.get(&k) {
                        Some(prev) => *prev == g,
                        None => {
                            let taken = chosen.values().any(|other| *other == g);
                            chosen.insert(k, g);
                            !taken
                        }
                    },
                },
                None => true,
            },
            ScanState::OnlineCount {
                nodes,
                amount,
                online,
            } => match &a.kind {
                ActionKind::BootNode { node } if nodes.contains(node) => {
                    *online += 1;
                    *online <= *amount
                }
                _ => true,
            },
            ScanState::Origin { vm, node } => match arrival(a) {
                Some((v, to)) if v == *vm => node.is_none_or(|origin| origin == to),
                _ => true,
            },
        };
        if ok {
            Ok(())
        } else {
            Err(self.violation(CheckPhase::ActionStart, Some(a)))
        }
    }

    /// Observe the end of an action.
    pub fn on_end(&mut self, a: &Action) -> Result<(), CheckerError> {
        if self.phase != CheckerPhase::Running || !self.reacts_to(a.category()) {
            return Ok(());
        }
        match &mut self.state {
            ScanState::Occupancy { occupied, .. } => {
                if let Some((vm, from)) = departure(a) {
                    if let Some(on_node) = occupied.get_mut(&from) {
                        on_node.remove(&vm);
                    }
                }
            }
            ScanState::OnlineCount { nodes, online, .. } => {
                if let ActionKind::ShutdownNode { node } = &a.kind {
                    if nodes.contains(node) {
                        *online = online.saturating_sub(1);
                    }
                }
            }
            ScanState::Stateless | ScanState::Groups { .. } | ScanState::Origin { .. } => {}
        }
        Ok(())
    }

    /// Check the destination model.
    pub fn ends_with(&mut self, mo: &Model) -> Result<(), CheckerError> {
        self.phase = CheckerPhase::Ended;
        let ok = match &self.state {
            ScanState::Origin { vm, node: Some(origin) } => mo
                .mapping()
                .vm_location(*vm)
                .is_none_or(|n| n == *origin),
            _ => self.constraint.is_satisfied(mo),
        };
        if ok {
            Ok(())
        } else {
            Err(self.violation(CheckPhase::EndsWith, None))
        }
    }
}

/// Replays a plan through the checkers of a constraint set.
pub struct PlanChecker {
    checkers: Vec<ConstraintChecker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    /// End of an action that lasts; frees resources before anything starts.
    End,
    Start,
    /// End of an instantaneous action, after its own start.
    InstantEnd,
}

impl PlanChecker {
    pub fn new(constraints: impl IntoIterator<Item = SatConstraint>) -> Self {
        Self {
            checkers: constraints.into_iter().map(ConstraintChecker::new).collect(),
        }
    }

    /// Validate a plan against every constraint.
    ///
    /// Returns the first violation, or `NotApplyable` if the plan does not
    /// replay on its source model.
    pub fn check(&mut self, plan: &ReconfigurationPlan) -> Result<(), CheckerError> {
        let dst = plan.apply_detailed().map_err(CheckerError::NotApplyable)?;

        for c in &mut self.checkers {
            c.starts_with(plan.source())?;
        }

        let actions = plan.ordered();
        let mut events: Vec<(i32, EventKind, usize)> = Vec::with_capacity(actions.len() * 2);
        for (i, a) in actions.iter().enumerate() {
            events.push((a.start, EventKind::Start, i));
            let kind = if a.end > a.start {
                EventKind::End
            } else {
                EventKind::InstantEnd
            };
            events.push((a.end, kind, i));
        }
        events.sort();

        for (_, kind, i) in events {
            let a = actions[i];
            for c in &mut self.checkers {
                match kind {
                    EventKind::Start => c.on_start(a)?,
                    EventKind::End | EventKind::InstantEnd => c.on_end(a)?,
                }
            }
        }

        for c in &mut self.checkers {
            c.ends_with(&dst)?;
        }
        debug!(
            actions = plan.size(),
            constraints = self.checkers.len(),
            "plan satisfies every constraint"
        );
        Ok(())
    }
}

/// Validate a plan against a set of constraints.
pub fn check_plan(
    plan: &ReconfigurationPlan,
    constraints: &[SatConstraint],
) -> Result<(), CheckerError> {
    PlanChecker::new(constraints.iter().cloned()).check(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> (Model, Vec<NodeId>, Vec<VmId>) {
        let mut mo = Model::new();
        let nodes: Vec<NodeId> = (0..3).map(|_| mo.new_node()).collect();
        let vms: Vec<VmId> = (0..3).map(|_| mo.new_vm()).collect();
        let map = mo.mapping_mut();
        for n in &nodes {
            map.add_online_node(*n);
        }
        map.add_running_vm(vms[0], nodes[0]);
        map.add_running_vm(vms[1], nodes[1]);
        map.add_running_vm(vms[2], nodes[2]);
        (mo, nodes, vms)
    }

    #[test]
    fn discrete_checker_ignores_actions() {
        let (_, n, v) = source();
        let c = ConstraintChecker::new(SatConstraint::spread([v[0], v[1]], false));
        assert!(!c.reacts_to(ActionCategory::Placement));
        assert!(!c.reacts_to(ActionCategory::NodeState));
        let c = ConstraintChecker::new(SatConstraint::spread([v[0], v[1]], true));
        assert!(c.reacts_to(ActionCategory::Placement));
        let c = ConstraintChecker::new(SatConstraint::max_online([n[0]], 1, true));
        assert!(c.reacts_to(ActionCategory::NodeState));
    }

    #[test]
    fn continuous_spread_rejects_overlapping_arrival() {
        let (mo, n, v) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        // vm1 lands on n0 while vm0 is still leaving it.
        plan.add(Action::migrate_vm(v[0], n[0], n[2], 0, 4));
        plan.add(Action::migrate_vm(v[1], n[1], n[0], 2, 5));
        plan.add(Action::migrate_vm(v[2], n[2], n[1], 0, 1));

        let spread = SatConstraint::spread([v[0], v[1]], true);
        let err = check_plan(&plan, &[spread.clone()]).unwrap_err();
        assert!(matches!(
            err,
            CheckerError::Violation {
                phase: CheckPhase::ActionStart,
                action: Some(_),
                ..
            }
        ));
        assert_eq!(err.constraint(), Some(&spread));

        // The same destination is fine under the discrete restriction.
        assert!(check_plan(&plan, &[SatConstraint::spread([v[0], v[1]], false)]).is_ok());
    }

    #[test]
    fn continuous_spread_accepts_arrival_after_departure() {
        let (mo, n, v) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::migrate_vm(v[2], n[2], n[1], 0, 1));
        plan.add(Action::migrate_vm(v[0], n[0], n[2], 1, 3));
        plan.add(Action::migrate_vm(v[1], n[1], n[0], 3, 5));
        assert!(check_plan(&plan, &[SatConstraint::spread([v[0], v[1]], true)]).is_ok());
    }

    #[test]
    fn continuous_spread_rejects_bad_source() {
        let (mut mo, n, v) = source();
        mo.mapping_mut().add_running_vm(v[1], n[0]);
        let plan = ReconfigurationPlan::new(mo);
        let err = check_plan(&plan, &[SatConstraint::spread([v[0], v[1]], true)]).unwrap_err();
        assert!(matches!(
            err,
            CheckerError::Violation {
                phase: CheckPhase::StartsWith,
                ..
            }
        ));
    }

    #[test]
    fn max_online_counts_boots_before_shutdown_ends() {
        let (mut mo, _, _) = source();
        let extra = mo.new_node();
        mo.mapping_mut().add_offline_node(extra);
        let empty = mo.new_node();
        mo.mapping_mut().add_online_node(empty);

        let nodes = [extra, empty];
        let mut overlap = ReconfigurationPlan::new(mo.clone());
        overlap.add(Action::shutdown_node(empty, 0, 3));
        overlap.add(Action::boot_node(extra, 1, 4));
        let c = SatConstraint::max_online(nodes, 1, true);
        assert!(check_plan(&overlap, &[c.clone()]).is_err());

        let mut sequential = ReconfigurationPlan::new(mo);
        sequential.add(Action::shutdown_node(empty, 0, 3));
        sequential.add(Action::boot_node(extra, 3, 6));
        assert!(check_plan(&sequential, &[c]).is_ok());
    }

    #[test]
    fn root_forbids_relocation() {
        let (mo, n, v) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::migrate_vm(v[0], n[0], n[1], 0, 2));
        assert!(check_plan(&plan, &[SatConstraint::Root { vm: v[0] }]).is_err());
        assert!(check_plan(&plan, &[SatConstraint::Root { vm: v[1] }]).is_ok());
    }

    #[test]
    fn continuous_among_sticks_to_first_group() {
        let (mo, n, v) = source();
        let groups = vec![BTreeSet::from([n[0], n[1]]), BTreeSet::from([n[2]])];
        let among = SatConstraint::among([v[0], v[1]], groups, true);
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::migrate_vm(v[0], n[0], n[1], 0, 2));
        assert!(check_plan(&plan, &[among.clone()]).is_ok());

        let (mo, n, v) = source();
        let mut away = ReconfigurationPlan::new(mo);
        away.add(Action::migrate_vm(v[0], n[0], n[2], 0, 2));
        let err = check_plan(&away, &[among]).unwrap_err();
        assert!(matches!(
            err,
            CheckerError::Violation {
                phase: CheckPhase::ActionStart,
                ..
            }
        ));
    }

    #[test]
    fn discrete_checks_destination_only() {
        let (mo, n, v) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::shutdown_vm(v[0], n[0], 0, 1));
        plan.add(Action::shutdown_node(n[0], 1, 2));
        assert!(check_plan(&plan, &[SatConstraint::Offline { node: n[0] }]).is_ok());
        let err = check_plan(&plan, &[SatConstraint::Running { vm: v[0] }]).unwrap_err();
        assert!(matches!(
            err,
            CheckerError::Violation {
                phase: CheckPhase::EndsWith,
                ..
            }
        ));
    }

    #[test]
    fn unapplyable_plan_is_reported() {
        let (mo, n, _) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::shutdown_node(n[0], 0, 1));
        assert!(matches!(
            check_plan(&plan, &[]),
            Err(CheckerError::NotApplyable(_))
        ));
    }
}

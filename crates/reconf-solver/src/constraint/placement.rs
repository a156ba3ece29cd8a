//! Placement constraints: among, spread, split, splitAmong, ban, fence,
//! root.

use std::collections::{BTreeMap, BTreeSet};

use reconf_model::constraint::{among_group, group_of, AmongPlacement};
use reconf_model::{Model, NodeId, SatConstraint, VmId};
use tracing::debug;

use super::rejected;
use crate::error::SolverResult;
use crate::extensions::{DisjointMultiple, Precedences};
use crate::kernel::arith::Element;
use crate::kernel::VarId;
use crate::problem::ReconfigurationProblem;

/// Host the running VMs of `vms` on a single node group.
///
/// Returns the group selector variable, `None` when no VM of the set runs
/// at the end of the plan.
pub(super) fn among(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    vms: &BTreeSet<VmId>,
    groups: &[BTreeSet<NodeId>],
    continuous: bool,
) -> SolverResult<Option<VarId>> {
    let hosts = problem.host_vars(vms);
    if hosts.is_empty() {
        return Ok(None);
    }
    if groups.is_empty() {
        return Err(rejected(c, "no node group to pick from"));
    }
    let table: Vec<i32> = problem
        .nodes()
        .iter()
        .map(|n| group_of(groups, *n).map_or(-1, |g| g as i32))
        .collect();

    // A continuous restriction keeps the VMs in the group they already
    // use; otherwise a VM already fixed to a node decides the group.
    let mut pinned = None;
    if continuous {
        pinned = match among_group(problem.source(), vms, groups) {
            AmongPlacement::Group(g) => Some(g),
            AmongPlacement::Unplaced => None,
            AmongPlacement::Spanning => {
                return Err(rejected(c, "running VMs already span several node groups"))
            }
        };
    }
    if pinned.is_none() {
        let store = problem.solver().store();
        if let Some(idx) = hosts.iter().find_map(|h| store.value(*h)) {
            match usize::try_from(idx).ok().and_then(|i| table.get(i)) {
                Some(g) if *g >= 0 => pinned = Some(*g as usize),
                _ => return Err(rejected(c, "a VM is fixed on a node outside every group")),
            }
        }
    }

    let solver = problem.solver_mut();
    let selector = solver
        .store_mut()
        .new_range("among.group", 0, groups.len() as i32 - 1);
    for h in hosts {
        solver.post(Element::new(h, table.clone(), selector));
    }
    if let Some(g) = pinned {
        debug!(constraint = %c, group = g, "group decided before search");
        solver
            .store_mut()
            .instantiate(selector, g as i32)
            .map_err(|_| rejected(c, format!("group {g} is not reachable")))?;
    }
    Ok(Some(selector))
}

/// One among per VM group, distinct VM groups on distinct node groups.
pub(super) fn split_among(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    vm_groups: &[BTreeSet<VmId>],
    node_groups: &[BTreeSet<NodeId>],
    continuous: bool,
) -> SolverResult<()> {
    if vm_groups.len() > node_groups.len() {
        return Err(rejected(c, "more VM groups than node groups"));
    }
    let mut selectors = Vec::new();
    for vms in vm_groups {
        if let Some(s) = among(problem, c, vms, node_groups, continuous)? {
            selectors.push(vec![s]);
        }
    }
    let store = problem.solver_mut().store_mut();
    let disjoint = DisjointMultiple::new(store, selectors, node_groups.len());
    problem.solver_mut().post(disjoint);
    Ok(())
}

/// VMs of distinct groups never share a node. Spread is the special case
/// of singleton groups.
///
/// The continuous restriction also orders arrivals: a VM lands on a node
/// only once the VMs of the other groups have left it.
pub(super) fn split(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    groups: &[BTreeSet<VmId>],
    continuous: bool,
) -> SolverResult<()> {
    if continuous && !c.is_satisfied(problem.source()) {
        return Err(rejected(c, "already violated in the source model"));
    }
    let nb_nodes = problem.nodes().len();
    let host_groups: Vec<Vec<VarId>> = groups.iter().map(|g| problem.host_vars(g)).collect();
    let store = problem.solver_mut().store_mut();
    let disjoint = DisjointMultiple::new(store, host_groups, nb_nodes);
    problem.solver_mut().post(disjoint);
    if !continuous {
        return Ok(());
    }

    // Departures per group: current host index and consuming slice end.
    let mut departures: Vec<Vec<(usize, VarId)>> = Vec::with_capacity(groups.len());
    for g in groups {
        let mut out = Vec::new();
        for vm in g {
            let Some(m) = problem.vm_model(*vm) else {
                continue;
            };
            let on = m.transition.current_host().and_then(|n| problem.node_index(n));
            if let (Some(cs), Some(idx)) = (m.cslice, on) {
                out.push((idx, cs.end));
            }
        }
        departures.push(out);
    }
    let mut arrivals: Vec<(VarId, VarId, Vec<(usize, VarId)>)> = Vec::new();
    for (i, g) in groups.iter().enumerate() {
        let others: Vec<(usize, VarId)> = departures
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .flat_map(|(_, d)| d.iter().copied())
            .collect();
        for vm in g {
            if let Some(ds) = problem.vm_model(*vm).and_then(|m| m.dslice) {
                arrivals.push((ds.host, ds.start, others.clone()));
            }
        }
    }
    for (host, start, others) in arrivals {
        let store = problem.solver_mut().store_mut();
        let p = Precedences::new(store, host, start, others, nb_nodes);
        problem.solver_mut().post(p);
    }
    Ok(())
}

pub(super) fn ban(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    vms: &BTreeSet<VmId>,
    nodes: &BTreeSet<NodeId>,
) -> SolverResult<()> {
    let banned = problem.node_indices(nodes);
    let hosts = problem.host_vars(vms);
    let store = problem.solver_mut().store_mut();
    for h in hosts {
        for idx in &banned {
            store
                .remove(h, *idx)
                .map_err(|_| rejected(c, "a VM has no host left"))?;
        }
    }
    Ok(())
}

pub(super) fn fence(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    vms: &BTreeSet<VmId>,
    nodes: &BTreeSet<NodeId>,
) -> SolverResult<()> {
    let allowed = problem.node_indices(nodes);
    let hosts = problem.host_vars(vms);
    let store = problem.solver_mut().store_mut();
    for h in hosts {
        for idx in store.values(h) {
            if !allowed.contains(&idx) {
                store
                    .remove(h, idx)
                    .map_err(|_| rejected(c, "a VM has no host left"))?;
            }
        }
    }
    Ok(())
}

/// A running VM that stays running keeps its host.
pub(super) fn root(problem: &mut ReconfigurationProblem, c: &SatConstraint, vm: VmId) -> SolverResult<()> {
    let Some(m) = problem.vm_model(vm) else {
        return Ok(());
    };
    let (Some(ds), Some(on)) = (m.dslice, m.transition.current_host()) else {
        return Ok(());
    };
    let Some(idx) = problem.node_index(on) else {
        return Err(rejected(c, format!("{on} is not part of the model")));
    };
    problem
        .solver_mut()
        .store_mut()
        .instantiate(ds.host, idx as i32)
        .map_err(|_| rejected(c, "the VM can not stay on its host"))?;
    Ok(())
}

/// Running VMs of a set, by host.
fn by_host(mo: &Model, vms: &BTreeSet<VmId>) -> BTreeMap<NodeId, BTreeSet<VmId>> {
    let map = mo.mapping();
    let mut out: BTreeMap<NodeId, BTreeSet<VmId>> = BTreeMap::new();
    for vm in vms.iter().filter(|vm| map.is_running(**vm)) {
        if let Some(n) = map.vm_location(*vm) {
            out.entry(n).or_default().insert(*vm);
        }
    }
    out
}

fn running(mo: &Model, vms: &BTreeSet<VmId>) -> BTreeSet<VmId> {
    vms.iter()
        .filter(|vm| mo.mapping().is_running(**vm))
        .copied()
        .collect()
}

pub(super) fn misplaced(c: &SatConstraint, mo: &Model) -> BTreeSet<VmId> {
    let map = mo.mapping();
    match c {
        SatConstraint::Among { vms, .. } => {
            if c.is_satisfied(mo) {
                BTreeSet::new()
            } else {
                running(mo, vms)
            }
        }
        SatConstraint::SplitAmong { vm_groups, .. } => {
            if c.is_satisfied(mo) {
                BTreeSet::new()
            } else {
                vm_groups.iter().flat_map(|g| running(mo, g)).collect()
            }
        }
        SatConstraint::Spread { vms, .. } => by_host(mo, vms)
            .into_values()
            .filter(|on| on.len() > 1)
            .flatten()
            .collect(),
        SatConstraint::Split { groups, .. } => {
            let hosts: Vec<BTreeMap<NodeId, BTreeSet<VmId>>> =
                groups.iter().map(|g| by_host(mo, g)).collect();
            let mut out = BTreeSet::new();
            for (i, mine) in hosts.iter().enumerate() {
                for (node, vms) in mine {
                    let shared = hosts
                        .iter()
                        .enumerate()
                        .any(|(j, theirs)| j != i && theirs.contains_key(node));
                    if shared {
                        out.extend(vms.iter().copied());
                    }
                }
            }
            out
        }
        SatConstraint::Ban { vms, nodes } => vms
            .iter()
            .filter(|vm| map.is_running(**vm))
            .filter(|vm| map.vm_location(**vm).is_some_and(|n| nodes.contains(&n)))
            .copied()
            .collect(),
        SatConstraint::Fence { vms, nodes } => vms
            .iter()
            .filter(|vm| map.is_running(**vm))
            .filter(|vm| map.vm_location(**vm).is_some_and(|n| !nodes.contains(&n)))
            .copied()
            .collect(),
        _ => BTreeSet::new(),
    }
}
